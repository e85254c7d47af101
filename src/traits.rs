/// The crypto seam. The engine never implements primitives itself; it invokes
/// these operations on whatever the embedder supplies (the bundled
/// `Aes256Gcm` by default).
///
/// `encrypt` must produce a self-contained ciphertext (nonce and tag
/// included) that `decrypt` can open with the same key.
pub trait Aead: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, anyhow::Error>;
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, anyhow::Error>;

    /// Key length in bytes. DEKs and the local master key are exactly this
    /// long.
    fn key_len(&self) -> usize {
        32
    }
}
