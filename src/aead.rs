use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};

use crate::traits::Aead;

/// Default AEAD: AES-256-GCM. The random nonce leads the output, so a
/// ciphertext is self-contained with layout `nonce ‖ ct ‖ tag`.
#[derive(Clone, Debug, Default)]
pub struct Aes256Gcm;

impl Aes256Gcm {
    pub const KEY_LEN: usize = 32;
    pub const NONCE_LEN: usize = 12;
    pub const TAG_LEN: usize = 16;
    /// GCM is not safe past 2^32 - 2 blocks under a single nonce.
    pub const MAX_INPUT_LEN: usize = (((1_u64 << 32) - 2) * 16) as usize;

    pub fn new() -> Self {
        Self
    }

    fn gcm_key(key: &[u8]) -> Result<LessSafeKey, anyhow::Error> {
        if key.len() != Self::KEY_LEN {
            anyhow::bail!(
                "AEAD key must be {} bytes, got {}",
                Self::KEY_LEN,
                key.len()
            );
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| anyhow::anyhow!("AEAD key was rejected"))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl Aead for Aes256Gcm {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        let key = Self::gcm_key(key)?;
        if plaintext.len() > Self::MAX_INPUT_LEN {
            anyhow::bail!("plaintext exceeds the AES-GCM size limit");
        }
        let mut nonce_bytes = [0u8; Self::NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let mut out = Vec::with_capacity(Self::NONCE_LEN + plaintext.len() + Self::TAG_LEN);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(plaintext);
        let tag = key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut out[Self::NONCE_LEN..],
            )
            .map_err(|_| anyhow::anyhow!("AEAD seal failed"))?;
        out.extend_from_slice(tag.as_ref());
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        let key = Self::gcm_key(key)?;
        if ciphertext.len() < Self::NONCE_LEN + Self::TAG_LEN {
            anyhow::bail!("ciphertext shorter than nonce and tag");
        }
        // same bound as encrypt, applied to the sealed portion
        if ciphertext.len() - Self::NONCE_LEN - Self::TAG_LEN > Self::MAX_INPUT_LEN {
            anyhow::bail!("ciphertext exceeds the AES-GCM size limit");
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(Self::NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| anyhow::anyhow!("AEAD nonce was rejected"))?;
        let mut in_out = sealed.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("AEAD open failed"))?;
        Ok(plaintext.to_vec())
    }

    fn key_len(&self) -> usize {
        Self::KEY_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_tamper_detection() {
        let aead = Aes256Gcm::new();
        let key = vec![9u8; 32];
        let mut ct = aead.encrypt(b"field value", &key).unwrap();
        assert_eq!(
            ct.len(),
            Aes256Gcm::NONCE_LEN + b"field value".len() + Aes256Gcm::TAG_LEN
        );
        assert_eq!(aead.decrypt(&ct, &key).unwrap(), b"field value");

        let last = ct.len() - 1;
        ct[last] ^= 1;
        assert!(aead.decrypt(&ct, &key).is_err());
    }

    #[test]
    fn key_and_length_bounds_are_enforced() {
        let aead = Aes256Gcm::new();
        let err = aead.encrypt(b"x", &[0u8; 16]).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
        assert!(aead.decrypt(&[0u8; 8], &[0u8; 32]).is_err());
    }
}
