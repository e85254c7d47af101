use std::sync::Arc;

use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::traits::Aead;

fn check_master_key(crypto: &Arc<dyn Aead>, master_key: &[u8]) -> Result<()> {
    if master_key.len() != crypto.key_len() {
        return Err(Error::client(format!(
            "invalid local master key size {}, must be {} bytes",
            master_key.len(),
            crypto.key_len()
        )));
    }
    Ok(())
}

/// Wrap a DEK under the local master key. Completes in-process; no KMS
/// subcontext is spawned for local KEKs.
pub fn wrap(crypto: &Arc<dyn Aead>, master_key: &[u8], dek: &[u8]) -> Result<Vec<u8>> {
    check_master_key(crypto, master_key)?;
    crypto
        .encrypt(dek, master_key)
        .map_err(|e| Error::kms(format!("local key wrap failed: {e}")))
}

/// Unwrap key material with the local master key.
pub fn unwrap(
    crypto: &Arc<dyn Aead>,
    master_key: &[u8],
    wrapped: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    check_master_key(crypto, master_key)?;
    let dek = crypto
        .decrypt(wrapped, master_key)
        .map_err(|e| Error::kms(format!("local key unwrap failed: {e}")))?;
    Ok(Zeroizing::new(dek))
}
