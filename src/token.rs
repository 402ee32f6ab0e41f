use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, TryRngCore};

/// Random URL-safe token: `len` bytes from the OS RNG, base64url without
/// padding. Session codes use 8 bytes, auth tokens 32.
pub fn url_safe_token(len: usize) -> anyhow::Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow::anyhow!("os rng unavailable: {e}"))?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(bytes))
}
