use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a hex-encoded preimage, or `None` if it is not hex.
pub fn hash_preimage(r_preimage: &str) -> Option<String> {
    let bytes = hex::decode(r_preimage).ok()?;
    Some(hex::encode(Sha256::digest(bytes)))
}

/// Draws a fresh 32-byte secret and returns `(preimage, hash)`, both hex-encoded.
pub fn generate_preimage_and_hash() -> (String, String) {
    let mut preimage = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut preimage);
    let hash = Sha256::digest(preimage);
    (hex::encode(preimage), hex::encode(hash))
}
