use sha2::{Digest, Sha256};

pub(super) fn hash_token(value: &str) -> Vec<u8> {
    let digest = Sha256::digest(value.as_bytes());
    digest.to_vec()
}
