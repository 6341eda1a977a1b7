use sha2::{Digest, Sha256};

/// SHA-256 over the concatenation of `parts`, without allocating the joined buffer.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Sha256::new();
    for part in parts {
        h.update(part);
    }
    h.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_matches_joined() {
        let joined: [u8; 32] = Sha256::digest(b"helloworld").into();
        assert_eq!(sha256_concat(&[b"hello".as_slice(), b"world".as_slice()]), joined);
    }
}
