//! Constant-time comparison helpers.
//!
//! Fingerprints and public keys are compared with these so a peer probing
//! the trust ledger learns nothing from response timing.

use constant_time_eq::constant_time_eq;

/// Compare two fixed-size arrays in constant time.
pub fn constant_time_compare_array<const N: usize>(a: &[u8; N], b: &[u8; N]) -> bool {
    constant_time_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare_array_key_sized() {
        let a = [7u8; 32];
        let mut b = [7u8; 32];
        assert!(constant_time_compare_array(&a, &b));

        b[31] ^= 1;
        assert!(!constant_time_compare_array(&a, &b));
    }
}
