//! Per-request correlation token generation.

use crate::message::MAGIC_LEN;
use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A fresh 16-character alphanumeric token (§6). Not an authenticator —
/// only used to pair a request with its matching `Response` on one socket.
pub fn generate_magic() -> String {
    let mut rng = rand::thread_rng();
    (0..MAGIC_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_expected_length() {
        let m = generate_magic();
        assert_eq!(m.chars().count(), MAGIC_LEN);
        assert!(m.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generates_distinct_tokens() {
        let a = generate_magic();
        let b = generate_magic();
        assert_ne!(a, b);
    }
}
