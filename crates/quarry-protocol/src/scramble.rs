//! `mysql_native_password` challenge-response.
//!
//! The credential store keeps `SHA1(password)`. A client proves knowledge of
//! the password by sending `SHA1(password) XOR SHA1(seed ++ SHA1(SHA1(password)))`.

use rand::Rng;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

pub const SCRAMBLE_LENGTH: usize = 20;
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Random printable bytes for use as a handshake seed. Never contains 0x00,
/// so the seed survives null-terminated framing in the greeting.
pub fn create_random_string(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(0x21u8..0x7f)).collect()
}

/// First-stage hash of a plaintext password, as persisted. An empty
/// password is stored as an empty hash.
pub fn password_hash(plain: &str) -> Vec<u8> {
    if plain.is_empty() {
        return Vec::new();
    }
    Sha1::digest(plain.as_bytes()).to_vec()
}

/// The response a client holding `stored_hash` sends for `seed`.
pub fn scramble_with_hash(seed: &[u8], stored_hash: &[u8]) -> Vec<u8> {
    if stored_hash.is_empty() {
        return Vec::new();
    }
    let stage2 = Sha1::digest(stored_hash);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let token = hasher.finalize();
    stored_hash
        .iter()
        .zip(token.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Client-side computation from the plaintext password.
pub fn scramble_response(seed: &[u8], password: &str) -> Vec<u8> {
    scramble_with_hash(seed, &password_hash(password))
}

/// Checks a client's auth response against the stored first-stage hash.
pub fn verify(seed: &[u8], stored_hash: &[u8], client_response: &[u8]) -> bool {
    if client_response.is_empty() {
        return stored_hash.is_empty();
    }
    if stored_hash.is_empty() {
        return false;
    }
    let expected = scramble_with_hash(seed, stored_hash);
    expected.as_slice().ct_eq(client_response).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SEED: &[u8; 20] = b"abcdefghijklmnopqrst";

    #[test]
    fn correct_response_verifies() {
        let stored = password_hash("password");
        let response = scramble_response(SEED, "password");
        assert_eq!(response.len(), SCRAMBLE_LENGTH);
        assert!(verify(SEED, &stored, &response));
    }

    #[test]
    fn wrong_password_fails() {
        let stored = password_hash("password");
        let response = scramble_response(SEED, "passw0rd");
        assert!(!verify(SEED, &stored, &response));
    }

    #[test]
    fn response_bound_to_seed() {
        let stored = password_hash("password");
        let response = scramble_response(b"tsrqponmlkjihgfedcba", "password");
        assert!(!verify(SEED, &stored, &response));
    }

    #[test]
    fn truncated_response_fails() {
        let stored = password_hash("password");
        let response = scramble_response(SEED, "password");
        assert!(!verify(SEED, &stored, &response[..19]));
    }

    #[test]
    fn empty_response_only_matches_empty_password() {
        assert!(verify(SEED, &password_hash(""), &[]));
        assert!(!verify(SEED, &password_hash("password"), &[]));
        assert!(!verify(SEED, &password_hash(""), &[1u8; 20]));
    }

    #[test]
    fn known_native_password_vector() {
        // SHA1("password")
        let stored = password_hash("password");
        assert_eq!(
            stored,
            vec![
                0x5b, 0xaa, 0x61, 0xe4, 0xc9, 0xb9, 0x3f, 0x3f, 0x06, 0x82, 0x25, 0x0b, 0x6c, 0xf8,
                0x33, 0x1b, 0x7e, 0xe6, 0x8f, 0xd8
            ]
        );
    }

    #[test]
    fn random_strings_are_printable_and_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let seed = create_random_string(SCRAMBLE_LENGTH);
            assert_eq!(seed.len(), SCRAMBLE_LENGTH);
            assert!(seed.iter().all(|b| (0x21..0x7f).contains(b)));
            assert!(seen.insert(seed));
        }
    }
}
