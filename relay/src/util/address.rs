//! Inbound address generation and validation.

use rand::Rng;

/// Characters used in generated addresses.
const ADDRESS_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a generated address.
pub const GENERATED_ADDRESS_LEN: usize = 10;

/// Longest address a caller may choose.
pub const MAX_ADDRESS_LEN: usize = 64;

/// Generate a fresh opaque address.
pub fn generate_address<R: Rng>(rng: &mut R) -> String {
    (0..GENERATED_ADDRESS_LEN)
        .map(|_| ADDRESS_ALPHABET[rng.gen_range(0..ADDRESS_ALPHABET.len())] as char)
        .collect()
}

/// Whether a caller-chosen address is usable as a URL path segment.
pub fn is_valid_address(address: &str) -> bool {
    !address.is_empty()
        && address.len() <= MAX_ADDRESS_LEN
        && address
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
