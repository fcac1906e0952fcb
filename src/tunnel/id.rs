//! Short identifiers for tunnel endpoints and correlation IDs.
//!
//! IDs are drawn from `[a-z0-9]` so they can be used verbatim as a URL path
//! segment or a DNS label.

use rand::Rng;

/// Characters an identifier may contain.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Identifier length. 36^10 values, so collisions among live endpoints or
/// in-flight requests are practically impossible.
pub const ID_LEN: usize = 10;

/// Generate a fresh identifier.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

/// Whether `s` could have been produced by [`generate`].
pub fn is_valid(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| ALPHABET.contains(&b))
}
