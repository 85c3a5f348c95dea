//! Random identifier generation for `cid`, `callID`, and default `tabID`.
//!
//! Identifiers are base-62 alphanumeric strings of length 10. Randomness is
//! non-cryptographic: collisions are acceptable in theory but must not occur
//! in practice for the lifetime of a single process.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 10;

/// Generate a fresh random identifier suitable for a `cid`, `callID`, or `tabID`.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_expected_length_and_alphabet() {
        let id = generate();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generates_distinct_ids_in_practice() {
        let ids: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
