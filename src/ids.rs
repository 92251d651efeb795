//! Generated artifact identifiers.
//!
//! Content without a natural identifier (a pin video, an upscaled image)
//! gets a random 64-bit hex name; gallery codes and chapter ids are used
//! verbatim where they exist.

use rand::Rng;

/// Returns a random 16-character hex identifier.
#[must_use]
pub fn generate_hex_id() -> String {
    let mut rng = rand::thread_rng();
    let id: u64 = rng.r#gen();
    format!("{id:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_hex_id_fixed_width_and_unique() {
        let a = generate_hex_id();
        let b = generate_hex_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
