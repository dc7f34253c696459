//! SIRET checksum validation and Hamming-distance-1 correction candidates.
//!
//! A SIRET is a 14-digit establishment identifier whose digits satisfy the
//! Luhn weighted-mod-10 rule. The one documented exception is La Poste:
//! identifiers under SIREN 356000000 are valid when their plain digit sum is
//! a multiple of 5, even if the Luhn check fails.

/// Number of digits in a SIRET.
pub const SIRET_LEN: usize = 14;

/// Upper bound on distance-1 Luhn-valid candidates (9 alternatives × 14 positions).
pub const MAX_CANDIDATES: usize = 9 * SIRET_LEN;

const LA_POSTE_PREFIX: &str = "35600";

/// Checks whether a digit string satisfies the Luhn mod-10 rule.
///
/// Doubles every second digit from the right (excluding the check digit),
/// reduces digits above 9 by 9, and requires the total to be 0 mod 10.
/// Non-digit input and the empty string are invalid.
#[must_use]
pub fn is_valid_luhn(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let mut sum = 0u32;
    for (i, b) in number.bytes().rev().enumerate() {
        let mut d = u32::from(b - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

/// Checks whether a string is a valid SIRET: 14 digits passing the Luhn
/// rule, or the La Poste digit-sum exception.
#[must_use]
pub fn is_valid_siret(siret: &str) -> bool {
    if siret.len() != SIRET_LEN || !siret.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    if is_valid_luhn(siret) {
        return true;
    }

    // La Poste (SIREN 356000000): sum of all digits must be a multiple of 5.
    if siret.starts_with(LA_POSTE_PREFIX) {
        let digit_sum: u32 = siret.bytes().map(|b| u32::from(b - b'0')).sum();
        return digit_sum % 5 == 0;
    }

    false
}

/// Hamming distance between two equal-length strings.
///
/// Returns `None` when the lengths differ.
#[must_use]
pub fn hamming_distance(a: &str, b: &str) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count())
}

/// Generates every 14-digit string at Hamming distance exactly 1 from
/// `siret` that passes the Luhn check.
///
/// The Luhn filter bounds the output to at most [`MAX_CANDIDATES`] (126)
/// strings instead of the ~10k within edit distance 1. Returns an empty
/// vector for inputs that are not 14 digits.
#[must_use]
pub fn luhn_valid_candidates(siret: &str) -> Vec<String> {
    if siret.len() != SIRET_LEN || !siret.bytes().all(|b| b.is_ascii_digit()) {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    let mut digits = siret.as_bytes().to_vec();

    for pos in 0..SIRET_LEN {
        let original = digits[pos];
        for digit in b'0'..=b'9' {
            if digit == original {
                continue;
            }
            digits[pos] = digit;
            // Safety: digits contains only ASCII.
            let candidate = std::str::from_utf8(&digits).expect("ascii digits");
            if is_valid_luhn(candidate) {
                candidates.push(candidate.to_string());
            }
        }
        digits[pos] = original;
    }

    candidates
}
