//! Barcode symbologies and the acceptance policy shared by every channel.
//!
//! - **EAN-13**: 13 digits, weighted mod-10 check digit enforced
//! - **EAN-8**: 8 digits, check digit only when the deployment opts in
//! - **UPC-A**: 12 digits, accepted on length alone
//!
//! UPC-A is weaker than EAN-13 here: a 12-digit burst with a wrong check
//! digit is still accepted. `upc_a_checksum_matches` is there for audits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest and longest digit runs treated as a plausible raw barcode.
pub const MIN_PLAUSIBLE_LEN: usize = 8;
pub const MAX_PLAUSIBLE_LEN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Ean13,
    Ean8,
    UpcA,
}

impl Symbology {
    pub fn from_length(len: usize) -> Option<Self> {
        match len {
            13 => Some(Symbology::Ean13),
            8 => Some(Symbology::Ean8),
            12 => Some(Symbology::UpcA),
            _ => None,
        }
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Symbology::Ean13 => "EAN-13",
            Symbology::Ean8 => "EAN-8",
            Symbology::UpcA => "UPC-A",
        })
    }
}

/// Acceptance switches that vary per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub verify_ean8_checksum: bool,
}

// ---------------------------------------------------------------------------
// Digit helpers
// ---------------------------------------------------------------------------

pub fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// 8 to 13 ASCII digits, nothing else. Paste, hidden-input and ambient
/// channels use this to decide whether a whole string is worth evaluating.
pub fn is_plausible_barcode(s: &str) -> bool {
    (MIN_PLAUSIBLE_LEN..=MAX_PLAUSIBLE_LEN).contains(&s.len()) && is_all_digits(s)
}

fn digits(s: &str) -> Option<Vec<u8>> {
    if !is_all_digits(s) {
        return None;
    }
    Some(s.bytes().map(|b| b - b'0').collect())
}

/// Weighted mod-10 check digit over `data`.
///
/// Weights alternate 3,1,3,... starting from the rightmost data digit. For the
/// 12 data digits of an EAN-13 this is the same as weighting 1-indexed odd
/// positions ×1 and even positions ×3 from the left.
pub fn check_digit(data: &[u8]) -> u8 {
    let sum: u32 = data
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| u32::from(d) * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

/// Check digit for a string of data digits. `None` if any char isn't a digit.
pub fn check_digit_str(data: &str) -> Option<char> {
    let d = digits(data)?;
    Some(char::from(b'0' + check_digit(&d)))
}

fn trailing_check_matches(code: &str) -> bool {
    match digits(code) {
        Some(d) if d.len() >= 2 => {
            let (data, check) = d.split_at(d.len() - 1);
            check_digit(data) == check[0]
        }
        _ => false,
    }
}

pub fn ean13_checksum_matches(code: &str) -> bool {
    code.len() == 13 && trailing_check_matches(code)
}

pub fn ean8_checksum_matches(code: &str) -> bool {
    code.len() == 8 && trailing_check_matches(code)
}

/// UPC-A check digit test. Not used for acceptance; available for audits.
pub fn upc_a_checksum_matches(code: &str) -> bool {
    code.len() == 12 && trailing_check_matches(code)
}

// ---------------------------------------------------------------------------
// Acceptance
// ---------------------------------------------------------------------------

/// Decide whether a finalized candidate is a barcode.
///
/// Returns the symbology on acceptance; `None` means noise. An invalid
/// checksum is noise too, never an error.
pub fn classify(candidate: &str, policy: ValidationPolicy) -> Option<Symbology> {
    if !is_all_digits(candidate) {
        return None;
    }
    match Symbology::from_length(candidate.len())? {
        Symbology::Ean13 => ean13_checksum_matches(candidate).then_some(Symbology::Ean13),
        Symbology::Ean8 => {
            if policy.verify_ean8_checksum && !ean8_checksum_matches(candidate) {
                None
            } else {
                Some(Symbology::Ean8)
            }
        }
        Symbology::UpcA => Some(Symbology::UpcA),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const STRICT: ValidationPolicy = ValidationPolicy {
        verify_ean8_checksum: true,
    };

    #[test]
    fn test_check_digit_known_ean13() {
        // 4006381333931 is a widely printed EAN-13.
        assert_eq!(check_digit_str("400638133393"), Some('1'));
        assert!(ean13_checksum_matches("4006381333931"));
        assert!(!ean13_checksum_matches("4006381333932"));
    }

    #[test]
    fn test_check_digit_matches_left_indexed_weights() {
        let data = "200123456789";
        let left_weighted: u32 = data
            .bytes()
            .enumerate()
            .map(|(i, b)| u32::from(b - b'0') * if (i + 1) % 2 == 0 { 3 } else { 1 })
            .sum();
        let expected = char::from(b'0' + ((10 - left_weighted % 10) % 10) as u8);
        assert_eq!(check_digit_str(data), Some(expected));
    }

    #[test]
    fn test_check_digit_known_ean8_and_upca() {
        assert!(ean8_checksum_matches("96385074"));
        assert!(!ean8_checksum_matches("96385075"));
        assert!(upc_a_checksum_matches("036000291452"));
    }

    #[test]
    fn test_plausible_pattern() {
        assert!(is_plausible_barcode("12345678"));
        assert!(is_plausible_barcode("1234567890123"));
        assert!(!is_plausible_barcode("1234567"));
        assert!(!is_plausible_barcode("12345678901234"));
        assert!(!is_plausible_barcode("1234-5678"));
        assert!(!is_plausible_barcode(""));
    }

    #[test]
    fn test_classify_ean13_requires_checksum() {
        let policy = ValidationPolicy::default();
        assert_eq!(classify("4006381333931", policy), Some(Symbology::Ean13));
        assert_eq!(classify("4006381333930", policy), None);
    }

    #[test]
    fn test_classify_ean8_checksum_is_opt_in() {
        assert_eq!(
            classify("96385075", ValidationPolicy::default()),
            Some(Symbology::Ean8)
        );
        assert_eq!(classify("96385075", STRICT), None);
        assert_eq!(classify("96385074", STRICT), Some(Symbology::Ean8));
    }

    #[test]
    fn test_classify_upca_unchecked() {
        assert_eq!(classify("036000291459", STRICT), Some(Symbology::UpcA));
    }

    #[test]
    fn test_classify_rejects_noise() {
        let policy = ValidationPolicy::default();
        assert_eq!(classify("1234567", policy), None);
        assert_eq!(classify("1234567890", policy), None);
        assert_eq!(classify("40063813339a1", policy), None);
        assert_eq!(classify("", policy), None);
    }
}
