//! Plate grammar validation
//!
//! Raw OCR text becomes a [`PlateNumber`] only by passing the national
//! plate grammar. Nothing else in the crate constructs one, so a value of
//! this type is always a confirmed, canonicalized detection; failed reads
//! stay failed instead of being patched into something plausible.

use serde::Serialize;
use std::fmt;

/// Canonical grammar: region prefix length, plate-body digit range and
/// year-suffix length, rendered as `AA-1234-56`.
const PREFIX_LETTERS: usize = 2;
const BODY_DIGITS_MIN: usize = 3;
const BODY_DIGITS_MAX: usize = 4;
const YEAR_DIGITS: usize = 2;

/// A grammar-validated, canonicalized plate identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PlateNumber(String);

impl PlateNumber {
    /// Validate raw text against the plate grammar.
    ///
    /// Separators and case are ignored on input: `"GR1234 20"`,
    /// `"gr-1234-20"` and `"GR 1234-20"` all canonicalize to
    /// `GR-1234-20`. Text that matches no grammar yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let letters: String = cleaned.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        let rest = &cleaned[letters.len()..];

        if letters.len() != PREFIX_LETTERS {
            return None;
        }
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let digits = rest.len();
        if !(BODY_DIGITS_MIN + YEAR_DIGITS..=BODY_DIGITS_MAX + YEAR_DIGITS).contains(&digits) {
            return None;
        }

        let (body, year) = rest.split_at(digits - YEAR_DIGITS);
        Some(Self(format!("{letters}-{body}-{year}")))
    }

    /// The canonical plate string, e.g. `GR-1234-20`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlateNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_separated_plate_canonicalizes() {
        let plate = PlateNumber::parse("GR1234 20").unwrap();
        assert_eq!(plate.as_str(), "GR-1234-20");
    }

    #[test]
    fn test_nonsense_text_is_rejected() {
        assert!(PlateNumber::parse("XYZZY").is_none());
    }

    #[test]
    fn test_three_digit_body() {
        let plate = PlateNumber::parse("AS 123 21").unwrap();
        assert_eq!(plate.as_str(), "AS-123-21");
    }

    #[test]
    fn test_lowercase_and_hyphens() {
        let plate = PlateNumber::parse("gr-1234-20").unwrap();
        assert_eq!(plate.as_str(), "GR-1234-20");
    }

    #[test]
    fn test_rejects_wrong_shapes() {
        // Too few / too many digits
        assert!(PlateNumber::parse("GR123").is_none());
        assert!(PlateNumber::parse("GR1234567").is_none());
        // Wrong prefix length
        assert!(PlateNumber::parse("G123420").is_none());
        assert!(PlateNumber::parse("GRA123420").is_none());
        // Digits before letters
        assert!(PlateNumber::parse("1234GR20").is_none());
        // Letters trailing the digits
        assert!(PlateNumber::parse("GR1234X0").is_none());
        // Nothing at all
        assert!(PlateNumber::parse("").is_none());
        assert!(PlateNumber::parse("--- ---").is_none());
    }

    #[test]
    fn test_display_matches_canonical_form() {
        let plate = PlateNumber::parse("GR123420").unwrap();
        assert_eq!(plate.to_string(), "GR-1234-20");
    }
}
