//! Bib number normalization.
//!
//! Maps raw recognizer text to a canonical bib number or rejects it.
//! Rejections are routine, high-frequency outcomes, not errors.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Bib numbers are 1-6 digit identifiers in this range.
pub const MIN_BIB_VALUE: u32 = 1;
pub const MAX_BIB_VALUE: u32 = 99_999;

/// Maximum digit count accepted from the recognizer before leading zeros
/// are stripped.
const MAX_BIB_DIGITS: usize = 6;

/// A canonical bib number: the unit of deduplication.
///
/// Stored as its numeric value; the canonical string form has no leading
/// zeros. Ordering is numeric, which keeps eviction tie-breaks reproducible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BibNumber(u32);

impl BibNumber {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BibNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize one recognition candidate into a bib number.
///
/// Policy, applied in order:
/// 1. Reject when confidence is below `min_confidence`.
/// 2. Strip non-alphanumeric characters.
/// 3. If the remainder is entirely numeric, use it as-is; otherwise
///    concatenate its digit runs. No digits at all is a rejection.
/// 4. Reject more than 6 digits, then parse: leading zeros disappear in the
///    numeric value ("007" reads as 7, all-zero strings read as 0).
/// 5. Reject values outside `[MIN_BIB_VALUE, MAX_BIB_VALUE]`.
///
/// Pure: the same input always yields the same decision.
pub fn normalize_bib(text: &str, confidence: f32, min_confidence: f32) -> Option<BibNumber> {
    if confidence < min_confidence {
        return None;
    }

    let cleaned: String = text.trim().chars().filter(|c| c.is_alphanumeric()).collect();
    if cleaned.is_empty() {
        return None;
    }

    let digits: String = if cleaned.chars().all(|c| c.is_ascii_digit()) {
        cleaned
    } else {
        // Compile once for hot paths.
        static DIGIT_RUNS: OnceLock<Regex> = OnceLock::new();
        let re = DIGIT_RUNS.get_or_init(|| Regex::new(r"[0-9]+").unwrap());
        re.find_iter(&cleaned).map(|m| m.as_str()).collect()
    };

    if digits.is_empty() || digits.len() > MAX_BIB_DIGITS {
        return None;
    }

    // 6 ASCII digits always fit in u32.
    let value: u32 = digits.parse().ok()?;
    if !(MIN_BIB_VALUE..=MAX_BIB_VALUE).contains(&value) {
        return None;
    }

    Some(BibNumber(value))
}
