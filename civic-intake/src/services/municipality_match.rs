//! Municipality name comparison for the wrong-municipality gate
//!
//! A flyer that names no municipality is ambiguous, not wrong; only an
//! explicit, different name is a mismatch. Real communes often differ by a
//! single letter (Saint-Denis, Saint-Genis), so there is no edit-distance
//! tolerance. The only noise forgiven is OCR reading a letter as a look-alike
//! digit.

use crate::text::normalize_place_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MunicipalityMatch {
    Match,
    Mismatch,
    /// Flyer does not name a municipality
    Unnamed,
}

/// Compare the target municipality with the name read off the flyer
pub fn compare(target_name: &str, mentioned: Option<&str>) -> MunicipalityMatch {
    let Some(mentioned) = mentioned else {
        return MunicipalityMatch::Unnamed;
    };

    let mentioned = normalize_place_name(&fold_ocr_glyphs(mentioned));
    if mentioned.is_empty() {
        return MunicipalityMatch::Unnamed;
    }
    let target = normalize_place_name(&fold_ocr_glyphs(target_name));

    if mentioned == target || contains_words(&mentioned, &target) {
        return MunicipalityMatch::Match;
    }

    MunicipalityMatch::Mismatch
}

/// Map glyphs OCR confuses with letters back to the letter
///
/// Only applied inside words that also contain letters, so a bare number
/// such as a postcode stays as written while "0rleans" becomes "orleans".
fn fold_ocr_glyphs(name: &str) -> String {
    name.split(' ')
        .map(|word| {
            if !word.chars().any(|c| c.is_alphabetic()) {
                return word.to_string();
            }
            word.chars()
                .map(|c| match c {
                    '0' => 'o',
                    '1' => 'l',
                    '5' => 's',
                    other => other,
                })
                .collect()
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// `needle` occurs in `haystack` as a run of whole words
fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let hay: Vec<&str> = haystack.split(' ').collect();
    let pin: Vec<&str> = needle.split(' ').collect();
    hay.windows(pin.len()).any(|window| window == pin.as_slice())
}
