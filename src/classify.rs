//! Decides whether a piece of prompt text needs translating, and from/to
//! which language.
//!
//! Cheap structural rules run first (length, placeholders, type names),
//! then a Han-character fast path, and only then a full language detector.
//! A detector failure never propagates: the heuristic answer stands.
//! Direction detection asks the detector first, so kana text reads as
//! Japanese, and falls back to the Han heuristic.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::Result;

static BRACKET_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[.*\]\s*$").expect("bracket placeholder pattern"));
static TAG_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<.*>$").expect("tag placeholder pattern"));
static TYPE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("type name pattern"));

const MIN_CHARS: usize = 3;
const TYPE_NAME_MAX_CHARS: usize = 30;
const HAN_RATIO_THRESHOLD: f64 = 0.01;

/// Source language detection backend.
#[cfg_attr(test, mockall::automock)]
pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 code of the dominant language, `None` when unsure.
    fn detect(&self, text: &str) -> Result<Option<String>>;
}

/// Offline detector backed by whatlang.
///
/// whatlang flags most prompt-length text as unreliable, so its best guess
/// is used unless the confidence is close to zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhatlangDetector;

const MIN_DETECTOR_CONFIDENCE: f64 = 0.05;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Result<Option<String>> {
        let Some(info) = whatlang::detect(text) else {
            return Ok(None);
        };
        if info.confidence() < MIN_DETECTOR_CONFIDENCE {
            debug!(lang = info.lang().code(), confidence = info.confidence(), "ignoring guess");
            return Ok(None);
        }
        Ok(Some(lang_to_code(info.lang())))
    }
}

fn lang_to_code(lang: whatlang::Lang) -> String {
    use whatlang::Lang::*;
    match lang {
        Eng => "en",
        Cmn => "zh",
        Jpn => "ja",
        Kor => "ko",
        Fra => "fr",
        Deu => "de",
        Spa => "es",
        Rus => "ru",
        Por => "pt",
        Ita => "it",
        Ara => "ar",
        Hin => "hi",
        Tur => "tr",
        Vie => "vi",
        Tha => "th",
        Nld => "nl",
        Pol => "pl",
        Ukr => "uk",
        other => return other.code().to_string(),
    }
    .to_string()
}

/// Translation direction for one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Direction {
    pub from: String,
    pub to: String,
}

pub struct LanguageClassifier {
    detector: Arc<dyn LanguageDetector>,
    target_language: String,
}

impl LanguageClassifier {
    pub fn new(detector: Arc<dyn LanguageDetector>, target_language: impl Into<String>) -> Self {
        Self {
            detector,
            target_language: target_language.into(),
        }
    }

    /// Whatlang detection towards `target_language`.
    pub fn with_whatlang(target_language: impl Into<String>) -> Self {
        Self::new(Arc::new(WhatlangDetector), target_language)
    }

    pub fn needs_translation(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_CHARS {
            return false;
        }
        if BRACKET_PLACEHOLDER.is_match(text) || TAG_PLACEHOLDER.is_match(text) {
            return false;
        }
        if !text.chars().any(char::is_alphabetic) {
            return false;
        }
        if is_type_name(trimmed) {
            return false;
        }

        if han_ratio(text) > HAN_RATIO_THRESHOLD {
            return self.target_language != "zh";
        }

        // Past the Han fast path the heuristic answer is "no".
        match self.detector.detect(text) {
            Ok(Some(lang)) => lang != self.target_language,
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "language detection failed, using heuristic");
                false
            }
        }
    }

    pub fn detect(&self, text: &str) -> Direction {
        let from = match self.detector.detect(text) {
            Ok(Some(code)) if code.len() == 2 => code,
            _ if han_ratio(text) > HAN_RATIO_THRESHOLD => "zh".to_string(),
            _ => "auto".to_string(),
        };
        Direction {
            from,
            to: self.target_language.clone(),
        }
    }
}

/// Upper-case identifiers such as `IMAGE` or `CLIP_VISION` name socket types.
fn is_type_name(trimmed: &str) -> bool {
    trimmed.chars().count() < TYPE_NAME_MAX_CHARS && TYPE_NAME.is_match(trimmed)
}

/// Share of CJK ideographs among all characters of `text`.
pub fn han_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut han = 0usize;
    for c in text.chars() {
        total += 1;
        if is_han(c) {
            han += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    han as f64 / total as f64
}

fn is_han(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2EBEF)
}
