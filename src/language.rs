//! Document language routing.
//!
//! Language identification is comparatively expensive and documents are
//! almost always written in one language, so the router identifies the
//! language once, from the first page with a substantial amount of text, and
//! applies it to every page.

use crate::config::PipelineConfig;
use crate::document::Document;
use crate::error::{Error, Result};

/// Language identification capability.
pub trait LanguageIdentifier: Send + Sync {
    /// Identify the language of `text`, returning a tag such as `en` or `bg`.
    fn identify(&self, text: &str) -> Result<String>;
}

impl<F> LanguageIdentifier for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn identify(&self, text: &str) -> Result<String> {
        self(text)
    }
}

/// Outcome of routing a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedLanguage {
    /// Language used to configure the detectors (always supported)
    pub language: String,
    /// Tag reported by the identifier before normalization
    pub detected: Option<String>,
    /// Page the language was identified from
    pub sample_page: Option<u32>,
}

impl RoutedLanguage {
    /// Routing result for a document routed by policy rather than by sample.
    pub fn fallback(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            detected: None,
            sample_page: None,
        }
    }

    /// Whether the detected tag was replaced by the default language.
    pub fn is_fallback(&self) -> bool {
        self.detected.as_deref() != Some(self.language.as_str())
    }
}

/// Picks the document language and normalizes it to a supported one.
pub struct LanguageRouter {
    identifier: Box<dyn LanguageIdentifier>,
    supported_languages: Vec<String>,
    default_language: String,
    min_sample_chars: usize,
}

impl LanguageRouter {
    /// Create a router using the configuration's language settings.
    pub fn new(identifier: Box<dyn LanguageIdentifier>, config: &PipelineConfig) -> Self {
        Self {
            identifier,
            supported_languages: config.supported_languages.clone(),
            default_language: config.default_language.clone(),
            min_sample_chars: config.min_language_sample_chars,
        }
    }

    /// Default language documents fall back to.
    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Route `document` to a supported language.
    ///
    /// Pages are scanned in order; the first page whose trimmed text is longer
    /// than the sample threshold is identified. If identification fails on a
    /// page, the next qualifying page is tried.
    ///
    /// # Errors
    ///
    /// - [`Error::InsufficientText`] if no page qualifies
    /// - [`Error::LanguageIdentification`] if every qualifying page failed
    pub fn route(&self, document: &Document) -> Result<RoutedLanguage> {
        let mut last_error = None;

        for page in &document.pages {
            let sample = page.text.trim();
            if sample.chars().count() <= self.min_sample_chars {
                continue;
            }
            match self.identifier.identify(sample) {
                Ok(tag) => {
                    let language = self.normalize(&tag);
                    log::info!(
                        "Detected language '{}' from page {} of '{}' (routing as '{}')",
                        tag,
                        page.page_number,
                        document.source,
                        language
                    );
                    return Ok(RoutedLanguage {
                        language,
                        detected: Some(tag),
                        sample_page: Some(page.page_number),
                    });
                },
                Err(e) => {
                    log::warn!("Language identification failed on page {}: {}", page.page_number, e);
                    let reason = match e {
                        Error::LanguageIdentification { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    last_error = Some(Error::LanguageIdentification {
                        page: page.page_number,
                        reason,
                    });
                },
            }
        }

        Err(last_error.unwrap_or(Error::InsufficientText {
            min_chars: self.min_sample_chars,
        }))
    }

    /// Map an identifier tag to a supported language.
    ///
    /// Region subtags are dropped (`en-US` → `en`); unsupported languages map
    /// to the default language.
    pub fn normalize(&self, tag: &str) -> String {
        let primary = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if self.supported_languages.iter().any(|l| *l == primary) {
            primary
        } else {
            self.default_language.clone()
        }
    }
}

/// Script-based language identifier.
///
/// Classifies text by the Unicode blocks of its letters, sampling the first
/// 1000 characters. Latin text is reported as `en`; Cyrillic text is told
/// apart as Bulgarian or Russian by letters only one of the two alphabets
/// uses (`ы`, `э`, `ё` for Russian, frequent `ъ` for Bulgarian).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptLanguageIdentifier;

const SAMPLE_SIZE: usize = 1000;

#[derive(Debug, Default)]
struct ScriptCounts {
    latin: usize,
    cyrillic: usize,
    greek: usize,
    arabic: usize,
    hebrew: usize,
    han: usize,
    kana: usize,
    hangul: usize,
    russian_only: usize,
    hard_sign: usize,
}

impl ScriptCounts {
    fn sample(text: &str) -> Self {
        let mut counts = Self::default();
        for ch in text.chars().take(SAMPLE_SIZE) {
            let code = ch as u32;
            match code {
                0x0041..=0x005A | 0x0061..=0x007A | 0x00C0..=0x024F => counts.latin += 1,
                0x0370..=0x03FF => counts.greek += 1,
                0x0400..=0x04FF => {
                    counts.cyrillic += 1;
                    match ch {
                        'ы' | 'Ы' | 'э' | 'Э' | 'ё' | 'Ё' => counts.russian_only += 1,
                        'ъ' | 'Ъ' => counts.hard_sign += 1,
                        _ => {},
                    }
                },
                0x0590..=0x05FF => counts.hebrew += 1,
                0x0600..=0x06FF => counts.arabic += 1,
                0x3040..=0x30FF => counts.kana += 1,
                0x4E00..=0x9FFF => counts.han += 1,
                0xAC00..=0xD7AF => counts.hangul += 1,
                _ => {},
            }
        }
        counts
    }
}

impl LanguageIdentifier for ScriptLanguageIdentifier {
    fn identify(&self, text: &str) -> Result<String> {
        let c = ScriptCounts::sample(text);

        let candidates = [
            (c.latin, "en"),
            (c.cyrillic, "cyrillic"),
            (c.greek, "el"),
            (c.arabic, "ar"),
            (c.hebrew, "he"),
            (c.han + c.kana, if c.kana > 0 { "ja" } else { "zh" }),
            (c.hangul, "ko"),
        ];
        let (count, tag) = candidates
            .iter()
            .copied()
            .max_by_key(|(count, _)| *count)
            .unwrap_or((0, "en"));

        if count == 0 {
            return Err(Error::LanguageIdentification {
                page: 0,
                reason: "no letters in sample".to_string(),
            });
        }

        let tag = if tag == "cyrillic" {
            if c.hard_sign > c.russian_only {
                "bg"
            } else {
                "ru"
            }
        } else {
            tag
        };
        Ok(tag.to_string())
    }
}
