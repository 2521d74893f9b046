//! Cleaning model payloads into executable source.
//!
//! What counts as "extractable code" varies by model and delimiter
//! convention, so it is a contract rather than a fixed format: the generator
//! adapter owns a boxed [`CodeExtractor`] and can be handed a different one.

use std::sync::LazyLock;

use regex::Regex;

/// Matches an opening fence with an optional language tag, or a bare closing
/// fence.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+-]*\r?\n?").expect("fence regex should be valid"));

/// Why a payload yielded no code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Nothing remained after cleaning.
    NoCode,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NoCode => f.write_str("payload contained no extractable code"),
        }
    }
}

/// Contract for turning a raw model payload field into clean source text.
///
/// Implementations must be deterministic.
pub trait CodeExtractor: Send + Sync {
    /// Clean a payload field (fences, stray whitespace). May return empty,
    /// e.g. for a script with no imports.
    fn clean(&self, raw: &str) -> String;

    /// Clean a required code field. Empty cleaned output is not extractable.
    fn extract(&self, raw: &str) -> Result<String, ExtractError> {
        let cleaned = self.clean(raw);
        if cleaned.is_empty() {
            Err(ExtractError::NoCode)
        } else {
            Ok(cleaned)
        }
    }
}

/// Default convention: strip Markdown code fences and surrounding whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct FencedBlockExtractor;

impl CodeExtractor for FencedBlockExtractor {
    fn clean(&self, raw: &str) -> String {
        FENCE_RE.replace_all(raw, "").trim().to_string()
    }
}
