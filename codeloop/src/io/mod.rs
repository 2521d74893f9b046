//! Side-effecting adapters: model service, sandbox backends, configuration.
//!
//! Everything here is behind a trait or a config value so tests can substitute
//! deterministic fakes.

pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod sandbox;

/// Bounded excerpt of a response body for error messages.
pub(crate) fn snippet(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut end = limit;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &trimmed[..end], trimmed.len())
}
