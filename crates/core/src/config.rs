//! Engine tunables, read from `CRUDKIT_*` environment variables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `Input` fields allowing more characters than this render as a text area.
    pub long_input_threshold: usize,
    /// Debounce applied by select widgets before firing a remote search.
    pub search_debounce_ms: u64,
    /// Page size used when loading association options.
    pub options_page_size: usize,
    pub textarea_rows: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { long_input_threshold: 200, search_debounce_ms: 500, options_page_size: 100, textarea_rows: 4 }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let long_input_threshold = std::env::var("CRUDKIT_LONG_INPUT_THRESHOLD").ok().and_then(|s| s.parse().ok()).unwrap_or(d.long_input_threshold);
        let search_debounce_ms = std::env::var("CRUDKIT_SEARCH_DEBOUNCE_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(d.search_debounce_ms);
        let options_page_size = std::env::var("CRUDKIT_OPTIONS_PAGE_SIZE").ok().and_then(|s| s.parse::<usize>().ok()).map(|n| n.max(1)).unwrap_or(d.options_page_size);
        let textarea_rows = std::env::var("CRUDKIT_TEXTAREA_ROWS").ok().and_then(|s| s.parse().ok()).unwrap_or(d.textarea_rows);
        Self { long_input_threshold, search_debounce_ms, options_page_size, textarea_rows }
    }
}
