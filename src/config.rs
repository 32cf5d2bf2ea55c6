//! Engine configuration model and defaults.

use std::time::Duration;

use crate::protocol::DomainMask;

fn default_types() -> DomainMask {
    DomainMask::PARSE
}

fn default_thumbnail_max_edge_px() -> u32 {
    320
}

/// Construction-time configuration of a [`crate::Preparser`].
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PreparserConfig {
    /// Work domains to instantiate executors for. Must be non-empty.
    #[serde(default = "default_types")]
    pub types: DomainMask,
    /// Thread count shared configuration of the parse/fetch-family
    /// executors; 0 means 1.
    #[serde(default)]
    pub max_parser_threads: u32,
    /// Thread count of the thumbnail executor; 0 means 1.
    #[serde(default)]
    pub max_thumbnailer_threads: u32,
    /// Engine-wide per-request deadline; `None` means no deadline.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Longest edge of produced thumbnails, in pixels.
    #[serde(default = "default_thumbnail_max_edge_px")]
    pub thumbnail_max_edge_px: u32,
}

impl Default for PreparserConfig {
    fn default() -> Self {
        Self {
            types: default_types(),
            max_parser_threads: 0,
            max_thumbnailer_threads: 0,
            timeout: None,
            thumbnail_max_edge_px: default_thumbnail_max_edge_px(),
        }
    }
}

impl PreparserConfig {
    /// Effective executor width for one domain family, substituting the
    /// documented default of one thread for 0.
    pub(crate) fn parser_threads(&self) -> usize {
        self.max_parser_threads.max(1) as usize
    }

    pub(crate) fn thumbnailer_threads(&self) -> usize {
        self.max_thumbnailer_threads.max(1) as usize
    }

    /// Engine-wide timeout normalized so that a zero duration means "no
    /// deadline", mirroring the 0-tick convention of the configuration.
    pub(crate) fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|timeout| !timeout.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_select_parse_with_single_threads() {
        let config = PreparserConfig::default();
        assert_eq!(config.types, DomainMask::PARSE);
        assert_eq!(config.parser_threads(), 1);
        assert_eq!(config.thumbnailer_threads(), 1);
        assert_eq!(config.effective_timeout(), None);
    }

    #[test]
    fn test_zero_thread_counts_fall_back_to_one() {
        let config = PreparserConfig {
            max_parser_threads: 0,
            max_thumbnailer_threads: 0,
            ..PreparserConfig::default()
        };
        assert_eq!(config.parser_threads(), 1);
        assert_eq!(config.thumbnailer_threads(), 1);

        let config = PreparserConfig {
            max_parser_threads: 4,
            max_thumbnailer_threads: 2,
            ..PreparserConfig::default()
        };
        assert_eq!(config.parser_threads(), 4);
        assert_eq!(config.thumbnailer_threads(), 2);
    }

    #[test]
    fn test_zero_timeout_means_no_deadline() {
        let config = PreparserConfig {
            timeout: Some(Duration::ZERO),
            ..PreparserConfig::default()
        };
        assert_eq!(config.effective_timeout(), None);

        let config = PreparserConfig {
            timeout: Some(Duration::from_millis(250)),
            ..PreparserConfig::default()
        };
        assert_eq!(config.effective_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_partial_document_deserializes_with_defaults() {
        let config: PreparserConfig =
            serde_json::from_str(r#"{ "max_parser_threads": 3 }"#)
                .expect("partial config should deserialize");
        assert_eq!(config.max_parser_threads, 3);
        assert_eq!(config.types, DomainMask::PARSE);
        assert_eq!(config.thumbnail_max_edge_px, 320);
    }
}
