//! Accelerator cache configuration.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_META_LIMIT: usize = 1000;
const DEFAULT_RAW_LIMIT: usize = 200;
const DEFAULT_RENDERED_LIMIT: usize = 200;
const DEFAULT_MAX_RAW_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Use the in-memory accelerator; when off every lookup misses.
    pub enabled: bool,
    /// Maximum metadata records kept.
    pub meta_limit: usize,
    /// Maximum raw payloads kept.
    pub raw_limit: usize,
    /// Maximum rendered documents kept.
    pub rendered_limit: usize,
    /// Raw payloads larger than this are never cached.
    pub max_raw_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            meta_limit: DEFAULT_META_LIMIT,
            raw_limit: DEFAULT_RAW_LIMIT,
            rendered_limit: DEFAULT_RENDERED_LIMIT,
            max_raw_bytes: DEFAULT_MAX_RAW_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            meta_limit: settings.meta_limit,
            raw_limit: settings.raw_limit,
            rendered_limit: settings.rendered_limit,
            max_raw_bytes: settings.max_raw_bytes,
        }
    }
}

impl CacheConfig {
    /// Returns the meta limit as NonZeroUsize, clamping to 1 if zero.
    pub fn meta_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.meta_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the raw limit as NonZeroUsize, clamping to 1 if zero.
    pub fn raw_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.raw_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the rendered limit as NonZeroUsize, clamping to 1 if zero.
    pub fn rendered_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.rendered_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.meta_limit, 1000);
        assert_eq!(config.raw_limit, 200);
        assert_eq!(config.rendered_limit, 200);
        assert_eq!(config.max_raw_bytes, 512 * 1024);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            meta_limit: 0,
            raw_limit: 0,
            rendered_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.meta_limit_non_zero().get(), 1);
        assert_eq!(config.raw_limit_non_zero().get(), 1);
        assert_eq!(config.rendered_limit_non_zero().get(), 1);
    }
}
