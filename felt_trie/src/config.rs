use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::{
    bits::MAX_HEIGHT,
    error::{TrieError, TrieResult},
};

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Construction-time parameters of a [`BinaryTrie`](crate::trie::BinaryTrie).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TrieConfig {
    /// Number of key bits, i.e. the depth at which leaves live.
    pub height: usize,
    /// Maximum number of committed nodes kept decoded in memory.
    pub cache_capacity: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            height: MAX_HEIGHT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl TrieConfig {
    pub fn with_height(height: usize) -> Self {
        Self {
            height,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> TrieResult<NonZeroUsize> {
        if self.height == 0 || self.height > MAX_HEIGHT {
            return Err(TrieError::InvalidConfig(format!(
                "height {} is outside 1..={MAX_HEIGHT}",
                self.height
            )));
        }

        NonZeroUsize::new(self.cache_capacity)
            .ok_or_else(|| TrieError::InvalidConfig("cache capacity must be non-zero".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TrieConfig::default();

        assert_eq!(config.height, 251);
        assert_eq!(config.validate().unwrap().get(), DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn rejects_out_of_range_heights_and_empty_caches() {
        for config in [
            TrieConfig::with_height(0),
            TrieConfig::with_height(252),
            TrieConfig {
                cache_capacity: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(TrieError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: TrieConfig = serde_json::from_str(r#"{"height": 16}"#).unwrap();

        assert_eq!(config, TrieConfig::with_height(16));
    }
}
