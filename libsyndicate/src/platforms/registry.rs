//! Strategy registry
//!
//! Maps a platform id to its strategy. The orchestrator prechecks the
//! registry against the pass's target platforms before publishing
//! anything, so a missing registration aborts a pass cleanly instead of
//! failing mid-item.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PlatformsConfig;
use crate::error::{ConfigError, Result};
use crate::types::PlatformId;

use super::{InstagramStrategy, MastodonStrategy, Strategy, ThreadsStrategy};

#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<PlatformId, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the enabled platform sections.
    pub fn from_config(config: &PlatformsConfig) -> Result<Self> {
        let mut registry = Self::new();
        if let Some(threads) = &config.threads {
            if threads.enabled {
                registry.register(Arc::new(ThreadsStrategy::new(threads.base_url.clone())))?;
            }
        }
        if let Some(instagram) = &config.instagram {
            if instagram.enabled {
                registry.register(Arc::new(InstagramStrategy::new(
                    instagram.base_url.clone(),
                )))?;
            }
        }
        if let Some(mastodon) = &config.mastodon {
            if mastodon.enabled {
                registry.register(Arc::new(MastodonStrategy::new(mastodon.instance.clone())))?;
            }
        }
        Ok(registry)
    }

    /// Register a strategy. A second registration for the same platform
    /// is a configuration bug, not a silent override.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<()> {
        let platform = strategy.platform();
        if self.strategies.contains_key(&platform) {
            return Err(ConfigError::DuplicateStrategy(platform).into());
        }
        self.strategies.insert(platform, strategy);
        Ok(())
    }

    pub fn get(&self, platform: PlatformId) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(&platform)
            .cloned()
            .ok_or_else(|| ConfigError::PlatformNotRegistered(platform).into())
    }

    pub fn contains(&self, platform: PlatformId) -> bool {
        self.strategies.contains_key(&platform)
    }

    pub fn platforms(&self) -> Vec<PlatformId> {
        let mut platforms: Vec<_> = self.strategies.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}
