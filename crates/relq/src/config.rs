use relq_storage::pager::DEFAULT_POOL_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest join buffer budget: a block nested loop join needs one page for
/// the outer block, one for the inner page, and one for output.
pub const MIN_BUFFER_PAGES: usize = 3;

pub const DEFAULT_BUFFER_PAGES: usize = 5;

/// Engine settings shared by every transaction of a [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pages of memory `B` available to one join operator.
    pub buffer_pages: usize,
    /// Pager frames kept per table file.
    pub pool_pages: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pages: DEFAULT_BUFFER_PAGES,
            pool_pages: DEFAULT_POOL_SIZE,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_pages < MIN_BUFFER_PAGES {
            return Err(Error::Config(format!(
                "buffer_pages must be at least {MIN_BUFFER_PAGES}, got {}",
                self.buffer_pages
            )));
        }
        if self.pool_pages == 0 {
            return Err(Error::Config("pool_pages must be positive".to_string()));
        }
        Ok(())
    }
}
