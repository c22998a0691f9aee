//! Import options.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Default cap on bytes read from the (decompressed) input: 500 MiB
pub const DEFAULT_MAX_UNCOMPRESSED_SIZE: u64 = 500 * 1024 * 1024;

/// Options of one import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// ISO code of the default currency of a newly created store
    #[serde(default = "default_usd")]
    pub base_currency: String,
    /// Maximum number of bytes read from the input after decompression
    #[serde(default = "default_max_size")]
    pub max_uncompressed_size: u64,
    #[serde(default = "default_true")]
    pub import_prices: bool,
    #[serde(default = "default_true")]
    pub import_transactions: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            base_currency: default_usd(),
            max_uncompressed_size: DEFAULT_MAX_UNCOMPRESSED_SIZE,
            import_prices: true,
            import_transactions: true,
        }
    }
}

fn default_usd() -> String {
    "USD".to_string()
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_UNCOMPRESSED_SIZE
}

fn default_true() -> bool {
    true
}

impl ImportOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let read_error = |message: String| ConfigError::Read {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| read_error(e.to_string()))?;
        let options: Self = serde_json::from_str(&text).map_err(|e| read_error(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let code = self.base_currency.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidBaseCurrency(self.base_currency.clone()));
        }
        if self.max_uncompressed_size == 0 {
            return Err(ConfigError::ZeroSizeLimit);
        }
        Ok(())
    }
}
