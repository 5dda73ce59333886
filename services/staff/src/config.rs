use serde::Deserialize;

use marquee_core::config::Config;

/// Staff service configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct StaffConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Candidates tried before a PIN issuance gives up. Env var: `PIN_MAX_ATTEMPTS`.
    #[serde(default = "default_pin_max_attempts")]
    pub pin_max_attempts: u32,
    /// Reloads after a lost compare-and-swap. Env var: `CONFLICT_RETRIES`.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Config for StaffConfig {}

impl StaffConfig {
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            pin_max_attempts: self.pin_max_attempts,
            conflict_retries: self.conflict_retries,
            bcrypt_cost: self.bcrypt_cost,
        }
    }
}

/// The subset of configuration the stores need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub pin_max_attempts: u32,
    pub conflict_retries: u32,
    pub bcrypt_cost: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            pin_max_attempts: default_pin_max_attempts(),
            conflict_retries: default_conflict_retries(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_pin_max_attempts() -> u32 {
    100
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_bcrypt_cost() -> u32 {
    10
}
