// File: src/config.rs
// Purpose: Runtime options shared by the RPC endpoint and server render

use serde::{Deserialize, Serialize};

use crate::cookie::CookieDefaults;

/// Set by the build's server supervisor to `true` or `false`
pub const PRODUCTION_ENV: &str = "TESSERA_PRODUCTION";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Hide unexpected error messages from clients
    #[serde(default)]
    pub production: bool,

    #[serde(default)]
    pub cookies: CookieDefaults,
}

impl RuntimeOptions {
    /// Options for a process started by the build's server supervisor
    pub fn from_env() -> Self {
        let production = std::env::var(PRODUCTION_ENV)
            .map(|value| parse_flag(&value))
            .unwrap_or(false);
        Self {
            production,
            ..Self::default()
        }
    }

    pub fn with_cookies(mut self, cookies: CookieDefaults) -> Self {
        self.cookies = cookies;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
