//! Tunables for the exchange protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long `await_bundle_for_nick` waits when the caller does not say.
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(36);

/// Exchange protocol configuration.
///
/// # Example TOML
///
/// ```toml
/// [exchange]
/// await_timeout_secs = 36
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(
        rename = "await_timeout_secs",
        with = "duration_secs",
        default = "default_await_timeout"
    )]
    pub await_timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
        }
    }
}

fn default_await_timeout() -> Duration {
    DEFAULT_AWAIT_TIMEOUT
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
