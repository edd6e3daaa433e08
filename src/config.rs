use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::ConfigError;
use crate::pool::MAX_SLOTS;

/// Configuration for a [`Pool`](crate::Pool), validated at construction time.
///
/// Loading this from a file or the environment is out of scope; callers
/// build it programmatically.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub endpoints: Vec<Endpoint>,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub initial_size: usize,
    pub max_size: usize,
    pub retry_delay: Duration,
    pub password: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            endpoints: Vec::new(),
            connect_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_secs(1),
            initial_size: 1,
            max_size: 1,
            retry_delay: Duration::from_secs(1),
            password: String::new(),
        }
    }
}

impl PoolConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        for endpoint in &self.endpoints {
            if endpoint.host.is_empty() || endpoint.host.len() > 255 {
                return Err(ConfigError::HostLength(endpoint.host.len()));
            }
            if endpoint.port == 0 {
                return Err(ConfigError::InvalidPort);
            }
        }
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.max_size > MAX_SLOTS {
            return Err(ConfigError::MaxSizeTooLarge {
                got: self.max_size,
                limit: MAX_SLOTS,
            });
        }
        if self.initial_size > self.max_size {
            return Err(ConfigError::InitialExceedsMax {
                initial_size: self.initial_size,
                max_size: self.max_size,
            });
        }
        Ok(())
    }
}
