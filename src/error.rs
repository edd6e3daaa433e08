/// Rejects a [`PoolConfig`](crate::PoolConfig) at construction time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pool must have at least one endpoint")]
    NoEndpoints,
    #[error("endpoint host must be 1..=255 bytes, got {0}")]
    HostLength(usize),
    #[error("endpoint port must be nonzero")]
    InvalidPort,
    #[error("initial_size ({initial_size}) must be <= max_size ({max_size})")]
    InitialExceedsMax { initial_size: usize, max_size: usize },
    #[error("max_size ({got}) must be <= {limit}")]
    MaxSizeTooLarge { got: usize, limit: usize },
    #[error("max_size must be nonzero")]
    ZeroMaxSize,
}
