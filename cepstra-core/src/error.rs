use thiserror::Error;

/// All errors produced by cepstra-core.
#[derive(Debug, Error)]
pub enum CepstraError {
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("invalid value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("missing configuration key: {0}")]
    MissingConfigKey(String),

    #[error("duplicate configuration key: {0}")]
    DuplicateConfigKey(String),

    #[error("configuration source has no entries")]
    EmptyConfig,

    #[error("frame length mismatch: expected {expected} samples, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("channel is poisoned by an earlier fault; reset it before feeding frames")]
    ChannelPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CepstraError {
    pub(crate) fn invalid(key: &str, value: impl ToString) -> Self {
        CepstraError::InvalidConfig {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CepstraError>;
