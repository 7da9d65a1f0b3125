use std::fmt;
use std::num::ParseIntError;
use thiserror::Error;

/// Non-success results returned by a downstream sink push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// Downstream does not want any more data
    Eos,
    /// Nothing is linked downstream
    NotLinked,
    /// Downstream failed to handle the data
    Error,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowError::Eos => "eos",
            FlowError::NotLinked => "not-linked",
            FlowError::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AsfError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("flow error: {0}")]
    Flow(FlowError),

    #[error("seek error: {0}")]
    Seek(String),

    #[error("buffer without timestamp on stream {0}")]
    MissingTimestamp(u8),

    #[error("invalid state: {0}")]
    State(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl From<FlowError> for AsfError {
    fn from(flow: FlowError) -> Self {
        AsfError::Flow(flow)
    }
}

impl AsfError {
    /// Returns true when this error means downstream reached end of stream.
    pub fn is_eos(&self) -> bool {
        matches!(self, AsfError::Flow(FlowError::Eos))
    }
}

pub type Result<T> = std::result::Result<T, AsfError>;
