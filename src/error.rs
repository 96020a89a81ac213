use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Fine bar whose open time is not strictly after the last accepted one
    #[error("out-of-order bar: open time {received} is not after {previous}")]
    OutOfOrderInput { previous: i64, received: i64 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
