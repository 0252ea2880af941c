use rdkafka::error::KafkaError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced while parsing an offset specification.
///
/// Each variant carries the offending substring so the message can be echoed
/// back to the operator verbatim.
pub enum ParseError {
    #[error("invalid position {0:?}")]
    InvalidPosition(String),
    #[error("invalid interval {0:?}")]
    InvalidInterval(String),
    #[error("invalid anchor position {0:?}")]
    InvalidAnchor(String),
    #[error("invalid relative position {0:?}")]
    InvalidRelativePosition(String),
    #[error("no closing ] found in {0:?}")]
    UnterminatedTimestamp(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid partition number {0:?}")]
    InvalidPartition(String),
    #[error("partition number {0:?} is too large")]
    PartitionTooLarge(String),
    #[error("anchor offset {0:?} is too large")]
    AnchorTooLarge(String),
    #[error("offset {0:?} is too large")]
    DeltaTooLarge(String),
    #[error("unsupported encoding {0:?}, only string, hex and base64 are supported")]
    InvalidEncoding(String),
}

#[derive(Error, Debug)]
/// Errors that may occur while talking to the broker.
pub enum SessionError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("partition reader closed unexpectedly")]
    ReaderClosed,
    #[error("Runtime error: {0}")]
    Runtime(Box<dyn std::error::Error + Send + Sync>),
}

/// Function to construct a [`SessionError::Runtime`] error variant.
pub fn runtime_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> SessionError {
    SessionError::Runtime(Box::new(e))
}

#[derive(Error, Debug)]
/// Errors raised when resolving positions or running the consumption engine.
pub enum ConsumeError {
    #[error("time-based positions not yet supported")]
    TimeResolutionUnsupported,
    #[error("cannot resume without a consumer group")]
    ResumeWithoutGroup,
    #[error("found no partitions to consume for topic {topic}")]
    NoPartitionsMatched { topic: String },
    #[error(transparent)]
    Session(#[from] SessionError),
}
