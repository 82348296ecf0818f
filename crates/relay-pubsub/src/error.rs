use thiserror::Error;

/// Result type for pub-sub operations
pub type Result<T> = std::result::Result<T, PubSubError>;

/// Result type for raw broker client calls
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Canonical status codes reported by the broker.
///
/// Numbering follows the gRPC status codes used by Cloud Pub/Sub, so
/// `AlreadyExists` is code 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Map a numeric gRPC code, unknown values collapse to `Unknown`
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Numeric gRPC code
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Cancelled => 1,
            Self::Unknown => 2,
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::PermissionDenied => 7,
            Self::ResourceExhausted => 8,
            Self::FailedPrecondition => 9,
            Self::Aborted => 10,
            Self::OutOfRange => 11,
            Self::Unimplemented => 12,
            Self::Internal => 13,
            Self::Unavailable => 14,
            Self::DataLoss => 15,
            Self::Unauthenticated => 16,
        }
    }

    /// Map the upper-case status name used in JSON error bodies
    pub fn from_name(name: &str) -> Self {
        match name {
            "OK" => Self::Ok,
            "CANCELLED" => Self::Cancelled,
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "DEADLINE_EXCEEDED" => Self::DeadlineExceeded,
            "NOT_FOUND" => Self::NotFound,
            "ALREADY_EXISTS" => Self::AlreadyExists,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "RESOURCE_EXHAUSTED" => Self::ResourceExhausted,
            "FAILED_PRECONDITION" => Self::FailedPrecondition,
            "ABORTED" => Self::Aborted,
            "OUT_OF_RANGE" => Self::OutOfRange,
            "UNIMPLEMENTED" => Self::Unimplemented,
            "INTERNAL" => Self::Internal,
            "UNAVAILABLE" => Self::Unavailable,
            "DATA_LOSS" => Self::DataLoss,
            "UNAUTHENTICATED" => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Best-effort mapping of an HTTP status when the body carries no status name
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Ok,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::AlreadyExists,
            412 => Self::FailedPrecondition,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            501 => Self::Unimplemented,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            500 => Self::Internal,
            _ => Self::Unknown,
        }
    }

    /// Upper-case status name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a broker client call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BrokerError {
    /// Status code
    pub code: StatusCode,
    /// Human readable message from the broker
    pub message: String,
}

impl BrokerError {
    /// Create a new broker error
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StatusCode::AlreadyExists, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    /// Check if the broker reported that the resource already exists
    pub fn is_already_exists(&self) -> bool {
        self.code == StatusCode::AlreadyExists
    }

    /// Check if the failure is transient on the broker side
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            StatusCode::Unavailable
                | StatusCode::DeadlineExceeded
                | StatusCode::ResourceExhausted
                | StatusCode::Aborted
                | StatusCode::Internal
        )
    }
}

/// Broker-level failure on a subscription's message stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Delivery error on subscription '{subscription}': {source}")]
pub struct DeliveryError {
    /// Subscription name
    pub subscription: String,
    /// Underlying broker error
    pub source: BrokerError,
}

impl DeliveryError {
    pub fn new(subscription: impl Into<String>, source: BrokerError) -> Self {
        Self {
            subscription: subscription.into(),
            source,
        }
    }
}

/// Errors that can occur in the pub-sub layer
#[derive(Error, Debug)]
pub enum PubSubError {
    /// Topic or subscription create failed for a reason other than already-exists
    #[error("Provisioning error for '{resource}': {source}")]
    Provisioning {
        resource: String,
        source: BrokerError,
    },

    /// Payload could not be serialized
    #[error("Encoding error: {source}")]
    Encoding { source: serde_json::Error },

    /// Received bytes could not be deserialized
    #[error("Decoding error: {source}")]
    Decoding { source: serde_json::Error },

    /// Broker rejected a publish attempt
    #[error("Publish error on topic '{topic}': {source}")]
    Publish { topic: String, source: BrokerError },

    /// Subscription stream or acknowledgment failure
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Message handler failure
    #[error("Handler error: {message}")]
    Handler { message: String },

    /// Invalid options or configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Errors raised by caller code inside handlers
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl PubSubError {
    /// Create a new provisioning error
    pub fn provisioning(resource: impl Into<String>, source: BrokerError) -> Self {
        Self::Provisioning {
            resource: resource.into(),
            source,
        }
    }

    /// Create a new encoding error
    pub fn encoding(source: serde_json::Error) -> Self {
        Self::Encoding { source }
    }

    /// Create a new decoding error
    pub fn decoding(source: serde_json::Error) -> Self {
        Self::Decoding { source }
    }

    /// Create a new publish error
    pub fn publish(topic: impl Into<String>, source: BrokerError) -> Self {
        Self::Publish {
            topic: topic.into(),
            source,
        }
    }

    /// Create a new delivery error
    pub fn delivery(subscription: impl Into<String>, source: BrokerError) -> Self {
        Self::Delivery(DeliveryError::new(subscription, source))
    }

    /// Create a new handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Broker status code behind this error, if any
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Provisioning { source, .. } | Self::Publish { source, .. } => Some(source.code),
            Self::Delivery(error) => Some(error.source.code),
            _ => None,
        }
    }

    /// Check if the error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provisioning { source, .. } => source.is_retryable(),
            Self::Encoding { .. } => false,
            Self::Decoding { .. } => false,
            Self::Publish { source, .. } => source.is_retryable(),
            Self::Delivery(error) => error.source.is_retryable(),
            Self::Handler { .. } => true,
            Self::Configuration { .. } => false,
            Self::External { .. } => false,
        }
    }

    /// Get the error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Provisioning { .. } => "provisioning",
            Self::Encoding { .. } => "encoding",
            Self::Decoding { .. } => "decoding",
            Self::Publish { .. } => "publish",
            Self::Delivery(_) => "delivery",
            Self::Handler { .. } => "handler",
            Self::Configuration { .. } => "configuration",
            Self::External { .. } => "external",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{").unwrap_err()
    }

    #[test]
    fn test_status_code_numbering() {
        let fixture = StatusCode::from_code(6);
        let actual = fixture;
        let expected = StatusCode::AlreadyExists;
        assert_eq!(actual, expected);
        assert_eq!(StatusCode::AlreadyExists.code(), 6);
        assert_eq!(StatusCode::from_code(42), StatusCode::Unknown);
    }

    #[test]
    fn test_status_code_round_trip_through_code() {
        for code in 0..=16 {
            let actual = StatusCode::from_code(code).code();
            assert_eq!(actual, code);
        }
    }

    #[test]
    fn test_status_code_from_name() {
        assert_eq!(StatusCode::from_name("ALREADY_EXISTS"), StatusCode::AlreadyExists);
        assert_eq!(StatusCode::from_name("NOT_FOUND"), StatusCode::NotFound);
        assert_eq!(StatusCode::from_name("whatever"), StatusCode::Unknown);
    }

    #[test]
    fn test_status_code_from_http_status() {
        assert_eq!(StatusCode::from_http_status(409), StatusCode::AlreadyExists);
        assert_eq!(StatusCode::from_http_status(404), StatusCode::NotFound);
        assert_eq!(StatusCode::from_http_status(503), StatusCode::Unavailable);
        assert_eq!(StatusCode::from_http_status(418), StatusCode::Unknown);
    }

    #[test]
    fn test_broker_error_display() {
        let fixture = BrokerError::already_exists("Topic already exists");
        let actual = format!("{fixture}");
        let expected = "ALREADY_EXISTS: Topic already exists";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_broker_error_is_already_exists() {
        assert!(BrokerError::already_exists("x").is_already_exists());
        assert!(!BrokerError::not_found("x").is_already_exists());
    }

    #[test]
    fn test_broker_error_retryability() {
        assert!(BrokerError::unavailable("down").is_retryable());
        assert!(BrokerError::internal("oops").is_retryable());
        assert!(!BrokerError::invalid_argument("bad").is_retryable());
        assert!(!BrokerError::not_found("gone").is_retryable());
    }

    #[test]
    fn test_provisioning_error_creation() {
        let source = BrokerError::new(StatusCode::PermissionDenied, "denied");
        let actual = PubSubError::provisioning("orders", source.clone());

        match actual {
            PubSubError::Provisioning { resource, source: actual_source } => {
                assert_eq!(resource, "orders");
                assert_eq!(actual_source, source);
            }
            _ => panic!("Expected Provisioning error"),
        }
    }

    #[test]
    fn test_publish_error_creation() {
        let actual = PubSubError::publish("orders", BrokerError::not_found("no topic"));

        match actual {
            PubSubError::Publish { topic, source } => {
                assert_eq!(topic, "orders");
                assert_eq!(source.code, StatusCode::NotFound);
            }
            _ => panic!("Expected Publish error"),
        }
    }

    #[test]
    fn test_delivery_error_creation() {
        let actual = PubSubError::delivery("billing", BrokerError::unavailable("stream reset"));

        match actual {
            PubSubError::Delivery(error) => {
                assert_eq!(error.subscription, "billing");
                assert_eq!(error.source.code, StatusCode::Unavailable);
            }
            _ => panic!("Expected Delivery error"),
        }
    }

    #[test]
    fn test_status_code_accessor() {
        let fixture = PubSubError::publish("orders", BrokerError::not_found("no topic"));
        assert_eq!(fixture.status_code(), Some(StatusCode::NotFound));
        assert_eq!(PubSubError::encoding(json_error()).status_code(), None);
    }

    #[test]
    fn test_error_retryability() {
        let retryable_errors = vec![
            PubSubError::provisioning("orders", BrokerError::unavailable("test")),
            PubSubError::publish("orders", BrokerError::internal("test")),
            PubSubError::delivery("billing", BrokerError::unavailable("test")),
            PubSubError::handler("test"),
        ];

        for error in retryable_errors {
            assert!(
                error.is_retryable(),
                "Error should be retryable: {:?}",
                error
            );
        }

        let non_retryable_errors = vec![
            PubSubError::provisioning("orders", BrokerError::invalid_argument("test")),
            PubSubError::encoding(json_error()),
            PubSubError::decoding(json_error()),
            PubSubError::configuration("test"),
        ];

        for error in non_retryable_errors {
            assert!(
                !error.is_retryable(),
                "Error should not be retryable: {:?}",
                error
            );
        }
    }

    #[test]
    fn test_error_categories() {
        let test_cases = vec![
            (
                PubSubError::provisioning("t", BrokerError::internal("x")),
                "provisioning",
            ),
            (PubSubError::encoding(json_error()), "encoding"),
            (PubSubError::decoding(json_error()), "decoding"),
            (PubSubError::publish("t", BrokerError::internal("x")), "publish"),
            (PubSubError::delivery("s", BrokerError::internal("x")), "delivery"),
            (PubSubError::handler("x"), "handler"),
            (PubSubError::configuration("x"), "configuration"),
            (PubSubError::from(anyhow::anyhow!("x")), "external"),
        ];

        for (error, expected_category) in test_cases {
            let actual = error.category();
            assert_eq!(actual, expected_category);
        }
    }

    #[test]
    fn test_error_display() {
        let fixture = PubSubError::publish("orders", BrokerError::not_found("Topic not found"));
        let actual = format!("{fixture}");
        let expected = "Publish error on topic 'orders': NOT_FOUND: Topic not found";
        assert_eq!(actual, expected);
    }
}
