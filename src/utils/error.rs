use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Service not available: {0}")]
    ServiceNotAvailable(String),

    /// A bounded ring buffer refused an event because it is full.
    #[error("Ring buffer full: {0}")]
    Backpressure(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl MirrorError {
    /// Transient I/O failures are absorbed by the worker loops; everything
    /// else is surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MirrorError::CommunicationError(_) | MirrorError::Timeout
        )
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for MirrorError {
    fn from(err: toml::de::Error) -> Self {
        MirrorError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for MirrorError {
    fn from(err: toml::ser::Error) -> Self {
        MirrorError::SerializationError(format!("TOML error: {}", err))
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        MirrorError::CommunicationError(format!("IO error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for MirrorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        MirrorError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let err: MirrorError = MirrorError::Timeout;
        assert!(err.is_transient());
        assert!(!MirrorError::NotImplemented("restore".into()).is_transient());
    }

    #[test]
    fn toml_errors_are_config_errors() {
        let parse: Result<toml::Value, _> = toml::from_str("devices = [");
        let err: MirrorError = parse.unwrap_err().into();
        assert!(matches!(err, MirrorError::ConfigError(_)));
    }
}
