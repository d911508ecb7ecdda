use thiserror::Error;

/// Failures from the live-times API, split into transport problems,
/// server-declared faults, and parse failures so callers can pick retry
/// policy per group (a connection error is worth retrying, a rejected
/// application key is not).
#[derive(Debug, Error)]
pub enum BusTrackerError {
    #[error("No stop codes supplied")]
    NoStopCodes,
    #[error("Malformed request URL: {0}")]
    MalformedUrl(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Response served by unexpected host: expected {expected}, got {actual}")]
    HostMismatch { expected: String, actual: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    #[error("Server rejected the application key")]
    InvalidAppKey,
    #[error("Server rejected a request parameter")]
    InvalidParameter,
    #[error("Server reported a processing error")]
    ProcessingError,
    #[error("Server is down for maintenance")]
    SystemMaintenance,
    #[error("Server is overloaded")]
    SystemOverloaded,
    #[error("Unknown server fault: {0}")]
    UnknownServerFault(String),
    #[error("No live data available for the requested stops")]
    NoDataAvailable,
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl BusTrackerError {
    /// Map a reqwest failure, keeping URL construction, connect/DNS,
    /// timeout, and other I/O failures distinguishable.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            BusTrackerError::MalformedUrl(err.to_string())
        } else if err.is_timeout() {
            BusTrackerError::Timeout(err.to_string())
        } else if err.is_connect() {
            BusTrackerError::Connection(err.to_string())
        } else {
            BusTrackerError::Network(err.to_string())
        }
    }

    /// Map a `faultcode` value from the response document. The five known
    /// codes match exactly and case-sensitively; anything else is an
    /// unknown server fault.
    pub fn from_fault_code(code: &str) -> Self {
        match code {
            "INVALID_APP_KEY" => BusTrackerError::InvalidAppKey,
            "INVALID_PARAMETER" => BusTrackerError::InvalidParameter,
            "PROCESSING_ERROR" => BusTrackerError::ProcessingError,
            "SYSTEM_MAINTENANCE" => BusTrackerError::SystemMaintenance,
            "SYSTEM_OVERLOADED" => BusTrackerError::SystemOverloaded,
            other => BusTrackerError::UnknownServerFault(other.to_string()),
        }
    }

    /// True for failures of the fetch layer itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BusTrackerError::MalformedUrl(_)
                | BusTrackerError::Connection(_)
                | BusTrackerError::Timeout(_)
                | BusTrackerError::HostMismatch { .. }
                | BusTrackerError::Network(_)
                | BusTrackerError::HttpStatus(_)
        )
    }

    /// True for faults declared by the server inside a well-formed
    /// response document.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            BusTrackerError::InvalidAppKey
                | BusTrackerError::InvalidParameter
                | BusTrackerError::ProcessingError
                | BusTrackerError::SystemMaintenance
                | BusTrackerError::SystemOverloaded
                | BusTrackerError::UnknownServerFault(_)
        )
    }
}
