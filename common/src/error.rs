use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("malformed frame: action code {code} is not a control action")]
    ShapeMismatch { code: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device id {0} is outside 1..=4")]
pub struct InvalidDeviceId(pub i64);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    DeviceId(#[from] InvalidDeviceId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorFault {
    #[error("no response from sensor channel {0}")]
    NoResponse(usize),
    #[error("temperature conversion failed: {0}")]
    Conversion(String),
    #[error("sensor bus error: {0}")]
    Bus(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockFault {
    #[error("real-time clock not found")]
    Absent,
    #[error("real-time clock lost power or reports an implausible time")]
    Unreliable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageFault {
    #[error("storage mount failed: {0}")]
    Mount(String),
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    #[error("failed to register peer {0}")]
    PeerRegistration(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// Failure taxonomy of the servant core.
///
/// Resource-local faults (sensor, storage, transport) are recovered or
/// degraded where they occur and are surfaced here for diagnostics only.
/// `FatalInit` is the only variant that stops the device from running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServantError {
    #[error(transparent)]
    MalformedFrame(#[from] FrameError),
    #[error("unknown action code {0}")]
    UnknownAction(i32),
    #[error(transparent)]
    SensorFault(#[from] SensorFault),
    #[error(transparent)]
    ClockFault(#[from] ClockFault),
    #[error(transparent)]
    StorageFault(#[from] StorageFault),
    #[error(transparent)]
    TransportFault(#[from] TransportFault),
    #[error("fatal init fault: {0}")]
    FatalInit(String),
}
