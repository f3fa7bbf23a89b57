pub mod codec;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod indicator;
pub mod liveness;
pub mod log_record;
pub mod retry;
pub mod sensors;
pub mod servant;
pub mod session;
pub mod types;

pub use codec::{Action, ActionFrame, TemperatureFrame, ACTION_FRAME_LEN, TEMPERATURE_FRAME_LEN};
pub use collaborators::{Delay, LogStorage, TemperatureSource, TimeSource, Transport};
pub use config::{ServantConfig, FIRMWARE_VERSION};
pub use error::{
    ClockFault, ConfigError, FrameError, InvalidDeviceId, SensorFault, ServantError, StorageFault,
    TransportFault,
};
pub use indicator::{Color, Indicator, SupervisionSnapshot};
pub use liveness::LivenessTracker;
pub use retry::{RetryOutcome, RetryPolicy};
pub use servant::{Board, DispatchOutcome, Phase, Servant};
pub use types::{
    ChannelReading, DeviceId, Diagnostics, PeerAddress, SensorHealth, StorageHealth, Timestamp,
    NUM_SENSORS, TEMP_ERROR_VALUE,
};
