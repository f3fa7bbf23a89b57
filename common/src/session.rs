use crate::types::{DeviceId, StorageHealth, Timestamp};

/// Logging switch and boot identity of one power cycle.
#[derive(Debug, Clone)]
pub struct SessionState {
    device_id: DeviceId,
    boot_time: Timestamp,
    logging: bool,
    storage: StorageHealth,
}

impl SessionState {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            boot_time: Timestamp::invalid(),
            logging: false,
            storage: StorageHealth::Ready,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn log_path(&self) -> String {
        self.device_id.log_path()
    }

    pub fn boot_time(&self) -> Timestamp {
        self.boot_time
    }

    pub fn set_boot_time(&mut self, boot_time: Timestamp) {
        self.boot_time = boot_time;
    }

    pub fn is_logging(&self) -> bool {
        self.logging
    }

    /// Returns true when the flag changed.
    pub fn set_logging(&mut self, enabled: bool) -> bool {
        let changed = self.logging != enabled;
        self.logging = enabled;
        changed
    }

    pub fn storage_health(&self) -> StorageHealth {
        self.storage
    }

    /// Storage stays disabled until the next restart.
    pub fn disable_storage(&mut self) {
        self.storage = StorageHealth::Disabled;
    }

    /// Whether a temperature report should be persisted.
    pub fn should_persist(&self) -> bool {
        self.logging && self.storage == StorageHealth::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_starts_disabled() {
        let session = SessionState::new(DeviceId::default());
        assert!(!session.is_logging());
        assert!(!session.should_persist());
        assert_eq!(session.log_path(), "/data_GCT1.csv");
    }

    #[test]
    fn disabled_storage_overrides_logging_flag() {
        let mut session = SessionState::new(DeviceId::new(4).unwrap());
        assert!(session.set_logging(true));
        assert!(!session.set_logging(true));
        assert!(session.should_persist());

        session.disable_storage();
        assert!(session.is_logging());
        assert!(!session.should_persist());
        assert_eq!(session.storage_health(), StorageHealth::Disabled);
    }
}
