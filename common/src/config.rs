use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    retry::RetryPolicy,
    types::{DeviceId, PeerAddress},
};

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

const MIN_PING_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServantConfig {
    pub gct_id: i64,
    pub master_address: PeerAddress,
    pub ping_interval_ms: u64,
    pub stale_grace_ms: u64,
    pub watchdog_timeout_sec: u32,
    pub sensor_retries: u32,
    pub sensor_retry_delay_ms: u64,
    pub sd_retries: u32,
    pub sd_retry_delay_ms: u64,
    pub burst_duration_ms: u64,
    pub indicator_enabled: bool,
}

impl Default for ServantConfig {
    fn default() -> Self {
        Self {
            gct_id: 1,
            master_address: PeerAddress([0x48, 0xE7, 0x29, 0x8C, 0x6B, 0x5C]),
            ping_interval_ms: 1_000,
            stale_grace_ms: 2_000,
            watchdog_timeout_sec: 30,
            sensor_retries: 5,
            sensor_retry_delay_ms: 500,
            sd_retries: 5,
            sd_retry_delay_ms: 1_000,
            burst_duration_ms: 2_000,
            indicator_enabled: true,
        }
    }
}

impl ServantConfig {
    /// Parses a config file. An out-of-range `gct_id` is an error here,
    /// never clamped, so a node cannot log under another node's name.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        DeviceId::new(config.gct_id)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.gct_id = self.gct_id.clamp(1, 4);
        self.ping_interval_ms = self.ping_interval_ms.max(MIN_PING_INTERVAL_MS);
        self.watchdog_timeout_sec = self.watchdog_timeout_sec.max(1);
        self.sensor_retries = self.sensor_retries.max(1);
        self.sd_retries = self.sd_retries.max(1);
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.gct_id).unwrap_or_default()
    }

    pub fn sensor_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.sensor_retries, self.sensor_retry_delay_ms)
    }

    pub fn storage_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.sd_retries, self.sd_retry_delay_ms)
    }

    /// Longest stall one temperature request can cause: the storage retry
    /// ceiling plus a fast-red burst on the following cycle.
    pub fn worst_case_blocking_ms(&self) -> u64 {
        self.storage_policy()
            .worst_case_delay_ms()
            .saturating_add(self.burst_duration_ms)
    }

    pub fn watchdog_budget_ms(&self) -> u64 {
        u64::from(self.watchdog_timeout_sec).saturating_mul(1_000)
    }

    /// True when a single cycle may come within half of the watchdog timeout.
    pub fn blocking_exceeds_watchdog_margin(&self) -> bool {
        self.worst_case_blocking_ms().saturating_mul(2) >= self.watchdog_budget_ms()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_firmware_constants() {
        let config = ServantConfig::default();
        assert_eq!(config.ping_interval_ms, 1_000);
        assert_eq!(config.stale_grace_ms, 2_000);
        assert_eq!(config.watchdog_timeout_sec, 30);
        assert_eq!(config.device_id().log_path(), "/data_GCT1.csv");
        assert_eq!(config.master_address.to_string(), "48:E7:29:8C:6B:5C");
        assert!(!config.blocking_exceeds_watchdog_margin());
    }

    #[test]
    fn json_overrides_and_sanitizes() {
        let config = ServantConfig::from_json(
            r#"{"gct_id": 2, "ping_interval_ms": 100, "master_address": "24:0A:C4:0A:0B:24"}"#,
        )
        .unwrap();

        assert_eq!(config.device_id().log_path(), "/data_GCT2.csv");
        assert_eq!(config.ping_interval_ms, 500);
        assert_eq!(config.master_address.octets(), [0x24, 0x0A, 0xC4, 0x0A, 0x0B, 0x24]);
        assert_eq!(config.sd_retries, 5);
    }

    #[test]
    fn json_with_out_of_range_id_is_rejected() {
        for json in [r#"{"gct_id": 9}"#, r#"{"gct_id": 0}"#] {
            assert!(matches!(
                ServantConfig::from_json(json),
                Err(ConfigError::DeviceId(_))
            ));
        }
        assert!(matches!(
            ServantConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn long_retry_ceilings_are_flagged() {
        let config = ServantConfig {
            sd_retries: 10,
            sd_retry_delay_ms: 2_000,
            ..ServantConfig::default()
        };
        assert_eq!(config.worst_case_blocking_ms(), 20_000);
        assert!(config.blocking_exceeds_watchdog_margin());
    }
}
