use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::InvalidDeviceId;

pub const NUM_SENSORS: usize = 9;
pub const TEMP_ERROR_VALUE: f32 = -999.0;
pub const TEMP_MIN_VALID: f32 = -55.0;
pub const TEMP_MAX_VALID: f32 = 125.0;
/// Value a DS18B20 bus driver reports for a channel that stopped answering.
pub const TEMP_DISCONNECTED: f32 = -127.0;

pub const TIMESTAMP_MIN_YEAR: i32 = 2020;
pub const TIMESTAMP_MAX_YEAR: i32 = 2099;
pub const INVALID_TIME: &str = "INVALID-TIME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct DeviceId(u8);

impl DeviceId {
    pub fn new(id: i64) -> Result<Self, InvalidDeviceId> {
        match u8::try_from(id) {
            Ok(value @ 1..=4) => Ok(Self(value)),
            _ => Err(InvalidDeviceId(id)),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn log_path(self) -> String {
        format!("/data_GCT{}.csv", self.0)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<i64> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for u8 {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link-layer address of a radio peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for PeerAddress {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut octets = [0_u8; 6];
        let mut parts = value.trim().split(':');

        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| format!("peer address `{value}` has fewer than 6 octets"))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid octet `{part}` in peer address `{value}`"))?;
        }

        if parts.next().is_some() {
            return Err(format!("peer address `{value}` has more than 6 octets"));
        }

        Ok(Self(octets))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(address: PeerAddress) -> Self {
        address.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub channel: usize,
    pub celsius: f32,
    pub valid: bool,
}

impl ChannelReading {
    pub fn from_raw(channel: usize, celsius: f32) -> Self {
        Self {
            channel,
            celsius,
            valid: is_valid_temperature(celsius),
        }
    }

    pub fn error(channel: usize) -> Self {
        Self {
            channel,
            celsius: TEMP_ERROR_VALUE,
            valid: false,
        }
    }

    /// Value to put on the wire and in the log.
    pub fn reported(&self) -> f32 {
        if self.valid {
            self.celsius
        } else {
            TEMP_ERROR_VALUE
        }
    }
}

pub fn is_valid_temperature(celsius: f32) -> bool {
    celsius.is_finite()
        && celsius != TEMP_DISCONNECTED
        && (TEMP_MIN_VALID..=TEMP_MAX_VALID).contains(&celsius)
}

/// Calendar time read from the RTC.
///
/// A timestamp from a clock that failed, or whose year lies outside the
/// accepted window, renders as `INVALID-TIME` and never as a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(Option<NaiveDateTime>);

impl Timestamp {
    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        if (TIMESTAMP_MIN_YEAR..=TIMESTAMP_MAX_YEAR).contains(&datetime.year()) {
            Self(Some(datetime))
        } else {
            Self(None)
        }
    }

    pub fn invalid() -> Self {
        Self(None)
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(datetime) => write!(f, "{}", datetime.format("%Y-%m-%d %H:%M:%S")),
            None => f.write_str(INVALID_TIME),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorHealth {
    Healthy,
    Faulted(u32),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageHealth {
    Ready,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    #[serde(rename = "framesReceived")]
    pub frames_received: u64,
    #[serde(rename = "malformedFrames")]
    pub malformed_frames: u64,
    #[serde(rename = "unknownActions")]
    pub unknown_actions: u64,
    #[serde(rename = "temperatureFramesSent")]
    pub temperature_frames_sent: u64,
    #[serde(rename = "sendFailures")]
    pub send_failures: u64,
    #[serde(rename = "deliverySuccesses")]
    pub delivery_successes: u64,
    #[serde(rename = "deliveryFailures")]
    pub delivery_failures: u64,
    #[serde(rename = "recordsLogged")]
    pub records_logged: u64,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    fn datetime(year: i32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, 3, 7)
            .and_then(|date| date.and_hms_opt(9, 5, 2))
            .unwrap()
    }

    #[test]
    fn device_id_accepts_only_one_through_four() {
        assert!(DeviceId::new(0).is_err());
        assert!(DeviceId::new(5).is_err());
        assert!(DeviceId::new(-1).is_err());
        assert_eq!(DeviceId::new(3).unwrap().log_path(), "/data_GCT3.csv");
    }

    #[test]
    fn peer_address_parses_and_prints() {
        let address: PeerAddress = "48:e7:29:8c:6b:5c".parse().unwrap();
        assert_eq!(address.octets(), [0x48, 0xE7, 0x29, 0x8C, 0x6B, 0x5C]);
        assert_eq!(address.to_string(), "48:E7:29:8C:6B:5C");
        assert!("48:E7:29:8C:6B".parse::<PeerAddress>().is_err());
        assert!("48:E7:29:8C:6B:5C:00".parse::<PeerAddress>().is_err());
        assert!("48:E7:29:8C:6B:ZZ".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn out_of_range_readings_report_error_value() {
        assert_eq!(ChannelReading::from_raw(0, 21.5).reported(), 21.5);
        assert_eq!(ChannelReading::from_raw(1, -55.0).reported(), -55.0);
        assert_eq!(ChannelReading::from_raw(2, 125.0).reported(), 125.0);
        assert_eq!(ChannelReading::from_raw(3, 125.1).reported(), TEMP_ERROR_VALUE);
        assert_eq!(ChannelReading::from_raw(4, -55.1).reported(), TEMP_ERROR_VALUE);
        assert_eq!(
            ChannelReading::from_raw(5, TEMP_DISCONNECTED).reported(),
            TEMP_ERROR_VALUE
        );
        assert_eq!(ChannelReading::from_raw(6, f32::NAN).reported(), TEMP_ERROR_VALUE);
    }

    #[test]
    fn timestamp_outside_year_window_is_invalid() {
        assert_eq!(
            Timestamp::from_datetime(datetime(2024)).to_string(),
            "2024-03-07 09:05:02"
        );
        assert_eq!(Timestamp::from_datetime(datetime(2000)).to_string(), INVALID_TIME);
        assert_eq!(Timestamp::from_datetime(datetime(2165)).to_string(), INVALID_TIME);
        assert!(!Timestamp::invalid().is_valid());
    }
}
