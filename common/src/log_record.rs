use std::fmt::Write as _;

use crate::types::{ChannelReading, DeviceId, Timestamp};

pub const CSV_HEADER: &str = "timestamp,gct_id,sensor_no,temperature";

/// One CSV line per channel, all sharing `timestamp`.
pub fn format_records(
    timestamp: &Timestamp,
    device_id: DeviceId,
    readings: &[ChannelReading],
) -> String {
    let mut out = String::with_capacity(readings.len() * 40);
    for reading in readings {
        let _ = writeln!(
            out,
            "{timestamp},{device_id},{},{:.4}",
            reading.channel,
            reading.reported()
        );
    }
    out
}

/// Prefixes the header when the target file is still empty.
pub fn with_header_if_empty(file_len: u64, records: &str) -> String {
    if file_len == 0 {
        format!("{CSV_HEADER}\n{records}")
    } else {
        records.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn formats_one_line_per_channel() {
        let datetime = NaiveDate::from_ymd_opt(2025, 6, 1)
            .and_then(|date| date.and_hms_opt(12, 0, 30))
            .unwrap();
        let readings = [
            ChannelReading::from_raw(0, 21.0625),
            ChannelReading::from_raw(1, 200.0),
        ];

        let text = format_records(
            &Timestamp::from_datetime(datetime),
            DeviceId::new(2).unwrap(),
            &readings,
        );

        assert_eq!(
            text,
            "2025-06-01 12:00:30,2,0,21.0625\n2025-06-01 12:00:30,2,1,-999.0000\n"
        );
    }

    #[test]
    fn invalid_time_is_written_as_marker() {
        let text = format_records(
            &Timestamp::invalid(),
            DeviceId::new(1).unwrap(),
            &[ChannelReading::error(8)],
        );
        assert_eq!(text, "INVALID-TIME,1,8,-999.0000\n");
    }

    #[test]
    fn header_only_for_empty_file() {
        assert_eq!(with_header_if_empty(0, "a\n"), format!("{CSV_HEADER}\na\n"));
        assert_eq!(with_header_if_empty(120, "a\n"), "a\n");
    }
}
