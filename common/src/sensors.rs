use log::{info, warn};

use crate::{
    collaborators::{Delay, TemperatureSource},
    error::SensorFault,
    retry::{RetryOutcome, RetryPolicy},
    types::{is_valid_temperature, ChannelReading, SensorHealth, NUM_SENSORS},
};

/// Per-channel fault bookkeeping for the DS18B20 bus.
#[derive(Debug, Clone)]
pub struct SensorBank {
    health: [SensorHealth; NUM_SENSORS],
    max_failures: u32,
}

impl SensorBank {
    pub fn new(max_failures: u32) -> Self {
        Self {
            health: [SensorHealth::Healthy; NUM_SENSORS],
            max_failures: max_failures.max(1),
        }
    }

    pub fn health(&self, channel: usize) -> Option<SensorHealth> {
        self.health.get(channel).copied()
    }

    pub fn failed_channels(&self) -> usize {
        self.health
            .iter()
            .filter(|health| **health == SensorHealth::Failed)
            .count()
    }

    pub fn any_failed(&self) -> bool {
        self.failed_channels() > 0
    }

    /// Boot-time readback: converts and reads every channel, retrying the
    /// channels that have not produced a valid value yet. Channels still
    /// silent when the policy gives up are failed for the session.
    pub fn initialize<S, D>(&mut self, source: &mut S, policy: &RetryPolicy, delay: &mut D)
    where
        S: TemperatureSource + ?Sized,
        D: Delay + ?Sized,
    {
        let present = source.channel_count().min(NUM_SENSORS);
        if present < NUM_SENSORS {
            warn!("only {present} of {NUM_SENSORS} temperature sensors found on the bus");
        }

        let mut pending: Vec<usize> = (0..NUM_SENSORS).collect();
        let outcome = policy.attempt("sensor init", delay, |_| {
            source.request_conversion()?;
            pending.retain(|&channel| {
                !matches!(source.read_celsius(channel), Ok(value) if is_valid_temperature(value))
            });

            if pending.is_empty() {
                Ok(())
            } else {
                Err(SensorFault::Conversion(format!(
                    "no valid reading from channel(s) {pending:?}"
                )))
            }
        });

        if let RetryOutcome::PermanentlyFailed { .. } = outcome {
            for &channel in &pending {
                self.health[channel] = SensorHealth::Failed;
            }
        }

        let ready = NUM_SENSORS - self.failed_channels();
        info!("{ready}/{NUM_SENSORS} temperature sensor channel(s) ready");
    }

    /// One reading per channel. Failed channels are not touched and report
    /// the error value; an invalid read counts towards the channel's fault
    /// ceiling and a valid one clears it.
    pub fn acquire<S>(&mut self, source: &mut S) -> [ChannelReading; NUM_SENSORS]
    where
        S: TemperatureSource + ?Sized,
    {
        let mut readings: [ChannelReading; NUM_SENSORS] =
            core::array::from_fn(ChannelReading::error);

        if let Err(err) = source.request_conversion() {
            warn!("temperature conversion request failed: {err}");
            for channel in 0..NUM_SENSORS {
                self.record_fault(channel);
            }
            return readings;
        }

        for (channel, reading) in readings.iter_mut().enumerate() {
            if self.health[channel] == SensorHealth::Failed {
                continue;
            }

            let candidate = match source.read_celsius(channel) {
                Ok(value) => ChannelReading::from_raw(channel, value),
                Err(err) => {
                    warn!("sensor channel {channel} read failed: {err}");
                    ChannelReading::error(channel)
                }
            };

            if candidate.valid {
                self.health[channel] = SensorHealth::Healthy;
                *reading = candidate;
            } else {
                warn!(
                    "sensor channel {channel} reported {:.2} C, outside the valid range",
                    candidate.celsius
                );
                self.record_fault(channel);
            }
        }

        readings
    }

    fn record_fault(&mut self, channel: usize) {
        let failures = match self.health[channel] {
            SensorHealth::Failed => return,
            SensorHealth::Healthy => 1,
            SensorHealth::Faulted(count) => count.saturating_add(1),
        };

        if failures >= self.max_failures {
            warn!("sensor channel {channel} failed {failures} time(s) in a row; disabling it");
            self.health[channel] = SensorHealth::Failed;
        } else {
            self.health[channel] = SensorHealth::Faulted(failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{TEMP_DISCONNECTED, TEMP_ERROR_VALUE};

    struct ScriptedBus {
        values: [f32; NUM_SENSORS],
        conversions: u32,
        reads: Vec<usize>,
    }

    impl ScriptedBus {
        fn new(values: [f32; NUM_SENSORS]) -> Self {
            Self {
                values,
                conversions: 0,
                reads: Vec::new(),
            }
        }
    }

    impl TemperatureSource for ScriptedBus {
        fn channel_count(&self) -> usize {
            NUM_SENSORS
        }

        fn request_conversion(&mut self) -> Result<(), SensorFault> {
            self.conversions += 1;
            Ok(())
        }

        fn read_celsius(&mut self, channel: usize) -> Result<f32, SensorFault> {
            self.reads.push(channel);
            Ok(self.values[channel])
        }
    }

    struct NoDelay;

    impl Delay for NoDelay {
        fn delay_ms(&mut self, _ms: u64) {}
    }

    #[test]
    fn init_fails_only_silent_channels() {
        let mut values = [22.0; NUM_SENSORS];
        values[4] = TEMP_DISCONNECTED;
        let mut bus = ScriptedBus::new(values);
        let mut bank = SensorBank::new(5);

        bank.initialize(&mut bus, &RetryPolicy::new(5, 500), &mut NoDelay);

        assert_eq!(bus.conversions, 5);
        assert_eq!(bank.health(4), Some(SensorHealth::Failed));
        assert_eq!(bank.health(3), Some(SensorHealth::Healthy));
        assert_eq!(bank.failed_channels(), 1);
    }

    #[test]
    fn failed_channel_is_never_read_again() {
        let mut values = [22.0; NUM_SENSORS];
        values[0] = 300.0;
        let mut bus = ScriptedBus::new(values);
        let mut bank = SensorBank::new(2);
        bank.initialize(&mut bus, &RetryPolicy::new(2, 0), &mut NoDelay);
        bus.reads.clear();

        let readings = bank.acquire(&mut bus);

        assert_eq!(readings[0].reported(), TEMP_ERROR_VALUE);
        assert!(!bus.reads.contains(&0));
        assert_eq!(readings[8].reported(), 22.0);
    }

    #[test]
    fn consecutive_faults_escalate_and_success_resets() {
        let mut bus = ScriptedBus::new([20.0; NUM_SENSORS]);
        let mut bank = SensorBank::new(3);

        bus.values[2] = 150.0;
        bank.acquire(&mut bus);
        bank.acquire(&mut bus);
        assert_eq!(bank.health(2), Some(SensorHealth::Faulted(2)));

        bus.values[2] = 19.5;
        let readings = bank.acquire(&mut bus);
        assert_eq!(readings[2].reported(), 19.5);
        assert_eq!(bank.health(2), Some(SensorHealth::Healthy));

        bus.values[2] = TEMP_DISCONNECTED;
        for _ in 0..3 {
            let readings = bank.acquire(&mut bus);
            assert_eq!(readings[2].reported(), TEMP_ERROR_VALUE);
        }
        assert_eq!(bank.health(2), Some(SensorHealth::Failed));
    }
}
