use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{config::TransmitConfig, FixedLengthSignal, PinState, Pulse, RmtChannel, TxRmtDriver},
};
use log::warn;

use gct_common::{
    indicator::{Color, BURST_TOGGLE_MS},
    Indicator,
};

const LED_TICK_DIVIDER: u8 = 2;
const LED_BRIGHTNESS_SHIFT: u8 = 3;

enum LedBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

struct BitTiming {
    zero: (Pulse, Pulse),
    one: (Pulse, Pulse),
}

/// Single WS2812 status pixel driven over RMT.
pub struct StatusLed {
    backend: LedBackend,
    timing: Option<BitTiming>,
    lit: Option<Option<Color>>,
    failed_writes: u64,
}

impl StatusLed {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let config = TransmitConfig::new().clock_divider(LED_TICK_DIVIDER);
        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT LED driver")?;

        let ticks_hz = tx.counter_clock()?;
        let timing = BitTiming {
            zero: (
                Pulse::new_with_duration(ticks_hz, PinState::High, &Duration::from_nanos(350))?,
                Pulse::new_with_duration(ticks_hz, PinState::Low, &Duration::from_nanos(800))?,
            ),
            one: (
                Pulse::new_with_duration(ticks_hz, PinState::High, &Duration::from_nanos(700))?,
                Pulse::new_with_duration(ticks_hz, PinState::Low, &Duration::from_nanos(600))?,
            ),
        };

        let mut led = Self {
            backend: LedBackend::Rmt(tx),
            timing: Some(timing),
            lit: None,
            failed_writes: 0,
        };
        led.show(None);
        Ok(led)
    }

    pub fn disabled() -> Self {
        Self {
            backend: LedBackend::Disabled,
            timing: None,
            lit: None,
            failed_writes: 0,
        }
    }

    /// Shows `indicator` as it should look `phase_ms` into its pattern.
    pub fn render(&mut self, indicator: Indicator, phase_ms: u64) {
        self.show(indicator.pattern(phase_ms));
    }

    /// Plays a one-shot pattern to completion. Blocks for `duration`.
    pub fn play_blocking(&mut self, indicator: Indicator, duration: Duration) {
        let started = Instant::now();
        while started.elapsed() < duration {
            let phase_ms = started.elapsed().as_millis() as u64;
            self.render(indicator, phase_ms);
            thread::sleep(Duration::from_millis(BURST_TOGGLE_MS / 2));
        }
        self.show(None);
    }

    pub fn failed_writes(&self) -> u64 {
        self.failed_writes
    }

    fn show(&mut self, color: Option<Color>) {
        if self.lit == Some(color) {
            return;
        }

        match self.write_pixel(color) {
            Ok(()) => self.lit = Some(color),
            Err(err) => {
                self.failed_writes = self.failed_writes.saturating_add(1);
                if self.failed_writes == 1 {
                    warn!("status LED write failed: {err:#}");
                }
            }
        }
    }

    fn write_pixel(&mut self, color: Option<Color>) -> anyhow::Result<()> {
        let (LedBackend::Rmt(tx), Some(timing)) = (&mut self.backend, &self.timing) else {
            return Ok(());
        };

        let (r, g, b) = color.map_or((0, 0, 0), Color::rgb);
        let grb = (u32::from(g >> LED_BRIGHTNESS_SHIFT) << 16)
            | (u32::from(r >> LED_BRIGHTNESS_SHIFT) << 8)
            | u32::from(b >> LED_BRIGHTNESS_SHIFT);

        let mut signal = FixedLengthSignal::<24>::new();
        for bit in 0..24 {
            let set = grb & (1 << (23 - bit)) != 0;
            let pulses = if set { &timing.one } else { &timing.zero };
            signal
                .set(bit, pulses)
                .context("failed to build LED signal")?;
        }

        tx.start_blocking(&signal)
            .context("failed to transmit LED frame over RMT")?;
        Ok(())
    }
}
