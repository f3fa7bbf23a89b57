use log::{debug, error, info, warn};

use crate::{
    codec::{Action, ActionFrame, TemperatureFrame},
    collaborators::{Delay, LogStorage, TemperatureSource, TimeSource, Transport},
    config::{ServantConfig, FIRMWARE_VERSION},
    error::{ClockFault, FrameError, ServantError},
    indicator::{self, Indicator, SupervisionSnapshot},
    liveness::LivenessTracker,
    log_record::{format_records, with_header_if_empty},
    retry::RetryOutcome,
    sensors::SensorBank,
    session::SessionState,
    types::{
        ChannelReading, DeviceId, Diagnostics, SensorHealth, StorageHealth, Timestamp,
        NUM_SENSORS,
    },
};

/// Drivers the servant talks to, owned by it for the whole run.
pub struct Board<S, C, L, T, D> {
    pub sensors: S,
    pub clock: C,
    pub storage: L,
    pub transport: T,
    pub delay: D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Booting,
    Running,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    RestartRequested,
}

/// Device context of a servant node: reacts to master frames and feeds
/// the supervision cycle.
pub struct Servant<S, C, L, T, D> {
    config: ServantConfig,
    board: Board<S, C, L, T, D>,
    session: SessionState,
    liveness: LivenessTracker,
    sensor_bank: SensorBank,
    diagnostics: Diagnostics,
    phase: Phase,
    warning_pending: bool,
    last_indicator: Option<Indicator>,
}

impl<S, C, L, T, D> Servant<S, C, L, T, D>
where
    S: TemperatureSource,
    C: TimeSource,
    L: LogStorage,
    T: Transport,
    D: Delay,
{
    pub fn new(mut config: ServantConfig, board: Board<S, C, L, T, D>) -> Self {
        config.sanitize();
        Self {
            session: SessionState::new(config.device_id()),
            sensor_bank: SensorBank::new(config.sensor_retries),
            config,
            board,
            liveness: LivenessTracker::new(),
            diagnostics: Diagnostics::default(),
            phase: Phase::Booting,
            warning_pending: false,
            last_indicator: None,
        }
    }

    pub fn config(&self) -> &ServantConfig {
        &self.config
    }

    pub fn board(&self) -> &Board<S, C, L, T, D> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<S, C, L, T, D> {
        &mut self.board
    }

    pub fn device_id(&self) -> DeviceId {
        self.session.device_id()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_logging(&self) -> bool {
        self.session.is_logging()
    }

    pub fn storage_health(&self) -> StorageHealth {
        self.session.storage_health()
    }

    pub fn channel_health(&self, channel: usize) -> Option<SensorHealth> {
        self.sensor_bank.health(channel)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    pub fn boot_time(&self) -> Timestamp {
        self.session.boot_time()
    }

    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.liveness
            .is_stale(now_ms, self.config.ping_interval_ms, self.config.stale_grace_ms)
    }

    pub fn boot(&mut self, _now_ms: u64) -> Result<(), ServantError> {
        info!(
            "GCT{} servant booting (firmware {FIRMWARE_VERSION}, master {})",
            self.session.device_id(),
            self.config.master_address
        );

        if let Err(err) = self.board.transport.register_peer(&self.config.master_address) {
            return Err(self.fatal(format!("master peer registration failed: {err}")));
        }

        match self.board.clock.now() {
            Ok(datetime) => {
                let boot_time = Timestamp::from_datetime(datetime);
                if !boot_time.is_valid() {
                    warn!("RTC reports {datetime}, outside the accepted window");
                    self.warning_pending = true;
                }
                self.session.set_boot_time(boot_time);
            }
            Err(ClockFault::Absent) => {
                return Err(self.fatal("real-time clock not found".to_string()));
            }
            Err(err) => {
                warn!("RTC integrity check failed: {err}");
                self.warning_pending = true;
            }
        }
        info!("boot time {}", self.session.boot_time());

        let sensor_policy = self.config.sensor_policy();
        self.sensor_bank
            .initialize(&mut self.board.sensors, &sensor_policy, &mut self.board.delay);

        let storage_policy = self.config.storage_policy();
        let storage = &mut self.board.storage;
        let outcome = storage_policy.attempt("storage mount", &mut self.board.delay, |_| {
            storage.mount()
        });
        if outcome.is_recovered() {
            info!("storage mounted, logging to {}", self.session.log_path());
        } else {
            error!("storage unavailable; logging disabled until restart");
            self.session.disable_storage();
        }

        if self.config.blocking_exceeds_watchdog_margin() {
            warn!(
                "retry ceilings allow {} ms of blocking per cycle against a {} s watchdog",
                self.config.worst_case_blocking_ms(),
                self.config.watchdog_timeout_sec
            );
        }

        self.phase = Phase::Running;
        info!("boot complete; waiting for master");
        Ok(())
    }

    /// Decodes and dispatches one inbound datagram.
    pub fn handle_datagram(
        &mut self,
        bytes: &[u8],
        now_ms: u64,
    ) -> Result<DispatchOutcome, ServantError> {
        self.diagnostics.frames_received = self.diagnostics.frames_received.saturating_add(1);

        let frame = match ActionFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.diagnostics.malformed_frames =
                    self.diagnostics.malformed_frames.saturating_add(1);
                warn!("dropping inbound frame: {err}");
                return Err(err.into());
            }
        };

        self.dispatch(frame, now_ms)
    }

    pub fn dispatch(
        &mut self,
        frame: ActionFrame,
        now_ms: u64,
    ) -> Result<DispatchOutcome, ServantError> {
        let Some(action) = frame.action() else {
            self.diagnostics.unknown_actions = self.diagnostics.unknown_actions.saturating_add(1);
            warn!("invalid action id {} (value {})", frame.code, frame.value);
            return Err(ServantError::UnknownAction(frame.code));
        };

        debug!("received {} (value {})", action.as_str(), frame.value);

        match action {
            Action::ConnectionTest => {
                self.liveness.record_contact(now_ms);
            }
            Action::StartLogging => {
                self.liveness.record_contact(now_ms);
                if self.session.set_logging(true) {
                    info!("logging started");
                }
                if self.session.storage_health() == StorageHealth::Disabled {
                    warn!("logging requested but storage is disabled; readings will not be saved");
                }
            }
            Action::StopLogging => {
                self.liveness.record_contact(now_ms);
                if self.session.set_logging(false) {
                    info!("logging stopped");
                }
            }
            Action::TempRequest => {
                self.liveness.record_contact(now_ms);
                self.handle_temp_request();
            }
            Action::HardReset => {
                warn!("hard reset requested by master");
                return Ok(DispatchOutcome::RestartRequested);
            }
            Action::TempResponse => {
                return Err(FrameError::ShapeMismatch { code: frame.code }.into());
            }
        }

        Ok(DispatchOutcome::Handled)
    }

    /// Delivery feedback from the radio. Lost frames are not resent.
    pub fn on_send_status(&mut self, delivered: bool) {
        if delivered {
            self.diagnostics.delivery_successes =
                self.diagnostics.delivery_successes.saturating_add(1);
        } else {
            self.diagnostics.delivery_failures =
                self.diagnostics.delivery_failures.saturating_add(1);
            warn!("last packet delivery failed");
        }
    }

    /// One supervision cycle: derives the indicator directive. A pending
    /// one-shot warning is consumed here.
    pub fn supervise(&mut self, now_ms: u64) -> Indicator {
        let snapshot = self.snapshot(now_ms);
        let indicator = indicator::select(&snapshot);

        if indicator.is_one_shot() {
            self.warning_pending = false;
        }

        if self.last_indicator != Some(indicator) {
            info!(
                "indicator {:?} -> {:?} (code {})",
                self.last_indicator,
                indicator,
                indicator.code()
            );
            self.last_indicator = Some(indicator);
        }

        indicator
    }

    pub fn snapshot(&self, now_ms: u64) -> SupervisionSnapshot {
        SupervisionSnapshot {
            indicator_enabled: self.config.indicator_enabled,
            fatal: self.phase == Phase::Fatal,
            booting: self.phase == Phase::Booting,
            warning_pending: self.warning_pending,
            stale: self.is_stale(now_ms),
            logging: self.session.is_logging(),
            permanent_failure: self.session.storage_health() == StorageHealth::Disabled
                || self.sensor_bank.any_failed(),
        }
    }

    fn fatal(&mut self, reason: String) -> ServantError {
        error!("{reason}; halting");
        self.phase = Phase::Fatal;
        ServantError::FatalInit(reason)
    }

    fn handle_temp_request(&mut self) {
        let readings = self.sensor_bank.acquire(&mut self.board.sensors);

        if self.session.is_logging() {
            self.persist(&readings);
        }

        let frame = TemperatureFrame::new(readings.map(|reading| reading.reported()));
        match self
            .board
            .transport
            .send(&self.config.master_address, &frame.encode())
        {
            Ok(()) => {
                self.diagnostics.temperature_frames_sent =
                    self.diagnostics.temperature_frames_sent.saturating_add(1);
            }
            Err(err) => {
                self.diagnostics.send_failures = self.diagnostics.send_failures.saturating_add(1);
                warn!("failed to send temperature frame: {err}");
            }
        }
    }

    fn persist(&mut self, readings: &[ChannelReading; NUM_SENSORS]) {
        if !self.session.should_persist() {
            debug!("storage disabled; skipping log append");
            return;
        }

        let timestamp = match self.board.clock.now() {
            Ok(datetime) => Timestamp::from_datetime(datetime),
            Err(err) => {
                warn!("RTC read failed: {err}");
                Timestamp::invalid()
            }
        };
        if !timestamp.is_valid() {
            warn!("logging readings as INVALID-TIME");
            self.warning_pending = true;
        }

        let records = format_records(&timestamp, self.session.device_id(), readings);
        let path = self.session.log_path();
        let policy = self.config.storage_policy();
        let storage = &mut self.board.storage;

        // File length and block from the first attempt that could read them.
        // A retry finding the file already grown by the block does not write it again.
        let mut pending: Option<(u64, String)> = None;
        let outcome = policy.attempt("log append", &mut self.board.delay, |attempt| {
            if attempt > 1 {
                storage.mount()?;
            }
            let len = storage.file_len(&path)?;
            let (before, block) =
                &*pending.get_or_insert_with(|| (len, with_header_if_empty(len, &records)));
            if len >= before.saturating_add(block.len() as u64) {
                debug!("earlier append to {path} reached the card; not writing it again");
                return Ok(());
            }
            storage.append(&path, block)
        });

        match outcome {
            RetryOutcome::Recovered { .. } => {
                self.diagnostics.records_logged = self
                    .diagnostics
                    .records_logged
                    .saturating_add(readings.len() as u64);
            }
            RetryOutcome::PermanentlyFailed { .. } => {
                error!("writing {path} keeps failing; logging disabled until restart");
                self.session.disable_storage();
            }
        }
    }
}
