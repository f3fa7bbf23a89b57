use std::{
    convert::TryInto,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write as _},
    sync::{
        mpsc::{self, Receiver, SyncSender, TrySendError},
        OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{NaiveDate, NaiveDateTime};
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::wifi::{ClientConfiguration, Configuration};
use esp_idf_hal::{
    delay::{Ets, BLOCK},
    gpio::{AnyIOPin, IOPin, InputOutput, PinDriver, Pull},
    i2c::{I2cConfig, I2cDriver},
    prelude::*,
    spi::{config::DriverConfig, Dma, SpiDriver},
};
use esp_idf_svc::{
    espnow::{EspNow, PeerInfo, ReceiveInfo, SendStatus},
    eventloop::EspSystemEventLoop,
    fs::fatfs::Fatfs,
    io::vfs::MountedFatfs,
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    sd::{spi::SdSpiHostDriver, SdCardConfiguration, SdCardDriver},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, error, info, warn};
use one_wire_bus::{Address, OneWire};
use static_cell::StaticCell;

use gct_common::{
    Board, ClockFault, Delay, DispatchOutcome, Indicator, LogStorage, PeerAddress, SensorFault,
    Servant, ServantConfig, StorageFault, TemperatureSource, TimeSource, Transport,
    TransportFault, NUM_SENSORS,
};

use crate::led::StatusLed;

const ONE_WIRE_PIN: i32 = 4;
const DS3231_ADDRESS: u8 = 0x68;
const DS3231_STATUS_REGISTER: u8 = 0x0F;
const DS3231_OSCILLATOR_STOPPED: u8 = 0x80;
const SD_MOUNT_POINT: &str = "/sdcard";
const SD_MAX_OPEN_FILES: usize = 4;
const I2C_BAUDRATE_KHZ: u32 = 100;

const SUPERVISION_TICK_MS: u64 = 50;
const RADIO_QUEUE_DEPTH: usize = 16;
const DIAGNOSTICS_INTERVAL_MS: u64 = 60_000;

type SdHost = SdSpiHostDriver<'static, SpiDriver<'static>>;
type SdCard = MountedFatfs<Fatfs<SdCardDriver<&'static SdHost>>>;

enum RadioEvent {
    Frame(Vec<u8>),
    SendStatus(bool),
}

struct OneWireSensors {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    addresses: Vec<Address>,
    delay: Ets,
}

impl OneWireSensors {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut one_wire_pin = PinDriver::input_output_od(pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut sensors = Self {
            one_wire,
            addresses: Vec::with_capacity(NUM_SENSORS),
            delay: Ets,
        };
        sensors.scan();
        Ok(sensors)
    }

    fn scan(&mut self) {
        self.addresses.clear();

        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => {
                    if self.addresses.len() < NUM_SENSORS {
                        self.addresses.push(address);
                    }
                }
                Ok(address) => debug!("ignoring one-wire device {address:?}"),
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        info!(
            "{} DS18B20 sensor(s) on GPIO{}",
            self.addresses.len(),
            ONE_WIRE_PIN
        );
    }
}

impl TemperatureSource for OneWireSensors {
    fn channel_count(&self) -> usize {
        self.addresses.len()
    }

    fn request_conversion(&mut self) -> Result<(), SensorFault> {
        if self.addresses.is_empty() {
            self.scan();
        }

        ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
            .map_err(|err| SensorFault::Conversion(format!("{err:?}")))?;
        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);
        Ok(())
    }

    fn read_celsius(&mut self, channel: usize) -> Result<f32, SensorFault> {
        let address = *self
            .addresses
            .get(channel)
            .ok_or(SensorFault::NoResponse(channel))?;

        let sensor = Ds18b20::new::<core::convert::Infallible>(address)
            .map_err(|err| SensorFault::Bus(format!("invalid address {address:?}: {err:?}")))?;

        sensor
            .read_data(&mut self.one_wire, &mut self.delay)
            .map(|data| data.temperature)
            .map_err(|err| SensorFault::Bus(format!("channel {channel}: {err:?}")))
    }
}

/// DS3231 real-time clock on I2C.
struct Ds3231Clock {
    i2c: I2cDriver<'static>,
}

impl Ds3231Clock {
    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), ClockFault> {
        self.i2c
            .write_read(DS3231_ADDRESS, &[start], buf, BLOCK)
            .map_err(|err| {
                debug!("DS3231 read at {start:#04x} failed: {err}");
                ClockFault::Absent
            })
    }
}

impl TimeSource for Ds3231Clock {
    fn now(&mut self) -> Result<NaiveDateTime, ClockFault> {
        let mut status = [0_u8; 1];
        self.read_registers(DS3231_STATUS_REGISTER, &mut status)?;
        if status[0] & DS3231_OSCILLATOR_STOPPED != 0 {
            return Err(ClockFault::Unreliable);
        }

        let mut regs = [0_u8; 7];
        self.read_registers(0x00, &mut regs)?;

        let second = bcd(regs[0] & 0x7F);
        let minute = bcd(regs[1] & 0x7F);
        let hour = bcd(regs[2] & 0x3F);
        let day = bcd(regs[4] & 0x3F);
        let month = bcd(regs[5] & 0x1F);
        let century = if regs[5] & 0x80 != 0 { 100 } else { 0 };
        let year = 2000 + century + i32::from(bcd(regs[6]));

        NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))
            .and_then(|date| {
                date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
            })
            .ok_or(ClockFault::Unreliable)
    }
}

fn bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

/// SD card on VSPI, mounted as FAT under `/sdcard`. The SPI host lives for
/// the whole run; only the card and its FAT volume are rebuilt on remount.
struct SdStorage {
    host: &'static SdHost,
    card: Option<SdCard>,
}

impl SdStorage {
    fn new(host: SdHost) -> Self {
        static SD_HOST: StaticCell<SdHost> = StaticCell::new();
        Self {
            host: SD_HOST.init(host),
            card: None,
        }
    }

    fn host_path(path: &str) -> String {
        format!("{SD_MOUNT_POINT}{path}")
    }
}

impl LogStorage for SdStorage {
    fn mount(&mut self) -> Result<(), StorageFault> {
        // Drop the previous mount so its drivers release the bus first.
        self.card = None;
        let card =
            mount_sd_card(self.host).map_err(|err| StorageFault::Mount(format!("{err:#}")))?;
        self.card = Some(card);
        Ok(())
    }

    fn file_len(&mut self, path: &str) -> Result<u64, StorageFault> {
        if self.card.is_none() {
            return Err(StorageFault::Mount("card not mounted".to_string()));
        }

        match fs::metadata(Self::host_path(path)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(StorageFault::Open {
                path: path.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn append(&mut self, path: &str, contents: &str) -> Result<(), StorageFault> {
        if self.card.is_none() {
            return Err(StorageFault::Mount("card not mounted".to_string()));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::host_path(path))
            .map_err(|err| StorageFault::Open {
                path: path.to_string(),
                reason: err.to_string(),
            })?;

        file.write_all(contents.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| StorageFault::Write {
                path: path.to_string(),
                reason: err.to_string(),
            })
    }
}

fn mount_sd_card(host: &'static SdHost) -> anyhow::Result<SdCard> {
    let card = SdCardDriver::new_spi(host, &SdCardConfiguration::new())
        .context("SD card did not answer")?;

    MountedFatfs::mount(Fatfs::new_sdcard(0, card)?, SD_MOUNT_POINT, SD_MAX_OPEN_FILES)
        .context("failed to mount FAT volume")
}

struct EspNowTransport {
    espnow: EspNow<'static>,
}

impl Transport for EspNowTransport {
    fn register_peer(&mut self, peer: &PeerAddress) -> Result<(), TransportFault> {
        let info = PeerInfo {
            peer_addr: peer.octets(),
            channel: 0,
            ifidx: esp_idf_svc::sys::wifi_interface_t_WIFI_IF_STA,
            encrypt: false,
            ..Default::default()
        };

        self.espnow
            .add_peer(info)
            .map_err(|err| TransportFault::PeerRegistration(format!("{peer}: {err}")))
    }

    fn send(&mut self, peer: &PeerAddress, frame: &[u8]) -> Result<(), TransportFault> {
        self.espnow
            .send(peer.octets(), frame)
            .map_err(|err| TransportFault::Send(err.to_string()))
    }
}

/// Retry delay that keeps the task watchdog fed while it waits.
struct WatchdogDelay;

impl Delay for WatchdogDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
        feed_watchdog();
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = build_config();
    let burst = Duration::from_millis(config.burst_duration_ms);

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let mut led = StatusLed::new(peripherals.rmt.channel0, pins.gpio2).unwrap_or_else(|err| {
        warn!("status LED unavailable: {err:#}");
        StatusLed::disabled()
    });
    led.render(Indicator::SolidYellow, 0);

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
    wifi.start().context("failed to start wifi for ESP-NOW")?;
    disable_wifi_power_save();
    info!("station MAC {}", station_mac());

    let (event_tx, event_rx) = mpsc::sync_channel::<RadioEvent>(RADIO_QUEUE_DEPTH);
    let espnow = EspNow::take().context("failed to initialize ESP-NOW")?;
    {
        let event_tx = event_tx.clone();
        espnow.register_recv_cb(move |_info: &ReceiveInfo, data: &[u8]| {
            enqueue(&event_tx, RadioEvent::Frame(data.to_vec()));
        })?;
    }
    espnow.register_send_cb(move |_mac: &[u8], status: SendStatus| {
        enqueue(&event_tx, RadioEvent::SendStatus(matches!(status, SendStatus::SUCCESS)));
    })?;

    let sensors = OneWireSensors::new(pins.gpio4.downgrade())
        .context("failed to initialize one-wire bus")?;

    let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
    let i2c = I2cDriver::new(peripherals.i2c0, pins.gpio21, pins.gpio22, &i2c_config)
        .context("failed to initialize I2C for RTC")?;

    let spi = SpiDriver::new(
        peripherals.spi3,
        pins.gpio18,
        pins.gpio23,
        Some(pins.gpio19),
        &DriverConfig::default().dma(Dma::Auto(4096)),
    )
    .context("failed to initialize SPI bus for SD card")?;
    let sd_host = SdSpiHostDriver::new(
        spi,
        Some(pins.gpio5),
        AnyIOPin::none(),
        AnyIOPin::none(),
        AnyIOPin::none(),
        None,
    )
    .context("failed to attach SD card to SPI bus")?;

    init_watchdog(config.watchdog_timeout_sec)?;
    add_current_task_to_watchdog()?;

    let mut servant = Servant::new(
        config,
        Board {
            sensors,
            clock: Ds3231Clock { i2c },
            storage: SdStorage::new(sd_host),
            transport: EspNowTransport { espnow },
            delay: WatchdogDelay,
        },
    );

    if let Err(err) = servant.boot(monotonic_ms()) {
        error!("boot halted: {err}");
        let indicator = servant.supervise(monotonic_ms());
        led.render(indicator, 0);
        // Stay here on purpose; only a power cycle or reflash leaves this state.
        let _wifi = wifi;
        loop {
            feed_watchdog();
            thread::sleep(Duration::from_secs(1));
        }
    }

    // Keep the radio alive for the program lifetime.
    let _wifi = wifi;
    let mut last_diagnostics_ms = 0_u64;

    loop {
        feed_watchdog();
        drain_radio(&mut servant, &event_rx);

        let now_ms = monotonic_ms();
        let indicator = servant.supervise(now_ms);
        if indicator.is_one_shot() {
            led.play_blocking(indicator, burst);
            feed_watchdog();
        } else {
            led.render(indicator, now_ms);
        }

        if now_ms.saturating_sub(last_diagnostics_ms) >= DIAGNOSTICS_INTERVAL_MS {
            last_diagnostics_ms = now_ms;
            match serde_json::to_string(&servant.diagnostics()) {
                Ok(json) => info!(
                    "GCT{} diagnostics (booted {}, {} LED write failures): {json}",
                    servant.device_id(),
                    servant.boot_time(),
                    led.failed_writes()
                ),
                Err(err) => warn!("failed to serialize diagnostics: {err}"),
            }
        }

        thread::sleep(Duration::from_millis(SUPERVISION_TICK_MS));
    }
}

fn drain_radio<S, C, L, T, D>(servant: &mut Servant<S, C, L, T, D>, events: &Receiver<RadioEvent>)
where
    S: TemperatureSource,
    C: TimeSource,
    L: LogStorage,
    T: Transport,
    D: Delay,
{
    while let Ok(event) = events.try_recv() {
        match event {
            RadioEvent::Frame(bytes) => match servant.handle_datagram(&bytes, monotonic_ms()) {
                Ok(DispatchOutcome::Handled) => {}
                Ok(DispatchOutcome::RestartRequested) => restart(),
                Err(err) => debug!("frame rejected: {err}"),
            },
            RadioEvent::SendStatus(delivered) => servant.on_send_status(delivered),
        }
        feed_watchdog();
    }
}

fn enqueue(events: &SyncSender<RadioEvent>, event: RadioEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("radio queue full; dropping event"),
        Err(TrySendError::Disconnected(_)) => {}
    }
}

fn build_config() -> ServantConfig {
    let mut config = ServantConfig::default();

    match option_env!("GCTID").map(str::parse::<i64>) {
        Some(Ok(id)) if (1..=4).contains(&id) => config.gct_id = id,
        Some(_) => warn!("ignoring invalid GCTID build flag; using GCT{}", config.gct_id),
        None => {}
    }

    if let Some(address) = option_env!("GCT_MASTER_MAC") {
        match address.parse::<PeerAddress>() {
            Ok(address) => config.master_address = address,
            Err(err) => warn!("ignoring GCT_MASTER_MAC build flag: {err}"),
        }
    }

    config.sanitize();
    config
}

fn restart() -> ! {
    warn!("restarting");
    thread::sleep(Duration::from_millis(100));
    unsafe { esp_idf_svc::sys::esp_restart() };
    #[allow(clippy::empty_loop)]
    loop {}
}

fn station_mac() -> PeerAddress {
    let mut mac = [0_u8; 6];
    let rc = unsafe {
        esp_idf_svc::sys::esp_wifi_get_mac(
            esp_idf_svc::sys::wifi_interface_t_WIFI_IF_STA,
            mac.as_mut_ptr(),
        )
    };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("esp_wifi_get_mac failed: esp_err_t={rc}");
    }
    PeerAddress(mac)
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let mut rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        // Already started by the bootloader config; apply our timeout instead.
        rc = unsafe { esp_idf_svc::sys::esp_task_wdt_reconfigure(&config) };
    }
    if rc == esp_idf_svc::sys::ESP_OK {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
