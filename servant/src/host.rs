use std::{
    convert::TryInto,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Local, NaiveDateTime};
use tokio::{net::UdpSocket, sync::mpsc};
use tracing::{debug, error, info, warn};

use gct_common::{
    types::TEMP_DISCONNECTED, Board, ClockFault, Delay, DeviceId, DispatchOutcome, Indicator,
    LogStorage, PeerAddress, SensorFault, Servant, ServantConfig, StorageFault,
    TemperatureSource, TimeSource, Transport, TransportFault, NUM_SENSORS,
};

const SUPERVISION_TICK_MS: u64 = 100;
const DIAGNOSTICS_INTERVAL_MS: u64 = 60_000;
const MAX_DATAGRAM: usize = 250;

type HostServant = Servant<SimulatedSensors, SystemClock, DirStorage, UdpTransport, ThreadDelay>;

enum LoopExit {
    Restart,
    Shutdown,
}

struct SimulatedSensors {
    tick: u64,
    dead_channels: Vec<usize>,
}

impl TemperatureSource for SimulatedSensors {
    fn channel_count(&self) -> usize {
        NUM_SENSORS
    }

    fn request_conversion(&mut self) -> Result<(), SensorFault> {
        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }

    fn read_celsius(&mut self, channel: usize) -> Result<f32, SensorFault> {
        if self.dead_channels.contains(&channel) {
            return Ok(TEMP_DISCONNECTED);
        }
        // Slow drift per channel so successive frames differ.
        let drift = (self.tick % 16) as f32 * 0.0625;
        Ok(18.0 + channel as f32 * 0.5 + drift)
    }
}

#[derive(Clone, Copy)]
enum ClockMode {
    System,
    Absent,
    Unreliable,
}

struct SystemClock {
    mode: ClockMode,
}

impl TimeSource for SystemClock {
    fn now(&mut self) -> Result<NaiveDateTime, ClockFault> {
        match self.mode {
            ClockMode::System => Ok(Local::now().naive_local()),
            ClockMode::Absent => Err(ClockFault::Absent),
            ClockMode::Unreliable => Err(ClockFault::Unreliable),
        }
    }
}

/// Stands in for the SD card: log paths are resolved under `root`.
struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl LogStorage for DirStorage {
    fn mount(&mut self) -> Result<(), StorageFault> {
        fs::create_dir_all(&self.root)
            .map_err(|err| StorageFault::Mount(format!("{}: {err}", self.root.display())))
    }

    fn file_len(&mut self, path: &str) -> Result<u64, StorageFault> {
        match fs::metadata(self.resolve(path)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(StorageFault::Open {
                path: path.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn append(&mut self, path: &str, contents: &str) -> Result<(), StorageFault> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(path))
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

/// UDP stand-in for the ESP-NOW link. The registered master peer maps to
/// one socket address; a successful `send_to` counts as delivered.
struct UdpTransport {
    socket: Arc<UdpSocket>,
    master_addr: SocketAddr,
    master_peer: Option<PeerAddress>,
    send_status: Vec<bool>,
}

impl UdpTransport {
    fn take_send_status(&mut self) -> Vec<bool> {
        std::mem::take(&mut self.send_status)
    }
}

impl Transport for UdpTransport {
    fn register_peer(&mut self, peer: &PeerAddress) -> Result<(), TransportFault> {
        info!("master {peer} mapped to udp://{}", self.master_addr);
        self.master_peer = Some(*peer);
        Ok(())
    }

    fn send(&mut self, peer: &PeerAddress, frame: &[u8]) -> Result<(), TransportFault> {
        if self.master_peer != Some(*peer) {
            return Err(TransportFault::Send(format!("peer {peer} is not registered")));
        }

        send_outcome(self.socket.try_send_to(frame, self.master_addr))?;
        self.send_status.push(true);
        Ok(())
    }
}

/// A datagram the socket could not queue was dropped, so it is a failed send.
fn send_outcome(result: std::io::Result<usize>) -> Result<(), TransportFault> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Err(TransportFault::Send(
            "socket send buffer full; datagram dropped".to_string(),
        )),
        Err(err) => Err(TransportFault::Send(err.to_string())),
    }
}

struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;

    let bind_addr = std::env::var("GCT_BIND").unwrap_or_else(|_| "0.0.0.0:4210".to_string());
    let master_addr: SocketAddr = std::env::var("GCT_MASTER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:4211".to_string())
        .parse()
        .context("GCT_MASTER_ADDR must be a socket address")?;
    let data_dir =
        PathBuf::from(std::env::var("GCT_DATA_DIR").unwrap_or_else(|_| "sdcard".to_string()));
    let dead_channels = parse_dead_channels()?;
    let clock_mode = match std::env::var("GCT_RTC").as_deref() {
        Ok("absent") => ClockMode::Absent,
        Ok("unreliable") => ClockMode::Unreliable,
        _ => ClockMode::System,
    };

    let socket = Arc::new(
        UdpSocket::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind radio socket on {bind_addr}"))?,
    );
    info!("servant radio listening on udp://{bind_addr}");

    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(32);
    {
        let socket = socket.clone();
        tokio::spawn(async move {
            let mut buf = [0_u8; MAX_DATAGRAM];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        debug!("{len} byte datagram from {from}");
                        if frame_tx.send(buf[..len].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("radio receive error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let started = Instant::now();

    loop {
        let board = Board {
            sensors: SimulatedSensors {
                tick: 0,
                dead_channels: dead_channels.clone(),
            },
            clock: SystemClock { mode: clock_mode },
            storage: DirStorage {
                root: data_dir.clone(),
            },
            transport: UdpTransport {
                socket: socket.clone(),
                master_addr,
                master_peer: None,
                send_status: Vec::new(),
            },
            delay: ThreadDelay,
        };
        let mut servant = Servant::new(config.clone(), board);
        servant.supervise(monotonic_ms(started));

        let booted = tokio::task::block_in_place(|| servant.boot(monotonic_ms(started)));
        if let Err(err) = booted {
            error!("boot halted: {err}");
            servant.supervise(monotonic_ms(started));
            tokio::signal::ctrl_c()
                .await
                .context("failed to wait for shutdown signal")?;
            return Ok(());
        }

        match supervise(&mut servant, &mut frame_rx, started).await? {
            LoopExit::Restart => {
                warn!("restarting servant");
                while frame_rx.try_recv().is_ok() {}
            }
            LoopExit::Shutdown => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn supervise(
    servant: &mut HostServant,
    frame_rx: &mut mpsc::Receiver<Vec<u8>>,
    started: Instant,
) -> anyhow::Result<LoopExit> {
    let mut interval = tokio::time::interval(Duration::from_millis(SUPERVISION_TICK_MS));
    let mut last_diagnostics_ms = 0_u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for shutdown signal")?;
                return Ok(LoopExit::Shutdown);
            }
        }

        while let Ok(bytes) = frame_rx.try_recv() {
            let now_ms = monotonic_ms(started);
            let outcome = tokio::task::block_in_place(|| servant.handle_datagram(&bytes, now_ms));

            for delivered in servant.board_mut().transport.take_send_status() {
                servant.on_send_status(delivered);
            }

            match outcome {
                Ok(DispatchOutcome::Handled) => {}
                Ok(DispatchOutcome::RestartRequested) => return Ok(LoopExit::Restart),
                Err(err) => debug!("frame rejected: {err}"),
            }
        }

        let now_ms = monotonic_ms(started);
        let indicator = servant.supervise(now_ms);
        if indicator == Indicator::FastRedBurst {
            let burst = Duration::from_millis(servant.config().burst_duration_ms);
            tokio::task::block_in_place(|| thread::sleep(burst));
        }

        if now_ms.saturating_sub(last_diagnostics_ms) >= DIAGNOSTICS_INTERVAL_MS {
            last_diagnostics_ms = now_ms;
            info!(
                "GCT{} diagnostics (booted {}): {}",
                servant.device_id(),
                servant.boot_time(),
                serde_json::to_string(&servant.diagnostics())?
            );
        }
    }
}

fn load_config() -> anyhow::Result<ServantConfig> {
    let mut config = match std::env::var("GCT_CONFIG") {
        Ok(path) => {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            ServantConfig::from_json(&json).with_context(|| format!("invalid config file {path}"))?
        }
        Err(_) => ServantConfig::default(),
    };

    if let Ok(value) = std::env::var("GCT_ID") {
        let id: i64 = value.parse().context("GCT_ID must be an integer")?;
        config.gct_id = i64::from(DeviceId::new(id)?.get());
    }

    if let Ok(value) = std::env::var("GCT_MASTER_MAC") {
        config.master_address = value
            .parse::<PeerAddress>()
            .map_err(|err| anyhow!(err))
            .context("GCT_MASTER_MAC must look like AA:BB:CC:DD:EE:FF")?;
    }

    config.sanitize();
    Ok(config)
}

fn parse_dead_channels() -> anyhow::Result<Vec<usize>> {
    let Ok(value) = std::env::var("GCT_DEAD_CHANNELS") else {
        return Ok(Vec::new());
    };

    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid channel `{part}` in GCT_DEAD_CHANNELS"))
        })
        .collect()
}

fn monotonic_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use pretty_assertions::assert_eq;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("gct-servant-{name}-{nanos}"))
    }

    #[test]
    fn dir_storage_appends_under_root() {
        let root = scratch_dir("append");
        let mut storage = DirStorage { root: root.clone() };

        storage.mount().unwrap();
        assert_eq!(storage.file_len("/data_GCT2.csv").unwrap(), 0);

        storage.append("/data_GCT2.csv", "a\n").unwrap();
        storage.append("/data_GCT2.csv", "b\n").unwrap();

        assert_eq!(storage.file_len("/data_GCT2.csv").unwrap(), 4);
        assert_eq!(
            fs::read_to_string(root.join("data_GCT2.csv")).unwrap(),
            "a\nb\n"
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn full_send_buffer_is_a_failed_send() {
        let full = send_outcome(Err(std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(matches!(full, Err(TransportFault::Send(_))));

        let refused = send_outcome(Err(std::io::Error::from(ErrorKind::ConnectionRefused)));
        assert!(matches!(refused, Err(TransportFault::Send(_))));

        assert_eq!(send_outcome(Ok(8)), Ok(()));
    }

    #[test]
    fn dead_channels_read_disconnected() {
        let mut sensors = SimulatedSensors {
            tick: 0,
            dead_channels: vec![4],
        };
        sensors.request_conversion().unwrap();

        assert_eq!(sensors.read_celsius(4).unwrap(), TEMP_DISCONNECTED);
        assert!(gct_common::types::is_valid_temperature(
            sensors.read_celsius(0).unwrap()
        ));
    }
}
