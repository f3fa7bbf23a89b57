//! Minimal master stand-in for the host build.
//!
//! ```text
//! master-probe <servant-addr> [ping|start|stop|temp|reset|raw:<code>]...
//! ```
//!
//! Sends each command as an action frame, then prints whatever the servant
//! answers within `GCT_PROBE_WAIT_MS` (default 500 ms).

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    probe::run().await
}

#[cfg(feature = "esp32")]
fn main() {}

#[cfg(not(feature = "esp32"))]
mod probe {
    use std::time::Duration;

    use anyhow::{anyhow, bail, Context};
    use tokio::net::UdpSocket;
    use tracing::{info, warn};

    use gct_common::{Action, ActionFrame, TemperatureFrame, TEMPERATURE_FRAME_LEN};

    pub async fn run() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();

        let mut args = std::env::args().skip(1);
        let servant = args
            .next()
            .ok_or_else(|| anyhow!("usage: master-probe <servant-addr> [command]..."))?;
        let bind = std::env::var("GCT_PROBE_BIND").unwrap_or_else(|_| "0.0.0.0:4211".to_string());
        let wait_ms = std::env::var("GCT_PROBE_WAIT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(500);

        let socket = UdpSocket::bind(&bind)
            .await
            .with_context(|| format!("failed to bind {bind}"))?;

        for command in args {
            let frame = parse_command(&command)?;
            socket
                .send_to(&frame.encode(), servant.as_str())
                .await
                .with_context(|| format!("failed to send `{command}` to {servant}"))?;
            info!("sent {command} (code {})", frame.code);

            drain_replies(&socket, Duration::from_millis(wait_ms)).await;
        }

        Ok(())
    }

    fn parse_command(command: &str) -> anyhow::Result<ActionFrame> {
        let action = match command {
            "ping" => Action::ConnectionTest,
            "start" => Action::StartLogging,
            "stop" => Action::StopLogging,
            "temp" => Action::TempRequest,
            "reset" => Action::HardReset,
            other => {
                let Some(code) = other.strip_prefix("raw:") else {
                    bail!("unknown command `{other}`");
                };
                let code = code.parse().context("raw action code must be an integer")?;
                return Ok(ActionFrame { code, value: 0.0 });
            }
        };
        Ok(ActionFrame::new(action, 0.0))
    }

    async fn drain_replies(socket: &UdpSocket, wait: Duration) {
        let mut buf = [0_u8; 256];
        while let Ok(result) = tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            match result {
                Ok((len, from)) if len == TEMPERATURE_FRAME_LEN => {
                    match TemperatureFrame::decode(&buf[..len]) {
                        Ok(frame) => {
                            let values: Vec<String> =
                                frame.sens.iter().map(|value| format!("{value:.2}")).collect();
                            println!("{from} temperatures: [{}]", values.join(", "));
                        }
                        Err(err) => warn!("bad temperature frame from {from}: {err}"),
                    }
                }
                Ok((len, from)) => warn!("unexpected {len} byte datagram from {from}"),
                Err(err) => {
                    warn!("receive failed: {err}");
                    break;
                }
            }
        }
    }
}
