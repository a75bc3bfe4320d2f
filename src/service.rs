//! Supervised conversion-service child process.
//!
//! Every worker process owns exactly one [`ConversionService`]: it is
//! spawned on the worker's port pair, polled until it accepts TCP
//! connections, and killed when the worker is done. The child is also
//! marked `kill_on_drop`, so an early return or panic in the worker never
//! leaves an orphaned service holding the ports.

use crate::error::SynthError;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const LOOPBACK: &str = "127.0.0.1";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A running conversion service bound to `127.0.0.1:<port>`.
#[derive(Debug)]
pub struct ConversionService {
    child: Child,
    port: u16,
}

impl ConversionService {
    /// Spawn `command --port <port> --uno-port <uno_port> --interface 127.0.0.1`
    /// and wait until the RPC port accepts connections.
    ///
    /// Fails with [`SynthError::ServiceStart`] when the program cannot be
    /// launched or exits during startup, and with
    /// [`SynthError::ServiceUnhealthy`] when the port stays closed for
    /// `startup_timeout_secs`.
    pub async fn start(
        command: &[String],
        port: u16,
        uno_port: u16,
        startup_timeout_secs: u64,
    ) -> Result<Self, SynthError> {
        let (program, args) = command.split_first().ok_or_else(|| SynthError::ServiceStart {
            port,
            detail: "empty service command".into(),
        })?;

        let child = Command::new(program)
            .args(args)
            .arg("--port")
            .arg(port.to_string())
            .arg("--uno-port")
            .arg(uno_port.to_string())
            .arg("--interface")
            .arg(LOOPBACK)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthError::ServiceStart {
                port,
                detail: format!("{program}: {e}"),
            })?;

        let mut service = Self { child, port };
        info!(
            "Started conversion service (pid {:?}) on ports {}/{}",
            service.child.id(),
            port,
            uno_port
        );
        service.wait_healthy(startup_timeout_secs).await?;
        Ok(service)
    }

    async fn wait_healthy(&mut self, timeout_secs: u64) -> Result<(), SynthError> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let mut delay = Duration::from_millis(100);
        loop {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(SynthError::ServiceStart {
                    port: self.port,
                    detail: format!("service exited during startup ({status})"),
                });
            }
            if is_listening(self.port).await {
                debug!("Conversion service on port {} is accepting connections", self.port);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SynthError::ServiceUnhealthy {
                    port: self.port,
                    secs: timeout_secs,
                });
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(2));
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Kill the service and reap it.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Conversion service on port {} already gone: {e}", self.port);
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Conversion service on port {} exited ({status})", self.port),
            Ok(Err(e)) => warn!("Failed to reap conversion service on port {}: {e}", self.port),
            Err(_) => warn!(
                "Conversion service on port {} did not exit within {}s",
                self.port,
                SHUTDOWN_GRACE.as_secs()
            ),
        }
    }
}

/// Whether something accepts TCP connections on `127.0.0.1:<port>`.
pub async fn is_listening(port: u16) -> bool {
    TcpStream::connect((LOOPBACK, port)).await.is_ok()
}
