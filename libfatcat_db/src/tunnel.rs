use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use super::config::SshConfig;
use super::error::TunnelError;

/// How long to wait for the forwarded port to accept connections
pub const OPEN_TIMEOUT_SECS: u64 = 15;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Arguments handed to `ssh` to forward `local_port` to `remote_host:remote_port`
pub fn forward_args(config: &SshConfig, remote_host: &str, remote_port: u16) -> Vec<String> {
    vec![
        String::from("-N"),
        String::from("-L"),
        format!("{}:{}:{}", config.local_port, remote_host, remote_port),
        String::from("-p"),
        config.port.to_string(),
        String::from("-i"),
        config.key_path.to_string_lossy().to_string(),
        String::from("-o"),
        String::from("ExitOnForwardFailure=yes"),
        String::from("-o"),
        String::from("BatchMode=yes"),
        config.destination(),
    ]
}

/// A running `ssh -N -L` port forwarder. Dropping it stops the forwarder.
#[derive(Debug)]
pub struct SshTunnel {
    child: Child,
    local_port: u16,
}

impl SshTunnel {
    /// Spawn the forwarder and block until the local port answers
    pub fn open(config: &SshConfig, remote_host: &str, remote_port: u16) -> Result<Self, TunnelError> {
        log::info!(
            "Opening ssh tunnel localhost:{} -> {}:{} via {}",
            config.local_port,
            remote_host,
            remote_port,
            config.destination()
        );
        let child = Command::new("ssh")
            .args(forward_args(config, remote_host, remote_port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;
        let mut tunnel = Self {
            child,
            local_port: config.local_port,
        };

        let started = Instant::now();
        loop {
            if let Some(status) = tunnel.child.try_wait()? {
                return Err(TunnelError::ExitedEarly(status));
            }
            if TcpStream::connect(("127.0.0.1", tunnel.local_port)).is_ok() {
                log::info!("ssh tunnel is up on localhost:{}", tunnel.local_port);
                return Ok(tunnel);
            }
            if started.elapsed() > Duration::from_secs(OPEN_TIMEOUT_SECS) {
                return Err(TunnelError::Timeout(tunnel.local_port, OPEN_TIMEOUT_SECS));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("ssh tunnel already stopped: {e}");
        }
        let _ = self.child.wait();
        log::debug!("Closed ssh tunnel on localhost:{}", self.local_port);
    }
}
