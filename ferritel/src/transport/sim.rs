//! In-process device simulation.
//!
//! [`SimulatedNetwork`] is a [`Connector`] whose hosts are
//! [`SimulatedDevice`]s: small Cisco-style state machines with a login
//! sequence, `>`/`#` prompts, `enable`, and canned command output.
//! [`ScriptedTransport`] instead replays a fixed list of chunks, which is
//! what timing and desynchronisation tests need.
//!
//! Everything that happens is recorded in a shared [`SimulationLog`] so
//! tests can check which credentials were tried and that every connection
//! was closed.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::config::TransportConfig;
use super::{Connector, Transport};
use crate::error::{Result, TransportError};

/// Something that happened on the simulated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A connection was accepted.
    Connected { host: String },
    /// A connection was refused.
    Refused { host: String },
    /// A login attempt finished.
    Login {
        host: String,
        username: String,
        accepted: bool,
    },
    /// A line was received at an exec prompt.
    Command { host: String, line: String },
    /// The client closed its side of a connection.
    Closed { host: String },
}

/// Shared, append-only record of simulation events.
#[derive(Debug, Default)]
pub struct SimulationLog {
    events: Mutex<Vec<SimEvent>>,
}

impl SimulationLog {
    fn push(&self, event: SimEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// All events so far, in order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Usernames tried against `host`, in order.
    pub fn login_attempts(&self, host: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::Login { host: h, username, .. } if h == host => Some(username),
                _ => None,
            })
            .collect()
    }

    /// Lines received at exec prompts on `host`, in order.
    pub fn commands(&self, host: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::Command { host: h, line } if h == host => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Number of accepted connections to `host`.
    pub fn connections(&self, host: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SimEvent::Connected { host: h } if h == host))
            .count()
    }

    /// Whether every accepted connection was closed by the client.
    pub fn all_closed(&self) -> bool {
        let events = self.events();
        let opened = events
            .iter()
            .filter(|e| matches!(e, SimEvent::Connected { .. }))
            .count();
        let closed = events
            .iter()
            .filter(|e| matches!(e, SimEvent::Closed { .. }))
            .count();
        opened == closed
    }
}

/// A simulated Cisco-style device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    hostname: String,
    banner: String,
    accounts: Vec<(String, String)>,
    line_password: Option<String>,
    enable_secret: Option<String>,
    privileged_login: bool,
    responses: HashMap<String, String>,
    chunk_size: Option<usize>,
    silent: bool,
    reachable: bool,
}

impl SimulatedDevice {
    /// Create a device that prompts as `hostname`.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            banner: String::new(),
            accounts: Vec::new(),
            line_password: None,
            enable_secret: None,
            privileged_login: false,
            responses: HashMap::new(),
            chunk_size: None,
            silent: false,
            reachable: true,
        }
    }

    /// Accept this username/password pair.
    pub fn with_account(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.accounts.push((username.into(), password.into()));
        self
    }

    /// Ask only for a password (vty line password login).
    pub fn with_line_password(mut self, password: impl Into<String>) -> Self {
        self.line_password = Some(password.into());
        self
    }

    /// Require this secret for `enable`.
    pub fn with_enable_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_secret = Some(secret.into());
        self
    }

    /// Land at the privileged prompt right after login.
    pub fn with_privileged_login(mut self) -> Self {
        self.privileged_login = true;
        self
    }

    /// Text shown before the login cue.
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Output printed for `command` (between the echo and the prompt).
    pub fn with_response(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.responses.insert(command.into(), output.into());
        self
    }

    /// Deliver output in reads of at most `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Accept the connection but never show a prompt.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Refuse connections.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// The device hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// A set of simulated devices keyed by address.
#[derive(Debug, Clone, Default)]
pub struct SimulatedNetwork {
    devices: HashMap<String, SimulatedDevice>,
    log: Arc<SimulationLog>,
}

impl SimulatedNetwork {
    /// Create an empty network. Unknown addresses refuse connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `device` at `address`.
    pub fn with_device(mut self, address: impl Into<String>, device: SimulatedDevice) -> Self {
        self.devices.insert(address.into(), device);
        self
    }

    /// The shared event log.
    pub fn log(&self) -> Arc<SimulationLog> {
        self.log.clone()
    }
}

impl Connector for SimulatedNetwork {
    type Transport = SimulatedConnection;

    async fn open(&self, config: &TransportConfig) -> Result<Self::Transport> {
        match self.devices.get(&config.host) {
            Some(device) if device.reachable => {
                self.log.push(SimEvent::Connected {
                    host: config.host.clone(),
                });
                Ok(SimulatedConnection::new(
                    config.host.clone(),
                    device.clone(),
                    self.log.clone(),
                ))
            }
            _ => {
                self.log.push(SimEvent::Refused {
                    host: config.host.clone(),
                });
                Err(TransportError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                }
                .into())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DeviceState {
    Username,
    Password { username: Option<String> },
    Exec { privileged: bool },
    EnablePassword { attempts: u8 },
    Hangup,
}

/// One open connection to a [`SimulatedDevice`].
#[derive(Debug)]
pub struct SimulatedConnection {
    host: String,
    device: SimulatedDevice,
    log: Arc<SimulationLog>,
    state: DeviceState,
    pending: VecDeque<u8>,
    line: Vec<u8>,
    login_failures: u8,
    open: bool,
}

impl SimulatedConnection {
    fn new(host: String, device: SimulatedDevice, log: Arc<SimulationLog>) -> Self {
        let mut conn = Self {
            host,
            state: DeviceState::Username,
            pending: VecDeque::new(),
            line: Vec::new(),
            login_failures: 0,
            open: true,
            device,
            log,
        };

        let banner = conn.device.banner.clone();
        conn.emit(&banner);
        if !conn.device.silent {
            conn.emit("\r\n\r\nUser Access Verification\r\n\r\n");
            conn.login_cue();
        }
        conn
    }

    fn emit(&mut self, text: &str) {
        self.pending.extend(text.bytes());
    }

    fn prompt(&mut self, privileged: bool) {
        let prompt = format!(
            "{}{}",
            self.device.hostname,
            if privileged { '#' } else { '>' }
        );
        self.emit(&prompt);
    }

    fn login_cue(&mut self) {
        if self.device.line_password.is_some() {
            self.state = DeviceState::Password { username: None };
            self.emit("Password: ");
        } else {
            self.state = DeviceState::Username;
            self.emit("Username: ");
        }
    }

    fn handle_line(&mut self, line: &str) {
        match self.state.clone() {
            DeviceState::Username => {
                self.emit(&format!("{line}\r\n"));
                self.emit("Password: ");
                self.state = DeviceState::Password {
                    username: Some(line.to_string()),
                };
            }
            DeviceState::Password { username } => {
                let accepted = match &username {
                    Some(user) => self
                        .device
                        .accounts
                        .iter()
                        .any(|(u, p)| u == user && p == line),
                    None => self.device.line_password.as_deref() == Some(line),
                };
                self.log.push(SimEvent::Login {
                    host: self.host.clone(),
                    username: username.unwrap_or_default(),
                    accepted,
                });

                if accepted {
                    let privileged = self.device.privileged_login;
                    self.emit("\r\n");
                    self.prompt(privileged);
                    self.state = DeviceState::Exec { privileged };
                } else {
                    self.login_failures += 1;
                    self.emit("\r\n% Login invalid\r\n\r\n");
                    if self.login_failures >= 3 {
                        self.state = DeviceState::Hangup;
                    } else {
                        self.login_cue();
                    }
                }
            }
            DeviceState::Exec { privileged } => {
                self.emit(&format!("{line}\r\n"));
                self.log.push(SimEvent::Command {
                    host: self.host.clone(),
                    line: line.to_string(),
                });
                self.exec(line.trim(), privileged);
            }
            DeviceState::EnablePassword { attempts } => {
                if self.device.enable_secret.as_deref() == Some(line) {
                    self.emit("\r\n");
                    self.prompt(true);
                    self.state = DeviceState::Exec { privileged: true };
                } else if attempts + 1 >= 3 {
                    self.emit("\r\n% Bad secrets\r\n\r\n");
                    self.prompt(false);
                    self.state = DeviceState::Exec { privileged: false };
                } else {
                    self.emit("\r\nPassword: ");
                    self.state = DeviceState::EnablePassword {
                        attempts: attempts + 1,
                    };
                }
            }
            DeviceState::Hangup => {}
        }
    }

    fn exec(&mut self, command: &str, privileged: bool) {
        match command {
            "enable" if !privileged => {
                if self.device.enable_secret.is_some() {
                    self.emit("Password: ");
                    self.state = DeviceState::EnablePassword { attempts: 0 };
                } else {
                    self.emit("% No password set\r\n");
                    self.prompt(false);
                }
            }
            "disable" => {
                self.state = DeviceState::Exec { privileged: false };
                self.prompt(false);
            }
            "exit" | "logout" | "quit" => {
                self.state = DeviceState::Hangup;
            }
            "" | "enable" | "terminal length 0" => self.prompt(privileged),
            _ => {
                let output = self.device.responses.get(command).cloned().unwrap_or_else(|| {
                    "              ^\r\n% Invalid input detected at '^' marker.\r\n\r\n"
                        .to_string()
                });
                self.emit(&output);
                self.prompt(privileged);
            }
        }
    }
}

impl Transport for SimulatedConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(TransportError::Disconnected.into());
        }
        if self.device.silent {
            return Ok(());
        }

        for &byte in data {
            match byte {
                b'\n' => {
                    let line = std::mem::take(&mut self.line);
                    let line: String = line.iter().map(|&b| char::from(b)).collect();
                    self.handle_line(line.trim_end_matches('\r'));
                }
                _ => self.line.push(byte),
            }
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if !self.open {
            return Err(TransportError::Disconnected.into());
        }

        if !self.pending.is_empty() {
            let n = self
                .device
                .chunk_size
                .unwrap_or(self.pending.len())
                .min(self.pending.len());
            return Ok(self.pending.drain(..n).collect());
        }

        if self.state == DeviceState::Hangup {
            return Err(TransportError::Disconnected.into());
        }

        tokio::time::sleep(timeout).await;
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.log.push(SimEvent::Closed {
                host: self.host.clone(),
            });
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Sends and close state of a [`ScriptedTransport`], shared with the test.
#[derive(Debug, Default)]
pub struct ScriptRecorder {
    sent: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl ScriptRecorder {
    /// Everything sent, one entry per send call, Latin-1 decoded.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the transport was closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transport that replays fixed chunks, one per read, regardless of input.
///
/// Once the chunks run out it stays silent (each read waits the full
/// timeout) unless [`then_disconnect`](Self::then_disconnect) was set.
#[derive(Debug)]
pub struct ScriptedTransport {
    chunks: VecDeque<Vec<u8>>,
    disconnect_at_end: bool,
    open: bool,
    recorder: Arc<ScriptRecorder>,
}

impl ScriptedTransport {
    /// Create a transport that yields `chunks` in order.
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            disconnect_at_end: false,
            open: true,
            recorder: Arc::new(ScriptRecorder::default()),
        }
    }

    /// Report EOF once the chunks are used up.
    pub fn then_disconnect(mut self) -> Self {
        self.disconnect_at_end = true;
        self
    }

    /// Handle for inspecting sends and close state later.
    pub fn recorder(&self) -> Arc<ScriptRecorder> {
        self.recorder.clone()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(TransportError::Disconnected.into());
        }
        self.recorder
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.iter().map(|&b| char::from(b)).collect());
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if !self.open {
            return Err(TransportError::Disconnected.into());
        }
        match self.chunks.pop_front() {
            Some(chunk) => Ok(chunk),
            None if self.disconnect_at_end => Err(TransportError::Disconnected.into()),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        *self.recorder.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Connector that hands out one [`ScriptedTransport`] per open, all
/// replaying the same chunks and sharing one recorder.
#[derive(Debug)]
pub struct ScriptedConnector {
    chunks: Vec<String>,
    disconnect_at_end: bool,
    recorder: Arc<ScriptRecorder>,
}

impl ScriptedConnector {
    /// Create a connector replaying `chunks` on every connection.
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            disconnect_at_end: false,
            recorder: Arc::new(ScriptRecorder::default()),
        }
    }

    /// Report EOF once the chunks are used up.
    pub fn then_disconnect(mut self) -> Self {
        self.disconnect_at_end = true;
        self
    }

    /// Shared recorder for every transport this connector opens.
    pub fn recorder(&self) -> Arc<ScriptRecorder> {
        self.recorder.clone()
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn open(&self, _config: &TransportConfig) -> Result<Self::Transport> {
        let chunks: Vec<&str> = self.chunks.iter().map(String::as_str).collect();
        let mut transport = ScriptedTransport::new(&chunks);
        transport.disconnect_at_end = self.disconnect_at_end;
        transport.recorder = self.recorder.clone();
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(conn: &mut SimulatedConnection) -> String {
        let data = conn.receive(Duration::from_millis(1)).await.unwrap();
        String::from_utf8(data).unwrap()
    }

    fn config(host: &str) -> TransportConfig {
        TransportConfig::new(host)
    }

    #[tokio::test]
    async fn test_login_and_command() {
        let network = SimulatedNetwork::new().with_device(
            "10.0.0.1",
            SimulatedDevice::new("sw1")
                .with_account("admin", "pw")
                .with_response("show clock", "12:00:00 UTC\r\n"),
        );
        let log = network.log();
        let mut conn = network.open(&config("10.0.0.1")).await.unwrap();

        assert!(read_all(&mut conn).await.ends_with("Username: "));
        conn.send(b"admin\n").await.unwrap();
        assert_eq!(read_all(&mut conn).await, "admin\r\nPassword: ");
        conn.send(b"pw\n").await.unwrap();
        assert_eq!(read_all(&mut conn).await, "\r\nsw1>");
        conn.send(b"show clock\n").await.unwrap();
        assert_eq!(read_all(&mut conn).await, "show clock\r\n12:00:00 UTC\r\nsw1>");

        conn.close().await.unwrap();
        assert_eq!(log.login_attempts("10.0.0.1"), vec!["admin"]);
        assert_eq!(log.commands("10.0.0.1"), vec!["show clock"]);
        assert!(log.all_closed());
    }

    #[tokio::test]
    async fn test_rejected_login_reprompts() {
        let network = SimulatedNetwork::new()
            .with_device("r1", SimulatedDevice::new("r1").with_account("bill", "pw2"));
        let mut conn = network.open(&config("r1")).await.unwrap();

        read_all(&mut conn).await;
        conn.send(b"dave\npw1\n").await.unwrap();
        assert!(read_all(&mut conn).await.ends_with("% Login invalid\r\n\r\nUsername: "));
    }

    #[tokio::test]
    async fn test_unknown_host_is_refused() {
        let network = SimulatedNetwork::new();
        let err = network.open(&config("192.0.2.1")).await.unwrap_err();
        assert!(err.is_connect_error());
    }

    #[tokio::test]
    async fn test_chunked_output() {
        let network = SimulatedNetwork::new()
            .with_device("r1", SimulatedDevice::new("r1").with_chunk_size(4));
        let mut conn = network.open(&config("r1")).await.unwrap();
        assert_eq!(read_all(&mut conn).await.len(), 4);
    }
}
