//! Device session state machine.
//!
//! A [`Session`] drives one Telnet login from connect to close:
//!
//! ```text
//! Connecting ─► Authenticating ─┬─► AuthFailed
//!     │                         └─► Authenticated ─┬─► Elevating ─┬─► Elevated
//!     ▼                                            │              └─► ElevationFailed
//! Unreachable                                      └─► ElevationSkipped
//!                  ... ─► Executing(0..n) ─► Disconnecting ─► Closed
//! ```
//!
//! Only one command is ever outstanding. Every state visited is kept in
//! [`Session::history`].

mod attempt;
mod output;

pub use attempt::{AttemptPlan, AttemptResult, SessionSummary, run_attempt};
pub use output::{CapturedOutput, OutputKey, Response};

use std::time::Instant;

use log::{debug, warn};
use secrecy::SecretString;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::channel::prompt::{hostname_from_prompt, last_nonempty_line};
use crate::channel::{DetectContext, DeviceChannel, PromptState, decode_latin1};
use crate::config::{Credential, SessionConfig, Target};
use crate::error::{ChannelError, Result, SessionError};
use crate::transport::{Connector, Transport};

/// Empty lines sent to get back to a prompt after a rejected enable secret.
const ENABLE_RECOVERY_ATTEMPTS: usize = 3;

/// Privilege of the current prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeMode {
    /// `>` prompt.
    Unprivileged,
    /// `#` prompt.
    Privileged,
}

impl PrivilegeMode {
    fn from_prompt_state(state: PromptState) -> Option<Self> {
        match state {
            PromptState::UnprivilegedPrompt => Some(Self::Unprivileged),
            PromptState::PrivilegedPrompt => Some(Self::Privileged),
            _ => None,
        }
    }
}

/// How privilege elevation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationStatus {
    /// `enable` succeeded.
    Elevated,
    /// Login already landed at a privileged prompt.
    AlreadyPrivileged,
    /// No secret configured or elevation disabled.
    Skipped,
    /// The secret was rejected; commands run unprivileged.
    Failed,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Unreachable,
    Authenticating { username: String },
    AuthFailed,
    Authenticated(PrivilegeMode),
    Elevating,
    Elevated,
    ElevationFailed,
    ElevationSkipped,
    Executing(usize),
    Disconnecting,
    Closed,
}

/// One login-through-logout interaction with one device.
pub struct Session<T: Transport> {
    target: Target,
    config: SessionConfig,
    cancel: CancellationToken,

    /// Open channel (None before connect and after close).
    channel: Option<DeviceChannel<T>>,

    state: SessionState,
    history: Vec<SessionState>,

    mode: Option<PrivilegeMode>,
    prompt: String,
    hostname: Option<String>,
    username: Option<String>,
    output: CapturedOutput,
}

impl<T: Transport> Session<T> {
    /// Create a session for `target`. Nothing is opened yet.
    pub fn new(target: Target, config: SessionConfig, cancel: CancellationToken) -> Self {
        Self {
            target,
            config,
            cancel,
            channel: None,
            state: SessionState::Connecting,
            history: vec![SessionState::Connecting],
            mode: None,
            prompt: String::new(),
            hostname: None,
            username: None,
            output: CapturedOutput::new(),
        }
    }

    /// Open the transport.
    ///
    /// On failure the session ends in [`SessionState::Unreachable`]. A
    /// connect aborted through the cancellation token leaves the state
    /// untouched.
    pub async fn connect<C>(&mut self, connector: &C) -> Result<()>
    where
        C: Connector<Transport = T>,
    {
        if self.state != SessionState::Connecting {
            return Err(SessionError::AlreadyClosed.into());
        }

        let transport_config = self.config.transport_config(&self.target);
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChannelError::Cancelled.into()),
            opened = connector.open(&transport_config) => opened,
        };

        match opened {
            Ok(transport) => {
                self.channel = Some(DeviceChannel::new(
                    transport,
                    self.config.channel_config(),
                ));
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                debug!("session {}: connect cancelled", self.target);
                Err(e)
            }
            Err(e) => {
                debug!("session {}: connect failed: {}", self.target, e);
                self.transition(SessionState::Unreachable);
                Err(e)
            }
        }
    }

    /// Log in with `credential`.
    ///
    /// A second login cue after the password was sent means the device
    /// rejected the pair: the session moves to [`SessionState::AuthFailed`]
    /// and [`SessionError::AuthFailed`] is returned.
    pub async fn authenticate(&mut self, credential: &Credential) -> Result<PrivilegeMode> {
        self.transition(SessionState::Authenticating {
            username: credential.username().to_string(),
        });
        self.username = Some(credential.username().to_string());

        let mut username_sent = false;
        let mut password_sent = false;

        loop {
            let state = self
                .read_until(DetectContext::default(), PromptState::is_boundary)
                .await?;

            match state {
                PromptState::AwaitingUsername => {
                    if username_sent || password_sent {
                        return Err(self.auth_failed(credential));
                    }
                    self.capture_banner();
                    self.send_line(credential.username()).await?;
                    username_sent = true;
                }
                PromptState::AwaitingPassword | PromptState::AwaitingEnablePassword => {
                    if password_sent {
                        return Err(self.auth_failed(credential));
                    }
                    if !username_sent {
                        self.capture_banner();
                    }
                    self.send_secret(credential.password()).await?;
                    password_sent = true;
                }
                PromptState::UnprivilegedPrompt | PromptState::PrivilegedPrompt => {
                    self.update_prompt(state);
                    self.hostname = Some(hostname_from_prompt(&self.prompt).to_string());
                    let mode = self.mode.unwrap_or(PrivilegeMode::Unprivileged);
                    debug!(
                        "session {}: logged in as '{}' at {:?}",
                        self.target,
                        credential.username(),
                        self.prompt
                    );
                    self.transition(SessionState::Authenticated(mode));
                    return Ok(mode);
                }
                PromptState::Incomplete => {}
            }
        }
    }

    /// Run `enable` with `secret` if one is given, elevation is enabled,
    /// and the prompt is unprivileged.
    ///
    /// A rejected secret is not an error: the session returns to the
    /// unprivileged prompt and reports [`ElevationStatus::Failed`].
    pub async fn elevate(&mut self, secret: Option<&SecretString>) -> Result<ElevationStatus> {
        if self.mode.is_none() {
            return Err(SessionError::NotAuthenticated.into());
        }

        if self.mode == Some(PrivilegeMode::Privileged) {
            self.transition(SessionState::ElevationSkipped);
            return Ok(ElevationStatus::AlreadyPrivileged);
        }

        let secret = match secret {
            Some(secret) if self.config.elevate => secret,
            _ => {
                self.transition(SessionState::ElevationSkipped);
                return Ok(ElevationStatus::Skipped);
            }
        };

        self.transition(SessionState::Elevating);
        self.send_line("enable").await?;

        let mut secret_sent = false;
        loop {
            let state = self
                .read_until(DetectContext::enable(), PromptState::is_boundary)
                .await?;

            match state {
                PromptState::AwaitingEnablePassword | PromptState::AwaitingPassword => {
                    if secret_sent {
                        return self.recover_from_rejected_secret().await;
                    }
                    self.send_secret(secret).await?;
                    secret_sent = true;
                }
                PromptState::AwaitingUsername => {
                    return self.recover_from_rejected_secret().await;
                }
                PromptState::PrivilegedPrompt | PromptState::UnprivilegedPrompt => {
                    return Ok(self.finish_elevation(state));
                }
                PromptState::Incomplete => {}
            }
        }
    }

    /// Answer the re-prompt with empty lines until the device gives up
    /// and shows a prompt again.
    async fn recover_from_rejected_secret(&mut self) -> Result<ElevationStatus> {
        for _ in 0..ENABLE_RECOVERY_ATTEMPTS {
            self.send_line("").await?;
            let state = self
                .read_until(DetectContext::enable(), PromptState::is_boundary)
                .await?;
            if state.is_prompt() {
                return Ok(self.finish_elevation(state));
            }
        }

        Err(ChannelError::PromptTimeout(self.config.read_timeout).into())
    }

    fn finish_elevation(&mut self, state: PromptState) -> ElevationStatus {
        self.update_prompt(state);
        if self.mode == Some(PrivilegeMode::Privileged) {
            self.transition(SessionState::Elevated);
            ElevationStatus::Elevated
        } else {
            warn!(
                "session {}: enable secret rejected, continuing unprivileged",
                self.target
            );
            self.transition(SessionState::ElevationFailed);
            ElevationStatus::Failed
        }
    }

    /// Send the configured setup commands, discarding their output.
    pub async fn run_setup(&mut self) -> Result<()> {
        for command in self.config.setup_commands.clone() {
            self.send_command(&command).await?;
        }
        Ok(())
    }

    /// Execute `commands` in order, recording each response.
    ///
    /// Responses captured before an error stay in [`output`](Self::output).
    pub async fn execute(&mut self, commands: &[String]) -> Result<()> {
        for (index, command) in commands.iter().enumerate() {
            self.transition(SessionState::Executing(index));
            let response = self.send_command(command).await?;
            self.output.insert(index, response);
        }
        Ok(())
    }

    /// Send one command and wait for the next prompt.
    pub async fn send_command(&mut self, command: &str) -> Result<Response> {
        if self.mode.is_none() {
            return Err(SessionError::NotAuthenticated.into());
        }

        let start = Instant::now();
        self.send_line(command).await?;
        let state = self
            .read_until(DetectContext::default(), PromptState::is_prompt)
            .await?;
        let elapsed = start.elapsed();

        self.update_prompt(state);

        let channel = self.channel.as_ref().ok_or(SessionError::NotConnected)?;
        let raw = channel.buffer().since_mark();
        let (body, prompt) = split_response(raw, command);
        let result = decode_latin1(body);
        let raw_result = decode_latin1(raw);
        let prompt = decode_latin1(prompt);

        Ok(Response::new(command, result, raw_result, prompt, elapsed))
    }

    /// Close the transport. Always ends in [`SessionState::Closed`]; a
    /// close error is returned after the state change.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        self.transition(SessionState::Disconnecting);
        let result = match self.channel.as_mut() {
            Some(channel) => channel.close().await,
            None => Ok(()),
        };
        self.transition(SessionState::Closed);
        result
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(SessionError::NotConnected)?;
        channel.send_line(line).await
    }

    async fn send_secret(&mut self, secret: &SecretString) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(SessionError::NotConnected)?;
        channel.send_secret(secret).await
    }

    async fn read_until(
        &mut self,
        context: DetectContext,
        accept: fn(PromptState) -> bool,
    ) -> Result<PromptState> {
        let channel = self.channel.as_mut().ok_or(SessionError::NotConnected)?;
        channel.read_until(context, accept, &self.cancel).await
    }

    fn auth_failed(&mut self, credential: &Credential) -> crate::error::Error {
        warn!(
            "session {}: login rejected for '{}'",
            self.target,
            credential.username()
        );
        self.transition(SessionState::AuthFailed);
        SessionError::AuthFailed {
            user: credential.username().to_string(),
        }
        .into()
    }

    /// Keep what the device printed before its first login cue.
    fn capture_banner(&mut self) {
        if self.output.banner().is_some() {
            return;
        }
        let Some(channel) = self.channel.as_ref() else {
            return;
        };

        // Everything before the line holding the cue
        let text = channel.buffer().as_slice();
        let end = text.trim_ascii_end().len();
        let line_start = memchr::memrchr(b'\n', &text[..end]).map_or(0, |i| i + 1);
        let banner = decode_latin1(&text[..line_start]);
        let banner = banner.trim_matches(['\r', '\n']);
        if !banner.trim().is_empty() {
            self.output.set_banner(banner);
        }
    }

    fn update_prompt(&mut self, state: PromptState) {
        if let Some(mode) = PrivilegeMode::from_prompt_state(state) {
            self.mode = Some(mode);
        }
        if let Some(channel) = self.channel.as_ref() {
            if let Some(line) = last_nonempty_line(channel.buffer().tail_since_mark()) {
                self.prompt = decode_latin1(line);
            }
        }
    }

    fn transition(&mut self, state: SessionState) {
        debug!("session {}: {:?} -> {:?}", self.target, self.state, state);
        self.state = state.clone();
        self.history.push(state);
    }

    /// The device this session talks to.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Whether the session ever passed through `state`.
    pub fn visited(&self, state: &SessionState) -> bool {
        self.history.contains(state)
    }

    /// Privilege of the current prompt, once logged in.
    pub fn mode(&self) -> Option<PrivilegeMode> {
        self.mode
    }

    /// The last prompt line seen.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Hostname taken from the login prompt.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Username used to log in.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Output captured so far.
    pub fn output(&self) -> &CapturedOutput {
        &self.output
    }

    /// Take the captured output, leaving an empty capture behind.
    pub fn take_output(&mut self) -> CapturedOutput {
        std::mem::take(&mut self.output)
    }

    /// Everything received so far, decoded.
    pub fn transcript(&self) -> String {
        self.channel
            .as_ref()
            .map(|c| c.transcript())
            .unwrap_or_default()
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.channel.is_some() && self.state != SessionState::Closed {
            warn!("Session for {} dropped without close()", self.target);
        }
    }
}

/// Split a command response into the output between the echo line and
/// the prompt line, and the prompt line itself.
///
/// The first line is dropped only when it echoes `command`.
fn split_response<'a>(raw: &'a [u8], command: &str) -> (&'a [u8], &'a [u8]) {
    let trimmed_len = raw.trim_ascii_end().len();
    let prompt_start = memchr::memrchr(b'\n', &raw[..trimmed_len]).map_or(0, |i| i + 1);
    let body = &raw[..prompt_start];
    let prompt = raw[prompt_start..].trim_ascii();

    // An empty command echoes as a blank line
    let command = command.trim().as_bytes();
    let is_echo = |line: &[u8]| match command {
        [] => line.is_empty(),
        _ => line.ends_with(command),
    };
    let body_start = match memchr::memchr(b'\n', body) {
        Some(i) if is_echo(body[..i].trim_ascii()) => i + 1,
        _ => 0,
    };

    (&body[body_start..], prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::{
        ScriptedConnector, ScriptedTransport, SimulatedConnection, SimulatedDevice, SimulatedNetwork,
    };

    fn target() -> Target {
        Target::new("10.0.0.1")
    }

    fn session<T: Transport>() -> Session<T> {
        Session::new(target(), SessionConfig::default(), CancellationToken::new())
    }

    #[test]
    fn test_split_response() {
        let raw = b"show clock\r\n*12:00:00.000 UTC Mon Mar 1 1993\r\nr1#";
        let (body, prompt) = split_response(raw, "show clock");
        assert_eq!(body, b"*12:00:00.000 UTC Mon Mar 1 1993\r\n");
        assert_eq!(prompt, b"r1#");
    }

    #[test]
    fn test_split_response_without_echo_or_output() {
        let (body, prompt) = split_response(b"r1#", "terminal length 0");
        assert!(body.is_empty());
        assert_eq!(prompt, b"r1#");

        let (body, _) = split_response(b"terminal length 0\r\nr1#", "terminal length 0");
        assert!(body.is_empty());

        // No echo: keep the first line
        let (body, _) = split_response(b"12:00\r\nr1#", "show clock");
        assert_eq!(body, b"12:00\r\n");
    }

    #[test]
    fn test_split_response_empty_command() {
        let (body, prompt) = split_response(b"first line of output\r\nr1>", "");
        assert_eq!(body, b"first line of output\r\n");
        assert_eq!(prompt, b"r1>");

        let (body, _) = split_response(b"\r\nr1>", "");
        assert!(body.is_empty());

        let (body, _) = split_response(b"\r\nbanner text\r\nr1>", "");
        assert_eq!(body, b"banner text\r\n");
    }

    #[tokio::test]
    async fn test_login_execute_close() {
        let network = SimulatedNetwork::new().with_device(
            "10.0.0.1",
            SimulatedDevice::new("r1")
                .with_banner("Authorized access only")
                .with_account("admin", "pw")
                .with_response("show clock", "12:00:00 UTC\r\n"),
        );
        let log = network.log();

        let mut session: Session<SimulatedConnection> = session();
        session.connect(&network).await.unwrap();
        let mode = session
            .authenticate(&Credential::new("admin", "pw"))
            .await
            .unwrap();
        assert_eq!(mode, PrivilegeMode::Unprivileged);
        assert_eq!(session.hostname(), Some("r1"));
        assert_eq!(session.prompt(), "r1>");

        session.execute(&["show clock".to_string()]).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(session.output().get(0).unwrap().result, "12:00:00 UTC\r\n");
        let banner = session.output().banner().unwrap();
        assert!(banner.starts_with("Authorized access only"));
        assert!(banner.ends_with("User Access Verification"));
        assert_eq!(session.state(), &SessionState::Closed);
        assert!(log.all_closed());
    }

    #[tokio::test]
    async fn test_rejected_credential_is_auth_failed() {
        let network = SimulatedNetwork::new()
            .with_device("10.0.0.1", SimulatedDevice::new("r1").with_account("bill", "pw2"));

        let mut session: Session<SimulatedConnection> = session();
        session.connect(&network).await.unwrap();
        let err = session
            .authenticate(&Credential::new("dave", "pw1"))
            .await
            .unwrap_err();
        assert!(err.is_auth_failed());
        assert!(session.visited(&SessionState::AuthFailed));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_line_password_login() {
        let network = SimulatedNetwork::new().with_device(
            "10.0.0.1",
            SimulatedDevice::new("old-sw").with_line_password("cisco"),
        );

        let mut session: Session<SimulatedConnection> = session();
        session.connect(&network).await.unwrap();
        session
            .authenticate(&Credential::new("", "cisco"))
            .await
            .unwrap();
        assert_eq!(session.hostname(), Some("old-sw"));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_elevation() {
        let network = SimulatedNetwork::new().with_device(
            "10.0.0.1",
            SimulatedDevice::new("r1")
                .with_account("admin", "pw")
                .with_enable_secret("s3cret"),
        );

        let mut session: Session<SimulatedConnection> = session();
        session.connect(&network).await.unwrap();
        session
            .authenticate(&Credential::new("admin", "pw"))
            .await
            .unwrap();
        let status = session
            .elevate(Some(&SecretString::from("s3cret")))
            .await
            .unwrap();

        assert_eq!(status, ElevationStatus::Elevated);
        assert_eq!(session.mode(), Some(PrivilegeMode::Privileged));
        assert_eq!(session.prompt(), "r1#");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_secret_degrades() {
        let network = SimulatedNetwork::new().with_device(
            "10.0.0.1",
            SimulatedDevice::new("r1")
                .with_account("admin", "pw")
                .with_enable_secret("s3cret")
                .with_response("show clock", "12:00\r\n"),
        );

        let mut session: Session<SimulatedConnection> = session();
        session.connect(&network).await.unwrap();
        session
            .authenticate(&Credential::new("admin", "pw"))
            .await
            .unwrap();
        let status = session
            .elevate(Some(&SecretString::from("wrong")))
            .await
            .unwrap();

        assert_eq!(status, ElevationStatus::Failed);
        assert!(session.visited(&SessionState::ElevationFailed));
        assert_eq!(session.mode(), Some(PrivilegeMode::Unprivileged));

        // Still usable at the unprivileged prompt
        session.execute(&["show clock".to_string()]).await.unwrap();
        assert_eq!(session.output().get(0).unwrap().result, "12:00\r\n");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_elevation_skipped() {
        let network = SimulatedNetwork::new().with_device(
            "10.0.0.1",
            SimulatedDevice::new("r1")
                .with_account("admin", "pw")
                .with_privileged_login(),
        );

        let mut session: Session<SimulatedConnection> = session();
        session.connect(&network).await.unwrap();
        session
            .authenticate(&Credential::new("admin", "pw"))
            .await
            .unwrap();
        assert_eq!(
            session.elevate(Some(&SecretString::from("x"))).await.unwrap(),
            ElevationStatus::AlreadyPrivileged
        );
        assert!(!session.visited(&SessionState::Elevating));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_connect_is_not_unreachable() {
        let connector = ScriptedConnector::new(&["Username: "]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut session: Session<ScriptedTransport> =
            Session::new(target(), SessionConfig::default(), cancel);
        let err = session.connect(&connector).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!session.visited(&SessionState::Unreachable));
    }

    #[tokio::test]
    async fn test_escape_split_after_prompt() {
        let connector = ScriptedConnector::new(&[
            "Username: ",
            "admin\r\nPassword: ",
            "\r\nr1>\x1b[",
            "0m",
            "show clock\r\n12:00\r\nr1>",
        ]);
        let mut session: Session<ScriptedTransport> = session();
        session.connect(&connector).await.unwrap();
        session
            .authenticate(&Credential::new("admin", "pw"))
            .await
            .unwrap();
        assert_eq!(session.prompt(), "r1>");

        let response = session.send_command("show clock").await.unwrap();
        assert_eq!(response.result, "12:00\r\n");
        assert_eq!(response.prompt, "r1>");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_command_keeps_first_line() {
        let connector = ScriptedConnector::new(&[
            "Username: ",
            "admin\r\nPassword: ",
            "\r\nr1>",
            "first line of output\r\nr1>",
        ]);
        let mut session: Session<ScriptedTransport> = session();
        session.connect(&connector).await.unwrap();
        session
            .authenticate(&Credential::new("admin", "pw"))
            .await
            .unwrap();

        let response = session.send_command("").await.unwrap();
        assert_eq!(response.result, "first line of output\r\n");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_command_requires_login() {
        let connector = ScriptedConnector::new(&["Username: "]);
        let mut session: Session<ScriptedTransport> = session();
        session.connect(&connector).await.unwrap();

        let err = session.send_command("show clock").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Session(SessionError::NotAuthenticated)
        ));
        session.close().await.unwrap();
    }
}
