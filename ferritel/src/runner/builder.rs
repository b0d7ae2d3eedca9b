//! Builder for creating runners.

use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use log::warn;
use secrecy::SecretString;

use super::Runner;
use crate::config::{RunConfig, SessionConfig, Target, pair_credentials};
use crate::error::{ConfigError, Result};
use crate::transport::{Connector, TelnetConnector};

/// Builder for constructing a [`Runner`].
///
/// All validation happens in [`build`](Self::build), before any
/// connection is attempted.
///
/// # Example
///
/// ```rust,no_run
/// use ferritel::RunnerBuilder;
///
/// # fn example() -> Result<(), ferritel::Error> {
/// let runner = RunnerBuilder::new()
///     .targets(["10.0.0.1", "10.0.0.2"])
///     .usernames(["dave", "bill"])
///     .passwords(["pw1", "pw2"])
///     .enable_secret("s3cret")
///     .command("show run")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RunnerBuilder {
    targets: Vec<Target>,
    usernames: Vec<String>,
    passwords: Vec<String>,
    enable_secret: Option<String>,
    commands: Vec<String>,
    target_commands: Option<IndexMap<Target, Vec<String>>>,
    session: SessionConfig,
    concurrency: Option<usize>,
    attempt_timeout: Option<Duration>,
}

impl RunnerBuilder {
    /// Create an empty builder with default session settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one target.
    pub fn target(mut self, target: impl Into<Target>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Add targets, in processing order.
    pub fn targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Target>,
    {
        self.targets.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Add one username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.usernames.push(username.into());
        self
    }

    /// Add usernames. They pair with passwords by position.
    pub fn usernames<I, S>(mut self, usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.usernames.extend(usernames.into_iter().map(Into::into));
        self
    }

    /// Add one password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.passwords.push(password.into());
        self
    }

    /// Add passwords.
    pub fn passwords<I, S>(mut self, passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passwords.extend(passwords.into_iter().map(Into::into));
        self
    }

    /// Set the secret used for `enable`.
    pub fn enable_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_secret = Some(secret.into());
        self
    }

    /// Add one command.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Add commands, in execution order.
    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }

    /// Give targets their own command lists instead of a shared one.
    ///
    /// Once called, targets without a list are skipped at run time, even
    /// when `lists` is empty.
    pub fn target_commands<I, T>(mut self, lists: I) -> Self
    where
        I: IntoIterator<Item = (T, Vec<String>)>,
        T: Into<Target>,
    {
        self.target_commands
            .get_or_insert_with(IndexMap::new)
            .extend(lists.into_iter().map(|(t, c)| (t.into(), c)));
        self
    }

    /// Set the Telnet port (default: 23).
    pub fn port(mut self, port: u16) -> Self {
        self.session.port = port;
        self
    }

    /// Set the TCP connect timeout (default: 4s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.session.connect_timeout = timeout;
        self
    }

    /// Set how long one read step may wait for a prompt (default: 7s).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.session.read_timeout = timeout;
        self
    }

    /// Set the line ending appended to every line sent (default: `"\n"`).
    pub fn line_ending(mut self, ending: impl Into<String>) -> Self {
        self.session.line_ending = ending.into();
        self
    }

    /// Replace the setup commands sent after login.
    pub fn setup_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.session.setup_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable privilege elevation (default: enabled).
    pub fn elevate(mut self, elevate: bool) -> Self {
        self.session.elevate = elevate;
        self
    }

    /// Set the prompt search depth in bytes (default: 1000).
    pub fn search_depth(mut self, depth: usize) -> Self {
        self.session.search_depth = depth;
        self
    }

    /// Set how many targets are processed at once (default: 1).
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Bound one whole (target, credential) attempt.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Validate everything and produce the run configuration.
    ///
    /// Duplicate targets are dropped (first occurrence wins) with a warning.
    pub fn build_config(self) -> Result<RunConfig> {
        if self.targets.is_empty() {
            return Err(ConfigError::MissingTargets.into());
        }
        let credentials = pair_credentials(&self.usernames, &self.passwords)?;
        match (&self.target_commands, self.commands.is_empty()) {
            (Some(_), false) => return Err(ConfigError::ConflictingCommands.into()),
            (None, true) => return Err(ConfigError::MissingCommands.into()),
            _ => {}
        }
        let concurrency = self.concurrency.unwrap_or(1);
        if concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency.into());
        }

        let mut targets = IndexSet::with_capacity(self.targets.len());
        for target in self.targets {
            if targets.contains(&target) {
                warn!("duplicate target {} ignored", target);
            } else {
                targets.insert(target);
            }
        }

        Ok(RunConfig {
            targets: targets.into_iter().collect(),
            credentials,
            enable_secret: self.enable_secret.map(SecretString::from),
            commands: self.commands,
            target_commands: self.target_commands,
            session: self.session,
            concurrency,
            attempt_timeout: self.attempt_timeout,
        })
    }

    /// Build a runner that connects over Telnet.
    pub fn build(self) -> Result<Runner<TelnetConnector>> {
        self.build_with_connector(TelnetConnector)
    }

    /// Build a runner that opens connections through `connector`.
    pub fn build_with_connector<C: Connector>(self, connector: C) -> Result<Runner<C>> {
        Ok(Runner::new(connector, self.build_config()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn base() -> RunnerBuilder {
        RunnerBuilder::new()
            .target("10.0.0.1")
            .username("admin")
            .password("pw")
            .command("show clock")
    }

    #[test]
    fn test_defaults() {
        let config = base().build_config().unwrap();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.session.port, 23);
        assert!(config.enable_secret.is_none());
        assert!(config.attempt_timeout.is_none());
    }

    #[test]
    fn test_duplicate_targets_dropped_in_order() {
        let config = base()
            .targets(["10.0.0.2", "10.0.0.1", "10.0.0.3"])
            .build_config()
            .unwrap();
        let addresses: Vec<&str> = config.targets.iter().map(Target::address).collect();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_rejects_mismatched_credentials() {
        let err = RunnerBuilder::new()
            .target("10.0.0.1")
            .usernames(["a", "b", "c"])
            .passwords(["x", "y"])
            .command("show clock")
            .build_config()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::CredentialCountMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_pieces() {
        let err = RunnerBuilder::new()
            .username("a")
            .password("b")
            .command("c")
            .build_config()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingTargets)));

        let err = RunnerBuilder::new()
            .target("10.0.0.1")
            .username("a")
            .password("b")
            .build_config()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingCommands)));

        let err = base().concurrency(0).build_config().unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidConcurrency)));
    }

    #[test]
    fn test_target_commands() {
        let config = RunnerBuilder::new()
            .targets(["10.0.0.1", "10.0.0.2"])
            .username("admin")
            .password("pw")
            .target_commands([("10.0.0.1", vec!["show vlan".to_string()])])
            .build_config()
            .unwrap();

        assert_eq!(
            config.commands_for(&Target::new("10.0.0.1")),
            Some(&["show vlan".to_string()][..])
        );
        assert_eq!(config.commands_for(&Target::new("10.0.0.2")), None);

        // Shared list applies to every target
        let config = base().build_config().unwrap();
        assert_eq!(
            config.commands_for(&Target::new("192.0.2.7")),
            Some(&["show clock".to_string()][..])
        );
    }

    #[test]
    fn test_rejects_both_command_sources() {
        let err = base()
            .target_commands([("10.0.0.1", vec!["show vlan".to_string()])])
            .build_config()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ConflictingCommands)));

        // An empty per-target map still counts as a command source
        let config = RunnerBuilder::new()
            .target("10.0.0.1")
            .username("admin")
            .password("pw")
            .target_commands(Vec::<(Target, Vec<String>)>::new())
            .build_config()
            .unwrap();
        assert_eq!(config.commands_for(&Target::new("10.0.0.1")), None);
    }
}
