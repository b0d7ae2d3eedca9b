//! Run configuration: targets, credentials, commands and session tuning.
//!
//! Everything here is validated once by
//! [`RunnerBuilder`](crate::runner::RunnerBuilder) and is read-only while
//! a run is in progress.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Serialize;

use crate::channel::ChannelConfig;
use crate::error::ConfigError;
use crate::transport::{DEFAULT_TELNET_PORT, TransportConfig};

/// Network address of one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Create a target from a hostname or IP address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as given.
    pub fn address(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Target {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// A username/password pair.
#[derive(Debug, Clone)]
pub struct Credential {
    username: String,
    password: SecretString,
}

impl Credential {
    /// Create a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password.
    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

/// Pair username and password lists positionally.
///
/// A single username is reused for every password. With more than one
/// username the lists must be the same length.
pub fn pair_credentials(
    usernames: &[String],
    passwords: &[String],
) -> Result<Vec<Credential>, ConfigError> {
    if usernames.is_empty() || passwords.is_empty() {
        return Err(ConfigError::MissingCredentials);
    }

    if usernames.len() == 1 {
        return Ok(passwords
            .iter()
            .map(|p| Credential::new(usernames[0].clone(), p.clone()))
            .collect());
    }

    if usernames.len() != passwords.len() {
        return Err(ConfigError::CredentialCountMismatch {
            usernames: usernames.len(),
            passwords: passwords.len(),
        });
    }

    Ok(usernames
        .iter()
        .zip(passwords)
        .map(|(u, p)| Credential::new(u.clone(), p.clone()))
        .collect())
}

/// Per-session tuning shared by every attempt.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Telnet port (default: 23).
    pub port: u16,

    /// TCP connect timeout (default: 4s).
    pub connect_timeout: Duration,

    /// Overall time one read step may take (default: 7s).
    pub read_timeout: Duration,

    /// Appended to every line sent (default: `"\n"`).
    pub line_ending: String,

    /// Sent after login and elevation, output discarded
    /// (default: `terminal length 0`).
    pub setup_commands: Vec<String>,

    /// Whether to run `enable` when a secret is configured (default: true).
    pub elevate: bool,

    /// Bytes from the end of a response the prompt detector looks at.
    pub search_depth: usize,
}

impl SessionConfig {
    /// Transport parameters for `target`.
    pub fn transport_config(&self, target: &Target) -> TransportConfig {
        TransportConfig {
            host: target.address().to_string(),
            port: self.port,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Channel parameters.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            read_timeout: self.read_timeout,
            search_depth: self.search_depth,
            line_ending: self.line_ending.clone(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_TELNET_PORT,
            connect_timeout: Duration::from_secs(4),
            read_timeout: Duration::from_secs(7),
            line_ending: "\n".to_string(),
            setup_commands: vec!["terminal length 0".to_string()],
            elevate: true,
            search_depth: 1000,
        }
    }
}

/// A validated run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Devices, in processing order, without duplicates.
    pub targets: Vec<Target>,

    /// Credentials, tried in order.
    pub credentials: Vec<Credential>,

    /// Secret for `enable`.
    pub enable_secret: Option<SecretString>,

    /// Commands sent to every device.
    pub commands: Vec<String>,

    /// Per-device command lists. When set, it replaces `commands` and
    /// targets without an entry are skipped.
    pub target_commands: Option<IndexMap<Target, Vec<String>>>,

    /// Session tuning.
    pub session: SessionConfig,

    /// How many targets are processed at once.
    pub concurrency: usize,

    /// Upper bound for one whole (target, credential) attempt.
    pub attempt_timeout: Option<Duration>,
}

impl RunConfig {
    /// Commands to run on `target`, or `None` when it has no list.
    pub fn commands_for(&self, target: &Target) -> Option<&[String]> {
        match &self.target_commands {
            Some(lists) => lists.get(target).map(Vec::as_slice),
            None => Some(self.commands.as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_positional_pairing() {
        let creds = pair_credentials(&strings(&["dave", "bill"]), &strings(&["pw1", "pw2"])).unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].username(), "dave");
        assert_eq!(creds[0].password().expose_secret(), "pw1");
        assert_eq!(creds[1].username(), "bill");
        assert_eq!(creds[1].password().expose_secret(), "pw2");
    }

    #[test]
    fn test_single_username_reused() {
        let creds = pair_credentials(&strings(&["admin"]), &strings(&["a", "b", "c"])).unwrap();
        assert_eq!(creds.len(), 3);
        assert!(creds.iter().all(|c| c.username() == "admin"));
        assert_eq!(creds[2].password().expose_secret(), "c");
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let err = pair_credentials(&strings(&["a", "b", "c"]), &strings(&["x", "y"])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CredentialCountMismatch {
                usernames: 3,
                passwords: 2
            }
        ));

        let err = pair_credentials(&strings(&["a", "b"]), &strings(&["x"])).unwrap_err();
        assert!(matches!(err, ConfigError::CredentialCountMismatch { .. }));
    }

    #[test]
    fn test_missing_credentials() {
        assert!(matches!(
            pair_credentials(&[], &strings(&["x"])),
            Err(ConfigError::MissingCredentials)
        ));
        assert!(matches!(
            pair_credentials(&strings(&["a"]), &[]),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn test_credential_debug_hides_password() {
        let cred = Credential::new("admin", "hunter2");
        assert!(!format!("{:?}", cred).contains("hunter2"));
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 23);
        assert_eq!(config.read_timeout, Duration::from_secs(7));
        assert_eq!(config.setup_commands, vec!["terminal length 0"]);

        let transport = config.transport_config(&Target::new("10.1.1.1"));
        assert_eq!(transport.socket_addr(), "10.1.1.1:23");
    }
}
