//! Error types for ferritel.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for ferritel operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Telnet transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session-level errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Run configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether this error means the target could not be reached at all.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Error::Transport(
                TransportError::ConnectionFailed { .. } | TransportError::ConnectTimeout { .. }
            )
        )
    }

    /// Whether the device rejected the credentials.
    pub fn is_auth_failed(&self) -> bool {
        matches!(self, Error::Session(SessionError::AuthFailed { .. }))
    }

    /// Whether a read step ran out of time waiting for a prompt.
    pub fn is_prompt_timeout(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::PromptTimeout(_)))
    }

    /// Whether the operation was aborted by cancellation or an attempt deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::Cancelled))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(TransportError::Io(err))
    }
}

/// Transport layer errors (TCP connection, Telnet stream).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The TCP connect did not complete in time
    #[error("Connection to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// Connection was closed by the peer
    #[error("Connection disconnected")]
    Disconnected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (prompt detection, reads).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// No prompt boundary was recognised within the read timeout
    #[error("Prompt not found within {0:?}")]
    PromptTimeout(Duration),

    /// The read was aborted by cancellation
    #[error("Operation cancelled")]
    Cancelled,
}

/// Session layer errors (login, command execution).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The device rejected the credential pair
    #[error("Authentication failed for user '{user}'")]
    AuthFailed { user: String },

    /// No transport is open
    #[error("Session not connected - call connect() first")]
    NotConnected,

    /// Command sent before authentication completed
    #[error("Session not authenticated - call authenticate() first")]
    NotAuthenticated,

    /// Operation on a session that was already closed
    #[error("Session already closed")]
    AlreadyClosed,
}

/// Run configuration errors, raised before any connection is attempted.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// More than one username, and the password list length differs
    #[error(
        "Username and password lists must be the same length ({usernames} usernames, {passwords} passwords)"
    )]
    CredentialCountMismatch { usernames: usize, passwords: usize },

    /// No targets supplied
    #[error("At least one target is required")]
    MissingTargets,

    /// No usernames or passwords supplied
    #[error("At least one username and one password are required")]
    MissingCredentials,

    /// No commands supplied
    #[error("At least one command is required")]
    MissingCommands,

    /// Both a shared command list and per-target command lists were given
    #[error("Shared commands and per-target commands cannot be combined")]
    ConflictingCommands,

    /// Concurrency must be at least 1
    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,
}

/// Result type alias using ferritel's Error.
pub type Result<T> = std::result::Result<T, Error>;
