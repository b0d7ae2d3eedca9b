//! # Ferritel
//!
//! Async Telnet CLI scraper for legacy network device automation.
//!
//! Ferritel logs into devices that only speak cleartext Telnet, optionally
//! elevates privilege with `enable`, runs a list of commands and captures
//! what each one printed, across many devices and many credential pairs.
//!
//! ## Features
//!
//! - Async Telnet transport with option refusal
//! - Prompt-synchronized output capture (`>` / `#` prompts, login cues)
//! - Credential fall-through: the next pair is tried only when a login is rejected
//! - Bounded concurrency across targets, cancellation and per-attempt deadlines
//! - Text, table and JSON Lines output to stdout or templated files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferritel::{OutputFormat, RunnerBuilder, WriterSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = RunnerBuilder::new()
//!         .targets(["192.168.1.1", "192.168.1.2"])
//!         .usernames(["dave", "bill"])
//!         .passwords(["pw1", "pw2"])
//!         .enable_secret("s3cret")
//!         .command("show run")
//!         .build()?;
//!
//!     let mut sink = WriterSink::stdout(OutputFormat::Text);
//!     let summary = runner.run_with_sink(&mut sink).await?;
//!     println!("{} of {} targets succeeded", summary.succeeded, summary.targets);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod inputs;
pub mod runner;
pub mod session;
pub mod sink;
pub mod transport;

// Re-export main types for convenience
pub use config::{Credential, RunConfig, SessionConfig, Target};
pub use error::Error;
pub use runner::{RunSummary, Runner, RunnerBuilder, TargetOutcome, TargetReport};
pub use session::{CapturedOutput, ElevationStatus, PrivilegeMode, Response, Session, SessionState};
pub use sink::{FileLayout, FileSink, OutputFormat, OutputSink, OutputTemplate, WriterSink};
pub use transport::{Connector, TelnetConnector, Transport};
