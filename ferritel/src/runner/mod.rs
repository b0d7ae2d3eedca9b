//! Run orchestration across targets and credentials.
//!
//! For each target the [`Runner`] tries credentials in order, moving to
//! the next one only when the device rejects a login. Any other outcome
//! (success, unreachable, timeout, disconnect) ends the target. Targets are
//! reported in input order; with `concurrency > 1` several targets are in
//! flight at once, each with at most one session open.

mod builder;

pub use builder::RunnerBuilder;

use std::io;
use std::pin::pin;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures_core::Stream;
use futures_util::stream::{self, StreamExt};
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Credential, RunConfig, Target};
use crate::error::{ChannelError, Error, TransportError};
use crate::session::{AttemptPlan, AttemptResult, CapturedOutput, ElevationStatus, run_attempt};
use crate::sink::OutputSink;
use crate::transport::Connector;

/// How one target ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    /// Every command ran.
    Success { output: CapturedOutput },

    /// Every command ran, but not as intended (e.g. the enable secret was
    /// rejected and commands ran unprivileged).
    Degraded {
        warning: String,
        output: CapturedOutput,
    },

    /// No connection could be opened.
    Unreachable { message: String },

    /// Every credential was rejected. Lists the usernames tried, in order.
    AllCredentialsExhausted { attempted: Vec<String> },

    /// A prompt did not come back in time.
    PromptTimeout {
        message: String,
        output: CapturedOutput,
    },

    /// The whole attempt ran past its deadline.
    TimedOut {
        message: String,
        output: CapturedOutput,
    },

    /// The device closed the connection.
    Disconnected {
        message: String,
        output: CapturedOutput,
    },

    /// The run was cancelled before this target finished.
    Cancelled { output: CapturedOutput },

    /// Nothing to run on this target; no connection was made.
    Skipped { reason: String },
}

impl TargetOutcome {
    /// Whether every command ran.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Degraded { .. })
    }

    /// Output captured before the target ended, if any.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            Self::Success { output }
            | Self::Degraded { output, .. }
            | Self::PromptTimeout { output, .. }
            | Self::TimedOut { output, .. }
            | Self::Disconnected { output, .. }
            | Self::Cancelled { output } => Some(output),
            Self::Unreachable { .. }
            | Self::AllCredentialsExhausted { .. }
            | Self::Skipped { .. } => None,
        }
    }

    /// Short status name.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Degraded { .. } => "degraded",
            Self::Unreachable { .. } => "unreachable",
            Self::AllCredentialsExhausted { .. } => "all_credentials_exhausted",
            Self::PromptTimeout { .. } => "prompt_timeout",
            Self::TimedOut { .. } => "timed_out",
            Self::Disconnected { .. } => "disconnected",
            Self::Cancelled { .. } => "cancelled",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Result for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: Target,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub started_at: DateTime<Local>,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

impl TargetReport {
    /// Hostname if one was learned, the target address otherwise.
    pub fn display_name(&self) -> &str {
        self.hostname.as_deref().unwrap_or(self.target.address())
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub targets: usize,
    pub succeeded: usize,
    pub degraded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, report: &TargetReport) {
        self.targets += 1;
        match report.outcome {
            TargetOutcome::Success { .. } => self.succeeded += 1,
            TargetOutcome::Degraded { .. } => self.degraded += 1,
            TargetOutcome::Skipped { .. } => self.skipped += 1,
            _ => self.failed += 1,
        }
    }
}

/// Position in the ordered credential list for one target.
struct CredentialCursor<'a> {
    credentials: &'a [Credential],
    index: usize,
}

impl<'a> CredentialCursor<'a> {
    fn new(credentials: &'a [Credential]) -> Self {
        Self {
            credentials,
            index: 0,
        }
    }

    fn current(&self) -> Option<&'a Credential> {
        self.credentials.get(self.index)
    }

    fn advance(&mut self) {
        self.index += 1;
    }
}

/// Runs a validated [`RunConfig`] against every target.
///
/// # Example
///
/// ```rust,no_run
/// use ferritel::RunnerBuilder;
///
/// # async fn example() -> Result<(), ferritel::Error> {
/// let runner = RunnerBuilder::new()
///     .target("10.0.0.1")
///     .username("admin")
///     .password("secret")
///     .command("show version")
///     .build()?;
///
/// for report in runner.run().await {
///     println!("{}: {}", report.display_name(), report.outcome.status());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Runner<C> {
    connector: C,
    config: RunConfig,
    cancel: CancellationToken,
}

impl<C: Connector> Runner<C> {
    pub(crate) fn new(connector: C, config: RunConfig) -> Self {
        Self {
            connector,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts the run when cancelled.
    ///
    /// In-flight reads stop at once and their sessions are closed; targets
    /// not yet started are reported as [`TargetOutcome::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The validated configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Reports in target order, produced as targets finish.
    pub fn reports(&self) -> impl Stream<Item = TargetReport> + '_ {
        stream::iter(self.config.targets.iter())
            .map(|target| self.run_target(target))
            .buffered(self.config.concurrency)
    }

    /// Process every target and collect the reports.
    pub async fn run(&self) -> Vec<TargetReport> {
        self.reports().collect().await
    }

    /// Process every target, writing each report to `sink` as soon as it
    /// is available.
    pub async fn run_with_sink<S: OutputSink>(&self, sink: &mut S) -> io::Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut reports = pin!(self.reports());

        while let Some(report) = reports.next().await {
            summary.record(&report);
            sink.write_report(&report)?;
        }
        sink.finish()?;

        info!(
            "run finished: {} target(s), {} succeeded, {} degraded, {} skipped, {} failed",
            summary.targets, summary.succeeded, summary.degraded, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    /// Try credentials against one target until one is accepted or the
    /// target ends for another reason.
    pub async fn run_target(&self, target: &Target) -> TargetReport {
        let started_at = Local::now();
        let Some(commands) = self.config.commands_for(target) else {
            warn!("{}: no command list, skipping", target);
            return TargetReport {
                target: target.clone(),
                hostname: None,
                username: None,
                started_at,
                outcome: TargetOutcome::Skipped {
                    reason: "no command list for this target".to_string(),
                },
            };
        };

        let mut cursor = CredentialCursor::new(&self.config.credentials);
        let mut attempted = Vec::new();

        let (summary, outcome) = loop {
            if self.cancel.is_cancelled() {
                break (
                    None,
                    TargetOutcome::Cancelled {
                        output: CapturedOutput::new(),
                    },
                );
            }

            let Some(credential) = cursor.current() else {
                warn!("{}: all credentials rejected", target);
                break (None, TargetOutcome::AllCredentialsExhausted { attempted });
            };

            info!("{}: trying username '{}'", target, credential.username());
            attempted.push(credential.username().to_string());

            let (result, timed_out) = self.attempt(target, credential, commands).await;
            match result {
                AttemptResult::AuthFailed => cursor.advance(),
                AttemptResult::Unreachable(error) => {
                    let outcome = if error.is_cancelled() {
                        self.aborted_outcome(target, error, CapturedOutput::new(), timed_out)
                    } else {
                        warn!("{}: unreachable: {}", target, error);
                        TargetOutcome::Unreachable {
                            message: error.to_string(),
                        }
                    };
                    break (None, outcome);
                }
                AttemptResult::Completed(mut summary) => {
                    let output = std::mem::take(&mut summary.output);
                    let outcome = match summary.elevation {
                        Some(ElevationStatus::Failed) => TargetOutcome::Degraded {
                            warning: "enable secret rejected, commands ran unprivileged"
                                .to_string(),
                            output,
                        },
                        _ => TargetOutcome::Success { output },
                    };
                    break (Some(summary), outcome);
                }
                AttemptResult::Aborted { error, mut summary } => {
                    let output = std::mem::take(&mut summary.output);
                    let outcome = self.aborted_outcome(target, error, output, timed_out);
                    break (Some(summary), outcome);
                }
            }
        };

        TargetReport {
            target: target.clone(),
            hostname: summary.as_ref().and_then(|s| s.hostname.clone()),
            username: summary.and_then(|s| s.username),
            started_at,
            outcome,
        }
    }

    /// One attempt, bounded by the attempt timeout when one is set.
    ///
    /// Returns whether the deadline fired.
    async fn attempt(
        &self,
        target: &Target,
        credential: &Credential,
        commands: &[String],
    ) -> (AttemptResult, bool) {
        let cancel = self.cancel.child_token();
        let plan = AttemptPlan {
            credential,
            enable_secret: self.config.enable_secret.as_ref(),
            commands,
        };
        let attempt = run_attempt(
            &self.connector,
            target,
            &self.config.session,
            plan,
            cancel.clone(),
        );

        let Some(limit) = self.config.attempt_timeout else {
            return (attempt.await, false);
        };

        let mut attempt = pin!(attempt);
        tokio::select! {
            result = &mut attempt => (result, false),
            _ = tokio::time::sleep(limit) => {
                warn!("{}: attempt exceeded {:?}, aborting", target, limit);
                cancel.cancel();
                (attempt.await, true)
            }
        }
    }

    fn aborted_outcome(
        &self,
        target: &Target,
        error: Error,
        output: CapturedOutput,
        timed_out: bool,
    ) -> TargetOutcome {
        warn!("{}: aborted: {}", target, error);
        match error {
            Error::Channel(ChannelError::Cancelled) if timed_out => TargetOutcome::TimedOut {
                message: format!(
                    "attempt exceeded {:?}",
                    self.config.attempt_timeout.unwrap_or(Duration::ZERO)
                ),
                output,
            },
            Error::Channel(ChannelError::Cancelled) => TargetOutcome::Cancelled { output },
            Error::Channel(ChannelError::PromptTimeout(_)) => TargetOutcome::PromptTimeout {
                message: error.to_string(),
                output,
            },
            Error::Transport(TransportError::Disconnected) => TargetOutcome::Disconnected {
                message: error.to_string(),
                output,
            },
            other => TargetOutcome::Disconnected {
                message: other.to_string(),
                output,
            },
        }
    }
}
