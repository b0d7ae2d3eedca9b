//! One (target, credential) attempt from connect to close.

use log::{debug, info};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use super::{CapturedOutput, ElevationStatus, Session, SessionState};
use crate::config::{Credential, SessionConfig, Target};
use crate::error::Error;
use crate::transport::Connector;

/// What to do once connected.
#[derive(Debug, Clone, Copy)]
pub struct AttemptPlan<'a> {
    pub credential: &'a Credential,
    pub enable_secret: Option<&'a SecretString>,
    pub commands: &'a [String],
}

/// What a session left behind.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub elevation: Option<ElevationStatus>,
    pub output: CapturedOutput,
    pub history: Vec<SessionState>,
}

/// How an attempt ended.
#[derive(Debug)]
pub enum AttemptResult {
    /// The transport could not be opened.
    Unreachable(Error),

    /// The device rejected the credential; the next one may be tried.
    AuthFailed,

    /// Every command ran.
    Completed(SessionSummary),

    /// The attempt stopped part way (timeout, disconnect, cancellation).
    Aborted { error: Error, summary: SessionSummary },
}

/// Run one attempt. The session is always closed before this returns.
pub async fn run_attempt<C: Connector>(
    connector: &C,
    target: &Target,
    config: &SessionConfig,
    plan: AttemptPlan<'_>,
    cancel: CancellationToken,
) -> AttemptResult {
    let mut session = Session::new(target.clone(), config.clone(), cancel);

    if let Err(e) = session.connect(connector).await {
        return AttemptResult::Unreachable(e);
    }

    let mut elevation = None;
    let outcome = drive(&mut session, plan, &mut elevation).await;

    if let Err(e) = session.close().await {
        debug!("attempt {}: close failed: {}", target, e);
    }

    let summary = SessionSummary {
        hostname: session.hostname().map(str::to_string),
        username: session.username().map(str::to_string),
        elevation,
        output: session.take_output(),
        history: session.history().to_vec(),
    };

    match outcome {
        Ok(()) => {
            info!(
                "{}: {} command(s) completed",
                target,
                summary.output.command_count()
            );
            AttemptResult::Completed(summary)
        }
        Err(e) if e.is_auth_failed() => AttemptResult::AuthFailed,
        Err(error) => AttemptResult::Aborted { error, summary },
    }
}

async fn drive<T: crate::transport::Transport>(
    session: &mut Session<T>,
    plan: AttemptPlan<'_>,
    elevation: &mut Option<ElevationStatus>,
) -> crate::error::Result<()> {
    session.authenticate(plan.credential).await?;
    *elevation = Some(session.elevate(plan.enable_secret).await?);
    session.run_setup().await?;
    session.execute(plan.commands).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::{ScriptedConnector, SimulatedDevice, SimulatedNetwork};

    fn commands(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_completed_attempt() {
        let network = SimulatedNetwork::new().with_device(
            "10.0.0.1",
            SimulatedDevice::new("r1")
                .with_account("admin", "pw")
                .with_response("show clock", "12:00\r\n"),
        );
        let log = network.log();
        let credential = Credential::new("admin", "pw");
        let cmds = commands(&["show clock"]);

        let result = run_attempt(
            &network,
            &Target::new("10.0.0.1"),
            &SessionConfig::default(),
            AttemptPlan {
                credential: &credential,
                enable_secret: None,
                commands: &cmds,
            },
            CancellationToken::new(),
        )
        .await;

        let AttemptResult::Completed(summary) = result else {
            panic!("expected completion, got {:?}", result);
        };
        assert_eq!(summary.hostname.as_deref(), Some("r1"));
        assert_eq!(summary.elevation, Some(ElevationStatus::Skipped));
        assert_eq!(summary.history.last(), Some(&SessionState::Closed));
        // Setup commands run but are not captured
        assert_eq!(log.commands("10.0.0.1"), vec!["terminal length 0", "show clock"]);
        assert_eq!(summary.output.command_count(), 1);
        assert!(log.all_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_output_and_closes() {
        let connector = ScriptedConnector::new(&[
            "Username: ",
            "admin\r\nPassword: ",
            "\r\nr1>",
            "terminal length 0\r\nr1>",
            "show clock\r\n12:00\r\nr1>",
            "show run\r\nBuilding configuration...\r\n",
        ]);
        let recorder = connector.recorder();
        let credential = Credential::new("admin", "pw");
        let cmds = commands(&["show clock", "show run"]);

        let result = run_attempt(
            &connector,
            &Target::new("10.0.0.1"),
            &SessionConfig::default(),
            AttemptPlan {
                credential: &credential,
                enable_secret: None,
                commands: &cmds,
            },
            CancellationToken::new(),
        )
        .await;

        let AttemptResult::Aborted { error, summary } = result else {
            panic!("expected abort, got {:?}", result);
        };
        assert!(error.is_prompt_timeout());
        assert_eq!(summary.output.command_count(), 1);
        assert_eq!(summary.output.get(0).unwrap().result, "12:00\r\n");
        assert!(recorder.is_closed());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let network = SimulatedNetwork::new();
        let credential = Credential::new("admin", "pw");

        let result = run_attempt(
            &network,
            &Target::new("192.0.2.1"),
            &SessionConfig::default(),
            AttemptPlan {
                credential: &credential,
                enable_secret: None,
                commands: &[],
            },
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, AttemptResult::Unreachable(e) if e.is_connect_error()));
    }
}
