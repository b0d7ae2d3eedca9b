//! Captured command output.

use std::time::Duration;

use indexmap::IndexMap;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Response from a command execution.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// The command that was executed.
    pub command: String,

    /// The command output (echo line and trailing prompt line removed).
    pub result: String,

    /// The raw output before normalization.
    pub raw_result: String,

    /// The prompt that was matched at the end.
    pub prompt: String,

    /// Time taken to execute the command.
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl Response {
    /// Create a new response.
    pub fn new(
        command: impl Into<String>,
        result: impl Into<String>,
        raw_result: impl Into<String>,
        prompt: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            result: result.into(),
            raw_result: raw_result.into(),
            prompt: prompt.into(),
            elapsed,
        }
    }

    /// Get the result lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.result.lines()
    }

    /// Check if the result contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.result.contains(pattern)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.result)
    }
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

/// Where a piece of captured text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKey {
    /// Text the device printed before the login cue.
    Banner,

    /// Response to the command at this index of the command list.
    Command(usize),
}

/// Everything captured during one session, in the order it happened.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    entries: IndexMap<OutputKey, Response>,
}

impl CapturedOutput {
    /// Create an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pre-login banner.
    pub fn set_banner(&mut self, banner: impl Into<String>) {
        let banner = banner.into();
        self.entries.insert(
            OutputKey::Banner,
            Response::new("", banner.clone(), banner, "", Duration::ZERO),
        );
    }

    /// Record the response to command `index`.
    pub fn insert(&mut self, index: usize, response: Response) {
        self.entries.insert(OutputKey::Command(index), response);
    }

    /// The pre-login banner, if any was seen.
    pub fn banner(&self) -> Option<&str> {
        self.entries
            .get(&OutputKey::Banner)
            .map(|r| r.result.as_str())
    }

    /// Response to command `index`.
    pub fn get(&self, index: usize) -> Option<&Response> {
        self.entries.get(&OutputKey::Command(index))
    }

    /// Command responses in execution order.
    pub fn responses(&self) -> impl Iterator<Item = &Response> {
        self.entries
            .iter()
            .filter(|(key, _)| matches!(key, OutputKey::Command(_)))
            .map(|(_, response)| response)
    }

    /// All entries, banner included, in capture order.
    pub fn iter(&self) -> impl Iterator<Item = (&OutputKey, &Response)> {
        self.entries.iter()
    }

    /// Number of command responses.
    pub fn command_count(&self) -> usize {
        self.responses().count()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for CapturedOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let commands: Vec<&Response> = self.responses().collect();
        let mut state = serializer.serialize_struct("CapturedOutput", 2)?;
        state.serialize_field("banner", &self.banner())?;
        state.serialize_field("commands", &commands)?;
        state.end()
    }
}
