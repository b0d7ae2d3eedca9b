//! Prompt boundary detection.
//!
//! Classifies the last non-empty line of the text received since the last
//! send. This is a purely textual heuristic: a `#` or `>` that ends an
//! ordinary output line at the moment a read returns is taken as the
//! prompt, and the session falls out of step with the device. Callers
//! limit the damage by only classifying the region after the send mark.

use serde::Serialize;

/// What the device is waiting for, judged from the tail of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptState {
    /// A `Username:` cue.
    AwaitingUsername,

    /// A `Password:` cue during login.
    AwaitingPassword,

    /// A line ending in `>`.
    UnprivilegedPrompt,

    /// A line ending in `#`.
    PrivilegedPrompt,

    /// A `Password:` cue after `enable` was sent.
    AwaitingEnablePassword,

    /// No recognisable boundary yet; read more.
    Incomplete,
}

impl PromptState {
    /// Whether this is a command prompt (either privilege).
    pub fn is_prompt(self) -> bool {
        matches!(self, Self::UnprivilegedPrompt | Self::PrivilegedPrompt)
    }

    /// Whether any boundary was recognised.
    pub fn is_boundary(self) -> bool {
        self != Self::Incomplete
    }
}

/// Session context the detector needs besides the text itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectContext {
    /// `enable` was the last thing sent, so a password cue is for the secret.
    pub enable_requested: bool,
}

impl DetectContext {
    /// Context for reads that follow an `enable` request.
    pub fn enable() -> Self {
        Self {
            enable_requested: true,
        }
    }
}

/// Classify the trailing boundary of `tail`.
///
/// `#` is checked before `>`.
pub fn detect(tail: &[u8], context: DetectContext) -> PromptState {
    let Some(line) = last_nonempty_line(tail) else {
        return PromptState::Incomplete;
    };

    match line.last() {
        Some(b'#') => return PromptState::PrivilegedPrompt,
        Some(b'>') => return PromptState::UnprivilegedPrompt,
        _ => {}
    }

    if contains_ignore_ascii_case(line, b"username:") {
        PromptState::AwaitingUsername
    } else if contains_ignore_ascii_case(line, b"password:") {
        if context.enable_requested {
            PromptState::AwaitingEnablePassword
        } else {
            PromptState::AwaitingPassword
        }
    } else {
        PromptState::Incomplete
    }
}

/// The last line of `data` that is not blank, with surrounding whitespace
/// (including `\r`) trimmed.
pub fn last_nonempty_line(data: &[u8]) -> Option<&[u8]> {
    let mut end = data.len();
    loop {
        let start = memchr::memrchr(b'\n', &data[..end]).map_or(0, |i| i + 1);
        let line = data[start..end].trim_ascii();
        if !line.is_empty() {
            return Some(line);
        }
        if start == 0 {
            return None;
        }
        end = start - 1;
    }
}

/// Device hostname from a prompt line (`router#` → `router`).
pub fn hostname_from_prompt(prompt: &str) -> &str {
    prompt
        .trim()
        .trim_end_matches(['>', '#'])
        .trim_end()
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len()
        && haystack
            .windows(needle.len())
            .any(|w| w.eq_ignore_ascii_case(needle))
}
