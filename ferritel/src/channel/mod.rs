//! Channel layer for prompt detection and line I/O.
//!
//! This module handles the interactive session plumbing: the read
//! buffer, prompt boundary classification, and timed reads.

mod buffer;
mod device;
pub mod prompt;

pub use buffer::PatternBuffer;
pub use device::{ChannelConfig, DeviceChannel, decode_latin1, encode_latin1};
pub use prompt::{DetectContext, PromptState, detect};
