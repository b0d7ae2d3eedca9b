//! Line-oriented channel over a transport.

use std::time::Duration;

use log::{debug, trace};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::buffer::PatternBuffer;
use super::prompt::{DetectContext, PromptState, detect};
use crate::error::{ChannelError, Result};
use crate::transport::Transport;

/// Configuration for channel behavior.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Overall time one read step may take before the prompt is declared lost.
    pub read_timeout: Duration,

    /// Search depth for prompt detection.
    pub search_depth: usize,

    /// Appended to every line sent.
    pub line_ending: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(7),
            search_depth: 1000,
            line_ending: "\n".to_string(),
        }
    }
}

/// Channel for one interactive device session.
///
/// Every send moves the buffer mark, so the next read step only classifies
/// what the device said in response.
pub struct DeviceChannel<T> {
    /// The open transport.
    transport: T,

    /// Pattern buffer holding the whole session transcript.
    buffer: PatternBuffer,

    /// Configuration for this channel.
    config: ChannelConfig,
}

impl<T: Transport> DeviceChannel<T> {
    /// Create a channel over an open transport.
    pub fn new(transport: T, config: ChannelConfig) -> Self {
        Self {
            transport,
            buffer: PatternBuffer::new(config.search_depth),
            config,
        }
    }

    /// Send one line of input.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("channel: send {:?}", line);
        self.write_line(line).await
    }

    /// Send a secret line; it is never logged.
    pub async fn send_secret(&mut self, secret: &SecretString) -> Result<()> {
        debug!("channel: send <hidden>");
        self.write_line(secret.expose_secret()).await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.buffer.set_mark();
        let mut bytes = encode_latin1(line);
        bytes.extend_from_slice(&encode_latin1(&self.config.line_ending));
        self.transport.send(&bytes).await
    }

    /// Read until the detector reports a state accepted by `accept`.
    ///
    /// The whole step is bounded by the configured read timeout; running
    /// out of time yields [`ChannelError::PromptTimeout`]. Cancelling
    /// `cancel` aborts the in-flight read with [`ChannelError::Cancelled`].
    pub async fn read_until(
        &mut self,
        context: DetectContext,
        accept: impl Fn(PromptState) -> bool,
        cancel: &CancellationToken,
    ) -> Result<PromptState> {
        let timeout = self.config.read_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let state = detect(self.buffer.tail_since_mark(), context);
            if accept(state) {
                trace!("channel: boundary {:?}", state);
                return Ok(state);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("channel: no prompt within {:?}", timeout);
                return Err(ChannelError::PromptTimeout(timeout).into());
            }

            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChannelError::Cancelled.into()),
                chunk = self.transport.receive(remaining) => chunk?,
            };

            if !chunk.is_empty() {
                trace!(
                    "channel: chunk {} bytes, buffer {} bytes",
                    chunk.len(),
                    self.buffer.len()
                );
                self.buffer.extend(&chunk);
            }
        }
    }

    /// Read until any boundary at all is recognised.
    pub async fn read_boundary(
        &mut self,
        context: DetectContext,
        cancel: &CancellationToken,
    ) -> Result<PromptState> {
        self.read_until(context, PromptState::is_boundary, cancel)
            .await
    }

    /// Get a reference to the buffer.
    pub fn buffer(&self) -> &PatternBuffer {
        &self.buffer
    }

    /// The response to the last send, decoded.
    pub fn response_text(&self) -> String {
        decode_latin1(self.buffer.since_mark())
    }

    /// The whole session so far, decoded.
    pub fn transcript(&self) -> String {
        decode_latin1(self.buffer.as_slice())
    }

    /// Check if the transport is still open.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Close the transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

/// Decode Latin-1 bytes; every byte maps to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode text as Latin-1; characters outside it become `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
