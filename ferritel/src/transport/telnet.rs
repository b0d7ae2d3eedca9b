//! Telnet transport over TCP.

use std::time::Duration;

use bytes::BytesMut;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::codec::TelnetCodec;
use super::config::TransportConfig;
use super::{Connector, Transport};
use crate::error::{Result, TransportError};

/// Telnet session over any byte stream (a [`TcpStream`] in production).
pub struct TelnetTransport<S = TcpStream> {
    /// The underlying stream (None once closed or after EOF).
    stream: Option<S>,

    /// Option negotiation state.
    codec: TelnetCodec,

    /// Scratch buffer for raw reads.
    read_buf: BytesMut,
}

impl<S> TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            codec: TelnetCodec::new(),
            read_buf: BytesMut::with_capacity(4096),
        }
    }
}

impl<S> Transport for TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
        stream.write_all(&TelnetCodec::encode(data)).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;

        self.read_buf.clear();
        self.read_buf.reserve(4096);

        let n = match tokio::time::timeout(timeout, stream.read_buf(&mut self.read_buf)).await {
            Err(_) => return Ok(Vec::new()),
            Ok(result) => result?,
        };

        if n == 0 {
            debug!("telnet: peer closed the connection");
            self.stream = None;
            return Err(TransportError::Disconnected.into());
        }

        let mut data = Vec::with_capacity(n);
        let mut replies = Vec::new();
        self.codec.decode(&self.read_buf[..n], &mut data, &mut replies);

        if !replies.is_empty() {
            trace!("telnet: answering {} bytes of option negotiation", replies.len());
            stream.write_all(&replies).await?;
            stream.flush().await?;
        }

        Ok(data)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                // The peer may already be gone; the socket is released either way
                debug!("telnet: shutdown error ignored: {}", e);
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl<S> Drop for TelnetTransport<S> {
    fn drop(&mut self) {
        if self.stream.is_some() {
            warn!("TelnetTransport dropped without close()");
        }
    }
}

/// Opens [`TelnetTransport`]s over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelnetConnector;

impl Connector for TelnetConnector {
    type Transport = TelnetTransport<TcpStream>;

    async fn open(&self, config: &TransportConfig) -> Result<Self::Transport> {
        debug!("telnet: connecting to {}", config.socket_addr());

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            host: config.host.clone(),
            port: config.port,
            timeout: config.connect_timeout,
        })?
        .map_err(|source| TransportError::ConnectionFailed {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;

        stream.set_nodelay(true)?;

        Ok(TelnetTransport::new(stream))
    }
}
