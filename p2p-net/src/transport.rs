// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Transport layer abstractions.
//!
//! This module hides the choice of byte-stream transport behind a single
//! [`Stream`] contract and a [`TransportRegistry`] that dispatches on the
//! scheme of a dial-string. The core networking code above this module never
//! distinguishes TCP from any other registered transport.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{NetError, Result};

/// A bidirectional, reliable, ordered byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// A type-erased [`Stream`].
pub type BoxedStream = Box<dyn Stream>;

/// A bound listener yielding inbound streams.
#[async_trait]
pub trait Listener: Send {
    /// Accept the next inbound connection, returning its stream and the
    /// remote peer's address in `host:port` form.
    async fn accept(&mut self) -> Result<(BoxedStream, String)>;

    /// The address actually bound, useful when the requested port was `0`.
    fn local_addr(&self) -> String;
}

/// A transport backend selected by dial-string scheme.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// The scheme this transport answers to, e.g. `"tcp"`.
    fn scheme(&self) -> &'static str;

    /// Open an outbound stream to `host:port`.
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream>;

    /// Bind a listener on `host:port`.
    async fn listen(&self, host: &str, port: u16) -> Result<Box<dyn Listener>>;
}

/// Connection-oriented TCP transport.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    /// Disable Nagle's algorithm on accepted/dialed sockets.
    pub nodelay: bool,
}

struct TcpListenerWrapper(TcpListener);

#[async_trait]
impl Listener for TcpListenerWrapper {
    async fn accept(&mut self) -> Result<(BoxedStream, String)> {
        let (stream, addr) = self.0.accept().await.map_err(NetError::Io)?;
        Ok((Box::new(stream), addr.to_string()))
    }

    fn local_addr(&self) -> String {
        self.0
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| NetError::Dial {
                address: format!("tcp://{host}:{port}"),
                source,
            })?;
        if self.nodelay {
            let _ = stream.set_nodelay(true);
        }
        Ok(Box::new(stream))
    }

    async fn listen(&self, host: &str, port: u16) -> Result<Box<dyn Listener>> {
        let listener = TcpListener::bind((host, port)).await.map_err(NetError::Io)?;
        Ok(Box::new(TcpListenerWrapper(listener)))
    }
}

/// Reliable-UDP (KCP) transport, interchangeable with [`TcpTransport`] from
/// the core's point of view.
#[derive(Debug, Clone, Default)]
pub struct KcpTransport {
    /// KCP tuning parameters; defaults match `tokio_kcp`'s own defaults.
    pub config: tokio_kcp::KcpConfig,
}

struct KcpListenerWrapper(tokio_kcp::KcpListener);

#[async_trait]
impl Listener for KcpListenerWrapper {
    async fn accept(&mut self) -> Result<(BoxedStream, String)> {
        let (stream, addr) = self.0.accept().await.map_err(NetError::Io)?;
        Ok((Box::new(stream), addr.to_string()))
    }

    fn local_addr(&self) -> String {
        self.0
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for KcpTransport {
    fn scheme(&self) -> &'static str {
        "kcp"
    }

    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let addr = resolve(host, port)?;
        let stream = tokio_kcp::KcpStream::connect(&self.config, addr)
            .await
            .map_err(|e| NetError::Dial {
                address: format!("kcp://{host}:{port}"),
                source: std::io::Error::other(e),
            })?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, host: &str, port: u16) -> Result<Box<dyn Listener>> {
        let addr = resolve(host, port)?;
        let listener = tokio_kcp::KcpListener::bind(self.config, addr)
            .await
            .map_err(std::io::Error::other)?;
        Ok(Box::new(KcpListenerWrapper(listener)))
    }
}

fn resolve(host: &str, port: u16) -> Result<std::net::SocketAddr> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()
        .map_err(NetError::Io)?
        .next()
        .ok_or_else(|| NetError::InvalidAddress(format!("{host}:{port}")))
}

/// A parsed dial-string: `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialString {
    /// The transport scheme, e.g. `"tcp"` or `"kcp"`.
    pub scheme: String,
    /// DNS name or IP literal.
    pub host: String,
    /// Port, `1..=65535`.
    pub port: u16,
}

impl DialString {
    /// Parse a dial-string, rejecting anything not of the form
    /// `scheme://host:port`.
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| NetError::InvalidAddress(s.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| NetError::InvalidAddress(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| NetError::InvalidAddress(s.to_string()))?;
        if host.is_empty() || port == 0 {
            return Err(NetError::InvalidAddress(s.to_string()));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for DialString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Dispatches dial/listen calls to the transport registered for a
/// dial-string's scheme.
#[derive(Default)]
pub struct TransportRegistry {
    transports: Vec<Box<dyn Transport>>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport backend.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Register the TCP backend.
    pub fn with_tcp(self) -> Self {
        self.with_transport(Box::new(TcpTransport { nodelay: true }))
    }

    /// Register the KCP backend.
    pub fn with_kcp(self) -> Self {
        self.with_transport(Box::new(KcpTransport::default()))
    }

    /// The default stack: both built-in schemes registered.
    pub fn default_stack() -> Self {
        Self::new().with_tcp().with_kcp()
    }

    fn find(&self, scheme: &str) -> Result<&dyn Transport> {
        self.transports
            .iter()
            .map(AsRef::as_ref)
            .find(|t| t.scheme() == scheme)
            .ok_or_else(|| NetError::InvalidAddress(format!("unsupported scheme {scheme:?}")))
    }

    /// Dial the address named by `dial_string`.
    pub async fn dial(&self, dial_string: &str) -> Result<BoxedStream> {
        let parsed = DialString::parse(dial_string)?;
        let transport = self.find(&parsed.scheme)?;
        transport.dial(&parsed.host, parsed.port).await
    }

    /// Bind a listener at the address named by `dial_string`.
    pub async fn listen(&self, dial_string: &str) -> Result<Box<dyn Listener>> {
        let parsed = DialString::parse(dial_string)?;
        let transport = self.find(&parsed.scheme)?;
        transport.listen(&parsed.host, parsed.port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_string_parses_scheme_host_port() {
        let parsed = DialString::parse("tcp://127.0.0.1:20001").expect("valid dial-string");
        assert_eq!(parsed.scheme, "tcp");
        assert_eq!(parsed.host, "127.0.0.1");
        assert_eq!(parsed.port, 20001);
    }

    #[test]
    fn dial_string_rejects_missing_scheme() {
        assert!(DialString::parse("127.0.0.1:20001").is_err());
    }

    #[test]
    fn dial_string_rejects_zero_port() {
        assert!(DialString::parse("tcp://127.0.0.1:0").is_err());
    }

    #[tokio::test]
    async fn tcp_transport_round_trips_a_connection() {
        let registry = TransportRegistry::new().with_tcp();
        let mut listener = registry.listen("tcp://127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr();

        let dial_string = format!("tcp://{addr}");
        let dial_fut = registry.dial(&dial_string);
        let accept_fut = listener.accept();

        let (dialed, accepted) = tokio::join!(dial_fut, accept_fut);
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn dialing_an_unsupported_scheme_fails() {
        let registry = TransportRegistry::new().with_tcp();
        let result = registry.dial("quic://127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
