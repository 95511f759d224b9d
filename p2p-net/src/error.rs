// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The crate-wide error type.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NetError>;

/// All error kinds surfaced by the node runtime.
#[derive(Debug, Error)]
pub enum NetError {
    /// `Network::builder().build()` failed validation.
    #[error("build error: {0}")]
    Build(String),

    /// A dial attempt could not establish a transport-level connection.
    #[error("dial error for {address}: {source}")]
    Dial {
        /// The dial-string that failed.
        address: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The post-connect handshake failed: bad signature or a PeerID whose
    /// hash does not match its declared public key.
    #[error("handshake failed with {address}: {reason}")]
    HandshakeFailed {
        /// The remote dial-string, if known at the time of failure.
        address: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A frame or envelope violated the wire contract (oversized frame,
    /// malformed envelope, or — in strict mode — an unregistered payload
    /// type).
    #[error("protocol violation from {address}: {reason}")]
    ProtocolViolation {
        /// The remote dial-string.
        address: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The peer's stream closed while an operation was pending on it.
    #[error("peer {address} disconnected")]
    PeerDisconnected {
        /// The remote dial-string.
        address: String,
    },

    /// A `Request`'s deadline elapsed before a reply arrived.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Local shutdown cancelled a pending operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A component's `Receive` hook returned an error. Logged, never
    /// propagated to the connection.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// Underlying I/O failure not otherwise classified above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope or payload (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A dial-string failed to parse.
    #[error("invalid dial-string {0:?}")]
    InvalidAddress(String),
}

impl From<rmp_serde::encode::Error> for NetError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        NetError::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for NetError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        NetError::Codec(e.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for NetError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        NetError::Cancelled
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for NetError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        NetError::Cancelled
    }
}
