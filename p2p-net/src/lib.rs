// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! A peer-authenticated node runtime.
//!
//! A [`network::Network`] binds a listener, dials and handshakes outbound
//! connections, and dispatches every inbound, signature-verified message
//! through an ordered pipeline of [`component::Component`]s. Transport is
//! pluggable behind [`transport::Transport`] (TCP and KCP ship built in);
//! peer discovery is itself just another component, built on
//! [`p2p_kad`]'s routing table and iterative lookup.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

pub mod client;
pub mod component;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod network;
pub mod transport;

pub use client::{ConnectionState, PeerClient};
pub use component::{Component, ComponentContext, ComponentId};
pub use envelope::{Envelope, Message, MessageRegistry};
pub use error::{NetError, Result};
pub use network::{Network, NetworkBuilder, NetworkConfig};
pub use transport::{DialString, KcpTransport, Listener, TcpTransport, Transport, TransportRegistry};
