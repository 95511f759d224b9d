// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The component pipeline: an ordered list of pluggable message handlers
//! with lifecycle hooks, invoked for every inbound decoded message.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use p2p_identity::PeerId;

use crate::client::PeerClient;
use crate::envelope::Message;
use crate::error::Result;
use crate::network::Network;

/// A stable, explicit tag identifying a component, used for registration
/// checks and runtime lookup. Deliberately a plain string rather than a type
/// id: the pipeline looks components up by a tag the implementer chooses,
/// not by language reflection.
pub type ComponentId = &'static str;

/// A pluggable capability hooked into the node's lifecycle and message
/// pipeline.
///
/// Every hook has a no-op default; a component implements only the ones it
/// needs. `Receive` is invoked once per inbound decoded message in
/// registration order; returning an error stops the pipeline for that
/// message only (logged as [`crate::error::NetError::HandlerError`]) and
/// never tears down the connection.
#[async_trait]
pub trait Component: Send + Sync {
    /// This component's stable identity tag.
    fn id(&self) -> ComponentId;

    /// Invoked exactly once after `build` and before `listen` accepts the
    /// first stream.
    async fn startup(&self, _net: &Network) {}

    /// Invoked once per inbound decoded message, in registration order.
    async fn receive(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Invoked when a peer's client transitions `Open`.
    async fn peer_connect(&self, _client: &Arc<PeerClient>) {}

    /// Invoked when a peer's client transitions to `Closed`.
    async fn peer_disconnect(&self, _client: &Arc<PeerClient>) {}

    /// Invoked exactly once on node shutdown.
    async fn cleanup(&self, _net: &Network) {}
}

/// Parameters and helper functions passed to a component's `receive` hook
/// for a single inbound message.
pub struct ComponentContext<'a> {
    network: &'a Network,
    client: Arc<PeerClient>,
    sender: PeerId,
    message: Box<dyn Any + Send>,
    payload_type: String,
    nonce: u64,
}

impl<'a> ComponentContext<'a> {
    /// Construct a context for one dispatch of one decoded message.
    ///
    /// `sender` is resolved by the caller before construction (dispatch only
    /// happens once the handshake has completed and the client's identity is
    /// known), keeping this accessor synchronous rather than forcing every
    /// `receive` implementation to await a lock just to read it.
    pub(crate) fn new(
        network: &'a Network,
        client: Arc<PeerClient>,
        sender: PeerId,
        message: Box<dyn Any + Send>,
        payload_type: String,
        nonce: u64,
    ) -> Self {
        Self {
            network,
            client,
            sender,
            message,
            payload_type,
            nonce,
        }
    }

    /// The decoded message, downcast to its concrete type.
    pub fn message<M: 'static>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// The wire tag of the decoded message.
    pub fn payload_type(&self) -> &str {
        &self.payload_type
    }

    /// The client the message arrived on.
    pub fn client(&self) -> &Arc<PeerClient> {
        &self.client
    }

    /// The owning network.
    pub fn network(&self) -> &Network {
        self.network
    }

    /// The local node's identity.
    pub fn local_id(&self) -> &PeerId {
        self.network.id()
    }

    /// The sending peer's identity, resolved once the handshake completed.
    pub fn sender(&self) -> &PeerId {
        &self.sender
    }

    /// Send a reply correlated to this message's nonce.
    pub async fn reply<M: Message>(&self, msg: &M) -> Result<()> {
        self.client.reply(self.nonce, msg).await
    }
}
