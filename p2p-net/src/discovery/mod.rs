// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Peer discovery: liveness (`Ping`/`Pong`), routing-table maintenance, and
//! the iterative lookup protocol (`LookupNodeRequest`/`LookupNodeResponse`).
//!
//! Every inbound message, regardless of kind, refreshes the sender's entry
//! in the routing table before any other handling happens — this component
//! is meant to be registered first in the pipeline so later components can
//! assume the table is current.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use p2p_identity::PeerId;
use p2p_kad::{find_node, LookupConfig, RoutingTable, RoutingTableConfig};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::client::PeerClient;
use crate::component::{Component, ComponentContext, ComponentId};
use crate::envelope::Message;
use crate::error::Result;
use crate::network::Network;

/// A liveness probe. Disabled replies are still worth sending (a `Ping`
/// always updates the table for its sender via the pipeline's pre-hook).
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Ping;

impl Message for Ping {
    const PAYLOAD_TYPE: &'static str = "Ping";
}

/// Reply to a [`Ping`], and the trigger for this node to run a `FindNode`
/// lookup centered on its own id against the replying peer.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Pong;

impl Message for Pong {
    const PAYLOAD_TYPE: &'static str = "Pong";
}

/// Ask a peer for the `k` entries in its routing table closest to `target`.
#[derive(Clone, Serialize, Deserialize)]
pub struct LookupNodeRequest {
    /// The 32-byte hash to find peers closest to.
    pub target: [u8; p2p_identity::HASH_LEN],
}

impl Message for LookupNodeRequest {
    const PAYLOAD_TYPE: &'static str = "LookupNodeRequest";
}

/// Reply to a [`LookupNodeRequest`]: the closest peers the replying node
/// currently knows about.
#[derive(Clone, Serialize, Deserialize)]
pub struct LookupNodeResponse {
    /// Closest known peers, ascending by distance to the request's target.
    pub peers: Vec<PeerId>,
}

impl Message for LookupNodeResponse {
    const PAYLOAD_TYPE: &'static str = "LookupNodeResponse";
}

/// Which of the discovery component's own-initiative behaviors are active.
///
/// A node can still answer every request type regardless of these flags;
/// they only govern what this node *sends* unprompted (a `Pong` reply to a
/// `Ping`, or a `FindNode` lookup triggered by receiving one).
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscoveryFlags {
    /// Never reply to an inbound `Ping` with a `Pong`.
    pub disable_pong: bool,
    /// Never send a `Ping` on `peer_connect`, including for a client
    /// registered via [`Network::bootstrap`].
    pub disable_ping: bool,
    /// Never run a `FindNode` lookup on receiving a `Pong`.
    pub disable_lookup: bool,
}

/// The discovery component: owns a [`RoutingTable`] and answers/initiates
/// the liveness and lookup protocol.
pub struct DiscoveryComponent {
    flags: DiscoveryFlags,
    lookup_config: LookupConfig,
    request_timeout: Duration,
    routes: Arc<RoutingTable>,
}

impl DiscoveryComponent {
    /// Build a discovery component for a node with the given local hash.
    pub fn new(
        local_hash: [u8; p2p_identity::HASH_LEN],
        table_config: RoutingTableConfig,
        lookup_config: LookupConfig,
        request_timeout: Duration,
        flags: DiscoveryFlags,
    ) -> Self {
        Self {
            flags,
            lookup_config,
            request_timeout,
            routes: Arc::new(RoutingTable::new(local_hash, table_config)),
        }
    }

    /// The routing table this component maintains, for read access by demo
    /// code or other components (e.g. to print known peers).
    pub fn routes(&self) -> &Arc<RoutingTable> {
        &self.routes
    }

    async fn run_lookup(&self, network: &Network, target: [u8; p2p_identity::HASH_LEN]) {
        let span = tracing::info_span!("lookup", local = %network.id().address());
        let seed = self.routes.find_closest_peers(&target, self.lookup_config.k);
        let network = network.clone();
        let request_timeout = self.request_timeout;

        tracing::debug!(parent: &span, seeds = seed.len(), "starting iterative lookup");

        let found = find_node(&target, seed, &self.lookup_config, |candidate| {
            let network = network.clone();
            async move {
                let client = network.client(candidate.address()).await.ok()?;
                client
                    .request::<_, LookupNodeResponse>(&LookupNodeRequest { target }, request_timeout)
                    .await
                    .ok()
                    .map(|r| r.peers)
            }
        })
        .instrument(span)
        .await;

        for peer in found {
            self.routes.update(peer);
        }
    }
}

#[async_trait]
impl Component for DiscoveryComponent {
    fn id(&self) -> ComponentId {
        "discovery"
    }

    async fn receive(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.routes.update(ctx.sender().clone());

        if let Some(_ping) = ctx.message::<Ping>() {
            if !self.flags.disable_pong {
                ctx.reply(&Pong).await?;
            }
            return Ok(());
        }

        if let Some(_pong) = ctx.message::<Pong>() {
            if !self.flags.disable_lookup {
                let target = *ctx.local_id().hash();
                self.run_lookup(ctx.network(), target).await;
            }
            return Ok(());
        }

        if let Some(request) = ctx.message::<LookupNodeRequest>() {
            let peers = self.routes.find_closest_peers(&request.target, self.lookup_config.k);
            ctx.reply(&LookupNodeResponse { peers }).await?;
            return Ok(());
        }

        Ok(())
    }

    async fn peer_connect(&self, client: &Arc<PeerClient>) {
        if self.flags.disable_ping {
            return;
        }
        if let Err(e) = client.tell(&Ping).await {
            tracing::debug!(address = client.address(), error = %e, "failed to send initial ping");
        }
    }

    async fn peer_disconnect(&self, client: &Arc<PeerClient>) {
        if let Some(id) = client.id().await {
            self.routes.remove_peer(id.hash());
        }
    }
}
