// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The node runtime: local identity, listener, the set of active peer
//! clients, the component pipeline, and the broadcast/dial API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use p2p_identity::{Keypair, PeerId};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::Instrument;

use crate::client::{handshake, ConnectionState, HandshakeHello, PeerClient};
use crate::component::{Component, ComponentContext};
use crate::envelope::{Envelope, Message, MessageRegistry};
use crate::error::{NetError, Result};
use crate::transport::TransportRegistry;

/// Tuning parameters for a [`Network`].
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Bucket size (`k`) used by the discovery component's routing table and
    /// iterative lookups.
    pub bucket_size: usize,
    /// Parallelism (`α`) used by iterative lookups.
    pub alpha: usize,
    /// Replacement-cache size per routing-table bucket.
    pub replacement_cache_size: usize,
    /// Default deadline for `PeerClient::request`.
    pub request_timeout: Duration,
    /// Capacity of each peer client's outbound send queue.
    pub send_queue_capacity: usize,
    /// Capacity of each peer client's inbound dispatch queue; when full the
    /// reader task blocks, providing back-pressure.
    pub inbound_queue_capacity: usize,
    /// Maximum encoded frame length, beyond which a connection is closed
    /// with a protocol violation.
    pub max_frame_len: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bucket_size: 16,
            alpha: 8,
            replacement_cache_size: 5,
            request_timeout: Duration::from_secs(3),
            send_queue_capacity: 64,
            inbound_queue_capacity: 64,
            max_frame_len: crate::envelope::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl NetworkConfig {
    /// A preset suited to local multi-node demos and tests: unchanged
    /// timeouts but explicit for documentation purposes.
    pub fn for_demo() -> Self {
        Self::default()
    }

    /// A low-latency preset with short timeouts and small queues, suited to
    /// fast-failing local integration tests.
    pub fn low_latency() -> Self {
        Self {
            request_timeout: Duration::from_millis(500),
            send_queue_capacity: 16,
            inbound_queue_capacity: 16,
            ..Self::default()
        }
    }

    /// Override the bucket size / `k` parameter.
    pub fn with_bucket_size(mut self, k: usize) -> Self {
        self.bucket_size = k;
        self
    }

    /// Override the lookup parallelism / `α` parameter.
    pub fn with_alpha(mut self, alpha: usize) -> Self {
        self.alpha = alpha;
        self
    }

    /// Override the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the outbound send-queue capacity.
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Override the maximum frame length.
    pub fn with_max_frame_len(mut self, len: u32) -> Self {
        self.max_frame_len = len;
        self
    }
}

pub(crate) struct NetworkInner {
    id: PeerId,
    keys: Keypair,
    config: NetworkConfig,
    transports: TransportRegistry,
    registry: MessageRegistry,
    components: Vec<Arc<dyn Component>>,
    clients: RwLock<HashMap<String, Arc<PeerClient>>>,
    listening: watch::Sender<bool>,
    bound_address: RwLock<Option<String>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl NetworkInner {
    pub(crate) fn id(&self) -> &PeerId {
        &self.id
    }

    pub(crate) fn keys_clone(&self) -> Keypair {
        self.keys.clone()
    }

    pub(crate) async fn remove_client(&self, address: &str) {
        self.clients.write().await.remove(address);
    }
}

/// The node runtime.
///
/// A cheap-to-clone handle: every clone shares the same listener, client
/// map, and component pipeline.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

impl Network {
    /// Start building a `Network`.
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    /// This node's identity.
    pub fn id(&self) -> &PeerId {
        &self.inner.id
    }

    /// This node's configured listen address.
    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Look up a registered component by its stable tag.
    pub fn component(&self, id: &str) -> Option<Arc<dyn Component>> {
        self.inner.components.iter().find(|c| c.id() == id).cloned()
    }

    /// Run every component's `startup` hook exactly once. Called
    /// automatically by [`Network::listen`] before the first stream is
    /// accepted; exposed separately so a caller that only dials out (and
    /// never accepts) still gets `startup` semantics.
    pub async fn startup(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for component in &self.inner.components {
            component.startup(self).await;
        }
    }

    /// Run every component's `cleanup` hook exactly once, then cancel all
    /// outstanding requests on every open client with [`NetError::Cancelled`]
    /// and close them.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let span = tracing::info_span!("cleanup", local = %self.inner.id.address());
        async {
            for component in &self.inner.components {
                component.cleanup(self).await;
            }
            let clients: Vec<Arc<PeerClient>> =
                self.inner.clients.read().await.values().cloned().collect();
            tracing::info!(peers = clients.len(), "cancelling outstanding requests on shutdown");
            for client in clients {
                client.close_for_shutdown().await;
            }
        }
        .instrument(span)
        .await;
    }

    /// Bind the listener and accept inbound streams, spawning a reader/
    /// writer/dispatch task set per connection. Blocks until the node is
    /// shut down or the listener errors.
    pub async fn listen(&self) -> Result<()> {
        let address = self
            .inner
            .bound_address
            .read()
            .await
            .clone()
            .ok_or_else(|| NetError::Build("no listen address configured".to_string()))?;

        self.startup().await;

        let mut listener = self.inner.transports.listen(&address).await?;
        let _ = self.inner.listening.send(true);

        loop {
            let (stream, remote) = listener.accept().await?;
            let network = self.inner.clone();
            let span = tracing::info_span!("accept", local = %network.id.address(), remote = %remote);
            tokio::spawn(
                async move {
                    if let Err(e) = accept_connection(network, stream, remote).await {
                        tracing::warn!(error = %e, "inbound handshake failed");
                    }
                }
                .instrument(span),
            );
        }
    }

    /// Return once the listener has bound (or immediately if it already
    /// has). Level-triggered: unlike an edge-triggered notification, a
    /// caller that only reaches this after the listener has already bound
    /// returns immediately instead of waiting for a signal that already
    /// fired.
    pub async fn block_until_listening(&self) {
        let mut rx = self.inner.listening.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Dial each address, handshaking and registering the resulting client.
    /// The discovery component's bootstrap flow (an initial `Ping`, then a
    /// `FindNode` lookup once the `Pong` arrives) runs automatically through
    /// its `PeerConnect` hook once the client is registered; a node with no
    /// discovery component registered simply gains an open connection.
    pub async fn bootstrap(&self, addrs: &[impl AsRef<str>]) -> Result<()> {
        for addr in addrs {
            let addr = addr.as_ref();
            if let Err(e) = self.client(addr).await {
                tracing::warn!(address = addr, error = %e, "failed to bootstrap");
            }
        }
        Ok(())
    }

    /// Send `msg` as `tell` to every currently open peer client. Best
    /// effort: per-peer failures are logged and never abort the broadcast.
    pub async fn broadcast<M: Message>(&self, msg: &M) {
        let clients: Vec<Arc<PeerClient>> = self.inner.clients.read().await.values().cloned().collect();
        for client in clients {
            if client.state().await != ConnectionState::Open {
                continue;
            }
            if let Err(e) = client.tell(msg).await {
                tracing::warn!(address = client.address(), error = %e, "broadcast to peer failed");
            }
        }
    }

    /// Return the open client for `addr`, dialing and handshaking if
    /// necessary.
    pub async fn client(&self, addr: &str) -> Result<Arc<PeerClient>> {
        if let Some(existing) = self.inner.clients.read().await.get(addr).cloned() {
            return Ok(existing);
        }

        let stream = self.inner.transports.dial(addr).await?;
        let handshaked = handshake(
            &self.inner,
            stream,
            addr.to_string(),
            self.inner.config.send_queue_capacity,
            self.inner.config.max_frame_len,
        )
        .await?;

        register_and_spawn(self.inner.clone(), handshaked, self.inner.config.clone()).await
    }
}

async fn accept_connection(
    network: Arc<NetworkInner>,
    stream: crate::transport::BoxedStream,
    remote: String,
) -> Result<()> {
    let config = network.config.clone();
    let handshaked = handshake(
        &network,
        stream,
        remote,
        config.send_queue_capacity,
        config.max_frame_len,
    )
    .await?;
    register_and_spawn(network, handshaked, config).await?;
    Ok(())
}

async fn register_and_spawn(
    network: Arc<NetworkInner>,
    handshaked: crate::client::Handshaked,
    config: NetworkConfig,
) -> Result<Arc<PeerClient>> {
    let client = handshaked.client;
    let address = client.address().to_string();

    network
        .clients
        .write()
        .await
        .insert(address.clone(), client.clone());

    for component in &network.components {
        component.peer_connect(&client).await;
    }

    let (inbound_tx, inbound_rx) = mpsc::channel::<Envelope>(config.inbound_queue_capacity);

    spawn_dispatch_task(network.clone(), client.clone(), inbound_rx);
    spawn_reader_task(network.clone(), client.clone(), handshaked.reader, inbound_tx, config.max_frame_len);

    Ok(client)
}

fn spawn_dispatch_task(
    network: Arc<NetworkInner>,
    client: Arc<PeerClient>,
    mut inbound_rx: mpsc::Receiver<Envelope>,
) {
    let span = tracing::info_span!("dispatch", local = %network.id.address(), peer = %client.address());
    tokio::spawn(
        async move {
            while let Some(envelope) = inbound_rx.recv().await {
                dispatch(&network, &client, envelope).await;
            }
        }
        .instrument(span),
    );
}

fn spawn_reader_task(
    network: Arc<NetworkInner>,
    client: Arc<PeerClient>,
    mut reader: Box<dyn tokio::io::AsyncRead + Unpin + Send>,
    inbound_tx: mpsc::Sender<Envelope>,
    max_frame_len: u32,
) {
    let span = tracing::info_span!("reader", local = %network.id.address(), peer = %client.address());
    tokio::spawn(
        async move {
            loop {
                match Envelope::read_frame(&mut reader, max_frame_len).await {
                    Ok(envelope) if envelope.reply_flag => {
                        client.resolve_reply(envelope).await;
                    }
                    Ok(envelope) if !envelope.verify() => {
                        tracing::warn!("dropping envelope with invalid signature");
                    }
                    Ok(envelope) => {
                        // Back-pressure: a full inbound queue suspends this reader,
                        // which in turn stops draining the socket.
                        if inbound_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::info!(error = %e, "connection closed");
                        break;
                    }
                }
            }

            client.close().await;
            for component in &network.components {
                component.peer_disconnect(&client).await;
            }
        }
        .instrument(span),
    );
}

async fn dispatch(network: &Arc<NetworkInner>, client: &Arc<PeerClient>, envelope: Envelope) {
    let decoded = match network.registry.decode(&envelope.payload_type, &envelope.payload) {
        Ok(Some(value)) => value,
        Ok(None) => {
            tracing::debug!(payload_type = %envelope.payload_type, "dropping unregistered payload type");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode envelope payload");
            return;
        }
    };

    // The handshake has already completed by the time anything reaches the
    // dispatch queue, so the client's identity is always known here.
    let Some(sender) = client.id().await else {
        tracing::warn!(address = client.address(), "dispatch with no resolved sender identity");
        return;
    };

    let network_handle = Network { inner: network.clone() };
    let ctx = ComponentContext::new(
        &network_handle,
        client.clone(),
        sender,
        decoded,
        envelope.payload_type.clone(),
        envelope.nonce,
    );

    for component in &network.components {
        if let Err(e) = component.receive(&ctx).await {
            tracing::warn!(component = component.id(), error = %e, "component handler error");
            break;
        }
    }
}

/// Builder for [`Network`], validating keys, address, and component
/// uniqueness at `build`.
pub struct NetworkBuilder {
    keys: Option<Keypair>,
    address: Option<String>,
    config: NetworkConfig,
    components: Vec<Arc<dyn Component>>,
    registry: MessageRegistry,
    transports: TransportRegistry,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        let mut registry = MessageRegistry::new();
        registry.register::<HandshakeHello>();
        Self {
            keys: None,
            address: None,
            config: NetworkConfig::default(),
            components: Vec::new(),
            registry,
            transports: TransportRegistry::default_stack(),
        }
    }
}

impl NetworkBuilder {
    /// A builder with default configuration and the default transport
    /// stack (`tcp` and `kcp`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local keypair.
    pub fn with_keys(mut self, keys: Keypair) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Set the local dial-string address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Override the default configuration.
    pub fn with_config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a message type so inbound envelopes carrying its
    /// `PAYLOAD_TYPE` can be decoded.
    pub fn register_message<M: Message>(mut self) -> Self {
        self.registry.register::<M>();
        self
    }

    /// Add a component to the pipeline. Fails at `build` (not here) if
    /// another component with the same [`Component::id`] was already added.
    pub fn add_component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    /// Add the discovery component and register its four message types
    /// (`Ping`, `Pong`, `LookupNodeRequest`, `LookupNodeResponse`) in one
    /// step, matching the message registry the discovery protocol requires.
    pub fn with_discovery(self, component: Arc<crate::discovery::DiscoveryComponent>) -> Self {
        self.register_message::<crate::discovery::Ping>()
            .register_message::<crate::discovery::Pong>()
            .register_message::<crate::discovery::LookupNodeRequest>()
            .register_message::<crate::discovery::LookupNodeResponse>()
            .add_component(component)
    }

    /// Validate configuration and construct the `Network`.
    pub fn build(self) -> Result<Network> {
        let keys = self
            .keys
            .ok_or_else(|| NetError::Build("keys not set".to_string()))?;
        let address = self
            .address
            .ok_or_else(|| NetError::Build("address not set".to_string()))?;
        crate::transport::DialString::parse(&address)
            .map_err(|_| NetError::Build(format!("unparseable address {address:?}")))?;

        let mut seen = std::collections::HashSet::new();
        for component in &self.components {
            if !seen.insert(component.id()) {
                return Err(NetError::Build(format!(
                    "duplicate component type {:?}",
                    component.id()
                )));
            }
        }

        let id = keys.peer_id(address.clone());
        let (listening, _) = watch::channel(false);

        let inner = Arc::new(NetworkInner {
            id,
            keys,
            config: self.config,
            transports: self.transports,
            registry: self.registry,
            components: self.components,
            clients: RwLock::new(HashMap::new()),
            listening,
            bound_address: RwLock::new(Some(address)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        Ok(Network { inner })
    }
}
