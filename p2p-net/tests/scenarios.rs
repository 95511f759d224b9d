// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Multi-node scenarios exercising bootstrap discovery, request/reply,
//! timeouts, disconnect cancellation, and broadcast fan-out against real
//! loopback TCP connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use p2p_identity::{Keypair, HASH_LEN};
use p2p_kad::{LookupConfig, RoutingTableConfig};
use p2p_net::component::{Component, ComponentContext, ComponentId};
use p2p_net::discovery::{DiscoveryComponent, DiscoveryFlags};
use p2p_net::envelope::Message;
use p2p_net::error::{NetError, Result};
use p2p_net::network::{Network, NetworkConfig};
use serde::{Deserialize, Serialize};

fn free_tcp_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local_addr").port();
    drop(listener);
    format!("tcp://127.0.0.1:{port}")
}

async fn spawn_listening(network: Network) -> Network {
    let listen_net = network.clone();
    tokio::spawn(async move {
        let _ = listen_net.listen().await;
    });
    network.block_until_listening().await;
    network
}

fn discovery_component(local_hash: [u8; HASH_LEN]) -> Arc<DiscoveryComponent> {
    Arc::new(DiscoveryComponent::new(
        local_hash,
        RoutingTableConfig::default(),
        LookupConfig::default(),
        Duration::from_millis(500),
        DiscoveryFlags::default(),
    ))
}

/// A bare node with no discovery component, bound to a fresh loopback port.
async fn plain_node(config: NetworkConfig) -> Network {
    let keys = Keypair::generate();
    let address = free_tcp_address();
    let network = Network::builder()
        .with_keys(keys)
        .with_address(address)
        .with_config(config)
        .build()
        .expect("build network");
    spawn_listening(network).await
}

/// A node with discovery wired in, returning the component alongside so
/// tests can inspect its routing table directly.
async fn discovery_node(config: NetworkConfig) -> (Network, Arc<DiscoveryComponent>) {
    let keys = Keypair::generate();
    let address = free_tcp_address();
    let local_hash = *keys.peer_id(address.clone()).hash();
    let discovery = discovery_component(local_hash);

    let network = Network::builder()
        .with_keys(keys)
        .with_address(address)
        .with_config(config)
        .with_discovery(discovery.clone())
        .build()
        .expect("build network");

    let network = spawn_listening(network).await;
    (network, discovery)
}

async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// S1: two nodes bootstrap against each other; each learns the other's
/// identity via the `Ping`/`Pong` exchange within 500ms.
#[tokio::test]
async fn s1_two_node_bootstrap_discovery() {
    let (node_a, disc_a) = discovery_node(NetworkConfig::low_latency()).await;
    let (node_b, disc_b) = discovery_node(NetworkConfig::low_latency()).await;

    let a_addr = node_a.id().address().to_string();
    let b_hash = *node_b.id().hash();

    tokio::time::timeout(Duration::from_millis(500), async move {
        node_b.bootstrap(&[a_addr]).await.expect("bootstrap");
        let settled = wait_until(Duration::from_millis(450), || {
            disc_a.routes().peer_exists(&b_hash)
        })
        .await;
        assert!(settled, "node a should learn node b's identity");
    })
    .await
    .expect("two-node bootstrap discovery should settle within 500ms");

    assert!(disc_b.routes().len() > 0, "node b should have recorded node a");
}

/// S2: three nodes, chained bootstrap (C -> B -> A); C transitively
/// discovers A through B's `LookupNodeRequest` answers within 2s.
#[tokio::test]
async fn s2_three_node_transitive_discovery() {
    let (node_a, _disc_a) = discovery_node(NetworkConfig::low_latency()).await;
    let (node_b, disc_b) = discovery_node(NetworkConfig::low_latency()).await;
    let (node_c, disc_c) = discovery_node(NetworkConfig::low_latency()).await;

    let a_addr = node_a.id().address().to_string();
    let b_addr = node_b.id().address().to_string();
    let a_hash = *node_a.id().hash();

    tokio::time::timeout(Duration::from_secs(2), async move {
        node_b.bootstrap(&[a_addr]).await.expect("bootstrap b->a");
        assert!(
            wait_until(Duration::from_millis(900), || disc_b.routes().peer_exists(&a_hash)).await,
            "node b should discover node a"
        );

        node_c.bootstrap(&[b_addr]).await.expect("bootstrap c->b");
        assert!(
            wait_until(Duration::from_millis(900), || disc_c.routes().peer_exists(&a_hash)).await,
            "node c should transitively discover node a through node b"
        );
    })
    .await
    .expect("three-node transitive discovery should settle within 2s");
}

#[derive(Clone, Serialize, Deserialize)]
struct LoadRequest {
    id: u64,
}

impl Message for LoadRequest {
    const PAYLOAD_TYPE: &'static str = "LoadRequest";
}

#[derive(Clone, Serialize, Deserialize)]
struct LoadReply {
    id: u64,
}

impl Message for LoadReply {
    const PAYLOAD_TYPE: &'static str = "LoadReply";
}

struct EchoComponent;

#[async_trait]
impl Component for EchoComponent {
    fn id(&self) -> ComponentId {
        "echo"
    }

    async fn receive(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        if let Some(req) = ctx.message::<LoadRequest>() {
            ctx.reply(&LoadReply { id: req.id }).await?;
        }
        Ok(())
    }
}

/// S3: a request/reply round trip, echoing the request id back, matching
/// the original load-test protocol's naming.
#[tokio::test]
async fn s3_request_reply_round_trip() {
    let keys = Keypair::generate();
    let address = free_tcp_address();
    let server = Network::builder()
        .with_keys(keys)
        .with_address(address)
        .with_config(NetworkConfig::for_demo())
        .register_message::<LoadRequest>()
        .register_message::<LoadReply>()
        .add_component(Arc::new(EchoComponent))
        .build()
        .expect("build server");
    let server = spawn_listening(server).await;
    let server_addr = server.id().address().to_string();

    let client = plain_node(NetworkConfig::for_demo()).await;
    let peer = client.client(&server_addr).await.expect("dial server");

    let reply: LoadReply = peer
        .request(&LoadRequest { id: 42 }, Duration::from_secs(1))
        .await
        .expect("request should succeed");

    assert_eq!(reply.id, 42);
}

/// S4: requesting a message type no component ever replies to times out
/// around the configured deadline rather than hanging indefinitely.
#[tokio::test]
async fn s4_timeout_with_no_handler() {
    #[derive(Clone, Serialize, Deserialize)]
    struct Unanswered;
    impl Message for Unanswered {
        const PAYLOAD_TYPE: &'static str = "Unanswered";
    }
    #[derive(Clone, Serialize, Deserialize)]
    struct NeverSent;
    impl Message for NeverSent {
        const PAYLOAD_TYPE: &'static str = "NeverSent";
    }

    let server = plain_node(NetworkConfig::for_demo()).await;
    let server_addr = server.id().address().to_string();

    let client_keys = Keypair::generate();
    let client_address = free_tcp_address();
    let client = Network::builder()
        .with_keys(client_keys)
        .with_address(client_address)
        .with_config(NetworkConfig::for_demo())
        .register_message::<Unanswered>()
        .register_message::<NeverSent>()
        .build()
        .expect("build client");
    let client = spawn_listening(client).await;

    let peer = client.client(&server_addr).await.expect("dial server");

    let started = tokio::time::Instant::now();
    let result: Result<NeverSent> = peer.request(&Unanswered, Duration::from_millis(100)).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(NetError::Timeout(_))));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1), "timeout should fire close to its deadline");
}

/// S5: dropping the peer while a request is outstanding resolves it with
/// `PeerDisconnected` well inside the configured timeout, rather than
/// waiting for the full deadline to elapse.
#[tokio::test]
async fn s5_disconnect_cancels_pending_request() {
    struct SilentComponent;
    #[async_trait]
    impl Component for SilentComponent {
        fn id(&self) -> ComponentId {
            "silent"
        }

        async fn receive(&self, ctx: &ComponentContext<'_>) -> Result<()> {
            if let Some(_req) = ctx.message::<LoadRequest>() {
                // Deliberately never reply; the connection will be dropped
                // out from under this request instead.
            }
            Ok(())
        }
    }

    let server_keys = Keypair::generate();
    let server_address = free_tcp_address();
    let server = Network::builder()
        .with_keys(server_keys)
        .with_address(server_address)
        .with_config(NetworkConfig::for_demo())
        .register_message::<LoadRequest>()
        .register_message::<LoadReply>()
        .add_component(Arc::new(SilentComponent))
        .build()
        .expect("build server");
    let server = spawn_listening(server).await;
    let server_addr = server.id().address().to_string();

    let client = plain_node(NetworkConfig::for_demo()).await;
    let peer = client.client(&server_addr).await.expect("dial server");

    let started = tokio::time::Instant::now();
    let request = tokio::spawn({
        let peer = peer.clone();
        async move { peer.request::<_, LoadReply>(&LoadRequest { id: 7 }, Duration::from_secs(5)).await }
    });

    // Give the request a moment to be registered as a pending waiter, then
    // tear the whole node down from the server side.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(1), request)
        .await
        .expect("request task should resolve quickly")
        .expect("request task should not panic");
    let elapsed = started.elapsed();

    assert!(result.is_err(), "request should fail once its peer disconnects");
    assert!(
        elapsed < Duration::from_secs(1),
        "disconnect should cancel the pending request well before the 5s timeout"
    );
}

/// S6: broadcasting to five peers reaches all of them; a single peer whose
/// dispatch queue lags behind (simulated with a slow handler) still catches
/// up eventually, and its back-pressure never holds up delivery to the
/// other four.
#[tokio::test]
async fn s6_broadcast_fan_out_survives_one_saturated_peer() {
    #[derive(Clone, Serialize, Deserialize)]
    struct Announce {
        n: u64,
    }
    impl Message for Announce {
        const PAYLOAD_TYPE: &'static str = "Announce";
    }

    struct CountingComponent {
        count: Arc<AtomicUsize>,
        per_message_delay: Duration,
    }

    #[async_trait]
    impl Component for CountingComponent {
        fn id(&self) -> ComponentId {
            "counter"
        }

        async fn receive(&self, ctx: &ComponentContext<'_>) -> Result<()> {
            if ctx.message::<Announce>().is_some() {
                if !self.per_message_delay.is_zero() {
                    tokio::time::sleep(self.per_message_delay).await;
                }
                self.count.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    const MESSAGE_COUNT: u64 = 20;

    let sender = plain_node(NetworkConfig::for_demo().with_send_queue_capacity(32)).await;

    let mut counters = Vec::new();
    for i in 0..5 {
        let keys = Keypair::generate();
        let address = free_tcp_address();
        let count = Arc::new(AtomicUsize::new(0));
        // Peer 0 is deliberately slow, simulating a receiver whose inbound
        // dispatch queue is saturated; the other four process instantly.
        let delay = if i == 0 { Duration::from_millis(50) } else { Duration::ZERO };
        let mut config = NetworkConfig::for_demo();
        if i == 0 {
            // A small inbound queue plus a slow handler reliably saturates
            // this one peer's dispatch path without touching the others.
            config.inbound_queue_capacity = 4;
        }
        let peer = Network::builder()
            .with_keys(keys)
            .with_address(address)
            .with_config(config)
            .register_message::<Announce>()
            .add_component(Arc::new(CountingComponent { count: count.clone(), per_message_delay: delay }))
            .build()
            .expect("build receiver");
        let peer = spawn_listening(peer).await;
        let peer_addr = peer.id().address().to_string();
        sender.client(&peer_addr).await.expect("dial receiver");
        counters.push((peer, count));
    }

    for n in 0..MESSAGE_COUNT {
        sender.broadcast(&Announce { n }).await;
    }

    let fast_peers_done = wait_until(Duration::from_millis(500), || {
        counters[1..]
            .iter()
            .all(|(_, count)| count.load(Ordering::SeqCst) == MESSAGE_COUNT as usize)
    })
    .await;
    assert!(
        fast_peers_done,
        "the four fast receivers should all see every broadcast quickly, \
         independent of the slow receiver's backlog"
    );

    let slow_peer_done = wait_until(Duration::from_secs(3), || {
        counters[0].1.load(Ordering::SeqCst) == MESSAGE_COUNT as usize
    })
    .await;
    assert!(slow_peer_done, "the slow receiver should eventually catch up on every broadcast");
}
