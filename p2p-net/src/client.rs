// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! One peer's connection state: identity, send queue, nonce counter,
//! outstanding request table, and lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use p2p_identity::{Keypair, PeerId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tracing::Instrument;

use crate::envelope::{Envelope, Message};
use crate::error::{NetError, Result};
use crate::network::NetworkInner;

/// The handshake's own payload: each side's declared identity, sent as the
/// very first envelope on a freshly opened stream.
#[derive(Clone, Serialize, Deserialize)]
pub struct HandshakeHello {
    /// The sender's public key.
    pub public_key: [u8; p2p_identity::PUBLIC_KEY_LEN],
    /// The sender's dial-string address.
    pub address: String,
}

impl Message for HandshakeHello {
    const PAYLOAD_TYPE: &'static str = "HandshakeHello";
}

/// A peer client's connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport stream is open but the handshake has not completed.
    Connecting,
    /// The handshake completed; the client is registered in
    /// `Network.clients`.
    Open,
    /// `close` has been called; the send queue is draining.
    Closing,
    /// The client has been fully torn down and removed from
    /// `Network.clients`.
    Closed,
}

struct PendingRequests {
    next_nonce: AtomicU64,
    waiters: tokio::sync::Mutex<HashMap<u64, oneshot::Sender<Result<Envelope>>>>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            next_nonce: AtomicU64::new(1),
            waiters: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn next_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::SeqCst)
    }
}

/// One peer's connection: identity (once known), outbound send queue, nonce
/// allocation, and the table of requests awaiting a reply.
pub struct PeerClient {
    address: String,
    id: RwLock<Option<PeerId>>,
    state: RwLock<ConnectionState>,
    send_tx: mpsc::Sender<Envelope>,
    pending: PendingRequests,
    network: Weak<NetworkInner>,
    close_signal: Notify,
}

impl fmt::Debug for PeerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl PeerClient {
    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// This client's peer identity, once the handshake has completed.
    pub async fn id(&self) -> Option<PeerId> {
        self.id.read().await.clone()
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    fn upgrade_network(&self) -> Option<Arc<NetworkInner>> {
        self.network.upgrade()
    }

    async fn local_identity(&self) -> Result<(Keypair, PeerId)> {
        let network = self
            .upgrade_network()
            .ok_or(NetError::PeerDisconnected { address: self.address.clone() })?;
        Ok((network.keys_clone(), network.id().clone()))
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        self.send_tx
            .send(envelope)
            .await
            .map_err(|_| NetError::PeerDisconnected { address: self.address.clone() })
    }

    /// Enqueue a fire-and-forget message.
    ///
    /// Returns once queued, or a [`NetError::PeerDisconnected`]-flavoured
    /// error if the send queue has been torn down. Back-pressure is applied
    /// by the bounded channel: a full queue suspends the caller rather than
    /// failing, matching the framework's back-pressure design.
    pub async fn tell<M: Message>(&self, msg: &M) -> Result<()> {
        let (keys, id) = self.local_identity().await?;
        let nonce = self.pending.next_nonce();
        let payload = Envelope::encode_payload(msg)?;
        let envelope = Envelope::sign(&keys, id, nonce, false, 0, M::PAYLOAD_TYPE, payload)?;
        self.send_envelope(envelope).await
    }

    /// Enqueue a fire-and-forget message without blocking if the send queue
    /// is full.
    pub async fn try_tell<M: Message>(&self, msg: &M) -> Result<()> {
        let (keys, id) = self.local_identity().await?;
        let nonce = self.pending.next_nonce();
        let payload = Envelope::encode_payload(msg)?;
        let envelope = Envelope::sign(&keys, id, nonce, false, 0, M::PAYLOAD_TYPE, payload)?;
        self.send_tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                NetError::HandlerError("send queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                NetError::PeerDisconnected { address: self.address.clone() }
            }
        })
    }

    /// Send `msg` as a request and await a typed reply, or
    /// `Timeout`/`PeerDisconnected`/`Cancelled` on failure.
    pub async fn request<M: Message, R: Message>(&self, msg: &M, timeout: Duration) -> Result<R> {
        let (keys, id) = self.local_identity().await?;
        let nonce = self.pending.next_nonce();
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.pending.waiters.lock().await;
            waiters.insert(nonce, tx);
        }

        let payload = Envelope::encode_payload(msg)?;
        let envelope = Envelope::sign(&keys, id, nonce, false, 0, M::PAYLOAD_TYPE, payload)?;
        if let Err(e) = self.send_envelope(envelope).await {
            self.pending.waiters.lock().await.remove(&nonce);
            return Err(e);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        match result {
            Ok(Ok(Ok(reply))) => Ok(rmp_serde::from_slice(&reply.payload)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(NetError::PeerDisconnected { address: self.address.clone() }),
            Err(_) => {
                self.pending.waiters.lock().await.remove(&nonce);
                Err(NetError::Timeout(timeout))
            }
        }
    }

    /// Send a reply correlated to `in_reply_to_nonce`.
    pub async fn reply<M: Message>(&self, in_reply_to_nonce: u64, msg: &M) -> Result<()> {
        let (keys, id) = self.local_identity().await?;
        let nonce = self.pending.next_nonce();
        let payload = Envelope::encode_payload(msg)?;
        let envelope = Envelope::sign(
            &keys,
            id,
            nonce,
            true,
            in_reply_to_nonce,
            M::PAYLOAD_TYPE,
            payload,
        )?;
        self.send_envelope(envelope).await
    }

    /// Resolve the waiter for an inbound reply envelope, if one is
    /// registered; otherwise the reply is dropped and logged.
    pub(crate) async fn resolve_reply(&self, envelope: Envelope) {
        let waiter = self
            .pending
            .waiters
            .lock()
            .await
            .remove(&envelope.reply_to_nonce);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(envelope));
            }
            None => {
                tracing::warn!(
                    nonce = envelope.reply_to_nonce,
                    address = %self.address,
                    "dropped reply with no matching waiter"
                );
            }
        }
    }

    /// Transition to `Closing`, cancel all pending waiters with
    /// `PeerDisconnected`, shut down the write half of the stream (so the
    /// peer's reader observes EOF), then `Closed`. Idempotent.
    pub async fn close(&self) {
        self.close_with_reason(|address| NetError::PeerDisconnected { address }).await;
    }

    /// As [`PeerClient::close`], but pending waiters are cancelled with
    /// `Cancelled` rather than `PeerDisconnected`. Used when the node itself
    /// is shutting down, as opposed to this one peer's stream closing.
    pub(crate) async fn close_for_shutdown(&self) {
        self.close_with_reason(|_| NetError::Cancelled).await;
    }

    async fn close_with_reason(&self, reason: impl Fn(String) -> NetError) {
        {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closing;
        }

        // Wake the writer task so it stops draining the send queue and
        // shuts down its half of the stream, even though `self` (and thus
        // `send_tx`) stays alive for as long as this `Arc<PeerClient>` does.
        self.close_signal.notify_one();

        let mut waiters = self.pending.waiters.lock().await;
        for (_, tx) in waiters.drain() {
            let _ = tx.send(Err(reason(self.address.clone())));
        }
        drop(waiters);

        *self.state.write().await = ConnectionState::Closed;

        if let Some(network) = self.upgrade_network() {
            network.remove_client(&self.address).await;
        }
    }
}

/// Outcome of driving a freshly opened stream through the handshake.
pub(crate) struct Handshaked {
    pub(crate) client: Arc<PeerClient>,
    pub(crate) reader: Box<dyn AsyncRead + Unpin + Send>,
}

/// Perform the handshake on a freshly opened stream and, on success,
/// register the resulting client with `network`, spawn its writer task, and
/// return it ready for the caller to spawn a reader loop over.
pub(crate) async fn handshake<S>(
    network: &Arc<NetworkInner>,
    mut stream: S,
    address: String,
    send_queue_capacity: usize,
    max_frame_len: u32,
) -> Result<Handshaked>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let local_keys = network.keys_clone();
    let local_id = network.id().clone();

    let hello_payload = Envelope::encode_payload(&HandshakeHello {
        public_key: *local_id.public_key(),
        address: local_id.address().to_string(),
    })?;
    let hello = Envelope::sign(
        &local_keys,
        local_id.clone(),
        0,
        false,
        0,
        HandshakeHello::PAYLOAD_TYPE,
        hello_payload,
    )?;
    hello.write_frame(&mut stream).await?;

    let remote_hello = Envelope::read_frame(&mut stream, max_frame_len).await?;
    if !remote_hello.verify() || remote_hello.payload_type != HandshakeHello::PAYLOAD_TYPE {
        return Err(NetError::HandshakeFailed {
            address,
            reason: "invalid handshake signature".to_string(),
        });
    }
    let declared: HandshakeHello = rmp_serde::from_slice(&remote_hello.payload)?;
    let remote_id = PeerId::new(declared.public_key, declared.address.clone());
    if !remote_id.hash_matches_public_key() || remote_id != remote_hello.sender {
        return Err(NetError::HandshakeFailed {
            address,
            reason: "declared id inconsistent with public key".to_string(),
        });
    }

    let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
    let (send_tx, send_rx) = mpsc::channel(send_queue_capacity);

    let client = Arc::new(PeerClient {
        address: declared.address.clone(),
        id: RwLock::new(Some(remote_id)),
        state: RwLock::new(ConnectionState::Open),
        send_tx,
        pending: PendingRequests::new(),
        network: Arc::downgrade(network),
        close_signal: Notify::new(),
    });

    spawn_writer(write_half, send_rx, client.clone());

    Ok(Handshaked {
        client,
        reader: Box::new(read_half),
    })
}

fn spawn_writer<W>(mut write_half: W, mut send_rx: mpsc::Receiver<Envelope>, client: Arc<PeerClient>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let span = tracing::info_span!("writer", peer = %client.address);
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    envelope = send_rx.recv() => {
                        match envelope {
                            Some(envelope) => {
                                if let Err(e) = envelope.write_frame(&mut write_half).await {
                                    tracing::warn!(error = %e, "write failed, closing client");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = client.close_signal.notified() => break,
                }
            }
            // Send a FIN so the peer's reader observes EOF promptly instead of
            // waiting on a connection this side has already given up on.
            let _ = write_half.shutdown().await;
            client.close().await;
        }
        .instrument(span),
    );
}
