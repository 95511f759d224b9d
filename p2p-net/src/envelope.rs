// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The signed wire envelope and its length-prefixed frame encoding.
//!
//! Wire layout per frame: `u32` big-endian length, followed by the
//! MessagePack-encoded [`Envelope`]. The signature covers the canonical
//! encoding of every other field, computed via [`Envelope::signable_bytes`].

use std::any::Any;
use std::collections::HashMap;

use p2p_identity::{Keypair, PeerId, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetError, Result};

/// Default maximum encoded frame length: 4 MiB.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// A typed message carried as the opaque payload of an [`Envelope`].
///
/// `PAYLOAD_TYPE` is the wire tag registered in a [`MessageRegistry`] so the
/// receiving side knows how to decode the payload back into `Self`.
pub trait Message: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static {
    /// The wire tag naming this message kind.
    const PAYLOAD_TYPE: &'static str;
}

/// The canonical (signature-excluded) portion of an envelope, serialized to
/// produce the bytes that `signature` covers.
#[derive(Serialize, Deserialize)]
struct EnvelopeBody {
    sender_public_key: [u8; PUBLIC_KEY_LEN],
    sender_address: String,
    nonce: u64,
    reply_flag: bool,
    reply_to_nonce: u64,
    payload_type: String,
    payload: Vec<u8>,
}

/// The wire encoding of an [`Envelope`], including its signature. Kept
/// separate from `Envelope` so construction always goes through
/// [`Envelope::sign`], never through a bare struct literal with a
/// caller-chosen signature.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    body: EnvelopeBody,
    signature: [u8; SIGNATURE_LEN],
}

/// A signed, typed message together with its sender identity and
/// request/reply correlation data.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// The sending peer's identity.
    pub sender: PeerId,
    /// Per-`(sender, direction)` monotonic nonce.
    pub nonce: u64,
    /// Whether this envelope is a reply to an earlier request.
    pub reply_flag: bool,
    /// The nonce being replied to, when `reply_flag` is set; `0` otherwise.
    pub reply_to_nonce: u64,
    /// Wire tag naming the payload's message kind.
    pub payload_type: String,
    /// The opaque, message-kind-specific encoded payload.
    pub payload: Vec<u8>,
    /// Signature over the canonical encoding of every other field.
    pub signature: [u8; SIGNATURE_LEN],
}

impl Envelope {
    fn body(&self) -> EnvelopeBody {
        EnvelopeBody {
            sender_public_key: *self.sender.public_key(),
            sender_address: self.sender.address().to_string(),
            nonce: self.nonce,
            reply_flag: self.reply_flag,
            reply_to_nonce: self.reply_to_nonce,
            payload_type: self.payload_type.clone(),
            payload: self.payload.clone(),
        }
    }

    /// The canonical bytes a signature covers.
    fn signable_bytes(body: &EnvelopeBody) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(body)?)
    }

    /// Build and sign a new envelope.
    pub fn sign(
        keys: &Keypair,
        sender: PeerId,
        nonce: u64,
        reply_flag: bool,
        reply_to_nonce: u64,
        payload_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let body = EnvelopeBody {
            sender_public_key: *sender.public_key(),
            sender_address: sender.address().to_string(),
            nonce,
            reply_flag,
            reply_to_nonce,
            payload_type: payload_type.into(),
            payload,
        };
        let signable = Self::signable_bytes(&body)?;
        let signature = keys.sign(&signable);

        Ok(Self {
            sender,
            nonce,
            reply_flag,
            reply_to_nonce,
            payload_type: body.payload_type,
            payload: body.payload,
            signature,
        })
    }

    /// Verify this envelope's signature against its declared sender, and
    /// that the sender's declared hash matches its declared public key.
    pub fn verify(&self) -> bool {
        if !self.sender.hash_matches_public_key() {
            return false;
        }
        let Ok(signable) = Self::signable_bytes(&self.body()) else {
            return false;
        };
        p2p_identity::verify(self.sender.public_key(), &signable, &self.signature)
    }

    /// Encode this envelope's typed payload as a registered [`Message`].
    pub fn encode_payload<M: Message>(msg: &M) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(msg)?)
    }

    fn to_wire(&self) -> WireEnvelope {
        WireEnvelope {
            body: self.body(),
            signature: self.signature,
        }
    }

    fn from_wire(wire: WireEnvelope) -> Self {
        Self {
            sender: PeerId::new(wire.body.sender_public_key, wire.body.sender_address),
            nonce: wire.body.nonce,
            reply_flag: wire.body.reply_flag,
            reply_to_nonce: wire.body.reply_to_nonce,
            payload_type: wire.body.payload_type,
            payload: wire.body.payload,
            signature: wire.signature,
        }
    }

    /// Encode this envelope into a length-prefixed frame.
    pub fn encode_frame(&self) -> Result<Vec<u8>> {
        let body = rmp_serde::to_vec(&self.to_wire())?;
        let len = u32::try_from(body.len())
            .map_err(|_| NetError::Codec("envelope too large to frame".into()))?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Read one length-prefixed frame from `stream` and decode it, rejecting
    /// frames whose declared length exceeds `max_frame_len`.
    pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(
        stream: &mut R,
        max_frame_len: u32,
    ) -> Result<Self> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.map_err(NetError::Io)?;
        let len = u32::from_be_bytes(len_buf);
        if len > max_frame_len {
            return Err(NetError::ProtocolViolation {
                address: String::new(),
                reason: format!("frame of {len} bytes exceeds max {max_frame_len}"),
            });
        }

        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await.map_err(NetError::Io)?;
        let wire: WireEnvelope = rmp_serde::from_slice(&body)?;
        Ok(Self::from_wire(wire))
    }

    /// Write this envelope as a length-prefixed frame to `stream`.
    pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(&self, stream: &mut W) -> Result<()> {
        let frame = self.encode_frame()?;
        stream.write_all(&frame).await.map_err(NetError::Io)?;
        Ok(())
    }
}

type DecodeFn = Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>> + Send + Sync>;

/// A process-wide (but explicitly owned, not implicit-global) mapping from
/// `payload_type` wire tags to decoders, built up before `Network::build`.
#[derive(Default)]
pub struct MessageRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl MessageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for `M::PAYLOAD_TYPE`.
    pub fn register<M: Message>(&mut self) {
        self.decoders.insert(
            M::PAYLOAD_TYPE.to_string(),
            Box::new(|bytes: &[u8]| -> Result<Box<dyn Any + Send>> {
                let value: M = rmp_serde::from_slice(bytes)?;
                Ok(Box::new(value))
            }),
        );
    }

    /// Whether a decoder is registered for `payload_type`.
    pub fn contains(&self, payload_type: &str) -> bool {
        self.decoders.contains_key(payload_type)
    }

    /// Decode `payload` using the decoder registered for `payload_type`.
    ///
    /// Returns `Ok(None)` for an unregistered type (the lenient default
    /// described in the error-handling policy), or `Err` if strict mode is
    /// requested by the caller via [`MessageRegistry::decode_strict`].
    pub fn decode(&self, payload_type: &str, payload: &[u8]) -> Result<Option<Box<dyn Any + Send>>> {
        match self.decoders.get(payload_type) {
            Some(decoder) => decoder(payload).map(Some),
            None => Ok(None),
        }
    }

    /// As [`MessageRegistry::decode`], but an unregistered `payload_type` is
    /// a [`NetError::ProtocolViolation`] rather than `Ok(None)`.
    pub fn decode_strict(&self, payload_type: &str, payload: &[u8]) -> Result<Box<dyn Any + Send>> {
        self.decode(payload_type, payload)?.ok_or_else(|| NetError::ProtocolViolation {
            address: String::new(),
            reason: format!("unregistered payload type {payload_type:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Ping;
    impl Message for Ping {
        const PAYLOAD_TYPE: &'static str = "Ping";
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Echo {
        text: String,
    }
    impl Message for Echo {
        const PAYLOAD_TYPE: &'static str = "Echo";
    }

    fn local_identity() -> (Keypair, PeerId) {
        let keys = Keypair::generate();
        let id = keys.peer_id("tcp://127.0.0.1:1");
        (keys, id)
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let (keys, id) = local_identity();
        let payload = Envelope::encode_payload(&Echo { text: "hi".into() }).expect("encode");
        let envelope = Envelope::sign(&keys, id, 1, false, 0, "Echo", payload).expect("sign");
        assert!(envelope.verify());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (keys, id) = local_identity();
        let payload = Envelope::encode_payload(&Echo { text: "hi".into() }).expect("encode");
        let mut envelope = Envelope::sign(&keys, id, 1, false, 0, "Echo", payload).expect("sign");
        envelope.payload = Envelope::encode_payload(&Echo { text: "bye".into() }).expect("encode");
        assert!(!envelope.verify());
    }

    #[test]
    fn frame_round_trips_through_encode_decode() {
        let (keys, id) = local_identity();
        let payload = Envelope::encode_payload(&Ping).expect("encode");
        let envelope = Envelope::sign(&keys, id, 7, false, 0, "Ping", payload).expect("sign");
        let frame = envelope.encode_frame().expect("frame");

        let declared_len = u32::from_be_bytes(frame[..4].try_into().expect("4 bytes"));
        assert_eq!(declared_len as usize, frame.len() - 4);
    }

    #[test]
    fn registry_decodes_registered_type_and_rejects_unknown() {
        let mut registry = MessageRegistry::new();
        registry.register::<Echo>();

        let payload = Envelope::encode_payload(&Echo { text: "hi".into() }).expect("encode");
        let decoded = registry.decode("Echo", &payload).expect("decode").expect("present");
        let echo = decoded.downcast::<Echo>().expect("downcast");
        assert_eq!(*echo, Echo { text: "hi".into() });

        assert!(registry.decode("Unknown", &[]).expect("lenient").is_none());
        assert!(registry.decode_strict("Unknown", &[]).is_err());
    }
}
