// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! A single Kademlia bucket: a bounded, least-recently-seen-ordered list of
//! peers, backed by a small replacement cache.

use std::collections::VecDeque;

use p2p_identity::PeerId;

/// Per-bucket configuration.
#[derive(Clone, Debug)]
pub struct BucketConfig {
    /// Maximum number of peers held in the bucket proper ("bucket size", `k`).
    pub k: usize,
    /// Maximum number of peers held in the replacement cache once the bucket
    /// is full.
    pub replacement_cache_size: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            k: 16,
            replacement_cache_size: 5,
        }
    }
}

/// Outcome of inserting a peer into a bucket.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertResult {
    /// The peer was already present and has been moved to the head.
    Updated,
    /// The peer was new and the bucket had room.
    Inserted,
    /// The bucket was full; the peer was placed in the replacement cache.
    ReplacementCached,
    /// The replacement cache was also full; the peer was dropped.
    Full,
}

/// A single Kademlia bucket.
///
/// `peers` is ordered most-recently-seen at the head, least-recently-seen at
/// the tail, matching the spec's eviction discipline.
#[derive(Debug, Default)]
pub struct Bucket {
    peers: VecDeque<PeerId>,
    replacement_cache: VecDeque<PeerId>,
    config: BucketConfig,
}

impl Bucket {
    /// Create an empty bucket with the given configuration.
    pub fn new(config: BucketConfig) -> Self {
        Self {
            peers: VecDeque::new(),
            replacement_cache: VecDeque::new(),
            config,
        }
    }

    /// Number of peers currently held in the bucket proper.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the bucket proper holds no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterate over the peers currently in the bucket, most-recently-seen
    /// first.
    pub fn iter(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.iter()
    }

    /// Whether `hash` is present in the bucket proper.
    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.peers.iter().any(|p| p.hash() == hash)
    }

    /// Insert or refresh `peer`.
    ///
    /// If already present, the peer moves to the head. If new and the bucket
    /// has room, it is inserted at the head. Otherwise the peer is placed in
    /// a bounded replacement cache (the "probe-and-replace" strategy: a
    /// future liveness check against the stale tail entry can promote a
    /// cached peer in its place via [`Bucket::remove`]).
    pub fn insert(&mut self, peer: PeerId) -> InsertResult {
        if let Some(pos) = self.peers.iter().position(|p| p == &peer) {
            self.peers.remove(pos);
            self.peers.push_front(peer);
            return InsertResult::Updated;
        }

        if self.peers.len() < self.config.k {
            self.peers.push_front(peer);
            return InsertResult::Inserted;
        }

        if let Some(pos) = self.replacement_cache.iter().position(|p| p == &peer) {
            self.replacement_cache.remove(pos);
        }
        if self.replacement_cache.len() >= self.config.replacement_cache_size {
            self.replacement_cache.pop_back();
        }
        self.replacement_cache.push_front(peer);
        InsertResult::ReplacementCached
    }

    /// The least-recently-seen peer, if any, a candidate for a liveness
    /// probe before eviction.
    pub fn stalest(&self) -> Option<&PeerId> {
        self.peers.back()
    }

    /// Remove a peer by hash, promoting the most recently cached
    /// replacement into its place if one is available.
    pub fn remove(&mut self, hash: &[u8; 32]) -> bool {
        let Some(pos) = self.peers.iter().position(|p| p.hash() == hash) else {
            return false;
        };
        self.peers.remove(pos);
        if let Some(replacement) = self.replacement_cache.pop_front() {
            self.peers.push_front(replacement);
        }
        true
    }
}
