// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The Kademlia routing table: an array of [`Bucket`]s indexed by the
//! position of the highest set bit of the XOR distance to the local id.

use std::sync::Mutex;

use p2p_identity::{highest_set_bit, PeerId, HASH_LEN};

use crate::bucket::{Bucket, BucketConfig, InsertResult};

/// Number of buckets: one per possible bit position of a `HASH_LEN`-byte
/// distance.
pub const NUM_BUCKETS: usize = HASH_LEN * 8;

/// Configuration for a [`RoutingTable`].
#[derive(Clone, Debug)]
pub struct RoutingTableConfig {
    /// Bucket configuration applied uniformly to every bucket.
    pub bucket: BucketConfig,
}

impl Default for RoutingTableConfig {
    fn default() -> Self {
        Self {
            bucket: BucketConfig::default(),
        }
    }
}

/// Outcome of a routing table update, mirroring [`InsertResult`] plus the
/// "this is our own id" no-op case.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update was a no-op because the peer's hash equals the local hash.
    IsLocal,
    /// See [`InsertResult`].
    Applied(InsertResultKind),
}

/// A simplified, `PartialEq`-friendly mirror of [`InsertResult`].
#[derive(Debug, PartialEq, Eq)]
pub enum InsertResultKind {
    /// The peer was already present and has been refreshed.
    Updated,
    /// The peer was newly inserted.
    Inserted,
    /// The bucket was full; the peer was cached as a replacement candidate.
    ReplacementCached,
}

impl From<InsertResult> for InsertResultKind {
    fn from(r: InsertResult) -> Self {
        match r {
            InsertResult::Updated => InsertResultKind::Updated,
            InsertResult::Inserted => InsertResultKind::Inserted,
            InsertResult::ReplacementCached | InsertResult::Full => {
                InsertResultKind::ReplacementCached
            }
        }
    }
}

/// The Kademlia k-bucket routing table.
///
/// All operations are serialized by an internal lock; `find_closest_peers`
/// and `get_peer_addresses` return independent snapshots rather than live
/// views, so callers never observe a table mutating mid-iteration.
pub struct RoutingTable {
    local_hash: [u8; HASH_LEN],
    buckets: Mutex<Vec<Bucket>>,
    config: RoutingTableConfig,
}

impl RoutingTable {
    /// Create an empty routing table for the given local hash.
    pub fn new(local_hash: [u8; HASH_LEN], config: RoutingTableConfig) -> Self {
        let buckets = (0..NUM_BUCKETS)
            .map(|_| Bucket::new(config.bucket.clone()))
            .collect();
        Self {
            local_hash,
            buckets: Mutex::new(buckets),
            config,
        }
    }

    /// The local hash this table computes distances against.
    pub fn local_hash(&self) -> &[u8; HASH_LEN] {
        &self.local_hash
    }

    fn bucket_index(&self, hash: &[u8; HASH_LEN]) -> Option<usize> {
        let distance = p2p_identity::xor(&self.local_hash, hash);
        highest_set_bit(&distance)
    }

    /// Insert or refresh a peer, moving it to the head of its bucket.
    ///
    /// A no-op if `peer.hash()` equals the local hash: the local id is never
    /// bucketed.
    pub fn update(&self, peer: PeerId) -> UpdateOutcome {
        let Some(index) = self.bucket_index(peer.hash()) else {
            return UpdateOutcome::IsLocal;
        };
        let mut buckets = self.buckets.lock().expect("routing table lock poisoned");
        let result = buckets[index].insert(peer);
        UpdateOutcome::Applied(result.into())
    }

    /// Remove a peer by hash, if present.
    pub fn remove_peer(&self, hash: &[u8; HASH_LEN]) -> bool {
        let Some(index) = self.bucket_index(hash) else {
            return false;
        };
        let mut buckets = self.buckets.lock().expect("routing table lock poisoned");
        buckets[index].remove(hash)
    }

    /// Whether a peer with the given hash is present in the table.
    pub fn peer_exists(&self, hash: &[u8; HASH_LEN]) -> bool {
        let Some(index) = self.bucket_index(hash) else {
            return false;
        };
        let buckets = self.buckets.lock().expect("routing table lock poisoned");
        buckets[index].contains(hash)
    }

    /// The stalest (least-recently-seen) peer in the bucket that `hash`
    /// would occupy, a candidate for a liveness probe prior to eviction.
    pub fn stalest_in_bucket_of(&self, hash: &[u8; HASH_LEN]) -> Option<PeerId> {
        let index = self.bucket_index(hash)?;
        let buckets = self.buckets.lock().expect("routing table lock poisoned");
        buckets[index].stalest().cloned()
    }

    /// Return up to `n` peers minimizing XOR distance to `target`, ties
    /// broken lexicographically on hash.
    pub fn find_closest_peers(&self, target: &[u8; HASH_LEN], n: usize) -> Vec<PeerId> {
        let buckets = self.buckets.lock().expect("routing table lock poisoned");
        let mut all: Vec<PeerId> = buckets.iter().flat_map(|b| b.iter().cloned()).collect();
        drop(buckets);

        all.sort_by(|a, b| {
            let da = p2p_identity::xor(a.hash(), target);
            let db = p2p_identity::xor(b.hash(), target);
            da.cmp(&db).then_with(|| a.hash().cmp(b.hash()))
        });
        all.truncate(n);
        all
    }

    /// All known peer dial-strings, in unspecified order.
    pub fn get_peer_addresses(&self) -> Vec<String> {
        let buckets = self.buckets.lock().expect("routing table lock poisoned");
        buckets
            .iter()
            .flat_map(|b| b.iter())
            .map(|p| p.address().to_string())
            .collect()
    }

    /// Total number of peers across all buckets.
    pub fn len(&self) -> usize {
        let buckets = self.buckets.lock().expect("routing table lock poisoned");
        buckets.iter().map(Bucket::len).sum()
    }

    /// Whether the table holds no peers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configuration this table was constructed with.
    pub fn config(&self) -> &RoutingTableConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> PeerId {
        let mut key = [0u8; 32];
        key[0] = seed;
        PeerId::new(key, format!("tcp://127.0.0.1:{seed}"))
    }

    #[test]
    fn local_id_is_never_bucketed() {
        let local = peer(1);
        let table = RoutingTable::new(*local.hash(), RoutingTableConfig::default());
        assert_eq!(table.update(local.clone()), UpdateOutcome::IsLocal);
        assert_eq!(table.len(), 0);
        assert!(!table.peer_exists(local.hash()));
    }

    #[test]
    fn update_inserts_and_find_closest_sorts_by_distance() {
        let local = peer(0);
        let table = RoutingTable::new(*local.hash(), RoutingTableConfig::default());
        for seed in [10, 20, 30, 40] {
            table.update(peer(seed));
        }

        let target = *peer(10).hash();
        let closest = table.find_closest_peers(&target, 2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0], peer(10));
    }

    #[test]
    fn remove_peer_drops_it_from_the_table() {
        let local = peer(0);
        let table = RoutingTable::new(*local.hash(), RoutingTableConfig::default());
        table.update(peer(5));
        assert!(table.peer_exists(peer(5).hash()));
        assert!(table.remove_peer(peer(5).hash()));
        assert!(!table.peer_exists(peer(5).hash()));
    }

    #[test]
    fn a_peer_never_appears_in_more_than_one_bucket() {
        let local = peer(0);
        let table = RoutingTable::new(*local.hash(), RoutingTableConfig::default());
        table.update(peer(7));
        table.update(peer(7));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn get_peer_addresses_lists_all_known_peers() {
        let local = peer(0);
        let table = RoutingTable::new(*local.hash(), RoutingTableConfig::default());
        table.update(peer(1));
        table.update(peer(2));
        let mut addrs = table.get_peer_addresses();
        addrs.sort();
        assert_eq!(addrs, vec!["tcp://127.0.0.1:1", "tcp://127.0.0.1:2"]);
    }
}
