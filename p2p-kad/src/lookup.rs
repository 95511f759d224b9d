// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The iterative Kademlia lookup, transport-agnostic.
//!
//! This module knows nothing about streams, frames, or clients: it drives
//! the shortlist/queried bookkeeping described in the discovery component's
//! `FindNode` algorithm and delegates the actual "ask this peer for its
//! closest peers to the target" step to a caller-supplied async function.
//! The discovery component in the networking crate supplies that function
//! by issuing a `LookupNodeRequest` over a `PeerClient`.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use p2p_identity::{xor, PeerId, HASH_LEN};

/// Parameters governing an iterative lookup.
#[derive(Clone, Debug)]
pub struct LookupConfig {
    /// Number of closest peers to converge on (`k`).
    pub k: usize,
    /// Maximum number of candidates queried in parallel per round (`α`).
    pub alpha: usize,
    /// Per-request timeout; a peer that doesn't answer within this is
    /// treated as non-responsive for the round.
    pub request_timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            k: 16,
            alpha: 8,
            request_timeout: Duration::from_secs(3),
        }
    }
}

fn distance(hash: &[u8; HASH_LEN], target: &[u8; HASH_LEN]) -> [u8; HASH_LEN] {
    xor(hash, target)
}

fn sort_by_distance(peers: &mut Vec<PeerId>, target: &[u8; HASH_LEN]) {
    peers.sort_by(|a, b| {
        distance(a.hash(), target)
            .cmp(&distance(b.hash(), target))
            .then_with(|| a.hash().cmp(b.hash()))
    });
}

/// Run the iterative `FindNode` procedure.
///
/// `seed` is the initial candidate set, typically the local routing table's
/// closest known peers to `target`. `query` is invoked once per candidate
/// selected in a round and returns the peers that candidate reports as its
/// own closest neighbors to `target`, or `None` if the candidate did not
/// respond (timeout, disconnect, or transport error) — the caller is
/// responsible for applying `request_timeout` around its own query.
///
/// Returns the `k` closest peers discovered, sorted by ascending distance to
/// `target`.
pub async fn find_node<F, Fut>(
    target: &[u8; HASH_LEN],
    seed: Vec<PeerId>,
    config: &LookupConfig,
    mut query: F,
) -> Vec<PeerId>
where
    F: FnMut(PeerId) -> Fut,
    Fut: Future<Output = Option<Vec<PeerId>>>,
{
    let mut shortlist = seed;
    sort_by_distance(&mut shortlist, target);
    shortlist.truncate(config.k);

    let mut queried: HashSet<[u8; HASH_LEN]> = HashSet::new();

    loop {
        let candidates: Vec<PeerId> = shortlist
            .iter()
            .filter(|p| !queried.contains(p.hash()))
            .take(config.alpha)
            .cloned()
            .collect();

        if candidates.is_empty() {
            break;
        }

        for c in &candidates {
            queried.insert(*c.hash());
        }

        let responses = join_all(candidates.into_iter().map(|c| query(c))).await;

        for response in responses.into_iter().flatten() {
            for peer in response {
                if !shortlist.iter().any(|p| p == &peer) {
                    shortlist.push(peer);
                }
            }
        }

        sort_by_distance(&mut shortlist, target);
        shortlist.truncate(config.k);

        let converged = shortlist.iter().all(|p| queried.contains(p.hash()));
        if converged {
            break;
        }
    }

    shortlist.truncate(config.k);
    shortlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn peer(seed: u8) -> PeerId {
        let mut key = [0u8; 32];
        key[0] = seed;
        PeerId::new(key, format!("tcp://127.0.0.1:{seed}"))
    }

    #[tokio::test]
    async fn converges_over_a_small_simulated_network() {
        // Each peer "knows" its two numeric neighbors; the target is peer 50,
        // starting from a seed far away in hash space.
        let topology: HashMap<u8, Vec<u8>> = [
            (1, vec![2, 3]),
            (2, vec![1, 4, 50]),
            (3, vec![1]),
            (4, vec![2, 50]),
            (50, vec![4]),
        ]
        .into_iter()
        .collect();

        let queried_log: Mutex<Vec<u8>> = Mutex::new(Vec::new());

        let target = *peer(50).hash();
        let seed = vec![peer(1)];
        let config = LookupConfig { k: 16, alpha: 2, request_timeout: Duration::from_millis(50) };

        let result = find_node(&target, seed, &config, |candidate| {
            let topology = &topology;
            let seed_byte = candidate.public_key()[0];
            queried_log.lock().expect("lock").push(seed_byte);
            async move {
                topology
                    .get(&seed_byte)
                    .map(|neighbors| neighbors.iter().copied().map(peer).collect())
            }
        })
        .await;

        assert!(result.iter().any(|p| p == &peer(50)));
    }

    #[tokio::test]
    async fn empty_seed_returns_empty() {
        let target = *peer(1).hash();
        let config = LookupConfig::default();
        let result = find_node(&target, Vec::new(), &config, |_| async { None }).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn unresponsive_candidates_still_terminate_the_loop() {
        let target = *peer(1).hash();
        let config = LookupConfig { k: 4, alpha: 2, request_timeout: Duration::from_millis(10) };
        let seed = vec![peer(5), peer(6)];
        let result = find_node(&target, seed.clone(), &config, |_| async { None }).await;
        assert_eq!(result.len(), seed.len());
    }
}
