// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Kademlia routing table and iterative lookup, independent of any
//! particular transport or wire format.
//!
//! This crate owns two things: the bucketed [`RoutingTable`] that tracks
//! known peers by XOR distance to the local id, and [`lookup::find_node`],
//! the bounded-parallelism iterative convergence procedure used to populate
//! it. Neither knows how to open a connection or send a message — that is
//! the concern of the networking crate's discovery component, which drives
//! both against real peer clients.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

mod bucket;
mod lookup;
mod table;

pub use bucket::{Bucket, BucketConfig, InsertResult};
pub use lookup::{find_node, LookupConfig};
pub use table::{InsertResultKind, RoutingTable, RoutingTableConfig, UpdateOutcome, NUM_BUCKETS};
