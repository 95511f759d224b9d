// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! A minimal multi-node chat program exercising the whole stack: identity
//! generation, discovery, a trivial custom component, and broadcast.
//!
//! Run two instances and point the second at the first:
//!
//! ```text
//! cargo run --bin chat -- --port 3000
//! cargo run --bin chat -- --port 3001 --peers tcp://127.0.0.1:3000
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use p2p_identity::Keypair;
use p2p_kad::{LookupConfig, RoutingTableConfig};
use p2p_net::component::{Component, ComponentContext, ComponentId};
use p2p_net::discovery::{DiscoveryComponent, DiscoveryFlags};
use p2p_net::envelope::Message;
use p2p_net::error::Result;
use p2p_net::network::{Network, NetworkConfig};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(about = "Minimal chat demo over the p2p-net node runtime")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Host to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Transport scheme to use (tcp/kcp).
    #[arg(long, default_value = "tcp")]
    protocol: String,

    /// Comma-separated dial-strings to bootstrap against.
    #[arg(long, default_value = "")]
    peers: String,

    /// Repeat for more verbose logging (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Serialize, Deserialize)]
struct ChatMessage {
    text: String,
}

impl Message for ChatMessage {
    const PAYLOAD_TYPE: &'static str = "ChatMessage";
}

struct ChatComponent;

#[async_trait]
impl Component for ChatComponent {
    fn id(&self) -> ComponentId {
        "chat"
    }

    async fn receive(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        if let Some(msg) = ctx.message::<ChatMessage>() {
            println!("<{}> {}", ctx.sender().address(), msg.text);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _guard = p2p_logging::init_logging(args.verbose).ok();

    let keys = Keypair::generate();
    tracing::info!("generated a fresh keypair for this session");

    let address = format!("{}://{}:{}", args.protocol, args.host, args.port);
    let local_hash = *keys.peer_id(address.clone()).hash();

    let discovery = Arc::new(DiscoveryComponent::new(
        local_hash,
        RoutingTableConfig::default(),
        LookupConfig::default(),
        std::time::Duration::from_secs(3),
        DiscoveryFlags::default(),
    ));

    let network = Network::builder()
        .with_keys(keys)
        .with_address(address)
        .with_config(NetworkConfig::for_demo())
        .with_discovery(discovery)
        .register_message::<ChatMessage>()
        .add_component(Arc::new(ChatComponent))
        .build()?;

    let listen_net = network.clone();
    tokio::spawn(async move {
        if let Err(e) = listen_net.listen().await {
            tracing::error!(error = %e, "listener stopped");
        }
    });
    network.block_until_listening().await;

    let peers: Vec<String> = args
        .peers
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if !peers.is_empty() {
        network.bootstrap(&peers).await?;
    }

    println!("listening on {}", network.id().address());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        network.broadcast(&ChatMessage { text: line }).await;
    }

    Ok(())
}
