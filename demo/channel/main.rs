//! # Channel walkthrough
//!
//! One publisher and two subscriber instances share a channel. Every 500 ms
//! the publisher is poked and publishes to the channel.
//!
//! Demonstrates:
//! - Channel creation with the default in-memory store
//! - Bare-mode subscription through `chan#subscribe`
//! - A late subscriber joining in full mode
//! - Automatic pruning when a subscribed actor leaves the fabric

use hub_channel::ChannelRegistry;
use hub_core::{Actor, Delivery, Fabric, LocalFabric};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::info;

fn subscriber(id: &'static str) -> Arc<dyn Actor> {
    Arc::new(move |d: Delivery| {
        info!("{id}> from {} : {}", d.from, d.content);
    })
}

fn publisher(id: &'static str, fabric: Weak<LocalFabric>) -> Arc<dyn Actor> {
    Arc::new(move |d: Delivery| {
        info!("{id}> from {} : {}", d.from, d.content);
        let Some(fabric) = fabric.upgrade() else {
            return;
        };
        info!("{id}> sending hi to subs");
        if let Err(e) = fabric.send(id, "chan", json!("hi")) {
            info!("{id}> publish failed: {e}");
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let fabric = LocalFabric::new();
    let registry = ChannelRegistry::new(fabric.clone());
    let chan = registry.create_channel("chan", None)?;

    fabric.add_actor("pub/1", publisher("pub/1", Arc::downgrade(&fabric)))?;
    fabric.add_actor("sub/1", subscriber("sub/1"))?;
    fabric.add_actor("sub/2", subscriber("sub/2"))?;

    // Subscribes the bare form "sub"; deliveries pick one live instance.
    fabric.send("sub/1", "chan#subscribe", json!({ "mode": "bare" }))?;

    let poke = {
        let fabric = fabric.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                info!("ASK PUBLISHER TO PUBLISH");
                if fabric.send("god", "pub/1", json!("go !")).is_err() {
                    break;
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("ADDING A SUBSCRIBER");
    fabric.add_actor("sub1/1", subscriber("sub1/1"))?;
    fabric.send("sub1/1", "chan#subscribe", json!(null))?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("REMOVING A SUBSCRIBER");
    fabric.remove_actor("sub1/1");

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!(subscribers = ?chan.subscribers().await?, "final subscriber set");

    poke.abort();
    Ok(())
}
