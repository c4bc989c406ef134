use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use upnp::{eventing::SubscriptionManager, router, ssdp::SsdpListener};

mod demo;
mod logging;

/// Hosts demo UPnP devices on the local network.
#[derive(Parser, Debug)]
struct Args {
    /// Number of demo devices to host
    #[arg(long = "upnp-devs", default_value_t = 1)]
    upnp_devs: usize,
    /// Multicast TTL for SSDP traffic
    #[arg(long)]
    ttl: Option<u32>,
    /// Enable debug logging
    #[arg(short = 'd')]
    debug: bool,
}

async fn run(args: Args, cancellation_token: CancellationToken) -> anyhow::Result<()> {
    let local_ip = upnp::wire::local_addr()
        .await
        .context("resolve local address")?;
    let mut tasks = JoinSet::new();

    for index in 0..args.upnp_devs {
        let listener = tokio::net::TcpListener::bind("0.0.0.0:0")
            .await
            .context("bind http listener")?;
        let port = listener.local_addr().context("get http addr")?.port();

        let events = SubscriptionManager::start(cancellation_token.clone());
        let root = Arc::new(demo::smart_light(index, local_ip, port, events.clone()));
        tracing::info!(
            "Hosting {} at {}",
            root.device.friendly_name,
            root.device.presentation_url.as_deref().unwrap_or_default()
        );

        tasks.spawn(router::serve(
            listener,
            root.clone(),
            events,
            cancellation_token.clone(),
        ));

        let mut ssdp =
            SsdpListener::bind(root, args.ttl).context("bind ssdp listener")?;
        let token = cancellation_token.clone();
        tasks.spawn(async move { ssdp.listen(token).await });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
        Some(finished) = tasks.join_next() => {
            match finished {
                Ok(Err(e)) => tracing::error!("Device task failed: {e:#}"),
                Err(e) => tracing::error!("Device task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
    }

    cancellation_token.cancel();
    while tasks.join_next().await.is_some() {}
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.debug);

    let cancellation_token = CancellationToken::new();
    if let Err(e) = run(args, cancellation_token).await {
        tracing::error!("Fatal initialization failure: {e:#}");
        std::process::exit(1);
    }
}
