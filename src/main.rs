use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Run a chord-ring node")]
struct Args {
    /// host:port to bind; this string is also the node's ring identity
    #[arg(long)]
    bind: String,
    /// Address of an existing ring member to join through
    #[arg(long)]
    join: Option<String>,
    /// Seconds between status printouts
    #[arg(long, default_value_t = 10)]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let node = match &args.join {
        Some(peer) => chord_ring::join(&args.bind, peer).await?,
        None => chord_ring::create(&args.bind).await?,
    };
    println!(
        "chord node {} listening on {}",
        hex::encode(&node.id()[..8]),
        node.addr()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.status_interval));
    ticker.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            _ = ticker.tick() => println!("{}", node.info().await),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.finalize().await;
    Ok(())
}
