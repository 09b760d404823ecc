use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rs_torrent_client::engine::Coordinator;
use rs_torrent_client::torrent::Metainfo;
use rs_torrent_client::tracker::{self, TrackerClient};
use rs_torrent_client::ClientError;

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "download failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_directive = match verbose {
        0 => "rs_torrent_client=info",
        1 => "rs_torrent_client=debug",
        _ => "rs_torrent_client=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let metainfo = Metainfo::from_path(&cli.torrent_path)?;
    info!(
        file_name = %metainfo.file_name,
        file_len = metainfo.file_len,
        pieces = metainfo.piece_count(),
        info_hash = %hex::encode(metainfo.info_hash),
        "loaded metainfo"
    );

    let peer_id = tracker::generate_peer_id();
    info!(peer_id = %hex::encode(peer_id), "generated local peer id");
    let tracker_client = TrackerClient::new();
    let announce = tracker_client.announce(&metainfo, &peer_id).await?;
    info!(peers = announce.peers.len(), interval = announce.interval, "tracker announce complete");

    let peer_addresses: Vec<_> = announce.peers.iter().map(|peer| peer.address).collect();
    let file_name = metainfo.file_name.clone();
    let coordinator = Coordinator::new(metainfo, peer_id);
    let buffer = coordinator.download(&peer_addresses).await?;

    std::fs::write(&file_name, &buffer)?;
    info!(file_name = %file_name, bytes = buffer.len(), "download complete");
    Ok(())
}
