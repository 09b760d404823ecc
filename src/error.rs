//! Crate-wide error type.
//!
//! Every module keeps its own focused error enum (`BencodeError`,
//! `TorrentError`, `TrackerError`, `PeerError`, `EngineError`); `ClientError`
//! only exists so `main` has a single type to match on when deciding the
//! process exit code.
use thiserror::Error;

use crate::bencode::BencodeError;
use crate::engine::EngineError;
use crate::peer::PeerError;
use crate::torrent::TorrentError;
use crate::tracker::TrackerError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bencode(#[from] BencodeError),

    #[error(transparent)]
    Torrent(#[from] TorrentError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
