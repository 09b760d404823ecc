//! Command-line front door. The core only needs a torrent file path; `-v`
//! is an ambient convenience this crate adds on top for controlling log
//! verbosity, not a core feature.
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "rstc", about = "Single-file BitTorrent leech client")]
pub struct Cli {
    /// Path to the metainfo (.torrent) file to download.
    pub torrent_path: PathBuf,

    /// Increases log verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
