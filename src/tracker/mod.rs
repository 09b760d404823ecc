//! Tracker client: builds the announce URL, performs the GET, decodes the
//! response, and unpacks the compact peer list.
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::bencode::{self, binding::field, BencodeError};
use crate::torrent::Metainfo;

const PEER_ID_PREFIX: &[u8] = b"-RS0001-";
const PORT: u16 = 6881;
const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);
const PEER_ADDR_LEN: usize = 6;

/// Generates a 20-byte peer identity: a fixed client-version prefix followed
/// by random bytes, in the style this tracker's azureus-convention expects.
pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);
    rand::rng().fill(&mut id[PEER_ID_PREFIX.len()..]);
    id
}

/// Percent-encodes raw bytes octet-by-octet, as opposed to treating them as
/// UTF-8 text; `info_hash` and `peer_id` are arbitrary 20-byte digests, not
/// strings, so `url`'s text-oriented escaping would be wrong here.
fn percent_encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub address: SocketAddrV4,
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

pub struct TrackerClient {
    http: reqwest::Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(TRACKER_TIMEOUT)
            .build()
            .expect("static client configuration is always valid");
        Self { http }
    }

    /// Announces to the tracker named in `metainfo` and returns the peers it
    /// hands back. A network failure is logged and surfaced as an empty
    /// peer list rather than propagated, matching how the rest of the
    /// engine treats "no peers available" uniformly.
    #[instrument(skip(self, metainfo), fields(announce = %metainfo.announce))]
    pub async fn announce(&self, metainfo: &Metainfo, peer_id: &[u8; 20]) -> Result<AnnounceResponse, TrackerError> {
        let url = self.build_announce_url(metainfo, peer_id)?;

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "tracker request failed");
                return Ok(AnnounceResponse { interval: 0, peers: Vec::new() });
            }
        };

        let body: Bytes = response.bytes().await.map_err(|err| TrackerError::Network(err.to_string()))?;
        decode_announce_response(&body)
    }

    fn build_announce_url(&self, metainfo: &Metainfo, peer_id: &[u8; 20]) -> Result<url::Url, TrackerError> {
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
            percent_encode_bytes(&metainfo.info_hash),
            percent_encode_bytes(peer_id),
            PORT,
            metainfo.file_len,
        );
        let joined = format!("{}?{}", metainfo.announce, query);
        url::Url::parse(&joined).map_err(|err| TrackerError::InvalidAnnounceUrl(err.to_string()))
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_announce_response(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = bencode::decode_bytes(body)?;
    let dict = value.as_dict()?;

    let interval: i64 = field(dict, b"interval")?.unwrap_or(0);
    let peers_blob: Vec<u8> = field(dict, b"peers")?.ok_or(TrackerError::MissingField("peers"))?;

    let peers = split_compact_peers(&peers_blob)?;
    Ok(AnnounceResponse { interval, peers })
}

fn split_compact_peers(blob: &[u8]) -> Result<Vec<Peer>, TrackerError> {
    if blob.len() % PEER_ADDR_LEN != 0 {
        return Err(TrackerError::MalformedPeers);
    }
    Ok(blob
        .chunks_exact(PEER_ADDR_LEN)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            Peer { address: SocketAddrV4::new(ip, port) }
        })
        .collect())
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker network error: {0}")]
    Network(String),

    #[error(transparent)]
    Bencode(#[from] BencodeError),

    #[error("invalid announce URL: {0}")]
    InvalidAnnounceUrl(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("compact peer list length is not a multiple of 6")]
    MalformedPeers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_fixed_prefix_and_is_20_bytes() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], PEER_ID_PREFIX);
        assert_eq!(id.len(), 20);
    }

    #[test]
    fn percent_encodes_raw_bytes_octet_by_octet() {
        let encoded = percent_encode_bytes(&[0x00, 0xff, b'A', b'-']);
        assert_eq!(encoded, "%00%FFA-");
    }

    #[test]
    fn splits_compact_peer_list() {
        let blob = vec![127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 2, 0x00, 0x50];
        let peers = split_compact_peers(&blob).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].address, SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881));
        assert_eq!(peers[1].address, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 80));
    }

    #[test]
    fn rejects_peer_blob_with_bad_length() {
        assert!(matches!(split_compact_peers(&[1, 2, 3]), Err(TrackerError::MalformedPeers)));
    }

    #[test]
    fn decodes_announce_response() {
        let body = b"d8:intervali1800e5:peers12:\x7f\x00\x00\x01\x1a\xe1\x0a\x00\x00\x02\x00\x50e";
        let response = decode_announce_response(body).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 2);
    }
}
