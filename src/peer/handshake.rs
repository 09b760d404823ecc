//! The fixed 68-byte handshake frame that opens every peer connection.
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::PeerError;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
const HANDSHAKE_LEN: usize = 49 + PROTOCOL.len();

/// Sends our handshake, reads theirs, and verifies the `info_hash` matches.
/// Returns the peer's advertised `peer_id`.
pub async fn perform<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    info_hash: &[u8; 20],
    local_peer_id: &[u8; 20],
) -> Result<[u8; 20], PeerError> {
    let outbound = build_frame(info_hash, local_peer_id);
    stream.write_all(&outbound).await?;

    let mut inbound = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut inbound).await?;

    let (remote_hash, remote_peer_id) = parse_frame(&inbound)?;
    if &remote_hash != info_hash {
        return Err(PeerError::HandshakeMismatch);
    }
    Ok(remote_peer_id)
}

fn build_frame(info_hash: &[u8; 20], peer_id: &[u8; 20]) -> [u8; HANDSHAKE_LEN] {
    let mut frame = [0u8; HANDSHAKE_LEN];
    frame[0] = PROTOCOL.len() as u8;
    frame[1..20].copy_from_slice(PROTOCOL);
    // bytes 20..28 stay zero: the 8 reserved bytes.
    frame[28..48].copy_from_slice(info_hash);
    frame[48..68].copy_from_slice(peer_id);
    frame
}

fn parse_frame(frame: &[u8; HANDSHAKE_LEN]) -> Result<([u8; 20], [u8; 20]), PeerError> {
    if frame[0] as usize != PROTOCOL.len() {
        return Err(PeerError::Protocol(format!("unexpected pstrlen {}", frame[0])));
    }
    if &frame[1..20] != PROTOCOL.as_slice() {
        return Err(PeerError::Protocol("unexpected protocol string".to_string()));
    }
    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&frame[28..48]);
    let mut peer_id = [0u8; 20];
    peer_id.copy_from_slice(&frame[48..68]);
    Ok((info_hash, peer_id))
}
