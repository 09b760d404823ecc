//! A single peer connection: dial, handshake, first bitfield, then a
//! send/receive surface the piece-fetch engine drives directly. Every
//! protected operation is wrapped in its own scoped [`tokio::time::timeout`]
//! rather than a deadline stored on the connection, so a timeout never
//! lingers past the call that set it.
use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::instrument;

use super::{handshake, Bitfield, Message, PeerError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Connection {
    stream: TcpStream,
    pub peer_address: SocketAddrV4,
    pub choked: bool,
    pub bitfield: Bitfield,
}

impl Connection {
    /// Dials `address`, performs the handshake, and reads the mandatory
    /// first bitfield message. Absence of any pieces still arrives as an
    /// all-zeros bitfield, so any other first message is a protocol error.
    #[instrument(skip(info_hash, local_peer_id), fields(peer = %address))]
    pub async fn open(
        address: SocketAddrV4,
        info_hash: &[u8; 20],
        local_peer_id: &[u8; 20],
    ) -> Result<Self, PeerError> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await??;
        let bitfield = Self::handshake_and_bitfield(&mut stream, info_hash, local_peer_id).await?;

        Ok(Connection { stream, peer_address: address, choked: true, bitfield })
    }

    /// Performs the handshake and reads the mandatory first bitfield over
    /// any `AsyncRead + AsyncWrite` stream - split out from [`open`] so the
    /// first-message rule can be exercised directly over an in-memory
    /// stream in tests, without a real TCP dial.
    async fn handshake_and_bitfield<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut S,
        info_hash: &[u8; 20],
        local_peer_id: &[u8; 20],
    ) -> Result<Bitfield, PeerError> {
        timeout(HANDSHAKE_TIMEOUT, handshake::perform(stream, info_hash, local_peer_id)).await??;

        match timeout(BITFIELD_TIMEOUT, Message::read(stream)).await?? {
            Message::Bitfield { bits } => Ok(Bitfield::new(bits)),
            other => Err(PeerError::Protocol(format!(
                "expected bitfield as first message, got {other:?}"
            ))),
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        message.write(&mut self.stream).await
    }

    /// Reads the next message, bounded by `deadline`. Applies `choke`,
    /// `unchoke`, and `have` updates to local state before returning the
    /// message so callers only need to react to the messages they care about.
    pub async fn read(&mut self, deadline: Duration) -> Result<Message, PeerError> {
        let message = timeout(deadline, Message::read(&mut self.stream)).await??;
        match &message {
            Message::Choke => self.choked = true,
            Message::Unchoke => self.choked = false,
            Message::Have { index } => self.bitfield.set_piece(*index as usize),
            _ => {}
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_zeros_bitfield_as_first_message_is_accepted() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let info_hash = [5u8; 20];
        let client_id = [1u8; 20];
        let server_id = [2u8; 20];

        let server_task = tokio::spawn(async move {
            handshake::perform(&mut server, &info_hash, &server_id).await.unwrap();
            Message::Bitfield { bits: vec![0u8; 2] }.write(&mut server).await.unwrap();
        });

        let bitfield = Connection::handshake_and_bitfield(&mut client, &info_hash, &client_id)
            .await
            .unwrap();

        for i in 0..16 {
            assert!(!bitfield.has_piece(i));
        }
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn non_bitfield_first_message_is_a_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let info_hash = [6u8; 20];
        let client_id = [1u8; 20];
        let server_id = [2u8; 20];

        let server_task = tokio::spawn(async move {
            handshake::perform(&mut server, &info_hash, &server_id).await.unwrap();
            // Sends `unchoke` instead of the mandatory first bitfield.
            Message::Unchoke.write(&mut server).await.unwrap();
        });

        let result = Connection::handshake_and_bitfield(&mut client, &info_hash, &client_id).await;
        assert!(matches!(result, Err(PeerError::Protocol(_))));
        server_task.await.unwrap();
    }
}
