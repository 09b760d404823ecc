//! Length-prefixed message framing and the typed messages this client
//! understands. Every frame is `[4-byte big-endian length N][1-byte id][N-1
//! bytes payload]`; `N == 0` is a keep-alive with no id and no payload.
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::PeerError;

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield { bits: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    /// Any message id this core doesn't interpret; kept only so framing
    /// stays total over future protocol extensions.
    Unknown { id: u8 },
}

impl Message {
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        Message::Request { index, begin, length }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Message::KeepAlive => 0u32.to_be_bytes().to_vec(),
            Message::Choke => frame(ID_CHOKE, &[]),
            Message::Unchoke => frame(ID_UNCHOKE, &[]),
            Message::Interested => frame(ID_INTERESTED, &[]),
            Message::NotInterested => frame(ID_NOT_INTERESTED, &[]),
            Message::Have { index } => frame(ID_HAVE, &index.to_be_bytes()),
            Message::Bitfield { bits } => frame(ID_BITFIELD, bits),
            Message::Request { index, begin, length } => {
                let mut payload = Vec::with_capacity(12);
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
                frame(ID_REQUEST, &payload)
            }
            Message::Cancel { index, begin, length } => {
                let mut payload = Vec::with_capacity(12);
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
                frame(ID_CANCEL, &payload)
            }
            Message::Piece { index, begin, data } => {
                let mut payload = Vec::with_capacity(8 + data.len());
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(data);
                frame(ID_PIECE, &payload)
            }
            Message::Unknown { id } => frame(*id, &[]),
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), PeerError> {
        writer.write_all(&self.encode()).await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, PeerError> {
        let length = reader.read_u32().await?;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = reader.read_u8().await?;
        let mut payload = vec![0u8; length as usize - 1];
        reader.read_exact(&mut payload).await?;

        Self::from_id_and_payload(id, payload)
    }

    fn from_id_and_payload(id: u8, payload: Vec<u8>) -> Result<Self, PeerError> {
        match id {
            ID_CHOKE => Ok(Message::Choke),
            ID_UNCHOKE => Ok(Message::Unchoke),
            ID_INTERESTED => Ok(Message::Interested),
            ID_NOT_INTERESTED => Ok(Message::NotInterested),
            ID_HAVE => Ok(Message::Have { index: read_u32_at(&payload, 0)? }),
            ID_BITFIELD => Ok(Message::Bitfield { bits: payload }),
            ID_REQUEST => Ok(Message::Request {
                index: read_u32_at(&payload, 0)?,
                begin: read_u32_at(&payload, 4)?,
                length: read_u32_at(&payload, 8)?,
            }),
            ID_CANCEL => Ok(Message::Cancel {
                index: read_u32_at(&payload, 0)?,
                begin: read_u32_at(&payload, 4)?,
                length: read_u32_at(&payload, 8)?,
            }),
            ID_PIECE => {
                if payload.len() < 8 {
                    return Err(PeerError::Protocol("piece payload shorter than 8 bytes".to_string()));
                }
                Ok(Message::Piece {
                    index: read_u32_at(&payload, 0)?,
                    begin: read_u32_at(&payload, 4)?,
                    data: payload[8..].to_vec(),
                })
            }
            other => Ok(Message::Unknown { id: other }),
        }
    }
}

fn frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let length = (payload.len() + 1) as u32;
    let mut out = Vec::with_capacity(4 + payload.len() + 1);
    out.extend_from_slice(&length.to_be_bytes());
    out.push(id);
    out.extend_from_slice(payload);
    out
}

fn read_u32_at(payload: &[u8], offset: usize) -> Result<u32, PeerError> {
    let slice = payload
        .get(offset..offset + 4)
        .ok_or_else(|| PeerError::Protocol("message payload too short".to_string()))?;
    Ok(u32::from_be_bytes(slice.try_into().expect("slice is exactly 4 bytes")))
}
