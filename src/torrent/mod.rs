//! Metainfo loader: parses a descriptor file, computes `info_hash` by
//! re-encoding the `info` sub-document, and splits the piece-hash blob.
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode::{self, binding::field, BencodeError, Value};

const HASH_LEN: usize = 20;

/// A parsed single-file metainfo descriptor.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub info_hash: [u8; HASH_LEN],
    pub file_name: String,
    pub file_len: u64,
    pub piece_len: u64,
    pub piece_hashes: Vec<[u8; HASH_LEN]>,
}

impl Metainfo {
    /// Parses a descriptor from a byte stream.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, TorrentError> {
        let top = bencode::decode(reader)?;
        let top_dict = top.into_dict()?;

        let announce: String = field(&top_dict, b"announce")?
            .ok_or_else(|| TorrentError::MissingField("announce"))?;

        let info_value = top_dict
            .get(b"info".as_slice())
            .ok_or(TorrentError::MissingField("info"))?;
        let info_dict = info_value.as_dict()?;

        let file_len: i64 = field(info_dict, b"length")?.ok_or(TorrentError::MissingField("info.length"))?;
        let file_name: String = field(info_dict, b"name")?.ok_or(TorrentError::MissingField("info.name"))?;
        let piece_len: i64 =
            field(info_dict, b"piece length")?.ok_or(TorrentError::MissingField("info.piece length"))?;
        let pieces_blob: Vec<u8> =
            field(info_dict, b"pieces")?.ok_or(TorrentError::MissingField("info.pieces"))?;

        if file_len <= 0 {
            return Err(TorrentError::InvalidField("info.length must be positive"));
        }
        if piece_len <= 0 {
            return Err(TorrentError::InvalidField("info.piece length must be positive"));
        }

        let encoded_info = bencode::encode_to_vec(info_value)?;
        let info_hash: [u8; HASH_LEN] = Sha1::digest(&encoded_info).into();

        let piece_hashes = split_piece_hashes(&pieces_blob)?;

        let metainfo = Metainfo {
            announce,
            info_hash,
            file_name,
            file_len: file_len as u64,
            piece_len: piece_len as u64,
            piece_hashes,
        };
        metainfo.validate_piece_count()?;
        Ok(metainfo)
    }

    /// Parses a descriptor from a file path.
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, TorrentError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Effective length of piece `index`: `piece_len` for every piece except
    /// possibly the last, which is truncated to what's left of `file_len`.
    pub fn piece_length(&self, index: usize) -> u64 {
        let start = index as u64 * self.piece_len;
        std::cmp::min(self.piece_len, self.file_len - start)
    }

    fn validate_piece_count(&self) -> Result<(), TorrentError> {
        let n = self.piece_hashes.len() as u64;
        if n == 0 {
            return Err(TorrentError::MalformedPieces);
        }
        let covers = n * self.piece_len >= self.file_len;
        let tight = n < 2 || (n - 1) * self.piece_len < self.file_len;
        if covers && tight {
            Ok(())
        } else {
            Err(TorrentError::MalformedPieces)
        }
    }
}

fn split_piece_hashes(blob: &[u8]) -> Result<Vec<[u8; HASH_LEN]>, TorrentError> {
    if blob.len() % HASH_LEN != 0 {
        return Err(TorrentError::MalformedPieces);
    }
    Ok(blob
        .chunks_exact(HASH_LEN)
        .map(|chunk| chunk.try_into().expect("chunks_exact yields HASH_LEN slices"))
        .collect())
}

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bencode(#[from] BencodeError),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    #[error("info.pieces length is not a multiple of 20")]
    MalformedPieces,
}
