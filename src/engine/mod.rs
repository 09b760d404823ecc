//! Piece-fetch engine: a work-stealing coordinator that hands piece tasks
//! to per-peer worker tasks, each of which drives one [`Connection`] through
//! the pipelined block-request protocol and verifies the result by hash.
use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{info, instrument, warn};

use crate::peer::{Connection, Message, PeerError};
use crate::torrent::Metainfo;

const BLOCK_SIZE: u32 = 16 * 1024;
const PIPELINE_DEPTH: usize = 5;
const PIECE_DEADLINE: Duration = Duration::from_secs(15);

/// One piece awaiting download, created once per piece at startup and
/// re-enqueued on failure.
#[derive(Debug, Clone)]
pub struct PieceTask {
    pub index: usize,
    pub expected_hash: [u8; 20],
    pub length: u32,
}

/// A successfully hash-verified piece, ready for the coordinator to copy
/// into the output buffer.
pub struct PieceResult {
    pub index: usize,
    pub data: Vec<u8>,
}

/// Multi-producer multi-consumer queue of outstanding piece tasks. Failed
/// tasks re-enqueue themselves at the back; any worker may claim any task,
/// so there's no fairness guarantee across peers.
#[derive(Clone)]
struct TaskQueue {
    tasks: Arc<Mutex<VecDeque<PieceTask>>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl TaskQueue {
    fn new(tasks: VecDeque<PieceTask>) -> Self {
        TaskQueue { tasks: Arc::new(Mutex::new(tasks)), notify: Arc::new(Notify::new()), closed: Arc::new(AtomicBool::new(false)) }
    }

    /// Returns the next task, waiting for one to appear. Returns `None` once
    /// the queue has been closed and drained.
    ///
    /// Registers as a waiter (`enable()`) before checking the queue, not
    /// after - otherwise a `push_back`/`close` landing between the check and
    /// the wait would call `notify_waiters` with no one registered yet, and
    /// this task would block until some *later* push happened to wake it.
    async fn pop(&self) -> Option<PieceTask> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.tasks.lock().expect("task queue mutex poisoned").pop_front() {
                return Some(task);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    fn push_back(&self, task: PieceTask) {
        self.tasks.lock().expect("task queue mutex poisoned").push_back(task);
        self.notify.notify_waiters();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Drives the full download: spawns one worker per peer address, collects
/// verified pieces, and assembles them into the returned buffer.
pub struct Coordinator {
    metainfo: Metainfo,
    info_hash: [u8; 20],
    local_peer_id: [u8; 20],
}

impl Coordinator {
    pub fn new(metainfo: Metainfo, local_peer_id: [u8; 20]) -> Self {
        let info_hash = metainfo.info_hash;
        Coordinator { metainfo, info_hash, local_peer_id }
    }

    /// Runs the full download against `peers`, returning the assembled file
    /// buffer once every piece has arrived and been hash-verified.
    #[instrument(skip(self, peers), fields(pieces = self.metainfo.piece_count(), peers = peers.len()))]
    pub async fn download(&self, peers: &[SocketAddrV4]) -> Result<Vec<u8>, EngineError> {
        if peers.is_empty() {
            return Err(EngineError::NoPeers);
        }

        let total_pieces = self.metainfo.piece_count();
        let mut initial = VecDeque::with_capacity(total_pieces);
        for index in 0..total_pieces {
            initial.push_back(PieceTask {
                index,
                expected_hash: self.metainfo.piece_hashes[index],
                length: self.metainfo.piece_length(index) as u32,
            });
        }
        let queue = TaskQueue::new(initial);

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<PieceResult>();

        let mut worker_handles = Vec::with_capacity(peers.len());
        for &address in peers {
            let queue = queue.clone();
            let result_tx = result_tx.clone();
            let info_hash = self.info_hash;
            let local_peer_id = self.local_peer_id;
            worker_handles.push(tokio::spawn(async move {
                worker(address, info_hash, local_peer_id, queue, result_tx).await;
            }));
        }
        // Drop the coordinator's own sender so the channel closes once every
        // worker has exited, even if pieces remain outstanding - that's how
        // `recv()` returning `None` below distinguishes "stalled, no workers
        // left" from "still waiting on a live worker".
        drop(result_tx);

        let mut buffer = vec![0u8; self.metainfo.file_len as usize];
        let mut collected = 0usize;

        while collected < total_pieces {
            match result_rx.recv().await {
                Some(result) => {
                    let offset = result.index * self.metainfo.piece_len as usize;
                    buffer[offset..offset + result.data.len()].copy_from_slice(&result.data);
                    collected += 1;
                    info!(collected, total_pieces, "piece verified");
                }
                None => {
                    warn!(collected, total_pieces, "all workers exited with pieces outstanding");
                    queue.close();
                    for handle in worker_handles {
                        let _ = handle.await;
                    }
                    return Err(EngineError::InsufficientPeers);
                }
            }
        }

        queue.close();
        for handle in worker_handles {
            let _ = handle.await;
        }
        Ok(buffer)
    }
}

async fn worker(
    address: SocketAddrV4,
    info_hash: [u8; 20],
    local_peer_id: [u8; 20],
    queue: TaskQueue,
    result_tx: mpsc::UnboundedSender<PieceResult>,
) {
    let mut connection = match Connection::open(address, &info_hash, &local_peer_id).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(peer = %address, error = %err, "worker failed to connect");
            return;
        }
    };

    if let Err(err) = connection.send(&Message::Interested).await {
        warn!(peer = %address, error = %err, "failed to send interested");
        return;
    }

    while let Some(task) = queue.pop().await {
        if !connection.bitfield.has_piece(task.index) {
            queue.push_back(task);
            continue;
        }

        match download_piece(&mut connection, &task).await {
            Ok(data) => {
                if verify_hash(&data, &task.expected_hash) {
                    if result_tx.send(PieceResult { index: task.index, data }).is_err() {
                        return;
                    }
                } else {
                    warn!(peer = %address, index = task.index, "piece hash mismatch");
                    queue.push_back(task);
                }
            }
            Err(err) => {
                warn!(peer = %address, index = task.index, error = %err, "download failed");
                queue.push_back(task);
                return;
            }
        }
    }
}

fn verify_hash(data: &[u8], expected: &[u8; 20]) -> bool {
    let digest: [u8; 20] = Sha1::digest(data).into();
    &digest == expected
}

/// Pipelined block download for a single piece: keeps up to
/// [`PIPELINE_DEPTH`] requests outstanding while unchoked, and dispatches
/// every reply until the piece buffer is full.
///
/// `PIECE_DEADLINE` is a total budget for the *whole* piece, not a per-read
/// window - it is computed once as an absolute deadline and each read gets
/// only whatever time remains, so a peer that trickles one message every
/// few seconds can't keep a single piece alive indefinitely.
async fn download_piece(connection: &mut Connection, task: &PieceTask) -> Result<Vec<u8>, PeerError> {
    let length = task.length;
    let mut buffer = vec![0u8; length as usize];
    let mut requested = 0u32;
    let mut downloaded = 0u32;
    let mut backlog = 0usize;
    let deadline = tokio::time::Instant::now() + PIECE_DEADLINE;

    while downloaded < length {
        while !connection.choked && backlog < PIPELINE_DEPTH && requested < length {
            let block_len = next_block_length(requested, length);
            connection.send(&Message::request(task.index as u32, requested, block_len)).await?;
            requested += block_len;
            backlog += 1;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(PeerError::Timeout);
        }

        // Choke/unchoke/have updates are already applied by `connection.read`
        // itself; only `piece` replies need handling here.
        match connection.read(remaining).await? {
            Message::Choke | Message::Unchoke | Message::Have { .. } => {}
            Message::Piece { index, begin, data } => {
                if index as usize != task.index {
                    return Err(PeerError::Protocol(format!(
                        "piece reply for index {index}, expected {}",
                        task.index
                    )));
                }
                if begin >= length || begin + data.len() as u32 > length {
                    return Err(PeerError::Protocol("piece reply out of bounds".to_string()));
                }
                let begin = begin as usize;
                buffer[begin..begin + data.len()].copy_from_slice(&data);
                downloaded += data.len() as u32;
                backlog = backlog.saturating_sub(1);
            }
            Message::KeepAlive => {}
            _ => {}
        }
    }

    Ok(buffer)
}

/// Length of the next block request given how much of the piece has already
/// been requested: `BLOCK_SIZE`, except the last block is truncated to
/// whatever remains.
fn next_block_length(requested: u32, length: u32) -> u32 {
    std::cmp::min(BLOCK_SIZE, length - requested)
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tracker returned no peers")]
    NoPeers,

    #[error("all workers exited with pieces still outstanding")]
    InsufficientPeers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_length_sequence_sums_to_piece_length_with_16kib_intermediates() {
        for length in [1u32, 100, BLOCK_SIZE, BLOCK_SIZE + 1, 5 * BLOCK_SIZE, 5 * BLOCK_SIZE + 7000] {
            let mut requested = 0u32;
            let mut lengths = Vec::new();
            while requested < length {
                let block_len = next_block_length(requested, length);
                lengths.push(block_len);
                requested += block_len;
            }

            assert_eq!(lengths.iter().sum::<u32>(), length);
            let (last, intermediates) = lengths.split_last().unwrap();
            assert!(intermediates.iter().all(|&len| len == BLOCK_SIZE));
            let expected_last = length - BLOCK_SIZE * ((length - 1) / BLOCK_SIZE);
            assert_eq!(*last, expected_last);
        }
    }

    #[test]
    fn verify_hash_accepts_matching_digest_and_rejects_others() {
        let data = b"hello world".to_vec();
        let digest: [u8; 20] = Sha1::digest(&data).into();
        assert!(verify_hash(&data, &digest));
        assert!(!verify_hash(&data, &[0u8; 20]));
    }

    #[tokio::test]
    async fn download_rejects_empty_peer_list() {
        let info = {
            let mut map = std::collections::BTreeMap::new();
            map.insert(b"length".to_vec(), crate::bencode::Value::Integer(10));
            map.insert(b"name".to_vec(), crate::bencode::Value::ByteString(b"x".to_vec()));
            map.insert(b"piece length".to_vec(), crate::bencode::Value::Integer(10));
            map.insert(b"pieces".to_vec(), crate::bencode::Value::ByteString(vec![0u8; 20]));
            map
        };
        let mut top = std::collections::BTreeMap::new();
        top.insert(b"announce".to_vec(), crate::bencode::Value::ByteString(b"http://t/a".to_vec()));
        top.insert(b"info".to_vec(), crate::bencode::Value::Dict(info));
        let bytes = crate::bencode::encode_to_vec(&crate::bencode::Value::Dict(top)).unwrap();
        let metainfo = Metainfo::from_reader(bytes.as_slice()).unwrap();

        let coordinator = Coordinator::new(metainfo, [1u8; 20]);
        let result = coordinator.download(&[]).await;
        assert!(matches!(result, Err(EngineError::NoPeers)));
    }

    #[tokio::test]
    async fn task_queue_pop_blocks_until_pushed() {
        let queue = TaskQueue::new(VecDeque::new());
        let pushed = queue.clone();
        let handle = tokio::spawn(async move {
            pushed.push_back(PieceTask { index: 0, expected_hash: [0u8; 20], length: 10 });
        });
        let task = queue.pop().await.unwrap();
        assert_eq!(task.index, 0);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn task_queue_pop_returns_none_once_closed_and_drained() {
        let queue = TaskQueue::new(VecDeque::new());
        queue.close();
        assert!(queue.pop().await.is_none());
    }

    /// End-to-end: one fake peer over a real loopback TCP socket serves both
    /// pieces of a two-piece file. Exercises the full worker state machine
    /// (handshake, bitfield, choke/unchoke, pipelined request/piece) and the
    /// coordinator's piece-indexing law: piece `i` lands at
    /// `[i * piece_len, i * piece_len + len(piece_i))` in the output buffer.
    #[tokio::test]
    async fn coordinator_assembles_file_from_one_fake_peer() {
        use crate::peer::handshake;
        use tokio::net::TcpListener;

        let piece0 = b"abcd".to_vec();
        let piece1 = b"wxyz".to_vec();
        let hash0: [u8; 20] = Sha1::digest(&piece0).into();
        let hash1: [u8; 20] = Sha1::digest(&piece1).into();

        let mut info = std::collections::BTreeMap::new();
        info.insert(b"length".to_vec(), crate::bencode::Value::Integer(8));
        info.insert(b"name".to_vec(), crate::bencode::Value::ByteString(b"sample.bin".to_vec()));
        info.insert(b"piece length".to_vec(), crate::bencode::Value::Integer(4));
        let mut pieces_blob = Vec::new();
        pieces_blob.extend_from_slice(&hash0);
        pieces_blob.extend_from_slice(&hash1);
        info.insert(b"pieces".to_vec(), crate::bencode::Value::ByteString(pieces_blob));
        let mut top = std::collections::BTreeMap::new();
        top.insert(b"announce".to_vec(), crate::bencode::Value::ByteString(b"http://t/a".to_vec()));
        top.insert(b"info".to_vec(), crate::bencode::Value::Dict(info));
        let bytes = crate::bencode::encode_to_vec(&crate::bencode::Value::Dict(top)).unwrap();
        let metainfo = Metainfo::from_reader(bytes.as_slice()).unwrap();
        let info_hash = metainfo.info_hash;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            other => panic!("expected an IPv4 loopback address, got {other}"),
        };

        let fake_peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            handshake::perform(&mut stream, &info_hash, &[9u8; 20]).await.unwrap();

            Message::Bitfield { bits: vec![0b1100_0000] }.write(&mut stream).await.unwrap();
            Message::Unchoke.write(&mut stream).await.unwrap();

            assert_eq!(Message::read(&mut stream).await.unwrap(), Message::Interested);

            for _ in 0..2 {
                match Message::read(&mut stream).await.unwrap() {
                    Message::Request { index, begin, length } => {
                        let data = if index == 0 { &piece0 } else { &piece1 };
                        assert_eq!(begin, 0);
                        assert_eq!(length as usize, data.len());
                        Message::Piece { index, begin: 0, data: data.clone() }.write(&mut stream).await.unwrap();
                    }
                    other => panic!("unexpected message from client: {other:?}"),
                }
            }
        });

        let coordinator = Coordinator::new(metainfo, [1u8; 20]);
        let buffer = coordinator.download(&[addr]).await.unwrap();
        fake_peer.await.unwrap();

        assert_eq!(buffer, b"abcdwxyz");
    }
}
