//! The shared, untrusted, append-only board
//!
//! Anyone may publish an opaque payload under a 32-byte seeker, and anyone
//! who knows a seeker may fetch what was published under it. The board never
//! sees plaintext or identities; all meaning lives in the seekers.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::types::Seeker;

/// One payload published under a seeker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardEntry {
    pub seeker: Seeker,
    pub payload: Vec<u8>,
}

/// Network-facing board client.
///
/// Both operations fail with [`ChatError::BoardUnavailable`] when the board
/// cannot be reached.
#[async_trait]
pub trait Board: Send + Sync {
    /// Append `payload` under `seeker`.
    async fn publish(&self, seeker: &Seeker, payload: &[u8]) -> Result<(), ChatError>;

    /// Fetch every entry published under any of `seekers`.
    async fn fetch(&self, seekers: &[Seeker]) -> Result<Vec<BoardEntry>, ChatError>;
}

/// In-process board.
///
/// Used by tests and the CLI (which snapshots it to a JSON file between
/// invocations). Can be switched offline to exercise failure paths.
#[derive(Default)]
pub struct MemoryBoard {
    entries: RwLock<HashMap<Seeker, Vec<Vec<u8>>>>,
    offline: AtomicBool,
    fetch_delay_ms: AtomicU64,
    fetch_calls: AtomicU64,
    publish_calls: AtomicU64,
}

#[derive(Serialize, Deserialize)]
struct BoardSnapshot {
    /// seeker hex -> hex payloads, in publish order
    entries: HashMap<String, Vec<String>>,
}

impl MemoryBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate connectivity loss (`false`) or recovery (`true`).
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Delay every fetch, to hold a sync pass open in tests.
    pub fn set_fetch_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.fetch_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of fetch calls served so far
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of publish calls accepted so far
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Total number of payloads on the board
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a board snapshot, or an empty board if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read(path)?;
        let snapshot: BoardSnapshot = serde_json::from_slice(&data)
            .map_err(|e| ChatError::Serialization(format!("Invalid board file: {}", e)))?;

        let mut entries = HashMap::new();
        for (seeker_hex, payloads) in snapshot.entries {
            let seeker = Seeker::from_hex(&seeker_hex).ok_or_else(|| {
                ChatError::Serialization(format!("Invalid seeker in board file: {}", seeker_hex))
            })?;
            let decoded = payloads
                .iter()
                .map(|p| hex::decode(p).map_err(|e| ChatError::Serialization(e.to_string())))
                .collect::<Result<Vec<_>, _>>()?;
            entries.insert(seeker, decoded);
        }

        Ok(Self {
            entries: RwLock::new(entries),
            ..Self::default()
        })
    }

    /// Write the board contents to a JSON snapshot file.
    ///
    /// The snapshot is written next to `path` and renamed over it, so readers
    /// see either the old or the new file. Concurrent writers are not merged;
    /// the last one to save wins.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ChatError> {
        let snapshot = BoardSnapshot {
            entries: self
                .entries
                .read()
                .iter()
                .map(|(seeker, payloads)| {
                    (seeker.to_hex(), payloads.iter().map(hex::encode).collect())
                })
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ChatError::Serialization(e.to_string()))?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = snapshot_tmp_path(path);
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn check_online(&self) -> Result<(), ChatError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ChatError::BoardUnavailable("board is offline".to_string()))
        }
    }
}

fn snapshot_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait]
impl Board for MemoryBoard {
    async fn publish(&self, seeker: &Seeker, payload: &[u8]) -> Result<(), ChatError> {
        self.check_online()?;
        self.entries
            .write()
            .entry(*seeker)
            .or_default()
            .push(payload.to_vec());
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(%seeker, len = payload.len(), "Board publish");
        Ok(())
    }

    async fn fetch(&self, seekers: &[Seeker]) -> Result<Vec<BoardEntry>, ChatError> {
        self.check_online()?;
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            // Connectivity may have dropped while the request was in flight
            self.check_online()?;
        }
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let entries = self.entries.read();
        let mut found = Vec::new();
        for seeker in seekers {
            if let Some(payloads) = entries.get(seeker) {
                found.extend(payloads.iter().map(|payload| BoardEntry {
                    seeker: *seeker,
                    payload: payload.clone(),
                }));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_fetch() {
        let board = MemoryBoard::new();
        let a = Seeker([1; 32]);
        let b = Seeker([2; 32]);

        board.publish(&a, b"one").await.unwrap();
        board.publish(&a, b"two").await.unwrap();
        board.publish(&b, b"three").await.unwrap();

        let fetched = board.fetch(&[a]).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].payload, b"one");
        assert_eq!(board.len(), 3);
    }

    #[tokio::test]
    async fn test_offline_board_fails() {
        let board = MemoryBoard::new();
        board.set_online(false);

        let err = board.publish(&Seeker([1; 32]), b"x").await.unwrap_err();
        assert!(matches!(err, ChatError::BoardUnavailable(_)));
        assert!(board.fetch(&[Seeker([1; 32])]).await.is_err());

        board.set_online(true);
        assert!(board.fetch(&[Seeker([1; 32])]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        let board = MemoryBoard::new();
        board.publish(&Seeker([9; 32]), b"payload").await.unwrap();
        board.save_to(&path).unwrap();

        let restored = MemoryBoard::load_from(&path).unwrap();
        let fetched = restored.fetch(&[Seeker([9; 32])]).await.unwrap();
        assert_eq!(fetched[0].payload, b"payload");
    }

    #[tokio::test]
    async fn test_snapshot_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        let board = MemoryBoard::new();
        board.publish(&Seeker([1; 32]), b"first").await.unwrap();
        board.save_to(&path).unwrap();
        board.publish(&Seeker([2; 32]), b"second").await.unwrap();
        board.save_to(&path).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("board.json")]);

        let restored = MemoryBoard::load_from(&path).unwrap();
        assert_eq!(restored.fetch(&[Seeker([1; 32]), Seeker([2; 32])]).await.unwrap().len(), 2);
    }

    #[test]
    fn test_huge_fetch_delay_saturates() {
        let board = MemoryBoard::new();
        board.set_fetch_delay(Duration::MAX);
        assert_eq!(board.fetch_delay_ms.load(Ordering::SeqCst), u64::MAX);
        board.set_fetch_delay(Duration::from_millis(25));
        assert_eq!(board.fetch_delay_ms.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let board = MemoryBoard::load_from(dir.path().join("none.json")).unwrap();
        assert!(board.is_empty());
    }
}
