//! Shared setup for integration tests
//!
//! Every peer gets its own redb file in a temp dir; all peers of a test share
//! one `MemoryBoard`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use whisperboard_core::{
    CoreConfig, Credential, LoggedIn, MemoryBoard, Messenger, PeerSessionStatus, PublicIdentity, Storage,
    SyncEvent, SyncReport, UserId,
};

pub const PASSWORD: &str = "correct horse battery staple";

pub struct Peer {
    pub session: LoggedIn,
    pub messenger: Messenger,
    board: Arc<MemoryBoard>,
    db_path: PathBuf,
    _dir: TempDir,
}

impl Peer {
    /// Create an account, log in and let the login pass finish.
    pub async fn new(board: &Arc<MemoryBoard>) -> Peer {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("whisperboard.redb");
        let messenger = open_messenger(&db_path, board);
        let credential = Credential::password(PASSWORD);
        let record = messenger.create_account(&credential).await.unwrap();
        let session = messenger.login(&record.user_id, &credential).await.unwrap();
        session.trigger_sync_and_wait().await.unwrap();
        Peer {
            session,
            messenger,
            board: board.clone(),
            db_path,
            _dir: dir,
        }
    }

    pub fn id(&self) -> UserId {
        self.session.user_id().clone()
    }

    pub fn public(&self) -> PublicIdentity {
        self.session.public_identity()
    }

    pub async fn sync(&self) -> SyncReport {
        self.session.trigger_sync_and_wait().await.unwrap()
    }

    pub fn status_with(&self, other: &Peer) -> PeerSessionStatus {
        self.session.peer_session_status(&other.id()).unwrap()
    }

    /// Log out, reopen the store from disk and log back in.
    pub async fn restart(self) -> Peer {
        let Peer {
            session,
            messenger,
            board,
            db_path,
            _dir,
        } = self;
        let user_id = session.user_id().clone();
        session.logout().await;
        drop(messenger);

        let messenger = open_messenger(&db_path, &board);
        let session = messenger
            .login(&user_id, &Credential::password(PASSWORD))
            .await
            .unwrap();
        Peer {
            session,
            messenger,
            board,
            db_path,
            _dir,
        }
    }
}

fn open_messenger(db_path: &Path, board: &Arc<MemoryBoard>) -> Messenger {
    let storage = Storage::new(db_path).unwrap();
    Messenger::new(storage, board.clone(), CoreConfig::for_tests()).unwrap()
}

/// `a` imports `b`'s key and announces; both sides sync until established.
pub async fn connect(a: &Peer, b: &Peer) {
    a.session.add_contact(b.public(), None).unwrap();
    a.session.initialize_discussion(&b.id()).await.unwrap();
    b.sync().await;
    a.sync().await;
    assert_eq!(a.status_with(b), PeerSessionStatus::Established);
    assert_eq!(b.status_with(a), PeerSessionStatus::Established);
}

pub async fn connected_pair() -> (Arc<MemoryBoard>, Peer, Peer) {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;
    connect(&alice, &bob).await;
    (board, alice, bob)
}

/// Wait for the first event matching `pred`.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
