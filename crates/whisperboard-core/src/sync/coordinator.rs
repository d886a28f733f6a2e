//! Single-flight sync coordinator
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncHandle (cloneable)                                         │
//! │  ├── cmd_tx: mpsc::Sender<Command> ──────┐                      │
//! │  └── event_tx: broadcast::Sender          │                      │
//! │                                           ▼                      │
//! │  SyncCoordinator task (one per logged-in account)               │
//! │  ├── Trigger: drain queued triggers, run ONE pass               │
//! │  ├── Initialize / Send / Reset: run between passes              │
//! │  └── ActiveSeekers: answer background worker queries            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every state mutation for the account goes through this task, so passes
//! never overlap and a send never interleaves with a commit.

use std::ops::ControlFlow;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::events::{SyncEvent, SyncReport, TriggerSource};
use super::pass;
use crate::context::AccountContext;
use crate::error::ChatError;
use crate::identity::UserId;
use crate::session::{handshake, Session};
use crate::types::{now_millis, Discussion, Message, Seeker};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, ChatError>>;

pub(crate) enum Command {
    Trigger {
        source: TriggerSource,
        reply: Option<oneshot::Sender<SyncReport>>,
    },
    InitializeDiscussion {
        contact: UserId,
        reply: Reply<Discussion>,
    },
    SendMessage {
        contact: UserId,
        content: String,
        reply: Reply<Message>,
    },
    ResetDiscussion {
        contact: UserId,
        reply: Reply<Discussion>,
    },
    ActiveSeekers {
        reply: Reply<Vec<Seeker>>,
    },
    WatchedSeekers {
        reply: Reply<Vec<(Seeker, u32)>>,
    },
    Shutdown,
}

/// Cloneable handle to a running coordinator
#[derive(Clone)]
pub struct SyncHandle {
    owner: UserId,
    cmd_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncHandle {
    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Request a sync pass without waiting for it.
    ///
    /// If the command queue is full a pass is already pending and will pick
    /// up whatever this trigger would have, so the trigger is dropped.
    pub fn trigger_sync(&self, source: TriggerSource) -> Result<(), ChatError> {
        match self.cmd_tx.try_send(Command::Trigger {
            source,
            reply: None,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%source, "Command queue full, trigger coalesced");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChatError::CoordinatorStopped),
        }
    }

    /// Request a sync pass and wait for the report of the pass that served it.
    pub async fn sync_now(&self, source: TriggerSource) -> Result<SyncReport, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Trigger {
            source,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ChatError::CoordinatorStopped)
    }

    pub async fn initialize_discussion(&self, contact: &UserId) -> Result<Discussion, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::InitializeDiscussion {
            contact: contact.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::CoordinatorStopped)?
    }

    pub async fn send_message(&self, contact: &UserId, content: &str) -> Result<Message, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SendMessage {
            contact: contact.clone(),
            content: content.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::CoordinatorStopped)?
    }

    pub async fn reset_discussion(&self, contact: &UserId) -> Result<Discussion, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ResetDiscussion {
            contact: contact.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::CoordinatorStopped)?
    }

    /// Incoming seekers currently expected across all open discussions.
    pub async fn active_seekers(&self) -> Result<Vec<Seeker>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ActiveSeekers { reply }).await?;
        rx.await.map_err(|_| ChatError::CoordinatorStopped)?
    }

    /// Active seekers paired with how many entries under each were already
    /// handled and will not change on another pass.
    pub async fn watched_seekers(&self) -> Result<Vec<(Seeker, u32)>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::WatchedSeekers { reply }).await?;
        rx.await.map_err(|_| ChatError::CoordinatorStopped)?
    }

    /// Subscribe to coordinator events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Ask the coordinator to stop after the current command.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), ChatError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| ChatError::CoordinatorStopped)
    }
}

/// Owns an account's context and serializes all work on it.
pub struct SyncCoordinator {
    ctx: AccountContext,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: broadcast::Sender<SyncEvent>,
    pass_seq: u64,
}

impl SyncCoordinator {
    /// Spawn the coordinator task for `ctx`.
    pub fn spawn(ctx: AccountContext) -> (SyncHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(ctx.config.command_queue_depth);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let handle = SyncHandle {
            owner: ctx.owner().clone(),
            cmd_tx,
            event_tx: event_tx.clone(),
        };
        let coordinator = Self {
            ctx,
            cmd_rx,
            event_tx,
            pass_seq: 0,
        };
        let task = tokio::spawn(coordinator.run());
        (handle, task)
    }

    async fn run(mut self) {
        let owner = self.ctx.owner().clone();
        info!(owner = %owner.short(), "Sync coordinator started");

        let mut deferred: Option<Command> = None;
        loop {
            let command = match deferred.take() {
                Some(command) => command,
                None => match self.cmd_rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                Command::Trigger { source, reply } => {
                    deferred = self.run_coalesced_pass(source, reply).await;
                }
                other => {
                    if self.handle_request(other).await.is_break() {
                        break;
                    }
                }
            }
        }

        info!(owner = %owner.short(), "Sync coordinator stopped");
    }

    /// Merge every trigger already queued into one pass.
    ///
    /// Draining stops at the first non-trigger command, which is returned so
    /// it runs right after the pass, in order.
    async fn run_coalesced_pass(
        &mut self,
        source: TriggerSource,
        reply: Option<oneshot::Sender<SyncReport>>,
    ) -> Option<Command> {
        let mut sources = vec![source];
        let mut waiters: Vec<oneshot::Sender<SyncReport>> = reply.into_iter().collect();
        let mut deferred = None;

        while let Ok(next) = self.cmd_rx.try_recv() {
            match next {
                Command::Trigger { source, reply } => {
                    if !sources.contains(&source) {
                        sources.push(source);
                    }
                    waiters.extend(reply);
                }
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        self.pass_seq += 1;
        let pass_seq = self.pass_seq;
        debug!(pass_seq, sources = ?sources, "Starting sync pass");
        let _ = self.event_tx.send(SyncEvent::PassStarted {
            pass_seq,
            sources: sources.clone(),
        });

        let report = pass::run_pass(&self.ctx, pass_seq, sources, &self.event_tx).await;

        let _ = self.event_tx.send(SyncEvent::PassFinished {
            report: report.clone(),
        });
        for waiter in waiters {
            let _ = waiter.send(report.clone());
        }
        deferred
    }

    async fn handle_request(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::InitializeDiscussion { contact, reply } => {
                let _ = reply.send(handshake::initiate(&self.ctx, &contact).await);
            }
            Command::SendMessage {
                contact,
                content,
                reply,
            } => {
                let _ = reply.send(self.send_message(&contact, &content).await);
            }
            Command::ResetDiscussion { contact, reply } => {
                let _ = reply.send(handshake::reset(&self.ctx, &contact));
            }
            Command::ActiveSeekers { reply } => {
                let _ = reply.send(self.active_seekers());
            }
            Command::WatchedSeekers { reply } => {
                let _ = reply.send(self.watched_seekers());
            }
            Command::Shutdown => return ControlFlow::Break(()),
            Command::Trigger { .. } => {}
        }
        ControlFlow::Continue(())
    }

    async fn send_message(&self, contact: &UserId, content: &str) -> Result<Message, ChatError> {
        if content.is_empty() {
            return Err(ChatError::InvalidOperation("Message is empty".to_string()));
        }
        let mut session = Session::load(&self.ctx, contact)?;
        let message = session
            .encrypt_and_publish(self.ctx.board.as_ref(), content)
            .await?;

        let mut discussion = session.into_discussion();
        discussion.refresh_preview(&message, self.ctx.config.preview_max_chars);
        discussion.updated_at = now_millis();
        self.ctx
            .storage
            .commit_discussion_update(&discussion, std::slice::from_ref(&message))?;

        debug!(contact = %contact.short(), index = message.index, "Message sent");
        Ok(message)
    }

    fn active_seekers(&self) -> Result<Vec<Seeker>, ChatError> {
        let mut seekers = Vec::new();
        for discussion in self.ctx.storage.list_discussions(self.ctx.owner())? {
            if discussion.is_closed() || discussion.incoming.is_none() {
                continue;
            }
            match Session::materialize(&self.ctx, discussion) {
                Ok(session) => seekers.extend(session.compute_seekers()),
                Err(e) => debug!(error = %e, "Skipping discussion for active seekers"),
            }
        }
        Ok(seekers)
    }

    fn watched_seekers(&self) -> Result<Vec<(Seeker, u32)>, ChatError> {
        self.active_seekers()?
            .into_iter()
            .map(|seeker| Ok((seeker, self.ctx.storage.count_rejected_entries(&seeker)?)))
            .collect()
    }
}
