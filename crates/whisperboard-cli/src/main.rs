//! Whisperboard CLI
//!
//! Thin wrapper around whisperboard-core for command-line usage. The board is
//! a JSON snapshot file; point two instances at the same `--board` and run
//! them one after the other to let them talk.
//!
//! ## Usage
//!
//! ```bash
//! # Create an identity
//! whisperboard --instance alice init --password hunter2
//!
//! # Show identity and public key
//! whisperboard --instance alice info
//!
//! # Add a contact from its public key, then announce to it
//! whisperboard --instance alice --password hunter2 contact add <public-key> --name bob
//! whisperboard --instance alice --password hunter2 discussion start <user-id>
//!
//! # Run a sync pass and send a message
//! whisperboard --instance alice --password hunter2 sync
//! whisperboard --instance alice --password hunter2 send <user-id> "hello"
//!
//! # Two in-process identities talking over a memory board
//! whisperboard demo
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use whisperboard_core::logging::LoggingBuilder;
use whisperboard_core::{
    CoreConfig, Credential, DiscussionId, LoggedIn, MemoryBoard, Messenger, PeerSessionStatus, PublicIdentity,
    Storage, SyncReport, UserId,
};

/// Whisperboard - encrypted messaging over a shared board
#[derive(Parser)]
#[command(name = "whisperboard")]
#[command(version)]
#[command(about = "Whisperboard - encrypted messaging over a shared board")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Instance name; selects the default data directory and log file
    #[arg(short, long, global = true, default_value = "default")]
    instance: String,

    /// Data directory (default: ~/.whisperboard/<instance>)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/config.json if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Board snapshot file shared between instances (one writer at a time; the last to exit wins)
    #[arg(short, long, global = true)]
    board: Option<PathBuf>,

    /// Password unlocking the identity
    #[arg(short, long, global = true)]
    password: Option<String>,

    /// Also write JSONL logs under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a password-wrapped identity
    Init,

    /// Show identity information
    Info,

    /// Contact management
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },

    /// Discussion management
    Discussion {
        #[command(subcommand)]
        action: DiscussionAction,
    },

    /// Send a message to a contact
    Send {
        /// Contact user id (wb:z...)
        contact: String,
        /// Message text
        text: String,
    },

    /// Run one sync pass and print its report
    Sync,

    /// Show recovery material (requires --password)
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Two in-process identities exchanging messages
    Demo,
}

#[derive(Subcommand)]
enum ContactAction {
    /// Add a contact from its base58 public key
    Add {
        public_key: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List contacts
    List,
}

#[derive(Subcommand)]
enum DiscussionAction {
    /// Announce to a contact and open a discussion
    Start { contact: String },
    /// List discussions, most recent first
    List,
    /// Show the messages of a discussion
    Show { contact: String },
    /// Close the discussion with a contact
    Reset { contact: String },
}

#[derive(Subcommand)]
enum BackupAction {
    /// 24-word recovery phrase
    Mnemonic,
    /// Base58 private key
    PrivateKey,
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>, instance: &str) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    match log_dir {
        Some(dir) => {
            LoggingBuilder::new(dir, instance)
                .with_filter(filter)
                .init()
                .context("Failed to set up JSONL logging")?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                )
                .init();
        }
    }
    Ok(())
}

/// Default data directory (~/.whisperboard/<instance>)
fn default_data_dir(instance: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".whisperboard")
        .join(instance)
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<CoreConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => data_dir.join("config.json"),
    };
    if explicit.is_none() && !path.exists() {
        return Ok(CoreConfig::default());
    }
    CoreConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn parse_user_id(s: &str) -> Result<UserId> {
    UserId::parse(s).map_err(|e| anyhow::anyhow!("Invalid user id '{}': {}", s, e))
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_report(report: &SyncReport) {
    println!("Sync pass {}:", report.pass_seq);
    println!("  Announcements published: {}", report.announcements_published);
    println!("  Handshakes: {}", report.handshakes_completed);
    println!("  New messages: {}", report.new_messages);
    if report.stale_entries > 0 {
        println!("  Stale entries: {}", report.stale_entries);
    }
    for failure in &report.failures {
        println!("  Failure ({:?}): {}", failure.kind, failure.error);
    }
    if let Some(reason) = &report.aborted {
        println!("  Aborted: {}", reason);
    }
}

/// The local identity plus the board it talks to.
struct Node {
    messenger: Messenger,
    board: Arc<MemoryBoard>,
    board_path: PathBuf,
}

impl Node {
    fn open(data_dir: &Path, board_path: PathBuf, config: CoreConfig) -> Result<Self> {
        let storage = Storage::new(data_dir.join("whisperboard.redb"))?;
        let board = Arc::new(MemoryBoard::load_from(&board_path)?);
        let messenger = Messenger::new(storage, board.clone(), config)?;
        Ok(Self {
            messenger,
            board,
            board_path,
        })
    }

    fn account(&self) -> Result<UserId> {
        self.messenger
            .list_accounts()?
            .into_iter()
            .next()
            .map(|record| record.user_id)
            .context("No identity here yet. Run `whisperboard init --password <password>`")
    }

    async fn login(&self, password: Option<&str>) -> Result<LoggedIn> {
        let password = password.context("This command needs --password")?;
        let user_id = self.account()?;
        let session = self
            .messenger
            .login(&user_id, &Credential::password(password))
            .await
            .context("Failed to unlock identity")?;
        Ok(session)
    }

    /// Stop the account and persist whatever it published.
    async fn finish(&self, session: LoggedIn) -> Result<()> {
        session.logout().await;
        self.board.save_to(&self.board_path)?;
        tracing::debug!(path = %self.board_path.display(), entries = self.board.len(), "Saved board snapshot");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir.as_deref(), &cli.instance)?;

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| default_data_dir(&cli.instance));
    let config = load_config(cli.config.as_deref(), &data_dir)?;

    if let Commands::Demo = cli.command {
        return run_demo(config).await;
    }

    let board_path = cli.board.clone().unwrap_or_else(|| data_dir.join("board.json"));
    let node = Node::open(&data_dir, board_path, config)?;
    let password = cli.password.as_deref();

    match cli.command {
        Commands::Init => {
            let password = password.context("init needs --password")?;
            if !node.messenger.list_accounts()?.is_empty() {
                anyhow::bail!("An identity already exists in {}", data_dir.display());
            }
            let record = node
                .messenger
                .create_account(&Credential::password(password))
                .await?;
            println!("Created identity:");
            println!("  User ID: {}", record.user_id);
            println!("  Public key: {}", record.public_identity.to_base58());
        }

        Commands::Info => {
            println!("Whisperboard v{}", env!("CARGO_PKG_VERSION"));
            println!();
            let records = node.messenger.list_accounts()?;
            if records.is_empty() {
                println!("Identity: (not initialized)");
            }
            for record in records {
                println!("Identity:");
                println!("  User ID: {}", record.user_id);
                println!("  Public key: {}", record.public_identity.to_base58());
                println!("  Wrapped with: {}", record.wrapped.method());
                println!("  Created: {}", format_time(record.created_at));
            }
            println!();
            println!("Data directory: {}", data_dir.display());
            println!("Board: {}", node.board_path.display());
        }

        Commands::Contact { action } => {
            let session = node.login(password).await?;
            match action {
                ContactAction::Add { public_key, name } => {
                    let public = PublicIdentity::from_base58(&public_key)
                        .map_err(|e| anyhow::anyhow!("Invalid public key: {}", e))?;
                    let contact = session.add_contact(public, name)?;
                    println!("Added contact: {}", contact.display_name());
                    println!("  User ID: {}", contact.user_id);
                }
                ContactAction::List => {
                    let contacts = session.list_contacts()?;
                    if contacts.is_empty() {
                        println!("No contacts.");
                    } else {
                        println!("Contacts ({}):", contacts.len());
                        println!();
                        for contact in contacts {
                            let status = session.peer_session_status(&contact.user_id)?;
                            println!("  {} {} [{:?}]", contact.user_id, contact.display_name(), status);
                        }
                    }
                }
            }
            node.finish(session).await?;
        }

        Commands::Discussion { action } => {
            let session = node.login(password).await?;
            match action {
                DiscussionAction::Start { contact } => {
                    let contact = parse_user_id(&contact)?;
                    let discussion = session.initialize_discussion(&contact).await?;
                    println!("Announced to {}", contact.short());
                    println!("  Status: {:?}", discussion.status);
                }
                DiscussionAction::List => {
                    let discussions = session.list_discussions()?;
                    if discussions.is_empty() {
                        println!("No discussions.");
                    } else {
                        println!("Discussions ({}):", discussions.len());
                        println!();
                        for discussion in discussions {
                            let preview = discussion
                                .last_message
                                .as_ref()
                                .map(|m| m.content.clone())
                                .unwrap_or_default();
                            println!("  {} [{:?}] {}", discussion.contact, discussion.status, preview);
                        }
                    }
                }
                DiscussionAction::Show { contact } => {
                    let contact = parse_user_id(&contact)?;
                    let id = DiscussionId::new(session.user_id(), &contact);
                    let messages = session.list_messages(&id)?;
                    if messages.is_empty() {
                        println!("No messages.");
                    }
                    for message in messages {
                        let arrow = match message.direction {
                            whisperboard_core::Direction::Incoming => "<-",
                            whisperboard_core::Direction::Outgoing => "->",
                        };
                        println!("  {} {} {}", format_time(message.timestamp), arrow, message.content);
                    }
                }
                DiscussionAction::Reset { contact } => {
                    let contact = parse_user_id(&contact)?;
                    session.reset_discussion(&contact).await?;
                    println!("Closed discussion with {}", contact.short());
                }
            }
            node.finish(session).await?;
        }

        Commands::Send { contact, text } => {
            let session = node.login(password).await?;
            let contact = parse_user_id(&contact)?;
            // Pick up the peer's reply announcement first
            session.trigger_sync_and_wait().await?;
            let message = session.send_message(&contact, &text).await?;
            println!("Sent message #{} to {}", message.index, contact.short());
            node.finish(session).await?;
        }

        Commands::Sync => {
            let session = node.login(password).await?;
            let report = session.trigger_sync_and_wait().await?;
            print_report(&report);
            node.finish(session).await?;
        }

        Commands::Backup { action } => {
            let session = node.login(password).await?;
            let rendered = match action {
                BackupAction::Mnemonic => session.show_mnemonic_backup(password).await?,
                BackupAction::PrivateKey => session.show_private_key(password).await?,
            };
            println!("{}", rendered.as_str());
            node.finish(session).await?;
        }

        // Runs before the store is opened
        Commands::Demo => {}
    }

    Ok(())
}

async fn run_demo(config: CoreConfig) -> Result<()> {
    let root = std::env::temp_dir().join(format!("whisperboard-demo-{}", std::process::id()));
    let board = Arc::new(MemoryBoard::new());
    let credential = Credential::password("demo");

    let alice_app = Messenger::new(Storage::new(root.join("alice.redb"))?, board.clone(), config.clone())?;
    let bob_app = Messenger::new(Storage::new(root.join("bob.redb"))?, board.clone(), config)?;

    let alice_id = alice_app.create_account(&credential).await?.user_id;
    let bob_record = bob_app.create_account(&credential).await?;
    let alice = alice_app.login(&alice_id, &credential).await?;
    let bob = bob_app.login(&bob_record.user_id, &credential).await?;

    println!("alice: {}", alice.user_id());
    println!("bob:   {}", bob.user_id());
    println!();

    alice.add_contact(bob_record.public_identity.clone(), Some("bob".to_string()))?;
    alice.initialize_discussion(bob.user_id()).await?;
    println!("alice announced to bob");

    let report = bob.trigger_sync_and_wait().await?;
    println!("bob synced: {} handshake(s)", report.handshakes_completed);
    let report = alice.trigger_sync_and_wait().await?;
    println!("alice synced: {} handshake(s)", report.handshakes_completed);
    println!(
        "session: alice sees {:?}, bob sees {:?}",
        alice.peer_session_status(bob.user_id())?,
        bob.peer_session_status(alice.user_id())?
    );
    if alice.peer_session_status(bob.user_id())? != PeerSessionStatus::Established {
        anyhow::bail!("Handshake did not complete");
    }
    println!();

    alice.send_message(bob.user_id(), "hello bob").await?;
    let report = bob.trigger_sync_and_wait().await?;
    println!("bob received {} message(s)", report.new_messages);

    bob.send_message(alice.user_id(), "hi alice").await?;
    let report = alice.trigger_sync_and_wait().await?;
    println!("alice received {} message(s)", report.new_messages);
    println!();

    let id = DiscussionId::new(alice.user_id(), bob.user_id());
    for message in alice.list_messages(&id)? {
        let (from, to) = match message.direction {
            whisperboard_core::Direction::Outgoing => ("alice", "bob"),
            whisperboard_core::Direction::Incoming => ("bob", "alice"),
        };
        println!("{} -> {}: {}", from, to, message.content);
    }
    println!();
    println!("board entries: {}", board.len());

    alice.logout().await;
    bob.logout().await;
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}
