//! JSONL logging for side-by-side identities
//!
//! Each process appends to its own file so two identities (say `alice` and
//! `bob`) driving the same board produce separable logs:
//!
//! ```text
//! logs/
//! └── raw/
//!     ├── 2026-10-17_alice.jsonl
//!     └── 2026-10-17_bob.jsonl
//! ```
//!
//! ```ignore
//! use whisperboard_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("./logs", "alice")
//!     .with_filter("whisperboard_core=debug")
//!     .init()?;
//! ```
//!
//! Merge both sides into one timeline with
//! `cat logs/raw/*.jsonl | jq -s 'sort_by(.ts)'`.

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_all_entries, InstanceLogWriter};
