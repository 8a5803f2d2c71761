//! # Blocksync Engine
//!
//! Keeps a local block tree in step with a collaboratively edited CRDT
//! document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ commands: user intent → CRDT operations     │
//! └─────────────────────────────────────────────┘
//!                     ↓  (one yrs transaction)
//! ┌─────────────────────────────────────────────┐
//! │ accessors: typed reads/writes on yrs        │◄── remote updates
//! └─────────────────────────────────────────────┘
//!                     ↓  (deep observers)
//! ┌─────────────────────────────────────────────┐
//! │ capture: change records, sealed per batch   │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ translator: batch → TreeOps on local tree   │
//! │  - deferral of child-before-parent inserts  │
//! │  - reconcile touched parents, resync signal │
//! └─────────────────────────────────────────────┘
//!                     ↓
//!              render hooks / snapshots
//! ```
//!
//! ## Core Principles
//!
//! 1. **CRDT is the source of truth**: the local tree is a derived mirror
//! 2. **One write path**: commands never touch the local tree; their echo does
//! 3. **Partial over total failure**: a bad record is skipped, not the batch
//! 4. **Bounded recovery**: reload a few times, then ask the caller to resync
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blocksync_engine::{Command, EngineConfig, SyncSession};
//!
//! let mut session = SyncSession::create("doc-1".into(), "Untitled", EngineConfig::default())?;
//! let page = session.page_id().clone();
//! let outcome = session.execute(&Command::InsertBlock {
//!     parent: page,
//!     index: 0,
//!     ty: BlockType::Paragraph,
//!     attributes: Default::default(),
//!     text: vec![InlineRun::plain("Hello world")],
//! })?;
//! session.execute(&Command::SplitBlock { block_id: outcome.block_id.unwrap(), offset: 5 })?;
//!
//! // Ship local edits, take remote ones
//! let mut outgoing = session.subscribe_outgoing();
//! session.inbox_sender().send(remote_update)?;
//! session.drain_inbox()?;
//! ```

pub mod accessors;
pub mod capture;
pub mod commands;
pub mod config;
pub mod error;
pub mod operations;
pub mod registry;
pub mod session;
pub mod translator;

pub use accessors::{CrdtDocument, DocumentView};
pub use capture::{ChangeBatch, ChangeRecord, EventCapture, ObjectPath};
pub use commands::{Command, CommandOutcome, CommandTranslator};
pub use config::EngineConfig;
pub use error::{Result, SyncError};
pub use operations::MergeDirection;
pub use registry::{DocReference, ReferenceKind, SessionRegistry};
pub use session::{HookId, RenderHook, SyncSession};
pub use translator::{BatchReport, BlockSource, EventTranslator, SkipReason, SkippedRecord, SyncSignal};

pub use blocksync_schema as schema;
pub use blocksync_tree as tree;
