//! # Block document schema
//!
//! Canonical shape of a block document as it is stored in the CRDT:
//!
//! ```text
//! meta.page_id ──► page block
//! blocks[id]        ──► map { id, ty, parent, children, external_id, data }
//! children_map[cid] ──► ordered block ids
//! text_map[tid]     ──► rich text (InlineRun*)
//! ```
//!
//! Block records refer to their children collection and text sequence by id
//! rather than holding them inline, so either side can be looked up or
//! rebuilt on its own.

pub mod block;
pub mod error;
pub mod ids;
pub mod inline;
pub mod record;

pub use block::*;
pub use error::*;
pub use ids::*;
pub use inline::*;
pub use record::*;
