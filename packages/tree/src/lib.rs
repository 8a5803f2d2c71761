//! # Local Tree Model
//!
//! The non-CRDT tree the rendering surface reads. Every element node mirrors
//! one block and always owns exactly one text run:
//!
//! ```text
//! page              path []
//! ├── (text run)    path [0]
//! ├── block a       path [1]
//! │   ├── (text)    path [1, 0]
//! │   └── block c   path [1, 1]
//! └── block b       path [2]
//! ```
//!
//! Segment 0 of every element is its text run, so the element child at
//! index `i` lives at segment `i + 1`.
//!
//! The tree only changes through [`TreeOp`]s applied with [`LocalTree::apply`].
//! [`RelationalIndex`] keeps block, text and children-collection lookups in
//! step with those edits.

pub mod error;
pub mod index;
pub mod node;
pub mod path;
pub mod snapshot;
pub mod tree;
pub mod visitor;

pub use error::*;
pub use index::*;
pub use node::*;
pub use path::*;
pub use snapshot::*;
pub use tree::*;
pub use visitor::*;
