//! Build-time error taxonomy.
//!
//! Structural problems are rejected when a tree is built; after a successful
//! build the execution engine assumes structural validity. Missing child
//! references cannot occur: the builder's node definitions own their
//! children, so a "null child" is unrepresentable.

use thiserror::Error;

/// Reasons a tree definition fails to build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The builder was finalized without a root node.
    #[error("behavior tree has no root node")]
    EmptyTree,

    /// A composite must hold at least one child to traverse.
    #[error("composite node `{name}` has no children")]
    NoChildren { name: String },

    /// A subtree reference with no matching registration.
    #[error("unknown external subtree `{0}`")]
    UnknownSubtree(String),

    /// An external subtree registered or attached more than once.
    #[error("conflicting attachment for external subtree `{0}`")]
    SubtreeConflict(String),

    /// A background build was dropped before publishing its result.
    #[error("background build was cancelled")]
    BuildCancelled,
}

pub type Result<T> = std::result::Result<T, BuildError>;
