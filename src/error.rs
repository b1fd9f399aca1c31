//! Error taxonomy for the rewrite engine.
//!
//! Only structural problems are errors. An unresolved type is a regular
//! [`ResolvedType::Unknown`](crate::ir::types::ResolvedType::Unknown) value and
//! a pass bound being hit is reported through
//! [`PassOutcome::BoundExceeded`](crate::ir::pipeline::PassOutcome).

use thiserror::Error;

use crate::ir::node::NodeId;

/// Errors raised while mutating or traversing a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    /// A rule tried to replace or detach a node that is not where it thought.
    /// Recovered locally: the rule's application is abandoned for that node.
    #[error("invalid mutation on node {node}: {reason}")]
    InvalidMutation { node: NodeId, reason: String },

    /// A node kept changing after being re-visited `bound` times in one pass.
    /// Fatal for the tree-run.
    #[error("rule '{rule}' keeps rewriting node {node} (re-visit bound {bound} exceeded)")]
    RuntimeLoopDetected {
        node: NodeId,
        rule: String,
        bound: u32,
    },

    /// The tree no longer satisfies its structural invariants.
    #[error("tree invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unknown rule '{0}'")]
    UnknownRule(String),

    #[error("rule dependency cycle involving '{0}'")]
    RuleCycle(String),

    #[error("malformed tree document: {0}")]
    Document(String),
}

impl RewriteError {
    pub(crate) fn invalid_mutation(node: NodeId, reason: impl Into<String>) -> Self {
        RewriteError::InvalidMutation {
            node,
            reason: reason.into(),
        }
    }

    /// Whether this error aborts the whole tree-run rather than a single rule application.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RewriteError::InvalidMutation { .. })
    }
}

pub type Result<T> = std::result::Result<T, RewriteError>;
