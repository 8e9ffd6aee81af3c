//! Cooperative cancellation.
//!
//! A hierarchy of tokens: one per dataflow, one child token per node, so that
//! cancelling a node cancels its descendants ("cancel propagates top-down
//! through the ancestor path") without re-deriving the whole ancestor chain at
//! cancel time: cancelling a tokio [`CancellationToken`] already cancels every
//! child token spawned from it.

use tokio_util::sync::CancellationToken;

/// One cancellation scope for an entire dataflow.
#[derive(Debug, Clone)]
pub struct DataflowCancellation {
    token: CancellationToken,
}

impl DataflowCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A child token for one node; canceling the dataflow token cancels this
    /// too, and canceling this token alone only affects this node's subtree.
    pub fn node_token(&self) -> NodeCancellation {
        NodeCancellation {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn canceled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for DataflowCancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// One cancellation scope for a single node (and, transitively, its clones'
/// descendants if it yields to child iterations).
#[derive(Debug, Clone)]
pub struct NodeCancellation {
    token: CancellationToken,
}

impl NodeCancellation {
    /// A further child scope, e.g. one per map-reduce iteration clone.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn canceled(&self) {
        self.token.cancelled().await;
    }

    /// The raw token, for handing to code (e.g. a [`NodeFunction`]) that
    /// speaks `tokio_util::sync::CancellationToken` directly rather than
    /// this crate's wrapper.
    pub fn raw_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
