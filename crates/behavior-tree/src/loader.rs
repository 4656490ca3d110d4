//! Background tree construction with single-publish hand-off.
//!
//! Building a large tree (flattening, table derivation, blackboard setup)
//! can be deferred off the tick thread. The result crosses back over a
//! oneshot channel, so a partially built tree is never observable: the tick
//! thread sees nothing until the finished tree is published in one piece.

use tokio::sync::oneshot;
use tokio::task;

use crate::builder::TreeBuilder;
use crate::error::{BuildError, Result};
use crate::tree::BehaviorTree;

/// Handle to a build running on the blocking thread pool.
pub struct TreeLoad {
    rx: oneshot::Receiver<Result<BehaviorTree>>,
}

/// Runs the builder off-thread. Must be called within a tokio runtime.
pub fn spawn_build(builder: TreeBuilder) -> TreeLoad {
    let (tx, rx) = oneshot::channel();
    task::spawn_blocking(move || {
        // The receiver may have been dropped; nothing to do then.
        let _ = tx.send(builder.build());
    });
    TreeLoad { rx }
}

impl TreeLoad {
    /// Non-blocking poll; `None` until the build has been published.
    ///
    /// The result is handed over exactly once. Polling again after it was
    /// taken reports [`BuildError::BuildCancelled`].
    pub fn try_take(&mut self) -> Option<Result<BehaviorTree>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(BuildError::BuildCancelled))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{task, TreeBuilder};
    use crate::status::Status;
    use crate::task::{FnTask, TickContext};
    use std::time::Duration;

    async fn finished(load: &mut TreeLoad) -> Result<BehaviorTree> {
        loop {
            if let Some(result) = load.try_take() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn background_build_publishes_once() {
        let builder = TreeBuilder::new()
            .root(task(FnTask(|_: &mut TickContext<'_>| Status::Success)));
        let mut load = spawn_build(builder);

        let mut tree = finished(&mut load).await.unwrap();
        assert_eq!(tree.len(), 1);
        tree.start();
        tree.begin_traversal();
        tree.update(0.0);
        assert_eq!(tree.last_status(), Some(Status::Success));

        // The channel hands over exactly one result.
        assert!(matches!(
            load.try_take(),
            Some(Err(BuildError::BuildCancelled))
        ));
    }

    #[tokio::test]
    async fn build_errors_cross_the_channel() {
        let mut load = spawn_build(TreeBuilder::new());
        let result = finished(&mut load).await;
        assert!(matches!(result, Err(BuildError::EmptyTree)));
    }
}
