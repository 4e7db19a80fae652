//! Queued, fire-and-forget persistence writes

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::records::MatchProgress;
use super::Store;

/// A write the simulation does not wait for
#[derive(Debug, Clone)]
pub enum WriteJob {
    Progress(MatchProgress),
}

/// Handle for queueing writes; cheap to clone
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl StoreWriter {
    /// A writer whose jobs land on the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WriteJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Spawn a task that applies queued jobs to `store` in order
    pub fn spawn<S: Store>(store: Arc<S>) -> Self {
        let (writer, mut rx) = Self::channel();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                apply(store.as_ref(), job).await;
            }
            debug!("Store writer stopped");
        });

        writer
    }

    pub fn submit(&self, job: WriteJob) {
        if self.tx.send(job).is_err() {
            warn!("Store writer is gone, dropping write");
        }
    }
}

async fn apply<S: Store>(store: &S, job: WriteJob) {
    match job {
        WriteJob::Progress(progress) => {
            if let Err(e) = store.update_match_progress(&progress).await {
                // the next persistence pass supersedes this one
                warn!(match_id = %progress.match_id, error = %e, "Failed to persist match progress");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MatchRecord, MatchStatus, MemoryStore};
    use uuid::Uuid;

    #[tokio::test]
    async fn queued_progress_reaches_the_store() {
        let store = Arc::new(MemoryStore::new());
        let record = MatchRecord::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None);
        store.insert_match(&record).await.unwrap();

        let writer = StoreWriter::spawn(store.clone());
        writer.submit(WriteJob::Progress(MatchProgress {
            match_id: record.id,
            player1_score: 1,
            player2_score: 0,
            rounds_completed: 1,
            status: MatchStatus::InProgress,
        }));

        for _ in 0..50 {
            let stored = store.get_match(record.id).await.unwrap().unwrap();
            if stored.player1_score == 1 {
                assert_eq!(stored.status, MatchStatus::InProgress);
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("progress was never written");
    }
}
