//! Deferred message storage and replay
//!
//! When the broker cannot take a re-queued message it is written here, one
//! file per message, and published again once the broker connection is back
//! (or on the replay interval). A file is removed only after the broker
//! confirmed the publish.

use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::journal::ErrorJournal;
use crate::error::{Error, Result};
use crate::queue::{MessagePublisher, SweepRequest};
use crate::sweep::Step;

pub struct DeferredStore {
    dir: PathBuf,
    /// One replay pass at a time, so a file is never published twice
    replaying: Mutex<()>,
}

/// Outcome of one replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub failed: usize,
}

impl DeferredStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            replaying: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", self.dir.display(), e)))
    }

    /// Persist one message body under a fresh unique name
    pub async fn store(&self, body: &[u8]) -> Result<PathBuf> {
        self.ensure_dir().await?;
        let name = format!(
            "{}-{}.json",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);

        // Write then rename so replay never sees a half-written file
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::Storage(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("cannot rename {}: {}", tmp.display(), e)))?;

        debug!(path = %path.display(), "Stored deferred message");
        Ok(path)
    }

    /// Deferred files, oldest first
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Publish every deferred message, deleting each file only after its
    /// publish succeeded
    pub async fn replay(&self, publisher: &dyn MessagePublisher, journal: &ErrorJournal) -> ReplaySummary {
        let _pass = self.replaying.lock().await;
        let files = match self.list().await {
            Ok(files) => files,
            Err(e) => {
                error!(step = %Step::Replay, "Cannot list deferred messages: {}", e);
                journal.record(Step::Replay, &e, None).await;
                return ReplaySummary::default();
            }
        };

        if files.is_empty() {
            return ReplaySummary::default();
        }
        info!(count = files.len(), dir = %self.dir.display(), "Replaying deferred messages");

        let mut summary = ReplaySummary::default();
        for path in files {
            match self.replay_file(&path, publisher).await {
                Ok(()) => summary.replayed += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(step = %Step::Replay, file = %path.display(), "Not resent: {}", e);
                    journal
                        .record(Step::Replay, format!("{}: {}", path.display(), e), None)
                        .await;
                }
            }
        }

        info!(replayed = summary.replayed, failed = summary.failed, "Deferred replay finished");
        summary
    }

    async fn replay_file(&self, path: &Path, publisher: &dyn MessagePublisher) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        // Only well-formed requests go back on the queue
        let request = SweepRequest::decode(&body)?;
        publisher.publish(&body).await?;
        tokio::fs::remove_file(path).await?;
        debug!(address = %request.address, token = %request.token, "Deferred message resent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePublisher;
    use tempfile::tempdir;

    async fn store_requests(store: &DeferredStore, addresses: &[&str]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for address in addresses {
            let body = SweepRequest::new(*address, "USDT").to_payload().unwrap();
            paths.push(store.store(&body).await.unwrap());
        }
        paths
    }

    #[tokio::test]
    async fn test_store_creates_unique_files() {
        let dir = tempdir().unwrap();
        let store = DeferredStore::new(dir.path().join("not_resend"));

        let paths = store_requests(&store, &["TA", "TA", "TA"]).await;

        assert_eq!(store.list().await.unwrap().len(), 3);
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
    }

    #[tokio::test]
    async fn test_replay_deletes_only_published_files() {
        let dir = tempdir().unwrap();
        let store = DeferredStore::new(dir.path().join("not_resend"));
        let journal = ErrorJournal::new(dir.path().join("errors.jsonl"));
        let paths = store_requests(&store, &["TA", "TB", "TC"]).await;

        let publisher = FakePublisher::failing_on("TB");
        let summary = store.replay(&publisher, &journal).await;

        assert_eq!(summary, ReplaySummary { replayed: 2, failed: 1 });
        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert!(!paths[2].exists());
        assert_eq!(publisher.published().len(), 2);
        assert_eq!(journal.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_every_file() {
        let dir = tempdir().unwrap();
        let store = DeferredStore::new(dir.path().join("not_resend"));
        let journal = ErrorJournal::new(dir.path().join("errors.jsonl"));
        let paths = store_requests(&store, &["TA", "TB"]).await;

        let summary = store.replay(&FakePublisher::failing(), &journal).await;

        assert_eq!(summary.replayed, 0);
        assert_eq!(summary.failed, 2);
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_left_in_place() {
        let dir = tempdir().unwrap();
        let store = DeferredStore::new(dir.path().join("not_resend"));
        let journal = ErrorJournal::new(dir.path().join("errors.jsonl"));
        let bad = store.store(b"{\"foo\": 1}").await.unwrap();
        let good = store_requests(&store, &["TA"]).await;

        let publisher = FakePublisher::default();
        let summary = store.replay(&publisher, &journal).await;

        assert_eq!(summary, ReplaySummary { replayed: 1, failed: 1 });
        assert!(bad.exists());
        assert!(!good[0].exists());
    }

    #[tokio::test]
    async fn test_overlapping_replays_publish_each_file_once() {
        let dir = tempdir().unwrap();
        let store = DeferredStore::new(dir.path().join("not_resend"));
        let journal = ErrorJournal::new(dir.path().join("errors.jsonl"));
        store_requests(&store, &["TA", "TB"]).await;
        let publisher = FakePublisher::default();

        let (first, second) = tokio::join!(
            store.replay(&publisher, &journal),
            store.replay(&publisher, &journal)
        );

        assert_eq!(first.replayed + second.replayed, 2);
        assert_eq!(first.failed + second.failed, 0);
        assert_eq!(publisher.published().len(), 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dir_replays_nothing() {
        let dir = tempdir().unwrap();
        let store = DeferredStore::new(dir.path().join("absent"));
        let journal = ErrorJournal::new(dir.path().join("errors.jsonl"));

        let summary = store.replay(&FakePublisher::default(), &journal).await;
        assert_eq!(summary, ReplaySummary::default());
    }
}
