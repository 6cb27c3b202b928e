//! Operation journal.
//!
//! Feedback events carry no timestamp; this consumer stamps each one with the
//! local time and appends it to a plain-text file:
//!
//! ```text
//! [2022-07-04 13:05:09] - Starting new collection process.
//! ```

use crate::error::AppResult;
use crate::events::CollectionEvent;
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Appends timestamped feedback lines to a file.
#[derive(Debug, Clone)]
pub struct FeedbackJournal {
    path: PathBuf,
}

impl FeedbackJournal {
    /// Journal writing to `path`; the file is created on first use.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `[YYYY-MM-DD HH:MM:SS] - message`
    pub fn format_line(at: NaiveDateTime, message: &str) -> String {
        format!("[{}] - {}", at.format("%Y-%m-%d %H:%M:%S"), message)
    }

    /// Consumes `events` until the bus closes, appending every feedback line.
    pub fn spawn(self, events: broadcast::Receiver<CollectionEvent>) -> JoinHandle<AppResult<()>> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, mut events: broadcast::Receiver<CollectionEvent>) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        debug!("feedback journal at {}", self.path.display());

        loop {
            match events.recv().await {
                Ok(CollectionEvent::Feedback { message }) => {
                    let line = Self::format_line(Local::now().naive_local(), &message);
                    file.write_all(line.as_bytes()).await?;
                    file.write_all(b"\n").await?;
                    file.flush().await?;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("feedback journal dropped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use chrono::NaiveDate;

    #[test]
    fn test_line_format() {
        let at = NaiveDate::from_ymd_opt(2022, 7, 4)
            .and_then(|d| d.and_hms_opt(13, 5, 9))
            .unwrap();
        assert_eq!(
            FeedbackJournal::format_line(at, "Starting new collection process."),
            "[2022-07-04 13:05:09] - Starting new collection process."
        );
    }

    #[tokio::test]
    async fn test_journal_appends_feedback_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("operation.log");
        let bus = EventBus::default();
        let task = FeedbackJournal::new(&path).spawn(bus.subscribe());

        bus.feedback("first");
        bus.progress(1, Some(2));
        bus.feedback("second");
        drop(bus);
        task.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] - first"));
        assert!(lines[1].ends_with("] - second"));
        assert!(lines[0].starts_with('['));
    }
}
