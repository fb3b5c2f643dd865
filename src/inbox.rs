//! Turns files dropped into a directory into greeting requests.

use async_stream::stream;
use futures::Stream;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::messages::GreetingRequest;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("failed to create inbox {}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to list inbox {}", path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A polled directory. Every regular file in it is accepted once.
#[derive(Debug, Clone)]
pub struct Inbox {
    dir: PathBuf,
    poll_interval: Duration,
}

impl Inbox {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// One request per new file, named after the file's trimmed content.
    ///
    /// The directory is created if missing. Unreadable files are reported and
    /// skipped; the stream only ends if the directory cannot be created.
    pub fn requests(self) -> impl Stream<Item = Result<GreetingRequest, InboxError>> {
        stream! {
            match tokio::fs::create_dir_all(&self.dir).await {
                Err(source) => {
                    yield Err(InboxError::Create { path: self.dir.clone(), source });
                }
                Ok(()) => {
                    let mut seen = HashSet::new();
                    let mut ticker = tokio::time::interval(self.poll_interval);

                    loop {
                        ticker.tick().await;

                        let files = match new_files(&self.dir, &mut seen).await {
                            Ok(files) => files,
                            Err(e) => {
                                yield Err(e);
                                continue;
                            }
                        };

                        for path in files {
                            match tokio::fs::read_to_string(&path).await {
                                Ok(content) => {
                                    debug!(path = %path.display(), "Accepted inbox file");
                                    yield Ok(GreetingRequest::new(content.trim()));
                                }
                                Err(source) => yield Err(InboxError::Read { path, source }),
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Regular files in `dir` not seen before, in name order.
async fn new_files(dir: &Path, seen: &mut HashSet<PathBuf>) -> Result<Vec<PathBuf>, InboxError> {
    let list_error = |source| InboxError::List {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let path = entry.path();
        if is_file && seen.insert(path.clone()) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::timeout;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("inbox-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_each_file_is_accepted_once() {
        let dir = scratch_dir();
        let requests = Inbox::new(&dir, Duration::from_millis(20)).requests();
        let mut requests = std::pin::pin!(requests);

        // the first poll creates the directory
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("a.txt"), "  alice\n").await.unwrap();
        let first = timeout(Duration::from_secs(2), requests.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), GreetingRequest::new("alice"));

        tokio::fs::write(dir.join("b.txt"), "bob").await.unwrap();
        let second = timeout(Duration::from_secs(2), requests.next()).await.unwrap();
        assert_eq!(second.unwrap().unwrap(), GreetingRequest::new("bob"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_is_created() {
        let dir = scratch_dir();
        let requests = Inbox::new(&dir, Duration::from_millis(20)).requests();
        let mut requests = std::pin::pin!(requests);

        // nothing to read yet, but polling must have created the directory
        assert!(timeout(Duration::from_millis(100), requests.next()).await.is_err());
        assert!(dir.is_dir());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
