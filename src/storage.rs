use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, field};

use crate::{model::CollectionEnvelope, timestamp::Timestamp};

#[derive(Error, Debug)]
pub enum Error {
    #[error("error creating directory {1}: {0}")]
    CreateDir(#[source] io::Error, PathBuf),

    #[error("error serializing envelope: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("error writing file {1}: {0}")]
    Write(#[source] io::Error, PathBuf),
}

/// Date/time partitioned JSON store: `{root}/{city}/{YYYY-MM-DD}/{HH-MM-SS}.json`,
/// with date and time taken in UTC.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Two polls of one city within the same second share a path; the later
    /// one wins. Local wall-clock time repeats an hour each autumn, UTC does not.
    pub fn partition_path(&self, city: &str, timestamp: &Timestamp) -> PathBuf {
        let utc = timestamp.with_timezone(&Utc);

        let mut path = self.root.join(city);
        path.push(utc.format("%Y-%m-%d").to_string());
        path.push(format!("{}.json", utc.format("%H-%M-%S")));
        path
    }

    pub fn persist(&self, envelope: &CollectionEnvelope) -> Result<PathBuf, Error> {
        let path = self.partition_path(&envelope.city, &envelope.timestamp);

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| Error::CreateDir(e, dir.to_path_buf()))?;
        }

        let content = serde_json::to_string_pretty(envelope).map_err(Error::Serialize)?;
        std::fs::write(&path, content).map_err(|e| Error::Write(e, path.clone()))?;

        debug!(
            path = field::display(path.display()),
            success = envelope.is_success(),
            "envelope written"
        );

        Ok(path)
    }
}
