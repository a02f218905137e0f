use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use web3scout_common::{IdentityKey, ProjectRecord, ProjectRow, SinkError};

use crate::traits::ProjectSink;

/// Append-only JSON-lines file, one `ProjectRow` per line.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All parseable rows. A missing file is an empty store.
    pub async fn rows(&self) -> Result<Vec<ProjectRow>, SinkError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SinkError::write(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };

        let mut rows = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ProjectRow>(line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = n + 1,
                    error = %e,
                    "Skipping unreadable row"
                ),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl ProjectSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn existing_keys(&self) -> Result<HashSet<IdentityKey>, SinkError> {
        let rows = self.rows().await?;
        Ok(rows.iter().filter_map(ProjectRow::identity_key).collect())
    }

    async fn append(&self, records: &[ProjectRecord]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(&record.to_row())
                .map_err(|e| SinkError::write(format!("serializing {}: {e}", record.name())))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::write(format!("creating {}: {e}", parent.display())))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::write(format!("opening {}: {e}", self.path.display())))?;

        let len_before = file
            .metadata()
            .await
            .map_err(|e| SinkError::write(format!("reading {}: {e}", self.path.display())))?
            .len();

        write_all_or_rollback(&mut file, buf.as_bytes(), len_before)
            .await
            .map_err(|e| SinkError::write(format!("writing {}: {e}", self.path.display())))?;

        info!(path = %self.path.display(), rows = records.len(), "Rows appended");
        Ok(records.len())
    }

    async fn count(&self) -> Result<usize, SinkError> {
        Ok(self.rows().await?.len())
    }
}

/// A writer that can be cut back to an earlier length.
#[async_trait]
trait Truncate: AsyncWrite + Unpin + Send {
    async fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

#[async_trait]
impl Truncate for tokio::fs::File {
    async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len).await
    }
}

/// Write and flush `buf`, or leave the target at `len_before`.
async fn write_all_or_rollback<W: Truncate>(
    out: &mut W,
    buf: &[u8],
    len_before: u64,
) -> std::io::Result<()> {
    let written = async {
        out.write_all(buf).await?;
        out.flush().await
    }
    .await;

    if let Err(e) = written {
        if let Err(rollback) = out.truncate(len_before).await {
            warn!(error = %rollback, len_before, "Could not roll back partial append");
        }
        return Err(e);
    }
    Ok(())
}
