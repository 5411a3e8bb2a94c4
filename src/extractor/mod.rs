mod ytdlp;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ExtractionError;

pub use ytdlp::YtDlp;

/// Where the media ended up after extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The source allows hotlinking; the client fetches the media itself.
    Direct {
        url: String,
        headers: Vec<(String, String)>,
        filename: String,
    },
    /// The media was downloaded into the request's job directory.
    LocalFile {
        path: PathBuf,
        content_type: &'static str,
        filename: String,
    },
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub cookies_file: Option<PathBuf>,
    pub job_dir: PathBuf,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn resolve(
        &self,
        url: &str,
        options: &ExtractOptions,
    ) -> Result<Extraction, ExtractionError>;
}

/// Per-request scratch directory. Dropping the guard removes the directory
/// and everything the extractor wrote into it. Inside a runtime the removal
/// runs on the blocking pool; outside one it happens inline.
#[derive(Debug)]
pub struct JobDir {
    path: PathBuf,
}

impl JobDir {
    pub async fn create(transfer_dir: &Path) -> std::io::Result<Self> {
        let path = transfer_dir.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobDir {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_job_dir(&path));
            }
            Err(_) => remove_job_dir(&path),
        }
    }
}

fn remove_job_dir(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!("Removed job directory {:?}", path),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!("Could not remove job directory {:?}: {error}", path),
    }
}

/// Removes job directories left by earlier runs (crash, kill -9) older than
/// `max_age`. Only entries named like a job id are touched.
pub async fn cleanup_stale_jobs(transfer_dir: &Path, max_age: std::time::Duration) {
    let mut entries = match tokio::fs::read_dir(transfer_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open transfer directory for cleanup: {error}");
            }
            return;
        }
    };

    let now = std::time::SystemTime::now();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate transfer directory for cleanup: {error}");
                break;
            }
        };

        let path = entry.path();
        let is_job = entry
            .file_name()
            .to_str()
            .is_some_and(|name| Uuid::parse_str(name).is_ok());
        if !is_job {
            continue;
        }

        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        let removal = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(error) = removal
            && error.kind() != ErrorKind::NotFound
        {
            warn!("Could not remove stale download {:?}: {error}", path);
        }
    }
}

/// Polls `check` for up to two seconds; job directories are removed on the
/// blocking pool, so tests wait for it instead of asserting right away.
#[cfg(test)]
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    check()
}
