//! Artifact Gate
//!
//! No job is admitted unless the circuit artifacts exist on local
//! storage. Missing artifacts trigger the fetch collaborator, behind
//! a single-flight lock so concurrent submissions cannot start
//! duplicate downloads: the second caller waits for the first fetch
//! and then re-checks.

use async_trait::async_trait;
use proof_engine::{ArtifactPaths, REQUIRED_ARTIFACTS};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Errors that keep the gate closed.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact fetch failed for {name}: {reason}")]
    Fetch { name: String, reason: String },

    #[error("artifact {0} still missing after fetch")]
    StillMissing(String),

    #[error("artifacts missing and no artifact source configured: {0:?}")]
    NoSource(Vec<String>),
}

/// The external collaborator that materializes missing artifacts.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, dir: &Path, names: &[String]) -> Result<(), ArtifactError>;
}

/// Downloads artifacts from `<base_url>/<name>`.
pub struct HttpArtifactFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, dir: &Path, names: &[String]) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ArtifactError::Fetch {
                name: dir.display().to_string(),
                reason: e.to_string(),
            })?;

        for name in names {
            let url = format!("{}/{}", self.base_url.trim_end_matches('/'), name);
            info!("Fetching artifact {}", url);

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ArtifactError::Fetch {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            if !response.status().is_success() {
                return Err(ArtifactError::Fetch {
                    name: name.clone(),
                    reason: format!("server returned {}", response.status()),
                });
            }

            let bytes = response.bytes().await.map_err(|e| ArtifactError::Fetch {
                name: name.clone(),
                reason: e.to_string(),
            })?;

            tokio::fs::write(dir.join(name), &bytes)
                .await
                .map_err(|e| ArtifactError::Fetch {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            info!("Fetched artifact {} ({} bytes)", name, bytes.len());
        }
        Ok(())
    }
}

/// Gate over the artifact directory. Cheap no-op when everything is
/// already present.
pub struct ArtifactGate {
    paths: ArtifactPaths,
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    fetch_lock: Mutex<()>,
}

impl ArtifactGate {
    pub fn new(paths: ArtifactPaths, fetcher: Option<Arc<dyn ArtifactFetcher>>) -> Self {
        Self {
            paths,
            fetcher,
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    fn missing(&self) -> Vec<String> {
        REQUIRED_ARTIFACTS
            .iter()
            .filter(|name| !self.paths.dir().join(name).is_file())
            .map(|name| name.to_string())
            .collect()
    }

    /// Verify all required artifacts exist, fetching any that are
    /// absent. Safe to call concurrently; only one fetch runs at a
    /// time and later callers observe its result.
    pub async fn ensure_ready(&self) -> Result<(), ArtifactError> {
        if self.missing().is_empty() {
            return Ok(());
        }

        let _guard = self.fetch_lock.lock().await;

        // Re-check under the lock: a racing caller may have fetched.
        let missing = self.missing();
        if missing.is_empty() {
            return Ok(());
        }

        let Some(fetcher) = &self.fetcher else {
            return Err(ArtifactError::NoSource(missing));
        };

        warn!("Artifacts missing, fetching: {:?}", missing);
        fetcher.fetch(self.paths.dir(), &missing).await?;

        if let Some(name) = self.missing().into_iter().next() {
            return Err(ArtifactError::StillMissing(name));
        }

        info!("All artifacts present in {:?}", self.paths.dir());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write_all(dir: &Path) {
        for name in REQUIRED_ARTIFACTS {
            std::fs::write(dir.join(name), b"artifact").unwrap();
        }
    }

    /// Fetcher that counts invocations and writes the requested files.
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactFetcher for CountingFetcher {
        async fn fetch(&self, dir: &Path, names: &[String]) -> Result<(), ArtifactError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Simulate a slow download so concurrent callers overlap.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            for name in names {
                std::fs::write(dir.join(name), b"fetched").unwrap();
            }
            Ok(())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl ArtifactFetcher for FailingFetcher {
        async fn fetch(&self, _dir: &Path, names: &[String]) -> Result<(), ArtifactError> {
            Err(ArtifactError::Fetch {
                name: names[0].clone(),
                reason: "unreachable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_present_artifacts_pass_without_fetch() {
        let dir = tempfile::tempdir().unwrap();
        write_all(dir.path());

        let gate = ArtifactGate::new(ArtifactPaths::new(dir.path()), None);
        assert!(gate.ensure_ready().await.is_ok());
        // Idempotent
        assert!(gate.ensure_ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_artifacts_are_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });

        let gate = ArtifactGate::new(ArtifactPaths::new(dir.path()), Some(fetcher.clone()));
        assert!(gate.ensure_ready().await.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Second call is a cheap no-op.
        assert!(gate.ensure_ready().await.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let gate = Arc::new(ArtifactGate::new(
            ArtifactPaths::new(dir.path()),
            Some(fetcher.clone()),
        ));

        let (a, b) = tokio::join!(gate.ensure_ready(), gate.ensure_ready());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_gate_closed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ArtifactGate::new(ArtifactPaths::new(dir.path()), Some(Arc::new(FailingFetcher)));

        assert!(matches!(
            gate.ensure_ready().await,
            Err(ArtifactError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_fetcher_configured_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ArtifactGate::new(ArtifactPaths::new(dir.path()), None);

        match gate.ensure_ready().await {
            Err(ArtifactError::NoSource(missing)) => assert_eq!(missing.len(), 3),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
