use crate::config::SessionConfig;
use crate::model::Session;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File-backed bearer token store. Cloned handles share the same file; every
/// view receives one explicitly instead of reaching for global state.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: Arc<PathBuf>,
}

impl SessionStore {
    pub fn new(cfg: &SessionConfig) -> Self {
        Self::at(cfg.path.clone())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        SessionStore { path: Arc::new(path.into()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absent, unreadable or empty token files all read as "no session"
    pub async fn get(&self) -> Option<Session> {
        let data = match tokio::fs::read_to_string(&*self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("failed to read session file {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<Session>(&data) {
            Ok(session) if !session.token.is_empty() => Some(session),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("discarding malformed session file: {}", e);
                None
            }
        }
    }

    pub async fn set(&self, token: &str) -> Result<Session> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let session = Session { token: token.to_string() };
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec(&session)?).await?;
        tokio::fs::rename(&tmp_path, &*self.path).await?;
        tracing::info!("session stored at {}", self.path.display());
        Ok(session)
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&*self.path).await {
            Ok(()) => {
                tracing::info!("session cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_clear() -> Result<()> {
        let tmpdir = TempDir::new()?;
        let store = SessionStore::at(tmpdir.path().join("nested/session.json"));

        assert!(store.get().await.is_none());

        store.set("xyz").await?;
        assert_eq!(store.get().await, Some(Session { token: "xyz".into() }));

        // a second handle sees the same token
        let other = store.clone();
        assert_eq!(other.get().await.map(|s| s.token), Some("xyz".to_string()));

        store.clear().await?;
        assert!(store.get().await.is_none());
        // clearing twice is fine
        store.clear().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_file_reads_as_absent() -> Result<()> {
        let tmpdir = TempDir::new()?;
        let path = tmpdir.path().join("session.json");
        tokio::fs::write(&path, b"not json").await?;

        let store = SessionStore::at(&path);
        assert!(store.get().await.is_none());

        tokio::fs::write(&path, br#"{"token":""}"#).await?;
        assert!(store.get().await.is_none());
        Ok(())
    }
}
