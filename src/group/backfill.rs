//! Backfill Sources
//!
//! A backfill produces the value for a key that no cache holds. It only ever
//! runs on the node that owns the key, once per concurrent miss.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, instrument};

/// Why a backfill produced no value
#[derive(Error, Debug)]
pub enum BackfillError {
    /// The source has no value for this key
    #[error("key not found in source")]
    NotFound,

    /// The source failed
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl BackfillError {
    pub fn other(e: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        BackfillError::Other(e.into())
    }
}

/// Producer of values for missing keys
#[async_trait]
pub trait Backfill: Send + Sync {
    async fn fetch(&self, key: &str) -> std::result::Result<Bytes, BackfillError>;
}

// =============================================================================
// Closure Backfill
// =============================================================================

/// [`Backfill`] from an async closure
///
/// ```ignore
/// let backfill = FnBackfill::new(|key: String| async move {
///     db.lookup(&key).await.ok_or(BackfillError::NotFound)
/// });
/// ```
pub struct FnBackfill<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnBackfill<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Bytes, BackfillError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Backfill for FnBackfill<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Bytes, BackfillError>> + Send,
{
    async fn fetch(&self, key: &str) -> std::result::Result<Bytes, BackfillError> {
        (self.f)(key.to_string()).await
    }
}

// =============================================================================
// Static Backfill
// =============================================================================

/// Fixed key/value table
#[derive(Debug, Clone, Default)]
pub struct MapBackfill {
    values: HashMap<String, Bytes>,
}

impl MapBackfill {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl Backfill for MapBackfill {
    async fn fetch(&self, key: &str) -> std::result::Result<Bytes, BackfillError> {
        self.values.get(key).cloned().ok_or(BackfillError::NotFound)
    }
}

// =============================================================================
// Directory Backfill
// =============================================================================

/// Serves `root/{key}` file contents
///
/// Keys may contain `/` to reach subdirectories but never leave `root`.
#[derive(Debug, Clone)]
pub struct DirBackfill {
    root: PathBuf,
}

impl DirBackfill {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for `key`, or `None` if the key would escape `root`
    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl Backfill for DirBackfill {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn fetch(&self, key: &str) -> std::result::Result<Bytes, BackfillError> {
        let Some(path) = self.path_for(key) else {
            debug!("Rejected key outside backfill root");
            return Err(BackfillError::NotFound);
        };

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackfillError::NotFound),
            Err(e) => Err(BackfillError::other(e)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_fn_backfill() {
        let backfill = FnBackfill::new(|key: String| async move {
            if key == "1" {
                Ok(Bytes::from_static(b"alice"))
            } else {
                Err(BackfillError::NotFound)
            }
        });

        assert_eq!(backfill.fetch("1").await.unwrap(), Bytes::from_static(b"alice"));
        assert_matches!(backfill.fetch("2").await, Err(BackfillError::NotFound));
    }

    #[tokio::test]
    async fn test_map_backfill() {
        let backfill = MapBackfill::new([("1", "alice"), ("2", "bob")]);
        assert_eq!(backfill.fetch("2").await.unwrap(), Bytes::from_static(b"bob"));
        assert_matches!(backfill.fetch("3").await, Err(BackfillError::NotFound));
    }

    #[tokio::test]
    async fn test_dir_backfill() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("bob"), b"world").unwrap();

        let backfill = DirBackfill::new(dir.path());
        assert_eq!(backfill.fetch("alice").await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(backfill.fetch("nested/bob").await.unwrap(), Bytes::from_static(b"world"));
        assert_matches!(backfill.fetch("carol").await, Err(BackfillError::NotFound));
    }

    #[test]
    fn test_dir_backfill_stays_in_root() {
        let backfill = DirBackfill::new("/srv/data");
        assert!(backfill.path_for("a/b").is_some());
        assert!(backfill.path_for("").is_none());
        assert!(backfill.path_for("../etc/passwd").is_none());
        assert!(backfill.path_for("/etc/passwd").is_none());
        assert!(backfill.path_for("a/../../b").is_none());
    }

    #[test]
    fn test_other_error_display() {
        let e = BackfillError::other("database unavailable");
        assert_eq!(e.to_string(), "database unavailable");
    }
}
