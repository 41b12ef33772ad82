// Artifact Cache
// Durable per-archive store of node artifacts, failure markers and conclusions

use crate::cache::artifact::{Artifact, ArtifactStatus, ArtifactValue, Encoding};
use crate::conclusion::Conclusion;
use crate::error::{CacheError, ExecutionError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

const ARTIFACT_DIR: &str = "artifacts";
const ARTIFACT_EXT: &str = "artifact";
const CONCLUSIONS_FILE: &str = "conclusions.json";

/// First line of every artifact file
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Marker {
    Succeeded { node: String, encoding: Encoding },
    Failed { node: String, error: ExecutionError },
}

/// Per-archive artifact store
///
/// Each artifact is a single file written atomically (temporary file in the
/// same directory, then rename), so an interrupted write leaves either the old
/// artifact or none. The file starts with a one-line JSON marker followed by
/// the payload; failure markers have no payload.
///
/// The disk is the only copy. Readers of an archive share its lock, writers
/// hold it exclusively, so same-archive writes apply in order and a read never
/// interleaves with a write.
pub struct ArtifactCache {
    root: PathBuf,
    /// One lock per archive id
    locks: RwLock<HashMap<String, Arc<RwLock<()>>>>,
}

impl ArtifactCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything cached for one archive
    pub fn archive_dir(&self, archive: &str) -> PathBuf {
        self.root.join(encode_name(archive))
    }

    fn artifact_path(&self, archive: &str, node: &str) -> PathBuf {
        self.archive_dir(archive)
            .join(ARTIFACT_DIR)
            .join(format!("{}.{}", encode_name(node), ARTIFACT_EXT))
    }

    async fn archive_lock(&self, archive: &str) -> Arc<RwLock<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(archive) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.locks.write().await;
        Arc::clone(locks.entry(archive.to_string()).or_default())
    }

    /// Look up an artifact; `None` means the node was never attempted
    pub async fn get(&self, archive: &str, node: &str) -> Result<Option<Artifact>, CacheError> {
        let lock = self.archive_lock(archive).await;
        let _guard = lock.read().await;

        let path = self.artifact_path(archive, node);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let artifact = decode_artifact(&path, &data)?;
        if artifact.node != node {
            return Err(CacheError::corrupt(
                path.display().to_string(),
                format!("marker names node '{}'", artifact.node),
            ));
        }

        Ok(Some(artifact))
    }

    /// Store an artifact, replacing any previous one for the same node
    pub async fn put(&self, archive: &str, artifact: &Artifact) -> Result<(), CacheError> {
        let data = encode_artifact(artifact)?;

        let lock = self.archive_lock(archive).await;
        let _guard = lock.write().await;
        write_atomic(&self.artifact_path(archive, &artifact.node), &data)
    }

    /// Drop one node's artifact; returns whether anything was removed
    pub async fn invalidate(&self, archive: &str, node: &str) -> Result<bool, CacheError> {
        let lock = self.archive_lock(archive).await;
        let _guard = lock.write().await;

        match fs::remove_file(self.artifact_path(archive, node)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every artifact and the stored conclusions of an archive
    pub async fn clear(&self, archive: &str) -> Result<(), CacheError> {
        let lock = self.archive_lock(archive).await;
        let _guard = lock.write().await;

        match fs::remove_dir_all(self.archive_dir(archive)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of nodes with a successful artifact, sorted
    pub async fn list(&self, archive: &str) -> Result<Vec<String>, CacheError> {
        let lock = self.archive_lock(archive).await;
        let _guard = lock.read().await;

        let dir = self.archive_dir(archive).join(ARTIFACT_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            let data = fs::read(&path)?;
            if let Marker::Succeeded { node, .. } = read_marker(&path, &data)?.0 {
                names.push(node);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Persist the conclusion list of a completed run
    pub async fn put_conclusions(
        &self,
        archive: &str,
        conclusions: &[Conclusion],
    ) -> Result<(), CacheError> {
        let data = serde_json::to_vec_pretty(conclusions)?;

        let lock = self.archive_lock(archive).await;
        let _guard = lock.write().await;
        write_atomic(&self.archive_dir(archive).join(CONCLUSIONS_FILE), &data)
    }

    /// Conclusions of the last completed run, if any
    pub async fn get_conclusions(&self, archive: &str) -> Result<Option<Vec<Conclusion>>, CacheError> {
        let lock = self.archive_lock(archive).await;
        let _guard = lock.read().await;

        let path = self.archive_dir(archive).join(CONCLUSIONS_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| CacheError::corrupt(path.display().to_string(), e.to_string()))
    }
}

fn encode_artifact(artifact: &Artifact) -> Result<Vec<u8>, CacheError> {
    let (marker, payload) = match (&artifact.status, &artifact.value) {
        (ArtifactStatus::Succeeded, Some(value)) => (
            Marker::Succeeded {
                node: artifact.node.clone(),
                encoding: value.encoding(),
            },
            value.to_payload()?,
        ),
        (ArtifactStatus::Succeeded, None) => {
            return Err(CacheError::corrupt(
                artifact.node.clone(),
                "successful artifact without a value",
            ))
        }
        (ArtifactStatus::Failed(error), _) => (
            Marker::Failed {
                node: artifact.node.clone(),
                error: error.clone(),
            },
            Vec::new(),
        ),
    };

    let mut data = serde_json::to_vec(&marker)?;
    data.push(b'\n');
    data.extend_from_slice(&payload);
    Ok(data)
}

fn read_marker<'d>(path: &Path, data: &'d [u8]) -> Result<(Marker, &'d [u8]), CacheError> {
    let split = data
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| CacheError::corrupt(path.display().to_string(), "missing marker line"))?;

    let marker = serde_json::from_slice(&data[..split])
        .map_err(|e| CacheError::corrupt(path.display().to_string(), e.to_string()))?;

    Ok((marker, &data[split + 1..]))
}

fn decode_artifact(path: &Path, data: &[u8]) -> Result<Artifact, CacheError> {
    let (marker, payload) = read_marker(path, data)?;

    Ok(match marker {
        Marker::Succeeded { node, encoding } => {
            let value = ArtifactValue::from_payload(encoding, payload)
                .map_err(|e| CacheError::corrupt(path.display().to_string(), e.to_string()))?;
            Artifact::succeeded(node, value)
        }
        Marker::Failed { node, error } => Artifact::failed(node, error),
    })
}

/// Write through a temporary file in the target directory, then rename over the target
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let dir = path
        .parent()
        .ok_or_else(|| CacheError::corrupt(path.display().to_string(), "no parent directory"))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;

    Ok(())
}

/// Make a name safe as a single path component
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || (byte == b'.' && i > 0);
        if plain {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conclusion::Level;
    use serde_json::json;

    #[test]
    fn test_encode_name() {
        assert_eq!(encode_name("kernel-panic_1.x"), "kernel-panic_1.x");
        assert_eq!(encode_name("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_name(".."), "%2E.");
    }

    #[tokio::test]
    async fn test_put_get_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());

        let artifact = Artifact::succeeded("uname", ArtifactValue::Bytes(b"Linux\n".to_vec()));
        cache.put("sos-1", &artifact).await.unwrap();

        // A fresh instance reads the same entries
        let fresh = ArtifactCache::new(dir.path());
        assert_eq!(fresh.get("sos-1", "uname").await.unwrap(), Some(artifact));
        assert_eq!(fresh.get("sos-1", "other").await.unwrap(), None);
        assert_eq!(fresh.get("sos-2", "uname").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failure_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());

        let failed = Artifact::failed("a", ExecutionError::exec_failed("exit status 127"));
        cache.put("sos", &failed).await.unwrap();

        let loaded = ArtifactCache::new(dir.path())
            .get("sos", "a")
            .await
            .unwrap()
            .unwrap();
        assert!(!loaded.is_success());
        assert_eq!(loaded.error(), failed.error());
        assert!(cache.list("sos").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_invalidate_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());

        for name in ["b", "a/x"] {
            let artifact = Artifact::succeeded(name, ArtifactValue::Sequence(vec![json!(name)]));
            cache.put("sos", &artifact).await.unwrap();
        }
        assert_eq!(cache.list("sos").await.unwrap(), vec!["a/x", "b"]);

        assert!(cache.invalidate("sos", "b").await.unwrap());
        assert!(!cache.invalidate("sos", "b").await.unwrap());
        assert_eq!(cache.get("sos", "b").await.unwrap(), None);

        cache.clear("sos").await.unwrap();
        assert!(cache.list("sos").await.unwrap().is_empty());
        assert_eq!(cache.get("sos", "a/x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let path = cache.artifact_path("sos", "a");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not a marker").unwrap();

        let err = cache.get("sos", "a").await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_conclusions_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        assert_eq!(cache.get_conclusions("sos").await.unwrap(), None);

        let conclusions = vec![Conclusion::unknown("d", Level::Warning, "found a", "")];
        cache.put_conclusions("sos", &conclusions).await.unwrap();
        assert_eq!(
            cache.get_conclusions("sos").await.unwrap(),
            Some(conclusions)
        );
    }

    #[tokio::test]
    async fn test_get_reflects_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());

        let artifact = Artifact::succeeded("a", ArtifactValue::Bytes(b"old".to_vec()));
        cache.put("sos", &artifact).await.unwrap();
        assert!(cache.get("sos", "a").await.unwrap().is_some());

        fs::remove_file(cache.artifact_path("sos", "a")).unwrap();
        assert_eq!(cache.get("sos", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_interleaved_get_and_put_keep_last_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::new(dir.path()));
        let version = |n: usize| Artifact::succeeded("a", ArtifactValue::Bytes(n.to_string().into_bytes()));

        cache.put("sos", &version(0)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for n in 1..=20 {
            let reader = Arc::clone(&cache);
            tasks.spawn(async move {
                reader.get("sos", "a").await.unwrap();
            });
            let writer = Arc::clone(&cache);
            let artifact = version(n);
            tasks.spawn(async move {
                writer.put("sos", &artifact).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let last = version(99);
        cache.put("sos", &last).await.unwrap();
        for _ in 0..3 {
            cache.get("sos", "a").await.unwrap();
        }

        assert_eq!(cache.get("sos", "a").await.unwrap(), Some(last.clone()));
        assert_eq!(
            ArtifactCache::new(dir.path()).get("sos", "a").await.unwrap(),
            Some(last)
        );
    }
}
