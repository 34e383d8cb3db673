use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::DataFile;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A blob store keyed by data file name. Only the known data files can be
/// addressed, so nothing else in the workspace ever leaves the machine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upload(&self, file: DataFile, content: &str) -> Result<(), InfraError>;

    /// `Ok(None)` when the remote has no copy of `file`.
    async fn download(&self, file: DataFile) -> Result<Option<String>, InfraError>;

    async fn probe(&self) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestRemoteStore {
    client: Client,
    base_url: Url,
}

#[derive(Debug, serde::Serialize)]
struct UploadRequest<'a> {
    filename: &'a str,
    content: &'a str,
}

impl ReqwestRemoteStore {
    pub fn new(base_url: &str) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid sync worker url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "sync worker URL cannot be a base".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("sync worker URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn upload_endpoint(&self) -> Result<Url, InfraError> {
        self.endpoint(&["upload"])
    }

    fn download_endpoint(&self, file: DataFile) -> Result<Url, InfraError> {
        self.endpoint(&["download", file.file_name()])
    }

    fn list_endpoint(&self) -> Result<Url, InfraError> {
        self.endpoint(&["list"])
    }
}

#[async_trait]
impl RemoteStore for ReqwestRemoteStore {
    async fn upload(&self, file: DataFile, content: &str) -> Result<(), InfraError> {
        let filename = file.file_name();
        let response = self
            .client
            .post(self.upload_endpoint()?)
            .timeout(UPLOAD_TIMEOUT)
            .json(&UploadRequest { filename, content })
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while uploading {filename}: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::RemoteStatus {
                filename: filename.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn download(&self, file: DataFile) -> Result<Option<String>, InfraError> {
        let filename = file.file_name();
        let response = self
            .client
            .get(self.download_endpoint(file)?)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while downloading {filename}: {error}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(InfraError::RemoteStatus {
                filename: filename.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading {filename} from remote: {error}")))?;
        Ok(Some(body))
    }

    async fn probe(&self) -> Result<bool, InfraError> {
        let response = self
            .client
            .get(self.list_endpoint()?)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("sync worker unreachable: {error}")))?;
        Ok(response.status().is_success())
    }
}

#[derive(Debug)]
pub struct InMemoryRemoteStore {
    files: Mutex<HashMap<DataFile, String>>,
    failing_uploads: Mutex<HashSet<DataFile>>,
    failing_downloads: Mutex<HashSet<DataFile>>,
    uploads: Mutex<Vec<DataFile>>,
    reachable: AtomicBool,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            failing_uploads: Mutex::new(HashSet::new()),
            failing_downloads: Mutex::new(HashSet::new()),
            uploads: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }
}

impl InMemoryRemoteStore {
    pub fn with_file(self, file: DataFile, content: impl Into<String>) -> Self {
        if let Ok(mut files) = self.files.lock() {
            files.insert(file, content.into());
        }
        self
    }

    pub fn fail_upload(self, file: DataFile) -> Self {
        if let Ok(mut failing) = self.failing_uploads.lock() {
            failing.insert(file);
        }
        self
    }

    pub fn fail_download(self, file: DataFile) -> Self {
        if let Ok(mut failing) = self.failing_downloads.lock() {
            failing.insert(file);
        }
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn content(&self, file: DataFile) -> Option<String> {
        self.files.lock().ok().and_then(|files| files.get(&file).cloned())
    }

    /// Files in the order they were accepted by `upload`.
    pub fn uploaded(&self) -> Vec<DataFile> {
        self.uploads
            .lock()
            .map(|uploads| uploads.clone())
            .unwrap_or_default()
    }

    fn is_failing(set: &Mutex<HashSet<DataFile>>, file: DataFile) -> Result<bool, InfraError> {
        let failing = set
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("remote store lock poisoned: {error}")))?;
        Ok(failing.contains(&file))
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upload(&self, file: DataFile, content: &str) -> Result<(), InfraError> {
        if Self::is_failing(&self.failing_uploads, file)? {
            return Err(InfraError::RemoteStatus {
                filename: file.file_name().to_string(),
                status: 500,
            });
        }
        let mut files = self
            .files
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("remote store lock poisoned: {error}")))?;
        files.insert(file, content.to_string());
        let mut uploads = self
            .uploads
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("remote store lock poisoned: {error}")))?;
        uploads.push(file);
        Ok(())
    }

    async fn download(&self, file: DataFile) -> Result<Option<String>, InfraError> {
        if Self::is_failing(&self.failing_downloads, file)? {
            return Err(InfraError::Http(format!(
                "timed out downloading {}",
                file.file_name()
            )));
        }
        let files = self
            .files
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("remote store lock poisoned: {error}")))?;
        Ok(files.get(&file).cloned())
    }

    async fn probe(&self) -> Result<bool, InfraError> {
        Ok(self.reachable.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_append_to_worker_path() {
        let store = ReqwestRemoteStore::new("https://sync.example.workers.dev").expect("store");
        assert_eq!(
            store.upload_endpoint().expect("upload url").as_str(),
            "https://sync.example.workers.dev/upload"
        );
        assert_eq!(
            store
                .download_endpoint(DataFile::Tasks)
                .expect("download url")
                .as_str(),
            "https://sync.example.workers.dev/download/tasks.json"
        );
        assert_eq!(
            store.list_endpoint().expect("list url").as_str(),
            "https://sync.example.workers.dev/list"
        );
    }

    #[test]
    fn endpoints_keep_base_path_prefix() {
        let store = ReqwestRemoteStore::new("https://example.com/blockday/").expect("store");
        assert_eq!(
            store
                .download_endpoint(DataFile::DailyStats)
                .expect("download url")
                .as_str(),
            "https://example.com/blockday/download/daily_stats.json"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            ReqwestRemoteStore::new("not a url"),
            Err(InfraError::InvalidConfig(_))
        ));
        assert!(matches!(
            ReqwestRemoteStore::new("mailto:someone@example.com"),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn in_memory_store_scripts_failures() {
        let store = InMemoryRemoteStore::default()
            .with_file(DataFile::Config, "{}")
            .fail_upload(DataFile::Tasks)
            .fail_download(DataFile::DailyStats);

        assert!(store.upload(DataFile::Tasks, "{}").await.is_err());
        store
            .upload(DataFile::TimerState, "{}")
            .await
            .expect("upload timer state");
        assert_eq!(store.uploaded(), vec![DataFile::TimerState]);

        assert_eq!(
            store.download(DataFile::Config).await.expect("download"),
            Some("{}".to_string())
        );
        assert_eq!(store.download(DataFile::CompletedLog).await.expect("absent"), None);
        assert!(store.download(DataFile::DailyStats).await.is_err());

        assert!(store.probe().await.expect("connection check"));
        store.set_reachable(false);
        assert!(!store.probe().await.expect("connection check"));
    }
}
