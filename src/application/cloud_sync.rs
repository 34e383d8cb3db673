use crate::domain::merge::merge_task_documents;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_store::{RemoteStore, ReqwestRemoteStore};
use crate::infrastructure::storage::{DataFile, DataStore};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SyncCounts {
    fn skipped_all() -> Self {
        Self {
            skipped: DataFile::SYNC_ORDER.len(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAvailability {
    Ready,
    Disabled,
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub availability: SyncAvailability,
    pub upload: SyncCounts,
    pub download: SyncCounts,
}

impl SyncReport {
    /// Skips never count against success. A sync that was switched on but has
    /// nowhere to go is reported as unsuccessful so the user notices.
    pub fn is_success(&self) -> bool {
        match self.availability {
            SyncAvailability::Ready => self.upload.is_success() && self.download.is_success(),
            SyncAvailability::Disabled => true,
            SyncAvailability::NotConfigured => false,
        }
    }
}

enum Transfer {
    Done,
    Skipped,
}

/// Mirrors the data files to a remote store. Uploads and downloads walk the
/// files in `DataFile::SYNC_ORDER`; one file failing never stops the rest.
pub struct SyncReconciler<R>
where
    R: RemoteStore + ?Sized,
{
    store: DataStore,
    remote: Option<Arc<R>>,
    availability: SyncAvailability,
}

impl<R> SyncReconciler<R>
where
    R: RemoteStore + ?Sized,
{
    pub fn new(store: DataStore, remote: Arc<R>) -> Self {
        Self {
            store,
            remote: Some(remote),
            availability: SyncAvailability::Ready,
        }
    }

    pub fn unavailable(store: DataStore, availability: SyncAvailability) -> Self {
        Self {
            store,
            remote: None,
            availability,
        }
    }

    pub fn availability(&self) -> SyncAvailability {
        self.availability
    }

    pub async fn upload_all(&self) -> SyncCounts {
        let Some(remote) = &self.remote else {
            return SyncCounts::skipped_all();
        };

        let mut counts = SyncCounts::default();
        for file in DataFile::SYNC_ORDER {
            match self.upload_file(remote.as_ref(), file).await {
                Ok(Transfer::Done) => {
                    tracing::info!(filename = file.file_name(), "uploaded");
                    counts.succeeded += 1;
                }
                Ok(Transfer::Skipped) => {
                    tracing::debug!(filename = file.file_name(), "not present locally, upload skipped");
                    counts.skipped += 1;
                }
                Err(error) => {
                    tracing::warn!(filename = file.file_name(), %error, "upload failed");
                    counts.failed += 1;
                }
            }
        }
        counts
    }

    pub async fn download_all(&self) -> SyncCounts {
        let Some(remote) = &self.remote else {
            return SyncCounts::skipped_all();
        };

        let mut counts = SyncCounts::default();
        for file in DataFile::SYNC_ORDER {
            match self.download_file(remote.as_ref(), file).await {
                Ok(Transfer::Done) => {
                    tracing::info!(filename = file.file_name(), "downloaded");
                    counts.succeeded += 1;
                }
                Ok(Transfer::Skipped) => {
                    tracing::debug!(filename = file.file_name(), "not present remotely, download skipped");
                    counts.skipped += 1;
                }
                Err(error) => {
                    tracing::warn!(filename = file.file_name(), %error, "download failed");
                    counts.failed += 1;
                }
            }
        }
        counts
    }

    /// Upload first so local edits reach the remote even when its copy is
    /// older, then download to pick up what other machines pushed.
    pub async fn sync(&self) -> SyncReport {
        let upload = self.upload_all().await;
        let download = self.download_all().await;
        let report = SyncReport {
            availability: self.availability,
            upload,
            download,
        };
        tracing::info!(
            success = report.is_success(),
            uploaded = upload.succeeded,
            downloaded = download.succeeded,
            failed = upload.failed + download.failed,
            "sync finished"
        );
        report
    }

    pub async fn test_connection(&self) -> Result<bool, InfraError> {
        match &self.remote {
            Some(remote) => remote.probe().await,
            None => Ok(false),
        }
    }

    async fn upload_file(&self, remote: &R, file: DataFile) -> Result<Transfer, InfraError> {
        let Some(content) = self.store.read_raw(file)? else {
            return Ok(Transfer::Skipped);
        };
        remote.upload(file, &content).await?;
        Ok(Transfer::Done)
    }

    async fn download_file(&self, remote: &R, file: DataFile) -> Result<Transfer, InfraError> {
        let Some(cloud) = remote.download(file).await? else {
            return Ok(Transfer::Skipped);
        };
        if file == DataFile::Tasks {
            self.merge_tasks(&cloud)?;
        } else {
            self.store.write_raw(file, &cloud)?;
        }
        Ok(Transfer::Done)
    }

    /// Completed-state-wins merge into the local task file. A merge that
    /// cannot be done degrades to taking the cloud copy as it is.
    fn merge_tasks(&self, cloud: &str) -> Result<(), InfraError> {
        let local = match self.store.read_raw(DataFile::Tasks) {
            Ok(local) => local.filter(|local| !local.trim().is_empty()),
            Err(error) => {
                let error = InfraError::Merge(format!("local tasks unreadable: {error}"));
                tracing::warn!(%error, "task merge failed, keeping cloud copy");
                None
            }
        };
        let Some(local) = local else {
            return self.store.write_raw(DataFile::Tasks, cloud);
        };

        match merge_task_documents(&local, cloud) {
            Ok(merged) => self.store.write_raw(DataFile::Tasks, &format!("{merged}\n")),
            Err(error) => {
                let error = InfraError::Merge(error.to_string());
                tracing::warn!(%error, "task merge failed, keeping cloud copy");
                self.store.write_raw(DataFile::Tasks, cloud)
            }
        }
    }
}

impl SyncReconciler<dyn RemoteStore> {
    pub fn from_config(config: &AppConfig, store: DataStore) -> Self {
        if !config.sync.enabled {
            return Self::unavailable(store, SyncAvailability::Disabled);
        }
        let Some(endpoint) = config.sync_endpoint() else {
            return Self::unavailable(store, SyncAvailability::NotConfigured);
        };
        match ReqwestRemoteStore::new(endpoint) {
            Ok(remote) => {
                let remote: Arc<dyn RemoteStore> = Arc::new(remote);
                Self::new(store, remote)
            }
            Err(error) => {
                tracing::warn!(%error, "sync worker url rejected");
                Self::unavailable(store, SyncAvailability::NotConfigured)
            }
        }
    }
}

struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs syncs in the background, one at a time.
pub struct SyncRunner<R>
where
    R: RemoteStore + ?Sized,
{
    reconciler: Arc<SyncReconciler<R>>,
    in_flight: Arc<AtomicBool>,
}

impl<R> Clone for SyncRunner<R>
where
    R: RemoteStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            reconciler: Arc::clone(&self.reconciler),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<R> SyncRunner<R>
where
    R: RemoteStore + ?Sized + 'static,
{
    pub fn new(reconciler: Arc<SyncReconciler<R>>) -> Self {
        Self {
            reconciler,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn reconciler(&self) -> &Arc<SyncReconciler<R>> {
        &self.reconciler
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Starts a sync on the runtime. `None` when one is already running; the
    /// receiver resolves with the report when it is done.
    pub fn spawn_sync(&self) -> Option<oneshot::Receiver<SyncReport>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("sync already in progress");
            return None;
        }

        let guard = InFlight(Arc::clone(&self.in_flight));
        let reconciler = Arc::clone(&self.reconciler);
        let (reply, receiver) = oneshot::channel();
        tokio::spawn(async move {
            let report = reconciler.sync().await;
            drop(guard);
            let _ = reply.send(report);
        });
        Some(receiver)
    }
}
