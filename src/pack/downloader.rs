//! Collects announced packs and finalizes them on a bounded worker pool.
//!
//! Finalizing a pack never touches the connection's I/O: downloads run as tokio
//! tasks and archive work runs on the blocking pool, with at most
//! `workers` packs in flight. A failing pack is logged and dropped.
//!
//! 收集已公布的资源包，并在有界工作池中完成最终处理。
//!
//! 资源包的最终处理从不触及连接 I/O：下载以 tokio 任务运行，归档处理在阻塞线程池中运行，
//! 同时最多有 `workers` 个资源包在处理中。失败的资源包会被记录并丢弃。

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::pack::archive::{self, ArchiveReport};
use crate::pack::transfer::PackTransfer;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct PackDownloader {
    packs_dir: PathBuf,
    transfers: Mutex<HashMap<Uuid, PackTransfer>>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    client: reqwest::Client,
    runtime: Handle,
}

impl PackDownloader {
    /// Creates `<data_dir>/packs`. Must be called from within a tokio runtime.
    ///
    /// 创建 `<data_dir>/packs`。必须在 tokio 运行时内调用。
    pub fn new(data_dir: &Path, workers: usize) -> Result<Self> {
        let packs_dir = data_dir.join("packs");
        std::fs::create_dir_all(&packs_dir)?;
        let runtime = Handle::try_current().map_err(|_| ProxyError::InvalidState)?;
        Ok(Self {
            packs_dir,
            transfers: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            client: reqwest::Client::new(),
            runtime,
        })
    }

    /// Sized by `pack-workers`, storing under `data-dir`.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Self::new(&config.data_dir, config.pack_workers)
    }

    pub fn packs_dir(&self) -> &Path {
        &self.packs_dir
    }

    /// Starts a transfer. Re-announcing a pack discards its earlier chunks.
    pub fn register_pack(&self, pack_id: Uuid, content_key: &str, cdn_url: &str) {
        let transfer = PackTransfer::new(pack_id, content_key, cdn_url, &self.packs_dir);
        debug!(%pack_id, encrypted = !content_key.is_empty(), cdn = !cdn_url.is_empty(), "pack registered");
        self.transfers.lock().insert(pack_id, transfer);
    }

    /// Chunks for packs that were never announced are ignored.
    pub fn add_chunk(&self, pack_id: Uuid, offset: u64, bytes: Vec<u8>) {
        match self.transfers.lock().get_mut(&pack_id) {
            Some(transfer) => transfer.add_chunk(offset, bytes),
            None => debug!(%pack_id, offset, "chunk for unknown pack ignored"),
        }
    }

    pub fn pending(&self) -> usize {
        self.transfers.lock().len()
    }

    /// Submits every registered transfer to the pool and clears the registry.
    /// Returns the number of packs submitted.
    ///
    /// 将所有已登记的传输提交到工作池并清空登记表。返回提交的资源包数量。
    pub fn process_packs(&self) -> usize {
        let transfers: Vec<PackTransfer> = self.transfers.lock().drain().map(|(_, t)| t).collect();
        let submitted = transfers.len();

        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        for transfer in transfers {
            let permits = self.permits.clone();
            let client = self.client.clone();
            tasks.spawn_on(
                async move {
                    let pack_id = transfer.pack_id();
                    match finalize(transfer, client, permits).await {
                        Ok(Some(report)) => info!(
                            %pack_id,
                            hoisted = report.hoisted,
                            decrypted = report.decrypted.len(),
                            "pack finalized"
                        ),
                        Ok(None) => debug!(%pack_id, "empty pack skipped"),
                        Err(e) => error!(%pack_id, error = %e, "pack abandoned"),
                    }
                },
                &self.runtime,
            );
        }
        submitted
    }

    /// Waits up to `grace` for in-flight packs, then cancels the rest.
    /// Returns the number of packs that had to be cancelled.
    ///
    /// 最多等待 `grace` 让处理中的资源包完成，然后取消其余部分。返回被取消的资源包数量。
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            return 0;
        }

        let cancelled = tasks.len();
        warn!(cancelled, "pack pool did not drain in time, cancelling");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        cancelled
    }

    /// [`PackDownloader::shutdown`] with the configured `pack-shutdown-grace-secs`.
    pub async fn shutdown_from_config(&self, config: &ProxyConfig) -> usize {
        self.shutdown(config.pack_shutdown_grace()).await
    }
}

async fn finalize(
    mut transfer: PackTransfer,
    client: reqwest::Client,
    permits: Arc<Semaphore>,
) -> Result<Option<ArchiveReport>> {
    if transfer.is_empty() {
        return Ok(None);
    }
    let _permit = permits.acquire_owned().await.map_err(|_| ProxyError::SessionClosed)?;
    let path = transfer.archive_path().to_path_buf();

    // A URL wins over any chunks that arrived.
    if let Some(url) = transfer.source_url().map(str::to_owned) {
        download(&client, &url, &path).await?;
    } else {
        transfer = tokio::task::spawn_blocking(move || -> Result<PackTransfer> {
            let bytes = transfer.write_chunks()?;
            debug!(pack_id = %transfer.pack_id(), bytes, "pack chunks written");
            Ok(transfer)
        })
        .await
        .map_err(|e| ProxyError::PackDecryptFailure(e.to_string()))??;
    }

    let key = transfer.content_key().map(<[u8]>::to_vec);
    let report = tokio::task::spawn_blocking(move || archive::process_archive(&path, key.as_deref()))
        .await
        .map_err(|e| ProxyError::PackDecryptFailure(e.to_string()))??;
    Ok(Some(report))
}

/// Streams `url` into `path`.
async fn download(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(path).await?;
    let mut total = 0usize;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        total += chunk.len();
    }
    file.flush().await?;
    debug!(url, bytes = total, "pack downloaded");
    Ok(())
}
