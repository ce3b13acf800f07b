//! multipart 上传接收：流式写入临时文件、去重并落盘到目标目录。

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use futures_util::stream::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::atomic::{PersistError, TempUpload};
use crate::config::TEMP_FILE_PREFIX;
use crate::error::ApiError;
use crate::locking::{LockManager, LockTimeout};
use crate::storage::{Destination, Storage, normalize_file_name};

const MAX_PLACE_ATTEMPTS: usize = 3;

/// 上传接收器：持有临时目录、目标目录与同名锁。
#[derive(Debug)]
pub struct Uploader {
    temp_dir: PathBuf,
    storage: Storage,
    locks: LockManager,
    lock_timeout: Duration,
}

/// 成功落盘的上传。
#[derive(Debug)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub bytes: u64,
    pub hash: String,
}

#[derive(Serialize)]
pub(crate) struct UploadAccepted {
    ok: &'static str,
}

impl Uploader {
    pub fn new(temp_dir: PathBuf, storage: Storage, lock_timeout: Duration) -> Self {
        Self {
            temp_dir,
            storage,
            locks: LockManager::new(),
            lock_timeout,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// 接收整个 multipart 请求体。
    ///
    /// 所有带文件名的分段依次写入同一个临时文件，最后一个文件名决定最终名称。
    /// 任何失败都会先删除临时文件再返回。
    pub async fn accept(&self, multipart: &mut Multipart) -> Result<StoredUpload, ApiError> {
        let mut temp = TempUpload::create(&self.temp_dir).await?;

        let received = async {
            let mut file_name = String::new();
            while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
                let declared = field
                    .file_name()
                    .map(normalize_file_name)
                    .unwrap_or_default();
                if declared.is_empty() {
                    continue;
                }
                file_name = declared;

                let mut part_bytes: u64 = 0;
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(multipart_error)?;
                    if chunk.is_empty() {
                        continue;
                    }
                    temp.write_chunk(&chunk).await?;
                    part_bytes += chunk.len() as u64;
                }
                debug!(
                    file_name,
                    bytes = part_bytes,
                    temp = ?temp.path(),
                    "part written"
                );
            }
            Ok::<_, ApiError>(file_name)
        }
        .await;

        let file_name = match received {
            Ok(name) if name.is_empty() => {
                temp.discard().await;
                return Err(ApiError::BadRequest("no file provided".into()));
            }
            Ok(name) => name,
            Err(err) => {
                temp.discard().await;
                return Err(err);
            }
        };

        let guard = match self
            .locks
            .lock_name_with_timeout(&file_name, self.lock_timeout)
            .await
        {
            Ok(guard) => guard,
            Err(LockTimeout) => {
                temp.discard().await;
                return Err(ApiError::Conflict("path locked".into()));
            }
        };
        let stored = self.place(temp, &file_name).await;
        drop(guard);
        stored
    }

    /// 判定目标路径并落盘临时文件；调用方须持有该文件名的锁。
    ///
    /// 其它文件名的上传可能在判定之后抢先占用同一路径（例如直接上传
    /// `report_<hash7>.pdf`），此时重新判定，最多尝试 `MAX_PLACE_ATTEMPTS` 次。
    async fn place(
        &self,
        mut temp: TempUpload,
        file_name: &str,
    ) -> Result<StoredUpload, ApiError> {
        let hash = temp.digest_hex();
        let bytes = temp.written();
        for _ in 0..MAX_PLACE_ATTEMPTS {
            let destination = match self.storage.resolve_destination(file_name, &hash).await {
                Ok(destination) => destination,
                Err(err) => {
                    temp.discard().await;
                    return Err(err.into());
                }
            };

            let target = match destination {
                Destination::New(path) => path,
                Destination::Renamed(path) => {
                    info!(file_name, renamed = ?path, "name taken by different content");
                    path
                }
                Destination::Duplicate => {
                    temp.discard().await;
                    return Err(ApiError::AlreadyExists(file_name.to_string()));
                }
                Destination::Collision(path) => {
                    warn!(file_name, path = ?path, "hash prefix collision");
                    temp.discard().await;
                    return Err(ApiError::Conflict(format!(
                        "'{file_name}' conflicts with an existing file"
                    )));
                }
            };

            match temp.persist(&target).await {
                Ok(()) => {
                    return Ok(StoredUpload {
                        path: target,
                        bytes,
                        hash,
                    });
                }
                Err(PersistError::Exists(returned)) => {
                    debug!(file_name, path = ?target, "destination taken concurrently");
                    temp = returned;
                }
                Err(PersistError::Io(err)) => return Err(err.into()),
            }
        }

        temp.discard().await;
        Err(ApiError::Conflict(format!(
            "'{file_name}' conflicts with an existing file"
        )))
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::Internal(err.body_text())
}

/// `POST /upload`。
pub async fn receive_upload(
    Extension(uploader): Extension<Arc<Uploader>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, JsonResponse<UploadAccepted>), ApiError> {
    let mut multipart = multipart.map_err(|err| {
        warn!(error = %err.body_text(), "invalid multipart body");
        ApiError::Internal(err.body_text())
    })?;

    match uploader.accept(&mut multipart).await {
        Ok(stored) => {
            info!(
                path = ?stored.path,
                bytes = stored.bytes,
                hash = stored.hash,
                "created"
            );
            Ok((StatusCode::CREATED, JsonResponse(UploadAccepted { ok: "ok" })))
        }
        Err(err) => {
            warn!(error = ?err, "upload failed");
            Err(err)
        }
    }
}

/// 清理超过存活时间的上传临时文件（客户端中途断开时遗留）。
pub async fn cleanup_stale_temp(temp_dir: &Path, ttl: Duration) -> Result<u64, std::io::Error> {
    if ttl.is_zero() || fs::metadata(temp_dir).await.is_err() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut dir = fs::read_dir(temp_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        if !entry
            .file_name()
            .to_string_lossy()
            .starts_with(TEMP_FILE_PREFIX)
        {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age >= ttl {
            let path = entry.path();
            if let Err(err) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %err, "failed to remove stale temp file");
            } else {
                info!(path = ?path, "removed stale temp file");
                removed += 1;
            }
        }
    }

    Ok(removed)
}
