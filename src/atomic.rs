//! 上传临时文件：边写边计算摘要，最终丢弃或以不覆盖的方式落到目标路径。

use sha1::{Digest, Sha1};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::TEMP_FILE_PREFIX;
use crate::digest::finish_hex;

/// 单个请求独占的临时文件。
pub struct TempUpload {
    path: PathBuf,
    file: File,
    hasher: Sha1,
    written: u64,
}

impl TempUpload {
    /// 在临时目录中创建一个不可预测名称的新文件。
    pub async fn create(temp_dir: &Path) -> io::Result<Self> {
        let path = temp_dir.join(format!("{TEMP_FILE_PREFIX}{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file,
            hasher: Sha1::new(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 写入数据并同步更新摘要。
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// 返回目前为止所有写入字节的摘要。
    pub fn digest_hex(&self) -> String {
        finish_hex(self.hasher.clone())
    }

    /// 放弃并清理临时文件。
    pub async fn discard(self) {
        let Self { path, file, .. } = self;
        drop(file);
        let _ = fs::remove_file(&path).await;
    }

    /// 同步后以硬链接方式落到目标路径，目标已存在时不覆盖。
    ///
    /// 目标已存在时原样交还临时文件，由调用方重新判定路径；
    /// 其它失败会删除临时文件。
    pub async fn persist(mut self, target: &Path) -> Result<(), PersistError> {
        let synced = async {
            self.file.flush().await?;
            self.file.sync_all().await
        }
        .await;
        if let Err(err) = synced {
            self.discard().await;
            return Err(PersistError::Io(err));
        }

        match fs::hard_link(&self.path, target).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PersistError::Exists(self));
            }
            Err(err) => {
                self.discard().await;
                return Err(PersistError::Io(err));
            }
        }
        self.discard().await;

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

/// 临时文件落盘失败。
pub enum PersistError {
    /// 目标路径已被占用，临时文件仍然有效。
    Exists(TempUpload),
    Io(io::Error),
}

impl fmt::Debug for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Exists(temp) => f.debug_tuple("Exists").field(&temp.path).finish(),
            PersistError::Io(err) => f.debug_tuple("Io").field(err).finish(),
        }
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
