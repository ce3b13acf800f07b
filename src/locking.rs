//! 内存中的文件名锁：串行化同名上传的判定与重命名。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// Manages asynchronous mutexes keyed by destination file name.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// 等待锁超时。
#[derive(Debug, PartialEq, Eq)]
pub struct LockTimeout;

/// 持有期间独占某个文件名；drop 时释放并回收空闲条目。
pub struct NameGuard<'a> {
    manager: &'a LockManager,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 在给定超时时间内获取文件名锁。
    pub async fn lock_name_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<NameGuard<'_>, LockTimeout> {
        let key = name.to_string();
        let lock = {
            let mut locks = self.locks.lock().await;
            // 只有表本身引用的条目已无人持有或等待。
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| LockTimeout)?;
        Ok(NameGuard {
            manager: self,
            key,
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // 表被占用时留给下一次加锁时的 retain 清理。
        if let Ok(mut locks) = self.manager.locks.try_lock()
            && let Some(lock) = locks.get(&self.key)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(&self.key);
        }
    }
}
