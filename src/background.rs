//! 上传临时文件清理的后台任务。

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TEMP_CLEAN_INTERVAL_SECS;
use crate::upload::cleanup_stale_temp;

/// 启动后台任务（过期临时文件清理）；`ttl` 为 0 时不启动。
pub fn spawn_background_tasks(temp_dir: PathBuf, ttl: Duration) {
    if ttl.is_zero() {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TEMP_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match cleanup_stale_temp(&temp_dir, ttl).await {
                Ok(removed) => debug!(removed, "temp cleanup finished"),
                Err(err) => warn!(error = %err, "temp cleanup failed"),
            }
        }
    });
}
