//! 内容摘要：SHA-1，仅用于判断内容是否相同。

use sha1::{Digest, Sha1};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

pub const SHORT_HASH_LEN: usize = 7;
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 将累积的摘要输出为小写十六进制字符串。
pub fn finish_hex(hasher: Sha1) -> String {
    hex::encode(hasher.finalize())
}

/// 截取摘要前缀，用于重名文件的区分后缀。
pub fn short_hash(hash_hex: &str) -> &str {
    hash_hex.get(..SHORT_HASH_LEN).unwrap_or(hash_hex)
}

/// 完整读取磁盘上的文件并计算摘要。
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(finish_hex(hasher))
}
