//! 命令行参数、环境变量与服务默认配置。

use clap::Parser;
use shadow_rs::formatcp;
use std::io;
use std::path::PathBuf;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const TEMP_FILE_PREFIX: &str = "multipart-receiver-";
pub const FORM_ASSET: &str = "index.html";
pub const DEFAULT_DATA_DIR_NAME: &str = "data";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_TEMP_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 30;
pub const TEMP_CLEAN_INTERVAL_SECS: u64 = 900;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// 服务的命令行参数与环境变量配置。
#[derive(Parser, Debug)]
#[command(
    name = "multipart-receiver",
    version = VERSION_INFO,
    about = "Multipart file upload receiver"
)]
pub struct Args {
    #[arg(
        short = 't',
        long,
        env = "RECEIVER_TMP_DIR",
        help = "Directory for in-flight uploads [default: OS temp dir]"
    )]
    pub tmp_dir: Option<PathBuf>,
    #[arg(
        short = 'd',
        long,
        env = "RECEIVER_DATA_DIR",
        help = "Directory for accepted files [default: $HOME/data]"
    )]
    pub data_dir: Option<PathBuf>,
    #[arg(
        short = 'b',
        long = "bind",
        env = "RECEIVER_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "RECEIVER_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(long, env = "RECEIVER_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "RECEIVER_TEMP_TTL_SECS",
        default_value_t = DEFAULT_TEMP_TTL_SECS,
        help = "Stale temp file cleanup threshold in seconds (0 to disable)"
    )]
    pub temp_ttl_secs: u64,
    #[arg(
        long,
        env = "RECEIVER_LOCK_TIMEOUT_SECS",
        default_value_t = DEFAULT_LOCK_WAIT_TIMEOUT_SECS,
        help = "Max wait for a concurrent upload of the same name, in seconds"
    )]
    pub lock_timeout_secs: u64,
}

impl Args {
    /// 临时目录，未指定时使用系统临时目录。
    pub fn temp_dir(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// 目标目录，未指定时使用 `$HOME/data`。
    pub fn target_dir(&self) -> io::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_DATA_DIR_NAME))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "could not determine home dir"))
    }
}
