//! 目标目录：文件名规范化与最终落盘路径的判定。

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

use crate::digest::{hash_file, short_hash};

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// 上传内容最终应落到的位置。
#[derive(Debug, PartialEq, Eq)]
pub enum Destination {
    /// 目标名未被占用。
    New(PathBuf),
    /// 同名文件内容不同，改用带摘要前缀的文件名。
    Renamed(PathBuf),
    /// 相同内容已存在，不再接收。
    Duplicate,
    /// 带摘要前缀的文件名也被不同内容占用。
    Collision(PathBuf),
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub async fn resolve_path_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// 根据文件名与新内容摘要决定落盘位置。
    ///
    /// 已存在文件的摘要无法计算时返回 `Io` 错误，而不是当作重复内容。
    pub async fn resolve_destination(
        &self,
        file_name: &str,
        hash_hex: &str,
    ) -> Result<Destination, StorageError> {
        let candidate = self.resolve_path_checked(file_name).await?;
        if !path_exists(&candidate).await? {
            return Ok(Destination::New(candidate));
        }
        if hash_file(&candidate).await? == hash_hex {
            return Ok(Destination::Duplicate);
        }

        let renamed = self
            .resolve_path_checked(&disambiguated_name(file_name, hash_hex))
            .await?;
        if !path_exists(&renamed).await? {
            return Ok(Destination::Renamed(renamed));
        }
        if hash_file(&renamed).await? == hash_hex {
            Ok(Destination::Duplicate)
        } else {
            Ok(Destination::Collision(renamed))
        }
    }
}

async fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// 取声明文件名的最后一段，去掉首尾空白并转为小写；`.` 与 `..` 视为空。
pub fn normalize_file_name(declared: &str) -> String {
    let base = declared
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    if base == "." || base == ".." {
        return String::new();
    }
    base.to_lowercase()
}

/// 在最后一个 `.` 处拆分为主名与扩展名（扩展名含 `.`）。
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(index) => file_name.split_at(index),
        None => (file_name, ""),
    }
}

/// 生成 `{主名}_{摘要前 7 位}{扩展名}`。
pub fn disambiguated_name(file_name: &str, hash_hex: &str) -> String {
    let (stem, extension) = split_extension(file_name);
    format!("{stem}_{}{extension}", short_hash(hash_hex))
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HASH_X: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    fn make_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");
        (temp, Storage::new(root))
    }

    #[test]
    fn normalize_strips_directories_and_lowercases() {
        assert_eq!(normalize_file_name("Report.PDF"), "report.pdf");
        assert_eq!(normalize_file_name("C:\\Users\\me\\Photo.JPG"), "photo.jpg");
        assert_eq!(normalize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(normalize_file_name(".."), "");
        assert_eq!(normalize_file_name("dir/"), "");
        assert_eq!(normalize_file_name(""), "");
        assert_eq!(normalize_file_name("  Notes.md \t"), "notes.md");
        assert_eq!(normalize_file_name("dir/ . "), "");
    }

    #[test]
    fn split_extension_uses_last_dot() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("readme"), ("readme", ""));
        assert_eq!(split_extension(".bashrc"), ("", ".bashrc"));
    }

    #[test]
    fn disambiguated_name_inserts_hash_prefix() {
        assert_eq!(disambiguated_name("report.pdf", HASH_X), "report_2aae6c3.pdf");
        assert_eq!(disambiguated_name("readme", HASH_X), "readme_2aae6c3");
    }

    #[tokio::test]
    async fn free_name_resolves_to_candidate() {
        let (_temp, storage) = make_storage();
        let destination = storage
            .resolve_destination("report.pdf", HASH_X)
            .await
            .expect("resolve");
        assert_eq!(
            destination,
            Destination::New(storage.root_path().join("report.pdf"))
        );
    }

    #[tokio::test]
    async fn same_content_is_duplicate() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("hello.txt"), b"hello world").expect("write");
        let destination = storage
            .resolve_destination("hello.txt", HASH_X)
            .await
            .expect("resolve");
        assert_eq!(destination, Destination::Duplicate);
    }

    #[tokio::test]
    async fn different_content_is_renamed() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("hello.txt"), b"other").expect("write");
        let destination = storage
            .resolve_destination("hello.txt", HASH_X)
            .await
            .expect("resolve");
        assert_eq!(
            destination,
            Destination::Renamed(storage.root_path().join("hello_2aae6c3.txt"))
        );
    }

    #[tokio::test]
    async fn renamed_slot_with_same_content_is_duplicate() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("hello.txt"), b"other").expect("write");
        std::fs::write(storage.root_path().join("hello_2aae6c3.txt"), b"hello world")
            .expect("write");
        let destination = storage
            .resolve_destination("hello.txt", HASH_X)
            .await
            .expect("resolve");
        assert_eq!(destination, Destination::Duplicate);
    }

    #[tokio::test]
    async fn renamed_slot_with_other_content_is_collision() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("hello.txt"), b"other").expect("write");
        std::fs::write(storage.root_path().join("hello_2aae6c3.txt"), b"third").expect("write");
        let destination = storage
            .resolve_destination("hello.txt", HASH_X)
            .await
            .expect("resolve");
        assert_eq!(
            destination,
            Destination::Collision(storage.root_path().join("hello_2aae6c3.txt"))
        );
    }

    #[tokio::test]
    async fn unreadable_existing_file_is_error() {
        let (_temp, storage) = make_storage();
        std::fs::create_dir_all(storage.root_path().join("hello.txt")).expect("mkdir");
        let result = storage.resolve_destination("hello.txt", HASH_X).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn empty_or_traversal_name_is_invalid() {
        let (_temp, storage) = make_storage();
        let empty = storage.resolve_destination("", HASH_X).await;
        assert!(matches!(empty, Err(StorageError::InvalidPath)));
        let traversal = storage.resolve_destination("../x", HASH_X).await;
        assert!(matches!(traversal, Err(StorageError::InvalidPath)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_path_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage();
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, storage.root_path().join("link")).expect("symlink");

        let result = storage.resolve_path_checked("link").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }
}
