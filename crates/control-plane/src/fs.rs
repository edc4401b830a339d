//! Filesystem service: data-directory-scoped writes, tar-gz archives and
//! encrypted backup bundles.

use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::crypto::{CryptoError, CryptoSuite};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("path escapes the data directory")]
    UnsafePath,
    #[error("Cannot restore: decryption failed")]
    RestoreDecryption,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Clone)]
pub struct FileService {
    data_dir: PathBuf,
}

impl FileService {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Resolves a relative path inside the data directory, rejecting absolute
    /// paths and any `..` component.
    pub fn safe_join(&self, relative: &str) -> Result<PathBuf, FsError> {
        let relative = Path::new(relative);
        if relative.is_absolute() {
            return Err(FsError::UnsafePath);
        }
        if relative
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(FsError::UnsafePath);
        }
        Ok(self.data_dir.join(relative))
    }

    /// Writes a file inside the data directory, creating parents as needed.
    pub fn write_scoped(&self, relative: &str, contents: &[u8]) -> Result<PathBuf, FsError> {
        let path = self.safe_join(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Tar-gz of the data directory, relative paths, dotfiles included.
    pub fn create_archive(&self) -> Result<Vec<u8>, FsError> {
        archive_dir(&self.data_dir)
    }

    /// Encrypted backup bundle: the archived data directory sealed with a
    /// user-supplied passphrase.
    pub fn backup(&self, suite: CryptoSuite, passphrase: &[u8]) -> Result<Vec<u8>, FsError> {
        let archive = self.create_archive()?;
        Ok(suite.encrypt_bytes(&archive, passphrase)?)
    }

    /// Decrypts and unpacks a backup bundle into `dest`. The bundle is fully
    /// decrypted and extracted into a staging directory before anything at
    /// `dest` changes, so a wrong passphrase leaves the system untouched.
    pub fn restore(
        &self,
        suite: CryptoSuite,
        bundle: &[u8],
        passphrase: &[u8],
        dest: &Path,
    ) -> Result<(), FsError> {
        let archive = suite
            .decrypt_bytes(bundle, passphrase)
            .map_err(|_| FsError::RestoreDecryption)?;

        let staging = dest
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!(".restore-staging-{}", std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        extract_archive(&archive, &staging)?;

        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(&staging)? {
            let entry = entry?;
            let target = dest.join(entry.file_name());
            if target.exists() {
                if target.is_dir() {
                    fs::remove_dir_all(&target)?;
                } else {
                    fs::remove_file(&target)?;
                }
            }
            fs::rename(entry.path(), target)?;
        }
        fs::remove_dir_all(&staging)?;
        Ok(())
    }
}

/// Tar-gz of a directory with paths relative to its root.
pub fn archive_dir(dir: &Path) -> Result<Vec<u8>, FsError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    append_dir(&mut builder, dir, Path::new(""))?;
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn append_dir(
    builder: &mut tar::Builder<GzEncoder<Vec<u8>>>,
    dir: &Path,
    prefix: &Path,
) -> Result<(), FsError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = prefix.join(entry.file_name());
        if path.is_dir() {
            builder.append_dir(&name, &path)?;
            append_dir(builder, &path, &name)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    Ok(())
}

/// Unpacks a tar-gz produced by [`archive_dir`].
pub fn extract_archive(archive: &[u8], dest: &Path) -> Result<(), FsError> {
    fs::create_dir_all(dest)?;
    let decoder = GzDecoder::new(archive);
    let mut reader = tar::Archive::new(decoder);
    reader.unpack(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("berth.db"), b"{\"buckets\":{}}").expect("db");
        fs::write(dir.path().join(".hidden"), b"dotfile").expect("dotfile");
        fs::create_dir(dir.path().join("tls")).expect("subdir");
        fs::write(dir.path().join("tls").join("ca.pem"), b"---cert---").expect("cert");
        dir
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let svc = FileService::new(PathBuf::from("/data"));
        assert!(svc.safe_join("tls/ca.pem").is_ok());
        assert!(matches!(svc.safe_join("../etc/passwd"), Err(FsError::UnsafePath)));
        assert!(matches!(svc.safe_join("/etc/passwd"), Err(FsError::UnsafePath)));
        assert!(matches!(svc.safe_join("a/../../b"), Err(FsError::UnsafePath)));
    }

    #[test]
    fn archive_round_trip_preserves_bytes_paths_and_dotfiles() {
        let dir = seed_dir();
        let archive = archive_dir(dir.path()).expect("archive");

        let dest = tempfile::tempdir().expect("dest");
        extract_archive(&archive, dest.path()).expect("extract");

        assert_eq!(
            fs::read(dest.path().join("berth.db")).expect("db"),
            b"{\"buckets\":{}}"
        );
        assert_eq!(fs::read(dest.path().join(".hidden")).expect("dotfile"), b"dotfile");
        assert_eq!(
            fs::read(dest.path().join("tls").join("ca.pem")).expect("cert"),
            b"---cert---"
        );
    }

    #[test]
    fn backup_restores_with_the_right_passphrase() {
        let dir = seed_dir();
        let svc = FileService::new(dir.path().to_path_buf());
        let bundle = svc.backup(CryptoSuite::Standard, b"secret").expect("backup");

        let dest = tempfile::tempdir().expect("dest");
        svc.restore(CryptoSuite::Standard, &bundle, b"secret", dest.path())
            .expect("restore");
        assert_eq!(
            fs::read(dest.path().join("berth.db")).expect("db"),
            b"{\"buckets\":{}}"
        );
    }

    #[test]
    fn restore_with_the_wrong_passphrase_fails_and_changes_nothing() {
        let dir = seed_dir();
        let svc = FileService::new(dir.path().to_path_buf());
        let bundle = svc.backup(CryptoSuite::Standard, b"secret").expect("backup");

        let dest = tempfile::tempdir().expect("dest");
        fs::write(dest.path().join("keep.txt"), b"untouched").expect("seed dest");

        let err = svc
            .restore(CryptoSuite::Standard, &bundle, b"terces", dest.path())
            .expect_err("wrong passphrase");
        assert_eq!(err.to_string(), "Cannot restore: decryption failed");

        assert_eq!(
            fs::read(dest.path().join("keep.txt")).expect("dest intact"),
            b"untouched"
        );
        assert!(!dest.path().join("berth.db").exists());
    }
}
