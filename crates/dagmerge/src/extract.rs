//! Unpacking input archives into scratch directories.

use crate::error::MergeError;
use crate::safety::{classify, is_safe_entry_type, validate_entry_path};
use crate::types::ExtractorKind;
use flate2::read::GzDecoder;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How often a running `tar` child is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Unpacks one archive into an empty directory.
pub trait Extractor: Send + Sync {
    /// Extract `archive` into `dest`.
    ///
    /// Fails with [`MergeError::Extraction`] when the archive cannot be
    /// unpacked and [`MergeError::Cancelled`] when `cancel` is raised midway.
    fn extract(&self, archive: &Path, dest: &Path, cancel: &AtomicBool) -> Result<(), MergeError>;
}

impl ExtractorKind {
    pub fn extractor(self) -> Arc<dyn Extractor> {
        match self {
            ExtractorKind::Command => Arc::new(CommandExtractor::default()),
            ExtractorKind::Native => Arc::new(NativeExtractor),
        }
    }
}

/// Runs `tar -xzf <archive> -C <dest>`; the exit status is the only success signal.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: OsString,
}

impl Default for CommandExtractor {
    fn default() -> Self {
        Self::new("tar")
    }
}

impl CommandExtractor {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, archive: &Path, dest: &Path, cancel: &AtomicBool) -> Result<(), MergeError> {
        let failed = |reason: String| MergeError::Extraction {
            archive: archive.to_path_buf(),
            reason,
        };

        let mut child = Command::new(&self.program)
            .arg("-xzf")
            .arg(archive)
            .arg("-C")
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| failed(format!("failed to spawn {:?}: {}", self.program, e)))?;

        // Already exited if kill fails; either way reap it
        let reap = |child: &mut Child| {
            let _ = child.kill();
            let _ = child.wait();
        };

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    reap(&mut child);
                    return Err(failed(format!("failed to wait on {:?}: {}", self.program, e)));
                }
            }
            if cancel.load(Ordering::Relaxed) {
                reap(&mut child);
                return Err(MergeError::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(failed(format!("{:?} exited with {}", self.program, status)));
        }
        Ok(())
    }
}

/// Unpacks `.tar.gz` archives in-process.
///
/// Link entries and paths escaping `dest` are skipped with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeExtractor;

impl Extractor for NativeExtractor {
    fn extract(&self, archive: &Path, dest: &Path, cancel: &AtomicBool) -> Result<(), MergeError> {
        let file = File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));

        let mut unpack = || -> io::Result<Option<MergeError>> {
            for entry in tar.entries()? {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(Some(MergeError::Cancelled));
                }
                let mut entry = entry?;
                let raw_path = entry.path()?.into_owned();
                let kind = classify(entry.header().entry_type());

                if !is_safe_entry_type(kind) {
                    warn!(archive = %archive.display(), entry = %raw_path.display(), ?kind, "skipping unsafe entry");
                    continue;
                }
                let relative = match validate_entry_path(&raw_path) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(archive = %archive.display(), error = %e, "skipping entry");
                        continue;
                    }
                };

                let target = dest.join(&relative);
                if entry.header().entry_type().is_dir() {
                    fs::create_dir_all(&target)?;
                    continue;
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&target)?;
                debug!(entry = %relative.display(), "unpacked");
            }
            Ok(None)
        };

        match unpack() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(e) => Err(MergeError::Extraction {
                archive: archive.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, name, *content).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_native_extracts_tree() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("dag-1.tar.gz");
        let out = temp_dir.path().join("out");
        fs::create_dir(&out).unwrap();
        write_tar_gz(&archive, &[("dag/s/a.json", b"{}"), ("notes.txt", b"hi")]);

        NativeExtractor
            .extract(&archive, &out, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(fs::read(out.join("dag/s/a.json")).unwrap(), b"{}");
        assert!(out.join("notes.txt").exists());
    }

    #[test]
    fn test_native_rejects_corrupt_archive() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("dag-bad.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let err = NativeExtractor
            .extract(&archive, temp_dir.path(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, MergeError::Extraction { .. }));
    }

    #[test]
    fn test_native_honours_cancel() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("dag-1.tar.gz");
        write_tar_gz(&archive, &[("dag/s/a.json", b"{}")]);

        let err = NativeExtractor
            .extract(&archive, temp_dir.path(), &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, MergeError::Cancelled));
    }

    #[test]
    fn test_command_reports_missing_program() {
        let temp_dir = TempDir::new().unwrap();
        let err = CommandExtractor::new("definitely-not-a-tar-binary")
            .extract(
                &temp_dir.path().join("dag-1.tar.gz"),
                temp_dir.path(),
                &AtomicBool::new(false),
            )
            .unwrap_err();
        assert!(matches!(err, MergeError::Extraction { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_command_killed_on_cancel() {
        let temp_dir = TempDir::new().unwrap();
        // A fifo nobody writes to keeps tar blocked until it is killed
        let archive = temp_dir.path().join("dag-1.tar.gz");
        assert!(Command::new("mkfifo").arg(&archive).status().unwrap().success());

        let cancel = AtomicBool::new(false);
        let started = std::time::Instant::now();
        let err = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                cancel.store(true, Ordering::Relaxed);
            });
            CommandExtractor::default()
                .extract(&archive, temp_dir.path(), &cancel)
                .unwrap_err()
        });

        assert!(matches!(err, MergeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
