//! Read-merge-write of a single destination section.

use crate::codec::Codec;
use crate::error::MergeError;
use crate::locks::LockRegistry;
use crate::path::CanonicalPath;
use crate::section::Section;
use crate::types::{CorruptPolicy, MergeOutcome};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Merges fragments into the destination tree rooted at `result_dir`.
pub struct MergeEngine {
    result_dir: PathBuf,
    codec: Arc<dyn Codec>,
    locks: Arc<LockRegistry>,
    on_corrupt: CorruptPolicy,
}

impl MergeEngine {
    pub fn new(
        result_dir: impl Into<PathBuf>,
        codec: Arc<dyn Codec>,
        locks: Arc<LockRegistry>,
        on_corrupt: CorruptPolicy,
    ) -> Self {
        Self {
            result_dir: result_dir.into(),
            codec,
            locks,
            on_corrupt,
        }
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Read the fragment at `source` and merge it into `canonical`.
    pub fn merge_file(
        &self,
        canonical: &CanonicalPath,
        source: &Path,
    ) -> Result<MergeOutcome, MergeError> {
        let bytes = fs::read(source)?;
        self.merge_into(canonical, source, &bytes)
    }

    /// Union the section encoded in `source_bytes` into the destination for `canonical`.
    ///
    /// `origin` only labels errors. All destination I/O happens under the
    /// destination's lock; the result is written to a sibling temp file and
    /// renamed into place.
    pub fn merge_into(
        &self,
        canonical: &CanonicalPath,
        origin: &Path,
        source_bytes: &[u8],
    ) -> Result<MergeOutcome, MergeError> {
        let incoming = self
            .codec
            .decode(source_bytes)
            .map_err(|source| MergeError::Decode {
                path: origin.to_path_buf(),
                source,
            })?;

        let dest = canonical.under(&self.result_dir);
        let lock = self.locks.acquire(canonical);
        let _guard = lock.lock();

        let mut replaced_corrupt = false;
        let (merged, added) = match self.read_existing(&dest)? {
            Existing::Absent => {
                let added = incoming.len();
                (incoming, added)
            }
            Existing::Present(mut existing) => {
                let added = existing.merge(incoming);
                (existing, added)
            }
            Existing::Corrupt(source) => match self.on_corrupt {
                CorruptPolicy::Preserve => {
                    return Err(MergeError::CorruptDestination { path: dest, source });
                }
                CorruptPolicy::Replace => {
                    warn!(path = %dest.display(), error = %source, "discarding unreadable destination, previous data is lost");
                    replaced_corrupt = true;
                    let added = incoming.len();
                    (incoming, added)
                }
                CorruptPolicy::Quarantine => {
                    let aside = quarantine(&dest).map_err(|source| MergeError::Write {
                        path: dest.clone(),
                        source,
                    })?;
                    warn!(path = %dest.display(), moved_to = %aside.display(), error = %source, "moved unreadable destination aside");
                    replaced_corrupt = true;
                    let added = incoming.len();
                    (incoming, added)
                }
            },
        };

        self.write_section(&dest, &merged)?;
        debug!(path = %canonical, added, transactions = merged.len(), "merged fragment");

        Ok(MergeOutcome {
            transactions: merged.len(),
            added,
            replaced_corrupt,
        })
    }

    fn read_existing(&self, dest: &Path) -> Result<Existing, MergeError> {
        let bytes = match fs::read(dest) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Existing::Absent),
            Err(e) => return Err(MergeError::Io(e)),
        };
        Ok(match self.codec.decode(&bytes) {
            Ok(section) => Existing::Present(section),
            Err(e) => Existing::Corrupt(e),
        })
    }

    fn write_section(&self, dest: &Path, section: &Section) -> Result<(), MergeError> {
        let write_err = |source: io::Error| MergeError::Write {
            path: dest.to_path_buf(),
            source,
        };

        let bytes = self.codec.encode(section).map_err(|e| {
            write_err(io::Error::new(io::ErrorKind::InvalidData, e))
        })?;

        let parent = dest.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(&bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(dest).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

enum Existing {
    Absent,
    Present(Section),
    Corrupt(crate::error::CodecError),
}

/// Move `dest` to a fresh `<name>.XXXXXX.corrupt` sibling and return its path.
///
/// Earlier quarantined copies of the same destination are never overwritten.
fn quarantine(dest: &Path) -> io::Result<PathBuf> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let mut prefix = dest.file_name().unwrap_or_default().to_os_string();
    prefix.push(".");

    let slot = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".corrupt")
        .tempfile_in(parent)?
        .into_temp_path()
        .keep()
        .map_err(|e| e.error)?;

    if let Err(e) = fs::rename(dest, &slot) {
        let _ = fs::remove_file(&slot);
        return Err(e);
    }
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::path::{resolve, DEFAULT_MARKER};
    use crate::section::Transaction;
    use std::thread;
    use tempfile::TempDir;

    fn engine(dir: &Path, policy: CorruptPolicy) -> MergeEngine {
        MergeEngine::new(
            dir,
            Arc::new(JsonCodec::default()),
            Arc::new(LockRegistry::new()),
            policy,
        )
    }

    fn canonical(p: &str) -> CanonicalPath {
        resolve(Path::new(p), Path::new("/"), DEFAULT_MARKER).unwrap()
    }

    fn fragment(hashes: &[&str]) -> Vec<u8> {
        let section: Section = hashes.iter().map(|h| Transaction::new(*h)).collect();
        JsonCodec::default().encode(&section).unwrap()
    }

    fn quarantined(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy();
                name.starts_with("a.json.") && name.ends_with(".corrupt")
            })
            .collect()
    }

    fn read(engine: &MergeEngine, p: &CanonicalPath) -> Section {
        let bytes = fs::read(p.under(engine.result_dir())).unwrap();
        JsonCodec::default().decode(&bytes).unwrap()
    }

    #[test]
    fn test_merge_creates_destination() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Replace);
        let path = canonical("dag/shard1/a.json");

        let outcome = engine
            .merge_into(&path, Path::new("src"), &fragment(&["t1"]))
            .unwrap();

        assert_eq!(outcome.added, 1);
        assert!(temp_dir.path().join("dag/shard1/a.json").exists());
        assert_eq!(read(&engine, &path).hashes().collect::<Vec<_>>(), vec!["t1"]);
    }

    #[test]
    fn test_merge_unions_with_existing() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Replace);
        let path = canonical("dag/shard1/a.json");

        engine.merge_into(&path, Path::new("a"), &fragment(&["t1", "t2"])).unwrap();
        let outcome = engine
            .merge_into(&path, Path::new("b"), &fragment(&["t2", "t3"]))
            .unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.transactions, 3);
        assert_eq!(
            read(&engine, &path).hashes().collect::<Vec<_>>(),
            vec!["t1", "t2", "t3"]
        );
    }

    #[test]
    fn test_merge_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Replace);
        let path = canonical("dag/s/a.json");
        let dest = path.under(temp_dir.path());

        engine.merge_into(&path, Path::new("a"), &fragment(&["t1", "t2"])).unwrap();
        let once = fs::read(&dest).unwrap();
        engine.merge_into(&path, Path::new("a"), &fragment(&["t1", "t2"])).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), once);
    }

    #[test]
    fn test_bad_source_leaves_destination_alone() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Replace);
        let path = canonical("dag/s/a.json");

        engine.merge_into(&path, Path::new("a"), &fragment(&["t1"])).unwrap();
        let err = engine
            .merge_into(&path, Path::new("broken"), b"{not json")
            .unwrap_err();

        assert!(matches!(err, MergeError::Decode { .. }));
        assert_eq!(read(&engine, &path).len(), 1);
    }

    #[test]
    fn test_corrupt_destination_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Replace);
        let path = canonical("dag/s/a.json");
        let dest = path.under(temp_dir.path());
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"garbage").unwrap();

        let outcome = engine
            .merge_into(&path, Path::new("a"), &fragment(&["t9"]))
            .unwrap();

        assert!(outcome.replaced_corrupt);
        assert_eq!(read(&engine, &path).hashes().collect::<Vec<_>>(), vec!["t9"]);
    }

    #[test]
    fn test_corrupt_destination_quarantined() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Quarantine);
        let path = canonical("dag/s/a.json");
        let dest = path.under(temp_dir.path());
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"garbage").unwrap();

        engine.merge_into(&path, Path::new("a"), &fragment(&["t9"])).unwrap();

        let aside = quarantined(dest.parent().unwrap());
        assert_eq!(aside.len(), 1);
        assert_eq!(fs::read(&aside[0]).unwrap(), b"garbage");
        assert_eq!(read(&engine, &path).len(), 1);
    }

    #[test]
    fn test_quarantine_keeps_every_copy() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Quarantine);
        let path = canonical("dag/s/a.json");
        let dest = path.under(temp_dir.path());
        fs::create_dir_all(dest.parent().unwrap()).unwrap();

        fs::write(&dest, b"first").unwrap();
        engine.merge_into(&path, Path::new("a"), &fragment(&["t1"])).unwrap();
        fs::write(&dest, b"second").unwrap();
        engine.merge_into(&path, Path::new("b"), &fragment(&["t2"])).unwrap();

        let mut contents: Vec<Vec<u8>> = quarantined(dest.parent().unwrap())
            .iter()
            .map(|p| fs::read(p).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(read(&engine, &path).hashes().collect::<Vec<_>>(), vec!["t2"]);
    }

    #[test]
    fn test_corrupt_destination_preserved() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Preserve);
        let path = canonical("dag/s/a.json");
        let dest = path.under(temp_dir.path());
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"garbage").unwrap();

        let err = engine
            .merge_into(&path, Path::new("a"), &fragment(&["t9"]))
            .unwrap_err();

        assert!(matches!(err, MergeError::CorruptDestination { .. }));
        assert_eq!(fs::read(&dest).unwrap(), b"garbage");
    }

    #[test]
    fn test_write_failure_reported() {
        let temp_dir = TempDir::new().unwrap();
        // A file where the shard directory should be
        fs::create_dir_all(temp_dir.path().join("dag")).unwrap();
        fs::write(temp_dir.path().join("dag/s"), b"").unwrap();

        let engine = engine(temp_dir.path(), CorruptPolicy::Replace);
        let err = engine
            .merge_into(&canonical("dag/s/a.json"), Path::new("a"), &fragment(&["t1"]))
            .unwrap_err();

        assert!(matches!(err, MergeError::Write { .. } | MergeError::Io(_)));
    }

    #[test]
    fn test_concurrent_merges_same_destination() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(temp_dir.path(), CorruptPolicy::Preserve);
        let path = canonical("dag/s/a.json");

        thread::scope(|s| {
            for worker in 0..8 {
                let engine = &engine;
                let path = &path;
                s.spawn(move || {
                    for i in 0..10 {
                        let hash = format!("w{worker}-{i}");
                        engine
                            .merge_into(path, Path::new("x"), &fragment(&[hash.as_str(), "shared"]))
                            .unwrap();
                    }
                });
            }
        });

        let section = read(&engine, &path);
        assert_eq!(section.len(), 81);
        assert!(section.contains("shared"));
        assert!(section.contains("w7-9"));
    }
}
