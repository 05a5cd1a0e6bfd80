// Byte-range read/write interface over the local blob store.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::PathBuf;

use bytes::Bytes;
use tempfile::TempDir;

/// Byte-range access to cached resource data, keyed by resource id.
///
/// Writes are append-only in spirit: re-writing an already-cached range
/// must be a safe no-op, so concurrent fetch operations can persist
/// overlapping chunks without coordination.
pub trait BlobStore: Send + Sync {
    /// Read `range` for the resource, or `None` when the backing data is
    /// not present at that position.
    fn read(&self, id: u64, range: Range<u64>) -> io::Result<Option<Bytes>>;

    /// Persist `data` at `offset`.
    fn write(&self, id: u64, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Path of the backing file for the resource, created on demand.
    ///
    /// Callers hand this file to consumers that read populated ranges
    /// directly (absolute resource offsets map to file offsets).
    fn backing_file(&self, id: u64) -> io::Result<PathBuf>;
}

/// Filesystem-backed [`BlobStore`]: one sparse file per resource id.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    // Keeps a temp-dir root alive for stores created with `in_temp_dir`.
    _temp: Option<TempDir>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, _temp: None })
    }

    /// Store rooted in a fresh temporary directory, removed on drop.
    pub fn in_temp_dir() -> io::Result<Self> {
        let temp = tempfile::tempdir()?;
        Ok(Self {
            root: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.root.join(format!("part_{id}.bin"))
    }
}

impl BlobStore for FsBlobStore {
    fn read(&self, id: u64, range: Range<u64>) -> io::Result<Option<Bytes>> {
        if range.start >= range.end {
            return Ok(Some(Bytes::new()));
        }

        let path = self.path_for(id);
        let mut file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if file.metadata()?.len() < range.end {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf)?;
        Ok(Some(Bytes::from(buf)))
    }

    fn write(&self, id: u64, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.path_for(id))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn backing_file(&self, id: u64) -> io::Result<PathBuf> {
        let path = self.path_for(id);
        if !path.exists() {
            OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)?;
        }
        Ok(path)
    }
}
