use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::Result;

/// A file kept memory-mapped read/write for its whole lifetime.
///
/// Growth goes through [`MmapFile::truncate`], which extends the file and
/// replaces the mapping. Callers must serialise `truncate` against every
/// other access; the mapping is swapped out underneath the old one.
pub struct MmapFile {
    data: MmapMut,
    file: File,
    path: PathBuf,
}

impl MmapFile {
    /// Opens `path`, creating it with `initial_len` bytes if missing or
    /// empty. Returns the mapped file and whether it was newly created.
    pub fn open(path: &Path, initial_len: u64) -> Result<(MmapFile, bool)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let is_new = file.metadata()?.len() == 0;
        if is_new {
            file.set_len(initial_len)?;
        }

        let data = unsafe { MmapMut::map_mut(&file)? };
        Ok((
            MmapFile {
                data,
                file,
                path: path.to_path_buf(),
            },
            is_new,
        ))
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grows (or shrinks) the file to `new_len` and remaps it. New bytes
    /// read as zero.
    pub fn truncate(&mut self, new_len: u64) -> Result<()> {
        self.data.flush()?;
        self.file.set_len(new_len)?;
        self.data = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// Flushes the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.data.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_dir() -> TempDir {
        TempDir::new().expect("Failed to create temporary directory")
    }

    #[test]
    fn open_creates_file_at_initial_length() {
        let temp_dir = create_temp_dir();
        let path = temp_dir.path().join("mapped");

        let (mf, is_new) = MmapFile::open(&path, 4096).expect("open failed");
        assert!(is_new);
        assert_eq!(mf.len(), 4096);
        assert!(mf.data().iter().all(|&b| b == 0));

        drop(mf);
        let (mf, is_new) = MmapFile::open(&path, 4096).expect("reopen failed");
        assert!(!is_new);
        assert_eq!(mf.len(), 4096);
    }

    #[test]
    fn truncate_grows_and_remaps() {
        let temp_dir = create_temp_dir();
        let path = temp_dir.path().join("mapped");

        let (mut mf, _) = MmapFile::open(&path, 16).expect("open failed");
        mf.data_mut()[..4].copy_from_slice(b"keep");

        mf.truncate(32).expect("truncate failed");
        assert_eq!(mf.len(), 32);
        assert_eq!(&mf.data()[..4], b"keep");
        assert!(mf.data()[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_persist_across_reopen() {
        let temp_dir = create_temp_dir();
        let path = temp_dir.path().join("mapped");

        {
            let (mut mf, _) = MmapFile::open(&path, 16).expect("open failed");
            mf.data_mut()[0] = 0xAB;
            mf.sync().expect("sync failed");
        }

        let (mf, is_new) = MmapFile::open(&path, 16).expect("reopen failed");
        assert!(!is_new);
        assert_eq!(mf.data()[0], 0xAB);
    }
}
