use super::error::{StoreError, StoreResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn open_rw(path: &Path) -> StoreResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| StoreError::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

/// Flat file of concatenated per-frame blocks. Every access seeks explicitly.
#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
    file: File,
}

impl DataFile {
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            file: open_rw(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> StoreResult<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(StoreError::io("stat", &self.path))
    }

    pub fn read_at(&mut self, offset: u64, len: u64) -> StoreResult<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(StoreError::io("read", &self.path))?;
        Ok(buf)
    }

    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StoreResult<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(bytes))
            .map_err(StoreError::io("write", &self.path))
    }

    /// Append `len` bytes starting at `offset` to `out`.
    pub fn copy_out(&mut self, offset: u64, len: u64, out: &mut impl Write) -> StoreResult<u64> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(StoreError::io("seek", &self.path))?;
        io::copy(&mut (&mut self.file).take(len), out).map_err(StoreError::io("copy", &self.path))
    }

    /// Overwrite from `offset` with everything `src` yields.
    pub fn copy_in(&mut self, offset: u64, src: &mut impl Read) -> StoreResult<u64> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(StoreError::io("seek", &self.path))?;
        io::copy(src, &mut self.file).map_err(StoreError::io("copy", &self.path))
    }

    pub fn truncate(&mut self, len: u64) -> StoreResult<()> {
        self.file
            .set_len(len)
            .map_err(StoreError::io("truncate", &self.path))
    }

    pub fn flush(&mut self) -> StoreResult<()> {
        self.file.flush().map_err(StoreError::io("flush", &self.path))
    }

    pub fn cursor(&mut self) -> StoreResult<u64> {
        self.file
            .stream_position()
            .map_err(StoreError::io("tell", &self.path))
    }

    pub fn restore_cursor(&mut self, pos: u64) -> StoreResult<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(StoreError::io("seek", &self.path))
    }
}

/// Width of one little-endian slot in a size file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWidth {
    U32,
    U64,
}

impl SlotWidth {
    pub fn bytes(self) -> u64 {
        match self {
            SlotWidth::U32 => 4,
            SlotWidth::U64 => 8,
        }
    }

    fn encode(self, value: u64, out: &mut Vec<u8>) {
        match self {
            SlotWidth::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
            SlotWidth::U64 => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    fn decode(self, chunk: &[u8]) -> u64 {
        match self {
            SlotWidth::U32 => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as u64,
            SlotWidth::U64 => u64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]),
        }
    }
}

/// Fixed-slot table of per-frame block sizes: slot `f` lives at `f * width`.
#[derive(Debug)]
pub struct SizeFile {
    path: PathBuf,
    file: File,
    width: SlotWidth,
}

impl SizeFile {
    pub fn open(path: &Path, width: SlotWidth) -> StoreResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            file: open_rw(path)?,
            width,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        self.file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(StoreError::io("stat", &self.path))
    }

    /// Every slot in the file, in frame order. A trailing partial slot is an error.
    pub fn read_slots(&mut self) -> StoreResult<Vec<u64>> {
        let mut bytes = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut bytes))
            .map_err(StoreError::io("read", &self.path))?;
        let width = self.width.bytes() as usize;
        if bytes.len() % width != 0 {
            return Err(StoreError::CorruptSizeTable {
                path: self.path.clone(),
                reason: format!("{} bytes is not a whole number of {width}-byte slots", bytes.len()),
            });
        }
        Ok(bytes.chunks_exact(width).map(|c| self.width.decode(c)).collect())
    }

    pub fn write_slot(&mut self, frame: usize, size: u64) -> StoreResult<()> {
        let mut buf = Vec::with_capacity(8);
        self.width.encode(size, &mut buf);
        self.file
            .seek(SeekFrom::Start(frame as u64 * self.width.bytes()))
            .and_then(|_| self.file.write_all(&buf))
            .map_err(StoreError::io("write", &self.path))
    }

    /// Replace the whole file with exactly the given slots.
    pub fn rewrite(&mut self, sizes: impl Iterator<Item = u64>) -> StoreResult<()> {
        let mut buf = Vec::new();
        for size in sizes {
            self.width.encode(size, &mut buf);
        }
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(&buf))
            .and_then(|_| self.file.flush())
            .map_err(StoreError::io("rewrite", &self.path))
    }

    pub fn truncate(&mut self) -> StoreResult<()> {
        self.file
            .set_len(0)
            .map_err(StoreError::io("truncate", &self.path))
    }
}

/// Scratch file staging the bytes that an insertion has to move.
///
/// The file is created once next to the data it stages, truncated before each
/// use, and removed when dropped.
#[derive(Debug)]
pub struct Spill {
    file: NamedTempFile,
}

impl Spill {
    pub fn create_in(dir: &Path, prefix: &str) -> StoreResult<Self> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(dir)
            .map_err(|source| StoreError::StorageUnavailable {
                path: dir.join(prefix),
                source,
            })?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn reset(&mut self) -> StoreResult<()> {
        let path = self.file.path().to_path_buf();
        let f = self.file.as_file_mut();
        f.set_len(0)
            .and_then(|_| f.seek(SeekFrom::Start(0)).map(|_| ()))
            .map_err(StoreError::io("truncate", path))
    }

    pub fn writer(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Flush to disk and check the staged length before anything destructive happens.
    pub fn seal(&mut self, expected: u64) -> StoreResult<()> {
        let path = self.file.path().to_path_buf();
        let f = self.file.as_file_mut();
        f.flush()
            .and_then(|_| f.sync_all())
            .map_err(StoreError::io("sync", &path))?;
        let written = f
            .metadata()
            .map(|m| m.len())
            .map_err(StoreError::io("stat", &path))?;
        if written != expected {
            return Err(StoreError::IncompleteSpill {
                path,
                expected,
                written,
            });
        }
        f.seek(SeekFrom::Start(0))
            .map(|_| ())
            .map_err(StoreError::io("seek", &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn size_file_slots_are_fixed_width() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sizes.bin");
        let mut sizes = SizeFile::open(&path, SlotWidth::U64).unwrap();
        sizes.rewrite([0u64, 0, 0].into_iter()).unwrap();
        sizes.write_slot(1, 160).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);
        assert_eq!(sizes.read_slots().unwrap(), vec![0, 160, 0]);
    }

    #[test]
    fn partial_slot_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sizes.bin");
        std::fs::write(&path, [1u8, 0, 0]).unwrap();
        let mut sizes = SizeFile::open(&path, SlotWidth::U32).unwrap();
        assert!(matches!(
            sizes.read_slots(),
            Err(StoreError::CorruptSizeTable { .. })
        ));
    }

    #[test]
    fn spill_seal_detects_short_write() {
        let dir = tempdir().unwrap();
        let mut spill = Spill::create_in(dir.path(), ".spill-test").unwrap();
        spill.writer().write_all(&[1, 2, 3]).unwrap();
        assert!(matches!(
            spill.seal(4),
            Err(StoreError::IncompleteSpill { written: 3, .. })
        ));
        spill.reset().unwrap();
        spill.writer().write_all(&[9; 4]).unwrap();
        spill.seal(4).unwrap();
    }

    #[test]
    fn spill_file_is_removed_on_drop() {
        let dir = tempdir().unwrap();
        let spill = Spill::create_in(dir.path(), ".spill-test").unwrap();
        let path = spill.path().to_path_buf();
        assert!(path.exists());
        drop(spill);
        assert!(!path.exists());
    }
}
