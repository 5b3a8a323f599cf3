//! Frame-indexed record store.
//!
//! Each frame owns one block in the feature data file and one block in the
//! label data file. Blocks are stored back to back in frame order with no gaps
//! for unwritten frames, so writing a frame that sits before already-written
//! frames moves everything after it. Block sizes are mirrored in two fixed-slot
//! size files, and offsets are rebuilt from them on open.

pub mod codec;
mod error;
mod file;
mod table;

pub use error::{StoreError, StoreResult};
pub use table::{SizeTable, Slot};

use crate::scan::{is_valid_label, FeatureRow};
use codec::{LABEL_BYTES, ROW_BYTES};
use file::{DataFile, SizeFile, SlotWidth, Spill};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Locations of the four files backing a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePaths {
    pub feature_data: PathBuf,
    pub feature_sizes: PathBuf,
    pub label_data: PathBuf,
    pub label_sizes: PathBuf,
}

impl StorePaths {
    /// Default file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            feature_data: dir.join("feature_bin"),
            feature_sizes: dir.join("feature_num_bin"),
            label_data: dir.join("label_bin"),
            label_sizes: dir.join("label_num_bin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Features,
    Labels,
}

impl RecordKind {
    fn unit(self) -> u64 {
        match self {
            RecordKind::Features => ROW_BYTES,
            RecordKind::Labels => LABEL_BYTES,
        }
    }
}

/// One data file with its size file, size table and spill file.
#[derive(Debug)]
struct Column {
    kind: RecordKind,
    data: DataFile,
    sizes: SizeFile,
    table: SizeTable,
    spill: Spill,
}

impl Column {
    fn open(
        kind: RecordKind,
        data: &Path,
        sizes: &Path,
        width: SlotWidth,
        frames: usize,
    ) -> StoreResult<Self> {
        let dir = data
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = match kind {
            RecordKind::Features => ".spill-features",
            RecordKind::Labels => ".spill-labels",
        };
        Ok(Self {
            kind,
            data: DataFile::open(data)?,
            sizes: SizeFile::open(sizes, width)?,
            table: SizeTable::new(frames),
            spill: Spill::create_in(dir, prefix)?,
        })
    }

    /// Read persisted sizes, padded to `frames` slots. Records past `frames`
    /// are kept, so the result may be longer.
    fn load_sizes(&mut self, frames: usize) -> StoreResult<Vec<u64>> {
        let mut sizes = self.sizes.read_slots()?;
        let used = sizes.iter().rposition(|&s| s != 0).map_or(0, |f| f + 1);
        sizes.resize(frames.max(used), 0);
        if let Some((frame, size)) = sizes
            .iter()
            .enumerate()
            .find(|(_, s)| **s % self.kind.unit() != 0)
        {
            return Err(StoreError::CorruptSizeTable {
                path: self.sizes.path().to_path_buf(),
                reason: format!(
                    "frame {frame} size {size} is not a multiple of {}",
                    self.kind.unit()
                ),
            });
        }
        Ok(sizes)
    }

    fn install(&mut self, sizes: Vec<u64>) -> StoreResult<()> {
        self.table = SizeTable::from_sizes(sizes);
        let data_len = self.data.len()?;
        if data_len != self.table.total() {
            return Err(StoreError::CorruptSizeTable {
                path: self.sizes.path().to_path_buf(),
                reason: format!(
                    "sizes cover {} bytes but {} holds {data_len}",
                    self.table.total(),
                    self.data.path().display()
                ),
            });
        }
        self.sizes.rewrite(self.table.sizes())
    }

    /// Copy every block after `frame` into the spill file when writing
    /// `new_size` bytes at `frame` would move them. Returns the staged length.
    fn stage_tail(&mut self, frame: usize, new_size: u64) -> StoreResult<Option<u64>> {
        let tail = self.table.tail_bytes(frame);
        if new_size == self.table.size(frame) || tail == 0 {
            return Ok(None);
        }
        self.spill.reset()?;
        let later: Vec<Slot> = self
            .table
            .written()
            .filter(|(f, _)| *f > frame)
            .map(|(_, slot)| slot)
            .collect();
        for slot in later {
            self.data.copy_out(slot.offset, slot.size, self.spill.writer())?;
        }
        self.spill.seal(tail)?;
        debug!(
            "{:?}: staged {tail} bytes after frame {frame} in {}",
            self.kind,
            self.spill.path().display()
        );
        Ok(Some(tail))
    }

    /// Write `bytes` as the block for `frame`, then put back anything staged.
    fn commit(&mut self, frame: usize, bytes: &[u8], staged: Option<u64>) -> StoreResult<()> {
        let old_total = self.table.total();
        self.table.set_size(frame, bytes.len() as u64);
        let offset = self.table.offset(frame);
        self.data.write_at(offset, bytes)?;
        if let Some(expected) = staged {
            let copied = self
                .data
                .copy_in(offset + bytes.len() as u64, self.spill.writer())?;
            if copied != expected {
                return Err(StoreError::IncompleteSpill {
                    path: self.spill.path().to_path_buf(),
                    expected,
                    written: copied,
                });
            }
        }
        let total = self.table.total();
        if total < old_total {
            self.data.truncate(total)?;
        }
        self.data.flush()?;
        self.sizes.write_slot(frame, bytes.len() as u64)
    }

    fn read(&mut self, frame: usize) -> StoreResult<Option<Vec<u8>>> {
        let slot = self.table.slot(frame);
        if slot.size == 0 {
            return Ok(None);
        }
        self.data.read_at(slot.offset, slot.size).map(Some)
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.data.truncate(0)?;
        self.sizes.truncate()?;
        self.table.clear();
        Ok(())
    }

    fn export(&mut self, out: impl Write) -> StoreResult<usize> {
        let saved = self.data.cursor()?;
        let result = self.export_inner(out);
        self.data.restore_cursor(saved)?;
        result
    }

    fn export_inner(&mut self, out: impl Write) -> StoreResult<usize> {
        let path = self.data.path().to_path_buf();
        let to_io = |e: csv::Error| StoreError::Io {
            op: "export",
            path: path.clone(),
            source: io::Error::from(e),
        };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .terminator(csv::Terminator::Any(b'\n'))
            .has_headers(false)
            .from_writer(out);
        let frames: Vec<Slot> = self.table.written().map(|(_, slot)| slot).collect();
        let mut lines = 0;
        for slot in frames {
            let bytes = self.data.read_at(slot.offset, slot.size)?;
            match self.kind {
                RecordKind::Features => {
                    for row in codec::decode_features(&bytes) {
                        writer
                            .write_record(row.iter().map(|v| v.to_string()))
                            .map_err(to_io)?;
                        lines += 1;
                    }
                }
                RecordKind::Labels => {
                    for label in codec::decode_labels(&bytes) {
                        writer.write_record([label.to_string()]).map_err(to_io)?;
                        lines += 1;
                    }
                }
            }
        }
        writer
            .flush()
            .map_err(StoreError::io("export", self.data.path()))?;
        Ok(lines)
    }
}

/// Durable mapping from frame index to (feature rows, labels).
#[derive(Debug)]
pub struct RecordStore {
    features: Column,
    labels: Column,
    max_frame: usize,
    written_max_frame: Option<usize>,
    frames_written: usize,
}

impl RecordStore {
    /// Open (creating if needed) the store files and rebuild the size tables.
    pub fn open(paths: &StorePaths, max_frame: usize) -> StoreResult<Self> {
        let mut store = Self {
            features: Column::open(
                RecordKind::Features,
                &paths.feature_data,
                &paths.feature_sizes,
                SlotWidth::U64,
                max_frame,
            )?,
            labels: Column::open(
                RecordKind::Labels,
                &paths.label_data,
                &paths.label_sizes,
                SlotWidth::U32,
                max_frame,
            )?,
            max_frame,
            written_max_frame: None,
            frames_written: 0,
        };
        store.bootstrap()?;
        info!(
            "opened record store: max_frame={} frames_written={} written_max_frame={:?}",
            store.max_frame, store.frames_written, store.written_max_frame
        );
        Ok(store)
    }

    fn bootstrap(&mut self) -> StoreResult<()> {
        if self.labels.sizes.is_empty()? && self.features.sizes.is_empty()? {
            if self.labels.data.len()? != 0 || self.features.data.len()? != 0 {
                warn!(
                    "size files are empty but data files are not; discarding {} and {}",
                    self.features.data.path().display(),
                    self.labels.data.path().display()
                );
                self.features.data.truncate(0)?;
                self.labels.data.truncate(0)?;
            }
            self.features.sizes.rewrite(self.features.table.sizes())?;
            self.labels.sizes.rewrite(self.labels.table.sizes())?;
            return Ok(());
        }

        let mut feature_sizes = self.features.load_sizes(self.max_frame)?;
        let mut label_sizes = self.labels.load_sizes(self.max_frame)?;
        let frames = feature_sizes.len().max(label_sizes.len());
        if frames > self.max_frame {
            warn!(
                "size files hold records up to frame {}; extending max_frame from {} to {frames}",
                frames - 1,
                self.max_frame
            );
            self.max_frame = frames;
        }
        feature_sizes.resize(frames, 0);
        label_sizes.resize(frames, 0);
        for (frame, (&fs, &ls)) in feature_sizes.iter().zip(&label_sizes).enumerate() {
            if fs / ROW_BYTES != ls / LABEL_BYTES {
                return Err(StoreError::CorruptSizeTable {
                    path: self.labels.sizes.path().to_path_buf(),
                    reason: format!(
                        "frame {frame}: {} feature rows but {} labels",
                        fs / ROW_BYTES,
                        ls / LABEL_BYTES
                    ),
                });
            }
        }
        self.features.install(feature_sizes)?;
        self.labels.install(label_sizes)?;
        self.refresh_counters();
        Ok(())
    }

    fn refresh_counters(&mut self) {
        self.frames_written = self.labels.table.written().count();
        self.written_max_frame = self.labels.table.written().map(|(f, _)| f).last();
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Highest frame ever written since the last clean.
    pub fn written_max_frame(&self) -> Option<usize> {
        self.written_max_frame
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn is_written(&self, frame: usize) -> bool {
        frame < self.max_frame && self.labels.table.size(frame) != 0
    }

    pub fn slot(&self, kind: RecordKind, frame: usize) -> Slot {
        self.column(kind).table.slot(frame)
    }

    pub fn table(&self, kind: RecordKind) -> &SizeTable {
        &self.column(kind).table
    }

    fn column(&self, kind: RecordKind) -> &Column {
        match kind {
            RecordKind::Features => &self.features,
            RecordKind::Labels => &self.labels,
        }
    }

    fn column_mut(&mut self, kind: RecordKind) -> &mut Column {
        match kind {
            RecordKind::Features => &mut self.features,
            RecordKind::Labels => &mut self.labels,
        }
    }

    fn check_frame(&self, frame: usize) -> StoreResult<()> {
        if frame >= self.max_frame {
            return Err(StoreError::FrameOutOfRange {
                frame,
                max_frame: self.max_frame,
            });
        }
        Ok(())
    }

    /// Write or overwrite the record for `frame`.
    ///
    /// When the block size at `frame` changes and later frames hold data, the
    /// later blocks of both files are staged in the spill files, synced and
    /// length-checked before either data file is touched.
    pub fn put(&mut self, frame: usize, features: &[FeatureRow], labels: &[i32]) -> StoreResult<()> {
        self.check_frame(frame)?;
        if features.len() != labels.len() {
            return Err(StoreError::SegmentCountMismatch {
                frame,
                features: features.len(),
                labels: labels.len(),
            });
        }
        if labels.is_empty() {
            return Err(StoreError::EmptyRecord { frame });
        }
        if let Some((segment, &value)) = labels
            .iter()
            .enumerate()
            .find(|(_, v)| !is_valid_label(**v))
        {
            return Err(StoreError::InvalidLabel {
                frame,
                segment,
                value,
            });
        }

        let is_new = self.labels.table.size(frame) == 0;
        let feature_bytes = codec::encode_features(features);
        let label_bytes = codec::encode_labels(labels);

        let staged_features = self.features.stage_tail(frame, feature_bytes.len() as u64)?;
        let staged_labels = self.labels.stage_tail(frame, label_bytes.len() as u64)?;
        if staged_features.is_some() || staged_labels.is_some() {
            info!(
                "frame {frame}: moving {} feature bytes and {} label bytes",
                staged_features.unwrap_or(0),
                staged_labels.unwrap_or(0)
            );
        }

        self.features.commit(frame, &feature_bytes, staged_features)?;
        self.labels.commit(frame, &label_bytes, staged_labels)?;

        self.written_max_frame = Some(self.written_max_frame.map_or(frame, |m| m.max(frame)));
        if is_new {
            self.frames_written += 1;
        }
        debug!(
            "frame {frame}: stored {} segments at feature offset {} label offset {}",
            labels.len(),
            self.features.table.offset(frame),
            self.labels.table.offset(frame)
        );
        Ok(())
    }

    /// Stored labels for `frame`, or `None` if it was never written.
    pub fn get(&mut self, frame: usize) -> StoreResult<Option<Vec<i32>>> {
        self.check_frame(frame)?;
        Ok(self.labels.read(frame)?.map(|b| codec::decode_labels(&b)))
    }

    /// Like [`RecordStore::get`], but fails with [`StoreError::SizeMismatch`]
    /// when the stored label count is not `expected`.
    pub fn get_checked(&mut self, frame: usize, expected: usize) -> StoreResult<Option<Vec<i32>>> {
        self.check_frame(frame)?;
        let stored = (self.labels.table.size(frame) / LABEL_BYTES) as usize;
        if stored != 0 && stored != expected {
            return Err(StoreError::SizeMismatch {
                frame,
                stored,
                expected,
            });
        }
        self.get(frame)
    }

    pub fn features(&mut self, frame: usize) -> StoreResult<Option<Vec<FeatureRow>>> {
        self.check_frame(frame)?;
        Ok(self.features.read(frame)?.map(|b| codec::decode_features(&b)))
    }

    /// Drop every record. All four files end up empty.
    pub fn clean(&mut self) -> StoreResult<()> {
        self.features.clear()?;
        self.labels.clear()?;
        self.written_max_frame = None;
        self.frames_written = 0;
        info!("record store cleaned");
        Ok(())
    }

    /// Clean and lay out an empty table of `max_frame` slots.
    pub fn resize(&mut self, max_frame: usize) -> StoreResult<()> {
        self.clean()?;
        self.max_frame = max_frame;
        for column in [&mut self.features, &mut self.labels] {
            column.table = SizeTable::new(max_frame);
            column.sizes.rewrite(column.table.sizes())?;
        }
        info!("record store resized to {max_frame} frames");
        Ok(())
    }

    /// Extend to at least `max_frame` slots, keeping every record.
    pub fn grow(&mut self, max_frame: usize) -> StoreResult<()> {
        if max_frame <= self.max_frame {
            return Ok(());
        }
        self.max_frame = max_frame;
        for column in [&mut self.features, &mut self.labels] {
            column.table.resize(max_frame);
            column.sizes.rewrite(column.table.sizes())?;
        }
        info!("record store grown to {max_frame} frames");
        Ok(())
    }

    /// Write one data file as text, one line per feature row or label.
    /// Returns the number of lines written. The file cursor is left where it was.
    pub fn export_text(&mut self, kind: RecordKind, out: impl Write) -> StoreResult<usize> {
        self.column_mut(kind).export(out)
    }

    pub fn export_to_path(&mut self, kind: RecordKind, path: &Path) -> StoreResult<usize> {
        let file = File::create(path).map_err(|source| StoreError::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let lines = self.export_text(kind, io::BufWriter::new(file))?;
        info!("exported {lines} {kind:?} lines to {}", path.display());
        Ok(lines)
    }

    /// Current read/write position of a data file.
    pub fn cursor(&mut self, kind: RecordKind) -> StoreResult<u64> {
        self.column_mut(kind).data.cursor()
    }
}
