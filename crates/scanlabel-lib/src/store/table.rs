/// Byte length and derived byte offset of one frame's block in a data file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    pub size: u64,
    pub offset: u64,
}

/// Per-frame block sizes for one data file, with offsets derived by prefix sum.
///
/// Offsets are never edited directly. Every mutation of a size goes through
/// [`SizeTable::set_size`] or [`SizeTable::from_sizes`], both of which
/// recompute the offsets, so `offset[f] == sum(size[..f])` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeTable {
    slots: Vec<Slot>,
}

impl SizeTable {
    pub fn new(frames: usize) -> Self {
        Self {
            slots: vec![Slot::default(); frames],
        }
    }

    pub fn from_sizes(sizes: impl IntoIterator<Item = u64>) -> Self {
        let mut slots: Vec<Slot> = sizes
            .into_iter()
            .map(|size| Slot { size, offset: 0 })
            .collect();
        prefix_offsets(&mut slots);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, frame: usize) -> Slot {
        self.slots[frame]
    }

    pub fn size(&self, frame: usize) -> u64 {
        self.slots[frame].size
    }

    pub fn offset(&self, frame: usize) -> u64 {
        self.slots[frame].offset
    }

    pub fn set_size(&mut self, frame: usize, size: u64) {
        self.slots[frame].size = size;
        prefix_offsets(&mut self.slots);
    }

    /// Total bytes covered by the table, i.e. the expected data file length.
    pub fn total(&self) -> u64 {
        self.slots.last().map(|s| s.offset + s.size).unwrap_or(0)
    }

    /// Bytes owned by frames after `frame`.
    pub fn tail_bytes(&self, frame: usize) -> u64 {
        self.total() - (self.offset(frame) + self.size(frame))
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::default());
    }

    /// Grow or shrink to `frames` slots; new slots are empty.
    pub fn resize(&mut self, frames: usize) {
        self.slots.resize(frames, Slot::default());
        prefix_offsets(&mut self.slots);
    }

    /// Nonempty frames in ascending order.
    pub fn written(&self) -> impl Iterator<Item = (usize, Slot)> + '_ {
        self.slots
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, slot)| slot.size != 0)
    }

    pub fn sizes(&self) -> impl Iterator<Item = u64> + '_ {
        self.slots.iter().map(|s| s.size)
    }
}

/// Rewrite every offset as the sum of the sizes before it.
fn prefix_offsets(slots: &mut [Slot]) {
    let mut running = 0u64;
    for slot in slots {
        slot.offset = running;
        running += slot.size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_prefix_sums() {
        let table = SizeTable::from_sizes([8, 0, 4, 12]);
        let offsets: Vec<u64> = (0..4).map(|f| table.offset(f)).collect();
        assert_eq!(offsets, vec![0, 8, 8, 12]);
        assert_eq!(table.total(), 24);
    }

    #[test]
    fn set_size_shifts_later_offsets() {
        let mut table = SizeTable::from_sizes([0, 0, 16]);
        table.set_size(0, 4);
        assert_eq!(table.offset(2), 4);
        table.set_size(1, 8);
        assert_eq!(table.offset(2), 12);
        assert_eq!(table.tail_bytes(1), 16);
    }

    #[test]
    fn written_skips_empty_frames() {
        let table = SizeTable::from_sizes([0, 8, 0, 4]);
        let frames: Vec<usize> = table.written().map(|(f, _)| f).collect();
        assert_eq!(frames, vec![1, 3]);
    }

    #[test]
    fn resize_keeps_existing_sizes() {
        let mut table = SizeTable::from_sizes([4, 4]);
        table.resize(4);
        assert_eq!(table.len(), 4);
        assert_eq!(table.offset(3), 8);
        table.clear();
        assert_eq!(table.total(), 0);
    }
}
