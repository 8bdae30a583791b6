//! Chunk planning for write and erase requests.
//!
//! The bootloader takes at most `write_latch_size` bytes per write and at
//! most 256 rows per erase, so records and erase ranges are cut into pieces
//! that each map to one command.

use crate::protocol::MAX_ERASE_BLOCKS;

use super::hex::HexRecord;

/// Chunk iteration state over a byte buffer.
#[derive(Debug, Clone)]
pub struct ChunkState {
    /// Current chunk index.
    pub current: usize,
    /// Total number of chunks.
    pub total: usize,
    /// Current byte offset.
    pub offset: usize,
    /// Size of each chunk.
    pub chunk_size: usize,
    /// Total data size.
    pub data_size: usize,
}

impl ChunkState {
    pub fn new(data_size: usize, chunk_size: usize) -> Self {
        let total = if data_size == 0 || chunk_size == 0 {
            0
        } else {
            data_size.div_ceil(chunk_size)
        };
        Self {
            current: 0,
            total,
            offset: 0,
            chunk_size,
            data_size,
        }
    }

    /// Get next chunk from data, advancing state.
    pub fn next_chunk<'a>(&mut self, data: &'a [u8]) -> Option<&'a [u8]> {
        if self.chunk_size == 0 || self.offset >= data.len() || self.offset >= self.data_size {
            return None;
        }

        let remaining = (self.data_size - self.offset).min(data.len() - self.offset);
        let chunk_len = remaining.min(self.chunk_size);

        let chunk = &data[self.offset..self.offset + chunk_len];
        self.offset += chunk_len;
        self.current += 1;

        Some(chunk)
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.total
    }
}

/// Iterator over `(address, bytes)` write chunks of one record.
#[derive(Debug, Clone)]
pub struct WriteChunks<'a> {
    base: u32,
    data: &'a [u8],
    state: ChunkState,
}

impl<'a> WriteChunks<'a> {
    pub fn new(record: &'a HexRecord, latch_size: usize) -> Self {
        Self {
            base: record.address(),
            data: record.data(),
            state: ChunkState::new(record.len(), latch_size),
        }
    }

    /// Number of write commands the record needs.
    pub fn num_chunks(&self) -> usize {
        self.state.total
    }
}

impl<'a> Iterator for WriteChunks<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.is_done() {
            return None;
        }
        let address = self.base.wrapping_add(self.state.offset as u32);
        self.state.next_chunk(self.data).map(|chunk| (address, chunk))
    }
}

/// One erase command: `blocks` rows starting at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseChunk {
    pub address: u32,
    /// Row count, 1..=256.
    pub blocks: u32,
}

/// Erase commands covering a flash range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErasePlan {
    pub chunks: Vec<EraseChunk>,
    /// Bytes at the end of the range that do not fill a whole row and are
    /// left unerased.
    pub remainder: u32,
}

impl ErasePlan {
    /// Split `[start, end)` into erase commands of at most 256 rows.
    ///
    /// Only whole rows are erased. An empty range or a zero row size yields
    /// an empty plan.
    pub fn new(start: u32, end: u32, row_size: u32) -> Self {
        let length = end.saturating_sub(start);
        if row_size == 0 {
            return Self {
                chunks: Vec::new(),
                remainder: length,
            };
        }

        let mut rows_left = length / row_size;
        let mut address = start;
        let mut chunks = Vec::new();
        while rows_left > 0 {
            let blocks = rows_left.min(MAX_ERASE_BLOCKS);
            chunks.push(EraseChunk { address, blocks });
            address += blocks * row_size;
            rows_left -= blocks;
        }

        Self {
            chunks,
            remainder: length % row_size,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        self.chunks.iter().map(|c| c.blocks).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_state() {
        let data = vec![0u8; 300];
        let mut state = ChunkState::new(data.len(), 128);
        assert_eq!(state.total, 3);
        assert_eq!(state.next_chunk(&data).unwrap().len(), 128);
        assert_eq!(state.next_chunk(&data).unwrap().len(), 128);
        assert_eq!(state.next_chunk(&data).unwrap().len(), 44);
        assert!(state.is_done());
        assert!(state.next_chunk(&data).is_none());
    }

    #[test]
    fn test_chunk_state_zero_size() {
        let mut state = ChunkState::new(10, 0);
        assert_eq!(state.total, 0);
        assert!(state.next_chunk(&[0; 10]).is_none());
    }

    #[test]
    fn test_write_chunks_split_at_latch() {
        let data: Vec<u8> = (0..130).map(|i| i as u8).collect();
        let record = HexRecord::new(0x1000, data.clone());
        let chunks = WriteChunks::new(&record, 64);
        assert_eq!(chunks.num_chunks(), 3);

        let chunks: Vec<_> = chunks.collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (0x1000, &data[0..64]));
        assert_eq!(chunks[1], (0x1040, &data[64..128]));
        assert_eq!(chunks[2], (0x1080, &data[128..130]));
    }

    #[test]
    fn test_write_chunks_exact_multiple() {
        let record = HexRecord::new(0, vec![0xAA; 128]);
        let sizes: Vec<usize> = WriteChunks::new(&record, 64).map(|(_, c)| c.len()).collect();
        assert_eq!(sizes, [64, 64]);
    }

    #[test]
    fn test_write_chunks_empty_record() {
        let record = HexRecord::new(0x200, Vec::new());
        assert_eq!(WriteChunks::new(&record, 64).next(), None);
    }

    #[test]
    fn test_erase_plan_257_rows() {
        let plan = ErasePlan::new(0x300, 0x300 + 257 * 64, 64);
        assert_eq!(
            plan.chunks,
            [
                EraseChunk {
                    address: 0x300,
                    blocks: 256
                },
                EraseChunk {
                    address: 0x300 + 256 * 64,
                    blocks: 1
                },
            ]
        );
        assert_eq!(plan.remainder, 0);
        assert_eq!(plan.total_blocks(), 257);
    }

    #[test]
    fn test_erase_plan_default_range() {
        let plan = ErasePlan::new(0x300, 0x10000, 64);
        assert_eq!(plan.total_blocks(), (0x10000 - 0x300) / 64);
        assert_eq!(plan.chunks.len(), 4);
        assert_eq!(plan.remainder, 0);
    }

    #[test]
    fn test_erase_plan_floors_partial_row() {
        let plan = ErasePlan::new(0, 100, 64);
        assert_eq!(plan.chunks, [EraseChunk { address: 0, blocks: 1 }]);
        assert_eq!(plan.remainder, 36);
    }

    #[test]
    fn test_erase_plan_degenerate() {
        assert!(ErasePlan::new(0x400, 0x300, 64).is_empty());
        assert!(ErasePlan::new(0, 0x100, 0).is_empty());
    }
}
