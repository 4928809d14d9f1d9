//! Per-bus block buffer (C5): two fixed-size blocks per bus mediating the
//! handoff between the RX ingest task and the log writer task.
//!
//! The critical section around every state transition is a short
//! `parking_lot::Mutex`, matching the original firmware's
//! `portENTER_CRITICAL` window: the lock is held only across a bounded
//! memcpy and a couple of field writes, never across storage I/O.

use parking_lot::Mutex;

/// Default block capacity in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Blocks per bus.
pub const BLOCK_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    RxActive,
    Ready,
    InFlight,
}

struct Block {
    data: Vec<u8>,
    len: usize,
    frames: u32,
    state: BlockState,
}

impl Block {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            len: 0,
            frames: 0,
            state: BlockState::Free,
        }
    }
}

struct Inner {
    blocks: [Block; BLOCK_COUNT],
    active_index: Option<usize>,
    drops: u64,
    high_water_bytes: usize,
    capacity: usize,
}

impl Inner {
    fn sum_len(&self) -> usize {
        self.blocks.iter().map(|b| b.len).sum()
    }
}

/// A bus's pair of blocks plus bookkeeping counters.
pub struct BlockBuffer {
    inner: Mutex<Inner>,
}

/// A block handed off from `acquire_ready`, ready to be flushed to storage.
pub struct ReadyBlock {
    pub index: usize,
    pub bytes: Vec<u8>,
    pub frames: u32,
}

impl BlockBuffer {
    pub fn new(block_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                blocks: [Block::new(block_size), Block::new(block_size)],
                active_index: None,
                drops: 0,
                high_water_bytes: 0,
                capacity: block_size,
            }),
        }
    }

    /// Append `line` (one already-serialized frame) into the current
    /// RxActive block, rotating to a Free block if the active one doesn't
    /// have room. Returns `false` (and bumps `drops`) if no block is
    /// available at all.
    pub fn produce(&self, line: &[u8]) -> bool {
        let mut inner = self.inner.lock();

        if let Some(idx) = inner.active_index {
            if inner.blocks[idx].len + line.len() > inner.capacity {
                inner.blocks[idx].state = BlockState::Ready;
                inner.active_index = None;
            }
        }

        if inner.active_index.is_none() {
            let free_idx = inner
                .blocks
                .iter()
                .position(|b| b.state == BlockState::Free);
            match free_idx {
                Some(idx) => {
                    inner.blocks[idx].state = BlockState::RxActive;
                    inner.active_index = Some(idx);
                }
                None => {
                    inner.drops += 1;
                    return false;
                }
            }
        }

        let idx = inner.active_index.unwrap();
        let capacity = inner.capacity;
        let block = &mut inner.blocks[idx];
        let end = block.len + line.len();
        block.data[block.len..end].copy_from_slice(line);
        block.len = end;
        block.frames += 1;
        if block.len + 1 > capacity {
            // no room left for even a minimal future line; close it out now
            block.state = BlockState::Ready;
            drop(block);
            inner.active_index = None;
        }

        let sum = inner.sum_len();
        if sum > inner.high_water_bytes {
            inner.high_water_bytes = sum;
        }

        true
    }

    /// Mark the current RxActive block Ready even if it isn't full yet.
    /// Called when the producer is closing out (stopping ingest) so a
    /// partially-filled block still reaches the writer instead of sitting
    /// forever in RxActive.
    pub fn flush_active(&self) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.active_index.take() {
            if inner.blocks[idx].len > 0 {
                inner.blocks[idx].state = BlockState::Ready;
            } else {
                inner.blocks[idx].state = BlockState::Free;
            }
        }
    }

    /// Take the first Ready block (if any) and mark it InFlight.
    pub fn acquire_ready(&self) -> Option<ReadyBlock> {
        let mut inner = self.inner.lock();
        let idx = inner
            .blocks
            .iter()
            .position(|b| b.state == BlockState::Ready)?;
        inner.blocks[idx].state = BlockState::InFlight;
        let block = &inner.blocks[idx];
        Some(ReadyBlock {
            index: idx,
            bytes: block.data[..block.len].to_vec(),
            frames: block.frames,
        })
    }

    /// Release a previously-acquired InFlight block back to Free.
    pub fn release(&self, index: usize) {
        let mut inner = self.inner.lock();
        let block = &mut inner.blocks[index];
        block.len = 0;
        block.frames = 0;
        block.state = BlockState::Free;
    }

    pub fn drops(&self) -> u64 {
        self.inner.lock().drops
    }

    pub fn high_water_bytes(&self) -> usize {
        self.inner.lock().high_water_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_then_acquire_round_trips_bytes() {
        let buf = BlockBuffer::new(64);
        assert!(buf.produce(b"hello\n"));
        let ready = buf.acquire_ready();
        assert!(ready.is_none(), "block not full yet, should not be ready");
    }

    #[test]
    fn rotation_on_capacity_exhaustion() {
        let buf = BlockBuffer::new(10);
        assert!(buf.produce(b"12345")); // 5 bytes, active block now has 5/10
        assert!(buf.produce(b"67890")); // fills to 10/10 exactly -> marked ready
        let ready = buf.acquire_ready().expect("one ready block");
        assert_eq!(ready.bytes, b"1234567890");
        assert_eq!(ready.frames, 2);
    }

    #[test]
    fn drop_when_both_blocks_busy() {
        let buf = BlockBuffer::new(4);
        assert!(buf.produce(b"ab")); // fills block 0 to 2/4
        assert!(buf.produce(b"cd")); // fills to 4/4 -> ready, rotates out
        assert!(buf.produce(b"ef")); // goes into block 1
        assert!(buf.produce(b"gh")); // fills block 1 -> ready

        // Neither block ever got released, so a third batch has nowhere to go.
        assert!(!buf.produce(b"xx"));
        assert_eq!(buf.drops(), 1);
    }

    #[test]
    fn release_frees_block_for_reuse() {
        let buf = BlockBuffer::new(4);
        buf.produce(b"ab");
        buf.produce(b"cd"); // block 0 ready
        let ready = buf.acquire_ready().unwrap();
        buf.release(ready.index);
        assert!(buf.produce(b"ef")); // block 0 is free again
    }

    #[test]
    fn flush_active_promotes_partial_block_to_ready() {
        let buf = BlockBuffer::new(8192);
        buf.produce(b"hello\n");
        assert!(buf.acquire_ready().is_none(), "block not full yet");
        buf.flush_active();
        let ready = buf.acquire_ready().expect("flush should make the partial block ready");
        assert_eq!(ready.bytes, b"hello\n");
        assert_eq!(ready.frames, 1);
    }

    #[test]
    fn flush_active_on_empty_buffer_is_a_no_op() {
        let buf = BlockBuffer::new(8192);
        buf.flush_active();
        assert!(buf.acquire_ready().is_none());
    }

    #[test]
    fn high_water_tracks_peak_combined_len() {
        let buf = BlockBuffer::new(100);
        buf.produce(b"12345");
        assert_eq!(buf.high_water_bytes(), 5);
        buf.produce(b"12345");
        assert_eq!(buf.high_water_bytes(), 10);
    }
}
