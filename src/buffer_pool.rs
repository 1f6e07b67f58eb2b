//! Reusable EventFifo read buffers.
//!
//! The pool owns a fixed set of [`FifoBuffer`]s. A buffer is either on the free list or owned by
//! whoever acquired it; handing it back with [`BufferPool::release`] consumes it, so a buffer
//! can only be released by its current owner.
use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Largest number of bytes the device returns from a single EventFifo read.
pub const EVENT_FIFO_SIZE: usize = 4096;
/// Slack allocated on top of [`EVENT_FIFO_SIZE`] so alignment never eats into the payload.
pub const FIFO_ALIGNMENT_SLACK: usize = 4;

/// One EventFifo read buffer.
///
/// The usable region starts at the first 4-byte aligned address of the backing allocation and
/// its length is a multiple of 4.
#[derive(Debug)]
pub struct FifoBuffer {
    id: usize,
    data: Vec<u8>,
    offset: usize,
    capacity: usize,
    len: usize,
}

impl FifoBuffer {
    fn new(id: usize, data: Vec<u8>) -> Result<FifoBuffer> {
        let address = data.as_ptr() as usize;
        let offset = (4 - address % 4) % 4;
        let capacity = data.len().saturating_sub(offset) / 4 * 4;
        if capacity < EVENT_FIFO_SIZE {
            return Err(Error::BufferTooSmall {
                usable: capacity,
                required: EVENT_FIFO_SIZE,
            });
        }
        Ok(FifoBuffer {
            id,
            data,
            offset,
            capacity,
            len: 0,
        })
    }

    /// Pool-assigned identity, stable for the life of the pool
    pub fn id(&self) -> usize {
        self.id
    }

    /// Usable bytes after alignment
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes filled by the last read
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole usable region, for a transport to read device bytes into.
    ///
    /// Follow with [`FifoBuffer::set_len`] to mark how much was written.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.offset..self.offset + self.capacity]
    }

    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.capacity {
            return Err(Error::Program(format!(
                "Fill length {} exceeds buffer capacity {}",
                len, self.capacity
            )));
        }
        self.len = len;
        Ok(())
    }

    /// Copy `bytes` into the buffer and mark them filled.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity {
            return Err(Error::Program(format!(
                "{} bytes do not fit in a {} byte buffer",
                bytes.len(),
                self.capacity
            )));
        }
        self.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    /// The filled bytes
    pub fn data(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }
}

/// Fixed set of [`FifoBuffer`]s with a FIFO free list.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<VecDeque<FifoBuffer>>,
    capacity: usize,
}

impl BufferPool {
    /// Wrap the given byte regions, placing every one of them on the free list.
    pub fn new(regions: Vec<Vec<u8>>) -> Result<BufferPool> {
        let buffers = regions
            .into_iter()
            .enumerate()
            .map(|(id, data)| FifoBuffer::new(id, data))
            .collect::<Result<VecDeque<_>>>()?;
        Ok(BufferPool {
            capacity: buffers.len(),
            free: Mutex::new(buffers),
        })
    }

    /// Allocate `count` buffers of `size` bytes each.
    pub fn with_buffers(count: usize, size: usize) -> Result<BufferPool> {
        BufferPool::new((0..count).map(|_| vec![0u8; size]).collect())
    }

    /// Take the buffer at the front of the free list.
    pub fn acquire(&self) -> Option<FifoBuffer> {
        let buffer = self.free.lock().pop_front();
        if buffer.is_none() {
            warn!("FIFO buffer pool exhausted");
        }
        buffer
    }

    /// Return a buffer to the back of the free list.
    ///
    /// Returns true when the free list was empty beforehand, meaning the producer was stalled
    /// and needs to be re-armed.
    pub fn release(&self, mut buffer: FifoBuffer) -> bool {
        buffer.len = 0;
        let mut free = self.free.lock();
        debug_assert!(free.len() < self.capacity);
        let was_empty = free.is_empty();
        free.push_back(buffer);
        was_empty
    }

    /// Buffers currently on the free list
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Total buffers owned by the pool
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
