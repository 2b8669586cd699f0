//! Replication stream over the raw log contents
//!
//! A server drains sealed blocks for long-term retention. It needs to
//! understand the block format only far enough to track sequence
//! numbers; the stream it sees here is the raw block bytes, starting
//! with each block entry.

use syscall::error::{Error, Result, EINVAL};

use crate::log::Log;
use crate::partition::Partition;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// Streams log contents from a starting sequence number
///
/// The stream covers whole blocks from `start_sequence` through the
/// current write block; its size grows as the log does. A position
/// that falls out of the retained window mid-transfer, or lands in the
/// block being actively written, ends the stream; the consumer
/// restarts from the last sequence it stored.
pub struct Reader<'a, P: Partition> {
    log: &'a mut Log<P>,
    start_sequence: u32,
    read_pos: u32,
    done: bool,
}

impl<'a, P: Partition> Reader<'a, P> {
    pub fn new(log: &'a mut Log<P>, start_sequence: u32) -> Self {
        Self {
            log,
            start_sequence,
            read_pos: 0,
            done: false,
        }
    }

    /// Stream size in bytes, whole blocks only
    pub fn size(&self) -> u32 {
        let end = self.log.end_block().sequence;
        if end == 0 || end < self.start_sequence {
            return 0;
        }
        (end - self.start_sequence + 1) * self.log.block_size()
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    pub fn mime_type(&self) -> &'static str {
        "application/octet-stream"
    }

    /// Read from the current position, advancing it
    ///
    /// Returns 0 once the stream is finished: position at the end,
    /// nothing readable at it, or the log refused the read.
    pub fn read(&mut self, buffer: &mut [u8]) -> usize {
        if buffer.is_empty() || self.done {
            return 0;
        }

        let block_size = self.log.block_size();
        let sequence = self.start_sequence + self.read_pos / block_size;
        let offset = self.read_pos % block_size;

        let remaining = self.size().saturating_sub(self.read_pos);
        let len = (buffer.len() as u32).min(remaining);
        if len == 0 {
            self.done = true;
            return 0;
        }

        match self.log.read(sequence, offset, &mut buffer[..len as usize]) {
            Ok(0) | Err(_) => {
                self.done = true;
                0
            }
            Ok(count) => {
                self.read_pos += count as u32;
                count
            }
        }
    }

    /// Move the read position
    ///
    /// All three origins are accepted. Seeking to the exact stream end
    /// finishes the stream; seeking beyond it fails.
    pub fn seek(&mut self, offset: i32, origin: SeekOrigin) -> Result<u32> {
        let size = self.size();
        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => i64::from(self.read_pos),
            SeekOrigin::End => i64::from(size),
        };

        let new_pos = base + i64::from(offset);
        if new_pos < 0 || new_pos > i64::from(size) {
            return Err(Error::new(EINVAL));
        }

        if new_pos as u32 == size {
            self.done = true;
        }
        self.read_pos = new_pos as u32;
        Ok(self.read_pos)
    }
}

#[cfg(test)]
use crate::entry::{BlockStart, Data};
#[cfg(test)]
use crate::PartitionMemory;

#[cfg(test)]
fn filled_log() -> Log<PartitionMemory> {
    let partition = PartitionMemory::new(4 * 4096, 4096);
    let mut log = Log::open_with(partition, 1, Some(4)).unwrap();
    let row = [0x11u8; 1000];
    while log.end_block().sequence < 3 {
        log.write(&Data::new(0, 1), &row).unwrap();
    }
    log
}

#[test]
fn stream_read_test() {
    let mut log = filled_log();
    let start = log.start_block().sequence;
    let end = log.end_block().sequence;

    let mut reader = Reader::new(&mut log, start);
    assert_eq!(reader.size(), (end - start + 1) * 4096);
    assert_eq!(reader.mime_type(), "application/octet-stream");

    // The stream opens with the oldest block entry
    let mut buffer = [0u8; 12];
    assert_eq!(reader.read(&mut buffer), 12);
    let mut block_start = BlockStart::default();
    block_start.copy_from_slice(&buffer);
    assert!(block_start.is_valid());
    assert_eq!(block_start.sequence(), start);

    // Drain the rest; the tail of the write block is unreadable
    let mut total = 12;
    let mut chunk = [0u8; 1536];
    loop {
        let count = reader.read(&mut chunk);
        if count == 0 {
            break;
        }
        total += count;
    }
    assert!(reader.is_finished());

    // Everything up to the write position was delivered
    let expected = (end - start) * 4096 + (log.write_offset() % 4096);
    assert_eq!(total as u32, expected);
}

#[test]
fn seek_test() {
    let mut log = filled_log();
    let start = log.start_block().sequence;

    let mut reader = Reader::new(&mut log, start);
    let size = reader.size();

    assert_eq!(reader.seek(100, SeekOrigin::Start).unwrap(), 100);
    assert_eq!(reader.seek(-50, SeekOrigin::Current).unwrap(), 50);
    assert_eq!(reader.seek(-4096, SeekOrigin::End).unwrap(), size - 4096);

    assert!(reader.seek(1, SeekOrigin::End).is_err());
    assert!(reader.seek(-1, SeekOrigin::Start).is_err());

    assert!(!reader.is_finished());
    assert_eq!(reader.seek(0, SeekOrigin::End).unwrap(), size);
    assert!(reader.is_finished());
}

#[test]
fn stale_start_test() {
    let mut log = filled_log();
    let row = [0x22u8; 1000];
    // Push the window well past sequence 1
    while log.start_block().sequence < 3 {
        log.write(&Data::new(0, 1), &row).unwrap();
    }

    let mut reader = Reader::new(&mut log, 1);
    let mut buffer = [0u8; 64];
    assert_eq!(reader.read(&mut buffer), 0);
    assert!(reader.is_finished());
}
