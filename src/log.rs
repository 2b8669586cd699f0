//! The circular log
//!
//! The partition is treated as a ring of fixed-size blocks. Each block
//! is erased when opened and framed by a [`BlockStart`] carrying a
//! strictly increasing sequence number; when the ring wraps, the
//! oldest block is retired. Mount reconstructs the whole state from
//! the block headers alone.

use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use syscall::error::{Error, Result, EBUSY, EINVAL, ERANGE};

use crate::entry::{BlockStart, Boot, EntryInfo, Header, Kind, Time};
use crate::partition::Partition;
use crate::PAGES_PER_BLOCK;

/// A physical slot paired with the sequence number it holds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u32,
    pub sequence: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Ready,
    /// An append is in flight or was interrupted by an error
    Busy,
}

/// A circular data log bound to one partition
pub struct Log<P: Partition> {
    partition: P,
    /// Oldest live block, the one with the lowest sequence number
    start_block: BlockInfo,
    /// Current write block
    end_block: BlockInfo,
    /// Absolute offset of the next entry header, always word-aligned
    write_offset: u32,
    block_size: u32,
    total_blocks: u32,
    /// Used to assign table IDs, first allocation returns 1
    table_count: u16,
    state: State,
}

impl<P: Partition> Log<P> {
    /// Mount the log with the default geometry
    pub fn open(partition: P) -> Result<Self> {
        Self::open_with(partition, PAGES_PER_BLOCK, None)
    }

    /// Mount the log, recovering state from the partition contents
    ///
    /// Scans every block header to find the newest and oldest live
    /// blocks, then replays the newest block's entries to locate the
    /// write position. A torn entry left by an interrupted write is
    /// walked over like any other. Tolerates a completely blank
    /// partition, which mounts as an empty log.
    pub fn open_with(
        mut partition: P,
        pages_per_block: u32,
        max_blocks: Option<u32>,
    ) -> Result<Self> {
        let page_size = partition.page_size()?;
        if page_size == 0 || pages_per_block == 0 {
            return Err(Error::new(EINVAL));
        }

        let block_size = page_size * pages_per_block;
        if block_size < (mem::size_of::<BlockStart>() + mem::size_of::<Header>()) as u32 {
            return Err(Error::new(EINVAL));
        }
        // Entry and pad sizes are u16 on flash
        if block_size - mem::size_of::<Header>() as u32 > u32::from(u16::MAX) {
            return Err(Error::new(EINVAL));
        }

        let mut total_blocks = partition.size()? / block_size;
        if let Some(max) = max_blocks {
            total_blocks = total_blocks.min(max);
        }
        if total_blocks < 2 {
            return Err(Error::new(EINVAL));
        }

        // Read all block sequence numbers
        let mut sequences = vec![0u32; total_blocks as usize];
        for number in 0..total_blocks {
            let mut start = BlockStart::default();
            partition.read(number * block_size, &mut start)?;
            if start.is_valid() {
                sequences[number as usize] = start.sequence();
            }
            #[cfg(feature = "log")]
            log::debug!(
                "block #{} @ {:#010x} seq {:08x}",
                number,
                number * block_size,
                sequences[number as usize]
            );
        }

        // The write block is the one with the highest sequence
        let mut end_block = BlockInfo::default();
        for (number, &sequence) in sequences.iter().enumerate() {
            if sequence > end_block.sequence {
                end_block = BlockInfo {
                    number: number as u32,
                    sequence,
                };
            }
        }

        let mut log = Log {
            partition,
            start_block: BlockInfo::default(),
            end_block,
            write_offset: 0,
            block_size,
            total_blocks,
            table_count: 0,
            state: State::Ready,
        };

        if log.end_block.sequence == 0 {
            // Log is empty
            return Ok(log);
        }

        // Walk backwards while the ring is contiguous to find the
        // oldest block
        let mut block = log.end_block;
        loop {
            log.start_block = block;
            if block.sequence == 1 {
                break;
            }
            block.number = if block.number == 0 {
                log.total_blocks - 1
            } else {
                block.number - 1
            };
            block.sequence -= 1;
            if sequences[block.number as usize] != block.sequence {
                break;
            }
        }

        // Scan the write block for the first erased header
        log.write_offset = log.end_block.number * log.block_size;
        let end_offset = log.write_offset + log.block_size;
        loop {
            let mut header = Header::default();
            log.partition.read(log.write_offset, &mut header)?;
            if header.is_erased() {
                break;
            }
            log.write_offset += header.entry_len();
            if log.write_offset >= end_offset {
                break;
            }
        }
        if log.write_offset > end_offset {
            #[cfg(feature = "log")]
            log::warn!("end block {:08x} scan overflowed", log.end_block.sequence);
            log.write_offset = end_offset;
        }

        #[cfg(feature = "log")]
        {
            log::debug!(
                "start block #{} seq {:08x}",
                log.start_block.number,
                log.start_block.sequence
            );
            log::debug!(
                "end block #{} seq {:08x}",
                log.end_block.number,
                log.end_block.sequence
            );
            log::debug!("write offset {:#010x}", log.write_offset);
        }

        Ok(log)
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Oldest live block
    pub fn start_block(&self) -> BlockInfo {
        self.start_block
    }

    /// Current write block
    pub fn end_block(&self) -> BlockInfo {
        self.end_block
    }

    /// Absolute offset where the next entry header will land
    pub fn write_offset(&self) -> u32 {
        self.write_offset
    }

    /// Number of blocks written since the oldest live one
    pub fn full_block_count(&self) -> u32 {
        self.end_block.sequence - self.start_block.sequence
    }

    pub fn partition_mut(&mut self) -> &mut P {
        &mut self.partition
    }

    pub fn into_partition(self) -> P {
        self.partition
    }

    /// Allocate the next table ID
    pub fn allocate_table_id(&mut self) -> u16 {
        self.table_count += 1;
        self.table_count
    }

    /// Append one entry, committing it with a second header write
    ///
    /// The entry is `info` followed by `data`, written contiguously.
    /// An entry never straddles a block boundary: if it does not fit in
    /// the current block the remainder is padded out and a fresh block
    /// is opened, retiring the oldest one once the ring has wrapped.
    ///
    /// Fails with `EINVAL` if the entry can never fit in a block. A
    /// partition error leaves the log busy; the next append skips
    /// whatever the interrupted one left behind.
    pub fn write_entry(&mut self, kind: Kind, info: &[u8], data: &[u8]) -> Result<()> {
        let payload = info.len() + data.len();
        let entry_size = mem::size_of::<Header>() + payload;
        // The block entry always consumes the head of each block
        if entry_size > self.block_size as usize - mem::size_of::<BlockStart>() {
            return Err(Error::new(EINVAL));
        }

        if self.state == State::Busy {
            // The previous call was interrupted, possibly by a crash
            // handler firing mid-write. Skip the abandoned entry.
            if self.write_offset % self.block_size != 0 {
                self.write_offset %= self.block_size * self.total_blocks;
                let mut header = Header::default();
                self.partition.read(self.write_offset, &mut header)?;
                if !header.is_erased() {
                    self.write_offset += header.entry_len();
                }
            }
        }
        self.state = State::Busy;

        let space = self.block_size - (self.write_offset % self.block_size);
        if space < entry_size as u32 {
            self.seal_block(space)?;
        }

        if self.write_offset % self.block_size == 0 {
            self.open_block()?;
        }

        #[cfg(feature = "log")]
        log::trace!("> {} {} @ {:#010x}", kind, payload, self.write_offset);

        let mut header = Header::new(kind, payload as u16);
        self.partition.write(self.write_offset, &header)?;
        self.partition
            .write(self.write_offset + mem::size_of::<Header>() as u32, info)?;
        if !data.is_empty() {
            self.partition.write(
                self.write_offset + (mem::size_of::<Header>() + info.len()) as u32,
                data,
            )?;
        }
        // Clearing the invalid bit commits the entry
        header.commit();
        self.partition.write(self.write_offset, &header)?;

        self.write_offset += header.entry_len();
        self.state = State::Ready;
        Ok(())
    }

    /// Append a typed entry with its trailing variable part
    pub fn write<T: EntryInfo>(&mut self, info: &T, data: &[u8]) -> Result<()> {
        self.write_entry(T::KIND, &**info, data)
    }

    /// Record the platform reset reason
    pub fn write_boot(&mut self, reason: u8) -> Result<()> {
        self.write(&Boot { reason }, &[])
    }

    /// Record the RTC value and the corresponding system time
    pub fn write_time(&mut self, system_time: u32, utc: u32) -> Result<()> {
        self.write(&Time::new(system_time, utc), &[])
    }

    /// Append an advisory map of the per-slot sequence numbers
    ///
    /// Diagnostic aid only; mount never consults it.
    pub fn write_map(&mut self) -> Result<()> {
        let mut sequences = vec![0u32; self.total_blocks as usize];
        if self.end_block.sequence != 0 {
            for sequence in self.start_block.sequence..=self.end_block.sequence {
                let number = (self.start_block.number + (sequence - self.start_block.sequence))
                    % self.total_blocks;
                sequences[number as usize] = sequence;
            }
        }

        let mut payload = Vec::with_capacity(sequences.len() * 4);
        for sequence in sequences {
            payload.extend_from_slice(&sequence.to_le_bytes());
        }
        self.write_entry(Kind::Map, &payload, &[])
    }

    /// Fill the remainder of the current block with a pad entry
    ///
    /// Pads carry no payload of interest and are committed in the
    /// single header write.
    fn seal_block(&mut self, space: u32) -> Result<()> {
        let header = Header {
            size: ((space as usize - mem::size_of::<Header>()) as u16).into(),
            kind: Kind::Pad as u8,
            flags: 0,
        };
        #[cfg(feature = "log")]
        log::debug!("pad {} @ {:#010x}", header.size.to_ne(), self.write_offset);
        self.partition.write(self.write_offset, &header)?;
        self.write_offset += space;
        Ok(())
    }

    /// Erase the next slot and frame it as the new write block
    ///
    /// The block state only advances once the erase and the block
    /// entry are on flash. A failed rollover leaves `write_offset` on
    /// the boundary with the state untouched, so the next append
    /// retries the whole open with the same sequence number.
    fn open_block(&mut self) -> Result<()> {
        self.write_offset %= self.block_size * self.total_blocks;
        let number = self.write_offset / self.block_size;
        let sequence = self.end_block.sequence + 1;

        #[cfg(feature = "log")]
        log::debug!(
            "initialise block #{} seq {:08x} @ {:#010x}",
            number,
            sequence,
            self.write_offset
        );
        self.partition.erase_range(self.write_offset, self.block_size)?;
        let start = BlockStart::new(sequence);
        self.partition.write(self.write_offset, &start)?;

        self.end_block = BlockInfo { number, sequence };
        if number == self.start_block.number && self.start_block.sequence != 0 {
            // The erase above destroyed the oldest block; retire it
            #[cfg(feature = "log")]
            log::debug!(
                "retire block #{} seq {:08x}",
                self.start_block.number,
                self.start_block.sequence
            );
            self.start_block.number = (self.start_block.number + 1) % self.total_blocks;
            self.start_block.sequence += 1;
        }
        if self.start_block.sequence == 0 {
            // First block of an empty log
            self.start_block = self.end_block;
        }

        self.write_offset += mem::size_of::<BlockStart>() as u32;
        Ok(())
    }

    /// Read raw bytes from the block holding `sequence`
    ///
    /// Offset 0 is the start of the physical block, so the stream
    /// begins with the block entry itself. Reads stop at the write
    /// position and may span the ring wrap, so fewer bytes than
    /// requested can be returned.
    ///
    /// Fails with `ERANGE` when `sequence` is outside the live window
    /// and with `EBUSY` when it addresses the write block while an
    /// append is in flight.
    pub fn read(&mut self, sequence: u32, offset: u32, buffer: &mut [u8]) -> Result<usize> {
        if sequence < self.start_block.sequence || sequence > self.end_block.sequence {
            return Err(Error::new(ERANGE));
        }
        if self.state == State::Busy && sequence == self.end_block.sequence {
            return Err(Error::new(EBUSY));
        }

        let total = self.total_blocks * self.block_size;
        let number = (self.start_block.number + (sequence - self.start_block.sequence))
            % self.total_blocks;
        let mut read_offset = number * self.block_size + offset;
        if read_offset >= total {
            read_offset -= total;
        }

        let mut count = 0;
        if read_offset > self.write_offset {
            // Region wraps: read up to the end of the partition first
            let len = buffer.len().min((total - read_offset) as usize);
            self.partition.read(read_offset, &mut buffer[..len])?;
            count += len;
            read_offset = 0;
        }
        let len = (buffer.len() - count).min((self.write_offset - read_offset) as usize);
        if len != 0 {
            self.partition
                .read(read_offset, &mut buffer[count..count + len])?;
            count += len;
        }

        Ok(count)
    }
}

#[cfg(test)]
use crate::PartitionMemory;

#[cfg(test)]
const TEST_BLOCK_SIZE: u32 = 4096;
#[cfg(test)]
const TEST_BLOCKS: u32 = 4;

#[cfg(test)]
fn test_log() -> Log<PartitionMemory> {
    let partition = PartitionMemory::new(TEST_BLOCKS * TEST_BLOCK_SIZE, TEST_BLOCK_SIZE);
    Log::open_with(partition, 1, Some(TEST_BLOCKS)).unwrap()
}

/// Partition wrapper that fails writes once a budget is spent
#[cfg(test)]
struct FailPartition {
    inner: PartitionMemory,
    writes_left: u32,
}

#[cfg(test)]
impl Partition for FailPartition {
    fn size(&mut self) -> Result<u32> {
        self.inner.size()
    }

    fn page_size(&mut self) -> Result<u32> {
        self.inner.page_size()
    }

    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<usize> {
        self.inner.read(offset, buffer)
    }

    fn write(&mut self, offset: u32, buffer: &[u8]) -> Result<usize> {
        if self.writes_left == 0 {
            return Err(Error::new(syscall::error::EIO));
        }
        self.writes_left -= 1;
        self.inner.write(offset, buffer)
    }

    fn erase_range(&mut self, offset: u32, length: u32) -> Result<()> {
        self.inner.erase_range(offset, length)
    }
}

#[test]
fn empty_mount_test() {
    let log = test_log();
    assert_eq!(log.start_block(), BlockInfo::default());
    assert_eq!(log.end_block(), BlockInfo::default());
    assert_eq!(log.write_offset(), 0);
    assert!(log.is_ready());
}

#[test]
fn geometry_test() {
    // A single block is not a ring
    let partition = PartitionMemory::new(TEST_BLOCK_SIZE, TEST_BLOCK_SIZE);
    assert!(Log::open_with(partition, 1, None).is_err());

    let partition = PartitionMemory::new(TEST_BLOCKS * TEST_BLOCK_SIZE, TEST_BLOCK_SIZE);
    assert!(Log::open_with(partition, 0, None).is_err());
}

#[test]
fn first_entry_test() {
    let mut log = test_log();
    log.write_boot(6).unwrap();

    assert_eq!(log.end_block(), BlockInfo { number: 0, sequence: 1 });
    assert_eq!(log.start_block(), BlockInfo { number: 0, sequence: 1 });
    assert_eq!(log.write_offset(), 20);

    let data = log.partition_mut().data();
    assert_eq!(
        &data[0..12],
        &[0x08, 0x00, 0x01, 0xFF, 0x44, 0xE0, 0x8B, 0xA7, 0x01, 0x00, 0x00, 0x00]
    );
    assert_eq!(&data[12..16], &[0x01, 0x00, 0x02, 0xFE]);
    assert_eq!(data[16], 0x06);
}

#[test]
fn pad_rollover_test() {
    let mut log = test_log();
    let row = [0xABu8; 1024];

    for _ in 0..3 {
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    }
    // 12 byte block start plus three 1036-byte entries
    assert_eq!(log.write_offset(), 12 + 3 * 1036);

    // The fourth does not fit: pad, roll over, retire nothing yet
    log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    assert_eq!(log.end_block(), BlockInfo { number: 1, sequence: 2 });
    assert_eq!(log.start_block(), BlockInfo { number: 0, sequence: 1 });
    assert_eq!(log.write_offset(), TEST_BLOCK_SIZE + 12 + 1036);

    // Pad fills the tail of block 0, committed in one write
    let space = TEST_BLOCK_SIZE - (12 + 3 * 1036);
    let data = log.partition_mut().data();
    let pad = &data[(12 + 3 * 1036) as usize..][..4];
    assert_eq!(pad, &[(space - 4) as u8, ((space - 4) >> 8) as u8, 0x00, 0x00]);
}

#[test]
fn retirement_test() {
    let mut log = test_log();
    let row = [0u8; 1024];

    while log.end_block().sequence < 5 {
        let start = log.start_block();
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
        // Retirement never moves the start backwards
        assert!(log.start_block().sequence >= start.sequence);
    }

    assert_eq!(log.end_block(), BlockInfo { number: 0, sequence: 5 });
    assert_eq!(log.start_block(), BlockInfo { number: 1, sequence: 2 });
    assert_eq!(log.full_block_count(), 3);
}

#[test]
fn remount_test() {
    let mut log = test_log();
    let row = [0x42u8; 1024];
    while log.end_block().sequence < 5 {
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    }

    let start_block = log.start_block();
    let end_block = log.end_block();
    let write_offset = log.write_offset();

    let log = Log::open_with(log.into_partition(), 1, Some(TEST_BLOCKS)).unwrap();
    assert_eq!(log.start_block(), start_block);
    assert_eq!(log.end_block(), end_block);
    assert_eq!(log.write_offset(), write_offset);
    assert_eq!(log.start_block(), BlockInfo { number: 1, sequence: 2 });
    assert_eq!(log.end_block(), BlockInfo { number: 0, sequence: 5 });
}

#[test]
fn mount_idempotence_test() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut log = test_log();

    for _ in 0..200 {
        let len = rng.gen_range(0..600);
        let row = vec![rng.gen::<u8>(); len];
        match rng.gen_range(0..10) {
            0 => log.write_boot(rng.gen()).unwrap(),
            1 => log.write_time(rng.gen(), rng.gen()).unwrap(),
            _ => log.write(&crate::entry::Data::new(rng.gen(), 1), &row).unwrap(),
        }

        // Entries always start on a word boundary
        assert_eq!(log.write_offset() % 4, 0);

        let remounted =
            Log::open_with(log.partition_mut().clone(), 1, Some(TEST_BLOCKS)).unwrap();
        assert_eq!(remounted.start_block(), log.start_block());
        assert_eq!(remounted.end_block(), log.end_block());
        assert_eq!(remounted.write_offset(), log.write_offset());
    }
}

#[test]
fn fifo_window_test() {
    let mut log = test_log();
    let row = [7u8; 512];
    for _ in 0..40 {
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    }

    let start = log.start_block().sequence;
    let end = log.end_block().sequence;
    assert!(start < end);

    for sequence in start..=end {
        let mut buffer = [0u8; 12];
        assert_eq!(log.read(sequence, 0, &mut buffer).unwrap(), 12);
        let mut block_start = BlockStart::default();
        block_start.copy_from_slice(&buffer);
        assert!(block_start.is_valid());
        assert_eq!(block_start.sequence(), sequence);
    }

    assert!(log.read(start - 1, 0, &mut [0u8; 4]).is_err());
    assert!(log.read(end + 1, 0, &mut [0u8; 4]).is_err());
}

#[test]
fn read_oldest_block_test() {
    let mut log = test_log();
    let row = [9u8; 1000];
    while log.end_block().sequence < 6 {
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    }

    let start = log.start_block();
    let mut buffer = vec![0u8; TEST_BLOCK_SIZE as usize];
    let count = log.read(start.sequence, 0, &mut buffer).unwrap();
    assert_eq!(count, TEST_BLOCK_SIZE as usize);

    let slot = (start.number * TEST_BLOCK_SIZE) as usize;
    let data = log.partition_mut().data();
    assert_eq!(&buffer[..], &data[slot..slot + TEST_BLOCK_SIZE as usize]);
}

#[test]
fn no_straddle_test() {
    let mut log = test_log();
    let row = [3u8; 700];
    for _ in 0..30 {
        let offset = log.write_offset();
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
        let entry_start = if offset % TEST_BLOCK_SIZE == 0 || log.end_block().number != offset / TEST_BLOCK_SIZE {
            // Rolled over: the entry follows the fresh block start
            log.end_block().number * TEST_BLOCK_SIZE + 12
        } else {
            offset
        };
        let entry_end = entry_start + 4 + 700 + 8 - 1;
        assert_eq!(entry_start / TEST_BLOCK_SIZE, entry_end / TEST_BLOCK_SIZE);
    }
}

#[test]
fn oversized_entry_test() {
    let mut log = test_log();
    let row = vec![0u8; TEST_BLOCK_SIZE as usize];
    assert!(log.write_entry(Kind::Data, &row, &[]).is_err());
    // Largest entry that still fits alongside the block start
    let row = vec![0u8; (TEST_BLOCK_SIZE - 12 - 4) as usize];
    assert!(log.write_entry(Kind::Data, &row, &[]).is_ok());
}

#[test]
fn torn_write_remount_test() {
    let partition = FailPartition {
        inner: PartitionMemory::new(TEST_BLOCKS * TEST_BLOCK_SIZE, TEST_BLOCK_SIZE),
        writes_left: u32::MAX,
    };
    let mut log = Log::open_with(partition, 1, Some(TEST_BLOCKS)).unwrap();
    log.write_boot(6).unwrap();
    let write_offset = log.write_offset();

    // Header and payload land, the commit write does not
    log.partition_mut().writes_left = 2;
    let info = [0u8; 500];
    assert!(log.write_entry(Kind::Exception, &info, &[]).is_err());
    assert!(!log.is_ready());

    let remounted =
        Log::open_with(log.into_partition().inner, 1, Some(TEST_BLOCKS)).unwrap();
    // The torn entry is walked over; its header still counts
    assert_eq!(
        remounted.write_offset(),
        write_offset + crate::align_up(4 + 500)
    );

    let mut header = Header::default();
    let mut partition = remounted.into_partition();
    partition.read(write_offset, &mut header).unwrap();
    assert!(header.is_invalid());
    assert_eq!(header.kind(), Some(Kind::Exception));
}

#[test]
fn torn_write_continuation_test() {
    let partition = FailPartition {
        inner: PartitionMemory::new(TEST_BLOCKS * TEST_BLOCK_SIZE, TEST_BLOCK_SIZE),
        writes_left: u32::MAX,
    };
    let mut log = Log::open_with(partition, 1, Some(TEST_BLOCKS)).unwrap();
    log.write_boot(6).unwrap();
    let write_offset = log.write_offset();

    log.partition_mut().writes_left = 2;
    assert!(log.write_entry(Kind::Exception, &[0u8; 500], &[]).is_err());

    // While busy, reads of the write block are refused
    let end = log.end_block().sequence;
    assert!(log.read(end, 0, &mut [0u8; 4]).is_err());

    // The next append skips the abandoned entry and commits normally
    log.partition_mut().writes_left = u32::MAX;
    log.write_boot(1).unwrap();
    assert!(log.is_ready());

    let expected = write_offset + crate::align_up(4 + 500);
    let mut header = Header::default();
    log.partition_mut().read(expected, &mut header).unwrap();
    assert!(!header.is_invalid());
    assert_eq!(header.kind(), Some(Kind::Boot));
}

#[test]
fn interrupted_header_write_test() {
    let partition = FailPartition {
        inner: PartitionMemory::new(TEST_BLOCKS * TEST_BLOCK_SIZE, TEST_BLOCK_SIZE),
        writes_left: u32::MAX,
    };
    let mut log = Log::open_with(partition, 1, Some(TEST_BLOCKS)).unwrap();
    log.write_boot(6).unwrap();
    let write_offset = log.write_offset();

    // Not even the header lands
    log.partition_mut().writes_left = 0;
    assert!(log.write_boot(2).is_err());

    // Nothing to skip: the same offset is reused
    log.partition_mut().writes_left = u32::MAX;
    log.write_boot(2).unwrap();
    assert_eq!(log.write_offset(), write_offset + 8);

    let mut header = Header::default();
    log.partition_mut().read(write_offset, &mut header).unwrap();
    assert_eq!(header.kind(), Some(Kind::Boot));
    assert!(!header.is_invalid());
}

#[test]
fn rollover_failure_retry_test() {
    let partition = FailPartition {
        inner: PartitionMemory::new(TEST_BLOCKS * TEST_BLOCK_SIZE, TEST_BLOCK_SIZE),
        writes_left: u32::MAX,
    };
    let mut log = Log::open_with(partition, 1, Some(TEST_BLOCKS)).unwrap();
    let row = [0u8; 1024];

    // Fill the ring so the next rollover wraps into slot 0
    while log.end_block().sequence < 4 {
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    }
    log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    assert_eq!(log.end_block(), BlockInfo { number: 3, sequence: 4 });
    assert_eq!(log.start_block(), BlockInfo { number: 0, sequence: 1 });

    // The pad lands but the fresh block entry does not
    log.partition_mut().writes_left = 1;
    assert!(log.write(&crate::entry::Data::new(0, 1), &row).is_err());
    assert!(!log.is_ready());

    // The failed rollover left the ring state untouched, with the
    // write offset parked on the block boundary
    assert_eq!(log.end_block(), BlockInfo { number: 3, sequence: 4 });
    assert_eq!(log.start_block(), BlockInfo { number: 0, sequence: 1 });
    assert_eq!(log.write_offset() % TEST_BLOCK_SIZE, 0);

    // Retrying opens the block once: no skipped sequence number and a
    // single retirement
    log.partition_mut().writes_left = u32::MAX;
    log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
    assert!(log.is_ready());
    assert_eq!(log.end_block(), BlockInfo { number: 0, sequence: 5 });
    assert_eq!(log.start_block(), BlockInfo { number: 1, sequence: 2 });

    // Slot 0 was reframed with sequence 5
    let mut buffer = [0u8; 12];
    log.read(5, 0, &mut buffer).unwrap();
    let mut block_start = BlockStart::default();
    block_start.copy_from_slice(&buffer);
    assert!(block_start.is_valid());
    assert_eq!(block_start.sequence(), 5);
}

#[test]
fn scan_overflow_test() {
    // Build an image whose one entry claims to run past the block end
    let mut partition = PartitionMemory::new(TEST_BLOCKS * TEST_BLOCK_SIZE, TEST_BLOCK_SIZE);
    partition.write(0, &BlockStart::new(1)).unwrap();
    partition
        .write(12, &Header::new(Kind::Data, 0xFFF0))
        .unwrap();

    let mut log = Log::open_with(partition, 1, Some(TEST_BLOCKS)).unwrap();
    assert_eq!(log.end_block(), BlockInfo { number: 0, sequence: 1 });
    // The write offset is clamped to the block end
    assert_eq!(log.write_offset(), TEST_BLOCK_SIZE);

    // The block is effectively full, so the next append rolls over
    log.write_boot(0).unwrap();
    assert_eq!(log.end_block(), BlockInfo { number: 1, sequence: 2 });
}

#[test]
fn sequence_monotonicity_test() {
    let mut log = test_log();
    let row = [0u8; 900];
    let mut prev_end = log.end_block().sequence;
    let mut prev_start = log.start_block().sequence;

    for _ in 0..60 {
        log.write(&crate::entry::Data::new(0, 1), &row).unwrap();
        let end = log.end_block().sequence;
        let start = log.start_block().sequence;
        assert!(end >= prev_end);
        assert!(start >= prev_start);
        assert!(start <= end);
        prev_end = end;
        prev_start = start;
    }

    // Five blocks' worth into a four block ring
    assert!(log.end_block().sequence > TEST_BLOCKS);
    let live = log.end_block().sequence - log.start_block().sequence;
    assert!(live == 3 || live == 4, "live {}", live);
}

#[test]
fn write_map_test() {
    let mut log = test_log();
    log.write_boot(0).unwrap();
    let offset = log.write_offset();
    log.write_map().unwrap();

    let data = log.partition_mut().data();
    assert_eq!(
        &data[offset as usize..][..4],
        &[16, 0, Kind::Map as u8, 0xFE]
    );
    // Slot 0 holds sequence 1, the rest are empty
    assert_eq!(&data[offset as usize + 4..][..16], &[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn table_id_test() {
    let mut log = test_log();
    assert_eq!(log.allocate_table_id(), 1);
    assert_eq!(log.allocate_table_id(), 2);
}
