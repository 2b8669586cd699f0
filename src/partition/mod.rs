use syscall::error::Result;

#[cfg(feature = "std")]
pub use self::file::PartitionFile;
#[cfg(feature = "std")]
pub use self::memory::PartitionMemory;

#[cfg(feature = "std")]
mod file;
#[cfg(feature = "std")]
mod memory;

/// A byte-addressed flash partition
///
/// Writes are assumed to clear bits only: a byte written twice holds
/// the bitwise AND of both values, and bytes never written since erase
/// read back as `0xFF`. Erases operate on whole pages.
pub trait Partition {
    /// Size of the partition in bytes
    fn size(&mut self) -> Result<u32>;

    /// Erase granularity in bytes, a power of two
    fn page_size(&mut self) -> Result<u32>;

    /// Read bytes starting at `offset`
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<usize>;

    /// Write bytes starting at `offset`
    fn write(&mut self, offset: u32, buffer: &[u8]) -> Result<usize>;

    /// Erase a page-aligned, page-multiple range back to all-ones
    fn erase_range(&mut self, offset: u32, length: u32) -> Result<()>;
}
