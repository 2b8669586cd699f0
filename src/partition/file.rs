use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;

use syscall::error::{Error, Result, EINVAL, EIO};

use crate::partition::Partition;

trait ResultExt<T> {
    fn or_eio(self) -> Result<T>;
}

impl<T> ResultExt<T> for std::io::Result<T> {
    fn or_eio(self) -> Result<T> {
        self.map_err(|_| Error::new(EIO))
    }
}

/// Partition backed by a host file, for tooling and tests
///
/// Erase is emulated by writing `0xFF`; the AND behaviour of real NOR
/// writes is not modelled here.
pub struct PartitionFile {
    file: File,
    page_size: u32,
}

impl PartitionFile {
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<PartitionFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .or_eio()?;
        Ok(PartitionFile { file, page_size })
    }

    pub fn create(path: impl AsRef<Path>, size: u32, page_size: u32) -> Result<PartitionFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .or_eio()?;
        file.set_len(u64::from(size)).or_eio()?;
        let mut partition = PartitionFile { file, page_size };
        partition.erase_range(0, size)?;
        Ok(partition)
    }
}

impl Partition for PartitionFile {
    fn size(&mut self) -> Result<u32> {
        let size = self.file.seek(SeekFrom::End(0)).or_eio()?;
        Ok(size as u32)
    }

    fn page_size(&mut self) -> Result<u32> {
        Ok(self.page_size)
    }

    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<usize> {
        self.file.read_exact_at(buffer, u64::from(offset)).or_eio()?;
        Ok(buffer.len())
    }

    fn write(&mut self, offset: u32, buffer: &[u8]) -> Result<usize> {
        self.file.write_all_at(buffer, u64::from(offset)).or_eio()?;
        Ok(buffer.len())
    }

    fn erase_range(&mut self, offset: u32, length: u32) -> Result<()> {
        if offset % self.page_size != 0 || length % self.page_size != 0 {
            return Err(Error::new(EINVAL));
        }
        let page = vec![0xFF; self.page_size as usize];
        let mut offset = u64::from(offset);
        for _ in 0..length / self.page_size {
            self.file.write_all_at(&page, offset).or_eio()?;
            offset += u64::from(self.page_size);
        }
        Ok(())
    }
}

#[test]
fn file_partition_test() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partition.bin");

    let mut partition = PartitionFile::create(&path, 8192, 4096).unwrap();
    assert_eq!(partition.size().unwrap(), 8192);

    let mut buffer = [0u8; 4];
    partition.read(100, &mut buffer).unwrap();
    assert_eq!(buffer, [0xFF; 4]);

    partition.write(100, &[1, 2, 3, 4]).unwrap();

    let mut partition = PartitionFile::open(&path, 4096).unwrap();
    partition.read(100, &mut buffer).unwrap();
    assert_eq!(buffer, [1, 2, 3, 4]);

    partition.erase_range(0, 4096).unwrap();
    partition.read(100, &mut buffer).unwrap();
    assert_eq!(buffer, [0xFF; 4]);
}
