//! Table and field façade over the append API
//!
//! A table names a stream of data rows. The application writes the
//! table entry and its field descriptors on every restart so the
//! schema stays present in the retained window, then appends rows.
//! Fields appear in the row in declaration order; a variable-length
//! field stores its byte length as a `u16` in the fixed portion, with
//! the bytes themselves following all fixed fields.

use syscall::error::Result;

use crate::entry::{self, FieldType};
use crate::log::Log;
use crate::partition::Partition;

pub type TableId = u16;

/// A named data set with an allocated ID
pub struct Table {
    id: TableId,
}

impl Table {
    pub fn new<P: Partition>(log: &mut Log<P>) -> Self {
        Self {
            id: log.allocate_table_id(),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    /// Write the table record naming this data set
    pub fn write_table<P: Partition>(&self, log: &mut Log<P>, name: &str) -> Result<()> {
        log.write(&entry::Table::new(self.id), name.as_bytes())
    }

    /// Write a field entry describing one column of data
    pub fn write_field<P: Partition>(
        &self,
        log: &mut Log<P>,
        id: u16,
        field_type: FieldType,
        size: u8,
        variable: bool,
        name: &str,
    ) -> Result<()> {
        log.write(
            &entry::Field::new(id, field_type, size, variable),
            name.as_bytes(),
        )
    }

    /// Write a field entry with the descriptor taken from a Rust type
    pub fn write_value_field<T: FieldValue + ?Sized, P: Partition>(
        &self,
        log: &mut Log<P>,
        id: u16,
        name: &str,
    ) -> Result<()> {
        self.write_field(log, id, T::TYPE, T::SIZE, T::VARIABLE, name)
    }

    /// Write one complete row for this table
    pub fn write_data<P: Partition>(
        &self,
        log: &mut Log<P>,
        system_time: u32,
        row: &[u8],
    ) -> Result<()> {
        log.write(&entry::Data::new(system_time, self.id), row)
    }
}

/// Field descriptor for a primitive value type
pub trait FieldValue {
    const TYPE: FieldType;
    const SIZE: u8;
    const VARIABLE: bool = false;
}

macro_rules! field_value {
    ($($ty:ty => $field_type:expr,)*) => {
        $(
            impl FieldValue for $ty {
                const TYPE: FieldType = $field_type;
                const SIZE: u8 = core::mem::size_of::<$ty>() as u8;
            }
        )*
    };
}

field_value! {
    u8 => FieldType::Unsigned,
    u16 => FieldType::Unsigned,
    u32 => FieldType::Unsigned,
    u64 => FieldType::Unsigned,
    i8 => FieldType::Signed,
    i16 => FieldType::Signed,
    i32 => FieldType::Signed,
    i64 => FieldType::Signed,
    f32 => FieldType::Float,
    f64 => FieldType::Float,
}

impl FieldValue for str {
    const TYPE: FieldType = FieldType::Char;
    const SIZE: u8 = 1;
    const VARIABLE: bool = true;
}

#[cfg(test)]
use crate::{Header, Kind, PartitionMemory};

#[test]
fn table_id_allocation_test() {
    let partition = PartitionMemory::new(4 * 4096, 4096);
    let mut log = Log::open_with(partition, 1, Some(4)).unwrap();

    let first = Table::new(&mut log);
    let second = Table::new(&mut log);
    assert_eq!(first.id(), 1);
    assert_eq!(second.id(), 2);
}

#[test]
fn schema_entries_test() {
    let partition = PartitionMemory::new(4 * 4096, 4096);
    let mut log = Log::open_with(partition, 1, Some(4)).unwrap();

    let table = Table::new(&mut log);
    table.write_table(&mut log, "Test").unwrap();
    table.write_value_field::<str, _>(&mut log, 0, "Startup").unwrap();
    table.write_value_field::<f32, _>(&mut log, 1, "float1").unwrap();
    table.write_value_field::<f64, _>(&mut log, 2, "double2").unwrap();

    let data = log.partition_mut().data();

    // Table entry: id then the name, no NUL
    let mut offset = 12;
    let mut header = Header::default();
    header.copy_from_slice(&data[offset..offset + 4]);
    assert_eq!(header.kind(), Some(Kind::Table));
    assert_eq!(header.size.to_ne(), 2 + 4);
    assert_eq!(&data[offset + 4..offset + 6], &[1, 0]);
    assert_eq!(&data[offset + 6..offset + 10], b"Test");

    // Variable char field: type byte has the top bit set
    offset += header.entry_len() as usize;
    header.copy_from_slice(&data[offset..offset + 4]);
    assert_eq!(header.kind(), Some(Kind::Field));
    assert_eq!(&data[offset + 4..offset + 8], &[0, 0, 0x83, 1]);
    assert_eq!(&data[offset + 8..offset + 15], b"Startup");

    // Fixed float fields
    offset += header.entry_len() as usize;
    header.copy_from_slice(&data[offset..offset + 4]);
    assert_eq!(&data[offset + 4..offset + 8], &[1, 0, 0x02, 4]);

    offset += header.entry_len() as usize;
    header.copy_from_slice(&data[offset..offset + 4]);
    assert_eq!(&data[offset + 4..offset + 8], &[2, 0, 0x02, 8]);
}

#[test]
fn data_row_test() {
    let partition = PartitionMemory::new(4 * 4096, 4096);
    let mut log = Log::open_with(partition, 1, Some(4)).unwrap();

    let table = Table::new(&mut log);
    table.write_table(&mut log, "Test").unwrap();
    table.write_value_field::<str, _>(&mut log, 0, "message").unwrap();
    table.write_value_field::<f32, _>(&mut log, 1, "value").unwrap();

    // Fixed portion: message length, then the float; variable bytes
    // follow the fixed fields
    let message = b"variable-length field";
    let mut row = Vec::new();
    row.extend_from_slice(&(message.len() as u16).to_le_bytes());
    row.extend_from_slice(&3.14159f32.to_le_bytes());
    row.extend_from_slice(message);

    let offset = log.write_offset() as usize;
    table.write_data(&mut log, 12345, &row).unwrap();

    let data = log.partition_mut().data();
    let mut header = Header::default();
    header.copy_from_slice(&data[offset..offset + 4]);
    assert_eq!(header.kind(), Some(Kind::Data));
    assert_eq!(header.size.to_ne() as usize, 8 + row.len());

    // system time, table id, reserved
    assert_eq!(&data[offset + 4..offset + 8], &12345u32.to_le_bytes());
    assert_eq!(&data[offset + 8..offset + 10], &[1, 0]);
    assert_eq!(&data[offset + 10..offset + 12], &[0, 0]);
    assert_eq!(&data[offset + 12..offset + 12 + row.len()], &row[..]);
}
