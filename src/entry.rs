//! On-flash entry framing
//!
//! Every entry starts on a 32-bit word boundary with a one-word
//! [`Header`] followed by `size` payload bytes. Multi-byte integers are
//! little-endian. Variable parts (names, row data, stack dumps) follow
//! the fixed payload prefix and are counted by `size`.

use core::{fmt, mem, ops, slice};
use endian_num::Le;

use crate::{align_up, BLOCK_MAGIC};

/// Entry kind tag, stable on-flash values
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    /// Unused padding at the tail of a block
    Pad = 0x00,
    /// Identifies the start of a block
    Block = 0x01,
    /// System boot
    Boot = 0x02,
    /// RTC value and corresponding system time
    Time = 0x03,
    /// Qualifies following fields (e.g. name of device)
    Table = 0x04,
    /// Field identification record
    Field = 0x05,
    /// Data record
    Data = 0x06,
    /// Exception information
    Exception = 0x07,
    /// Map of block sequence numbers
    Map = 0x08,
    /// Never written since erase
    Erased = 0xFF,
}

impl Kind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Pad),
            0x01 => Some(Self::Block),
            0x02 => Some(Self::Boot),
            0x03 => Some(Self::Time),
            0x04 => Some(Self::Table),
            0x05 => Some(Self::Field),
            0x06 => Some(Self::Data),
            0x07 => Some(Self::Exception),
            0x08 => Some(Self::Map),
            0xFF => Some(Self::Erased),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Pad => "pad",
            Self::Block => "block",
            Self::Boot => "boot",
            Self::Time => "time",
            Self::Table => "table",
            Self::Field => "field",
            Self::Data => "data",
            Self::Exception => "exception",
            Self::Map => "map",
            Self::Erased => "erased",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// Flags byte of an entry header
    ///
    /// Starts out all-ones; bits are cleared individually as flash can
    /// only flip bits towards zero without an erase.
    pub struct EntryFlags: u8 {
        /// Cleared as the final step of writing an entry
        const INVALID = 0x01;
    }
}

/// Entry header, exactly one word so it can be written atomically
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C, packed)]
pub struct Header {
    /// Size of content following this header, excluded from it
    pub size: Le<u16>,
    pub kind: u8,
    pub flags: u8,
}

impl Header {
    /// A fresh header with all flag bits still set
    pub fn new(kind: Kind, size: u16) -> Self {
        Self {
            size: size.into(),
            kind: kind as u8,
            flags: 0xFF,
        }
    }

    pub fn kind(&self) -> Option<Kind> {
        Kind::from_u8(self.kind)
    }

    /// The region has never been written since erase
    pub fn is_erased(&self) -> bool {
        self.kind == Kind::Erased as u8
    }

    /// Entry payload began writing but was never committed
    pub fn is_invalid(&self) -> bool {
        self.flags & EntryFlags::INVALID.bits() != 0
    }

    /// Clear the invalid bit, leaving the other flag bits untouched
    pub fn commit(&mut self) {
        self.flags &= !EntryFlags::INVALID.bits();
    }

    /// Distance from this header to the next, including alignment
    pub fn entry_len(&self) -> u32 {
        align_up(mem::size_of::<Header>() as u32 + u32::from(self.size.to_ne()))
    }
}

/// An entry payload with a fixed on-flash image
///
/// # Safety
///
/// Implementors must be `#[repr(C, packed)]` with little-endian fields
/// so that their byte image is exactly the wire format for `KIND`.
pub unsafe trait EntryInfo: ops::Deref<Target = [u8]> {
    const KIND: Kind;
}

/// Written as the first entry in a block
///
/// During mount the partition is scanned to determine the read start
/// position, which is the block with the lowest sequence number. The
/// write position is found in the block with the highest.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct Block {
    pub magic: Le<u32>,
    /// Always increments
    pub sequence: Le<u32>,
}

impl Block {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: BLOCK_MAGIC.into(),
            sequence: sequence.into(),
        }
    }
}

/// Header and [`Block`] payload as one 12-byte image
///
/// Written in a single partition operation when a block is opened, and
/// read back whole during the mount scan.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct BlockStart {
    pub header: Header,
    pub block: Block,
}

impl BlockStart {
    pub fn new(sequence: u32) -> Self {
        Self {
            header: Header::new(Kind::Block, mem::size_of::<Block>() as u16),
            block: Block::new(sequence),
        }
    }

    /// Flags are not checked: block entries keep them all-ones for life
    pub fn is_valid(&self) -> bool {
        self.header.size.to_ne() == mem::size_of::<Block>() as u16
            && self.header.kind == Kind::Block as u8
            && self.block.magic.to_ne() == BLOCK_MAGIC
    }

    pub fn sequence(&self) -> u32 {
        self.block.sequence.to_ne()
    }
}

/// System boot information
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct Boot {
    /// Opaque reset reason from the platform
    pub reason: u8,
}

unsafe impl EntryInfo for Boot {
    const KIND: Kind = Kind::Boot;
}

/// Written on restart, at midnight and when the RTC clock is updated
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct Time {
    /// Milliseconds since boot
    pub system_time: Le<u32>,
    /// Seconds since epoch
    pub utc: Le<u32>,
}

impl Time {
    pub fn new(system_time: u32, utc: u32) -> Self {
        Self {
            system_time: system_time.into(),
            utc: utc.into(),
        }
    }
}

unsafe impl EntryInfo for Time {
    const KIND: Kind = Kind::Time;
}

/// A table identifies a data set
///
/// The table name follows as the variable payload, no NUL.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct Table {
    pub id: Le<u16>,
}

impl Table {
    pub fn new(id: u16) -> Self {
        Self { id: id.into() }
    }
}

unsafe impl EntryInfo for Table {
    const KIND: Kind = Kind::Table;
}

/// Base type of a field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Unsigned = 0,
    Signed = 1,
    Float = 2,
    Char = 3,
}

impl FieldType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unsigned),
            1 => Some(Self::Signed),
            2 => Some(Self::Float),
            3 => Some(Self::Char),
            _ => None,
        }
    }
}

/// A field descriptor, one column of a table
///
/// The field name follows as the variable payload, no NUL.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct Field {
    /// Application-specific identifier, e.g. a modbus register number
    pub id: Le<u16>,
    /// Base type in the low 7 bits, variable-length flag in the top bit
    pub type_and_variable: u8,
    /// Size of the field in bytes
    ///
    /// With variable-length fields this is the size of each element;
    /// the row then stores the actual byte length as a `u16` in the
    /// fixed portion, with the data itself following all fixed fields.
    pub size: u8,
}

impl Field {
    pub const VARIABLE: u8 = 0x80;

    pub fn new(id: u16, field_type: FieldType, size: u8, variable: bool) -> Self {
        let mut type_and_variable = field_type as u8;
        if variable {
            type_and_variable |= Self::VARIABLE;
        }
        Self {
            id: id.into(),
            type_and_variable,
            size,
        }
    }

    pub fn field_type(&self) -> Option<FieldType> {
        FieldType::from_u8(self.type_and_variable & !Self::VARIABLE)
    }

    pub fn variable(&self) -> bool {
        self.type_and_variable & Self::VARIABLE != 0
    }
}

unsafe impl EntryInfo for Field {
    const KIND: Kind = Kind::Field;
}

/// A complete row of data for one table
///
/// Row bytes follow in the same order and size as the table's fields.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct Data {
    /// Milliseconds since boot
    pub system_time: Le<u32>,
    /// Identifies which table this data is for
    pub table: Le<u16>,
    pub reserved: Le<u16>,
}

impl Data {
    pub fn new(system_time: u32, table: u16) -> Self {
        Self {
            system_time: system_time.into(),
            table: table.into(),
            reserved: 0.into(),
        }
    }
}

unsafe impl EntryInfo for Data {
    const KIND: Kind = Kind::Data;
}

/// Exception information
///
/// The faulting stack follows as the variable payload.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct Exception {
    pub cause: Le<u32>,
    pub epc1: Le<u32>,
    pub epc2: Le<u32>,
    pub epc3: Le<u32>,
    pub excvaddr: Le<u32>,
    pub depc: Le<u32>,
}

unsafe impl EntryInfo for Exception {
    const KIND: Kind = Kind::Exception;
}

macro_rules! entry_bytes {
    ($($name:ident),*) => {
        $(
            impl ops::Deref for $name {
                type Target = [u8];
                fn deref(&self) -> &[u8] {
                    unsafe {
                        slice::from_raw_parts(
                            self as *const $name as *const u8,
                            mem::size_of::<$name>(),
                        ) as &[u8]
                    }
                }
            }

            impl ops::DerefMut for $name {
                fn deref_mut(&mut self) -> &mut [u8] {
                    unsafe {
                        slice::from_raw_parts_mut(
                            self as *mut $name as *mut u8,
                            mem::size_of::<$name>(),
                        ) as &mut [u8]
                    }
                }
            }
        )*
    };
}

entry_bytes!(Header, Block, BlockStart, Boot, Time, Table, Field, Data, Exception);

#[test]
fn entry_size_test() {
    assert_eq!(mem::size_of::<Header>(), 4);
    assert_eq!(mem::size_of::<Block>(), 8);
    assert_eq!(mem::size_of::<BlockStart>(), 12);
    assert_eq!(mem::size_of::<Boot>(), 1);
    assert_eq!(mem::size_of::<Time>(), 8);
    assert_eq!(mem::size_of::<Table>(), 2);
    assert_eq!(mem::size_of::<Field>(), 4);
    assert_eq!(mem::size_of::<Data>(), 8);
    assert_eq!(mem::size_of::<Exception>(), 24);
}

#[test]
fn header_image_test() {
    let mut header = Header::new(Kind::Boot, 1);
    assert_eq!(&*header, &[0x01, 0x00, 0x02, 0xFF]);
    assert!(header.is_invalid());

    header.commit();
    assert_eq!(&*header, &[0x01, 0x00, 0x02, 0xFE]);
    assert!(!header.is_invalid());
    assert_eq!(header.entry_len(), 8);
}

#[test]
fn block_start_test() {
    let start = BlockStart::new(7);
    assert!(start.is_valid());
    assert_eq!(start.sequence(), 7);
    assert_eq!(
        &*start,
        &[0x08, 0x00, 0x01, 0xFF, 0x44, 0xE0, 0x8B, 0xA7, 0x07, 0x00, 0x00, 0x00]
    );

    let mut bad = BlockStart::new(7);
    bad.block.magic = 0.into();
    assert!(!bad.is_valid());
}

#[test]
fn erased_header_test() {
    let mut header = Header::default();
    header.copy_from_slice(&[0xFF; 4]);
    assert!(header.is_erased());
    assert_eq!(header.kind(), Some(Kind::Erased));
}

#[test]
fn field_type_test() {
    let field = Field::new(3, FieldType::Char, 1, true);
    assert_eq!(field.type_and_variable, 0x83);
    assert_eq!(field.field_type(), Some(FieldType::Char));
    assert!(field.variable());

    let field = Field::new(1, FieldType::Float, 8, false);
    assert_eq!(field.type_and_variable, 0x02);
    assert!(!field.variable());
}
