use std::env;
use std::process;

use flashlog::entry;
use flashlog::{Header, Kind, Log, PartitionFile, PAGES_PER_BLOCK};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <image> [pages-per-block]", args[0]);
        process::exit(1);
    }

    let path = &args[1];
    let pages_per_block = match args.get(2) {
        Some(arg) => match arg.parse() {
            Ok(pages) => pages,
            Err(err) => {
                eprintln!("Bad pages-per-block: {}", err);
                process::exit(1);
            }
        },
        None => PAGES_PER_BLOCK,
    };

    let partition = match PartitionFile::open(path, 4096) {
        Ok(partition) => partition,
        Err(err) => {
            eprintln!("Failed to open partition: {}", err);
            process::exit(1);
        }
    };

    let mut log = match Log::open_with(partition, pages_per_block, None) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("Failed to mount log: {}", err);
            process::exit(1);
        }
    };

    println!(
        "{} blocks of {} bytes, sequences {:#x}..{:#x}",
        log.total_blocks(),
        log.block_size(),
        log.start_block().sequence,
        log.end_block().sequence
    );

    let start = log.start_block().sequence;
    let end = log.end_block().sequence;
    if end == 0 {
        println!("log is empty");
        return;
    }

    let block_size = log.block_size() as usize;
    let mut buffer = vec![0u8; block_size];
    for sequence in start..=end {
        let count = match log.read(sequence, 0, &mut buffer) {
            Ok(count) => count,
            Err(err) => {
                eprintln!("Failed to read block {:#x}: {}", sequence, err);
                continue;
            }
        };
        dump_block(sequence, &buffer[..count]);
    }
}

fn dump_block(sequence: u32, data: &[u8]) {
    let mut offset = 0;
    while offset + 4 <= data.len() {
        let mut header = Header::default();
        header.copy_from_slice(&data[offset..offset + 4]);
        if header.is_erased() {
            break;
        }

        let size = header.size.to_ne() as usize;
        let end = (offset + 4 + size).min(data.len());
        let content = &data[(offset + 4).min(end)..end];

        match header.kind() {
            Some(kind) => {
                print!("{:#010x} @ {:#06x} {} {}", sequence, offset, kind, size);
                if header.is_invalid() && kind != Kind::Block {
                    print!(" (torn)");
                } else {
                    dump_entry(kind, content);
                }
                println!();
            }
            None => println!(
                "{:#010x} @ {:#06x} unknown kind {:#04x} {}",
                sequence, offset, header.kind, size
            ),
        }

        offset += header.entry_len() as usize;
    }
}

fn dump_entry(kind: Kind, content: &[u8]) {
    match kind {
        Kind::Block => {
            let mut block = entry::Block::default();
            if content.len() >= 8 {
                block.copy_from_slice(&content[..8]);
                print!(": seq {:#010x}", block.sequence.to_ne());
            }
        }
        Kind::Boot => {
            if let Some(reason) = content.first() {
                print!(": reason {}", reason);
            }
        }
        Kind::Time => {
            let mut time = entry::Time::default();
            if content.len() >= 8 {
                time.copy_from_slice(&content[..8]);
                print!(
                    ": system time {} utc {}",
                    time.system_time.to_ne(),
                    time.utc.to_ne()
                );
            }
        }
        Kind::Table => {
            let mut table = entry::Table::default();
            if content.len() >= 2 {
                table.copy_from_slice(&content[..2]);
                print!(
                    ": id {} name '{}'",
                    table.id.to_ne(),
                    String::from_utf8_lossy(&content[2..])
                );
            }
        }
        Kind::Field => {
            let mut field = entry::Field::default();
            if content.len() >= 4 {
                field.copy_from_slice(&content[..4]);
                match field.field_type() {
                    Some(field_type) => print!(": id {} type {:?}", field.id.to_ne(), field_type),
                    None => print!(": id {} type {:#04x}", field.id.to_ne(), field.type_and_variable),
                }
                print!(
                    " size {}{} name '{}'",
                    field.size,
                    if field.variable() { " variable" } else { "" },
                    String::from_utf8_lossy(&content[4..])
                );
            }
        }
        Kind::Data => {
            let mut data = entry::Data::default();
            if content.len() >= 8 {
                data.copy_from_slice(&content[..8]);
                print!(
                    ": system time {} table {} {} bytes",
                    data.system_time.to_ne(),
                    data.table.to_ne(),
                    content.len() - 8
                );
            }
        }
        Kind::Exception => {
            let mut exception = entry::Exception::default();
            if content.len() >= 24 {
                exception.copy_from_slice(&content[..24]);
                print!(
                    ": cause {:#010x} epc1 {:#010x} excvaddr {:#010x} stack {}",
                    exception.cause.to_ne(),
                    exception.epc1.to_ne(),
                    exception.excvaddr.to_ne(),
                    content.len() - 24
                );
            }
        }
        Kind::Map => {
            let sequences: Vec<String> = content
                .chunks_exact(4)
                .map(|chunk| {
                    let sequence = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    format!("{:#x}", sequence)
                })
                .collect();
            print!(": {}", sequences.join(", "));
        }
        Kind::Pad | Kind::Erased => {}
    }
}
