//! Directory-entry records as exchanged with getdents/getdents64, plus the
//! per-fd buffer that serves them back to the tracee in a stable order.

use std::collections::HashMap;

/// Wire layout of one record. `Legacy` is the old `linux_dirent` (name first,
/// type byte parked at the end of the record), `Wide` is `linux_dirent64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirentLayout {
    Legacy,
    Wide,
}

const RECLEN_OFFSET: usize = 16;
const LEGACY_NAME_OFFSET: usize = 18;
const WIDE_TYPE_OFFSET: usize = 18;
const WIDE_NAME_OFFSET: usize = 19;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirRecord {
    pub ino: u64,
    pub dtype: u8,
    pub name: Vec<u8>,
}

fn align8(len: usize) -> usize {
    (len + 7) & !7
}

fn encoded_len(layout: DirentLayout, name_len: usize) -> usize {
    match layout {
        // name, NUL, trailing d_type byte
        DirentLayout::Legacy => align8(LEGACY_NAME_OFFSET + name_len + 2),
        // d_type in the header, name, NUL
        DirentLayout::Wide => align8(WIDE_NAME_OFFSET + name_len + 1),
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn parse(layout: DirentLayout, bytes: &[u8], records: &mut Vec<DirRecord>) {
    let mut offset = 0;
    while offset + LEGACY_NAME_OFFSET <= bytes.len() {
        let reclen_raw = [bytes[offset + RECLEN_OFFSET], bytes[offset + RECLEN_OFFSET + 1]];
        let reclen = u16::from_le_bytes(reclen_raw) as usize;
        if reclen == 0 || offset + reclen > bytes.len() {
            break;
        }
        let record = &bytes[offset..offset + reclen];
        let (name_start, dtype) = match layout {
            DirentLayout::Legacy => (LEGACY_NAME_OFFSET, record[reclen - 1]),
            DirentLayout::Wide => (WIDE_NAME_OFFSET, record[WIDE_TYPE_OFFSET]),
        };
        let name_region = &record[name_start..];
        let name_len = name_region.iter().position(|b| *b == 0).unwrap_or(name_region.len());
        records.push(DirRecord {
            ino: read_u64(record, 0),
            dtype,
            name: name_region[..name_len].to_vec(),
        });
        offset += reclen;
    }
}

fn encode_into(layout: DirentLayout, record: &DirRecord, d_off: u64, out: &mut Vec<u8>) {
    let reclen = encoded_len(layout, record.name.len());
    let start = out.len();
    out.extend_from_slice(&record.ino.to_le_bytes());
    out.extend_from_slice(&d_off.to_le_bytes());
    out.extend_from_slice(&(reclen as u16).to_le_bytes());
    match layout {
        DirentLayout::Wide => {
            out.push(record.dtype);
            out.extend_from_slice(&record.name);
        }
        DirentLayout::Legacy => {
            out.extend_from_slice(&record.name);
        }
    }
    out.push(0);
    while out.len() < start + reclen {
        out.push(0);
    }
    if layout == DirentLayout::Legacy {
        let end = out.len();
        out[end - 1] = record.dtype;
    }
}

/// Directory listing drained from the kernel for one fd, sorted by name so
/// every run serves the records in the same order.
pub struct DirEntries {
    layout: DirentLayout,
    records: Vec<DirRecord>,
    next: usize,
    served: u64,
    ready: bool,
}

impl DirEntries {
    pub fn new(layout: DirentLayout) -> DirEntries {
        DirEntries {
            layout,
            records: Vec::new(),
            next: 0,
            served: 0,
            ready: false,
        }
    }

    /// Parse one kernel getdents result into the pending record list.
    pub fn absorb(&mut self, bytes: &[u8]) {
        parse(self.layout, bytes, &mut self.records);
    }

    /// Sort by name and rewrite inodes; after this the buffer only serves.
    pub fn finalize(&mut self, mut rewrite_ino: impl FnMut(u64) -> u64) {
        self.records.sort_by(|a, b| a.name.cmp(&b.name));
        for record in &mut self.records {
            record.ino = rewrite_ino(record.ino);
        }
        self.ready = true;
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn has_records(&self) -> bool {
        self.next < self.records.len()
    }

    /// Encode as many pending records as fit into `max_bytes`. An empty
    /// result with `has_records()` still true means the caller's buffer
    /// cannot even hold the next record.
    pub fn next_chunk(&mut self, max_bytes: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while self.next < self.records.len() {
            let record = &self.records[self.next];
            if out.len() + encoded_len(self.layout, record.name.len()) > max_bytes {
                break;
            }
            self.served += 1;
            encode_into(self.layout, record, self.served, &mut out);
            self.next += 1;
        }
        out
    }
}

/// Per-fd buffers held by one tracee.
pub type DirEntryBuffers = HashMap<i32, DirEntries>;

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_fixture() -> Vec<u8> {
        let mut bytes = Vec::new();
        for (ino, dtype, name) in &[(9000u64, libc::DT_REG, &b"zeta"[..]), (7777, libc::DT_DIR, &b"alpha"[..])] {
            let record = DirRecord {
                ino: *ino,
                dtype: *dtype,
                name: name.to_vec(),
            };
            encode_into(DirentLayout::Wide, &record, 1, &mut bytes);
        }
        bytes
    }

    #[test]
    fn parses_what_it_encodes() {
        let mut entries = DirEntries::new(DirentLayout::Wide);
        entries.absorb(&wide_fixture());
        assert_eq!(entries.records.len(), 2);
        assert_eq!(entries.records[0].name, b"zeta");
        assert_eq!(entries.records[0].ino, 9000);
        assert_eq!(entries.records[1].dtype, libc::DT_DIR);
    }

    #[test]
    fn finalize_sorts_by_name_and_rewrites_inodes() {
        let mut entries = DirEntries::new(DirentLayout::Wide);
        entries.absorb(&wide_fixture());
        let mut fresh = 0;
        entries.finalize(|_| {
            fresh += 1;
            fresh
        });
        assert_eq!(entries.records[0].name, b"alpha");
        assert_eq!(entries.records[0].ino, 1);
        assert_eq!(entries.records[1].name, b"zeta");
        assert_eq!(entries.records[1].ino, 2);
    }

    #[test]
    fn chunks_respect_the_byte_budget() {
        let mut entries = DirEntries::new(DirentLayout::Wide);
        entries.absorb(&wide_fixture());
        entries.finalize(|ino| ino);

        // too small for even one record
        let none = entries.next_chunk(8);
        assert!(none.is_empty());
        assert!(entries.has_records());

        let first = entries.next_chunk(32);
        assert!(!first.is_empty());
        assert!(entries.has_records());
        let rest = entries.next_chunk(4096);
        assert!(!rest.is_empty());
        assert!(!entries.has_records());
        assert!(entries.next_chunk(4096).is_empty());
    }

    #[test]
    fn legacy_records_park_the_type_byte_at_the_tail() {
        let record = DirRecord {
            ino: 5,
            dtype: libc::DT_FIFO,
            name: b"pipe".to_vec(),
        };
        let mut bytes = Vec::new();
        encode_into(DirentLayout::Legacy, &record, 1, &mut bytes);
        assert_eq!(bytes.len() % 8, 0);
        assert_eq!(bytes[bytes.len() - 1], libc::DT_FIFO);

        let mut entries = DirEntries::new(DirentLayout::Legacy);
        entries.absorb(&bytes);
        assert_eq!(entries.records.len(), 1);
        assert_eq!(entries.records[0], record);
    }

    #[test]
    fn truncated_buffers_are_ignored_past_the_damage() {
        let mut bytes = wide_fixture();
        bytes.truncate(bytes.len() - 4);
        let mut entries = DirEntries::new(DirentLayout::Wide);
        entries.absorb(&bytes);
        assert_eq!(entries.records.len(), 1);
    }
}
