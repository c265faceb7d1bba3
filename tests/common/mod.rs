//! Shared fixtures for the integration tests: an ADDROB table writer and
//! a ZIP builder.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

/// ADDROB column layout; AOGUID sits at position 1 and CODE at position 8.
const ADDROB_FIELDS: [(&str, usize); 9] = [
    ("ACTSTATUS", 2),
    ("AOGUID", 36),
    ("AOID", 36),
    ("AOLEVEL", 2),
    ("AREACODE", 3),
    ("AUTOCODE", 1),
    ("CENTSTATUS", 2),
    ("CITYCODE", 3),
    ("CODE", 17),
];

/// One source row
#[derive(Debug, Clone)]
pub struct AddrobRow {
    pub aoguid: String,
    pub code: String,
    pub deleted: bool,
}

impl AddrobRow {
    pub fn new(aoguid: &str, code: &str) -> Self {
        Self {
            aoguid: aoguid.to_string(),
            code: code.to_string(),
            deleted: false,
        }
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// Encode rows as a dBase III table with the ADDROB layout.
pub fn addrob_table(rows: &[AddrobRow]) -> Vec<u8> {
    let record_len = 1 + ADDROB_FIELDS.iter().map(|(_, len)| len).sum::<usize>();
    let header_len = 32 + ADDROB_FIELDS.len() * 32 + 1;

    let mut out = vec![0u8; 32];
    out[0] = 0x03;
    out[4..8].copy_from_slice(&(rows.len() as u32).to_le_bytes());
    out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());

    for (name, len) in ADDROB_FIELDS {
        let mut descriptor = [0u8; 32];
        descriptor[..name.len()].copy_from_slice(name.as_bytes());
        descriptor[11] = b'C';
        descriptor[16] = len as u8;
        out.extend_from_slice(&descriptor);
    }
    out.push(0x0D);

    for row in rows {
        out.push(if row.deleted { b'*' } else { b' ' });
        for (position, (_, len)) in ADDROB_FIELDS.iter().enumerate() {
            let value = match position {
                1 => row.aoguid.as_str(),
                8 => row.code.as_str(),
                _ => "",
            };
            let mut cell = value.as_bytes().to_vec();
            cell.resize(*len, b' ');
            out.extend_from_slice(&cell);
        }
    }
    out.push(0x1A);
    out
}

/// Write a ZIP archive of `(entry name, bytes)` into `dir` and return its path.
pub fn write_archive(dir: &Path, name: &str, entries: &[(&str, Vec<u8>)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (entry, bytes) in entries {
        zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Staging directories still present under `dir` after a run.
pub fn leftover_staging_dirs(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect()
}
