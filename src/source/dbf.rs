//! Streaming dBase III table reader
//!
//! Reads the header and field descriptors up front, then decodes one record
//! per `next()` call. Only the current record is held in memory.

use std::io::{ErrorKind, Read};

use encoding_rs::Encoding;

use crate::error::FormatError;

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const LIVE_FLAG: u8 = b' ';
const DELETED_FLAG: u8 = b'*';

/// One column from the table header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: char,
    pub length: usize,
}

/// One live record, every field decoded to text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfRecord {
    /// Physical position in the table, counting deleted records
    pub index: u32,
    pub fields: Vec<String>,
}

/// Forward-only DBF record iterator
pub struct DbfReader<R> {
    reader: R,
    encoding: &'static Encoding,
    fields: Vec<FieldDescriptor>,
    record_count: u32,
    record_len: usize,
    next_index: u32,
    buf: Vec<u8>,
    done: bool,
}

impl<R: Read> DbfReader<R> {
    /// Parse the table header. Leaves `reader` positioned at the first record.
    pub fn new(mut reader: R, encoding: &'static Encoding) -> Result<Self, FormatError> {
        let mut header = [0u8; HEADER_LEN];
        let found = read_full(&mut reader, &mut header)?;
        if found < HEADER_LEN {
            return Err(FormatError::TruncatedHeader {
                expected: HEADER_LEN,
                found,
            });
        }

        let record_count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let header_len = u16::from_le_bytes([header[8], header[9]]) as usize;
        let record_len = u16::from_le_bytes([header[10], header[11]]) as usize;

        if header_len < HEADER_LEN + 1 {
            return Err(FormatError::InvalidHeader {
                message: format!("header length {} is too small", header_len),
            });
        }
        if record_len == 0 {
            return Err(FormatError::InvalidHeader {
                message: "record length is zero".to_string(),
            });
        }

        let mut descriptor_block = vec![0u8; header_len - HEADER_LEN];
        let found = read_full(&mut reader, &mut descriptor_block)?;
        if found < descriptor_block.len() {
            return Err(FormatError::TruncatedHeader {
                expected: header_len,
                found: HEADER_LEN + found,
            });
        }

        let fields = parse_descriptors(&descriptor_block, encoding)?;
        let data_len: usize = fields.iter().map(|f| f.length).sum();
        if data_len + 1 > record_len {
            return Err(FormatError::InvalidHeader {
                message: format!(
                    "fields need {} bytes but records are {} bytes",
                    data_len + 1,
                    record_len
                ),
            });
        }

        Ok(Self {
            reader,
            encoding,
            fields,
            record_count,
            record_len,
            next_index: 0,
            buf: vec![0u8; record_len],
            done: false,
        })
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Record count from the header, deleted records included.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    fn read_record(&mut self) -> Result<Option<DbfRecord>, FormatError> {
        loop {
            if self.next_index >= self.record_count {
                return Ok(None);
            }
            let index = self.next_index;

            let found = read_full(&mut self.reader, &mut self.buf)?;
            if found == 0 || self.buf[0] == END_OF_FILE {
                return Ok(None);
            }
            if found < self.record_len {
                return Err(FormatError::TruncatedRecord {
                    index,
                    expected: self.record_len,
                    found,
                });
            }
            self.next_index += 1;

            match self.buf[0] {
                LIVE_FLAG => return self.decode_fields(index).map(Some),
                DELETED_FLAG => continue,
                flag => return Err(FormatError::InvalidDeletionFlag { index, flag }),
            }
        }
    }

    fn decode_fields(&self, index: u32) -> Result<DbfRecord, FormatError> {
        let mut offset = 1;
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let raw = &self.buf[offset..offset + field.length];
            offset += field.length;

            let (text, had_errors) = self.encoding.decode_without_bom_handling(raw);
            if had_errors {
                return Err(FormatError::Encoding {
                    index,
                    field: field.name.clone(),
                    encoding: self.encoding.name(),
                });
            }
            values.push(text.trim_end_matches([' ', '\0']).to_string());
        }
        Ok(DbfRecord {
            index,
            fields: values,
        })
    }
}

impl<R: Read> Iterator for DbfReader<R> {
    type Item = Result<DbfRecord, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn parse_descriptors(
    block: &[u8],
    encoding: &'static Encoding,
) -> Result<Vec<FieldDescriptor>, FormatError> {
    let mut fields = Vec::new();
    let mut offset = 0;
    loop {
        match block.get(offset) {
            Some(&DESCRIPTOR_TERMINATOR) => break,
            Some(_) if offset + DESCRIPTOR_LEN <= block.len() => {}
            _ => {
                return Err(FormatError::InvalidHeader {
                    message: "field descriptor terminator not found".to_string(),
                })
            }
        }

        let descriptor = &block[offset..offset + DESCRIPTOR_LEN];
        let name_end = descriptor[..11].iter().position(|&b| b == 0).unwrap_or(11);
        let (name, _) = encoding.decode_without_bom_handling(&descriptor[..name_end]);

        fields.push(FieldDescriptor {
            name: name.trim().to_string(),
            field_type: descriptor[11] as char,
            length: descriptor[16] as usize,
        });
        offset += DESCRIPTOR_LEN;
    }

    if fields.is_empty() {
        return Err(FormatError::InvalidHeader {
            message: "table declares no fields".to_string(),
        });
    }
    Ok(fields)
}

/// Fill `buf` as far as the stream allows; returns the byte count read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
