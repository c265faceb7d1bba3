//! Record source for FIAS address-object extracts
//!
//! `SourceSchema` names the two columns the pipeline consumes and is checked
//! against the table header once, when the file is opened. Every record after
//! that is read through the validated positions.

pub mod dbf;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use encoding_rs::{Encoding, IBM866};

use crate::error::FormatError;
use crate::models::ExternalRecord;

pub use dbf::{DbfReader, DbfRecord, FieldDescriptor};

/// Codepage of the published FIAS DBF extracts.
pub fn source_encoding() -> &'static Encoding {
    IBM866
}

/// A named column expected at a fixed position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBinding {
    pub name: &'static str,
    pub position: usize,
}

/// Column layout the pipeline depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSchema {
    pub external_code: FieldBinding,
    pub key_code: FieldBinding,
}

impl SourceSchema {
    /// `ADDROB*.DBF`: AOGUID is the registry code, CODE the KLADR code.
    pub const FIAS_ADDROB: SourceSchema = SourceSchema {
        external_code: FieldBinding {
            name: "AOGUID",
            position: 1,
        },
        key_code: FieldBinding {
            name: "CODE",
            position: 8,
        },
    };

    /// Check both bindings against a table header.
    pub fn bind(&self, fields: &[FieldDescriptor]) -> Result<BoundSchema, FormatError> {
        for binding in [self.external_code, self.key_code] {
            match fields.get(binding.position) {
                Some(field) if field.name.eq_ignore_ascii_case(binding.name) => {}
                Some(field) => {
                    return Err(FormatError::SchemaMismatch {
                        expected: binding.name,
                        position: binding.position,
                        found: format!("'{}'", field.name),
                    })
                }
                None => {
                    return Err(FormatError::SchemaMismatch {
                        expected: binding.name,
                        position: binding.position,
                        found: format!("only {} fields", fields.len()),
                    })
                }
            }
        }
        Ok(BoundSchema {
            external_code: self.external_code.position,
            key_code: self.key_code.position,
            field_count: fields.len(),
        })
    }
}

impl Default for SourceSchema {
    fn default() -> Self {
        Self::FIAS_ADDROB
    }
}

/// Positions proven valid for one table
#[derive(Debug, Clone, Copy)]
pub struct BoundSchema {
    external_code: usize,
    key_code: usize,
    field_count: usize,
}

impl BoundSchema {
    pub fn extract(&self, record: &DbfRecord) -> ExternalRecord {
        debug_assert_eq!(record.fields.len(), self.field_count);
        ExternalRecord::new(
            &record.fields[self.external_code],
            &record.fields[self.key_code],
        )
    }
}

/// Lazy, forward-only stream of external records from one table
pub struct RecordSource<R> {
    reader: DbfReader<R>,
    schema: BoundSchema,
}

impl RecordSource<BufReader<File>> {
    /// Open an extracted file and validate its layout.
    pub fn open(path: &Path, schema: &SourceSchema) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), source_encoding(), schema)
    }
}

impl<R: Read> RecordSource<R> {
    pub fn from_reader(
        reader: R,
        encoding: &'static Encoding,
        schema: &SourceSchema,
    ) -> Result<Self, FormatError> {
        let reader = DbfReader::new(reader, encoding)?;
        let schema = schema.bind(reader.fields())?;
        Ok(Self { reader, schema })
    }

    /// Record count declared by the table header.
    pub fn total_records(&self) -> u32 {
        self.reader.record_count()
    }
}

impl<R: Read> Iterator for RecordSource<R> {
    type Item = Result<ExternalRecord, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        let schema = self.schema;
        self.reader
            .next()
            .map(|record| record.map(|r| schema.extract(&r)))
    }
}
