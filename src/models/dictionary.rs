//! Dictionary entry and external record models
//!
//! Street and settlement dictionaries share one row shape, so a single
//! `DictionaryEntry` tagged with its `DictionaryKind` covers both tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Character length of a street-level KLADR code.
pub const STREET_KEY_LENGTH: usize = 17;

/// Number of trailing characters dropped to reach the parent unit.
pub const PARENT_SUFFIX_LENGTH: usize = 2;

/// Which address dictionary a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DictionaryKind {
    Street,
    Settlement,
}

impl DictionaryKind {
    pub const ALL: [DictionaryKind; 2] = [DictionaryKind::Street, DictionaryKind::Settlement];

    /// Route a trimmed, nonempty key code to its dictionary.
    pub fn for_key_code(key_code: &str) -> Self {
        if key_code.chars().count() == STREET_KEY_LENGTH {
            DictionaryKind::Street
        } else {
            DictionaryKind::Settlement
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DictionaryKind::Street => "street",
            DictionaryKind::Settlement => "settlement",
        }
    }
}

impl fmt::Display for DictionaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a street or settlement dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub kind: DictionaryKind,
    pub id: i64,
    pub key_code: String,
    pub external_code: Option<String>,
}

impl DictionaryEntry {
    pub fn new(kind: DictionaryKind, id: i64, key_code: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            key_code: key_code.into(),
            external_code: None,
        }
    }

    /// Overwrite the external code (last writer wins).
    pub fn stamp(&mut self, external_code: &str) {
        self.external_code = Some(external_code.to_string());
    }
}

/// One decoded source row: the pair of codes the pipeline consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRecord {
    pub external_code: String,
    pub key_code: String,
}

impl ExternalRecord {
    /// Build a record, trimming surrounding whitespace from both codes.
    pub fn new(external_code: &str, key_code: &str) -> Self {
        Self {
            external_code: external_code.trim().to_string(),
            key_code: key_code.trim().to_string(),
        }
    }

    /// Key code minus its last two characters.
    ///
    /// `None` for keys shorter than two characters. A two-character key
    /// yields the empty prefix, which matches every row of the dictionary.
    pub fn parent_prefix(&self) -> Option<&str> {
        let len = self.key_code.chars().count();
        if len < PARENT_SUFFIX_LENGTH {
            return None;
        }
        let cut = self
            .key_code
            .char_indices()
            .nth(len - PARENT_SUFFIX_LENGTH)
            .map(|(idx, _)| idx)
            .unwrap_or(self.key_code.len());
        Some(&self.key_code[..cut])
    }
}
