//! Domain models shared by the source decoder, the reconciliation engine
//! and the dictionary stores.

pub mod dictionary;

pub use dictionary::{
    DictionaryEntry, DictionaryKind, ExternalRecord, PARENT_SUFFIX_LENGTH, STREET_KEY_LENGTH,
};
