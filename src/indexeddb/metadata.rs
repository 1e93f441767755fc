//! Per-type-byte comparison of global and database metadata keys.

use std::cmp::Ordering;

use super::{
    encoded::{compare_string_with_length, exhausted},
    keys::{decode_var_int, KeyError},
};

/// Compares the bytes following two equal metadata type bytes.
pub(super) type SubComparator = fn(&[u8], &[u8]) -> Result<Ordering, KeyError>;

const MAX_SIMPLE_GLOBAL_METADATA_TYPE_BYTE: u8 = 7;
const SCOPES_PREFIX_BYTE: u8 = 50;
const DATABASE_FREE_LIST_TYPE_BYTE: u8 = 100;
const DATABASE_NAME_TYPE_BYTE: u8 = 201;

const MAX_SIMPLE_DATABASE_METADATA_TYPE_BYTE: u8 = 6;
const OBJECT_STORE_METADATA_TYPE_BYTE: u8 = 50;
const INDEX_METADATA_TYPE_BYTE: u8 = 100;
const OBJECT_STORE_FREE_LIST_TYPE_BYTE: u8 = 150;
const INDEX_FREE_LIST_TYPE_BYTE: u8 = 151;
const OBJECT_STORE_NAMES_TYPE_BYTE: u8 = 200;
const INDEX_NAMES_KEY_TYPE_BYTE: u8 = 201;

pub(super) struct MetadataTable {
    name: &'static str,
    /// Type bytes below this carry no payload and compare equal.
    max_simple_type_byte: u8,
    entries: [Option<SubComparator>; 256],
}

pub(super) static GLOBAL_METADATA: MetadataTable = MetadataTable {
    name: "global metadata",
    max_simple_type_byte: MAX_SIMPLE_GLOBAL_METADATA_TYPE_BYTE,
    entries: global_metadata_entries(),
};

pub(super) static DATABASE_METADATA: MetadataTable = MetadataTable {
    name: "database metadata",
    max_simple_type_byte: MAX_SIMPLE_DATABASE_METADATA_TYPE_BYTE,
    entries: database_metadata_entries(),
};

const fn global_metadata_entries() -> [Option<SubComparator>; 256] {
    let mut entries: [Option<SubComparator>; 256] = [None; 256];
    entries[SCOPES_PREFIX_BYTE as usize] = Some(compare_remaining);
    entries[DATABASE_FREE_LIST_TYPE_BYTE as usize] = Some(compare_database_free_list);
    entries[DATABASE_NAME_TYPE_BYTE as usize] = Some(compare_database_name);
    entries
}

const fn database_metadata_entries() -> [Option<SubComparator>; 256] {
    let mut entries: [Option<SubComparator>; 256] = [None; 256];
    entries[OBJECT_STORE_METADATA_TYPE_BYTE as usize] = Some(compare_object_store_metadata);
    entries[INDEX_METADATA_TYPE_BYTE as usize] = Some(compare_index_metadata);
    entries[OBJECT_STORE_FREE_LIST_TYPE_BYTE as usize] = Some(compare_object_store_free_list);
    entries[INDEX_FREE_LIST_TYPE_BYTE as usize] = Some(compare_index_free_list);
    entries[OBJECT_STORE_NAMES_TYPE_BYTE as usize] = Some(compare_object_store_names);
    entries[INDEX_NAMES_KEY_TYPE_BYTE as usize] = Some(compare_index_names);
    entries
}

impl MetadataTable {
    /// Compares two metadata keys with their prefixes already stripped.
    pub(super) fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
        if let Some(ordering) = exhausted(a, b) {
            return Ok(ordering);
        }

        let type_byte = a[0];
        let ordering = type_byte.cmp(&b[0]);
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
        if type_byte < self.max_simple_type_byte {
            return Ok(Ordering::Equal);
        }

        match self.entries[usize::from(type_byte)] {
            Some(compare) => compare(&a[1..], &b[1..]),
            None => Err(KeyError::InvalidMetadataTypeByte {
                table: self.name,
                type_byte,
            }),
        }
    }
}

/// Early return out of a sub-comparator once an ordering is decided.
macro_rules! decided {
    ($ordering:expr) => {
        let ordering: Ordering = $ordering;
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    };
}

/// Early return when either side is out of input.
macro_rules! guard_exhausted {
    ($a:expr, $b:expr) => {
        if let Some(ordering) = exhausted($a, $b) {
            return Ok(ordering);
        }
    };
}

fn compare_remaining(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    Ok(a.cmp(b))
}

fn compare_database_free_list(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (_, database_id_a) = decode_var_int(a)?;
    let (_, database_id_b) = decode_var_int(b)?;
    Ok(database_id_a.cmp(&database_id_b))
}

/// Origin, then database name.
fn compare_database_name(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (a, b, ordering) = compare_string_with_length(a, b)?;
    decided!(ordering);
    guard_exhausted!(a, b);
    let (_, _, ordering) = compare_string_with_length(a, b)?;
    Ok(ordering)
}

fn compare_object_store_metadata(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (a, object_store_id_a) = decode_var_int(a)?;
    let (b, object_store_id_b) = decode_var_int(b)?;
    decided!(object_store_id_a.cmp(&object_store_id_b));
    guard_exhausted!(a, b);
    // metadata type byte
    Ok(a[0].cmp(&b[0]))
}

fn compare_index_metadata(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (a, object_store_id_a) = decode_var_int(a)?;
    let (b, object_store_id_b) = decode_var_int(b)?;
    decided!(object_store_id_a.cmp(&object_store_id_b));
    guard_exhausted!(a, b);
    let (a, index_id_a) = decode_var_int(a)?;
    let (b, index_id_b) = decode_var_int(b)?;
    decided!(index_id_a.cmp(&index_id_b));
    guard_exhausted!(a, b);
    Ok(a[0].cmp(&b[0]))
}

fn compare_object_store_free_list(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (_, object_store_id_a) = decode_var_int(a)?;
    let (_, object_store_id_b) = decode_var_int(b)?;
    Ok(object_store_id_a.cmp(&object_store_id_b))
}

fn compare_index_free_list(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (a, object_store_id_a) = decode_var_int(a)?;
    let (b, object_store_id_b) = decode_var_int(b)?;
    decided!(object_store_id_a.cmp(&object_store_id_b));
    guard_exhausted!(a, b);
    let (_, index_id_a) = decode_var_int(a)?;
    let (_, index_id_b) = decode_var_int(b)?;
    Ok(index_id_a.cmp(&index_id_b))
}

fn compare_object_store_names(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (_, _, ordering) = compare_string_with_length(a, b)?;
    Ok(ordering)
}

fn compare_index_names(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    guard_exhausted!(a, b);
    let (a, object_store_id_a) = decode_var_int(a)?;
    let (b, object_store_id_b) = decode_var_int(b)?;
    decided!(object_store_id_a.cmp(&object_store_id_b));
    guard_exhausted!(a, b);
    let (_, _, ordering) = compare_string_with_length(a, b)?;
    Ok(ordering)
}
