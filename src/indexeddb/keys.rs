//! Primitive decoders and the typed key model for the IndexedDB LevelDB coding scheme.
//!
//! See <https://chromium.googlesource.com/chromium/src/+/main/content/browser/indexed_db/docs/leveldb_coding_scheme.md>

use std::cmp::Ordering;

/// Array keys nested deeper than this are treated as corrupt.
pub const MAX_KEY_DEPTH: usize = 2000;

const MAX_VAR_INT_BYTES: usize = 9;

pub(crate) const KEY_NULL_TYPE_BYTE: u8 = 0;
pub(crate) const KEY_STRING_TYPE_BYTE: u8 = 1;
pub(crate) const KEY_DATE_TYPE_BYTE: u8 = 2;
pub(crate) const KEY_NUMBER_TYPE_BYTE: u8 = 3;
pub(crate) const KEY_ARRAY_TYPE_BYTE: u8 = 4;
pub(crate) const KEY_MIN_KEY_TYPE_BYTE: u8 = 5;
pub(crate) const KEY_BINARY_TYPE_BYTE: u8 = 6;

/// Sort rank of each key type byte, indexed by the byte. Unknown bytes rank with null.
const KEY_TYPE_RANK: [u8; 7] = [
    0, // null
    3, // string
    4, // date
    5, // number
    1, // array
    7, // min key
    2, // binary
];

const OBJECT_STORE_DATA_INDEX_ID: i64 = 1;
const EXISTS_ENTRY_INDEX_ID: i64 = 2;
const BLOB_ENTRY_INDEX_ID: i64 = 3;
const MINIMUM_INDEX_ID: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid empty key provided to decode key prefix")]
    EmptyKey,

    #[error(
        "invalid key provided to decode key prefix (insufficient length for prefix bytes: need {needed}, have {available})"
    )]
    InsufficientPrefixLength { needed: usize, available: usize },

    #[error("invalid key provided for varint decode")]
    InvalidVarInt,

    #[error(
        "invalid keys provided for double comparison (must be at least 8 bytes): len_a={len_a} len_b={len_b}"
    )]
    ShortDouble { len_a: usize, len_b: usize },

    #[error("invalid key type byte {0:#04x} in encoded key")]
    InvalidKeyType(u8),

    #[error("invalid key prefix type byte {type_byte:#04x} for {table}")]
    InvalidMetadataTypeByte { table: &'static str, type_byte: u8 },

    #[error("invalid key prefix type for {0:?}")]
    InvalidPrefixType(KeyPrefix),

    #[error("encoded key nesting exceeds maximum depth of {0}")]
    TooDeep(usize),

    #[error("key prefix {0:?} cannot be encoded")]
    UnencodablePrefix(KeyPrefix),
}

/// Which part of the database a key belongs to, derived from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixType {
    GlobalMetadata,
    DatabaseMetadata,
    ObjectStoreData,
    ExistsEntry,
    BlobEntry,
    IndexData,
    Invalid,
}

/// The `(database, object store, index)` triple at the start of every key.
///
/// Field order matters: the derived ordering is the prefix ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPrefix {
    pub database_id: i64,
    pub object_store_id: i64,
    pub index_id: i64,
}

impl KeyPrefix {
    pub fn new(database_id: i64, object_store_id: i64, index_id: i64) -> Self {
        Self {
            database_id,
            object_store_id,
            index_id,
        }
    }

    /// Splits the prefix off `key`, returning the remaining bytes.
    ///
    /// The first byte packs the widths of the three ids: 3 bits database, 3 bits object
    /// store, 2 bits index, each stored as `width - 1`.
    pub fn decode(key: &[u8]) -> Result<(&[u8], Self), KeyError> {
        let (&first, rest) = key.split_first().ok_or(KeyError::EmptyKey)?;

        let database_id_bytes = usize::from((first >> 5) & 0x07) + 1;
        let object_store_id_bytes = usize::from((first >> 2) & 0x07) + 1;
        let index_id_bytes = usize::from(first & 0x03) + 1;

        let needed = database_id_bytes + object_store_id_bytes + index_id_bytes;
        if rest.len() < needed {
            return Err(KeyError::InsufficientPrefixLength {
                needed,
                available: rest.len(),
            });
        }

        let (database_id, rest) = rest.split_at(database_id_bytes);
        let (object_store_id, rest) = rest.split_at(object_store_id_bytes);
        let (index_id, rest) = rest.split_at(index_id_bytes);

        Ok((
            rest,
            Self {
                database_id: decode_int(database_id),
                object_store_id: decode_int(object_store_id),
                index_id: decode_int(index_id),
            },
        ))
    }

    /// Encodes the prefix using the narrowest width for each id.
    pub fn encode(&self) -> Result<Vec<u8>, KeyError> {
        if self.database_id < 0 || self.object_store_id < 0 || self.index_id < 0 {
            return Err(KeyError::UnencodablePrefix(*self));
        }

        let database_id_bytes = int_width(self.database_id);
        let object_store_id_bytes = int_width(self.object_store_id);
        let index_id_bytes = int_width(self.index_id);
        if index_id_bytes > 4 {
            return Err(KeyError::UnencodablePrefix(*self));
        }

        let first = (((database_id_bytes - 1) as u8) << 5)
            | (((object_store_id_bytes - 1) as u8) << 2)
            | ((index_id_bytes - 1) as u8);

        let mut out = Vec::with_capacity(1 + database_id_bytes + object_store_id_bytes + index_id_bytes);
        out.push(first);
        out.extend_from_slice(&self.database_id.to_le_bytes()[..database_id_bytes]);
        out.extend_from_slice(&self.object_store_id.to_le_bytes()[..object_store_id_bytes]);
        out.extend_from_slice(&self.index_id.to_le_bytes()[..index_id_bytes]);
        Ok(out)
    }

    pub fn prefix_type(&self) -> PrefixType {
        match self.index_id {
            _ if self.database_id == 0 => PrefixType::GlobalMetadata,
            _ if self.object_store_id == 0 => PrefixType::DatabaseMetadata,
            OBJECT_STORE_DATA_INDEX_ID => PrefixType::ObjectStoreData,
            EXISTS_ENTRY_INDEX_ID => PrefixType::ExistsEntry,
            BLOB_ENTRY_INDEX_ID => PrefixType::BlobEntry,
            id if id >= MINIMUM_INDEX_ID => PrefixType::IndexData,
            _ => PrefixType::Invalid,
        }
    }
}

fn int_width(value: i64) -> usize {
    let bits = 64 - (value as u64).leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Little-endian integer of 1 to 8 bytes.
pub(crate) fn decode_int(bytes: &[u8]) -> i64 {
    bytes
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |value, (i, byte)| value | (u64::from(*byte) << (8 * i))) as i64
}

/// Little-endian base-128 integer; the high bit of each byte marks a continuation.
pub fn decode_var_int(bytes: &[u8]) -> Result<(&[u8], i64), KeyError> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().take(MAX_VAR_INT_BYTES).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((&bytes[i + 1..], value as i64));
        }
    }
    Err(KeyError::InvalidVarInt)
}

pub fn encode_var_int(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn key_type_rank(type_byte: u8) -> u8 {
    KEY_TYPE_RANK
        .get(usize::from(type_byte))
        .copied()
        .unwrap_or(0)
}

/// Orders doubles the way the reference engine does: NaN equals NaN and sorts below every
/// number, and `-0.0` equals `0.0`.
pub fn compare_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// A decoded IndexedDB key.
#[derive(Debug, Clone, PartialEq)]
pub enum IdbKey {
    Null,
    /// UTF-16 code units.
    String(Vec<u16>),
    Date(f64),
    Number(f64),
    Array(Vec<IdbKey>),
    Binary(Vec<u8>),
    MinKey,
}

impl IdbKey {
    pub fn string(value: &str) -> Self {
        Self::String(value.encode_utf16().collect())
    }

    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Null => KEY_NULL_TYPE_BYTE,
            Self::String(_) => KEY_STRING_TYPE_BYTE,
            Self::Date(_) => KEY_DATE_TYPE_BYTE,
            Self::Number(_) => KEY_NUMBER_TYPE_BYTE,
            Self::Array(_) => KEY_ARRAY_TYPE_BYTE,
            Self::MinKey => KEY_MIN_KEY_TYPE_BYTE,
            Self::Binary(_) => KEY_BINARY_TYPE_BYTE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Appends the encoded key: type byte, then a payload whose shape depends on the type.
    /// Strings are big-endian code units and doubles use native byte order.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.type_byte());
        match self {
            Self::Null | Self::MinKey => {}
            Self::String(units) => {
                encode_var_int(units.len() as u64, out);
                for unit in units {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Self::Date(value) | Self::Number(value) => out.extend_from_slice(&value.to_ne_bytes()),
            Self::Array(children) => {
                encode_var_int(children.len() as u64, out);
                for child in children {
                    child.encode_into(out);
                }
            }
            Self::Binary(bytes) => {
                encode_var_int(bytes.len() as u64, out);
                out.extend_from_slice(bytes);
            }
        }
    }

    /// The ordering the byte comparator produces for the encoded forms of two keys.
    pub fn compare(&self, other: &Self) -> Ordering {
        let ranked = key_type_rank(self.type_byte()).cmp(&key_type_rank(other.type_byte()));
        if ranked != Ordering::Equal {
            return ranked;
        }

        match (self, other) {
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) | (Self::Number(a), Self::Number(b)) => {
                compare_f64(*a, *b)
            }
            (Self::Array(a), Self::Array(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.compare(y))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => Ordering::Equal,
        }
    }
}
