//! Key ordering for Chromium's IndexedDB LevelDB backing stores.
//!
//! Chromium opens these stores with a custom comparator named `idb_cmp1`. A store can only be
//! read by an engine that orders keys identically, so [`IdbCmp1Comparator`] reproduces that
//! ordering over raw key bytes.
//!
//! Keys come from disk and may be corrupt. The comparator never panics on bad input: any
//! decoding failure is logged with both keys and the pair compares equal.

mod encoded;
mod keys;
mod metadata;

use std::cmp::Ordering;

use tracing::{error, Dispatch};

use self::{
    encoded::{compare_encoded_keys, exhausted},
    metadata::{DATABASE_METADATA, GLOBAL_METADATA},
};

pub use self::keys::{
    compare_f64, decode_var_int, encode_var_int, IdbKey, KeyError, KeyPrefix, PrefixType,
    MAX_KEY_DEPTH,
};

pub const IDB_CMP1_NAME: &str = "idb_cmp1";

/// Ordering hooks a LevelDB-compatible storage engine needs from a custom comparator.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Must match the name the store was created with.
    fn name(&self) -> &'static str;

    /// A short key in `[start, limit)`, or `None` to keep `start` as is.
    fn separator(&self, _start: &[u8], _limit: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// A short key `>= key`, or `None` to keep `key` as is.
    fn successor(&self, _key: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// The `idb_cmp1` ordering.
///
/// Failures are reported through the [`Dispatch`] captured at construction, so the comparator
/// can be handed to a storage engine running on threads without the caller's subscriber.
#[derive(Clone, Debug)]
pub struct IdbCmp1Comparator {
    logger: Dispatch,
}

impl IdbCmp1Comparator {
    /// Logs to whichever subscriber is current on the calling thread.
    pub fn new() -> Self {
        Self::with_dispatch(tracing::dispatcher::get_default(Dispatch::clone))
    }

    pub fn with_dispatch(logger: Dispatch) -> Self {
        Self { logger }
    }
}

impl Default for IdbCmp1Comparator {
    fn default() -> Self {
        Self::new()
    }
}

impl Comparator for IdbCmp1Comparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match compare_keys(a, b) {
            Ok(ordering) => ordering,
            Err(err) => {
                tracing::dispatcher::with_default(&self.logger, || {
                    error!(
                        component = "idb_cmp1_comparer",
                        key_a = %hex::encode(a),
                        key_b = %hex::encode(b),
                        error = %err,
                        "failed to compare indexeddb keys"
                    );
                });
                Ordering::Equal
            }
        }
    }

    fn name(&self) -> &'static str {
        IDB_CMP1_NAME
    }
}

fn compare_keys(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    let (a, prefix_a) = KeyPrefix::decode(a)?;
    let (b, prefix_b) = KeyPrefix::decode(b)?;

    let ordering = prefix_a.cmp(&prefix_b);
    if ordering != Ordering::Equal {
        return Ok(ordering);
    }

    match prefix_a.prefix_type() {
        PrefixType::GlobalMetadata => GLOBAL_METADATA.compare(a, b),
        PrefixType::DatabaseMetadata => DATABASE_METADATA.compare(a, b),
        PrefixType::ObjectStoreData | PrefixType::ExistsEntry | PrefixType::BlobEntry => {
            compare_encoded_keys(a, b, 0).map(|(_, _, ordering)| ordering)
        }
        PrefixType::IndexData => compare_index_data(a, b),
        PrefixType::Invalid => Err(KeyError::InvalidPrefixType(prefix_a)),
    }
}

/// Index entries are the user key, an optional sequence number, then the primary key. The
/// sequence number only breaks ties after the primary key.
fn compare_index_data(a: &[u8], b: &[u8]) -> Result<Ordering, KeyError> {
    let (a, b, ordering) = compare_encoded_keys(a, b, 0)?;
    if ordering != Ordering::Equal {
        return Ok(ordering);
    }

    let (a, sequence_a) = decode_sequence_number(a)?;
    let (b, sequence_b) = decode_sequence_number(b)?;

    if let Some(ordering) = exhausted(a, b) {
        return Ok(ordering);
    }

    let (_, _, ordering) = compare_encoded_keys(a, b, 0)?;
    if ordering != Ordering::Equal {
        return Ok(ordering);
    }

    Ok(sequence_a.cmp(&sequence_b))
}

fn decode_sequence_number(key: &[u8]) -> Result<(&[u8], i64), KeyError> {
    if key.is_empty() {
        return Ok((key, -1));
    }
    decode_var_int(key)
}
