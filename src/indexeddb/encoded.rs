//! Comparison of type-tagged encoded key values.

use std::cmp::Ordering;

use super::keys::{
    compare_f64, decode_var_int, key_type_rank, KeyError, KEY_ARRAY_TYPE_BYTE,
    KEY_BINARY_TYPE_BYTE, KEY_DATE_TYPE_BYTE, KEY_MIN_KEY_TYPE_BYTE, KEY_NULL_TYPE_BYTE,
    KEY_NUMBER_TYPE_BYTE, KEY_STRING_TYPE_BYTE, MAX_KEY_DEPTH,
};

/// Remaining input on each side plus the ordering decided so far.
pub(super) type Compared<'a, 'b> = (&'a [u8], &'b [u8], Ordering);

/// When either side has run out of bytes, the shorter one sorts first.
pub(super) fn exhausted(a: &[u8], b: &[u8]) -> Option<Ordering> {
    (a.is_empty() || b.is_empty()).then(|| a.len().cmp(&b.len()))
}

/// Compares one encoded key from the front of each slice.
pub(super) fn compare_encoded_keys<'a, 'b>(
    a: &'a [u8],
    b: &'b [u8],
    depth: usize,
) -> Result<Compared<'a, 'b>, KeyError> {
    if depth > MAX_KEY_DEPTH {
        return Err(KeyError::TooDeep(MAX_KEY_DEPTH));
    }
    if let Some(ordering) = exhausted(a, b) {
        return Ok((a, b, ordering));
    }

    let type_byte = a[0];
    let ranked = key_type_rank(a[0]).cmp(&key_type_rank(b[0]));
    let (a, b) = (&a[1..], &b[1..]);
    if ranked != Ordering::Equal {
        return Ok((a, b, ranked));
    }

    match type_byte {
        KEY_NULL_TYPE_BYTE | KEY_MIN_KEY_TYPE_BYTE => Ok((a, b, Ordering::Equal)),
        KEY_ARRAY_TYPE_BYTE | KEY_BINARY_TYPE_BYTE | KEY_STRING_TYPE_BYTE | KEY_DATE_TYPE_BYTE
        | KEY_NUMBER_TYPE_BYTE => {
            if let Some(ordering) = exhausted(a, b) {
                return Ok((a, b, ordering));
            }
            match type_byte {
                KEY_ARRAY_TYPE_BYTE => compare_arrays(a, b, depth),
                KEY_BINARY_TYPE_BYTE => compare_binary(a, b),
                KEY_STRING_TYPE_BYTE => compare_string_with_length(a, b),
                _ => compare_double(a, b),
            }
        }
        other => Err(KeyError::InvalidKeyType(other)),
    }
}

fn compare_arrays<'a, 'b>(
    a: &'a [u8],
    b: &'b [u8],
    depth: usize,
) -> Result<Compared<'a, 'b>, KeyError> {
    let (mut a, length_a) = decode_var_int(a)?;
    let (mut b, length_b) = decode_var_int(b)?;

    // every element consumes at least its type byte, so this is bounded by the input
    for _ in 0..length_a.min(length_b) {
        if a.is_empty() || b.is_empty() {
            break;
        }
        let (rest_a, rest_b, ordering) = compare_encoded_keys(a, b, depth + 1)?;
        if ordering != Ordering::Equal {
            return Ok((rest_a, rest_b, ordering));
        }
        a = rest_a;
        b = rest_b;
    }

    Ok((a, b, length_a.cmp(&length_b)))
}

fn compare_binary<'a, 'b>(a: &'a [u8], b: &'b [u8]) -> Result<Compared<'a, 'b>, KeyError> {
    let (a, length_a) = decode_var_int(a)?;
    let (b, length_b) = decode_var_int(b)?;
    Ok(compare_length_prefixed(
        a,
        b,
        length_a as u64,
        length_b as u64,
        length_a.cmp(&length_b),
    ))
}

/// A varint count of UTF-16 code units followed by the units themselves.
pub(super) fn compare_string_with_length<'a, 'b>(
    a: &'a [u8],
    b: &'b [u8],
) -> Result<Compared<'a, 'b>, KeyError> {
    let (a, units_a) = decode_var_int(a)?;
    let (b, units_b) = decode_var_int(b)?;
    Ok(compare_length_prefixed(
        a,
        b,
        (units_a as u64).wrapping_mul(2),
        (units_b as u64).wrapping_mul(2),
        units_a.cmp(&units_b),
    ))
}

/// Compares two byte runs of declared length. A truncated side compares only the bytes both
/// sides actually have, falling back to `truncated_tie` and consuming the rest of the input.
fn compare_length_prefixed<'a, 'b>(
    a: &'a [u8],
    b: &'b [u8],
    length_a: u64,
    length_b: u64,
    truncated_tie: Ordering,
) -> Compared<'a, 'b> {
    let available_a = a.len() as u64;
    let available_b = b.len() as u64;

    if available_a < length_a || available_b < length_b {
        let shared = length_a.min(length_b).min(available_a).min(available_b) as usize;
        let ordering = a[..shared].cmp(&b[..shared]).then(truncated_tie);
        return (&[], &[], ordering);
    }

    let (value_a, rest_a) = a.split_at(length_a as usize);
    let (value_b, rest_b) = b.split_at(length_b as usize);
    (rest_a, rest_b, value_a.cmp(value_b))
}

fn compare_double<'a, 'b>(a: &'a [u8], b: &'b [u8]) -> Result<Compared<'a, 'b>, KeyError> {
    let (Some((value_a, rest_a)), Some((value_b, rest_b))) =
        (a.split_first_chunk::<8>(), b.split_first_chunk::<8>())
    else {
        return Err(KeyError::ShortDouble {
            len_a: a.len(),
            len_b: b.len(),
        });
    };

    let ordering = compare_f64(f64::from_ne_bytes(*value_a), f64::from_ne_bytes(*value_b));
    Ok((rest_a, rest_b, ordering))
}
