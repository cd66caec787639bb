//! Key encoding.
//!
//! A logical key is the **native** layout of a record's key columns:
//! numerics little-endian, fixed-length binary and NUL-terminated strings
//! as-is, a trailing variable-length column raw. The **storage** key is
//! what the sorted engine sees; when a schema
//! [`needs_byte_lex`](crate::Schema::needs_byte_lex), [`to_storage`]
//! rewrites each column so that unsigned byte-lexicographic comparison of
//! storage keys equals the schema's logical order: unsigned integers go
//! big-endian, signed integers additionally flip the sign bit, and floats
//! use the IEEE total-order bit trick.
//!
//! The transforms are deterministic and reversible given the schema;
//! decoding exists for diagnostics, not the hot path.

use crate::error::{CoreError, CoreResult};
use crate::schema::{ColumnType, Schema};

const SIGN32: u32 = 1 << 31;
const SIGN64: u64 = 1 << 63;

/// A typed column value of a logical key.
///
/// `Float` carries an `f64` for both float column widths; a `Float32`
/// column narrows on encode, so values must be representable in single
/// precision to round-trip exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// Value for the unsigned integer column types.
    Unsigned(u64),
    /// Value for the signed integer column types.
    Signed(i64),
    /// Value for the float column types.
    Float(f64),
    /// Value for `Fixed`, `StrZero`, and `Var` columns.
    Bytes(Vec<u8>),
}

/// Encodes typed column values into a logical key.
///
/// # Errors
///
/// Returns an error when the value list does not match the schema: wrong
/// arity, wrong value kind, out-of-range integers, wrong `Fixed` width, or
/// an interior NUL in a `StrZero` column.
pub fn encode_key(schema: &Schema, values: &[ColumnValue]) -> CoreResult<Vec<u8>> {
    if values.len() != schema.columns().len() {
        return Err(mismatch(
            schema,
            format!(
                "expected {} column values, got {}",
                schema.columns().len(),
                values.len()
            ),
        ));
    }
    let mut out = Vec::new();
    for (col, value) in schema.columns().iter().zip(values) {
        match (col.ty, value) {
            (ColumnType::Uint8, ColumnValue::Unsigned(v)) => {
                out.push(narrow::<u8>(schema, &col.name, *v)?);
            }
            (ColumnType::Uint16, ColumnValue::Unsigned(v)) => {
                out.extend_from_slice(&narrow::<u16>(schema, &col.name, *v)?.to_le_bytes());
            }
            (ColumnType::Uint32, ColumnValue::Unsigned(v)) => {
                out.extend_from_slice(&narrow::<u32>(schema, &col.name, *v)?.to_le_bytes());
            }
            (ColumnType::Uint64, ColumnValue::Unsigned(v)) => {
                out.extend_from_slice(&v.to_le_bytes());
            }
            (ColumnType::Sint8, ColumnValue::Signed(v)) => {
                out.extend_from_slice(&narrow_signed::<i8>(schema, &col.name, *v)?.to_le_bytes());
            }
            (ColumnType::Sint16, ColumnValue::Signed(v)) => {
                out.extend_from_slice(&narrow_signed::<i16>(schema, &col.name, *v)?.to_le_bytes());
            }
            (ColumnType::Sint32, ColumnValue::Signed(v)) => {
                out.extend_from_slice(&narrow_signed::<i32>(schema, &col.name, *v)?.to_le_bytes());
            }
            (ColumnType::Sint64, ColumnValue::Signed(v)) => {
                out.extend_from_slice(&v.to_le_bytes());
            }
            (ColumnType::Float32, ColumnValue::Float(f)) => {
                out.extend_from_slice(&(*f as f32).to_le_bytes());
            }
            (ColumnType::Float64, ColumnValue::Float(f)) => {
                out.extend_from_slice(&f.to_le_bytes());
            }
            (ColumnType::Fixed(len), ColumnValue::Bytes(b)) => {
                if b.len() != len {
                    return Err(mismatch(
                        schema,
                        format!("column {} expects {} bytes, got {}", col.name, len, b.len()),
                    ));
                }
                out.extend_from_slice(b);
            }
            (ColumnType::StrZero, ColumnValue::Bytes(b)) => {
                if b.contains(&0) {
                    return Err(mismatch(
                        schema,
                        format!("column {} contains an interior NUL", col.name),
                    ));
                }
                out.extend_from_slice(b);
                out.push(0);
            }
            (ColumnType::Var, ColumnValue::Bytes(b)) => {
                out.extend_from_slice(b);
            }
            (ty, value) => {
                return Err(mismatch(
                    schema,
                    format!("column {} of type {ty:?} given {value:?}", col.name),
                ));
            }
        }
    }
    Ok(out)
}

/// Decodes a logical key back into typed column values.
///
/// # Errors
///
/// Returns an error when the bytes do not match the schema's layout.
pub fn decode_key(schema: &Schema, logical: &[u8]) -> CoreResult<Vec<ColumnValue>> {
    let mut offset = 0usize;
    let mut values = Vec::with_capacity(schema.columns().len());
    for col in schema.columns() {
        let value = match col.ty {
            ColumnType::Uint8 => ColumnValue::Unsigned(take(schema, logical, &mut offset, 1)?[0].into()),
            ColumnType::Uint16 => {
                let b = take(schema, logical, &mut offset, 2)?;
                ColumnValue::Unsigned(u16::from_le_bytes([b[0], b[1]]).into())
            }
            ColumnType::Uint32 => {
                let b = take(schema, logical, &mut offset, 4)?;
                ColumnValue::Unsigned(u32::from_le_bytes([b[0], b[1], b[2], b[3]]).into())
            }
            ColumnType::Uint64 => {
                let b = take(schema, logical, &mut offset, 8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                ColumnValue::Unsigned(u64::from_le_bytes(buf))
            }
            ColumnType::Sint8 => {
                let b = take(schema, logical, &mut offset, 1)?;
                ColumnValue::Signed(i8::from_le_bytes([b[0]]).into())
            }
            ColumnType::Sint16 => {
                let b = take(schema, logical, &mut offset, 2)?;
                ColumnValue::Signed(i16::from_le_bytes([b[0], b[1]]).into())
            }
            ColumnType::Sint32 => {
                let b = take(schema, logical, &mut offset, 4)?;
                ColumnValue::Signed(i32::from_le_bytes([b[0], b[1], b[2], b[3]]).into())
            }
            ColumnType::Sint64 => {
                let b = take(schema, logical, &mut offset, 8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                ColumnValue::Signed(i64::from_le_bytes(buf))
            }
            ColumnType::Float32 => {
                let b = take(schema, logical, &mut offset, 4)?;
                ColumnValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]]).into())
            }
            ColumnType::Float64 => {
                let b = take(schema, logical, &mut offset, 8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                ColumnValue::Float(f64::from_le_bytes(buf))
            }
            ColumnType::Fixed(len) => {
                ColumnValue::Bytes(take(schema, logical, &mut offset, len)?.to_vec())
            }
            ColumnType::StrZero => {
                let rest = &logical[offset..];
                let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
                    mismatch(schema, format!("column {} missing NUL terminator", col.name))
                })?;
                offset += nul + 1;
                ColumnValue::Bytes(rest[..nul].to_vec())
            }
            ColumnType::Var => {
                let rest = logical[offset..].to_vec();
                offset = logical.len();
                ColumnValue::Bytes(rest)
            }
        };
        values.push(value);
    }
    if offset != logical.len() {
        return Err(mismatch(
            schema,
            format!("{} trailing bytes after last column", logical.len() - offset),
        ));
    }
    Ok(values)
}

/// Rewrites a logical key into its byte-lexicographically comparable
/// storage form, appending to `out`.
///
/// # Errors
///
/// Returns an error when the bytes do not match the schema's layout.
pub fn to_storage(schema: &Schema, logical: &[u8], out: &mut Vec<u8>) -> CoreResult<()> {
    walk(schema, logical, out, true)
}

/// Inverse of [`to_storage`]: recovers the logical key from storage bytes.
///
/// # Errors
///
/// Returns an error when the bytes do not match the schema's layout.
pub fn from_storage(schema: &Schema, storage: &[u8], out: &mut Vec<u8>) -> CoreResult<()> {
    walk(schema, storage, out, false)
}

fn walk(schema: &Schema, input: &[u8], out: &mut Vec<u8>, encode: bool) -> CoreResult<()> {
    let mut offset = 0usize;
    for col in schema.columns() {
        match col.ty {
            ColumnType::Uint8 => {
                out.push(take(schema, input, &mut offset, 1)?[0]);
            }
            ColumnType::Uint16 | ColumnType::Uint32 | ColumnType::Uint64 => {
                let width = col.ty.fixed_width().unwrap_or(0);
                let b = take(schema, input, &mut offset, width)?;
                out.extend(b.iter().rev());
            }
            ColumnType::Sint8 | ColumnType::Sint16 | ColumnType::Sint32 | ColumnType::Sint64 => {
                let width = col.ty.fixed_width().unwrap_or(0);
                let b = take(schema, input, &mut offset, width)?;
                out.extend(b.iter().rev());
                // Sign bit lives in the big-endian first byte on the storage
                // side; after reversal that byte sits at the front of the
                // window when encoding and at the back when decoding.
                let sign_at = if encode { out.len() - width } else { out.len() - 1 };
                out[sign_at] ^= 0x80;
            }
            ColumnType::Float32 => {
                let b = take(schema, input, &mut offset, 4)?;
                if encode {
                    let bits = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    let ordered = if bits & SIGN32 != 0 { !bits } else { bits ^ SIGN32 };
                    out.extend_from_slice(&ordered.to_be_bytes());
                } else {
                    let ordered = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                    let bits = if ordered & SIGN32 != 0 {
                        ordered ^ SIGN32
                    } else {
                        !ordered
                    };
                    out.extend_from_slice(&bits.to_le_bytes());
                }
            }
            ColumnType::Float64 => {
                let b = take(schema, input, &mut offset, 8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                if encode {
                    let bits = u64::from_le_bytes(buf);
                    let ordered = if bits & SIGN64 != 0 { !bits } else { bits ^ SIGN64 };
                    out.extend_from_slice(&ordered.to_be_bytes());
                } else {
                    let ordered = u64::from_be_bytes(buf);
                    let bits = if ordered & SIGN64 != 0 {
                        ordered ^ SIGN64
                    } else {
                        !ordered
                    };
                    out.extend_from_slice(&bits.to_le_bytes());
                }
            }
            ColumnType::Fixed(len) => {
                out.extend_from_slice(take(schema, input, &mut offset, len)?);
            }
            ColumnType::StrZero => {
                let rest = &input[offset..];
                let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
                    mismatch(schema, format!("column {} missing NUL terminator", col.name))
                })?;
                out.extend_from_slice(&rest[..=nul]);
                offset += nul + 1;
            }
            ColumnType::Var => {
                out.extend_from_slice(&input[offset..]);
                offset = input.len();
            }
        }
    }
    if offset != input.len() {
        return Err(mismatch(
            schema,
            format!("{} trailing bytes after last column", input.len() - offset),
        ));
    }
    Ok(())
}

fn take<'a>(
    schema: &Schema,
    input: &'a [u8],
    offset: &mut usize,
    len: usize,
) -> CoreResult<&'a [u8]> {
    if input.len() - *offset < len {
        return Err(mismatch(
            schema,
            format!(
                "key truncated: need {} bytes at offset {}, have {}",
                len,
                *offset,
                input.len() - *offset
            ),
        ));
    }
    let slice = &input[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

fn narrow<T: TryFrom<u64>>(schema: &Schema, column: &str, v: u64) -> CoreResult<T> {
    T::try_from(v).map_err(|_| mismatch(schema, format!("column {column}: value {v} out of range")))
}

fn narrow_signed<T: TryFrom<i64>>(schema: &Schema, column: &str, v: i64) -> CoreResult<T> {
    T::try_from(v).map_err(|_| mismatch(schema, format!("column {column}: value {v} out of range")))
}

fn mismatch(schema: &Schema, message: String) -> CoreError {
    CoreError::key_format(schema.name(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use proptest::prelude::*;

    fn schema_of(types: &[(&str, ColumnType)], unique: bool) -> Schema {
        let cols = types
            .iter()
            .map(|(name, ty)| ColumnDef::new(*name, *ty))
            .collect();
        Schema::new("test", cols, unique).unwrap()
    }

    fn storage(schema: &Schema, values: &[ColumnValue]) -> Vec<u8> {
        let logical = encode_key(schema, values).unwrap();
        let mut out = Vec::new();
        to_storage(schema, &logical, &mut out).unwrap();
        out
    }

    #[test]
    fn round_trip_all_types() {
        let schema = schema_of(
            &[
                ("a", ColumnType::Uint8),
                ("b", ColumnType::Uint32),
                ("c", ColumnType::Sint64),
                ("d", ColumnType::Float64),
                ("e", ColumnType::Fixed(3)),
                ("f", ColumnType::StrZero),
                ("g", ColumnType::Var),
            ],
            true,
        );
        let values = vec![
            ColumnValue::Unsigned(7),
            ColumnValue::Unsigned(123_456),
            ColumnValue::Signed(-42),
            ColumnValue::Float(-2.5),
            ColumnValue::Bytes(vec![1, 2, 3]),
            ColumnValue::Bytes(b"hello".to_vec()),
            ColumnValue::Bytes(vec![0, 255, 0]),
        ];

        let logical = encode_key(&schema, &values).unwrap();
        assert_eq!(decode_key(&schema, &logical).unwrap(), values);

        let mut stored = Vec::new();
        to_storage(&schema, &logical, &mut stored).unwrap();
        let mut back = Vec::new();
        from_storage(&schema, &stored, &mut back).unwrap();
        assert_eq!(back, logical);
    }

    #[test]
    fn signed_storage_order_matches_numeric_order() {
        let schema = schema_of(&[("n", ColumnType::Sint32)], true);
        let inputs = [-5i64, 0, 5];
        let encoded: Vec<Vec<u8>> = inputs
            .iter()
            .map(|&n| storage(&schema, &[ColumnValue::Signed(n)]))
            .collect();
        assert!(encoded[0] < encoded[1]);
        assert!(encoded[1] < encoded[2]);
    }

    #[test]
    fn float_storage_order_matches_numeric_order() {
        let schema = schema_of(&[("f", ColumnType::Float64)], true);
        let inputs = [-1000.25f64, -0.5, 0.0, 0.5, 1000.25];
        let encoded: Vec<Vec<u8>> = inputs
            .iter()
            .map(|&f| storage(&schema, &[ColumnValue::Float(f)]))
            .collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn str_zero_terminator_keeps_boundaries_unambiguous() {
        let schema = schema_of(
            &[("a", ColumnType::StrZero), ("b", ColumnType::StrZero)],
            true,
        );
        let ab_c = storage(
            &schema,
            &[
                ColumnValue::Bytes(b"ab".to_vec()),
                ColumnValue::Bytes(b"c".to_vec()),
            ],
        );
        let a_bc = storage(
            &schema,
            &[
                ColumnValue::Bytes(b"a".to_vec()),
                ColumnValue::Bytes(b"bc".to_vec()),
            ],
        );
        assert_ne!(ab_c, a_bc);
        // First column dominates: "a" sorts before "ab".
        assert!(a_bc < ab_c);
    }

    #[test]
    fn interior_nul_rejected() {
        let schema = schema_of(&[("s", ColumnType::StrZero)], true);
        let err = encode_key(&schema, &[ColumnValue::Bytes(vec![b'a', 0, b'b'])]);
        assert!(err.is_err());
    }

    #[test]
    fn empty_var_key_is_representable() {
        let schema = schema_of(&[("v", ColumnType::Var)], true);
        let logical = encode_key(&schema, &[ColumnValue::Bytes(Vec::new())]).unwrap();
        assert!(logical.is_empty());
        assert_eq!(
            decode_key(&schema, &logical).unwrap(),
            vec![ColumnValue::Bytes(Vec::new())]
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let schema = schema_of(&[("n", ColumnType::Uint16)], true);
        assert!(decode_key(&schema, &[1, 2, 3]).is_err());
    }

    #[test]
    fn kind_mismatch_rejected() {
        let schema = schema_of(&[("n", ColumnType::Uint16)], true);
        assert!(encode_key(&schema, &[ColumnValue::Signed(1)]).is_err());
    }

    #[test]
    fn out_of_range_rejected() {
        let schema = schema_of(&[("n", ColumnType::Uint8)], true);
        assert!(encode_key(&schema, &[ColumnValue::Unsigned(256)]).is_err());
    }

    proptest! {
        #[test]
        fn prop_sint64_order(a in any::<i64>(), b in any::<i64>()) {
            let schema = schema_of(&[("n", ColumnType::Sint64)], true);
            let sa = storage(&schema, &[ColumnValue::Signed(a)]);
            let sb = storage(&schema, &[ColumnValue::Signed(b)]);
            prop_assert_eq!(a.cmp(&b), sa.cmp(&sb));
        }

        #[test]
        fn prop_composite_order(
            a1 in any::<i32>(), a2 in any::<u32>(),
            b1 in any::<i32>(), b2 in any::<u32>(),
        ) {
            let schema = schema_of(
                &[("x", ColumnType::Sint32), ("y", ColumnType::Uint32)],
                true,
            );
            let sa = storage(
                &schema,
                &[ColumnValue::Signed(a1.into()), ColumnValue::Unsigned(a2.into())],
            );
            let sb = storage(
                &schema,
                &[ColumnValue::Signed(b1.into()), ColumnValue::Unsigned(b2.into())],
            );
            prop_assert_eq!((a1, a2).cmp(&(b1, b2)), sa.cmp(&sb));
        }

        #[test]
        fn prop_round_trip_sint64(n in any::<i64>()) {
            let schema = schema_of(&[("n", ColumnType::Sint64)], true);
            let logical = encode_key(&schema, &[ColumnValue::Signed(n)]).unwrap();
            prop_assert_eq!(
                decode_key(&schema, &logical).unwrap(),
                vec![ColumnValue::Signed(n)]
            );
        }
    }
}
