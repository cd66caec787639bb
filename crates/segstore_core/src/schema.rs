//! Index key schemas.

use crate::codec;
use crate::error::{CoreError, CoreResult};

/// Semantic type of one key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Unsigned 8-bit integer.
    Uint8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Signed 8-bit integer.
    Sint8,
    /// Signed 16-bit integer.
    Sint16,
    /// Signed 32-bit integer.
    Sint32,
    /// Signed 64-bit integer.
    Sint64,
    /// IEEE-754 single-precision float.
    Float32,
    /// IEEE-754 double-precision float.
    Float64,
    /// Fixed-length binary of the given width.
    Fixed(usize),
    /// NUL-terminated byte string; must not contain interior NUL bytes.
    StrZero,
    /// Variable-length binary; only allowed as the last column.
    Var,
}

impl ColumnType {
    /// Width in bytes of the native representation, or `None` when
    /// variable-length.
    #[must_use]
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Uint8 | Self::Sint8 => Some(1),
            Self::Uint16 | Self::Sint16 => Some(2),
            Self::Uint32 | Self::Sint32 | Self::Float32 => Some(4),
            Self::Uint64 | Self::Sint64 | Self::Float64 => Some(8),
            Self::Fixed(len) => Some(len),
            Self::StrZero | Self::Var => None,
        }
    }

    /// True when the native little-endian representation of this column
    /// does not already sort correctly under unsigned byte comparison.
    #[must_use]
    pub fn needs_byte_lex(self) -> bool {
        match self {
            Self::Uint8 | Self::Fixed(_) | Self::StrZero | Self::Var => false,
            Self::Uint16
            | Self::Uint32
            | Self::Uint64
            | Self::Sint8
            | Self::Sint16
            | Self::Sint32
            | Self::Sint64
            | Self::Float32
            | Self::Float64 => true,
        }
    }
}

/// One column of a key schema.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name, for diagnostics.
    pub name: String,
    /// Semantic type.
    pub ty: ColumnType,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Declares one key of a table: its column layout and uniqueness.
///
/// A schema is immutable once built. Column order is fixed for the lifetime
/// of any index built on the schema; changing it requires rebuilding the
/// index from scratch.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    columns: Vec<ColumnDef>,
    is_unique: bool,
    needs_byte_lex: bool,
}

impl Schema {
    /// Builds a schema from a column list.
    ///
    /// # Errors
    ///
    /// Returns an error when the column list is empty, a `Var` column is
    /// not last, or a `Fixed` column has zero width.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
        is_unique: bool,
    ) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::schema("schema name must not be empty"));
        }
        if columns.is_empty() {
            return Err(CoreError::schema(format!(
                "schema {name} declares no columns"
            )));
        }
        for (pos, col) in columns.iter().enumerate() {
            if col.ty == ColumnType::Var && pos + 1 != columns.len() {
                return Err(CoreError::schema(format!(
                    "schema {name}: variable-length column {} must be last",
                    col.name
                )));
            }
            if col.ty == ColumnType::Fixed(0) {
                return Err(CoreError::schema(format!(
                    "schema {name}: fixed column {} has zero width",
                    col.name
                )));
            }
        }
        let needs_byte_lex = columns.iter().any(|c| c.ty.needs_byte_lex());
        Ok(Self {
            name,
            columns,
            is_unique,
            needs_byte_lex,
        })
    }

    /// The schema's declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered column list.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Whether at most one record id may be bound to any key.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.is_unique
    }

    /// Whether keys require the byte-lexicographic storage transform.
    #[must_use]
    pub fn needs_byte_lex(&self) -> bool {
        self.needs_byte_lex
    }

    /// Engine table name for an index on this schema.
    ///
    /// Composite schema names contain `,` separators, which are illegal in
    /// engine table names; they are substituted with `.`.
    #[must_use]
    pub fn table_name(&self) -> String {
        self.name.replace(',', ".")
    }

    /// Renders a logical key for diagnostics.
    ///
    /// Falls back to a hex dump when the bytes do not match the schema.
    #[must_use]
    pub fn display_key(&self, logical: &[u8]) -> String {
        match codec::decode_key(self, logical) {
            Ok(values) => {
                let parts: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
                format!("({})", parts.join(", "))
            }
            Err(_) => {
                let hex: String = logical.iter().map(|b| format!("{b:02x}")).collect();
                format!("0x{hex}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_column_list() {
        assert!(Schema::new("k", Vec::new(), true).is_err());
    }

    #[test]
    fn rejects_var_not_last() {
        let cols = vec![
            ColumnDef::new("blob", ColumnType::Var),
            ColumnDef::new("n", ColumnType::Uint32),
        ];
        assert!(Schema::new("k", cols, true).is_err());
    }

    #[test]
    fn accepts_trailing_var() {
        let cols = vec![
            ColumnDef::new("n", ColumnType::Uint32),
            ColumnDef::new("blob", ColumnType::Var),
        ];
        assert!(Schema::new("k", cols, true).is_ok());
    }

    #[test]
    fn rejects_zero_width_fixed() {
        let cols = vec![ColumnDef::new("f", ColumnType::Fixed(0))];
        assert!(Schema::new("k", cols, true).is_err());
    }

    #[test]
    fn byte_lex_requirement_is_derived() {
        let plain = Schema::new(
            "plain",
            vec![
                ColumnDef::new("tag", ColumnType::Fixed(4)),
                ColumnDef::new("name", ColumnType::StrZero),
            ],
            false,
        )
        .unwrap();
        assert!(!plain.needs_byte_lex());

        let signed = Schema::new(
            "signed",
            vec![ColumnDef::new("n", ColumnType::Sint64)],
            true,
        )
        .unwrap();
        assert!(signed.needs_byte_lex());
    }

    #[test]
    fn table_name_substitutes_separators() {
        let cols = vec![
            ColumnDef::new("a", ColumnType::Uint32),
            ColumnDef::new("b", ColumnType::Uint32),
        ];
        let schema = Schema::new("a,b", cols, true).unwrap();
        assert_eq!(schema.table_name(), "a.b");
    }

    #[test]
    fn display_key_falls_back_to_hex() {
        let schema = Schema::new("k", vec![ColumnDef::new("n", ColumnType::Uint32)], true).unwrap();
        // Too short for a u32.
        assert_eq!(schema.display_key(&[0xab]), "0xab");
    }
}
