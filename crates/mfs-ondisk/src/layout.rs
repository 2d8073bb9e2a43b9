//! Declarative fixed-layout record descriptions.
//!
//! A [`RecordLayout`] names each field with its offset and width. Decoding
//! binds a layout to a byte slice and a byte order, producing a
//! [`RecordView`] from which typed fields are pulled by name. Byte order
//! is therefore one configuration axis instead of one code path per host.

use mfs_types::{ByteOrder, ParseError, ensure_slice, read_u8};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    U8,
    U16,
    U32,
    /// Raw byte run (names, padding).
    Bytes(usize),
}

impl FieldWidth {
    #[must_use]
    pub const fn byte_len(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::Bytes(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub width: FieldWidth,
}

impl Field {
    #[must_use]
    pub const fn new(name: &'static str, offset: usize, width: FieldWidth) -> Self {
        Self {
            name,
            offset,
            width,
        }
    }

    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.width.byte_len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [Field],
}

impl RecordLayout {
    /// Bind this layout to the first `self.size` bytes of `bytes`.
    pub fn view<'a>(
        &'static self,
        bytes: &'a [u8],
        order: ByteOrder,
    ) -> Result<RecordView<'a>, ParseError> {
        let bytes = ensure_slice(bytes, 0, self.size)?;
        Ok(RecordView {
            layout: self,
            bytes,
            order,
        })
    }

    /// Check that every field lies inside the record and no two overlap.
    pub fn validate(&self) -> Result<(), ParseError> {
        let mut spans: Vec<(usize, usize)> = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            if field.end() > self.size {
                return Err(ParseError::InvalidField {
                    field: field.name,
                    reason: "field extends past record end",
                });
            }
            if spans
                .iter()
                .any(|&(start, end)| field.offset < end && start < field.end())
            {
                return Err(ParseError::InvalidField {
                    field: field.name,
                    reason: "field overlaps another field",
                });
            }
            spans.push((field.offset, field.end()));
        }
        Ok(())
    }

    fn field(&self, name: &'static str) -> Result<&'static Field, ParseError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or(ParseError::InvalidField {
                field: name,
                reason: "no such field in record layout",
            })
    }
}

/// A record layout bound to concrete bytes and a byte order.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    layout: &'static RecordLayout,
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> RecordView<'a> {
    #[must_use]
    pub fn layout(&self) -> &'static RecordLayout {
        self.layout
    }

    #[must_use]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn u8(&self, name: &'static str) -> Result<u8, ParseError> {
        let field = self.typed(name, FieldWidth::U8)?;
        read_u8(self.bytes, field.offset)
    }

    pub fn u16(&self, name: &'static str) -> Result<u16, ParseError> {
        let field = self.typed(name, FieldWidth::U16)?;
        self.order.read_u16(self.bytes, field.offset)
    }

    pub fn u32(&self, name: &'static str) -> Result<u32, ParseError> {
        let field = self.typed(name, FieldWidth::U32)?;
        self.order.read_u32(self.bytes, field.offset)
    }

    /// Two adjacent 16-bit halves `(hi, lo)` combined into one 32-bit value.
    pub fn split_u32(&self, hi: &'static str, lo: &'static str) -> Result<u32, ParseError> {
        Ok((u32::from(self.u16(hi)?) << 16) | u32::from(self.u16(lo)?))
    }

    pub fn bytes(&self, name: &'static str) -> Result<&'a [u8], ParseError> {
        let field = self.layout.field(name)?;
        let FieldWidth::Bytes(len) = field.width else {
            return Err(ParseError::InvalidField {
                field: name,
                reason: "field is not a byte run",
            });
        };
        ensure_slice(self.bytes, field.offset, len)
    }

    fn typed(&self, name: &'static str, width: FieldWidth) -> Result<&'static Field, ParseError> {
        let field = self.layout.field(name)?;
        if field.width != width {
            return Err(ParseError::InvalidField {
                field: name,
                reason: "field width mismatch",
            });
        }
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PAIR: RecordLayout = RecordLayout {
        name: "pair",
        size: 8,
        fields: &[
            Field::new("tag", 0, FieldWidth::U8),
            Field::new("len", 2, FieldWidth::U16),
            Field::new("value", 4, FieldWidth::U32),
        ],
    };

    #[test]
    fn decodes_fields_in_both_orders() {
        let raw = [0x7F, 0, 0x01, 0x02, 0xAA, 0xBB, 0xCC, 0xDD];
        let be = PAIR.view(&raw, ByteOrder::Big).unwrap();
        assert_eq!(be.u8("tag").unwrap(), 0x7F);
        assert_eq!(be.u16("len").unwrap(), 0x0102);
        assert_eq!(be.u32("value").unwrap(), 0xAABB_CCDD);

        let le = PAIR.view(&raw, ByteOrder::Little).unwrap();
        assert_eq!(le.u16("len").unwrap(), 0x0201);
        assert_eq!(le.u32("value").unwrap(), 0xDDCC_BBAA);
    }

    #[test]
    fn short_input_is_insufficient_data() {
        let err = PAIR.view(&[0_u8; 7], ByteOrder::Big).unwrap_err();
        assert!(matches!(err, ParseError::InsufficientData { needed: 8, .. }));
    }

    #[test]
    fn wrong_width_or_name_is_rejected() {
        let raw = [0_u8; 8];
        let view = PAIR.view(&raw, ByteOrder::Big).unwrap();
        assert!(view.u16("tag").is_err());
        assert!(view.u32("missing").is_err());
        assert!(view.bytes("len").is_err());
    }

    #[test]
    fn validate_detects_overlap_and_overrun() {
        assert!(PAIR.validate().is_ok());

        static OVERLAP: RecordLayout = RecordLayout {
            name: "overlap",
            size: 4,
            fields: &[
                Field::new("a", 0, FieldWidth::U16),
                Field::new("b", 1, FieldWidth::U16),
            ],
        };
        assert!(OVERLAP.validate().is_err());

        static OVERRUN: RecordLayout = RecordLayout {
            name: "overrun",
            size: 4,
            fields: &[Field::new("a", 2, FieldWidth::U32)],
        };
        assert!(OVERRUN.validate().is_err());
    }
}
