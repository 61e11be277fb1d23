//! Fixed binary layouts mapping field names to byte ranges.
//!
//! A [`Layout`] is the wire format of a channel: every process attaching to the
//! same key must declare the same fields, in the same order, with the same
//! widths. Offsets are computed once, when the layout is built, by laying the
//! fields end to end. There is no implicit padding; bytes reserved to mirror a
//! foreign struct must be declared with [`LayoutBuilder::padding`].
//!
//! Multi-byte values use host byte order.
//!
//! ```text
//! Layout::pointer()
//! offset  0        4        8        12
//!         ┌────────┬────────┬────────┐
//!         │ x: i32 │ y: i32 │changed │
//!         └────────┴────────┴────────┘
//! ```

use crate::error::{ShmError, ShmResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed-width integer type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Signed 8-bit
    I8,
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit
    I16,
    /// Unsigned 16-bit
    U16,
    /// Signed 32-bit
    I32,
    /// Unsigned 32-bit
    U32,
    /// Signed 64-bit
    I64,
}

impl FieldType {
    /// Width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
            Self::I64 => 8,
        }
    }

    /// Inclusive range of values the type can hold.
    pub const fn range(self) -> (i64, i64) {
        match self {
            Self::I8 => (i8::MIN as i64, i8::MAX as i64),
            Self::U8 => (0, u8::MAX as i64),
            Self::I16 => (i16::MIN as i64, i16::MAX as i64),
            Self::U16 => (0, u16::MAX as i64),
            Self::I32 => (i32::MIN as i64, i32::MAX as i64),
            Self::U32 => (0, u32::MAX as i64),
            Self::I64 => (i64::MIN, i64::MAX),
        }
    }

    /// Whether `value` fits this type.
    pub const fn fits(self, value: i64) -> bool {
        let (min, max) = self.range();
        value >= min && value <= max
    }

    const fn tag(self) -> u8 {
        match self {
            Self::I8 => 1,
            Self::U8 => 2,
            Self::I16 => 3,
            Self::U16 => 4,
            Self::I32 => 5,
            Self::U32 => 6,
            Self::I64 => 7,
        }
    }

    /// Encode `value` into the first `width()` bytes of the returned buffer.
    ///
    /// The caller is responsible for range checking.
    pub(crate) fn encode(self, value: i64) -> [u8; 8] {
        let mut buf = [0u8; 8];
        match self {
            Self::I8 => buf[..1].copy_from_slice(&(value as i8).to_ne_bytes()),
            Self::U8 => buf[..1].copy_from_slice(&(value as u8).to_ne_bytes()),
            Self::I16 => buf[..2].copy_from_slice(&(value as i16).to_ne_bytes()),
            Self::U16 => buf[..2].copy_from_slice(&(value as u16).to_ne_bytes()),
            Self::I32 => buf[..4].copy_from_slice(&(value as i32).to_ne_bytes()),
            Self::U32 => buf[..4].copy_from_slice(&(value as u32).to_ne_bytes()),
            Self::I64 => buf.copy_from_slice(&value.to_ne_bytes()),
        }
        buf
    }

    /// Decode a value from the first `width()` bytes of `buf`.
    pub(crate) fn decode(self, buf: [u8; 8]) -> i64 {
        match self {
            Self::I8 => i8::from_ne_bytes([buf[0]]) as i64,
            Self::U8 => buf[0] as i64,
            Self::I16 => i16::from_ne_bytes([buf[0], buf[1]]) as i64,
            Self::U16 => u16::from_ne_bytes([buf[0], buf[1]]) as i64,
            Self::I32 => i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64,
            Self::U32 => u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64,
            Self::I64 => i64::from_ne_bytes(buf),
        }
    }
}

/// A named field at a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    ty: FieldType,
    offset: usize,
}

impl Field {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field type
    pub fn ty(&self) -> FieldType {
        self.ty
    }

    /// Byte offset from the start of the region
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Width in bytes
    pub fn width(&self) -> usize {
        self.ty.width()
    }

    /// Reject values outside the field's range.
    pub fn check(&self, value: i64) -> ShmResult<()> {
        if self.ty.fits(value) {
            Ok(())
        } else {
            Err(ShmError::ValueOutOfRange {
                field: self.name.clone(),
                value,
            })
        }
    }
}

/// Fixed binary schema of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
    size: usize,
}

impl Layout {
    /// Start declaring a layout.
    pub fn builder() -> LayoutBuilder {
        LayoutBuilder::default()
    }

    /// `x: i32, y: i32, changed: i32`: 12 bytes, no padding.
    pub fn pointer() -> Self {
        let fields = ["x", "y", "changed"]
            .iter()
            .enumerate()
            .map(|(i, name)| Field {
                name: (*name).to_string(),
                ty: FieldType::I32,
                offset: i * FieldType::I32.width(),
            })
            .collect();
        Self::assemble(fields, 3 * FieldType::I32.width())
    }

    fn assemble(fields: Vec<Field>, size: usize) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            fields,
            index,
            size,
        }
    }

    /// Total byte size, including declared padding.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of addressable fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the layout has no fields (never true once built).
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> ShmResult<&Field> {
        self.position(name).map(|i| &self.fields[i])
    }

    pub(crate) fn position(&self, name: &str) -> ShmResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ShmError::UnknownField {
                name: name.to_string(),
            })
    }

    /// Stable FNV-1a hash over names, types, offsets and size.
    ///
    /// Two processes with equal fingerprints agree on the wire format. Only
    /// the size is enforced at attach time; the fingerprint is logged so
    /// drift in names or order can be spotted.
    pub fn fingerprint(&self) -> u64 {
        const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET_BASIS;
        let mut feed = |bytes: &[u8]| {
            for b in bytes {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(PRIME);
            }
        };
        for field in &self.fields {
            feed(field.name.as_bytes());
            feed(&[0, field.ty.tag()]);
            feed(&(field.offset as u64).to_le_bytes());
        }
        feed(&(self.size as u64).to_le_bytes());
        hash
    }
}

/// Incremental layout declaration; fields are placed in call order.
#[derive(Debug, Default, Clone)]
pub struct LayoutBuilder {
    entries: Vec<Entry>,
}

/// Largest segment a layout may describe.
pub const MAX_LAYOUT_SIZE: usize = 1 << 20;

fn grow(offset: usize, bytes: usize) -> ShmResult<usize> {
    offset
        .checked_add(bytes)
        .filter(|&end| end <= MAX_LAYOUT_SIZE)
        .ok_or_else(|| {
            ShmError::InvalidLayout(format!("layout size exceeds {MAX_LAYOUT_SIZE} bytes"))
        })
}

#[derive(Debug, Clone)]
enum Entry {
    Field(String, FieldType),
    Padding(usize),
}

impl LayoutBuilder {
    /// Append a field.
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.entries.push(Entry::Field(name.into(), ty));
        self
    }

    /// Reserve `bytes` unaddressable bytes.
    pub fn padding(mut self, bytes: usize) -> Self {
        self.entries.push(Entry::Padding(bytes));
        self
    }

    /// Validate and compute offsets.
    ///
    /// # Errors
    ///
    /// `InvalidLayout` for empty or duplicate names, zero-length padding, a
    /// layout without fields, or a total size above [`MAX_LAYOUT_SIZE`].
    pub fn build(self) -> ShmResult<Layout> {
        let mut fields: Vec<Field> = Vec::with_capacity(self.entries.len());
        let mut offset = 0usize;

        for entry in self.entries {
            match entry {
                Entry::Field(name, ty) => {
                    if name.is_empty() {
                        return Err(ShmError::InvalidLayout("empty field name".into()));
                    }
                    if fields.iter().any(|f| f.name == name) {
                        return Err(ShmError::InvalidLayout(format!(
                            "duplicate field name: {name}"
                        )));
                    }
                    fields.push(Field { name, ty, offset });
                    offset = grow(offset, ty.width())?;
                }
                Entry::Padding(0) => {
                    return Err(ShmError::InvalidLayout("zero-length padding".into()));
                }
                Entry::Padding(bytes) => offset = grow(offset, bytes)?,
            }
        }

        if fields.is_empty() {
            return Err(ShmError::InvalidLayout("layout has no fields".into()));
        }

        Ok(Layout::assemble(fields, offset))
    }
}

/// TOML/serde form of a layout.
///
/// ```toml
/// [[layout.fields]]
/// name = "x"
/// type = "i32"
///
/// [[layout.fields]]
/// padding = 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutSpec {
    /// Entries in declaration order
    pub fields: Vec<EntrySpec>,
}

/// One declared entry of a [`LayoutSpec`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EntrySpec {
    /// Addressable field
    Field {
        /// Field name
        name: String,
        /// Field type
        #[serde(rename = "type")]
        ty: FieldType,
    },
    /// Reserved bytes
    Padding {
        /// Number of bytes
        padding: usize,
    },
}

impl TryFrom<LayoutSpec> for Layout {
    type Error = ShmError;

    fn try_from(spec: LayoutSpec) -> ShmResult<Self> {
        spec.fields
            .into_iter()
            .fold(Layout::builder(), |builder, entry| match entry {
                EntrySpec::Field { name, ty } => builder.field(name, ty),
                EntrySpec::Padding { padding } => builder.padding(padding),
            })
            .build()
    }
}

impl From<&Layout> for LayoutSpec {
    fn from(layout: &Layout) -> Self {
        let mut fields = Vec::with_capacity(layout.len());
        let mut cursor = 0;
        for field in layout.fields() {
            if field.offset > cursor {
                fields.push(EntrySpec::Padding {
                    padding: field.offset - cursor,
                });
            }
            fields.push(EntrySpec::Field {
                name: field.name.clone(),
                ty: field.ty,
            });
            cursor = field.offset + field.width();
        }
        if layout.size() > cursor {
            fields.push(EntrySpec::Padding {
                padding: layout.size() - cursor,
            });
        }
        Self { fields }
    }
}

/// Values of every field, captured together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    layout: Arc<Layout>,
    values: Vec<i64>,
}

impl Snapshot {
    pub(crate) fn new(layout: Arc<Layout>, values: Vec<i64>) -> Self {
        Self { layout, values }
    }

    /// Value of `name`.
    pub fn get(&self, name: &str) -> ShmResult<i64> {
        self.layout.position(name).map(|i| self.values[i])
    }

    /// `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.layout
            .fields()
            .iter()
            .zip(self.values.iter())
            .map(|(f, v)| (f.name(), *v))
    }

    /// Layout the snapshot was taken with.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_layout_offsets() {
        let layout = Layout::pointer();
        assert_eq!(layout.size(), 12);
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.field("x").unwrap().offset(), 0);
        assert_eq!(layout.field("y").unwrap().offset(), 4);
        assert_eq!(layout.field("changed").unwrap().offset(), 8);
    }

    #[test]
    fn builder_matches_preset() {
        let built = Layout::builder()
            .field("x", FieldType::I32)
            .field("y", FieldType::I32)
            .field("changed", FieldType::I32)
            .build()
            .unwrap();
        assert_eq!(built, Layout::pointer());
        assert_eq!(built.fingerprint(), Layout::pointer().fingerprint());
    }

    #[test]
    fn mixed_widths_have_no_implicit_padding() {
        let layout = Layout::builder()
            .field("buttons", FieldType::U8)
            .field("x", FieldType::I16)
            .field("y", FieldType::I16)
            .field("changed", FieldType::U8)
            .build()
            .unwrap();
        assert_eq!(layout.size(), 6);
        assert_eq!(layout.field("x").unwrap().offset(), 1);
        assert_eq!(layout.field("changed").unwrap().offset(), 5);
    }

    #[test]
    fn explicit_padding_mirrors_c_struct() {
        // struct { uint8_t buttons; int16_t x; int16_t y; uint8_t changed; }
        let layout = Layout::builder()
            .field("buttons", FieldType::U8)
            .padding(1)
            .field("x", FieldType::I16)
            .field("y", FieldType::I16)
            .field("changed", FieldType::U8)
            .padding(1)
            .build()
            .unwrap();
        assert_eq!(layout.size(), 8);
        assert_eq!(layout.field("x").unwrap().offset(), 2);
        assert_eq!(layout.field("changed").unwrap().offset(), 6);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        assert!(matches!(
            Layout::builder().build(),
            Err(ShmError::InvalidLayout(_))
        ));
        assert!(matches!(
            Layout::builder()
                .field("x", FieldType::I32)
                .field("x", FieldType::I16)
                .build(),
            Err(ShmError::InvalidLayout(_))
        ));
        assert!(matches!(
            Layout::builder().field("", FieldType::I32).build(),
            Err(ShmError::InvalidLayout(_))
        ));
        assert!(matches!(
            Layout::builder()
                .field("x", FieldType::I32)
                .padding(0)
                .build(),
            Err(ShmError::InvalidLayout(_))
        ));
    }

    #[test]
    fn oversized_layouts_are_rejected() {
        assert!(matches!(
            Layout::builder()
                .field("x", FieldType::I32)
                .padding(usize::MAX)
                .build(),
            Err(ShmError::InvalidLayout(_))
        ));
        assert!(matches!(
            Layout::builder()
                .field("x", FieldType::I32)
                .padding(1000)
                .field("y", FieldType::I32)
                .padding(usize::MAX - 1000)
                .build(),
            Err(ShmError::InvalidLayout(_))
        ));
        assert!(matches!(
            Layout::builder()
                .padding(MAX_LAYOUT_SIZE)
                .field("x", FieldType::U8)
                .build(),
            Err(ShmError::InvalidLayout(_))
        ));

        let largest = Layout::builder()
            .padding(MAX_LAYOUT_SIZE - 8)
            .field("x", FieldType::I64)
            .build()
            .unwrap();
        assert_eq!(largest.size(), MAX_LAYOUT_SIZE);
    }

    #[test]
    fn oversized_padding_in_toml_is_rejected() {
        use shmlink_common::config::ConfigLoader;

        let text = format!(
            "[[fields]]\nname = \"x\"\ntype = \"i32\"\n\n[[fields]]\npadding = {}\n",
            i64::MAX
        );
        let spec = LayoutSpec::parse(&text).unwrap();
        assert!(matches!(
            Layout::try_from(spec),
            Err(ShmError::InvalidLayout(_))
        ));
    }

    #[test]
    fn unknown_field_lookup() {
        let layout = Layout::pointer();
        assert!(matches!(
            layout.field("z"),
            Err(ShmError::UnknownField { name }) if name == "z"
        ));
    }

    #[test]
    fn range_checks() {
        let layout = Layout::builder()
            .field("small", FieldType::I8)
            .field("flag", FieldType::U8)
            .field("wide", FieldType::U32)
            .build()
            .unwrap();
        assert!(layout.field("small").unwrap().check(-128).is_ok());
        assert!(layout.field("small").unwrap().check(128).is_err());
        assert!(layout.field("flag").unwrap().check(-1).is_err());
        assert!(layout.field("wide").unwrap().check(u32::MAX as i64).is_ok());
        assert!(layout.field("wide").unwrap().check(u32::MAX as i64 + 1).is_err());
    }

    #[test]
    fn encode_decode_sign_extension() {
        for (ty, value) in [
            (FieldType::I8, -5),
            (FieldType::U8, 250),
            (FieldType::I16, -30_000),
            (FieldType::U16, 65_000),
            (FieldType::I32, i32::MIN as i64),
            (FieldType::U32, 4_000_000_000),
            (FieldType::I64, i64::MIN),
        ] {
            assert_eq!(ty.decode(ty.encode(value)), value, "{ty:?}");
        }
    }

    #[test]
    fn fingerprint_tracks_order() {
        let a = Layout::pointer();
        let b = Layout::builder()
            .field("y", FieldType::I32)
            .field("x", FieldType::I32)
            .field("changed", FieldType::I32)
            .build()
            .unwrap();
        assert_eq!(a.size(), b.size());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn spec_from_toml() {
        use shmlink_common::config::ConfigLoader;

        #[derive(Deserialize)]
        struct Wrapper {
            layout: LayoutSpec,
        }

        let text = r#"
[[layout.fields]]
name = "buttons"
type = "u8"

[[layout.fields]]
padding = 1

[[layout.fields]]
name = "x"
type = "i16"
"#;
        let wrapper = Wrapper::parse(text).unwrap();
        let layout = Layout::try_from(wrapper.layout).unwrap();
        assert_eq!(layout.size(), 4);
        assert_eq!(layout.field("x").unwrap().offset(), 2);

        let back = LayoutSpec::from(&layout);
        assert_eq!(Layout::try_from(back).unwrap(), layout);
    }

    #[test]
    fn snapshot_lookup() {
        let snapshot = Snapshot::new(Arc::new(Layout::pointer()), vec![55, 0, 1]);
        assert_eq!(snapshot.get("x").unwrap(), 55);
        assert_eq!(snapshot.get("changed").unwrap(), 1);
        assert!(snapshot.get("nope").is_err());
        let pairs: Vec<_> = snapshot.iter().collect();
        assert_eq!(pairs, vec![("x", 55), ("y", 0), ("changed", 1)]);
    }
}
