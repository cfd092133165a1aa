use std::fmt;

use kms_types::{Attribute, AttributeType, ObjectHandle};

use crate::error::{ObjectError, ObjectResult};
use crate::words;

/// ABI version tag, first word of every object.
pub const ABI_VERSION: u32 = 0xB10B_0240;
/// ABI configuration tag, second word of every object.
pub const ABI_CONFIGURATION: u32 = 0xB10B_0003;
/// Size of the fixed object header.
pub const HEADER_LEN: usize = 20;
/// Size of the type and length fields of one attribute record.
pub const TLV_HEADER_LEN: usize = 8;

/// Bytes an attribute of `size` value bytes occupies in the attribute area.
pub fn padded_size(size: usize) -> usize {
    words::packed_len(size) + TLV_HEADER_LEN
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let word = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

// ---------------------------------------------------------------------------
// ObjectHeader
// ---------------------------------------------------------------------------

/// Fixed 20-byte header preceding the attribute area.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    pub version: u32,
    pub configuration: u32,
    /// Size of the attribute area in bytes.
    pub blobs_size: u32,
    /// Number of attribute records.
    pub blobs_count: u32,
    pub object_id: ObjectHandle,
}

impl ObjectHeader {
    pub fn new(blobs_size: u32, blobs_count: u32, object_id: ObjectHandle) -> Self {
        Self {
            version: ABI_VERSION,
            configuration: ABI_CONFIGURATION,
            blobs_size,
            blobs_count,
            object_id,
        }
    }

    /// Parse a header from the start of `bytes`. The ABI tags are not checked.
    pub fn parse(bytes: &[u8]) -> ObjectResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ObjectError::Truncated {
                offset: 0,
                reason: format!("header needs {HEADER_LEN} bytes, have {}", bytes.len()),
            });
        }
        let word = |i: usize| read_u32(bytes, i * 4).unwrap_or_default();
        Ok(Self {
            version: word(0),
            configuration: word(1),
            blobs_size: word(2),
            blobs_count: word(3),
            object_id: ObjectHandle(word(4)),
        })
    }

    /// Returns `true` when both ABI tags match.
    pub fn has_valid_abi(&self) -> bool {
        self.version == ABI_VERSION && self.configuration == ABI_CONFIGURATION
    }

    /// Total object size (header plus attribute area).
    pub fn object_len(&self) -> usize {
        HEADER_LEN + self.blobs_size as usize
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let fields = [
            self.version,
            self.configuration,
            self.blobs_size,
            self.blobs_count,
            self.object_id.value(),
        ];
        for (i, field) in fields.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// AttributeRef / TlvCursor
// ---------------------------------------------------------------------------

/// Borrowed view of one attribute record inside an object.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AttributeRef<'a> {
    pub kind: AttributeType,
    /// Declared value size in bytes.
    pub size: usize,
    /// Value area including alignment padding.
    padded: &'a [u8],
}

impl<'a> AttributeRef<'a> {
    /// The declared `size` bytes of the value, as stored.
    pub fn value(&self) -> &'a [u8] {
        &self.padded[..self.size]
    }

    /// The value area including padding.
    pub fn padded(&self) -> &'a [u8] {
        self.padded
    }

    /// Recover raw bytes from a word-packed value.
    pub fn unpacked(&self) -> Vec<u8> {
        // The padded area always covers packed_len(size).
        words::unpack_bytes(self.padded, self.size).unwrap_or_default()
    }

    /// The key bytes: unpacked for key-material types, raw otherwise.
    pub fn material(&self) -> Vec<u8> {
        if self.kind.is_word_packed() {
            self.unpacked()
        } else {
            self.value().to_vec()
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        (self.size == 4).then(|| read_u32(self.padded, 0)).flatten()
    }

    pub fn as_bool(&self) -> Option<bool> {
        (self.size >= 1).then(|| self.padded[0] != 0)
    }

    /// Owned copy of the stored value.
    pub fn to_attribute(&self) -> Attribute {
        Attribute::bytes(self.kind, self.value().to_vec())
    }
}

impl fmt::Debug for AttributeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.kind, self.size)
    }
}

/// Bounds-checked cursor over an attribute area.
pub struct TlvCursor<'a> {
    area: &'a [u8],
    pos: usize,
    remaining: u32,
}

impl<'a> TlvCursor<'a> {
    pub fn new(area: &'a [u8], count: u32) -> Self {
        Self {
            area,
            pos: 0,
            remaining: count,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read the next record, or `None` when `count` records were read.
    pub fn next_record(&mut self) -> ObjectResult<Option<AttributeRef<'a>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let offset = self.pos;
        let truncated = |reason: &str| ObjectError::Truncated {
            offset,
            reason: reason.to_string(),
        };
        let kind = read_u32(self.area, offset).ok_or_else(|| truncated("attribute type"))?;
        let size = read_u32(self.area, offset + 4).ok_or_else(|| truncated("attribute size"))?
            as usize;
        let start = offset + TLV_HEADER_LEN;
        let end = start
            .checked_add(words::packed_len(size))
            .filter(|end| *end <= self.area.len())
            .ok_or_else(|| truncated("attribute value"))?;

        self.pos = end;
        self.remaining -= 1;
        Ok(Some(AttributeRef {
            kind: AttributeType(kind),
            size,
            padded: &self.area[start..end],
        }))
    }
}

// ---------------------------------------------------------------------------
// KeyObject
// ---------------------------------------------------------------------------

/// A serialized key object: header followed by its attribute records.
///
/// A `KeyObject` is always well formed: the ABI tags match, `blobs_size`
/// equals the sum of the padded record sizes, and every record lies inside
/// the attribute area.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyObject {
    bytes: Vec<u8>,
}

impl KeyObject {
    /// Validate and take ownership of a serialized object. `bytes` must hold
    /// exactly one object.
    pub fn from_bytes(bytes: Vec<u8>) -> ObjectResult<Self> {
        let header = ObjectHeader::parse(&bytes)?;
        if !header.has_valid_abi() {
            return Err(ObjectError::BadAbi {
                version: header.version,
                configuration: header.configuration,
            });
        }
        if bytes.len() != header.object_len() {
            return Err(ObjectError::Malformed(format!(
                "object is {} bytes, header declares {}",
                bytes.len(),
                header.object_len()
            )));
        }
        let mut cursor = TlvCursor::new(&bytes[HEADER_LEN..], header.blobs_count);
        while cursor.next_record()?.is_some() {}
        if cursor.position() != header.blobs_size as usize {
            return Err(ObjectError::Malformed(format!(
                "attribute records use {} bytes, header declares {}",
                cursor.position(),
                header.blobs_size
            )));
        }
        Ok(Self { bytes })
    }

    pub fn header(&self) -> ObjectHeader {
        // Validated at construction.
        ObjectHeader::parse(&self.bytes).unwrap_or(ObjectHeader::new(0, 0, ObjectHandle::UNKNOWN))
    }

    pub fn id(&self) -> ObjectHandle {
        ObjectHandle(read_u32(&self.bytes, 16).unwrap_or_default())
    }

    /// Commit the object to a handle.
    pub fn set_id(&mut self, id: ObjectHandle) {
        self.bytes[16..20].copy_from_slice(&id.value().to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn attribute_count(&self) -> usize {
        self.header().blobs_count as usize
    }

    /// Iterate the attribute records in stored order.
    pub fn attributes(&self) -> impl Iterator<Item = AttributeRef<'_>> {
        let mut cursor = TlvCursor::new(&self.bytes[HEADER_LEN..], self.header().blobs_count);
        std::iter::from_fn(move || cursor.next_record().ok().flatten())
    }

    /// First attribute of type `kind`.
    pub fn find_attribute(&self, kind: AttributeType) -> Option<AttributeRef<'_>> {
        self.attributes().find(|a| a.kind == kind)
    }

    /// Returns `true` if every template attribute is present with an
    /// identical stored value.
    pub fn matches(&self, template: &[Attribute]) -> bool {
        template.iter().all(|wanted| {
            self.find_attribute(wanted.kind)
                .is_some_and(|found| found.value() == wanted.value.as_slice())
        })
    }

    /// Owned copies of every stored attribute.
    pub fn to_template(&self) -> Vec<Attribute> {
        self.attributes().map(|a| a.to_attribute()).collect()
    }
}

impl fmt::Debug for KeyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyObject")
            .field("id", &self.id())
            .field("attributes", &self.attributes().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ObjectBuilder
// ---------------------------------------------------------------------------

/// How attribute values are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packing {
    /// Value bytes stored as given.
    Raw,
    /// Key-material types are word-packed; other types stored as given.
    KeyMaterial,
}

/// Serializes attribute templates into a [`KeyObject`].
#[derive(Clone, Debug, Default)]
pub struct ObjectBuilder {
    entries: Vec<(Attribute, bool)>,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attribute: Attribute, packing: Packing) -> &mut Self {
        let packed = packing == Packing::KeyMaterial && attribute.kind.is_word_packed();
        self.entries.push((attribute, packed));
        self
    }

    pub fn extend(&mut self, template: &[Attribute], packing: Packing) -> &mut Self {
        for attribute in template {
            self.push(attribute.clone(), packing);
        }
        self
    }

    /// Size of the attribute area.
    pub fn blobs_size(&self) -> usize {
        self.entries.iter().map(|(a, _)| padded_size(a.value.len())).sum()
    }

    /// Total serialized size.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.blobs_size()
    }

    /// Serialize into `buf`, which must be exactly [`Self::encoded_len`] bytes.
    pub fn encode_into(&self, buf: &mut [u8], id: ObjectHandle) -> ObjectResult<()> {
        if buf.len() != self.encoded_len() {
            return Err(ObjectError::Malformed(format!(
                "encode buffer is {} bytes, need {}",
                buf.len(),
                self.encoded_len()
            )));
        }
        let header = ObjectHeader::new(self.blobs_size() as u32, self.entries.len() as u32, id);
        buf[..HEADER_LEN].copy_from_slice(&header.to_bytes());

        let mut pos = HEADER_LEN;
        for (attribute, packed) in &self.entries {
            let size = attribute.value.len();
            buf[pos..pos + 4].copy_from_slice(&attribute.kind.0.to_le_bytes());
            buf[pos + 4..pos + 8].copy_from_slice(&(size as u32).to_le_bytes());
            pos += TLV_HEADER_LEN;

            let area = &mut buf[pos..pos + words::packed_len(size)];
            if *packed {
                area.copy_from_slice(&words::pack_bytes(&attribute.value));
            } else {
                area.fill(0);
                area[..size].copy_from_slice(&attribute.value);
            }
            pos += area.len();
        }
        Ok(())
    }

    /// Serialize into a new object.
    pub fn build(&self, id: ObjectHandle) -> ObjectResult<KeyObject> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.encode_into(&mut buf, id)?;
        KeyObject::from_bytes(buf)
    }
}
