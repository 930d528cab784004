//! Binary property list (`bplist00`) reader and writer.
//!
//! # Layout
//!
//! ```text
//! ┌──────────┬───────────────┬──────────────┬──────────────────────┐
//! │ bplist00 │ objects …     │ offset table │ trailer (32 bytes)   │
//! └──────────┴───────────────┴──────────────┴──────────────────────┘
//! ```
//!
//! The trailer carries the width of offset-table entries and of object
//! references, the object count, the top object and where the offset table
//! starts. Every object begins with a marker byte: the high nibble is the
//! kind, the low nibble either a size or `0xF` followed by an integer object
//! holding the real length.
//!
//! The reader is lazy: [`BinaryPlist::object`] decodes one object on demand and
//! containers hand back references, never nested values. A reference cycle or
//! a heavily shared subtree therefore costs nothing until a caller walks it.

use std::borrow::Cow;

pub const MAGIC: &[u8; 8] = b"bplist00";

const HEADER_LEN: usize = MAGIC.len();
const TRAILER_LEN: usize = 32;

/// Index of an object in the plist's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(usize);

/// A decoded plist object. Containers hold references into the same plist.
#[derive(Debug, Clone, PartialEq)]
pub enum Object<'a> {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    /// Seconds relative to 2001-01-01T00:00:00Z.
    Date(f64),
    Data(Cow<'a, [u8]>),
    String(Cow<'a, str>),
    Uid(u64),
    Array(Vec<ObjectRef>),
    Set(Vec<ObjectRef>),
    Dictionary(Vec<(ObjectRef, ObjectRef)>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlistError {
    #[error("not a binary plist (missing bplist00 header)")]
    BadMagic,

    #[error("binary plist too short ({0} bytes)")]
    TooShort(usize),

    #[error("invalid trailer: {0}")]
    InvalidTrailer(&'static str),

    #[error("object reference {reference} out of range ({count} objects)")]
    BadReference { reference: u64, count: usize },

    #[error("object offset {offset} outside the object area")]
    BadOffset { offset: u64 },

    #[error("object at offset {offset} runs past the object area")]
    Truncated { offset: usize },

    #[error("unsupported object marker 0x{marker:02x} at offset {offset}")]
    UnsupportedMarker { marker: u8, offset: usize },

    #[error("invalid length at offset {offset}")]
    InvalidLength { offset: usize },

    #[error("invalid string encoding at offset {offset}")]
    InvalidString { offset: usize },
}

fn read_be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

// ============================================================================
// Reader
// ============================================================================

/// Validated view over a binary plist buffer.
#[derive(Debug, Clone)]
pub struct BinaryPlist<'a> {
    /// Header plus objects; everything an object may legally occupy.
    body: &'a [u8],
    offset_table: &'a [u8],
    offset_size: usize,
    ref_size: usize,
    object_count: usize,
    top: ObjectRef,
}

impl<'a> BinaryPlist<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, PlistError> {
        // header, one marker byte, one offset entry, trailer
        if data.len() < HEADER_LEN + 2 + TRAILER_LEN {
            return Err(PlistError::TooShort(data.len()));
        }
        if &data[..HEADER_LEN] != MAGIC {
            return Err(PlistError::BadMagic);
        }

        let trailer_start = data.len() - TRAILER_LEN;
        let trailer = &data[trailer_start..];
        let offset_size = trailer[6] as usize;
        let ref_size = trailer[7] as usize;
        let object_count = read_be_uint(&trailer[8..16]);
        let top = read_be_uint(&trailer[16..24]);
        let table_start = read_be_uint(&trailer[24..32]);

        if !(1..=8).contains(&offset_size) {
            return Err(PlistError::InvalidTrailer("offset entry width"));
        }
        if !(1..=8).contains(&ref_size) {
            return Err(PlistError::InvalidTrailer("object reference width"));
        }
        if object_count == 0 {
            return Err(PlistError::InvalidTrailer("no objects"));
        }
        if top >= object_count {
            return Err(PlistError::InvalidTrailer("top object out of range"));
        }
        if table_start <= HEADER_LEN as u64 || table_start > trailer_start as u64 {
            return Err(PlistError::InvalidTrailer("offset table position"));
        }
        let table_len = object_count
            .checked_mul(offset_size as u64)
            .ok_or(PlistError::InvalidTrailer("offset table size"))?;
        let table_end = table_start
            .checked_add(table_len)
            .filter(|&end| end <= trailer_start as u64)
            .ok_or(PlistError::InvalidTrailer("offset table overruns trailer"))?;

        // Both values are now bounded by data.len().
        let table_start = table_start as usize;
        let table_end = table_end as usize;

        Ok(Self {
            body: &data[..table_start],
            offset_table: &data[table_start..table_end],
            offset_size,
            ref_size,
            object_count: object_count as usize,
            top: ObjectRef(top as usize),
        })
    }

    pub fn top(&self) -> ObjectRef {
        self.top
    }

    pub fn len(&self) -> usize {
        self.object_count
    }

    pub fn is_empty(&self) -> bool {
        self.object_count == 0
    }

    /// Check an externally supplied index and turn it into a reference.
    pub fn reference(&self, index: u64) -> Result<ObjectRef, PlistError> {
        if index >= self.object_count as u64 {
            return Err(PlistError::BadReference {
                reference: index,
                count: self.object_count,
            });
        }
        Ok(ObjectRef(index as usize))
    }

    fn object_offset(&self, r: ObjectRef) -> Result<usize, PlistError> {
        let r = self.reference(r.0 as u64)?;
        let at = r.0 * self.offset_size;
        let offset = read_be_uint(&self.offset_table[at..at + self.offset_size]);
        if offset < HEADER_LEN as u64 || offset >= self.body.len() as u64 {
            return Err(PlistError::BadOffset { offset });
        }
        Ok(offset as usize)
    }

    /// Decode the object `r` refers to.
    pub fn object(&self, r: ObjectRef) -> Result<Object<'a>, PlistError> {
        let offset = self.object_offset(r)?;
        let marker = self.body[offset];
        let info = marker & 0x0F;
        let mut cursor = Cursor {
            body: self.body,
            pos: offset + 1,
        };
        let unsupported = PlistError::UnsupportedMarker { marker, offset };

        let object = match marker >> 4 {
            0x0 => match info {
                0x0 => Object::Null,
                0x8 => Object::Bool(false),
                0x9 => Object::Bool(true),
                _ => return Err(unsupported),
            },
            0x1 => Object::Integer(cursor.int(info).ok_or(unsupported)??),
            0x2 => match info {
                2 => Object::Real(f32::from_be_bytes(cursor.array::<4>()?) as f64),
                3 => Object::Real(f64::from_be_bytes(cursor.array::<8>()?)),
                _ => return Err(unsupported),
            },
            0x3 if info == 3 => Object::Date(f64::from_be_bytes(cursor.array::<8>()?)),
            0x4 => {
                let len = cursor.length(info)?;
                Object::Data(Cow::Borrowed(cursor.take(len)?))
            }
            0x5 => {
                let len = cursor.length(info)?;
                let bytes = cursor.take(len)?;
                if !bytes.is_ascii() {
                    return Err(PlistError::InvalidString { offset });
                }
                let s = std::str::from_utf8(bytes).map_err(|_| PlistError::InvalidString { offset })?;
                Object::String(Cow::Borrowed(s))
            }
            0x6 => {
                let units = cursor.length(info)?;
                let byte_len = units
                    .checked_mul(2)
                    .ok_or(PlistError::InvalidLength { offset })?;
                let bytes = cursor.take(byte_len)?;
                let s = char::decode_utf16(
                    bytes
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
                )
                .collect::<Result<String, _>>()
                .map_err(|_| PlistError::InvalidString { offset })?;
                Object::String(Cow::Owned(s))
            }
            0x8 => {
                let width = info as usize + 1;
                if width > 8 {
                    return Err(unsupported);
                }
                Object::Uid(read_be_uint(cursor.take(width)?))
            }
            0xA => {
                let len = cursor.length(info)?;
                Object::Array(self.refs(&mut cursor, len)?)
            }
            0xC => {
                let len = cursor.length(info)?;
                Object::Set(self.refs(&mut cursor, len)?)
            }
            0xD => {
                let len = cursor.length(info)?;
                let keys = self.refs(&mut cursor, len)?;
                let values = self.refs(&mut cursor, len)?;
                Object::Dictionary(keys.into_iter().zip(values).collect())
            }
            _ => return Err(unsupported),
        };
        Ok(object)
    }

    fn refs(&self, cursor: &mut Cursor<'a>, count: usize) -> Result<Vec<ObjectRef>, PlistError> {
        let start = cursor.pos;
        let len = count
            .checked_mul(self.ref_size)
            .ok_or(PlistError::InvalidLength { offset: start })?;
        cursor
            .take(len)?
            .chunks_exact(self.ref_size)
            .map(|raw| self.reference(read_be_uint(raw)))
            .collect()
    }
}

struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], PlistError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.body.len())
            .ok_or(PlistError::Truncated { offset: self.pos })?;
        let bytes = &self.body[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PlistError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    /// Integer body of width `1 << info`. `None` for widths the reader does
    /// not support (16-byte integers).
    fn int(&mut self, info: u8) -> Option<Result<i64, PlistError>> {
        let value = match info {
            0 => self.take(1).map(|b| b[0] as i64),
            1 => self.array::<2>().map(|b| u16::from_be_bytes(b) as i64),
            2 => self.array::<4>().map(|b| u32::from_be_bytes(b) as i64),
            3 => self.array::<8>().map(i64::from_be_bytes),
            _ => return None,
        };
        Some(value)
    }

    /// Length from a marker's low nibble, or from the integer object that
    /// follows when the nibble is `0xF`.
    fn length(&mut self, info: u8) -> Result<usize, PlistError> {
        if info != 0x0F {
            return Ok(info as usize);
        }
        let offset = self.pos;
        let marker = self.take(1)?[0];
        if marker >> 4 != 0x1 {
            return Err(PlistError::InvalidLength { offset });
        }
        let len = self
            .int(marker & 0x0F)
            .ok_or(PlistError::InvalidLength { offset })??;
        usize::try_from(len).map_err(|_| PlistError::InvalidLength { offset })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Builds a binary plist object by object.
///
/// Objects are appended in order; containers refer to earlier (or later)
/// pushes by the [`ObjectRef`] that [`PlistWriter::push`] returned.
#[derive(Debug, Default)]
pub struct PlistWriter<'a> {
    objects: Vec<Object<'a>>,
}

fn width_for(value: u64) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}

fn write_be_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
}

impl<'a> PlistWriter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: Object<'a>) -> ObjectRef {
        self.objects.push(object);
        ObjectRef(self.objects.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serialize everything pushed so far with `top` as the root object.
    pub fn finish(self, top: ObjectRef) -> Vec<u8> {
        let ref_size = width_for(self.objects.len().saturating_sub(1) as u64);
        let mut out = Vec::with_capacity(64 + self.objects.len() * 8);
        out.extend_from_slice(MAGIC);

        let mut offsets = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            offsets.push(out.len() as u64);
            write_object(&mut out, object, ref_size);
        }

        let table_start = out.len() as u64;
        let offset_size = width_for(offsets.last().copied().unwrap_or(0));
        for offset in &offsets {
            write_be_uint(&mut out, *offset, offset_size);
        }

        out.extend_from_slice(&[0u8; 6]);
        out.push(offset_size as u8);
        out.push(ref_size as u8);
        out.extend_from_slice(&(self.objects.len() as u64).to_be_bytes());
        out.extend_from_slice(&(top.0 as u64).to_be_bytes());
        out.extend_from_slice(&table_start.to_be_bytes());
        out
    }
}

fn write_marker_len(out: &mut Vec<u8>, kind: u8, len: usize) {
    if len < 0x0F {
        out.push(kind << 4 | len as u8);
    } else {
        out.push(kind << 4 | 0x0F);
        write_int(out, len as i64);
    }
}

fn write_int(out: &mut Vec<u8>, value: i64) {
    if value < 0 {
        out.push(0x13);
        out.extend_from_slice(&value.to_be_bytes());
        return;
    }
    let width = width_for(value as u64);
    let info = width.trailing_zeros() as u8;
    out.push(0x10 | info);
    write_be_uint(out, value as u64, width);
}

fn write_refs(out: &mut Vec<u8>, refs: impl IntoIterator<Item = ObjectRef>, ref_size: usize) {
    for r in refs {
        write_be_uint(out, r.0 as u64, ref_size);
    }
}

fn write_object(out: &mut Vec<u8>, object: &Object<'_>, ref_size: usize) {
    match object {
        Object::Null => out.push(0x00),
        Object::Bool(false) => out.push(0x08),
        Object::Bool(true) => out.push(0x09),
        Object::Integer(v) => write_int(out, *v),
        Object::Real(v) => {
            out.push(0x23);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Object::Date(v) => {
            out.push(0x33);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Object::Data(bytes) => {
            write_marker_len(out, 0x4, bytes.len());
            out.extend_from_slice(bytes);
        }
        Object::String(s) if s.is_ascii() => {
            write_marker_len(out, 0x5, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        Object::String(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            write_marker_len(out, 0x6, units.len());
            for unit in units {
                out.extend_from_slice(&unit.to_be_bytes());
            }
        }
        Object::Uid(v) => {
            let width = width_for(*v);
            out.push(0x80 | (width as u8 - 1));
            write_be_uint(out, *v, width);
        }
        Object::Array(refs) => {
            write_marker_len(out, 0xA, refs.len());
            write_refs(out, refs.iter().copied(), ref_size);
        }
        Object::Set(refs) => {
            write_marker_len(out, 0xC, refs.len());
            write_refs(out, refs.iter().copied(), ref_size);
        }
        Object::Dictionary(entries) => {
            write_marker_len(out, 0xD, entries.len());
            write_refs(out, entries.iter().map(|(k, _)| *k), ref_size);
            write_refs(out, entries.iter().map(|(_, v)| *v), ref_size);
        }
    }
}
