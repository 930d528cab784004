//! Keyed object archives (`NSKeyedArchiver` layout) over a binary plist.
//!
//! ```text
//! {
//!   $archiver: "NSKeyedArchiver",
//!   $version:  100000,
//!   $top:      { root: UID(n) },
//!   $objects:  [ "$null", obj1, obj2, … ],
//! }
//! ```
//!
//! Objects refer to each other by UID, an index into `$objects`; UID 0 is the
//! `$null` placeholder. A class-backed object is a dictionary whose `$class`
//! UID points at `{ $classname, $classes }`.
//!
//! Decoding is typed and allow-listed. A caller asks for a field as a string,
//! data blob, date or nested object of a given [`ArchivedClass`]; the class the
//! archive names is checked before any of that object's fields are read, and
//! nothing the caller does not ask for is ever materialized.

use std::borrow::Cow;

use crate::plist::{BinaryPlist, Object, ObjectRef, PlistWriter};
use crate::{ArchiveError, Corruption};

pub const ARCHIVER: &str = "NSKeyedArchiver";
pub const ARCHIVE_VERSION: i64 = 100_000;

const NULL_PLACEHOLDER: &str = "$null";

/// Classes the decoder is willing to instantiate.
///
/// The two record classes may appear where an object is expected; the
/// Foundation value classes only where a field expects that kind of value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchivedClass {
    SignatureAnnotation,
    Signature,
    Date,
    String,
    Data,
}

impl ArchivedClass {
    pub fn from_class_name(name: &str) -> Option<Self> {
        match name {
            "AKSignatureAnnotation" => Some(ArchivedClass::SignatureAnnotation),
            "AKSignature" => Some(ArchivedClass::Signature),
            "NSDate" => Some(ArchivedClass::Date),
            "NSString" | "NSMutableString" => Some(ArchivedClass::String),
            "NSData" | "NSMutableData" => Some(ArchivedClass::Data),
            _ => None,
        }
    }

    pub fn class_name(self) -> &'static str {
        match self {
            ArchivedClass::SignatureAnnotation => "AKSignatureAnnotation",
            ArchivedClass::Signature => "AKSignature",
            ArchivedClass::Date => "NSDate",
            ArchivedClass::String => "NSString",
            ArchivedClass::Data => "NSData",
        }
    }

    pub fn is_record(self) -> bool {
        matches!(
            self,
            ArchivedClass::SignatureAnnotation | ArchivedClass::Signature
        )
    }
}

/// Accept `name` where `expected` is wanted.
///
/// A known class of the same category in the wrong place is corruption;
/// anything else is outside the allow-list for this position.
fn admit(name: &str, expected: ArchivedClass) -> Result<(), ArchiveError> {
    match ArchivedClass::from_class_name(name) {
        Some(found) if found == expected => Ok(()),
        Some(found) if found.is_record() == expected.is_record() => {
            Err(Corruption::UnexpectedClass {
                expected: expected.class_name(),
                found: name.to_owned(),
            }
            .into())
        }
        _ => {
            tracing::warn!(
                class = %name,
                expected = expected.class_name(),
                "refusing to decode class outside the allow-list"
            );
            Err(ArchiveError::UntrustedClass(name.to_owned()))
        }
    }
}

type Entries<'a> = Vec<(Cow<'a, str>, ObjectRef)>;

fn string_keyed<'a>(
    plist: &BinaryPlist<'a>,
    entries: Vec<(ObjectRef, ObjectRef)>,
) -> Result<Entries<'a>, Corruption> {
    entries
        .into_iter()
        .map(|(key, value)| match plist.object(key)? {
            Object::String(name) => Ok((name, value)),
            _ => Err(Corruption::UnexpectedType {
                field: "dictionary key",
                expected: "string",
            }),
        })
        .collect()
}

fn lookup(entries: &Entries<'_>, key: &str) -> Option<ObjectRef> {
    entries
        .iter()
        .find(|(name, _)| name.as_ref() == key)
        .map(|(_, value)| *value)
}

fn unexpected(field: &'static str, expected: &'static str) -> ArchiveError {
    Corruption::UnexpectedType { field, expected }.into()
}

// ============================================================================
// Reading
// ============================================================================

/// A parsed keyed archive. Objects are decoded on demand.
#[derive(Debug)]
pub struct KeyedArchive<'a> {
    plist: BinaryPlist<'a>,
    objects: Vec<ObjectRef>,
    root: u64,
}

impl<'a> KeyedArchive<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ArchiveError> {
        let plist = BinaryPlist::parse(data).map_err(Corruption::Plist)?;

        let Object::Dictionary(top) = plist.object(plist.top()).map_err(Corruption::Plist)? else {
            return Err(Corruption::NotKeyedArchive("top object is not a dictionary").into());
        };
        let top = string_keyed(&plist, top)?;

        let archiver = lookup(&top, "$archiver")
            .ok_or(Corruption::NotKeyedArchive("missing $archiver"))?;
        match plist.object(archiver).map_err(Corruption::Plist)? {
            Object::String(name) if name == ARCHIVER => {}
            _ => return Err(Corruption::NotKeyedArchive("unexpected $archiver").into()),
        }

        match lookup(&top, "$version").map(|r| plist.object(r)).transpose() {
            Ok(Some(Object::Integer(ARCHIVE_VERSION))) => {}
            Ok(Some(Object::Integer(version))) => {
                tracing::warn!(version, "unexpected keyed archive version, decoding anyway");
            }
            Ok(_) => return Err(Corruption::NotKeyedArchive("missing $version").into()),
            Err(e) => return Err(Corruption::Plist(e).into()),
        }

        let objects = lookup(&top, "$objects")
            .ok_or(Corruption::NotKeyedArchive("missing $objects"))?;
        let Object::Array(objects) = plist.object(objects).map_err(Corruption::Plist)? else {
            return Err(unexpected("$objects", "array"));
        };

        let top_entries = lookup(&top, "$top").ok_or(Corruption::NotKeyedArchive("missing $top"))?;
        let Object::Dictionary(top_entries) =
            plist.object(top_entries).map_err(Corruption::Plist)?
        else {
            return Err(unexpected("$top", "dictionary"));
        };
        let top_entries = string_keyed(&plist, top_entries)?;
        let root = lookup(&top_entries, "root").ok_or(Corruption::MissingField("root"))?;
        let Object::Uid(root) = plist.object(root).map_err(Corruption::Plist)? else {
            return Err(unexpected("root", "uid"));
        };

        if root == 0 || root >= objects.len() as u64 {
            return Err(Corruption::DanglingReference(root).into());
        }

        Ok(Self {
            plist,
            objects,
            root,
        })
    }

    /// Number of entries in `$objects`, including the `$null` placeholder.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The root object, which must be an instance of `expected`.
    pub fn root(&self, expected: ArchivedClass) -> Result<ArchivedObject<'_, 'a>, ArchiveError> {
        let object = self.resolve(self.root)?;
        self.instance(object, expected, "root")
    }

    fn resolve(&self, uid: u64) -> Result<Object<'a>, Corruption> {
        let r = usize::try_from(uid)
            .ok()
            .and_then(|i| self.objects.get(i))
            .ok_or(Corruption::DanglingReference(uid))?;
        Ok(self.plist.object(*r)?)
    }

    fn class_name(&self, entries: &Entries<'a>) -> Result<Cow<'a, str>, Corruption> {
        let class = lookup(entries, "$class").ok_or(Corruption::MissingField("$class"))?;
        let Object::Uid(uid) = self.plist.object(class)? else {
            return Err(Corruption::UnexpectedType {
                field: "$class",
                expected: "uid",
            });
        };
        let Object::Dictionary(class) = self.resolve(uid)? else {
            return Err(Corruption::UnexpectedType {
                field: "$class",
                expected: "class description",
            });
        };
        let class = string_keyed(&self.plist, class)?;
        let name = lookup(&class, "$classname").ok_or(Corruption::MissingField("$classname"))?;
        match self.plist.object(name)? {
            Object::String(name) => Ok(name),
            _ => Err(Corruption::UnexpectedType {
                field: "$classname",
                expected: "string",
            }),
        }
    }

    fn instance(
        &self,
        object: Object<'a>,
        expected: ArchivedClass,
        field: &'static str,
    ) -> Result<ArchivedObject<'_, 'a>, ArchiveError> {
        let Object::Dictionary(entries) = object else {
            return Err(unexpected(field, "archived object"));
        };
        let fields = string_keyed(&self.plist, entries)?;
        let name = self.class_name(&fields)?;
        admit(&name, expected)?;
        Ok(ArchivedObject {
            archive: self,
            fields,
        })
    }
}

/// One class-backed object of a [`KeyedArchive`] whose class has been admitted.
#[derive(Debug)]
pub struct ArchivedObject<'k, 'a> {
    archive: &'k KeyedArchive<'a>,
    fields: Entries<'a>,
}

impl<'k, 'a> ArchivedObject<'k, 'a> {
    pub fn contains(&self, key: &str) -> bool {
        lookup(&self.fields, key).is_some()
    }

    /// Field value with UIDs followed. UID 0 (`$null`) counts as absent.
    fn value(&self, key: &'static str) -> Result<Object<'a>, ArchiveError> {
        let r = lookup(&self.fields, key).ok_or(Corruption::MissingField(key))?;
        match self.archive.plist.object(r).map_err(Corruption::Plist)? {
            Object::Uid(0) => Err(Corruption::MissingField(key).into()),
            Object::Uid(uid) => Ok(self.archive.resolve(uid)?),
            inline => Ok(inline),
        }
    }

    pub fn decode_object(
        &self,
        key: &'static str,
        expected: ArchivedClass,
    ) -> Result<ArchivedObject<'k, 'a>, ArchiveError> {
        let object = self.value(key)?;
        self.archive.instance(object, expected, key)
    }

    pub fn decode_string(&self, key: &'static str) -> Result<Cow<'a, str>, ArchiveError> {
        match self.value(key)? {
            Object::String(s) => Ok(s),
            boxed @ Object::Dictionary(_) => {
                match self
                    .archive
                    .instance(boxed, ArchivedClass::String, key)?
                    .value("NS.string")?
                {
                    Object::String(s) => Ok(s),
                    _ => Err(unexpected("NS.string", "string")),
                }
            }
            _ => Err(unexpected(key, "string")),
        }
    }

    pub fn decode_data(&self, key: &'static str) -> Result<Cow<'a, [u8]>, ArchiveError> {
        match self.value(key)? {
            Object::Data(bytes) => Ok(bytes),
            boxed @ Object::Dictionary(_) => {
                match self
                    .archive
                    .instance(boxed, ArchivedClass::Data, key)?
                    .value("NS.data")?
                {
                    Object::Data(bytes) => Ok(bytes),
                    _ => Err(unexpected("NS.data", "data")),
                }
            }
            _ => Err(unexpected(key, "data")),
        }
    }

    /// Seconds since 2001-01-01T00:00:00Z.
    pub fn decode_date(&self, key: &'static str) -> Result<f64, ArchiveError> {
        match self.value(key)? {
            Object::Date(seconds) => Ok(seconds),
            boxed @ Object::Dictionary(_) => {
                match self
                    .archive
                    .instance(boxed, ArchivedClass::Date, key)?
                    .value("NS.time")?
                {
                    Object::Real(seconds) => Ok(seconds),
                    Object::Integer(seconds) => Ok(seconds as f64),
                    _ => Err(unexpected("NS.time", "number")),
                }
            }
            _ => Err(unexpected(key, "date")),
        }
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Builds a keyed archive. Every method returns the new object's UID.
#[derive(Debug)]
pub struct KeyedArchiveWriter<'a> {
    plist: PlistWriter<'a>,
    objects: Vec<ObjectRef>,
    classes: Vec<(&'a str, u64)>,
    version: i64,
}

impl Default for KeyedArchiveWriter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> KeyedArchiveWriter<'a> {
    pub fn new() -> Self {
        let mut writer = Self {
            plist: PlistWriter::new(),
            objects: Vec::new(),
            classes: Vec::new(),
            version: ARCHIVE_VERSION,
        };
        writer.append(Object::String(Cow::Borrowed(NULL_PLACEHOLDER)));
        writer
    }

    /// Override the `$version` stamped into the archive.
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    fn append(&mut self, object: Object<'a>) -> u64 {
        let r = self.plist.push(object);
        self.objects.push(r);
        (self.objects.len() - 1) as u64
    }

    fn key(&mut self, name: &'a str) -> ObjectRef {
        self.plist.push(Object::String(Cow::Borrowed(name)))
    }

    pub fn string(&mut self, value: impl Into<Cow<'a, str>>) -> u64 {
        self.append(Object::String(value.into()))
    }

    pub fn data(&mut self, bytes: impl Into<Cow<'a, [u8]>>) -> u64 {
        self.append(Object::Data(bytes.into()))
    }

    /// An `NSDate` instance for `seconds` since 2001-01-01T00:00:00Z.
    pub fn date(&mut self, seconds: f64) -> u64 {
        self.instance("NSDate", vec![("NS.time", Object::Real(seconds))])
    }

    /// A class-backed object whose fields all refer to other objects by UID.
    pub fn object(&mut self, class_name: &'a str, fields: &[(&'a str, u64)]) -> u64 {
        let fields = fields
            .iter()
            .map(|&(key, uid)| (key, Object::Uid(uid)))
            .collect();
        self.instance(class_name, fields)
    }

    /// A class-backed object with arbitrary field values.
    pub fn instance(&mut self, class_name: &'a str, fields: Vec<(&'a str, Object<'a>)>) -> u64 {
        let class = self.class(class_name);
        let mut entries = Vec::with_capacity(fields.len() + 1);
        for (key, value) in fields {
            let key = self.key(key);
            entries.push((key, self.plist.push(value)));
        }
        let key = self.key("$class");
        entries.push((key, self.plist.push(Object::Uid(class))));
        self.append(Object::Dictionary(entries))
    }

    fn class(&mut self, name: &'a str) -> u64 {
        if let Some(&(_, uid)) = self.classes.iter().find(|(n, _)| *n == name) {
            return uid;
        }
        let own = self.plist.push(Object::String(Cow::Borrowed(name)));
        let base = self.plist.push(Object::String(Cow::Borrowed("NSObject")));
        let hierarchy = self.plist.push(Object::Array(vec![own, base]));
        let classname_key = self.key("$classname");
        let classes_key = self.key("$classes");
        let uid = self.append(Object::Dictionary(vec![
            (classname_key, own),
            (classes_key, hierarchy),
        ]));
        self.classes.push((name, uid));
        uid
    }

    /// Serialize the archive with `root` as its top object.
    pub fn finish(mut self, root: u64) -> Vec<u8> {
        let objects = self.plist.push(Object::Array(self.objects.clone()));
        let root_key = self.key("root");
        let root = self.plist.push(Object::Uid(root));
        let top = self.plist.push(Object::Dictionary(vec![(root_key, root)]));

        let version = self.plist.push(Object::Integer(self.version));
        let archiver = self.plist.push(Object::String(Cow::Borrowed(ARCHIVER)));
        let dictionary = vec![
            (self.key("$version"), version),
            (self.key("$archiver"), archiver),
            (self.key("$top"), top),
            (self.key("$objects"), objects),
        ];
        let archive = self.plist.push(Object::Dictionary(dictionary));
        self.plist.finish(archive)
    }
}
