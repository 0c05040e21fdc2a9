//! Object records and the versioned binary format used to persist them.
//!
//! An object file is a version header followed by fixed-size records. Three
//! generations of the layout exist and every reader must be able to load all
//! of them:
//!
//! * `1.0` - no header at all, `name | size | suffix`
//! * `2.0` - `VERSION:` header, adds `legal holds | retention`
//! * `3.0` - adds a field-length header declaring the width of every field
//!   and an optional version token after the name
//!
//! Records decoded from an older generation are up-converted with default
//! values for the fields that generation does not carry.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;
use rand::RngCore;
use thiserror::Error;

mod format;
pub mod text;

pub use format::{FieldLengths, FileFormat, FormatVersion, LEGACY_NAME_LEN, VERSION_PREFIX};
pub(crate) use format::MAX_HEADER_LEN;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unsupported object file version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("malformed object file header: {0}")]
    MalformedHeader(String),
    #[error("record length mismatch (expected {expected} bytes, found {actual})")]
    Length { expected: usize, actual: usize },
    #[error("object name is {actual} bytes but the field holds {expected}")]
    NameLength { expected: usize, actual: usize },
    #[error("value {value} does not fit the {width} byte {field} field")]
    FieldOverflow {
        field: &'static str,
        width: usize,
        value: i128,
    },
    #[error("invalid {field} value: {value}")]
    InvalidField { field: &'static str, value: i64 },
    #[error("version token is not valid utf-8")]
    VersionEncoding,
    #[error("version token {0:?} cannot be written as a text column")]
    TextToken(String),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The fixed-width key of an object. Displayed and parsed as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName(Box<[u8]>);

impl ObjectName {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Generate a random name of `len` bytes.
    pub fn random(len: usize, rng: &mut dyn RngCore) -> Self {
        let mut bytes = vec![0_u8; len];
        rng.fill_bytes(&mut bytes);
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({self})")
    }
}

impl FromStr for ObjectName {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(Self::new)
    }
}

/// Retention of an object, stored on disk as a signed integer where `-1` and
/// `-2` are sentinels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Retention {
    /// No retention period (`-1`).
    #[default]
    Unset,
    /// Retention inherited from the container (`-2`).
    Inherit,
    /// Retained until the given number of seconds since the epoch.
    Until(u64),
}

impl Retention {
    pub fn from_raw(raw: i64) -> Result<Self, RecordError> {
        match raw {
            -1 => Ok(Self::Unset),
            -2 => Ok(Self::Inherit),
            secs if secs >= 0 => Ok(Self::Until(secs as u64)),
            value => Err(RecordError::InvalidField {
                field: "retention",
                value,
            }),
        }
    }

    pub fn to_raw(self) -> i128 {
        match self {
            Self::Unset => -1,
            Self::Inherit => -2,
            Self::Until(secs) => secs as i128,
        }
    }
}

/// One object believed to exist on the target service.
///
/// Identity is `(name, size, container_suffix)`. Legal holds, retention and
/// the version token are metadata that may change while the object lives in
/// the pool and are ignored by `Eq` and `Ord`.
#[derive(Clone, Debug)]
pub struct ObjectRecord {
    pub name: ObjectName,
    pub size: u64,
    /// `None` targets the default container.
    pub container_suffix: Option<u32>,
    pub legal_holds: u8,
    pub retention: Retention,
    /// Present only for pools and files with versioning enabled.
    pub version: Option<String>,
}

impl ObjectRecord {
    pub fn new(name: ObjectName, size: u64, container_suffix: Option<u32>) -> Self {
        Self {
            name,
            size,
            container_suffix,
            legal_holds: 0,
            retention: Retention::Unset,
            version: None,
        }
    }

    pub fn with_legal_holds(mut self, legal_holds: u8) -> Self {
        self.legal_holds = legal_holds;
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl PartialEq for ObjectRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.size == other.size
            && self.container_suffix == other.container_suffix
    }
}

impl Eq for ObjectRecord {}

impl Hash for ObjectRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.size.hash(state);
        self.container_suffix.hash(state);
    }
}

impl PartialOrd for ObjectRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.size.cmp(&other.size))
            .then(self.container_suffix.cmp(&other.container_suffix))
    }
}
