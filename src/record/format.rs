use super::*;

/// Literal prefix of the version header. Files without it are generation 1.0.
pub const VERSION_PREFIX: &[u8; 8] = b"VERSION:";

/// Width of the name field in generations without a field-length header.
pub const LEGACY_NAME_LEN: u8 = 18;

const VERSION_HEADER_LEN: usize = VERSION_PREFIX.len() + 2;
const FIELD_HEADER_LEN: u8 = 7;

/// Upper bound on the bytes needed to parse any supported header.
pub(crate) const MAX_HEADER_LEN: usize = VERSION_HEADER_LEN + u8::MAX as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
}

impl FormatVersion {
    pub const V1: Self = Self { major: 1, minor: 0 };
    pub const V2: Self = Self { major: 2, minor: 0 };
    pub const V3: Self = Self { major: 3, minor: 0 };

    pub fn has_field_lengths(&self) -> bool {
        self.major >= 3
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Byte widths of each record field. A zero width means the field is not
/// carried by the file and takes its default value when decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLengths {
    pub name: u8,
    pub version: u8,
    pub size: u8,
    pub suffix: u8,
    pub legal_holds: u8,
    pub retention: u8,
}

impl FieldLengths {
    pub fn v1() -> Self {
        Self {
            name: LEGACY_NAME_LEN,
            version: 0,
            size: 8,
            suffix: 4,
            legal_holds: 0,
            retention: 0,
        }
    }

    pub fn v2() -> Self {
        Self {
            legal_holds: 1,
            retention: 4,
            ..Self::v1()
        }
    }

    pub fn v3(name: u8, version: u8) -> Self {
        Self {
            name,
            version,
            ..Self::v2()
        }
    }

    pub fn record_len(&self) -> usize {
        [
            self.name,
            self.version,
            self.size,
            self.suffix,
            self.legal_holds,
            self.retention,
        ]
        .iter()
        .map(|w| *w as usize)
        .sum()
    }

    pub fn to_bytes(&self) -> [u8; FIELD_HEADER_LEN as usize] {
        [
            FIELD_HEADER_LEN,
            self.name,
            self.version,
            self.size,
            self.suffix,
            self.legal_holds,
            self.retention,
        ]
    }

    fn validate(&self) -> Result<(), RecordError> {
        if self.name == 0 {
            return Err(malformed("name field has zero width"));
        }
        if !(1..=8).contains(&self.size) {
            return Err(malformed(format!("size field width {}", self.size)));
        }
        for (field, width) in [
            ("suffix", self.suffix),
            ("legal holds", self.legal_holds),
            ("retention", self.retention),
        ] {
            if width > 8 {
                return Err(malformed(format!("{field} field width {width}")));
            }
        }
        Ok(())
    }
}

/// The layout of one object file: its version, field widths and the length
/// of the header preceding the first record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileFormat {
    version: FormatVersion,
    fields: FieldLengths,
    header_len: usize,
}

impl FileFormat {
    /// Generation 1.0 as originally written, without any header.
    pub fn v1() -> Self {
        Self {
            version: FormatVersion::V1,
            fields: FieldLengths::v1(),
            header_len: 0,
        }
    }

    pub fn v2() -> Self {
        Self {
            version: FormatVersion::V2,
            fields: FieldLengths::v2(),
            header_len: VERSION_HEADER_LEN,
        }
    }

    /// The format written by this version of the software.
    pub fn current(name_len: u8, version_len: u8) -> Result<Self, RecordError> {
        Self::with_fields(FormatVersion::V3, FieldLengths::v3(name_len, version_len))
    }

    /// Build a generation 3+ format from explicit field widths.
    pub fn with_fields(version: FormatVersion, fields: FieldLengths) -> Result<Self, RecordError> {
        if !version.has_field_lengths() {
            return Err(malformed(format!(
                "version {version} does not carry field lengths"
            )));
        }
        if version.major > FormatVersion::V3.major {
            return Err(RecordError::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
            });
        }
        fields.validate()?;
        Ok(Self {
            version,
            fields,
            header_len: VERSION_HEADER_LEN + FIELD_HEADER_LEN as usize,
        })
    }

    /// Detect the format from the leading bytes of a file. `buf` should hold
    /// at least `MAX_HEADER_LEN` bytes unless the file is shorter.
    pub fn parse(buf: &[u8]) -> Result<Self, RecordError> {
        if !buf.starts_with(VERSION_PREFIX) {
            return Ok(Self::v1());
        }
        if buf.len() < VERSION_HEADER_LEN {
            return Err(malformed("truncated version header"));
        }

        let version = FormatVersion {
            major: buf[8],
            minor: buf[9],
        };

        match version.major {
            1 => Ok(Self {
                version,
                fields: FieldLengths::v1(),
                header_len: VERSION_HEADER_LEN,
            }),
            2 => Ok(Self {
                version,
                fields: FieldLengths::v2(),
                header_len: VERSION_HEADER_LEN,
            }),
            3 => {
                let rest = &buf[VERSION_HEADER_LEN..];
                let declared = *rest
                    .first()
                    .ok_or_else(|| malformed("missing field-length header"))?;
                if declared < FIELD_HEADER_LEN {
                    return Err(malformed(format!(
                        "field-length header declares {declared} bytes"
                    )));
                }
                if rest.len() < declared as usize {
                    return Err(malformed("truncated field-length header"));
                }
                let fields = FieldLengths {
                    name: rest[1],
                    version: rest[2],
                    size: rest[3],
                    suffix: rest[4],
                    legal_holds: rest[5],
                    retention: rest[6],
                };
                fields.validate()?;
                // newer writers may append widths for fields we do not know
                // about; they are skipped along with the rest of the header
                Ok(Self {
                    version,
                    fields,
                    header_len: VERSION_HEADER_LEN + declared as usize,
                })
            }
            _ => Err(RecordError::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
            }),
        }
    }

    /// Canonical header bytes for this format. Empty for headerless 1.0.
    pub fn header(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(VERSION_HEADER_LEN + FIELD_HEADER_LEN as usize);
        if self.header_len == 0 {
            return out;
        }
        out.extend_from_slice(VERSION_PREFIX);
        out.push(self.version.major);
        out.push(self.version.minor);
        if self.version.has_field_lengths() {
            out.extend_from_slice(&self.fields.to_bytes());
        }
        out
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn fields(&self) -> FieldLengths {
        self.fields
    }

    /// Length of the header as found on disk.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn record_len(&self) -> usize {
        self.fields.record_len()
    }

    pub fn is_versioned(&self) -> bool {
        self.fields.version > 0
    }

    /// True when records in this format cannot carry everything `other`
    /// carries. Such a file must be rewritten before it receives records
    /// from a pool using `other`.
    pub fn is_poorer_than(&self, other: &FileFormat) -> bool {
        self.version.major < other.version.major || self.fields.version < other.fields.version
    }

    pub fn encode(&self, record: &ObjectRecord, out: &mut Vec<u8>) -> Result<(), RecordError> {
        let fields = &self.fields;

        if record.name.len() != fields.name as usize {
            return Err(RecordError::NameLength {
                expected: fields.name as usize,
                actual: record.name.len(),
            });
        }
        out.extend_from_slice(record.name.as_bytes());

        if fields.version > 0 {
            let token = record.version.as_deref().unwrap_or_default().as_bytes();
            let width = fields.version as usize;
            if token.len() > width {
                return Err(RecordError::FieldOverflow {
                    field: "version",
                    width,
                    value: token.len() as i128,
                });
            }
            out.extend_from_slice(token);
            out.resize(out.len() + width - token.len(), 0);
        }

        put_signed(out, "size", fields.size, record.size as i128)?;
        put_signed(
            out,
            "suffix",
            fields.suffix,
            record.container_suffix.map(i128::from).unwrap_or(-1),
        )?;
        put_unsigned(out, "legal holds", fields.legal_holds, record.legal_holds as i128)?;
        put_signed(out, "retention", fields.retention, record.retention.to_raw())?;

        Ok(())
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ObjectRecord, RecordError> {
        if bytes.len() != self.record_len() {
            return Err(RecordError::Length {
                expected: self.record_len(),
                actual: bytes.len(),
            });
        }

        let fields = &self.fields;
        let mut rest = bytes;
        let mut take = |width: u8| take_field(&mut rest, width);

        let name = ObjectName::new(take(fields.name));

        let version = if fields.version > 0 {
            let raw = take(fields.version);
            let end = raw.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
            Some(String::from_utf8(raw[..end].to_vec()).map_err(|_| RecordError::VersionEncoding)?)
        } else {
            None
        };

        let size = get_signed(take(fields.size));
        if size < 0 {
            return Err(RecordError::InvalidField {
                field: "size",
                value: size,
            });
        }

        let container_suffix = if fields.suffix > 0 {
            match get_signed(take(fields.suffix)) {
                -1 => None,
                s if (0..=u32::MAX as i64).contains(&s) => Some(s as u32),
                value => {
                    return Err(RecordError::InvalidField {
                        field: "suffix",
                        value,
                    })
                }
            }
        } else {
            None
        };

        let legal_holds = if fields.legal_holds > 0 {
            let raw = get_unsigned(take(fields.legal_holds));
            u8::try_from(raw).map_err(|_| RecordError::InvalidField {
                field: "legal holds",
                value: raw as i64,
            })?
        } else {
            0
        };

        let retention = if fields.retention > 0 {
            Retention::from_raw(get_signed(take(fields.retention)))?
        } else {
            Retention::Unset
        };

        Ok(ObjectRecord {
            name,
            size: size as u64,
            container_suffix,
            legal_holds,
            retention,
            version,
        })
    }
}

fn take_field<'a>(rest: &mut &'a [u8], width: u8) -> &'a [u8] {
    let (head, tail) = rest.split_at(width as usize);
    *rest = tail;
    head
}

fn malformed(reason: impl Into<String>) -> RecordError {
    RecordError::MalformedHeader(reason.into())
}

fn put_signed(
    out: &mut Vec<u8>,
    field: &'static str,
    width: u8,
    value: i128,
) -> Result<(), RecordError> {
    if width == 0 {
        return Ok(());
    }
    let bits = 8 * width as u32;
    let min = -(1_i128 << (bits - 1));
    let max = (1_i128 << (bits - 1)) - 1;
    if value < min || value > max {
        return Err(RecordError::FieldOverflow {
            field,
            width: width as usize,
            value,
        });
    }
    out.extend_from_slice(&(value as i64).to_be_bytes()[8 - width as usize..]);
    Ok(())
}

fn put_unsigned(
    out: &mut Vec<u8>,
    field: &'static str,
    width: u8,
    value: i128,
) -> Result<(), RecordError> {
    if width == 0 {
        return Ok(());
    }
    let max = (1_i128 << (8 * width as u32)) - 1;
    if value < 0 || value > max {
        return Err(RecordError::FieldOverflow {
            field,
            width: width as usize,
            value,
        });
    }
    out.extend_from_slice(&(value as u64).to_be_bytes()[8 - width as usize..]);
    Ok(())
}

// sign-extending big-endian read of a 1-8 byte field
fn get_signed(bytes: &[u8]) -> i64 {
    let init: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    bytes.iter().fold(init, |acc, b| (acc << 8) | *b as i64)
}

fn get_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, b| (acc << 8) | *b as u64)
}
