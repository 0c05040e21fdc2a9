//! Offline maintenance of object files: inspect them, convert to and from the
//! plain-text form and upgrade older generations in place.

use crate::pool::{ObjectFile, PoolError};
use crate::record::{text, FileFormat, ObjectRecord};
use core::fmt;
use std::io::{BufRead, Write};
use std::path::Path;

pub struct FileInfo {
    pub format: FileFormat,
    pub records: usize,
    pub bytes: u64,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.format.fields();
        writeln!(f, "version: {}", self.format.version())?;
        writeln!(f, "header: {} bytes", self.format.header_len())?;
        writeln!(f, "record: {} bytes", self.format.record_len())?;
        writeln!(
            f,
            "fields: name={} version={} size={} suffix={} legal_holds={} retention={}",
            fields.name,
            fields.version,
            fields.size,
            fields.suffix,
            fields.legal_holds,
            fields.retention
        )?;
        writeln!(f, "records: {}", self.records)?;
        write!(f, "size: {} bytes", self.bytes)
    }
}

pub fn info(path: &Path) -> Result<FileInfo, PoolError> {
    let file = ObjectFile::new(path);
    let format = file.format()?;
    Ok(FileInfo {
        format,
        records: file.len(&format)?,
        bytes: std::fs::metadata(path)?.len(),
    })
}

/// Write the records of an object file as text. Returns the record count.
pub fn to_text<W: Write>(path: &Path, out: W) -> Result<usize, PoolError> {
    let (format, records) = ObjectFile::new(path).read()?;
    text::write(&format, &records, out)?;
    Ok(records.len())
}

/// Build an object file from its text form. Returns the record count.
pub fn from_text<R: BufRead>(input: R, path: &Path) -> Result<usize, PoolError> {
    let (format, records) = text::read(input)?;
    ObjectFile::new(path).write(&format, &records)?;
    Ok(records.len())
}

/// Rewrite an object file in the current generation with a version field of
/// at least `version_len` bytes. Name width is kept and a wider version
/// field is never narrowed. Returns the old and new formats.
pub fn upgrade(path: &Path, version_len: u8) -> Result<(FileFormat, FileFormat), PoolError> {
    let file = ObjectFile::new(path);
    let (format, mut records) = file.read()?;
    let fields = format.fields();
    let target = FileFormat::current(fields.name, fields.version.max(version_len))?;

    if !format.is_poorer_than(&target) && format.version() >= target.version() {
        return Ok((format, format));
    }

    if target.is_versioned() {
        for record in records.iter_mut().filter(|r| r.version.is_none()) {
            record.version = Some(String::new());
        }
    }

    file.write(&target, &records)?;
    Ok((format, target))
}

/// Read every record from an object file.
pub fn records(path: &Path) -> Result<Vec<ObjectRecord>, PoolError> {
    Ok(ObjectFile::new(path).read()?.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ObjectName, Retention};

    fn record(id: u8) -> ObjectRecord {
        ObjectRecord::new(ObjectName::new(vec![id; 18]), 100 + id as u64, Some(1))
    }

    #[test]
    fn text_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("id_0.object");
        let format = FileFormat::current(18, 6).unwrap();
        ObjectFile::new(&binary)
            .write(&format, &[record(1).with_version("abc"), record(2)])
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(to_text(&binary, &mut out).unwrap(), 2);

        let copy = dir.path().join("id_1.object");
        assert_eq!(from_text(out.as_slice(), &copy).unwrap(), 2);
        assert_eq!(
            std::fs::read(&binary).unwrap(),
            std::fs::read(&copy).unwrap()
        );
    }

    #[test]
    fn info_reports_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_0.object");
        ObjectFile::new(&path)
            .write(&FileFormat::v2(), &[record(1), record(2), record(3)])
            .unwrap();

        let info = info(&path).unwrap();
        assert_eq!(info.format, FileFormat::v2());
        assert_eq!(info.records, 3);
        assert_eq!(info.bytes, 10 + 3 * 35);
        assert!(info.to_string().contains("version: 2.0"));
    }

    #[test]
    fn upgrade_v1_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_0.object");
        let mut raw = Vec::new();
        FileFormat::v1().encode(&record(1), &mut raw).unwrap();
        std::fs::write(&path, raw).unwrap();

        let (old, new) = upgrade(&path, 4).unwrap();
        assert_eq!(old, FileFormat::v1());
        assert_eq!(new, FileFormat::current(18, 4).unwrap());

        let upgraded = records(&path).unwrap();
        assert_eq!(upgraded, vec![record(1)]);
        assert_eq!(upgraded[0].version.as_deref(), Some(""));
        assert_eq!(upgraded[0].retention, Retention::Unset);
    }

    #[test]
    fn upgrade_never_narrows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_0.object");
        let wide = FileFormat::current(18, 8).unwrap();
        ObjectFile::new(&path)
            .write(&wide, &[record(1).with_version("12345678")])
            .unwrap();

        let (old, new) = upgrade(&path, 2).unwrap();
        assert_eq!(old, wide);
        assert_eq!(new, wide);
        assert_eq!(
            records(&path).unwrap()[0].version.as_deref(),
            Some("12345678")
        );
    }
}
