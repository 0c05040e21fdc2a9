use super::*;
use crate::record::{FileFormat, MAX_HEADER_LEN};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const EXTENSION: &str = "object";

/// A single object file on disk.
pub struct ObjectFile {
    path: PathBuf,
}

impl ObjectFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Detect the format from the file header.
    pub fn format(&self) -> Result<FileFormat, PoolError> {
        let mut buf = Vec::with_capacity(MAX_HEADER_LEN);
        fs::File::open(&self.path)?
            .take(MAX_HEADER_LEN as u64)
            .read_to_end(&mut buf)?;
        Ok(FileFormat::parse(&buf)?)
    }

    /// Number of records in the file.
    pub fn len(&self, format: &FileFormat) -> Result<usize, PoolError> {
        let bytes = fs::metadata(&self.path)?.len() as usize;
        self.record_count(format, bytes)
    }

    pub fn read(&self) -> Result<(FileFormat, Vec<ObjectRecord>), PoolError> {
        let content = fs::read(&self.path)?;
        let format = FileFormat::parse(&content)?;
        let count = self.record_count(&format, content.len())?;

        let mut records = Vec::with_capacity(count);
        for bytes in content[format.header_len()..].chunks_exact(format.record_len()) {
            records.push(format.decode(bytes)?);
        }

        Ok((format, records))
    }

    /// Remove up to `n` records from the end of the file and return them. The
    /// file is deleted once it holds no records.
    pub fn take_tail(&self, n: usize) -> Result<Vec<ObjectRecord>, PoolError> {
        let format = self.format()?;
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let count = self.record_count(&format, file.metadata()?.len() as usize)?;
        let take = n.min(count);
        let record_len = format.record_len();

        let offset = format.header_len() + (count - take) * record_len;
        let mut buf = vec![0; take * record_len];
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(&mut buf)?;

        let records = buf
            .chunks_exact(record_len)
            .map(|bytes| format.decode(bytes))
            .collect::<Result<Vec<_>, _>>()?;

        if take == count {
            drop(file);
            fs::remove_file(&self.path)?;
        } else {
            file.set_len(offset as u64)?;
            file.sync_data()?;
        }

        Ok(records)
    }

    /// Append records, creating the file in `pool_format` if it does not
    /// exist. A file in a format poorer than `pool_format` is rewritten in
    /// `pool_format` first. A richer file keeps its own format.
    pub fn append(&self, records: &[ObjectRecord], pool_format: &FileFormat) -> Result<(), PoolError> {
        if !self.exists() {
            return self.write(pool_format, records);
        }

        let format = self.format()?;
        if format.is_poorer_than(pool_format) {
            let (_, mut existing) = self.read()?;
            debug!(
                "upgrading {} from {} to {}",
                self.path.display(),
                format.version(),
                pool_format.version()
            );
            existing.extend_from_slice(records);
            return self.write(pool_format, &existing);
        }

        // validate the existing content before extending it
        self.len(&format)?;

        let mut buf = Vec::with_capacity(records.len() * format.record_len());
        for record in records {
            format.encode(record, &mut buf)?;
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }

    /// Atomically replace the file with `records` in the given format.
    pub fn write(&self, format: &FileFormat, records: &[ObjectRecord]) -> Result<(), PoolError> {
        let directory = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let tmp = NamedTempFile::new_in(directory)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            writer.write_all(&format.header())?;
            let mut buf = Vec::with_capacity(format.record_len());
            for record in records {
                buf.clear();
                format.encode(record, &mut buf)?;
                writer.write_all(&buf)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| PoolError::Persistence(e.error))?;
        Ok(())
    }

    fn record_count(&self, format: &FileFormat, bytes: usize) -> Result<usize, PoolError> {
        let body = bytes.saturating_sub(format.header_len());
        if body % format.record_len() != 0 {
            return Err(PoolError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "{body} bytes of records is not a multiple of the {} byte record length",
                    format.record_len()
                ),
            });
        }
        Ok(body / format.record_len())
    }
}

/// The set of object files in the pool directory. The save file holds the
/// live pool; files at other indices hold surplus records.
pub struct ObjectStore {
    directory: PathBuf,
    prefix: String,
    save_index: u32,
    format: FileFormat,
    max_objects: usize,
}

impl ObjectStore {
    pub fn open(config: &config::Pool) -> Result<Self, PoolError> {
        fs::create_dir_all(config.directory())?;

        let mut store = Self {
            directory: config.directory().to_path_buf(),
            prefix: config.prefix().to_string(),
            save_index: 0,
            format: config.format().map_err(PoolError::Config)?,
            max_objects: config.max_objects().map_err(PoolError::Config)?,
        };

        store.save_index = match config.file_index() {
            Some(index) => index,
            None => store.indices()?.last().copied().unwrap_or(0),
        };

        Ok(store)
    }

    pub fn format(&self) -> &FileFormat {
        &self.format
    }

    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    pub fn save_index(&self) -> u32 {
        self.save_index
    }

    pub fn path(&self, index: u32) -> PathBuf {
        self.directory
            .join(format!("{}{index}.{EXTENSION}", self.prefix))
    }

    /// Indices of the object files present, in ascending order.
    pub fn indices(&self) -> Result<Vec<u32>, PoolError> {
        let mut indices = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let name = entry?.file_name();
            let index = name
                .to_str()
                .and_then(|n| n.strip_prefix(self.prefix.as_str()))
                .and_then(|n| n.strip_suffix(EXTENSION))
                .and_then(|n| n.strip_suffix('.'))
                .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse().ok());
            if let Some(index) = index {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Load the records of the save file. A missing file is an empty pool.
    pub fn load(&self) -> Result<Vec<ObjectRecord>, PoolError> {
        let file = ObjectFile::new(self.path(self.save_index));
        if !file.exists() {
            return Ok(Vec::new());
        }

        let (format, mut records) = file.read()?;
        self.check_names(&file, &format)?;
        for record in records.iter_mut() {
            self.conform(record);
        }

        info!(
            "loaded {} objects from {} (format {})",
            records.len(),
            file.path().display(),
            format.version()
        );
        Ok(records)
    }

    /// Rewrite the save file in the pool's format.
    pub fn save(&self, records: &[ObjectRecord]) -> Result<(), PoolError> {
        ObjectFile::new(self.path(self.save_index)).write(&self.format, records)
    }

    /// Move `records` into surplus files, never letting one exceed
    /// `max_objects`. Records that were written are drained from the vector;
    /// on error the remainder is left in place.
    pub fn write_surplus(&self, records: &mut Vec<ObjectRecord>) -> Result<(), PoolError> {
        while !records.is_empty() {
            let (index, room) = self.surplus_target()?;
            let take = room.min(records.len());
            let chunk = records.split_off(records.len() - take);

            let file = ObjectFile::new(self.path(index));
            if let Err(e) = file.append(&chunk, &self.format) {
                records.extend(chunk);
                return Err(e);
            }
            debug!("moved {take} surplus objects to {}", file.path().display());
        }
        Ok(())
    }

    /// Borrow up to `needed` records from the tail of the highest surplus
    /// files, appending them to `out`.
    pub fn borrow(&self, needed: usize, out: &mut Vec<ObjectRecord>) -> Result<(), PoolError> {
        let target = out.len() + needed;
        for index in self.indices()?.into_iter().rev() {
            if out.len() >= target {
                break;
            }
            if index == self.save_index {
                continue;
            }

            let file = ObjectFile::new(self.path(index));
            if !self.names_match(&file.format()?) {
                warn!(
                    "not borrowing from {}: name width differs from the pool",
                    file.path().display()
                );
                continue;
            }

            let mut borrowed = file.take_tail(target - out.len())?;
            debug!(
                "borrowed {} objects from {}",
                borrowed.len(),
                file.path().display()
            );
            for record in borrowed.iter_mut() {
                self.conform(record);
            }
            out.append(&mut borrowed);
        }
        Ok(())
    }

    /// Versioned pools carry a token on every record.
    pub fn conform(&self, record: &mut ObjectRecord) {
        if self.format.is_versioned() && record.version.is_none() {
            record.version = Some(String::new());
        }
    }

    // The highest surplus file, if it can take more records, else a new file
    // above both it and the save file. Returns the index and free room.
    fn surplus_target(&self) -> Result<(u32, usize), PoolError> {
        let indices = self.indices()?;
        let last = indices.last().copied();

        if let Some(last) = last.filter(|i| *i != self.save_index) {
            let file = ObjectFile::new(self.path(last));
            let format = file.format()?;
            if self.names_match(&format) {
                let len = file.len(&format)?;
                if len < self.max_objects {
                    return Ok((last, self.max_objects - len));
                }
            }
        }

        let next = last.unwrap_or(0).max(self.save_index) + 1;
        Ok((next, self.max_objects))
    }

    fn names_match(&self, format: &FileFormat) -> bool {
        format.fields().name == self.format.fields().name
    }

    fn check_names(&self, file: &ObjectFile, format: &FileFormat) -> Result<(), PoolError> {
        if self.names_match(format) {
            return Ok(());
        }
        Err(PoolError::Corrupt {
            path: file.path().to_path_buf(),
            reason: format!(
                "object names are {} bytes but the pool uses {}",
                format.fields().name,
                self.format.fields().name
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ObjectName, Retention};

    fn record(id: u8) -> ObjectRecord {
        ObjectRecord::new(ObjectName::new(vec![id; 18]), id as u64 * 10, Some(id as u32))
    }

    fn records(ids: std::ops::Range<u8>) -> Vec<ObjectRecord> {
        ids.map(record).collect()
    }

    #[test]
    fn write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = ObjectFile::new(dir.path().join("id_0.object"));
        let format = FileFormat::current(18, 8).unwrap();

        file.write(&format, &records(0..5)).unwrap();
        assert_eq!(file.format().unwrap(), format);
        assert_eq!(file.len(&format).unwrap(), 5);

        let (read_format, read) = file.read().unwrap();
        assert_eq!(read_format, format);
        assert_eq!(read, records(0..5));
        assert_eq!(read[0].version.as_deref(), Some(""));
    }

    #[test]
    fn take_tail_truncates_then_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let file = ObjectFile::new(dir.path().join("id_1.object"));
        let format = FileFormat::v2();
        file.write(&format, &records(0..5)).unwrap();

        assert_eq!(file.take_tail(2).unwrap(), records(3..5));
        assert_eq!(file.len(&format).unwrap(), 3);
        assert_eq!(file.read().unwrap().1, records(0..3));

        assert_eq!(file.take_tail(10).unwrap(), records(0..3));
        assert!(!file.exists());
    }

    #[test]
    fn append_upgrades_poorer_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = ObjectFile::new(dir.path().join("id_1.object"));
        let pool = FileFormat::current(18, 4).unwrap();

        // a headerless generation 1 file
        let mut raw = Vec::new();
        for r in records(0..2) {
            FileFormat::v1().encode(&r, &mut raw).unwrap();
        }
        fs::write(file.path(), raw).unwrap();
        assert_eq!(file.format().unwrap(), FileFormat::v1());

        file.append(&[record(9).with_version("ab")], &pool).unwrap();
        let (format, read) = file.read().unwrap();
        assert_eq!(format, pool);
        assert_eq!(read.len(), 3);
        assert_eq!(read[0].retention, Retention::Unset);
        assert_eq!(read[0].version.as_deref(), Some(""));
        assert_eq!(read[2].version.as_deref(), Some("ab"));
    }

    #[test]
    fn append_keeps_richer_format() {
        let dir = tempfile::tempdir().unwrap();
        let file = ObjectFile::new(dir.path().join("id_1.object"));
        let rich = FileFormat::current(18, 8).unwrap();
        let pool = FileFormat::current(18, 0).unwrap();

        file.write(&rich, &records(0..1)).unwrap();
        file.append(&records(1..3), &pool).unwrap();

        let (format, read) = file.read().unwrap();
        assert_eq!(format, rich);
        assert_eq!(read.len(), 3);
        assert_eq!(read[2].version.as_deref(), Some(""));
    }

    #[test]
    fn corrupt_length_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = ObjectFile::new(dir.path().join("id_0.object"));
        let mut raw = FileFormat::v2().header();
        raw.extend_from_slice(&[0; 40]);
        fs::write(file.path(), raw).unwrap();

        assert!(matches!(file.read(), Err(PoolError::Corrupt { .. })));
    }

    #[test]
    fn unsupported_version_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = ObjectFile::new(dir.path().join("id_0.object"));
        fs::write(file.path(), b"VERSION:\x05\x00").unwrap();

        assert!(matches!(
            file.read(),
            Err(PoolError::Format(RecordError::UnsupportedVersion { major: 5, .. }))
        ));
    }
}
