use super::*;
use crate::record::{FileFormat, LEGACY_NAME_LEN};

fn prefix() -> String {
    "id_".into()
}

fn max_bytes() -> u64 {
    100 * 1024 * 1024
}

fn persist_interval() -> String {
    "60s".into()
}

fn file_index() -> i64 {
    -1
}

fn name_len() -> u8 {
    LEGACY_NAME_LEN
}

/// Where and how the object pool is persisted.
#[derive(Clone, Deserialize)]
pub struct Pool {
    /// Directory holding the object files.
    directory: PathBuf,
    /// Object files are named `<prefix><index>.object`.
    #[serde(default = "prefix")]
    prefix: String,
    /// Upper bound on the size of a single object file.
    #[serde(default = "max_bytes")]
    max_bytes: u64,
    #[serde(default = "persist_interval")]
    persist_interval: String,
    /// Index of the file to load and save. `-1` picks the highest existing
    /// index.
    #[serde(default = "file_index")]
    file_index: i64,
    #[serde(default = "name_len")]
    name_len: u8,
    /// Width of the version token field. Zero disables versioning.
    #[serde(default)]
    version_len: u8,
}

impl Pool {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn persist_interval(&self) -> Duration {
        humantime::parse_duration(&self.persist_interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn file_index(&self) -> Option<u32> {
        u32::try_from(self.file_index).ok()
    }

    pub fn name_len(&self) -> u8 {
        self.name_len
    }

    pub fn version_len(&self) -> u8 {
        self.version_len
    }

    /// The format new object files are written in.
    pub fn format(&self) -> Result<FileFormat, ConfigError> {
        if self.name_len == 0 {
            return Err(ConfigError::invalid("name_len", "must be at least 1"));
        }
        // every other width is fixed
        FileFormat::current(self.name_len, self.version_len)
            .map_err(|e| ConfigError::invalid("version_len", e))
    }

    /// Maximum number of records in one object file.
    pub fn max_objects(&self) -> Result<usize, ConfigError> {
        let record_len = self.format()?.record_len() as u64;
        match self.max_bytes / record_len {
            0 => Err(ConfigError::invalid(
                "max_bytes",
                format!("must hold at least one {record_len} byte record"),
            )),
            n => Ok(n as usize),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() || self.prefix.contains(std::path::is_separator) {
            return Err(ConfigError::invalid("prefix", &self.prefix));
        }
        if self.file_index < -1 || self.file_index > u32::MAX as i64 {
            return Err(ConfigError::invalid("file_index", self.file_index));
        }
        if parse_duration("persist_interval", &self.persist_interval)?.is_zero() {
            return Err(ConfigError::invalid("persist_interval", "must be non-zero"));
        }
        self.max_objects().map(|_| ())
    }
}
