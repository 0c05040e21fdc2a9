use super::*;

fn duration() -> String {
    "60s".into()
}

fn interval() -> String {
    "10s".into()
}

fn threads() -> usize {
    4
}

#[derive(Clone, Deserialize)]
pub struct General {
    /// How long the workload runs for, eg: `5m`
    #[serde(default = "duration")]
    duration: String,
    /// Interval between periodic stats reports
    #[serde(default = "interval")]
    interval: String,
    /// Number of worker threads issuing operations
    #[serde(default = "threads")]
    threads: usize,
}

impl General {
    pub fn duration(&self) -> Duration {
        humantime::parse_duration(&self.duration).unwrap_or_default()
    }

    pub fn interval(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or_default()
    }

    pub fn threads(&self) -> usize {
        std::cmp::max(1, self.threads)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if parse_duration("duration", &self.duration)?.is_zero() {
            return Err(ConfigError::invalid("duration", "must be non-zero"));
        }
        if parse_duration("interval", &self.interval)?.is_zero() {
            return Err(ConfigError::invalid("interval", "must be non-zero"));
        }
        Ok(())
    }
}
