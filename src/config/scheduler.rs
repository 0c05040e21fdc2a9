use super::*;

// ramp step arithmetic is carried out in u64 nanoseconds
const MAX_RAMP: Duration = Duration::from_nanos(u64::MAX);

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Bound the number of operations in flight
    Concurrency,
    /// Issue operations at a target rate
    Rate,
}

// Arrival pattern for rate based pacing. Uniform spaces operations evenly
// while poisson draws exponentially distributed gaps with the same mean.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    #[default]
    Uniform,
    Poisson,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[serde(alias = "ns")]
    Nanoseconds,
    #[serde(alias = "us")]
    Microseconds,
    #[serde(alias = "ms")]
    Milliseconds,
    #[default]
    #[serde(alias = "s")]
    Seconds,
    #[serde(alias = "m")]
    Minutes,
    #[serde(alias = "h")]
    Hours,
}

impl TimeUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            Self::Nanoseconds => 1e-9,
            Self::Microseconds => 1e-6,
            Self::Milliseconds => 1e-3,
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3600.0,
        }
    }

    /// `amount` of this unit, if it is representable as a `Duration`.
    pub fn duration(&self, amount: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(amount * self.seconds()).ok()
    }
}

#[derive(Clone, Deserialize)]
pub struct Scheduler {
    mode: Mode,

    #[serde(default)]
    concurrency: usize,

    #[serde(default)]
    rate: f64,

    #[serde(default)]
    unit: TimeUnit,

    #[serde(default)]
    distribution: Distribution,

    #[serde(default)]
    ramp: f64,

    #[serde(default)]
    ramp_unit: TimeUnit,
}

impl Scheduler {
    pub fn concurrency(concurrency: usize) -> Self {
        Self {
            mode: Mode::Concurrency,
            concurrency,
            rate: 0.0,
            unit: TimeUnit::Seconds,
            distribution: Distribution::Uniform,
            ramp: 0.0,
            ramp_unit: TimeUnit::Seconds,
        }
    }

    pub fn rate(rate: f64, unit: TimeUnit, distribution: Distribution) -> Self {
        Self {
            mode: Mode::Rate,
            concurrency: 0,
            rate,
            unit,
            distribution,
            ramp: 0.0,
            ramp_unit: TimeUnit::Seconds,
        }
    }

    pub fn with_ramp(mut self, ramp: f64, unit: TimeUnit) -> Self {
        self.ramp = ramp;
        self.ramp_unit = unit;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn max_concurrency(&self) -> usize {
        self.concurrency
    }

    /// Target rate converted to operations per second.
    pub fn ops_per_second(&self) -> f64 {
        self.rate / self.unit.seconds()
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn ramp(&self) -> Option<Duration> {
        if self.ramp > 0.0 {
            self.ramp_duration()
        } else {
            None
        }
    }

    fn ramp_duration(&self) -> Option<Duration> {
        self.ramp_unit
            .duration(self.ramp)
            .filter(|ramp| *ramp <= MAX_RAMP)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.ramp_duration().is_none() {
            return Err(ConfigError::invalid(
                "ramp",
                format!("{} {:?} is not a usable ramp duration", self.ramp, self.ramp_unit),
            ));
        }

        match self.mode {
            Mode::Concurrency => {
                if self.concurrency == 0 {
                    return Err(ConfigError::invalid("concurrency", "must be at least 1"));
                }
            }
            Mode::Rate => {
                if !self.rate.is_finite() || self.rate <= 0.0 {
                    return Err(ConfigError::invalid("rate", "must be a positive number"));
                }
            }
        }

        Ok(())
    }
}
