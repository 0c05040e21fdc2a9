use super::*;

mod objects;

pub use objects::*;

fn one() -> usize {
    1
}

fn object_size() -> u64 {
    1024
}

pub trait Command {
    fn weight(&self) -> usize;
}

/// The simulated workload: which operations to issue against the pool and in
/// what proportion.
#[derive(Clone, Deserialize)]
pub struct Workload {
    #[serde(default = "default_commands")]
    commands: Vec<ObjectCommand>,
    /// Size recorded for newly written objects.
    #[serde(default = "object_size")]
    object_size: u64,
    /// Number of suffixed containers. Zero writes everything to the default
    /// container.
    #[serde(default)]
    containers: u32,
    /// Fraction of simulated operations that fail.
    #[serde(default)]
    failure_ratio: f64,
    /// Seed for the simulated workload. A random seed is used when unset.
    #[serde(default)]
    initial_seed: Option<u64>,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            commands: default_commands(),
            object_size: object_size(),
            containers: 0,
            failure_ratio: 0.0,
            initial_seed: None,
        }
    }
}

fn default_commands() -> Vec<ObjectCommand> {
    vec![
        ObjectCommand::new(ObjectVerb::Write, 1),
        ObjectCommand::new(ObjectVerb::Read, 1),
        ObjectCommand::new(ObjectVerb::Delete, 1),
    ]
}

impl Workload {
    pub fn commands(&self) -> &[ObjectCommand] {
        &self.commands
    }

    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    pub fn containers(&self) -> u32 {
        self.containers
    }

    pub fn failure_ratio(&self) -> f64 {
        self.failure_ratio
    }

    pub fn initial_seed(&self) -> Option<u64> {
        self.initial_seed
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.commands.iter().all(|c| c.weight() == 0) {
            return Err(ConfigError::invalid(
                "commands",
                "at least one command needs a non-zero weight",
            ));
        }

        for command in &self.commands {
            if command.cardinality() == 0 {
                return Err(ConfigError::invalid("cardinality", "must not be zero"));
            }

            if command.cardinality() > 1 && !command.verb().supports_cardinality() {
                return Err(ConfigError::invalid(
                    "cardinality",
                    format!("verb: {:?} requires that `cardinality` is 1", command.verb()),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.failure_ratio) {
            return Err(ConfigError::invalid("failure_ratio", self.failure_ratio));
        }

        Ok(())
    }
}
