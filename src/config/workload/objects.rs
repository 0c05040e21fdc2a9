use super::*;

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ObjectCommand {
    verb: ObjectVerb,
    #[serde(default = "one")]
    weight: usize,
    #[serde(default = "one")]
    cardinality: usize,
}

impl ObjectCommand {
    pub fn new(verb: ObjectVerb, weight: usize) -> Self {
        Self {
            verb,
            weight,
            cardinality: 1,
        }
    }

    pub fn verb(&self) -> ObjectVerb {
        self.verb
    }

    /// Number of objects a batch operation targets.
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }
}

impl Command for ObjectCommand {
    fn weight(&self) -> usize {
        self.weight
    }
}

#[derive(Clone, Deserialize, Copy, Debug, Ord, Eq, PartialOrd, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectVerb {
    /// Create a new object.
    /// * S3: `PUT`
    #[serde(alias = "put")]
    Write,
    /// Read an existing object. Several readers may share one object.
    /// * S3: `GET`
    #[serde(alias = "get")]
    Read,
    /// Read an object's metadata, never sharing the object with another
    /// reader.
    /// * S3: `HEAD`
    Metadata,
    /// Replace an existing object's content.
    Overwrite,
    /// Remove an object.
    /// * S3: `DELETE`
    #[serde(alias = "del")]
    Delete,
    /// Remove several objects in one request.
    /// * S3: `POST ?delete`
    MultiDelete,
    /// Place an additional legal hold on an object.
    LegalHold,
    /// Push an object's retention further into the future.
    ExtendRetention,
}

impl ObjectVerb {
    pub fn supports_cardinality(&self) -> bool {
        matches!(self, Self::MultiDelete)
    }
}
