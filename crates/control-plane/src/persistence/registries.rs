use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::RegistryId;

/// Container-image registry record, referenced from stack definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub id: RegistryId,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub authentication: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Entity for Registry {
    const BUCKET: &'static str = "registries";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = RegistryId(id);
    }
}

pub type RegistryService = Service<Registry>;
