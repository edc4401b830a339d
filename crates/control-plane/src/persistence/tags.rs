use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::TagId;

/// Free-form label referenced by endpoints, groups and dynamic edge groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}

impl Entity for Tag {
    const BUCKET: &'static str = "tags";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = TagId(id);
    }
}

pub type TagService = Service<Tag>;
