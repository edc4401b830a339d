use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{CustomTemplateId, UserId};

/// Reusable compose/manifest definition shared through the template library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTemplate {
    pub id: CustomTemplateId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub file_content: String,
    /// Target platform, e.g. `linux` or `windows`.
    #[serde(default)]
    pub platform: String,
    pub created_by: UserId,
}

impl Entity for CustomTemplate {
    const BUCKET: &'static str = "custom_templates";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = CustomTemplateId(id);
    }
}

pub type CustomTemplateService = Service<CustomTemplate>;
