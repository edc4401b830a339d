use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{EndpointGroupId, TagId, TeamId, UserId};

/// Named group of endpoints; tags and access policies cascade to members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointGroup {
    pub id: EndpointGroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(default)]
    pub user_access_policies: Vec<UserId>,
    #[serde(default)]
    pub team_access_policies: Vec<TeamId>,
}

impl Entity for EndpointGroup {
    const BUCKET: &'static str = "endpoint_groups";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = EndpointGroupId(id);
    }
}

pub type EndpointGroupService = Service<EndpointGroup>;
