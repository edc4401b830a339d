use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::TeamId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

impl Entity for Team {
    const BUCKET: &'static str = "teams";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = TeamId(id);
    }
}

pub type TeamService = Service<Team>;
