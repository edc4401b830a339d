use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{TeamId, TeamMembershipId, UserId};
use crate::store::{StoreError, TxRead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Leader,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMembership {
    pub id: TeamMembershipId,
    pub user_id: UserId,
    pub team_id: TeamId,
    pub role: TeamRole,
}

impl Entity for TeamMembership {
    const BUCKET: &'static str = "team_memberships";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = TeamMembershipId(id);
    }
}

pub type TeamMembershipService = Service<TeamMembership>;

impl Service<TeamMembership> {
    /// Teams the user belongs to, in membership order.
    pub fn teams_of_user(&self, user: UserId) -> Result<Vec<TeamId>, StoreError> {
        self.store().view(|tx| teams_of_user_tx(tx, user))
    }
}

pub fn teams_of_user_tx(tx: &impl TxRead, user: UserId) -> Result<Vec<TeamId>, StoreError> {
    let mut teams = Vec::new();
    tx.for_each(TeamMembership::BUCKET, |_, membership: TeamMembership| {
        if membership.user_id == user {
            teams.push(membership.team_id);
        }
        Ok(())
    })?;
    Ok(teams)
}
