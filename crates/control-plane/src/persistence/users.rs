use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::UserId;
use crate::store::{StoreError, TxRead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Standard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Argon2id PHC string; never serialised into API responses.
    pub password_hash: String,
    pub role: UserRole,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl Entity for User {
    const BUCKET: &'static str = "users";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = UserId(id);
    }
}

pub type UserService = Service<User>;

impl Service<User> {
    pub fn by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.store().view(|tx| by_username_tx(tx, username))
    }
}

pub fn by_username_tx(tx: &impl TxRead, username: &str) -> Result<Option<User>, StoreError> {
    let mut found = None;
    tx.for_each(User::BUCKET, |_, user: User| {
        if found.is_none() && user.username.eq_ignore_ascii_case(username) {
            found = Some(user);
        }
        Ok(())
    })?;
    Ok(found)
}
