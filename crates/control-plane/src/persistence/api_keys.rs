use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use super::base::{Entity, Service};
use super::{ApiKeyId, UserId};
use crate::store::{StoreError, TxRead};

/// Machine credential bound to a user. Only the SHA-256 digest of the raw
/// key is stored; the raw key is shown once at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub user_id: UserId,
    #[serde(default)]
    pub description: String,
    /// First characters of the raw key, kept for display.
    pub prefix: String,
    /// Hex-encoded SHA-256 of the raw key.
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for ApiKey {
    const BUCKET: &'static str = "api_keys";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = ApiKeyId(id);
    }
}

pub type ApiKeyService = Service<ApiKey>;

impl Service<ApiKey> {
    pub fn by_digest(&self, digest: &str) -> Result<Option<ApiKey>, StoreError> {
        self.store().view(|tx| {
            let mut found = None;
            tx.for_each(ApiKey::BUCKET, |_, key: ApiKey| {
                let matches: bool = key
                    .digest
                    .as_bytes()
                    .ct_eq(digest.as_bytes())
                    .into();
                if found.is_none() && matches {
                    found = Some(key);
                }
                Ok(())
            })?;
            Ok(found)
        })
    }
}
