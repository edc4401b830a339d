use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use crate::store::StoreError;

const SINGLETON_ID: u32 = 1;

/// Instance-wide settings, stored as a singleton record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Default agent check-in interval, seconds.
    pub edge_agent_checkin_interval: u64,
    /// Default edge snapshot interval, seconds.
    pub edge_snapshot_interval: u64,
    /// Default edge command-poll interval, seconds.
    pub edge_command_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            edge_agent_checkin_interval: 5,
            edge_snapshot_interval: 60,
            edge_command_interval: 60,
        }
    }
}

impl Entity for Settings {
    const BUCKET: &'static str = "settings";

    fn id(&self) -> u32 {
        SINGLETON_ID
    }

    fn set_id(&mut self, _id: u32) {}
}

pub type SettingsService = Service<Settings>;

impl Service<Settings> {
    /// Stored settings, falling back to defaults before first save.
    pub fn current(&self) -> Result<Settings, StoreError> {
        match self.read(SINGLETON_ID) {
            Ok(settings) => Ok(settings),
            Err(StoreError::NotFound) => Ok(Settings::default()),
            Err(err) => Err(err),
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        self.store()
            .update(|tx| self.tx(tx).create_with_id(SINGLETON_ID, settings))
    }
}
