use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::session::SessionStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            sessions: SessionStore::default(),
        }
    }
}
