use std::collections::HashSet;
use std::path::PathBuf;

use crate::auth::CredentialVerifier;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub verifier: Box<dyn CredentialVerifier>,
    /// Live teacher auth tokens; request-scoped "logged in" state made
    /// explicit so the verifier stays swappable.
    pub tokens: HashSet<String>,
}

impl AppState {
    pub fn new(verifier: Box<dyn CredentialVerifier>) -> Self {
        Self {
            workspace: None,
            db: None,
            verifier,
            tokens: HashSet::new(),
        }
    }
}
