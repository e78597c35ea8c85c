//! Cached login session and upload history.
//!
//! Both files live in the data directory and keep the field casing of
//! the stock app, so an existing installation's state keeps working.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::BlackbirdError;

/// Cached cloud session, stored as `.session.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub ton: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(rename = "accountId", default)]
    pub account_id: String,
}

impl SessionData {
    /// The session cookies as one `Cookie:` header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub async fn save(&self, path: &Path) -> Result<(), BlackbirdError> {
        tokio::fs::write(path, serde_json::to_vec(self)?).await?;
        debug!("session saved to {}", path.display());
        Ok(())
    }

    /// Loads the cached session; a missing or corrupted file is `None`.
    pub async fn load(path: &Path) -> Option<SessionData> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("session file {} is corrupted: {e}", path.display());
                None
            }
        }
    }
}

/// Names of records already uploaded, stored as `uploaded_records.json`.
/// Upload idempotence is name-based: a record in the set is never
/// uploaded again.
#[derive(Clone, Debug, Default)]
pub struct UploadHistory {
    names: HashSet<String>,
}

impl UploadHistory {
    /// Loads the history; a missing or corrupted file starts empty.
    pub async fn load(path: &Path) -> UploadHistory {
        let names = match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(names) => names,
                Err(e) => {
                    warn!("history file {} is corrupted: {e}", path.display());
                    HashSet::new()
                }
            },
            Err(_) => HashSet::new(),
        };
        UploadHistory { names }
    }

    pub async fn save(&self, path: &Path) -> Result<(), BlackbirdError> {
        tokio::fs::write(path, serde_json::to_vec(&self.names)?).await?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_json_keeps_the_app_field_casing() {
        let session = SessionData {
            ton: "t0k3n".into(),
            user_id: "rider@example.com".into(),
            cookies: HashMap::from([("JSESSIONID".to_string(), "abc".to_string())]),
            account_id: "123456".into(),
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"userId\""));
        assert!(json.contains("\"accountId\""));
        let back: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn session_tolerates_missing_optional_fields() {
        let session: SessionData =
            serde_json::from_str(r#"{"ton": "t", "userId": "u"}"#).unwrap();
        assert_eq!(session.account_id, "");
        assert!(session.cookies.is_empty());
    }

    #[tokio::test]
    async fn history_round_trips_through_disk() {
        let path = std::env::temp_dir().join(format!("bb16-history-{}.json", std::process::id()));
        let mut history = UploadHistory::default();
        assert!(!history.contains("R1.fit"));
        history.insert("R1.fit");
        history.insert("R2.fit");
        history.save(&path).await.unwrap();

        let back = UploadHistory::load(&path).await;
        assert!(back.contains("R1.fit"));
        assert!(back.contains("R2.fit"));
        assert!(!back.contains("R3.fit"));

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn corrupted_history_starts_empty() {
        let path = std::env::temp_dir().join(format!("bb16-corrupt-{}.json", std::process::id()));
        std::fs::write(&path, b"not json").unwrap();
        let history = UploadHistory::load(&path).await;
        assert!(!history.contains("anything"));
        std::fs::remove_file(path).unwrap();
    }
}
