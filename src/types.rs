use std::env;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::store::{AuditLog, ConfigStore, KnowledgeStore};

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Coerce a JSON value into a non-empty trimmed string. Numbers are accepted
/// because the provider sends phone numbers both quoted and unquoted.
pub fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatingHours {
    #[serde(default = "default_hours_start")]
    pub start: String,
    #[serde(default = "default_hours_end")]
    pub end: String,
}

fn default_hours_start() -> String {
    "08:30".to_string()
}

fn default_hours_end() -> String {
    "18:30".to_string()
}

impl Default for OperatingHours {
    fn default() -> Self {
        OperatingHours {
            start: default_hours_start(),
            end: default_hours_end(),
        }
    }
}

impl OperatingHours {
    /// Wall-clock containment check. `HH:MM` strings compare lexicographically,
    /// no timezone normalization.
    pub fn contains(&self, hhmm: &str) -> bool {
        self.start.as_str() <= hhmm && hhmm <= self.end.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub operating_hours: OperatingHours,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            enabled: false,
            operating_hours: OperatingHours::default(),
        }
    }
}

impl RelayConfig {
    /// Permissive merge: a field present with the expected type overwrites the
    /// stored value; absent or wrong-typed fields are ignored, not rejected.
    pub fn apply_patch(&mut self, patch: &Value) {
        if let Some(enabled) = patch.get("enabled").and_then(Value::as_bool) {
            self.enabled = enabled;
        }
        if let Some(hours) = patch.get("operating_hours").and_then(Value::as_object) {
            if let Some(start) = hours.get("start").and_then(Value::as_str) {
                self.operating_hours.start = start.to_string();
            }
            if let Some(end) = hours.get("end").and_then(Value::as_str) {
                self.operating_hours.end = end.to_string();
            }
        }
    }
}

/// Identity of the most recently received inbound message. Overwritten
/// wholesale on each identified webhook; fields absent from the payload become
/// null rather than retaining a stale previous value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastChat {
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    pub celular: String,
    pub chat_id: Option<String>,
    pub nome: Option<String>,
    pub phone_id: Option<String>,
    pub origem: Option<String>,
    pub texto_mensagem: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Counters {
    pub received_webhooks: u64,
    pub sent_messages: u64,
    pub send_errors: u64,
    pub last_error: Option<Value>,
    pub started_at: String,
}

impl Counters {
    pub fn new() -> Self {
        Counters {
            received_webhooks: 0,
            sent_messages: 0,
            send_errors: 0,
            last_error: None,
            started_at: now_iso(),
        }
    }
}

/// Process-lifetime state. In-memory only, reset on restart.
pub struct RuntimeState {
    pub counters: Counters,
    pub last_chat: Option<LastChat>,
}

impl RuntimeState {
    pub fn new() -> Self {
        RuntimeState {
            counters: Counters::new(),
            last_chat: None,
        }
    }
}

/// External provider credentials, all required before any outbound send.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub account_id: Option<String>,
    pub phone_id: Option<String>,
}

impl ProviderCredentials {
    pub fn from_env() -> Self {
        ProviderCredentials {
            endpoint: non_empty_env("CHATGURU_API_ENDPOINT"),
            api_key: non_empty_env("CHATGURU_API_KEY"),
            account_id: non_empty_env("CHATGURU_ACCOUNT_ID"),
            phone_id: non_empty_env("CHATGURU_PHONE_ID"),
        }
    }

    /// Names of every unset credential, so operators see the full list rather
    /// than one at a time.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.endpoint.is_none() {
            missing.push("CHATGURU_API_ENDPOINT");
        }
        if self.api_key.is_none() {
            missing.push("CHATGURU_API_KEY");
        }
        if self.account_id.is_none() {
            missing.push("CHATGURU_ACCOUNT_ID");
        }
        if self.phone_id.is_none() {
            missing.push("CHATGURU_PHONE_ID");
        }
        missing
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdminCredentials {
    /// Static shared secret for machine callers (`x-rt-admin-token`).
    pub token: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// HMAC key for session cookies.
    pub session_secret: String,
}

impl AdminCredentials {
    pub fn from_env() -> Self {
        let session_secret = non_empty_env("SESSION_SECRET").unwrap_or_else(|| {
            // Random per-process key: sessions simply do not survive a restart.
            format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            )
        });
        AdminCredentials {
            token: non_empty_env("RT_ADMIN_TOKEN"),
            user: non_empty_env("ADMIN_USER"),
            pass: non_empty_env("ADMIN_PASS"),
            session_secret,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

pub fn resolve_data_dir() -> PathBuf {
    non_empty_env("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"))
}

pub struct AppState {
    pub provider: ProviderCredentials,
    pub admin: AdminCredentials,
    pub commit: Option<String>,
    pub config: ConfigStore,
    pub knowledge: KnowledgeStore,
    pub audit: AuditLog,
    pub runtime: Mutex<RuntimeState>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        provider: ProviderCredentials,
        admin: AdminCredentials,
        config: ConfigStore,
        knowledge: KnowledgeStore,
        audit: AuditLog,
    ) -> Self {
        AppState {
            provider,
            admin,
            commit: non_empty_env("RENDER_GIT_COMMIT").or_else(|| non_empty_env("COMMIT_SHA")),
            config,
            knowledge,
            audit,
            runtime: Mutex::new(RuntimeState::new()),
            http_client: reqwest::Client::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults() {
        let config = RelayConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.operating_hours.start, "08:30");
        assert_eq!(config.operating_hours.end, "18:30");
    }

    #[test]
    fn patch_overwrites_recognized_fields() {
        let mut config = RelayConfig::default();
        config.apply_patch(&json!({
            "enabled": true,
            "operating_hours": { "start": "09:00", "end": "17:00" }
        }));
        assert!(config.enabled);
        assert_eq!(config.operating_hours.start, "09:00");
        assert_eq!(config.operating_hours.end, "17:00");
    }

    #[test]
    fn patch_ignores_wrong_typed_and_unknown_fields() {
        let mut config = RelayConfig::default();
        config.apply_patch(&json!({
            "enabled": "yes",
            "operating_hours": { "start": 930 },
            "unknown": true
        }));
        assert!(!config.enabled);
        assert_eq!(config.operating_hours.start, "08:30");
    }

    #[test]
    fn partial_patch_merges_onto_prior_snapshot() {
        let mut config = RelayConfig::default();
        config.apply_patch(&json!({ "enabled": true }));
        config.apply_patch(&json!({ "operating_hours": { "end": "20:00" } }));
        assert!(config.enabled);
        assert_eq!(config.operating_hours.start, "08:30");
        assert_eq!(config.operating_hours.end, "20:00");
    }

    #[test]
    fn operating_hours_lexicographic_window() {
        let hours = OperatingHours {
            start: "08:30".to_string(),
            end: "18:30".to_string(),
        };
        assert!(hours.contains("08:30"));
        assert!(hours.contains("12:00"));
        assert!(hours.contains("18:30"));
        assert!(!hours.contains("07:59"));
        assert!(!hours.contains("19:00"));
    }

    #[test]
    fn coerce_string_accepts_numbers_and_trims() {
        assert_eq!(
            coerce_string(Some(&json!("  5511999999999  "))),
            Some("5511999999999".to_string())
        );
        assert_eq!(
            coerce_string(Some(&json!(5511999999999u64))),
            Some("5511999999999".to_string())
        );
        assert_eq!(coerce_string(Some(&json!(""))), None);
        assert_eq!(coerce_string(Some(&json!(null))), None);
        assert_eq!(coerce_string(None), None);
    }

    #[test]
    fn missing_credentials_lists_every_unset_name() {
        let creds = ProviderCredentials {
            endpoint: Some("https://api.example".to_string()),
            api_key: None,
            account_id: None,
            phone_id: Some("p1".to_string()),
        };
        assert_eq!(
            creds.missing(),
            vec!["CHATGURU_API_KEY", "CHATGURU_ACCOUNT_ID"]
        );
        assert!(ProviderCredentials::default().missing().len() == 4);
    }

    #[test]
    fn last_chat_serializes_updated_at_camel() {
        let chat = LastChat {
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            celular: "5511999999999".to_string(),
            chat_id: None,
            nome: Some("Ana".to_string()),
            phone_id: None,
            origem: None,
            texto_mensagem: Some("oi".to_string()),
        };
        let value = serde_json::to_value(&chat).unwrap();
        assert_eq!(value["updatedAt"], "2026-01-01T00:00:00Z");
        assert_eq!(value["celular"], "5511999999999");
        assert_eq!(value["chat_id"], Value::Null);
    }
}
