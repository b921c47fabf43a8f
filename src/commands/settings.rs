use crate::sync::sheets::{
    SheetsConfig, DEFAULT_SHEETS_API_BASE, DEFAULT_SHEET_RANGE, DEFAULT_TOKEN_URI,
};
use secrecy::SecretString;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_SCHEMA_VERSION: i64 = 1;

pub const SETTINGS_PATH_ENV: &str = "BETAPORTAL_SETTINGS";
pub const DATA_DIR_ENV: &str = "BETAPORTAL_DATA_DIR";
pub const PORT_ENV: &str = "BETAPORTAL_PORT";
pub const BIND_ENV: &str = "BETAPORTAL_BIND";
pub const SERVICE_ACCOUNT_ENV: &str = "GOOGLE_SERVICE_ACCOUNT";
pub const SHEET_ID_ENV: &str = "GOOGLE_SHEET_ID";

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub bind_address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub storage_backend: StorageBackend,
    pub database_file: String,
    pub sheet_range: String,
    pub mirror_timeout: Duration,
    pub google_token_uri: String,
    pub sheets_api_base: String,
}

impl PortalSettings {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Resolves settings from the settings file and process environment.
pub fn load_portal_settings() -> Result<PortalSettings, String> {
    load_portal_settings_with(|key| std::env::var(key).ok())
}

pub fn load_portal_settings_with<F>(lookup: F) -> Result<PortalSettings, String>
where
    F: Fn(&str) -> Option<String>,
{
    let data_dir = lookup(DATA_DIR_ENV)
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let path = lookup(SETTINGS_PATH_ENV)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| settings_path(&data_dir));

    let mut settings = load_settings_from_disk(&path)?;

    // Environment wins over the file but is never written back.
    merge_settings(&mut settings, &env_overrides(&lookup));
    sanitize_settings(&mut settings);

    Ok(effective_settings(&settings, data_dir))
}

/// Mirror configuration; the credential and sheet id only come from the environment.
pub fn load_sheets_config(settings: &PortalSettings) -> SheetsConfig {
    load_sheets_config_with(settings, |key| std::env::var(key).ok())
}

pub fn load_sheets_config_with<F>(settings: &PortalSettings, lookup: F) -> SheetsConfig
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    SheetsConfig {
        service_account: non_empty(SERVICE_ACCOUNT_ENV).map(SecretString::from),
        sheet_id: non_empty(SHEET_ID_ENV).map(|id| id.trim().to_string()),
        range: settings.sheet_range.clone(),
        token_uri: settings.google_token_uri.clone(),
        api_base: settings.sheets_api_base.clone(),
        timeout: settings.mirror_timeout,
    }
}

pub fn load_settings_from_disk(path: &Path) -> Result<Value, String> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }
    }

    let original = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings.json: {e}"))?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            log::warn!("Ignoring unparseable settings file {}: {e}", path.display());
            json!({})
        })
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(path, &migrated)?;
    }

    Ok(migrated)
}

pub fn effective_settings(settings: &Value, data_dir: PathBuf) -> PortalSettings {
    let text = |key: &str, default: &str| {
        settings
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    let storage_backend = match settings.get("storageBackend").and_then(Value::as_str) {
        Some("memory") => StorageBackend::Memory,
        _ => StorageBackend::Sqlite,
    };

    PortalSettings {
        bind_address: text("bindAddress", "0.0.0.0"),
        port: settings
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .unwrap_or(8888),
        data_dir,
        storage_backend,
        database_file: text("databaseFile", "feedback.db"),
        sheet_range: text("sheetRange", DEFAULT_SHEET_RANGE),
        mirror_timeout: Duration::from_secs(
            settings
                .get("mirrorTimeoutSecs")
                .and_then(Value::as_u64)
                .unwrap_or(10),
        ),
        google_token_uri: text("googleTokenUri", DEFAULT_TOKEN_URI),
        sheets_api_base: text("sheetsApiBase", DEFAULT_SHEETS_API_BASE),
    }
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {e}"))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write settings.json: {e}"))
}

fn env_overrides<F>(lookup: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut overrides = Map::new();

    if let Some(raw) = lookup(PORT_ENV) {
        match raw.trim().parse::<u64>() {
            Ok(port) => {
                overrides.insert("port".to_string(), json!(port));
            }
            Err(e) => log::warn!("Invalid {PORT_ENV} value {raw:?}: {e}"),
        }
    }

    if let Some(bind) = lookup(BIND_ENV).filter(|b| !b.trim().is_empty()) {
        overrides.insert("bindAddress".to_string(), json!(bind.trim()));
    }

    Value::Object(overrides)
}

fn migrate_settings(input: Value) -> Value {
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 1 {
        // Must run before defaults fill in sheetRange.
        migrate_sheet_name_to_range(&mut out);
    }

    deep_merge_defaults(&mut out, &default_settings());
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "bindAddress": "0.0.0.0",
        "port": 8888,
        "storageBackend": "sqlite",
        "databaseFile": "feedback.db",
        "sheetRange": DEFAULT_SHEET_RANGE,
        "mirrorTimeoutSecs": 10,
        "googleTokenUri": DEFAULT_TOKEN_URI,
        "sheetsApiBase": DEFAULT_SHEETS_API_BASE
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

/// Early deployments named only the worksheet (`"sheetName": "Sheet1"`).
fn migrate_sheet_name_to_range(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    let Some(Value::String(sheet)) = obj.remove("sheetName") else {
        return;
    };

    if !obj.contains_key("sheetRange") && !sheet.trim().is_empty() {
        obj.insert("sheetRange".to_string(), json!(format!("{}!A:G", sheet.trim())));
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    // Clamp numerics.
    clamp_u64(obj, "port", 1, u16::MAX as u64, 8888);
    clamp_u64(obj, "mirrorTimeoutSecs", 1, 120, 10);

    // Validate enums.
    sanitize_enum(obj, "storageBackend", &["sqlite", "memory"], "sqlite");

    // Strings must be present and non-blank.
    ensure_text(obj, "bindAddress", "0.0.0.0");
    ensure_text(obj, "databaseFile", "feedback.db");
    ensure_text(obj, "sheetRange", DEFAULT_SHEET_RANGE);
    ensure_text(obj, "googleTokenUri", DEFAULT_TOKEN_URI);
    ensure_text(obj, "sheetsApiBase", DEFAULT_SHEETS_API_BASE);
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn sanitize_enum(map: &mut Map<String, Value>, key: &str, allowed: &[&str], default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| allowed.contains(value))
        .unwrap_or(default);
    map.insert(key.to_string(), json!(valid));
}

fn ensure_text(map: &mut Map<String, Value>, key: &str, default: &str) {
    let value = map
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default);
    map.insert(key.to_string(), json!(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn migrates_legacy_sheet_name_and_stamps_version() {
        let migrated = migrate_settings(json!({ "sheetName": "Beta Feedback" }));

        assert_eq!(migrated["sheetRange"], json!("Beta Feedback!A:G"));
        assert!(migrated.get("sheetName").is_none());
        assert_eq!(migrated["schema_version"], json!(SETTINGS_SCHEMA_VERSION));
        assert_eq!(migrated["port"], json!(8888));
    }

    #[test]
    fn sanitizes_out_of_range_and_unknown_values() {
        let migrated = migrate_settings(json!({
            "schema_version": 1,
            "port": 0,
            "mirrorTimeoutSecs": 9000,
            "storageBackend": "postgres",
            "bindAddress": "   "
        }));

        assert_eq!(migrated["port"], json!(1));
        assert_eq!(migrated["mirrorTimeoutSecs"], json!(120));
        assert_eq!(migrated["storageBackend"], json!("sqlite"));
        assert_eq!(migrated["bindAddress"], json!("0.0.0.0"));
    }

    #[test]
    fn creates_settings_file_with_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let lookup = lookup_from(&[(DATA_DIR_ENV, dir.path().to_str().unwrap())]);

        let settings = load_portal_settings_with(lookup).expect("load settings");

        assert!(dir.path().join("settings.json").exists());
        assert_eq!(settings.port, 8888);
        assert_eq!(settings.storage_backend, StorageBackend::Sqlite);
        assert_eq!(settings.database_path(), dir.path().join("feedback.db"));
        assert_eq!(settings.mirror_timeout, Duration::from_secs(10));
    }

    #[test]
    fn environment_overrides_file_without_rewriting_it() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("custom.json");
        fs::write(&path, r#"{"schema_version":1,"port":7000,"storageBackend":"memory"}"#)
            .expect("write settings");

        let lookup = lookup_from(&[
            (DATA_DIR_ENV, dir.path().to_str().unwrap()),
            (SETTINGS_PATH_ENV, path.to_str().unwrap()),
            (PORT_ENV, "9100"),
            (BIND_ENV, "127.0.0.1"),
        ]);
        let settings = load_portal_settings_with(lookup).expect("load settings");

        assert_eq!(settings.port, 9100);
        assert_eq!(settings.listen_address(), "127.0.0.1:9100");
        assert_eq!(settings.storage_backend, StorageBackend::Memory);

        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read back")).expect("json");
        assert_eq!(on_disk["port"], json!(7000));
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let lookup = lookup_from(&[
            (DATA_DIR_ENV, dir.path().to_str().unwrap()),
            (PORT_ENV, "not-a-port"),
        ]);

        let settings = load_portal_settings_with(lookup).expect("load settings");
        assert_eq!(settings.port, 8888);
    }

    #[test]
    fn blank_secrets_leave_mirror_unconfigured() {
        let settings = effective_settings(&default_settings(), PathBuf::from("data"));

        let config = load_sheets_config_with(&settings, lookup_from(&[
            (SERVICE_ACCOUNT_ENV, "  "),
            (SHEET_ID_ENV, "sheet-123"),
        ]));
        assert!(config.service_account.is_none());
        assert_eq!(config.sheet_id.as_deref(), Some("sheet-123"));
        assert_eq!(config.range, DEFAULT_SHEET_RANGE);
    }
}
