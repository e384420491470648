// marksync Settings Engine
// Manages sync settings: loading, saving, updating individual values, environment
// overrides and validation. Settings are stored as a JSON file at the
// platform-specific config path.

use std::fs;
use std::path::Path;

use crate::platform;
use crate::types::errors::SettingsError;
use crate::types::settings::SyncSettings;

/// Environment variable overriding `app_secret`.
pub const ENV_APP_SECRET: &str = "MARKSYNC_APP_SECRET";
/// Environment variable overriding `remote.base_url`.
pub const ENV_REMOTE_URL: &str = "MARKSYNC_REMOTE_URL";
/// Environment variable overriding `remote.api_key`.
pub const ENV_REMOTE_KEY: &str = "MARKSYNC_REMOTE_KEY";

/// Trait defining the settings engine interface.
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<SyncSettings, SettingsError>;
    fn save(&self) -> Result<(), SettingsError>;
    fn get_settings(&self) -> &SyncSettings;
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError>;
    fn reset(&mut self) -> Result<(), SettingsError>;
    fn get_config_path(&self) -> &str;
}

/// Values injected from the environment.
#[derive(Debug, Clone, Default)]
struct Overrides {
    app_secret: Option<String>,
    remote_url: Option<String>,
    remote_key: Option<String>,
}

/// Settings engine implementation that persists settings as JSON on disk.
///
/// `stored` mirrors the file; `settings` is `stored` with overrides applied.
pub struct SettingsEngine {
    config_path: String,
    stored: SyncSettings,
    overrides: Overrides,
    settings: SyncSettings,
}

impl SettingsEngine {
    /// Creates a new SettingsEngine.
    ///
    /// If `path_override` is `Some`, uses that path for the config file.
    /// Otherwise, uses the platform-specific config directory with `settings.json`.
    pub fn new(path_override: Option<String>) -> Self {
        let config_path = match path_override {
            Some(p) => p,
            None => platform::get_config_dir()
                .join("settings.json")
                .to_string_lossy()
                .to_string(),
        };

        Self {
            config_path,
            stored: SyncSettings::default(),
            overrides: Overrides::default(),
            settings: SyncSettings::default(),
        }
    }

    fn set_stored(&mut self, stored: SyncSettings) {
        let mut effective = stored.clone();
        if let Some(secret) = &self.overrides.app_secret {
            effective.app_secret = secret.clone();
        }
        if let Some(url) = &self.overrides.remote_url {
            effective.remote.base_url = url.clone();
        }
        if let Some(key) = &self.overrides.remote_key {
            effective.remote.api_key = key.clone();
        }
        self.stored = stored;
        self.settings = effective;
    }

    /// Applies `MARKSYNC_*` environment overrides on top of the loaded settings.
    ///
    /// Secrets are usually injected at build or launch time rather than kept
    /// in the settings file. Overrides survive `load`, `set_value` and `reset`
    /// and are never written back to disk.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_APP_SECRET) {
            self.overrides.app_secret = Some(secret);
        }
        if let Some(url) = lookup(ENV_REMOTE_URL) {
            self.overrides.remote_url = Some(url);
        }
        if let Some(key) = lookup(ENV_REMOTE_KEY) {
            self.overrides.remote_key = Some(key);
        }
        let stored = self.stored.clone();
        self.set_stored(stored);
    }

    /// Checks that the settings can drive a sync engine.
    pub fn validate(settings: &SyncSettings) -> Result<(), SettingsError> {
        if settings.app_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "app_secret must not be empty".to_string(),
            ));
        }
        if settings.change_threshold == 0 {
            return Err(SettingsError::InvalidValue(
                "change_threshold must be at least 1".to_string(),
            ));
        }
        let intervals = [
            ("heartbeat_interval_ms", settings.heartbeat_interval_ms),
            ("debounce_delay_ms", settings.debounce_delay_ms),
            ("offline_check_interval_ms", settings.offline_check_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl SettingsEngineTrait for SettingsEngine {
    /// Loads settings from the JSON config file.
    ///
    /// If the file does not exist, returns default settings.
    /// If the file exists but is malformed, returns a serialization error.
    fn load(&mut self) -> Result<SyncSettings, SettingsError> {
        let path = Path::new(&self.config_path);

        if !path.exists() {
            self.set_stored(SyncSettings::default());
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(format!("Failed to read config file: {}", e)))?;

        let settings: SyncSettings = serde_json::from_str(&content).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to parse config file: {}", e))
        })?;

        self.set_stored(settings);
        Ok(self.settings.clone())
    }

    /// Saves the stored settings (without overrides) to the JSON config file.
    ///
    /// Creates parent directories if they don't exist.
    fn save(&self) -> Result<(), SettingsError> {
        let path = Path::new(&self.config_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SettingsError::IoError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(&self.stored).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;

        fs::write(path, json)
            .map_err(|e| SettingsError::IoError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn get_settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Updates an individual setting by dot-notation key path, e.g.
    /// `"debounce_delay_ms"` or `"remote.base_url"`, then saves to disk.
    ///
    /// The new value is validated by deserializing the whole settings tree.
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError> {
        if key.is_empty() {
            return Err(SettingsError::InvalidKey("Key cannot be empty".to_string()));
        }

        let parts: Vec<&str> = key.split('.').collect();

        let mut json_value = serde_json::to_value(&self.stored).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;

        {
            let mut current = &mut json_value;
            for (i, part) in parts.iter().enumerate() {
                if i == parts.len() - 1 {
                    match current {
                        serde_json::Value::Object(map) => {
                            if !map.contains_key(*part) {
                                return Err(SettingsError::InvalidKey(format!(
                                    "Key '{}' not found in settings",
                                    key
                                )));
                            }
                            map.insert(part.to_string(), value.clone());
                        }
                        _ => {
                            return Err(SettingsError::InvalidKey(format!(
                                "Cannot navigate to key '{}': intermediate value is not an object",
                                key
                            )));
                        }
                    }
                } else {
                    current = match current.get_mut(*part) {
                        Some(v) => v,
                        None => {
                            return Err(SettingsError::InvalidKey(format!(
                                "Key '{}' not found in settings",
                                key
                            )));
                        }
                    };
                }
            }
        }

        let new_settings: SyncSettings = serde_json::from_value(json_value).map_err(|e| {
            SettingsError::InvalidValue(format!("Invalid value for key '{}': {}", key, e))
        })?;

        self.set_stored(new_settings);
        self.save()?;

        Ok(())
    }

    /// Resets all settings to defaults and saves to disk. Overrides stay applied.
    fn reset(&mut self) -> Result<(), SettingsError> {
        self.set_stored(SyncSettings::default());
        self.save()?;
        Ok(())
    }

    fn get_config_path(&self) -> &str {
        &self.config_path
    }
}
