use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_llm::{BackendConfig, DEFAULT_OPENAI_MODEL, ECHO_PROVIDER_ID};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::orchestrator::{
    DEFAULT_FALLBACK_REPLY, DEFAULT_MAX_CONCURRENT_REPLIES, DEFAULT_REPLY_TIMEOUT, ReplyPolicy,
    saturating_millis,
};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "parley.db";
pub const ENV_PREFIX: &str = "PARLEY_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: None,
        }
    }
}

impl ProviderSettings {
    /// Backend settings, or `None` when a remote provider has no API key.
    pub fn to_backend_config(&self) -> Option<BackendConfig> {
        let offline = self.provider_id.trim() == ECHO_PROVIDER_ID;
        if !offline && self.api_key.trim().is_empty() {
            return None;
        }

        let config = BackendConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            &self.model,
        );
        Some(match self.max_tokens {
            Some(max_tokens) => config.with_max_tokens(max_tokens),
            None => config,
        })
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(self.endpoint, default_endpoint);
        self.model = non_blank_or(self.model, default_model);
        self.max_tokens = self.max_tokens.filter(|value| *value > 0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
    #[serde(default)]
    pub history_window: Option<usize>,
    #[serde(default = "default_max_concurrent_replies")]
    pub max_concurrent_replies: usize,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            fallback_text: default_fallback_text(),
            history_window: None,
            max_concurrent_replies: default_max_concurrent_replies(),
        }
    }
}

impl ReplySettings {
    pub fn normalized(mut self) -> Self {
        if self.timeout_ms == 0 {
            self.timeout_ms = default_timeout_ms();
        }
        self.fallback_text = non_blank_or(self.fallback_text, default_fallback_text);
        self.max_concurrent_replies = self.max_concurrent_replies.max(1);
        self
    }

    pub fn to_policy(&self) -> ReplyPolicy {
        ReplyPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            fallback_text: self.fallback_text.clone(),
            history_window: self.history_window,
            max_concurrent_replies: self.max_concurrent_replies.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParleySettings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub reply: ReplySettings,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            reply: ReplySettings::default(),
            database_path: default_database_path(),
        }
    }
}

impl ParleySettings {
    pub fn normalized(mut self) -> Self {
        self.provider = self.provider.normalized();
        self.reply = self.reply.normalized();
        if self.database_path.as_os_str().is_empty() {
            self.database_path = default_database_path();
        }
        self
    }

    pub fn to_backend_config(&self) -> Option<BackendConfig> {
        self.provider.to_backend_config()
    }

    pub fn reply_policy(&self) -> ReplyPolicy {
        self.reply.to_policy()
    }
}

/// Settings file plus `PARLEY_*` environment overrides, swapped atomically on
/// update.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ParleySettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ParleySettings> {
        self.settings.load_full()
    }

    /// Edits the settings file and reloads.
    ///
    /// `edit` sees only defaults plus the file, so values supplied through
    /// `PARLEY_*` variables are never written to disk.
    pub fn update(&self, edit: impl FnOnce(&mut ParleySettings)) -> Result<(), SettingsError> {
        let mut file_settings = Self::extract(Self::file_layers(&self.config_path), &self.config_path);
        edit(&mut file_settings);
        self.persist(&file_settings.normalized())?;
        self.settings
            .store(Arc::new(Self::load_from_disk(&self.config_path)));
        Ok(())
    }

    /// Writes a settings file with the defaults when none exists yet, so there
    /// is something to fill an API key into. Returns whether a file was written.
    pub fn ensure_file(&self) -> Result<bool, SettingsError> {
        if self.config_path.exists() {
            return Ok(false);
        }
        self.update(|_| {})?;
        Ok(true)
    }

    fn load_from_disk(path: &Path) -> ParleySettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        let figment = Self::file_layers(path).merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment, path)
    }

    fn file_layers(path: &Path) -> Figment {
        let figment = Figment::from(Serialized::defaults(ParleySettings::default()));
        if path.exists() {
            figment.merge(Json::file(path))
        } else {
            figment
        }
    }

    fn extract(figment: Figment, path: &Path) -> ParleySettings {
        match figment.extract::<ParleySettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ParleySettings::default()
            }
        }
    }

    fn persist(&self, settings: &ParleySettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: String, default: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default()
    } else {
        trimmed.to_string()
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_timeout_ms() -> u64 {
    saturating_millis(DEFAULT_REPLY_TIMEOUT)
}

fn default_fallback_text() -> String {
    DEFAULT_FALLBACK_REPLY.to_string()
}

fn default_max_concurrent_replies() -> usize {
    DEFAULT_MAX_CONCURRENT_REPLIES
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME).join(DATABASE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(".parley").join(DATABASE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "parley-settings-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn normalization_restores_blank_fields() {
        let settings = ParleySettings {
            provider: ProviderSettings {
                provider_id: "  ".to_string(),
                api_key: "  sk-test ".to_string(),
                endpoint: String::new(),
                model: " ".to_string(),
                max_tokens: Some(0),
            },
            reply: ReplySettings {
                timeout_ms: 0,
                fallback_text: "   ".to_string(),
                history_window: Some(6),
                max_concurrent_replies: 0,
            },
            database_path: PathBuf::new(),
        }
        .normalized();

        assert_eq!(settings.provider.provider_id, DEFAULT_PROVIDER_ID);
        assert_eq!(settings.provider.api_key, "sk-test");
        assert_eq!(settings.provider.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.provider.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(settings.provider.max_tokens, None);
        assert_eq!(settings.reply.fallback_text, DEFAULT_FALLBACK_REPLY);
        assert_eq!(settings.reply.max_concurrent_replies, 1);
        assert_eq!(settings.reply.history_window, Some(6));
        assert_eq!(settings.database_path, default_database_path());

        let policy = settings.reply_policy();
        assert_eq!(policy.timeout, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(policy.history_window, Some(6));
    }

    #[test]
    fn backend_config_requires_key_except_for_echo() {
        let mut provider = ProviderSettings::default();
        assert!(provider.to_backend_config().is_none());

        provider.provider_id = ECHO_PROVIDER_ID.to_string();
        let config = provider.to_backend_config().expect("echo needs no key");
        assert_eq!(config.provider_id, ECHO_PROVIDER_ID);

        provider.provider_id = DEFAULT_PROVIDER_ID.to_string();
        provider.api_key = "sk-test".to_string();
        provider.max_tokens = Some(256);
        let config = provider.to_backend_config().expect("keyed provider");
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.max_tokens, Some(256));
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = scratch_dir("partial");
        std::fs::create_dir_all(&dir).expect("scratch dir");
        let path = dir.join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "reply": { "fallback_text": "brb", "history_window": 10 } }"#,
        )
        .expect("write settings");

        let store = SettingsStore::new(path);
        let settings = store.settings();

        assert_eq!(settings.reply.fallback_text, "brb");
        assert_eq!(settings.reply.history_window, Some(10));
        assert_eq!(settings.reply.timeout_ms, default_timeout_ms());
        assert_eq!(settings.provider.model, DEFAULT_OPENAI_MODEL);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = scratch_dir("malformed");
        std::fs::create_dir_all(&dir).expect("scratch dir");
        let path = dir.join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write settings");

        let store = SettingsStore::new(path);
        assert_eq!(store.settings().reply, ReplySettings::default());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn update_persists_and_reloads() {
        // Jailed so a concurrent environment override cannot leak in.
        figment::Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join(SETTINGS_FILE_NAME);
            let store = SettingsStore::new(path.clone());

            assert!(store.ensure_file().expect("template written"));
            assert!(!store.ensure_file().expect("template kept"));

            store
                .update(|settings| {
                    settings.provider.api_key = " sk-live ".to_string();
                    settings.reply.timeout_ms = 1_500;
                })
                .expect("update settings");

            assert_eq!(store.settings().provider.api_key, "sk-live");
            assert!(!path.with_extension("json.tmp").exists());

            let reloaded = SettingsStore::new(path);
            assert_eq!(reloaded.settings().provider.api_key, "sk-live");
            assert_eq!(
                reloaded.settings().reply_policy().timeout,
                Duration::from_millis(1_500)
            );
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_stay_out_of_the_file() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("PARLEY_PROVIDER__API_KEY", "sk-from-env");
            let path = jail.directory().join(SETTINGS_FILE_NAME);
            let store = SettingsStore::new(path.clone());
            assert_eq!(store.settings().provider.api_key, "sk-from-env");

            store
                .update(|settings| settings.reply.fallback_text = "brb".to_string())
                .expect("update settings");

            let written = std::fs::read_to_string(&path).expect("settings file");
            assert!(!written.contains("sk-from-env"));
            assert!(written.contains("brb"));
            assert_eq!(store.settings().provider.api_key, "sk-from-env");
            assert_eq!(store.settings().reply.fallback_text, "brb");
            Ok(())
        });
    }
}
