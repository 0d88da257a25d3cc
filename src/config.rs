use crate::align::ReviewMode;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

pub const DARK_MODE_KEY: &str = "darkMode";
pub const MODE_KEY: &str = "currentMode";
pub const TOUR_KEY: &str = "tour";
pub const USER_ID_KEY: &str = "userId";

const USER_ID_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("value for {key:?} is {len} bytes; the store accepts at most {limit}")]
    ValueTooLarge {
        key: String,
        len: usize,
        limit: usize,
    },
}

/// Persistence port for [`AppConfig`].
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn remove(&mut self, key: &str);
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub dark_mode: bool,
    pub mode: ReviewMode,
    pub tour_completed: bool,
    pub user_id: Option<String>,
}

impl AppConfig {
    /// Reads settings, falling back to defaults for missing or unreadable
    /// values. A missing or malformed user id is replaced with a fresh one.
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        let read = |key: &str| store.get(key).map(|raw| decode_value(&raw));
        let dark_mode = read(DARK_MODE_KEY).is_some_and(|value| value == "true");
        let mode = match read(MODE_KEY) {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                warn!(error = %err, "ignoring stored review mode");
                ReviewMode::default()
            }),
            None => ReviewMode::default(),
        };
        let tour_completed = read(TOUR_KEY).is_some_and(|value| value == "true");
        let user_id = read(USER_ID_KEY)
            .filter(|value| is_valid_user_id(value))
            .unwrap_or_else(generate_user_id);
        Self {
            dark_mode,
            mode,
            tour_completed,
            user_id: Some(user_id),
        }
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) -> Result<(), ConfigError> {
        store.set(DARK_MODE_KEY, &encode_value(bool_str(self.dark_mode)))?;
        store.set(MODE_KEY, &encode_value(self.mode.as_str()))?;
        store.set(TOUR_KEY, &encode_value(bool_str(self.tour_completed)))?;
        match &self.user_id {
            Some(user_id) => store.set(USER_ID_KEY, &encode_value(user_id))?,
            None => store.remove(USER_ID_KEY),
        }
        Ok(())
    }

    /// Returns the user id, minting one the first time.
    pub fn ensure_user_id(&mut self) -> &str {
        self.user_id.get_or_insert_with(generate_user_id)
    }

    pub fn toggle_dark_mode(&mut self) {
        self.dark_mode = !self.dark_mode;
    }

    pub fn switch_mode(&mut self) {
        self.mode = self.mode.toggled();
    }

    pub fn mark_tour_completed(&mut self) {
        self.tour_completed = true;
    }
}

pub fn generate_user_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(USER_ID_LEN)
        .map(char::from)
        .collect()
}

fn is_valid_user_id(value: &str) -> bool {
    !value.is_empty() && value.len() <= 64 && value.chars().all(|ch| ch.is_ascii_alphanumeric())
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

fn decode_value(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_store_is_empty() {
        let config = AppConfig::load(&MemoryStore::new());
        assert!(!config.dark_mode);
        assert_eq!(config.mode, ReviewMode::Word);
        assert!(!config.tour_completed);
        let user_id = config.user_id.as_deref().unwrap();
        assert_eq!(user_id.len(), USER_ID_LEN);
        assert!(is_valid_user_id(user_id));
    }

    #[test]
    fn stored_user_id_is_kept() {
        let mut store = MemoryStore::new();
        store.set(USER_ID_KEY, "abc123").unwrap();
        let first = AppConfig::load(&store);
        assert_eq!(first.user_id.as_deref(), Some("abc123"));

        let mut fresh = AppConfig::load(&MemoryStore::new());
        let minted = fresh.ensure_user_id().to_string();
        fresh.save(&mut store).unwrap();
        assert_eq!(AppConfig::load(&store).user_id.as_deref(), Some(minted.as_str()));
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let mut config = AppConfig::default();
        config.toggle_dark_mode();
        config.switch_mode();
        config.mark_tour_completed();
        let user_id = config.ensure_user_id().to_string();
        assert_eq!(user_id.len(), USER_ID_LEN);

        let mut store = MemoryStore::new();
        config.save(&mut store).unwrap();
        assert_eq!(store.get(MODE_KEY).as_deref(), Some("sentence"));
        assert_eq!(AppConfig::load(&store), config);
    }

    #[test]
    fn user_id_is_stable_once_minted() {
        let mut config = AppConfig::default();
        let first = config.ensure_user_id().to_string();
        let second = config.ensure_user_id().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn unreadable_values_fall_back() {
        let mut store = MemoryStore::new();
        store.set(MODE_KEY, "paragraph").unwrap();
        store.set(DARK_MODE_KEY, "maybe").unwrap();
        store.set(USER_ID_KEY, "not%20valid").unwrap();
        let config = AppConfig::load(&store);
        assert_eq!(config.mode, ReviewMode::Word);
        assert!(!config.dark_mode);
        let user_id = config.user_id.unwrap();
        assert_ne!(user_id, "not valid");
        assert_eq!(user_id.len(), USER_ID_LEN);
    }
}
