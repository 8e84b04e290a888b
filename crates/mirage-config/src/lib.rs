//! # mirage-config
//!
//! Policy store for the Mirage inception layer.
//!
//! Loads policy from:
//! 1. `~/.mirage/policy.toml` (global)
//! 2. `.mirage/policy.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Settings live in a `[global]` table and in per-box tables under
//! `[boxes.<name>]`. When a box is active its values shadow the global ones.

pub mod keys;
pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

/// Global policy instance
static POLICY: Lazy<RwLock<Policy>> = Lazy::new(|| RwLock::new(Policy::load().unwrap_or_default()));

/// Get global policy (read-only)
pub fn policy() -> RwLockReadGuard<'static, Policy> {
    POLICY.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload policy from disk
pub fn reload() -> Result<(), PolicyError> {
    let new_policy = Policy::load()?;
    *POLICY.write().unwrap_or_else(PoisonError::into_inner) = new_policy;
    Ok(())
}

/// Replace the global policy wholesale (used by hosts that push policy in-process).
pub fn install(policy: Policy) {
    *POLICY.write().unwrap_or_else(PoisonError::into_inner) = policy;
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// Policy Store Client
// ============================================================================

/// Read-only, thread-safe accessor over sandbox settings.
///
/// Every query takes a default so that an unset key never surfaces as an
/// error to the caller.
pub trait PolicyStore: Send + Sync {
    fn query_bool(&self, key: &str, default: bool) -> bool;

    fn query_number(&self, key: &str, default: u32) -> u32;

    /// Returns `None` when the key is unset or its value exceeds `max_len` characters.
    fn query_text(&self, key: &str, max_len: usize) -> Option<String>;

    /// Look up `key` among `name,value` entries, returning the value paired with `name`.
    fn query_named_text(&self, name: &str, key: &str, default: &str) -> String;
}

/// A single setting value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Setting {
    Bool(bool),
    Number(i64),
    Text(String),
    List(Vec<String>),
}

impl Setting {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Setting::Bool(b) => Some(*b),
            Setting::Number(n) => Some(*n != 0),
            Setting::Text(t) => parse_bool(t),
            Setting::List(l) => l.first().and_then(|t| parse_bool(t)),
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            Setting::Bool(b) => Some(u32::from(*b)),
            Setting::Number(n) => u32::try_from(*n).ok(),
            Setting::Text(t) => t.trim().parse().ok(),
            Setting::List(l) => l.first().and_then(|t| t.trim().parse().ok()),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Setting::Bool(b) => Some(if *b { "y" } else { "n" }.to_string()),
            Setting::Number(n) => Some(n.to_string()),
            Setting::Text(t) => Some(t.clone()),
            Setting::List(l) => l.first().cloned(),
        }
    }

    /// All textual entries carried by this setting.
    pub fn entries(&self) -> Vec<&str> {
        match self {
            Setting::Text(t) => vec![t.as_str()],
            Setting::List(l) => l.iter().map(String::as_str).collect(),
            Setting::Bool(_) | Setting::Number(_) => Vec::new(),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    let t = text.trim();
    if ["y", "yes", "true", "1"].iter().any(|v| t.eq_ignore_ascii_case(v)) {
        Some(true)
    } else if ["n", "no", "false", "0"].iter().any(|v| t.eq_ignore_ascii_case(v)) {
        Some(false)
    } else {
        None
    }
}

type SettingTable = BTreeMap<String, Setting>;

/// Insert `value`, dropping any entry whose name differs only in case.
fn replace_setting(table: &mut SettingTable, key: String, value: Setting) {
    table.retain(|k, _| !k.eq_ignore_ascii_case(&key));
    table.insert(key, value);
}

fn merge_table(table: &mut SettingTable, other: SettingTable) {
    for (key, value) in other {
        replace_setting(table, key, value);
    }
}

fn find<'a>(table: &'a SettingTable, key: &str) -> Option<&'a Setting> {
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Main policy structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Box whose table shadows `[global]`
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub active_box: Option<String>,
    /// Settings applying to every box
    pub global: SettingTable,
    /// Per-box settings
    pub boxes: BTreeMap<String, SettingTable>,
}

impl Policy {
    /// Load policy from standard locations
    pub fn load() -> Result<Self, PolicyError> {
        // 0. Explicit policy file replaces the search entirely
        if let Ok(path) = std::env::var("MIRAGE_POLICY") {
            debug!("Loading policy from MIRAGE_POLICY={}", path);
            let mut policy = Self::from_file(Path::new(&path))?;
            policy.apply_env_overrides();
            return Ok(policy);
        }

        let mut policy = Policy::default();

        // 1. Load global policy (~/.mirage/policy.toml)
        if let Some(global_path) = Self::global_policy_path() {
            if global_path.exists() {
                debug!("Loading global policy from {:?}", global_path);
                policy = Self::from_file(&global_path)?;
            }
        }

        // 2. Load project policy (.mirage/policy.toml) - overrides global
        let project_path = Path::new(".mirage/policy.toml");
        if project_path.exists() {
            debug!("Loading project policy from {:?}", project_path);
            let project_policy = Self::from_file(project_path)?;
            policy.merge(project_policy);
        }

        // 3. Apply environment variable overrides
        policy.apply_env_overrides();

        Ok(policy)
    }

    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, PolicyError> {
        Ok(toml::from_str(contents)?)
    }

    /// Global policy path: ~/.mirage/policy.toml
    pub fn global_policy_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".mirage/policy.toml"))
    }

    /// Merge another policy (project overrides, key by key)
    pub fn merge(&mut self, other: Policy) {
        if other.active_box.is_some() {
            self.active_box = other.active_box;
        }
        merge_table(&mut self.global, other.global);
        for (name, table) in other.boxes {
            let existing = self
                .boxes
                .keys()
                .find(|k| k.eq_ignore_ascii_case(&name))
                .cloned();
            let target = match existing {
                Some(key) => self.boxes.entry(key).or_default(),
                None => self.boxes.entry(name).or_default(),
            };
            merge_table(target, table);
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("MIRAGE_BOX") {
            if !name.is_empty() {
                self.active_box = Some(name);
            }
        }
    }

    /// Set a value in the active box (or `[global]` when no box is active).
    pub fn set(&mut self, key: &str, value: Setting) {
        let table = match &self.active_box {
            Some(name) => self.boxes.entry(name.clone()).or_default(),
            None => &mut self.global,
        };
        replace_setting(table, key.to_string(), value);
    }

    /// Resolve a key: active box first, then `[global]`.
    pub fn lookup(&self, key: &str) -> Option<&Setting> {
        self.active_box
            .as_ref()
            .and_then(|name| {
                self.boxes
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, t)| t)
            })
            .and_then(|table| find(table, key))
            .or_else(|| find(&self.global, key))
    }

    /// Generate a commented policy template
    pub fn default_toml() -> String {
        format!(
            r#"# Mirage policy
# box = "DefaultBox"

[global]
# {flags} = "--disable-gpu"
{power} = false
{speed} = false
{add_tick} = 1
{low_tick} = 1
{add_sleep} = 1
{low_sleep} = 1
# 1033 = en-US
{lcid} = 0
{hide} = false
# {serial} = ["\\Device\\HarddiskVolume3,AAAA-BBBB"]

[boxes]
"#,
            flags = keys::CUSTOM_CHROMIUM_FLAGS,
            power = keys::BLOCK_INTERFERE_POWER,
            speed = keys::USE_CHANGE_SPEED,
            add_tick = keys::ADD_TICK_SPEED,
            low_tick = keys::LOW_TICK_SPEED,
            add_sleep = keys::ADD_SLEEP_SPEED,
            low_sleep = keys::LOW_SLEEP_SPEED,
            lcid = keys::CUSTOM_LCID,
            hide = keys::HIDE_DISK_SERIAL_NUMBER,
            serial = keys::DISK_SERIAL_NUMBER,
        )
    }
}

impl PolicyStore for Policy {
    fn query_bool(&self, key: &str, default: bool) -> bool {
        self.lookup(key)
            .and_then(Setting::as_bool)
            .unwrap_or(default)
    }

    fn query_number(&self, key: &str, default: u32) -> u32 {
        self.lookup(key)
            .and_then(Setting::as_number)
            .unwrap_or(default)
    }

    fn query_text(&self, key: &str, max_len: usize) -> Option<String> {
        self.lookup(key)
            .and_then(Setting::as_text)
            .filter(|text| text.chars().count() <= max_len)
    }

    fn query_named_text(&self, name: &str, key: &str, default: &str) -> String {
        let Some(setting) = self.lookup(key) else {
            return default.to_string();
        };

        let mut generic = None;
        for entry in setting.entries() {
            match entry.split_once(',') {
                Some((entry_name, value)) if entry_name.trim().eq_ignore_ascii_case(name) => {
                    return value.trim().to_string();
                }
                Some(_) => {}
                None => {
                    if generic.is_none() {
                        generic = Some(entry.trim());
                    }
                }
            }
        }
        generic.unwrap_or(default).to_string()
    }
}

/// The process-global policy, as a store.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalPolicy;

impl PolicyStore for GlobalPolicy {
    fn query_bool(&self, key: &str, default: bool) -> bool {
        policy().query_bool(key, default)
    }

    fn query_number(&self, key: &str, default: u32) -> u32 {
        policy().query_number(key, default)
    }

    fn query_text(&self, key: &str, max_len: usize) -> Option<String> {
        policy().query_text(key, max_len)
    }

    fn query_named_text(&self, name: &str, key: &str, default: &str) -> String {
        policy().query_named_text(name, key, default)
    }
}

/// A policy shared between a host and the layer; writes are visible to the
/// next query.
#[derive(Debug, Clone, Default)]
pub struct SharedPolicy {
    inner: Arc<RwLock<Policy>>,
}

impl SharedPolicy {
    pub fn new(policy: Policy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    pub fn set(&self, key: &str, value: Setting) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value);
    }

    pub fn replace(&self, policy: Policy) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn snapshot(&self) -> Policy {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Policy> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PolicyStore for SharedPolicy {
    fn query_bool(&self, key: &str, default: bool) -> bool {
        self.read().query_bool(key, default)
    }

    fn query_number(&self, key: &str, default: u32) -> u32 {
        self.read().query_number(key, default)
    }

    fn query_text(&self, key: &str, max_len: usize) -> Option<String> {
        self.read().query_text(key, max_len)
    }

    fn query_named_text(&self, name: &str, key: &str, default: &str) -> String {
        self.read().query_named_text(name, key, default)
    }
}

impl<T: PolicyStore + ?Sized> PolicyStore for Arc<T> {
    fn query_bool(&self, key: &str, default: bool) -> bool {
        (**self).query_bool(key, default)
    }

    fn query_number(&self, key: &str, default: u32) -> u32 {
        (**self).query_number(key, default)
    }

    fn query_text(&self, key: &str, max_len: usize) -> Option<String> {
        (**self).query_text(key, max_len)
    }

    fn query_named_text(&self, name: &str, key: &str, default: &str) -> String {
        (**self).query_named_text(name, key, default)
    }
}
