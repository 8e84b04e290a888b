//! Test environment abstraction for isolated testing.
//!
//! Provides `TestPolicy` to build policies fluently and `TestEnvironment` to
//! materialise them as files in a private temporary directory.
//!
//! # Usage
//!
//! ```ignore
//! use mirage_config::testing::{TestEnvironment, TestPolicy};
//!
//! let env = TestEnvironment::new()?;
//! let path = env.write_policy(&TestPolicy::new().flag("UseChangeSpeed").build())?;
//! ```

use crate::{Policy, Setting, SharedPolicy};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Fluent builder over [`Policy`].
#[derive(Debug, Clone, Default)]
pub struct TestPolicy {
    policy: Policy,
}

impl TestPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route subsequent values into box `name`.
    pub fn in_box(mut self, name: &str) -> Self {
        self.policy.active_box = Some(name.to_string());
        self
    }

    pub fn flag(self, key: &str) -> Self {
        self.set(key, Setting::Bool(true))
    }

    pub fn number(self, key: &str, value: i64) -> Self {
        self.set(key, Setting::Number(value))
    }

    pub fn text(self, key: &str, value: &str) -> Self {
        self.set(key, Setting::Text(value.to_string()))
    }

    pub fn list(self, key: &str, values: &[&str]) -> Self {
        self.set(
            key,
            Setting::List(values.iter().map(|v| v.to_string()).collect()),
        )
    }

    pub fn set(mut self, key: &str, value: Setting) -> Self {
        self.policy.set(key, value);
        self
    }

    pub fn build(self) -> Policy {
        self.policy
    }

    pub fn shared(self) -> SharedPolicy {
        SharedPolicy::new(self.policy)
    }
}

/// Isolated test environment with a unique policy directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Project root for the test (holds `.mirage/`)
    pub project_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let project_root = temp_dir.path().join(format!("project-{}", test_id));
        std::fs::create_dir_all(project_root.join(".mirage"))?;

        Ok(Self {
            _temp_dir: temp_dir,
            project_root,
            test_id,
        })
    }

    /// Project-local policy path
    pub fn policy_path(&self) -> PathBuf {
        self.project_root.join(".mirage").join("policy.toml")
    }

    /// Serialize `policy` to the project-local policy path
    pub fn write_policy(&self, policy: &Policy) -> anyhow::Result<PathBuf> {
        let path = self.policy_path();
        std::fs::write(&path, toml::to_string_pretty(policy)?)?;
        Ok(path)
    }

    /// Write raw TOML to the project-local policy path
    pub fn write_policy_toml(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.policy_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Environment variables pointing a layer or CLI at this policy.
    pub fn policy_env(&self) -> Vec<(String, String)> {
        vec![(
            "MIRAGE_POLICY".to_string(),
            self.policy_path().to_string_lossy().into_owned(),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys, PolicyStore};

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.project_root.join(".mirage").exists());
    }

    #[test]
    fn test_environments_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.policy_path(), env2.policy_path());
    }

    #[test]
    fn test_written_policy_reads_back() {
        let env = TestEnvironment::new().unwrap();
        let policy = TestPolicy::new()
            .flag(keys::USE_CHANGE_SPEED)
            .number(keys::ADD_TICK_SPEED, 2)
            .build();
        let path = env.write_policy(&policy).unwrap();
        let loaded = Policy::from_file(&path).unwrap();
        assert!(loaded.query_bool(keys::USE_CHANGE_SPEED, false));
        assert_eq!(loaded.query_number(keys::ADD_TICK_SPEED, 1), 2);
    }

    #[test]
    fn test_policy_env() {
        let env = TestEnvironment::new().unwrap();
        let vars = env.policy_env();
        assert!(vars.iter().any(|(k, _)| k == "MIRAGE_POLICY"));
    }
}
