//! Test plan files
//!
//! A plan is a YAML or JSON file listing groups of command tests plus an
//! optional `settings` block.
//!
//! ```yaml
//! settings:
//!   pool_size: 4
//!   timeout_secs: 60
//! groups:
//!   - name: parser
//!     tests:
//!       - name: lex
//!         program: ./run-lex.sh
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::Settings;
use crate::models::Group;
use crate::runnable::CommandWorkload;

/// Plan file locations (in order of precedence)
const PLAN_LOCATIONS: &[&str] = &[
    "./testsched.yaml",
    "./testsched.yml",
    "./.testsched.yaml",
    "~/.config/testsched/config.yaml",
];

/// One group as written in a plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub tests: Vec<CommandWorkload>,
}

/// Full plan file structure
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

impl TestPlan {
    /// Find a plan in the standard locations
    pub fn find() -> Option<PathBuf> {
        PLAN_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load the plan at `path`, or the first one found in the standard locations
    pub fn locate(path: Option<&Path>) -> Result<(PathBuf, Self)> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::find().with_context(|| {
                format!(
                    "No test plan given and none found in {}",
                    PLAN_LOCATIONS.join(", ")
                )
            })?,
        };
        let plan = Self::load(&path)?;
        Ok((path, plan))
    }

    /// Load and validate a plan file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read test plan: {}", path.display()))?;

        let plan: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML plan: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON plan: {}", path.display()))?
        };

        plan.validate()
            .with_context(|| format!("Invalid test plan: {}", path.display()))?;
        Ok(plan)
    }

    /// Save the plan to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize plan")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize plan")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write test plan: {}", path.display()))?;
        Ok(())
    }

    /// Check group and test structure
    pub fn validate(&self) -> Result<()> {
        let mut group_names = HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                anyhow::bail!("Group names must not be empty");
            }
            if !group_names.insert(group.name.as_str()) {
                anyhow::bail!("Duplicate group '{}'", group.name);
            }
            if group.tests.is_empty() {
                anyhow::bail!("Group '{}' has no tests", group.name);
            }

            let mut test_names = HashSet::new();
            for test in &group.tests {
                if test.name.trim().is_empty() {
                    anyhow::bail!("Group '{}' has a test without a name", group.name);
                }
                if !test_names.insert(test.name.as_str()) {
                    anyhow::bail!("Duplicate test '{}' in group '{}'", test.name, group.name);
                }
                if test.program.trim().is_empty() {
                    anyhow::bail!("Test '{}/{}' has no program", group.name, test.name);
                }
            }
        }
        Ok(())
    }

    pub fn test_count(&self) -> usize {
        self.groups.iter().map(|group| group.tests.len()).sum()
    }

    /// Groups ready to hand to the scheduler
    pub fn into_groups(self) -> Vec<Group<CommandWorkload>> {
        self.groups
            .into_iter()
            .map(|group| Group::new(group.name, group.tests))
            .collect()
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
