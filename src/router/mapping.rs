//! Default model per task category and operating mode.

use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::pool::{Mode, ModelDescriptor, ModelPool};

/// `table[task][mode] -> model name`, as written in configuration.
pub type MappingTable = BTreeMap<String, BTreeMap<Mode, String>>;

/// Validated default mapping.
///
/// Every entry is known to reference an enabled pool model of the same mode.
#[derive(Debug, Clone, Default)]
pub struct DefaultMapping {
    table: MappingTable,
}

impl DefaultMapping {
    /// Validate `table` against `pool`, reporting every bad entry at once.
    pub fn new(table: MappingTable, pool: &ModelPool) -> Result<Self, ConfigError> {
        let problems = violations(&table, pool.models());
        if !problems.is_empty() {
            return Err(ConfigError::Validation { problems });
        }
        for (task, modes) in &table {
            for (mode, name) in modes {
                tracing::debug!(task = %task, mode = %mode, model = %name, "Mapped default model");
            }
        }
        Ok(Self { table })
    }

    /// Default model name for `task` in `mode`, if one is configured.
    pub fn get(&self, task: &str, mode: Mode) -> Option<&str> {
        self.table
            .get(task)
            .and_then(|modes| modes.get(&mode))
            .map(String::as_str)
    }

    /// Iterate `(task, mode, model name)` entries in task order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Mode, &str)> {
        self.table.iter().flat_map(|(task, modes)| {
            modes
                .iter()
                .map(move |(mode, name)| (task.as_str(), *mode, name.as_str()))
        })
    }

    pub(crate) fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One problem line per mapping entry that references a missing, disabled,
/// or wrong-mode model.
pub(crate) fn violations(table: &MappingTable, models: &[ModelDescriptor]) -> Vec<String> {
    let mut problems = Vec::new();

    for (task, modes) in table {
        for (mode, name) in modes {
            let Some(model) = models.iter().find(|m| &m.name == name) else {
                problems.push(format!(
                    "Default model '{}' for task '{}' in mode '{}' does not exist in the pool",
                    name, task, mode
                ));
                continue;
            };

            let mut issues = Vec::new();
            if !model.enabled {
                issues.push("is disabled".to_string());
            }
            if model.mode != *mode {
                issues.push(format!("has mode '{}'", model.mode));
            }
            if !issues.is_empty() {
                problems.push(format!(
                    "Default model '{}' for task '{}' in mode '{}' {}",
                    name,
                    task,
                    mode,
                    issues.join(" and ")
                ));
            }
        }
    }

    problems
}
