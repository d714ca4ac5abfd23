//! Reusable workflow templates: parameterized task sets that resolve into
//! concrete tasks.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WorkflowError;
use crate::model::Task;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
}

/// One declared workflow parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to true. A parameter with a `default` value never blocks
    /// resolution regardless of this flag.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Task template. Every string field, including ids and dependency
/// references, may contain `{{parameter}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub agent_id: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

/// A named, parameterized set of task templates, typically loaded from
/// YAML. Graph-level validity (duplicate ids, unknown dependencies,
/// cycles) is not checked here; it surfaces from
/// [`TaskGraph::build`](crate::graph::TaskGraph::build) on the resolved
/// tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    pub tasks: Vec<TaskTemplate>,
}

impl WorkflowDefinition {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, WorkflowError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Materialize concrete tasks. Supplied values override declared
    /// defaults; a required parameter without a value is an error, as is
    /// any placeholder that survives substitution. Supplied parameters the
    /// workflow never declares still substitute but are logged, so typos
    /// surface somewhere.
    pub fn resolve(&self, supplied: &HashMap<String, String>) -> Result<Vec<Task>, WorkflowError> {
        let mut values: HashMap<String, String> = HashMap::new();
        for spec in &self.parameters {
            if let Some(value) = supplied.get(&spec.name) {
                values.insert(spec.name.clone(), value.clone());
            } else if let Some(default) = &spec.default {
                values.insert(spec.name.clone(), default.clone());
            } else if spec.required {
                return Err(WorkflowError::MissingParameter(spec.name.clone()));
            }
        }

        let declared: HashSet<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        for (name, value) in supplied {
            if !declared.contains(name.as_str()) {
                warn!(
                    workflow = %self.name,
                    parameter = %name,
                    "supplied parameter is not declared by the workflow"
                );
                values.insert(name.clone(), value.clone());
            }
        }

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for template in &self.tasks {
            let id = substitute(&template.id, &values, &template.id)?;
            let agent_id = substitute(&template.agent_id, &values, &template.id)?;
            let description = substitute(&template.description, &values, &template.id)?;
            let prompt = substitute(&template.prompt, &values, &template.id)?;

            let mut task =
                Task::new(id, agent_id, description, prompt).with_priority(template.priority);
            for dependency in &template.dependencies {
                task = task.with_dependency(substitute(dependency, &values, &template.id)?);
            }
            tasks.push(task);
        }
        Ok(tasks)
    }
}

/// Replace `{{name}}` occurrences. Verification runs first so the error
/// names the placeholder instead of leaving a partial substitution behind.
/// Parameter values themselves are not re-scanned.
fn substitute(
    text: &str,
    values: &HashMap<String, String>,
    task: &str,
) -> Result<String, WorkflowError> {
    for caps in PLACEHOLDER.captures_iter(text) {
        let name = &caps[1];
        if !values.contains_key(name) {
            return Err(WorkflowError::UnresolvedPlaceholder {
                task: task.to_string(),
                placeholder: name.to_string(),
            });
        }
    }
    let replaced = PLACEHOLDER.replace_all(text, |caps: &regex::Captures<'_>| {
        values.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(replaced.into_owned())
}
