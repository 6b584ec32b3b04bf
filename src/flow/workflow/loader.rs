// SPDX-License-Identifier: MIT

//! Workflow loader - YAML/JSON file loading and parsing
//!
//! Editors export JSON, hand-written definitions are usually YAML. Both
//! parse into the same `WorkflowDefinition`.

use super::types::WorkflowDefinition;
use crate::flow::Result;
use crate::sdk::FlowError;
use std::fs;
use std::path::Path;

/// Loads workflow definitions from YAML or JSON files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a workflow definition from a file; the extension picks the format
    pub fn load_workflow<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut def = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::parse_json(&content)?,
            _ => Self::parse_yaml(&content)?,
        };

        // Files without an id are addressed by their stem
        if def.id.is_none() {
            def.id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string());
        }
        Ok(def)
    }

    /// Load every `*.yaml`, `*.yml` and `*.json` definition in a directory.
    ///
    /// Files that fail to parse are logged and skipped so one broken file
    /// does not hide the rest of the directory.
    pub fn load_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<WorkflowDefinition>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(FlowError::config(format!(
                "Workflows directory not found: {}",
                dir.display()
            )));
        }

        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
            })
            .collect();
        paths.sort();

        let mut defs = Vec::new();
        for path in paths {
            match self.load_workflow(&path) {
                Ok(def) => defs.push(def),
                Err(e) => log::warn!("Skipping workflow file {}: {}", path.display(), e),
            }
        }
        Ok(defs)
    }

    /// Parse a workflow definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition> {
        let def: WorkflowDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }

    /// Parse a workflow definition from a JSON string
    pub fn parse_json(content: &str) -> Result<WorkflowDefinition> {
        let def: WorkflowDefinition = serde_json::from_str(content)?;
        Ok(def)
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::workflow::types::SaveDataPolicy;

    #[test]
    fn test_parse_yaml_workflow() {
        let yaml = r#"
name: Fetch and transform
nodes:
  - id: trigger
    type: trigger
  - id: fetch
    type: http
    data:
      url: https://example.com/items
  - id: transform
    type: set
    data:
      values: { done: true }
connections:
  - { id: e1, source: trigger, target: fetch }
  - { id: e2, source: fetch, target: transform }
settings:
  errorWorkflow: on-failure
  saveDataSuccessExecution: none
"#;
        let def = WorkflowLoader::parse_yaml(yaml).unwrap();
        assert_eq!(def.name, "Fetch and transform");
        assert_eq!(def.nodes.len(), 3);
        assert_eq!(def.connections.len(), 2);
        assert_eq!(def.nodes[1].data["url"], "https://example.com/items");
        assert_eq!(def.settings.error_workflow.as_deref(), Some("on-failure"));
        assert_eq!(
            def.settings.save_data_success_execution,
            SaveDataPolicy::None
        );
    }

    #[test]
    fn test_parse_json_workflow() {
        let json = r#"{
            "id": null,
            "name": "Editor export",
            "nodes": [{"id": "a", "type": "trigger", "position": {"x": 0, "y": 0}, "data": {}}],
            "connections": [],
            "variables": {"greeting": "hi"},
            "settings": {"errorWorkflow": null, "timezone": "Europe/Berlin",
                         "saveDataErrorExecution": "all", "saveDataSuccessExecution": "all"}
        }"#;
        let def = WorkflowLoader::parse_json(json).unwrap();
        assert!(def.id.is_none());
        assert_eq!(def.variables["greeting"], "hi");
        assert_eq!(def.settings.timezone, "Europe/Berlin");
    }

    #[test]
    fn test_invalid_yaml_returns_error() {
        let yaml = r#"
name:
  - invalid structure
"#;
        let result = WorkflowLoader::parse_yaml(yaml);
        assert!(matches!(result, Err(FlowError::Yaml(_))));
    }

    #[test]
    fn test_load_dir_uses_file_stem_as_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("alpha.yaml"), "name: Alpha\n").unwrap();
        fs::write(
            dir.path().join("beta.json"),
            r#"{"id": "beta-explicit", "name": "Beta"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("broken.yaml"), "name: [").unwrap();

        let defs = WorkflowLoader::new().load_dir(dir.path()).unwrap();
        let ids: Vec<_> = defs.iter().filter_map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["alpha", "beta-explicit"]);
    }

    #[test]
    fn test_load_dir_missing() {
        let result = WorkflowLoader::new().load_dir("/definitely/not/here");
        assert!(matches!(result, Err(FlowError::Config(_))));
    }
}
