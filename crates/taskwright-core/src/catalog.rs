//! Tool Catalog: the canonical server/action definitions loaded once at
//! startup, with alias resolution and prompt rendering.
//!
//! Reload requires a process restart — once built, a `Catalog` is immutable
//! and shared read-only across every Session.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::types::{ParameterDef, TaskType, ToolDefinition};

/// On-disk shape of the catalog document (§6.4). TOML, same format family
/// as the rest of the configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub servers: Vec<ServerDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDocument {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub actions: Vec<ActionDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDocument {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub default_action: Option<String>,
    /// Restricts this action's visibility in `render_for_prompt`; empty means
    /// visible for every task type.
    #[serde(default)]
    pub task_types: Vec<TaskType>,
}

struct ServerEntry {
    canonical: String,
    actions: HashMap<String, ToolDefinition>,
}

/// The process-wide, immutable-after-load tool catalog (C8).
pub struct Catalog {
    servers: HashMap<String, ServerEntry>,
    server_aliases: HashMap<String, String>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let doc: CatalogDocument = toml::from_str(&content)
            .map_err(|e| OrchestratorError::config(format!("invalid catalog toml: {}", e)))?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: CatalogDocument) -> Result<Self> {
        let mut servers = HashMap::new();
        let mut server_aliases = HashMap::new();

        for server_doc in doc.servers {
            let canonical = server_doc.name.clone();
            if servers.contains_key(&canonical) {
                return Err(OrchestratorError::catalog_invalid(format!(
                    "duplicate server name: {}",
                    canonical
                )));
            }

            let mut actions = HashMap::new();
            let mut action_aliases: HashMap<String, String> = HashMap::new();
            for action_doc in &server_doc.actions {
                let mut seen_params = std::collections::HashSet::new();
                for p in &action_doc.parameters {
                    if !seen_params.insert(p.name.clone()) {
                        return Err(OrchestratorError::catalog_invalid(format!(
                            "duplicate parameter name {} on {}.{}",
                            p.name, canonical, action_doc.name
                        )));
                    }
                }

                let def = ToolDefinition {
                    server_name: canonical.clone(),
                    action_name: action_doc.name.clone(),
                    description: action_doc.description.clone(),
                    parameters: action_doc.parameters.clone(),
                    aliases: action_doc.aliases.clone(),
                    default_action: action_doc.default_action.clone(),
                    task_types: action_doc.task_types.clone(),
                };

                if actions.insert(action_doc.name.clone(), def).is_some() {
                    return Err(OrchestratorError::catalog_invalid(format!(
                        "duplicate action name {} on server {}",
                        action_doc.name, canonical
                    )));
                }
                for alias in &action_doc.aliases {
                    if action_aliases
                        .insert(alias.clone(), action_doc.name.clone())
                        .is_some()
                    {
                        return Err(OrchestratorError::catalog_invalid(format!(
                            "action alias {} resolves ambiguously on server {}",
                            alias, canonical
                        )));
                    }
                }
            }

            for alias in &server_doc.aliases {
                if server_aliases
                    .insert(alias.clone(), canonical.clone())
                    .is_some()
                {
                    return Err(OrchestratorError::catalog_invalid(format!(
                        "server alias {} resolves ambiguously",
                        alias
                    )));
                }
            }
            if server_aliases
                .insert(canonical.clone(), canonical.clone())
                .is_some()
            {
                return Err(OrchestratorError::catalog_invalid(format!(
                    "server alias collides with canonical name: {}",
                    canonical
                )));
            }

            servers.insert(
                canonical.clone(),
                ServerEntry {
                    canonical,
                    actions,
                },
            );
        }

        Ok(Self {
            servers,
            server_aliases,
        })
    }

    /// Resolve a server name or alias to its canonical name.
    pub fn resolve(&self, server_alias_or_name: &str) -> Option<&str> {
        self.server_aliases
            .get(server_alias_or_name)
            .map(|s| s.as_str())
    }

    /// Resolve an action name or alias under an already-canonical server name.
    pub fn resolve_action(&self, server_name: &str, action_alias_or_name: &str) -> Option<&str> {
        let entry = self.servers.get(server_name)?;
        if entry.actions.contains_key(action_alias_or_name) {
            return Some(
                entry
                    .actions
                    .get(action_alias_or_name)
                    .unwrap()
                    .action_name
                    .as_str(),
            );
        }
        entry
            .actions
            .values()
            .find(|def| def.aliases.iter().any(|a| a == action_alias_or_name))
            .map(|def| def.action_name.as_str())
    }

    pub fn schema(&self, server_name: &str, action_name: &str) -> Option<&ToolDefinition> {
        self.servers.get(server_name)?.actions.get(action_name)
    }

    pub fn default_action(&self, server_name: &str) -> Option<&str> {
        let entry = self.servers.get(server_name)?;
        entry
            .actions
            .values()
            .find_map(|d| d.default_action.as_deref())
    }

    /// Render the portion of the system prompt describing available tools.
    /// `filter_by_task_type`, when `Some`, drops actions whose `task_types`
    /// is non-empty and doesn't include it; an action with no `task_types`
    /// is visible for every task type. A server with every action filtered
    /// out is omitted entirely.
    pub fn render_for_prompt(&self, filter_by_task_type: Option<TaskType>) -> String {
        let visible = |def: &ToolDefinition| match filter_by_task_type {
            None => true,
            Some(tt) => def.task_types.is_empty() || def.task_types.contains(&tt),
        };

        let mut out = String::new();
        let mut names: Vec<&String> = self.servers.keys().collect();
        names.sort();
        for name in names {
            let entry = &self.servers[name];
            let mut action_names: Vec<&String> = entry
                .actions
                .keys()
                .filter(|a| visible(&entry.actions[*a]))
                .collect();
            if action_names.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n", entry.canonical));
            action_names.sort();
            for action_name in action_names {
                let def = &entry.actions[action_name];
                out.push_str(&format!("- {}.{}", entry.canonical, action_name));
                if !def.description.is_empty() {
                    out.push_str(&format!(": {}", def.description));
                }
                out.push('\n');
                for param in &def.parameters {
                    out.push_str(&format!(
                        "    - {} ({}{}){}\n",
                        param.name,
                        param.param_type,
                        if param.required { ", required" } else { "" },
                        if param.description.is_empty() {
                            String::new()
                        } else {
                            format!(": {}", param.description)
                        }
                    ));
                }
            }
        }
        out
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> CatalogDocument {
        CatalogDocument {
            servers: vec![ServerDocument {
                name: "microsandbox".into(),
                aliases: vec!["sandbox".into()],
                actions: vec![ActionDocument {
                    name: "execute_python".into(),
                    aliases: vec!["exec_py".into()],
                    description: "Run Python code".into(),
                    parameters: vec![ParameterDef {
                        name: "code".into(),
                        param_type: "string".into(),
                        required: true,
                        description: "source".into(),
                    }],
                    default_action: Some("code".into()),
                    task_types: vec![],
                }],
            }],
        }
    }

    #[test]
    fn resolves_server_alias_and_canonical() {
        let cat = Catalog::from_document(sample_doc()).unwrap();
        assert_eq!(cat.resolve("sandbox"), Some("microsandbox"));
        assert_eq!(cat.resolve("microsandbox"), Some("microsandbox"));
        assert_eq!(cat.resolve("nope"), None);
    }

    #[test]
    fn resolves_action_alias() {
        let cat = Catalog::from_document(sample_doc()).unwrap();
        assert_eq!(
            cat.resolve_action("microsandbox", "exec_py"),
            Some("execute_python")
        );
        assert_eq!(
            cat.resolve_action("microsandbox", "execute_python"),
            Some("execute_python")
        );
    }

    #[test]
    fn duplicate_parameter_name_rejected() {
        let mut doc = sample_doc();
        doc.servers[0].actions[0].parameters.push(ParameterDef {
            name: "code".into(),
            param_type: "string".into(),
            required: false,
            description: String::new(),
        });
        assert!(Catalog::from_document(doc).is_err());
    }

    #[test]
    fn ambiguous_server_alias_rejected() {
        let mut doc = sample_doc();
        doc.servers.push(ServerDocument {
            name: "browser_use".into(),
            aliases: vec!["sandbox".into()],
            actions: vec![],
        });
        assert!(Catalog::from_document(doc).is_err());
    }

    #[test]
    fn render_for_prompt_filters_by_task_type() {
        let mut doc = sample_doc();
        doc.servers[0].actions[0].task_types = vec![TaskType::Code];
        doc.servers.push(ServerDocument {
            name: "deepsearch".into(),
            aliases: vec![],
            actions: vec![ActionDocument {
                name: "research".into(),
                aliases: vec![],
                description: "Search the web".into(),
                parameters: vec![],
                default_action: None,
                task_types: vec![TaskType::Web],
            }],
        });
        let cat = Catalog::from_document(doc).unwrap();

        let for_code = cat.render_for_prompt(Some(TaskType::Code));
        assert!(for_code.contains("microsandbox"));
        assert!(!for_code.contains("deepsearch"));

        let for_web = cat.render_for_prompt(Some(TaskType::Web));
        assert!(for_web.contains("deepsearch"));
        assert!(!for_web.contains("microsandbox"));

        let unfiltered = cat.render_for_prompt(None);
        assert!(unfiltered.contains("microsandbox"));
        assert!(unfiltered.contains("deepsearch"));
    }

    #[test]
    fn render_for_prompt_lists_servers_and_params() {
        let cat = Catalog::from_document(sample_doc()).unwrap();
        let rendered = cat.render_for_prompt(None);
        assert!(rendered.contains("microsandbox"));
        assert!(rendered.contains("execute_python"));
        assert!(rendered.contains("code"));
    }
}
