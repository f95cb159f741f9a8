// ABOUTME: Tool registry — maps a tool name to its category, display name, and description.
// ABOUTME: StaticRegistry ships the common agent file, shell, and web tools.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::risk::ToolCategory;

/// Static facts about a tool the gate may be asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: ToolCategory,
}

impl ToolSpec {
    pub fn new(name: &str, display_name: &str, category: ToolCategory, description: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            category,
        }
    }
}

/// Lookup surface the gate consumes. Implemented by the host application.
pub trait ToolRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<ToolSpec>;

    fn category(&self, name: &str) -> Option<ToolCategory> {
        self.lookup(name).map(|spec| spec.category)
    }
}

/// In-memory registry keyed by tool name.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in agent tool set.
    pub fn builtin() -> Self {
        use ToolCategory::*;
        let specs = [
            ("read_file", "ReadFile", ReadOnly, "Read the contents of a file"),
            ("read_many_files", "ReadManyFiles", ReadOnly, "Read several files at once"),
            ("list_directory", "ReadFolder", ReadOnly, "List the entries of a directory"),
            ("glob", "FindFiles", ReadOnly, "Find files matching a glob pattern"),
            ("search_file_content", "SearchText", ReadOnly, "Search file contents for a pattern"),
            ("write_file", "WriteFile", Write, "Create or overwrite a file"),
            ("replace", "Edit", Write, "Replace text inside a file"),
            ("delete_file", "DeleteFile", Write, "Delete a file"),
            ("run_shell_command", "Shell", Shell, "Run a shell command"),
            ("web_fetch", "WebFetch", Network, "Fetch the content of a URL"),
            ("google_web_search", "GoogleSearch", Network, "Search the web"),
        ];
        specs
            .into_iter()
            .fold(Self::new(), |registry, (name, display, category, description)| {
                registry.with(ToolSpec::new(name, display, category, description))
            })
    }

    /// Builder-style registration.
    pub fn with(mut self, spec: ToolSpec) -> Self {
        self.register(spec);
        self
    }

    /// Register or replace a tool.
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), spec);
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ToolRegistry for StaticRegistry {
    fn lookup(&self, name: &str) -> Option<ToolSpec> {
        self.tools.get(name).cloned()
    }
}
