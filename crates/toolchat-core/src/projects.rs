//! In-memory project records and the tools that operate on them.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tool::{FnTool, ParamSpec, ParamType, ToolArgs, ToolRegistry, ToolSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDetails {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Default)]
struct StoreState {
    projects: Vec<Project>,
    active: Option<String>,
}

impl StoreState {
    fn find(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    fn details(&self, id: &str) -> Option<ProjectDetails> {
        self.find(id).map(|p| ProjectDetails {
            id: p.id.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            is_active: self.active.as_deref() == Some(id),
        })
    }
}

/// Projects in insertion order plus a weak "active" pointer (an id).
#[derive(Default)]
pub struct ProjectStore {
    state: Mutex<StoreState>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, name: &str, description: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().projects.push(Project {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
        });
        id
    }

    /// Removes the project, clearing the active pointer if it pointed here.
    pub fn delete(&self, id: &str) -> Option<Project> {
        let mut state = self.lock();
        let pos = state.projects.iter().position(|p| p.id == id)?;
        let removed = state.projects.remove(pos);
        if state.active.as_deref() == Some(id) {
            state.active = None;
        }
        Some(removed)
    }

    pub fn switch(&self, id: &str) -> Option<Project> {
        let mut state = self.lock();
        let project = state.find(id)?.clone();
        state.active = Some(project.id.clone());
        Some(project)
    }

    pub fn get(&self, id: &str) -> Option<Project> {
        self.lock().find(id).cloned()
    }

    pub fn details(&self, id: &str) -> Option<ProjectDetails> {
        self.lock().details(id)
    }

    pub fn get_active(&self) -> Option<ProjectDetails> {
        let state = self.lock();
        let id = state.active.as_deref()?;
        state.details(id)
    }

    pub fn list(&self) -> Vec<Project> {
        self.lock().projects.clone()
    }

    pub fn active_id(&self) -> Option<String> {
        self.lock().active.clone()
    }
}

fn str_arg<'a>(args: &'a ToolArgs, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("argument '{name}' must be a string"))
}

fn to_value<T: Serialize>(value: Option<T>) -> Result<Value> {
    match value {
        Some(v) => Ok(serde_json::to_value(v)?),
        None => Ok(Value::Null),
    }
}

fn project_id_param(description: &str) -> ParamSpec {
    ParamSpec::required("project_id", ParamType::String).describe(description)
}

/// Register the six project tools against a shared store.
pub fn register_project_tools(registry: &mut ToolRegistry, store: Arc<ProjectStore>) {
    let s = Arc::clone(&store);
    registry.register(FnTool::new(
        ToolSpec::new("list_projects").doc("List all available projects."),
        move |_: &ToolArgs| {
            let projects = s.list();
            if projects.is_empty() {
                return Ok(Value::Null);
            }
            let active = s.active_id();
            let lines: Vec<String> = projects
                .iter()
                .map(|p| {
                    let marker = if active.as_deref() == Some(p.id.as_str()) {
                        " (ACTIVE)"
                    } else {
                        ""
                    };
                    format!(
                        "ID: {}{marker}\nName: {}\nDescription: {}\n",
                        p.id, p.name, p.description
                    )
                })
                .collect();
            Ok(Value::String(lines.join("\n")))
        },
    ));

    let s = Arc::clone(&store);
    registry.register(FnTool::new(
        ToolSpec::new("create_project")
            .param(ParamSpec::required("name", ParamType::String))
            .param(ParamSpec::required("description", ParamType::String))
            .doc(
                "Create a new project.

                Args:
                    name: Project name
                    description: Project description

                Returns:
                    ID of the created project",
            ),
        move |args: &ToolArgs| {
            let id = s.create(str_arg(args, "name")?, str_arg(args, "description")?);
            Ok(Value::String(id))
        },
    ));

    let s = Arc::clone(&store);
    registry.register(FnTool::new(
        ToolSpec::new("delete_project")
            .param(project_id_param("ID of the project to delete"))
            .doc("Delete a project by ID."),
        move |args: &ToolArgs| {
            let id = str_arg(args, "project_id")?;
            Ok(match s.delete(id) {
                Some(p) => json!(format!("Project '{}' (ID: {}) has been deleted", p.name, p.id)),
                None => Value::Null,
            })
        },
    ));

    let s = Arc::clone(&store);
    registry.register(FnTool::new(
        ToolSpec::new("switch_project")
            .param(project_id_param("ID of the project to switch to"))
            .doc("Switch to a project by ID."),
        move |args: &ToolArgs| {
            let id = str_arg(args, "project_id")?;
            Ok(match s.switch(id) {
                Some(p) => json!(format!("Switched to project '{}' (ID: {})", p.name, p.id)),
                None => Value::Null,
            })
        },
    ));

    let s = Arc::clone(&store);
    registry.register(FnTool::new(
        ToolSpec::new("get_project_details")
            .param(project_id_param("ID of the project"))
            .doc("Get project details by ID."),
        move |args: &ToolArgs| to_value(s.details(str_arg(args, "project_id")?)),
    ));

    registry.register(FnTool::new(
        ToolSpec::new("get_active_project").doc("Get active project details."),
        move |_: &ToolArgs| to_value(store.get_active()),
    ));
}
