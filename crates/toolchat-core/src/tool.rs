//! Tool registration and dispatch.
//!
//! Tools describe themselves with a declarative [`ToolSpec`]; the registry
//! turns those descriptors into function-calling schemas and checks
//! arguments against them before a tool body runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use toolchat_provider::ToolDef;
use tracing::{info, warn};

/// Keyword arguments decoded from a tool call.
pub type ToolArgs = serde_json::Map<String, Value>;

const LOGGED_RESULT_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{tool}: missing required argument '{arg}'")]
    MissingArgument { tool: String, arg: String },
    #[error("{tool}: invalid argument '{arg}': {reason}")]
    InvalidArgument {
        tool: String,
        arg: String,
        reason: String,
    },
    #[error("{message}")]
    Execution { tool: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// Untyped; advertised as a string.
    Any,
}

impl ParamType {
    pub fn schema_type(self) -> &'static str {
        match self {
            Self::String | Self::Any => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: Option<String>,
    /// Parameters with a default are optional.
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType, default: Value) -> Self {
        Self {
            default: Some(default),
            ..Self::required(name, ty)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Take the description from a doc string.
    ///
    /// The summary is everything before an `Args:` or `Returns:` section.
    /// `name: text` lines under `Args:` describe parameters that don't
    /// already carry a description; call this after adding params.
    pub fn doc(mut self, text: &str) -> Self {
        let mut summary = Vec::new();
        let mut in_args = false;
        let mut in_other_section = false;

        for line in text.lines() {
            let trimmed = line.trim();
            match trimmed {
                "Args:" | "Arguments:" | "Parameters:" => {
                    in_args = true;
                    in_other_section = false;
                    continue;
                }
                "Returns:" | "Raises:" | "Examples:" => {
                    in_args = false;
                    in_other_section = true;
                    continue;
                }
                _ => {}
            }

            if in_args {
                if let Some((name, desc)) = trimmed.split_once(':') {
                    let name = name.trim();
                    if let Some(param) = self
                        .params
                        .iter_mut()
                        .find(|p| p.name == name && p.description.is_none())
                    {
                        param.description = Some(desc.trim().to_string());
                    }
                }
            } else if !in_other_section && !trimmed.is_empty() {
                summary.push(trimmed);
            }
        }

        self.description = summary.join(" ");
        self
    }

    /// JSON-Schema object describing the parameters.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut prop = json!({ "type": param.ty.schema_type() });
            if let Some(desc) = &param.description {
                prop["description"] = Value::String(desc.clone());
            }
            properties.insert(param.name.clone(), prop);
            if param.is_required() {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameters_schema(),
        }
    }

    /// Wire shape for the function-calling `tools` parameter.
    pub fn to_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }

    /// Reject undeclared or missing arguments and fill in defaults.
    /// Values are passed through as given; the schema only advertises types.
    fn bind(&self, mut args: ToolArgs) -> Result<ToolArgs, ToolError> {
        if let Some(extra) = args
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(ToolError::InvalidArgument {
                tool: self.name.clone(),
                arg: extra.clone(),
                reason: "unexpected argument".into(),
            });
        }

        for param in &self.params {
            if args.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    args.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(ToolError::MissingArgument {
                        tool: self.name.clone(),
                        arg: param.name.clone(),
                    });
                }
            }
        }
        Ok(args)
    }
}

/// A callable the model may request.
///
/// `Ok(Value::Null)` means "nothing to report" (e.g. lookup of a missing record).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<Value>;
}

/// Adapts a plain closure into a [`ToolExecutor`].
pub struct FnTool<F> {
    spec: ToolSpec,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(&ToolArgs) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(spec: ToolSpec, f: F) -> Self {
        Self { spec, f }
    }
}

#[async_trait]
impl<F> ToolExecutor for FnTool<F>
where
    F: Fn(&ToolArgs) -> anyhow::Result<Value> + Send + Sync,
{
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<Value> {
        (self.f)(&args)
    }
}

struct RegisteredTool {
    spec: ToolSpec,
    tool: Arc<dyn ToolExecutor>,
}

/// Name-keyed set of tools, kept in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl ToolExecutor + 'static) {
        self.register_as(tool, None, None);
    }

    /// Register under an explicit name and/or description.
    pub fn register_as(
        &mut self,
        tool: impl ToolExecutor + 'static,
        name: Option<&str>,
        description: Option<&str>,
    ) {
        let mut spec = tool.spec();
        if let Some(name) = name {
            spec.name = name.to_string();
        }
        if let Some(description) = description {
            spec.description = description.to_string();
        }

        let entry = RegisteredTool {
            spec,
            tool: Arc::new(tool),
        };
        match self.index.get(&entry.spec.name) {
            Some(&slot) => {
                warn!(tool = %entry.spec.name, "tool re-registered, replacing previous definition");
                self.tools[slot] = entry;
            }
            None => {
                self.index.insert(entry.spec.name.clone(), self.tools.len());
                self.tools.push(entry);
            }
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i].tool))
    }

    pub fn get_all_tools(&self) -> HashMap<String, Arc<dyn ToolExecutor>> {
        self.tools
            .iter()
            .map(|t| (t.spec.name.clone(), Arc::clone(&t.tool)))
            .collect()
    }

    pub fn get_tool_schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.spec.to_schema()).collect()
    }

    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.spec.to_tool_def()).collect()
    }

    pub async fn execute_tool(&self, name: &str, args: ToolArgs) -> Result<Value, ToolError> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args = entry.spec.bind(args)?;
        let call = CallDisplay { name, args: &args };
        match entry.tool.execute(args.clone()).await {
            Ok(Value::Null) => {
                warn!("Tool returned no result: {call}");
                Ok(Value::Null)
            }
            Ok(value) => {
                info!("Tool executed: {call} -> {}", truncate_for_log(&value));
                Ok(value)
            }
            Err(e) => {
                warn!("Tool failed: {call}: {e:#}");
                Err(ToolError::Execution {
                    tool: name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// `name(k=v, ..)` for log lines.
struct CallDisplay<'a> {
    name: &'a str,
    args: &'a ToolArgs,
}

impl fmt::Display for CallDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (k, v)) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match v {
                Value::String(s) => write!(f, "{k}={s}")?,
                other => write!(f, "{k}={other}")?,
            }
        }
        f.write_str(")")
    }
}

fn truncate_for_log(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > LOGGED_RESULT_CHARS {
        let head: String = text.chars().take(LOGGED_RESULT_CHARS).collect();
        format!("{head}...")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> ToolArgs {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn add_numbers() -> FnTool<impl Fn(&ToolArgs) -> anyhow::Result<Value> + Send + Sync> {
        let spec = ToolSpec::new("add_numbers")
            .param(ParamSpec::required("a", ParamType::Integer))
            .param(ParamSpec::optional("b", ParamType::Integer, json!(0)))
            .doc("Add two numbers.");
        FnTool::new(spec, |args: &ToolArgs| {
            let a = args["a"].as_i64().unwrap_or_default();
            let b = args["b"].as_i64().unwrap_or_default();
            Ok(json!(a + b))
        })
    }

    fn noop(spec: ToolSpec) -> FnTool<impl Fn(&ToolArgs) -> anyhow::Result<Value> + Send + Sync> {
        FnTool::new(spec, |_: &ToolArgs| Ok(Value::Null))
    }

    #[test]
    fn register_with_explicit_name_and_description() {
        let mut registry = ToolRegistry::new();
        let spec = ToolSpec::new("test_tool")
            .param(ParamSpec::required("param1", ParamType::String))
            .param(ParamSpec::optional("param2", ParamType::Integer, json!(0)))
            .doc("Test tool docstring.");
        registry.register_as(noop(spec), Some("custom_name"), Some("Custom description"));

        let schemas = registry.get_tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "custom_name");
        assert_eq!(schemas[0]["function"]["description"], "Custom description");
        assert!(registry.get_tool("custom_name").is_some());
        assert!(registry.get_tool("test_tool").is_none());
    }

    #[test]
    fn doc_string_supplies_summary_and_param_descriptions() {
        let spec = ToolSpec::new("test_tool")
            .param(ParamSpec::required("param1", ParamType::String))
            .param(ParamSpec::optional("param2", ParamType::Integer, json!(0)))
            .doc(
                "Test tool with detailed docstring.

                Args:
                    param1: First parameter description
                    param2: Second parameter description

                Returns:
                    Joined string
                ",
            );

        assert_eq!(spec.description, "Test tool with detailed docstring.");
        let schema = spec.to_schema();
        let props = &schema["function"]["parameters"]["properties"];
        assert_eq!(props["param1"]["description"], "First parameter description");
        assert_eq!(props["param2"]["description"], "Second parameter description");
    }

    #[test]
    fn parameter_types_map_to_schema_types() {
        let spec = ToolSpec::new("type_test_tool")
            .param(ParamSpec::required("str_param", ParamType::String))
            .param(ParamSpec::required("int_param", ParamType::Integer))
            .param(ParamSpec::required("float_param", ParamType::Number))
            .param(ParamSpec::required("bool_param", ParamType::Boolean))
            .param(ParamSpec::required("dict_param", ParamType::Object))
            .param(ParamSpec::required("list_param", ParamType::Array))
            .param(ParamSpec::required("any_param", ParamType::Any));
        let schema = spec.parameters_schema();
        let props = &schema["properties"];

        assert_eq!(props["str_param"]["type"], "string");
        assert_eq!(props["int_param"]["type"], "integer");
        assert_eq!(props["float_param"]["type"], "number");
        assert_eq!(props["bool_param"]["type"], "boolean");
        assert_eq!(props["dict_param"]["type"], "object");
        assert_eq!(props["list_param"]["type"], "array");
        assert_eq!(props["any_param"]["type"], "string");
    }

    #[test]
    fn required_list_excludes_defaulted_params() {
        let spec = ToolSpec::new("t")
            .param(ParamSpec::required("required_param", ParamType::String))
            .param(ParamSpec::optional("optional_param", ParamType::Integer, json!(0)));
        let schema = spec.parameters_schema();
        assert_eq!(schema["required"], json!(["required_param"]));
    }

    #[tokio::test]
    async fn execute_applies_defaults() {
        let mut registry = ToolRegistry::new();
        registry.register(add_numbers());

        let result = registry
            .execute_tool("add_numbers", args(json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        assert_eq!(result, json!(3));

        let result = registry
            .execute_tool("add_numbers", args(json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(result, json!(1));
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute_tool("non_existent_tool", ToolArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref name) if name == "non_existent_tool"));
        assert_eq!(err.to_string(), "Unknown tool: non_existent_tool");
    }

    #[tokio::test]
    async fn execute_rejects_missing_and_unexpected_args() {
        let mut registry = ToolRegistry::new();
        registry.register(add_numbers());

        let err = registry
            .execute_tool("add_numbers", args(json!({"b": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingArgument { ref arg, .. } if arg == "a"));

        let err = registry
            .execute_tool("add_numbers", args(json!({"a": 1, "c": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { ref arg, .. } if arg == "c"));

    }

    #[tokio::test]
    async fn argument_values_are_passed_through_untyped() {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new(
            ToolSpec::new("echo").param(ParamSpec::required("count", ParamType::Integer)),
            |args: &ToolArgs| Ok(args["count"].clone()),
        ));

        let out = registry
            .execute_tool("echo", args(json!({"count": 2.0})))
            .await
            .unwrap();
        assert_eq!(out, json!(2.0));
        let out = registry
            .execute_tool("echo", args(json!({"count": "two"})))
            .await
            .unwrap();
        assert_eq!(out, "two");
    }

    #[tokio::test]
    async fn tool_failure_becomes_execution_error() {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new(ToolSpec::new("boom"), |_: &ToolArgs| {
            Err(anyhow::anyhow!("disk on fire"))
        }));

        let err = registry
            .execute_tool("boom", ToolArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { ref tool, .. } if tool == "boom"));
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn retrieval_and_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(noop(ToolSpec::new("zeta")));
        registry.register(noop(ToolSpec::new("alpha")));

        assert!(registry.get_tool("zeta").is_some());
        assert!(registry.get_tool("non_existent").is_none());
        let all = registry.get_all_tools();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("alpha"));

        let names: Vec<_> = registry.tool_defs().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(noop(ToolSpec::new("a").doc("first")));
        registry.register(noop(ToolSpec::new("b")));
        registry.register(noop(ToolSpec::new("a").doc("second")));

        assert_eq!(registry.len(), 2);
        let defs = registry.tool_defs();
        assert_eq!(defs[0].name, "a");
        assert_eq!(defs[0].description, "second");
    }

    #[test]
    fn call_display_and_truncation() {
        let a = args(json!({"name": "Test", "count": 2}));
        let shown = CallDisplay {
            name: "create",
            args: &a,
        }
        .to_string();
        assert!(shown.starts_with("create("));
        assert!(shown.contains("name=Test"));
        assert!(shown.contains("count=2"));

        let long = Value::String("x".repeat(150));
        let logged = truncate_for_log(&long);
        assert_eq!(logged.len(), LOGGED_RESULT_CHARS + 3);
        assert!(logged.ends_with("..."));
    }
}
