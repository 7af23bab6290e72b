mod args;
mod invoices;
mod output;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use jsonschema::JSONSchema;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::ToolDefinition;

pub use args::{CreateInvoiceArgs, GetInvoiceDetailsArgs, GetTotalInvoicesArgs, UpdateInvoiceArgs};
pub use invoices::{
    CreateInvoiceTool, GetInvoiceDetailsTool, GetTotalInvoicesTool, UpdateInvoiceTool,
    invoice_registry,
};
pub use output::{InvoiceResult, InvoiceSummary, ToolOutput};

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// A named operation the model may ask to run.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn parameters_schema(&self) -> Value;

    fn execute<'a>(&'a self, arguments: Value, ctx: ToolContext) -> ToolFuture<'a>;
}

/// Per-execution handle. The coordinator may cancel the token once a
/// deadline passes; tools observe it through [`ToolContext::guard`].
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Runs `work` until it finishes or the execution is cancelled.
    pub async fn guard<F, T>(&self, work: F) -> Result<T, ToolError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(ToolError::Cancelled),
            value = work => Ok(value),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {}", .errors.join("; "))]
    InvalidArguments { tool: String, errors: Vec<String> },
    #[error("{message}")]
    Execution {
        tool: String,
        arguments: Value,
        message: String,
    },
    #[error("Tool execution timed out after {deadline_ms}ms")]
    Timeout { deadline_ms: u64 },
    #[error("Tool execution was cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn execution(tool: &str, arguments: &Value, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.to_string(),
            arguments: arguments.clone(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool {0} is registered twice")]
    Duplicate(String),
    #[error("schema for tool {tool} failed to compile: {message}")]
    SchemaCompile { tool: String, message: String },
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: Value,
    validator: JSONSchema,
}

/// Tools by name, each paired with a compiled validator for its arguments.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        let schema = tool.parameters_schema();
        let validator = JSONSchema::compile(&schema).map_err(|err| RegistryError::SchemaCompile {
            tool: name.clone(),
            message: err.to_string(),
        })?;

        self.tools.insert(
            name,
            RegisteredTool {
                tool: Arc::new(tool),
                schema,
                validator,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions handed to the model, sorted by name for stable prompts.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|registered| ToolDefinition {
                name: registered.tool.name().to_string(),
                description: registered.tool.description().to_string(),
                parameters: registered.schema.clone(),
            })
            .collect();
        definitions.sort_by(|left, right| left.name.cmp(&right.name));
        definitions
    }

    /// Looks up `name` and validates `arguments` against its schema.
    pub fn prepare(&self, name: &str, arguments: &Value) -> Result<Arc<dyn Tool>, ToolError> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        if let Err(validation_errors) = registered.validator.validate(arguments) {
            let errors = validation_errors
                .map(|err| err.to_string())
                .collect::<Vec<_>>();
            return Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                errors,
            });
        }

        Ok(Arc::clone(&registered.tool))
    }
}

/// JSON schema for a typed argument struct, inlined so providers that do not
/// follow `$ref` still see every property.
///
/// Returns `Value::Null` if the schema cannot be serialized; registration
/// then rejects the tool with [`RegistryError::SchemaCompile`].
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|settings| {
        settings.inline_subschemas = true;
        settings.option_add_null_type = false;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.remove("definitions");
    }
    value
}

pub(crate) fn parse_arguments<T: DeserializeOwned>(
    tool: &str,
    arguments: Value,
) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments {
        tool: tool.to_string(),
        errors: vec![err.to_string()],
    })
}
