use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ToolError;

/// Raw JSON Schema for a tool's arguments, built with `serde_json::json!`.
pub type ToolParameterSchema = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: ToolParameterSchema,
}

impl FunctionDecl {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        parameters: ToolParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            parameters,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn schema(&self) -> FunctionDecl;

    /// Runs the tool for `tenant_id` with already-parsed arguments.
    async fn execute(&self, tenant_id: &str, args: &Value) -> Result<Value, ToolError>;

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}
