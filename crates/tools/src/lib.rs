use std::{collections::BTreeMap, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use types::{EventBus, FunctionDecl, SWITCH_SITUATION_TOOL, Situation, Tool, ToolError};

mod contact_tools;
mod note_tools;
mod registry;
mod tour_tools;

pub use contact_tools::{UPDATE_CONTACT_INFO_TOOL_NAME, UpdateContactInfoTool};
pub use note_tools::{TAKE_NOTE_TOOL_NAME, TakeNoteTool};
pub use registry::{ToolRegistry, default_registry};
pub use tour_tools::{BOOK_TOUR_TOOL_NAME, BookTourTool};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Declaration for the in-process situation switch. Execution lives with the
/// turn orchestrator because it mutates session state.
pub fn switch_situation_schema() -> FunctionDecl {
    let names = Situation::ALL
        .iter()
        .map(|situation| situation.as_str())
        .collect::<Vec<_>>();
    FunctionDecl::new(
        SWITCH_SITUATION_TOOL,
        Some("Switch the conversation to a different situation".to_owned()),
        json!({
            "type": "object",
            "required": ["newSituation"],
            "properties": {
                "newSituation": {
                    "type": "string",
                    "enum": names,
                    "description": "Situation to switch to"
                }
            }
        }),
    )
}

fn parse_args<T>(tool: &str, args: &Value) -> Result<T, ToolError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(args.clone()).map_err(|error| invalid_args(tool, error.to_string()))
}

fn invalid_args(tool: &str, message: impl Into<String>) -> ToolError {
    ToolError::InvalidArguments {
        tool: tool.to_owned(),
        message: message.into(),
    }
}

fn require_non_empty<'a>(tool: &str, field: &str, value: &'a str) -> Result<&'a str, ToolError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid_args(tool, format!("`{field}` must not be empty")));
    }
    Ok(trimmed)
}

fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
