use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use types::{AgentEvent, EventBus, FunctionDecl, Tool, ToolError};

use crate::{invalid_args, new_record_id, parse_args};

pub const TAKE_NOTE_TOOL_NAME: &str = "take_note";

const NOTE_MAX_CHARS: usize = 2_000;

#[derive(Debug, Deserialize)]
struct TakeNoteArgs {
    content: String,
}

pub struct TakeNoteTool {
    events: EventBus,
}

impl TakeNoteTool {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Tool for TakeNoteTool {
    fn name(&self) -> &'static str {
        TAKE_NOTE_TOOL_NAME
    }

    fn schema(&self) -> FunctionDecl {
        FunctionDecl::new(
            TAKE_NOTE_TOOL_NAME,
            Some("Record a note or maintenance request for the resident".to_owned()),
            json!({
                "type": "object",
                "required": ["content"],
                "properties": {
                    "content": {
                        "type": "string",
                        "minLength": 1,
                        "maxLength": NOTE_MAX_CHARS
                    }
                }
            }),
        )
    }

    async fn execute(&self, tenant_id: &str, args: &Value) -> Result<Value, ToolError> {
        let request: TakeNoteArgs = parse_args(TAKE_NOTE_TOOL_NAME, args)?;
        let length = request.content.chars().count();
        if length == 0 || length > NOTE_MAX_CHARS {
            return Err(invalid_args(
                TAKE_NOTE_TOOL_NAME,
                format!("`content` must be 1..={NOTE_MAX_CHARS} characters; got {length}"),
            ));
        }

        let note_id = new_record_id();
        tracing::info!(tenant_id, %note_id, "note created");
        self.events.publish(AgentEvent::NoteCreated {
            tenant_id: tenant_id.to_owned(),
            note_id: note_id.clone(),
        });

        Ok(json!({
            "success": true,
            "noteId": note_id,
            "message": "Note saved successfully.",
        }))
    }
}
