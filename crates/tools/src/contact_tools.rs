use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use types::{AgentEvent, EventBus, FunctionDecl, Tool, ToolError};

use crate::{invalid_args, new_record_id, parse_args, require_non_empty};

pub const UPDATE_CONTACT_INFO_TOOL_NAME: &str = "update_contact_info";

const PHONE_MIN_CHARS: usize = 7;

#[derive(Debug, Deserialize)]
struct UpdateContactInfoArgs {
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

pub struct UpdateContactInfoTool {
    events: EventBus,
}

impl UpdateContactInfoTool {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

#[async_trait]
impl Tool for UpdateContactInfoTool {
    fn name(&self) -> &'static str {
        UPDATE_CONTACT_INFO_TOOL_NAME
    }

    fn schema(&self) -> FunctionDecl {
        FunctionDecl::new(
            UPDATE_CONTACT_INFO_TOOL_NAME,
            Some("Save or update the caller's contact details".to_owned()),
            json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "email": { "type": "string", "format": "email" },
                    "phone": { "type": "string", "minLength": PHONE_MIN_CHARS }
                }
            }),
        )
    }

    async fn execute(&self, tenant_id: &str, args: &Value) -> Result<Value, ToolError> {
        let request: UpdateContactInfoArgs = parse_args(UPDATE_CONTACT_INFO_TOOL_NAME, args)?;
        let name = require_non_empty(UPDATE_CONTACT_INFO_TOOL_NAME, "name", &request.name)?;
        let email = request.email.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let phone = request.phone.as_deref().map(str::trim).filter(|v| !v.is_empty());

        if email.is_none() && phone.is_none() {
            return Err(invalid_args(
                UPDATE_CONTACT_INFO_TOOL_NAME,
                "at least one of `email` or `phone` is required",
            ));
        }
        if let Some(email) = email
            && !looks_like_email(email)
        {
            return Err(invalid_args(
                UPDATE_CONTACT_INFO_TOOL_NAME,
                format!("`email` is not a valid address: `{email}`"),
            ));
        }
        if let Some(phone) = phone
            && phone.chars().count() < PHONE_MIN_CHARS
        {
            return Err(invalid_args(
                UPDATE_CONTACT_INFO_TOOL_NAME,
                format!("`phone` must be at least {PHONE_MIN_CHARS} characters"),
            ));
        }

        let contact_id = new_record_id();
        tracing::info!(tenant_id, %contact_id, "contact info updated");
        self.events.publish(AgentEvent::ContactUpdated {
            tenant_id: tenant_id.to_owned(),
            contact_id: contact_id.clone(),
            name: name.to_owned(),
        });

        Ok(json!({
            "success": true,
            "contactId": contact_id,
            "message": format!("Contact info updated for {name}."),
        }))
    }
}
