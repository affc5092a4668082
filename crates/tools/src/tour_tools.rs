use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use types::{AgentEvent, EventBus, FunctionDecl, Tool, ToolError};

use crate::{invalid_args, new_record_id, parse_args, require_non_empty};

pub const BOOK_TOUR_TOOL_NAME: &str = "book_tour";

#[derive(Debug, Deserialize)]
struct BookTourArgs {
    customer_name: String,
    tour_date: String,
    location: String,
}

pub struct BookTourTool {
    events: EventBus,
}

impl BookTourTool {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

/// Accepts only zero-padded `YYYY-MM-DD` calendar dates.
fn parse_tour_date(value: &str) -> Result<NaiveDate, ToolError> {
    let well_formed = value.len() == 10
        && value.bytes().enumerate().all(|(index, byte)| match index {
            4 | 7 => byte == b'-',
            _ => byte.is_ascii_digit(),
        });
    if !well_formed {
        return Err(invalid_args(
            BOOK_TOUR_TOOL_NAME,
            format!("`tour_date` must be YYYY-MM-DD; got `{value}`"),
        ));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|error| {
        invalid_args(
            BOOK_TOUR_TOOL_NAME,
            format!("`tour_date` is not a calendar date: {error}"),
        )
    })
}

#[async_trait]
impl Tool for BookTourTool {
    fn name(&self) -> &'static str {
        BOOK_TOUR_TOOL_NAME
    }

    fn schema(&self) -> FunctionDecl {
        FunctionDecl::new(
            BOOK_TOUR_TOOL_NAME,
            Some("Book a property tour for a prospect".to_owned()),
            json!({
                "type": "object",
                "required": ["customer_name", "tour_date", "location"],
                "properties": {
                    "customer_name": { "type": "string", "minLength": 1 },
                    "tour_date": {
                        "type": "string",
                        "pattern": "^\\d{4}-\\d{2}-\\d{2}$",
                        "description": "Tour date as YYYY-MM-DD"
                    },
                    "location": { "type": "string", "minLength": 1 }
                }
            }),
        )
    }

    async fn execute(&self, tenant_id: &str, args: &Value) -> Result<Value, ToolError> {
        let request: BookTourArgs = parse_args(BOOK_TOUR_TOOL_NAME, args)?;
        let customer_name = require_non_empty(BOOK_TOUR_TOOL_NAME, "customer_name", &request.customer_name)?;
        let location = require_non_empty(BOOK_TOUR_TOOL_NAME, "location", &request.location)?;
        let tour_date = parse_tour_date(&request.tour_date)?.format("%Y-%m-%d").to_string();

        let tour_id = new_record_id();
        tracing::info!(tenant_id, %tour_id, %tour_date, "tour booked");
        self.events.publish(AgentEvent::TourBooked {
            tenant_id: tenant_id.to_owned(),
            tour_id: tour_id.clone(),
            customer_name: customer_name.to_owned(),
            tour_date: tour_date.clone(),
            location: location.to_owned(),
        });

        Ok(json!({
            "success": true,
            "tourId": tour_id,
            "message": format!("Tour booked for {customer_name} on {tour_date} at {location}."),
        }))
    }
}
