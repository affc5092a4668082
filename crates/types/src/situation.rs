use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::UnknownSituation;

pub const SWITCH_SITUATION_TOOL: &str = "switch_situation";

/// Conversational mode of a session. Controls the situation prompt and
/// which tools the model may call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Situation {
    #[default]
    Introduction,
    Resident,
    Prospect,
}

impl Situation {
    pub const ALL: [Situation; 3] = [Self::Introduction, Self::Resident, Self::Prospect];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Introduction => "introduction",
            Self::Resident => "resident",
            Self::Prospect => "prospect",
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Introduction => INTRODUCTION_PROMPT,
            Self::Resident => RESIDENT_PROMPT,
            Self::Prospect => PROSPECT_PROMPT,
        }
    }

    /// Tools the situation prompt steers the model toward. The orchestrator
    /// still offers the full catalog outside introduction.
    pub fn allowed_tools(self) -> &'static [&'static str] {
        match self {
            Self::Introduction => &[SWITCH_SITUATION_TOOL],
            Self::Resident => &["take_note", "update_contact_info", SWITCH_SITUATION_TOOL],
            Self::Prospect => &["book_tour", "update_contact_info", SWITCH_SITUATION_TOOL],
        }
    }

    pub fn is_valid(name: &str) -> bool {
        Self::ALL.iter().any(|situation| situation.as_str() == name)
    }

    /// Comma-separated list used in user-facing failure messages.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|situation| situation.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Situation {
    type Err = UnknownSituation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|situation| situation.as_str() == value)
            .ok_or_else(|| UnknownSituation {
                name: value.to_owned(),
            })
    }
}

const INTRODUCTION_PROMPT: &str = "You are a friendly AI receptionist. Greet the caller and find out \
whether they already live here or are interested in moving in.

- If the caller is an existing RESIDENT, call switch_situation with newSituation=\"resident\".
- If the caller is a PROSPECT or wants to learn more, call switch_situation with newSituation=\"prospect\".

Keep the greeting warm, short and professional.";

const RESIDENT_PROMPT: &str = "You are a helpful AI assistant for the residents of a property \
management company.

You can help residents with:
- Maintenance requests (use take_note)
- Updating contact details (use update_contact_info)
- General questions about the property

Be professional and empathetic. Confirm what was done after every tool call.";

const PROSPECT_PROMPT: &str = "You are an enthusiastic AI leasing agent helping prospects learn \
about available homes.

You can help prospects with:
- Scheduling a tour (use book_tour)
- Questions about amenities, pricing and availability
- Capturing contact details (use update_contact_info)

Be warm and helpful, and encourage the caller to book a tour.";
