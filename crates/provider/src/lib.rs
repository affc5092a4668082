use std::env;

mod openai;
mod sse;
mod wire;

pub use openai::OpenAIProvider;

pub(crate) const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub(crate) const DEFAULT_STREAM_BUFFER_SIZE: usize = 64;

const API_KEY_ENV_VARS: [&str; 2] = ["OPENAI_API_KEY", "API_KEY"];
const MAX_ERROR_DETAIL_CHARS: usize = 512;

/// Resolve the API key: explicit config, then `OPENAI_API_KEY`, then `API_KEY`.
/// Blank values are skipped.
pub fn resolve_api_key(explicit_api_key: Option<String>) -> Option<String> {
    first_present(
        std::iter::once(explicit_api_key)
            .chain(API_KEY_ENV_VARS.iter().map(|name| env::var(name).ok())),
    )
}

fn first_present(candidates: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}

fn base_url_or(base_url: &str, fallback: &str) -> String {
    match base_url.trim() {
        "" => fallback.to_owned(),
        url => url.trim_end_matches('/').to_owned(),
    }
}

/// Prefers the `{"error":{"message":..}}` envelope, falling back to the raw
/// body. Long details are cut short.
fn http_error_detail(body: &str) -> String {
    let envelope_message = serde_json::from_str::<wire::ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message);
    match first_present([envelope_message, Some(body.to_owned())]) {
        Some(detail) => clip(detail),
        None => "empty error response from provider".to_owned(),
    }
}

fn clip(detail: String) -> String {
    match detail.char_indices().nth(MAX_ERROR_DETAIL_CHARS) {
        Some((cut, _)) => format!("{}...", &detail[..cut]),
        None => detail,
    }
}
