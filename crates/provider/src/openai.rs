use async_trait::async_trait;
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use types::{
    Context, OpenAIProviderConfig, Provider, ProviderError, ProviderId, ProviderStream,
    StreamItem,
};

use crate::{
    CHAT_COMPLETIONS_PATH, DEFAULT_STREAM_BUFFER_SIZE, base_url_or, http_error_detail,
    resolve_api_key,
    sse::EventStreamDecoder,
    wire::{ChatRequest, FragmentTracker, Frame, decode_frame},
};

type ItemSender = mpsc::Sender<Result<StreamItem, ProviderError>>;

/// Streaming client for OpenAI-compatible `/v1/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    provider_id: ProviderId,
    endpoint: String,
    api_key: String,
}

impl OpenAIProvider {
    pub fn new(provider_id: ProviderId, api_key: String, base_url: &str) -> Self {
        let base_url = base_url_or(base_url, types::OPENAI_DEFAULT_BASE_URL);
        Self {
            client: Client::new(),
            provider_id,
            endpoint: format!("{base_url}{CHAT_COMPLETIONS_PATH}"),
            api_key,
        }
    }

    pub fn from_config(config: &OpenAIProviderConfig) -> Result<Self, ProviderError> {
        let provider_id = ProviderId::from(types::OPENAI_PROVIDER_ID);
        match resolve_api_key(config.api_key.clone()) {
            Some(api_key) => Ok(Self::new(provider_id, api_key, &config.base_url)),
            None => Err(ProviderError::MissingApiKey {
                provider: provider_id,
            }),
        }
    }

    async fn open(&self, context: &Context) -> Result<Response, ProviderError> {
        let body = ChatRequest::streaming(context)?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| ProviderError::Transport {
                provider: self.provider_id.clone(),
                message: error.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response
            .text()
            .await
            .map(|body| http_error_detail(&body))
            .unwrap_or_else(|error| format!("unable to read error body: {error}"));
        Err(ProviderError::HttpStatus {
            provider: self.provider_id.clone(),
            status: status.as_u16(),
            message: detail,
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    async fn stream(
        &self,
        context: &Context,
        buffer_size: usize,
    ) -> Result<ProviderStream, ProviderError> {
        tracing::debug!(
            provider = %self.provider_id,
            model = %context.model,
            messages = context.messages.len(),
            tools = context.tools.len(),
            "opening completion stream"
        );
        let response = self.open(context).await?;
        let capacity = match buffer_size {
            0 => DEFAULT_STREAM_BUFFER_SIZE,
            size => size,
        };
        let (sender, receiver) = mpsc::channel(capacity);
        tokio::spawn(pump(response, sender, self.provider_id.clone()));
        Ok(receiver)
    }
}

/// Whether the pump should keep reading the body.
enum Flow {
    More,
    Stop,
}

/// Reads the response body into the channel until `[DONE]`, a decode
/// failure, or the receiver hanging up. A body that ends without the
/// sentinel is reported as a lost connection.
async fn pump(mut response: Response, sender: ItemSender, provider: ProviderId) {
    let mut decoder = EventStreamDecoder::default();
    let mut tracker = FragmentTracker::default();

    loop {
        let bytes = match response.chunk().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(error) => {
                lost(&sender, format!("stream transport dropped: {error}")).await;
                return;
            }
        };
        let events = match decoder.feed(&bytes) {
            Ok(events) => events,
            Err(message) => return malformed(&sender, &provider, message).await,
        };
        if let Flow::Stop = forward(events, &sender, &provider, &mut tracker).await {
            return;
        }
    }

    let events = match decoder.flush() {
        Ok(events) => events,
        Err(message) => return malformed(&sender, &provider, message).await,
    };
    if let Flow::More = forward(events, &sender, &provider, &mut tracker).await {
        lost(&sender, "stream ended before [DONE] sentinel".to_owned()).await;
    }
}

async fn forward(
    events: Vec<String>,
    sender: &ItemSender,
    provider: &ProviderId,
    tracker: &mut FragmentTracker,
) -> Flow {
    for event in events {
        let frame = match decode_frame(&event, provider) {
            Ok(Frame::Delta(frame)) => frame,
            Ok(Frame::Done) => return Flow::Stop,
            Err(error) => {
                let _ = sender.send(Err(error)).await;
                return Flow::Stop;
            }
        };
        for item in tracker.items(frame) {
            // A closed receiver means the consumer stopped listening.
            if sender.send(Ok(item)).await.is_err() {
                return Flow::Stop;
            }
        }
    }
    Flow::More
}

async fn malformed(sender: &ItemSender, provider: &ProviderId, message: String) {
    let error = ProviderError::ResponseParse {
        provider: provider.clone(),
        message,
    };
    let _ = sender.send(Err(error)).await;
}

async fn lost(sender: &ItemSender, message: String) {
    let _ = sender.send(Ok(StreamItem::ConnectionLost(message))).await;
}
