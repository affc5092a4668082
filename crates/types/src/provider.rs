use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Context, ProviderError, ProviderId, StreamItem};

pub type ProviderStream = mpsc::Receiver<Result<StreamItem, ProviderError>>;

/// Streaming chat-completion backend.
///
/// Items arrive in generation order. A well-behaved stream ends with a
/// [`StreamItem::FinishReason`]; a stream that stops early yields
/// [`StreamItem::ConnectionLost`] instead.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_id(&self) -> &ProviderId;

    async fn stream(
        &self,
        context: &Context,
        buffer_size: usize,
    ) -> Result<ProviderStream, ProviderError>;
}
