//! Scripted LLM Provider
//!
//! For testing and offline demos. Replays a fixed list of replies and records
//! every message list it was asked to complete.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{
    Completion, CompletionStream, GenerationOptions, LlmProvider, ModelInfo, StreamChunk,
};

/// One scripted provider response
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Return this text
    Reply(String),
    /// Fail with a retryable outage
    Unavailable(String),
    /// Fail with a non-retryable provider error
    Fail(String),
}

impl From<&str> for ScriptStep {
    fn from(text: &str) -> Self {
        Self::Reply(text.to_string())
    }
}

/// Provider that answers from a script
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    /// Reply used once the script runs out
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new<S: Into<ScriptStep>>(steps: impl IntoIterator<Item = S>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().map(Into::into).collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider that gives the same reply forever
    pub fn repeating(text: impl Into<String>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Some(text.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Message lists received so far, one entry per completion call
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of completion calls made
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_reply(&self, messages: &[Message]) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match step {
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Unavailable(msg)) => Err(AgentError::ProviderUnavailable(msg)),
            Some(ScriptStep::Fail(msg)) => Err(AgentError::Provider(msg)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::Provider("script exhausted".into())),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let text = self.next_reply(messages)?;
        Ok(Completion::text(&options.model, text))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let text = self.next_reply(messages)?;

        // Split after each space so concatenated deltas equal the reply
        let mut chunks: Vec<Result<StreamChunk>> = text
            .split_inclusive(' ')
            .map(|piece| {
                Ok(StreamChunk {
                    delta: piece.to_string(),
                    done: false,
                    usage: None,
                })
            })
            .collect();
        chunks.push(Ok(StreamChunk {
            delta: String::new(),
            done: true,
            usage: None,
        }));

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "Scripted".into(),
            context_length: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_script_then_exhausted() {
        let provider = ScriptedProvider::new(["first"]);
        let opts = GenerationOptions::default();

        let reply = provider.complete(&[Message::user("hi")], &opts).await.unwrap();
        assert_eq!(reply.content, "first");
        assert!(provider.complete(&[], &opts).await.is_err());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_reassembles_reply() {
        let provider = ScriptedProvider::repeating("water the tomatoes weekly");
        let mut stream = provider
            .complete_stream(&[], &GenerationOptions::default())
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap().delta);
        }
        assert_eq!(text, "water the tomatoes weekly");
    }
}
