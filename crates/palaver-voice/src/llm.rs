//! Language-model querying for dialogue turns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use palaver_types::{ChatTurn, LlmOptions};

use crate::config::SessionConfig;
use crate::error::{self, SessionError};
use crate::providers::LlmProvider;

pub struct LlmService {
    provider: Arc<dyn LlmProvider>,
    options: LlmOptions,
    system_prompt: String,
    closed: AtomicBool,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &SessionConfig) -> Self {
        LlmService {
            provider,
            options: config.llm.clone(),
            system_prompt: config.system_prompt.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// One completion over the session's trimmed history. The session's
    /// system prompt and sampling options are applied on every call.
    pub async fn query(&self, turns: &[ChatTurn]) -> Result<String, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::recoverable("llm", "service closed"));
        }
        if turns.is_empty() {
            return Err(SessionError::recoverable("llm", "empty query"));
        }
        if !self.system_prompt.is_empty() {
            self.provider.set_system_prompt(&self.system_prompt).await;
        }
        self.provider
            .query(turns, &self.options)
            .await
            .map_err(|err| error::classify("llm", &err))
    }

    /// Stops accepting queries and releases the provider. Idempotent.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.provider.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ProviderError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
        seen_turns: Mutex<usize>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn set_system_prompt(&self, prompt: &str) {
            self.prompts.lock().unwrap().push(prompt.to_owned());
        }

        async fn query(
            &self,
            turns: &[ChatTurn],
            _options: &LlmOptions,
        ) -> Result<String, ProviderError> {
            *self.seen_turns.lock().unwrap() = turns.len();
            self.reply.clone().map_err(ProviderError::new)
        }

        async fn close(&self) {}
    }

    fn config_with_prompt(prompt: &str) -> SessionConfig {
        SessionConfig {
            system_prompt: prompt.to_owned(),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn query_applies_the_system_prompt_and_history() {
        let provider = Arc::new(ScriptedLlm {
            reply: Ok("sure thing".to_owned()),
            prompts: Mutex::new(Vec::new()),
            seen_turns: Mutex::new(0),
        });
        let service = LlmService::new(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            &config_with_prompt("be brief"),
        );

        let turns = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello"), ChatTurn::user("bye")];
        let reply = service.query(&turns).await.expect("query");
        assert_eq!(reply, "sure thing");
        assert_eq!(provider.prompts.lock().unwrap().as_slice(), ["be brief"]);
        assert_eq!(*provider.seen_turns.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn provider_failures_come_back_classified() {
        let provider = Arc::new(ScriptedLlm {
            reply: Err("rate limit exceeded".to_owned()),
            prompts: Mutex::new(Vec::new()),
            seen_turns: Mutex::new(0),
        });
        let service = LlmService::new(provider, &config_with_prompt(""));

        let err = service
            .query(&[ChatTurn::user("hi")])
            .await
            .expect_err("provider failure should surface");
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.service, "llm");
    }

    #[tokio::test]
    async fn closed_service_and_empty_history_are_rejected() {
        let provider = Arc::new(ScriptedLlm {
            reply: Ok("x".to_owned()),
            prompts: Mutex::new(Vec::new()),
            seen_turns: Mutex::new(0),
        });
        let service = LlmService::new(provider, &config_with_prompt(""));

        assert!(service.query(&[]).await.is_err());
        service.close().await;
        assert!(service.query(&[ChatTurn::user("hi")]).await.is_err());
    }
}
