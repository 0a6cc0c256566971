//! Rephrase-then-answer query generation
//!
//! Each question runs two model stages against a fresh schema snapshot:
//!
//! 1. **Rephrase**: prior turns plus the raw question become one standalone
//!    question.
//! 2. **Answer**: the standalone question, the schema and (for vision
//!    pipelines) an image become free-form text that should hold one fenced
//!    SQL block.
//!
//! The turn is recorded only when both stages succeed, so a failed request
//! leaves the conversation as it was.

pub mod conversation;

pub use conversation::{Conversation, Turn};

use crate::config::{PipelineConfig, PipelineSettings};
use crate::database::Database;
use crate::error::{Result, SpatialMindError};
use crate::extract::{extract_sql, ExtractedQuery};
use crate::image::ImageAttachment;
use crate::prompts;
use crate::providers::{CompletionResponse, Message, Provider};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Result of one successful question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AskOutcome {
    /// Standalone question from the rephrase stage
    pub rephrased_question: String,
    /// Raw answer-stage text
    pub answer: String,
    /// Extracted statement; `None` when the answer holds no SQL
    pub sql: Option<ExtractedQuery>,
}

/// A session's model pipeline and conversation
pub struct Pipeline {
    config: PipelineConfig,
    provider: Arc<dyn Provider>,
    conversation: Conversation,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn Provider>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            config,
            provider,
            conversation: Conversation::new(settings.history.max_turns),
            request_timeout: settings.request_timeout(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model(&self) -> String {
        self.provider.model()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn clear_history(&mut self) {
        self.conversation.clear();
        tracing::debug!(pipeline = self.config.tag(), "Cleared conversation history");
    }

    /// Answer one question
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if an image is sent to a text-only pipeline
    /// - `Database` if schema introspection fails
    /// - `Provider` or `Timeout` if either model stage fails
    pub async fn ask(
        &mut self,
        database: &dyn Database,
        question: &str,
        image: Option<ImageAttachment>,
    ) -> Result<AskOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SpatialMindError::InvalidRequest("question cannot be empty".to_string()).into());
        }
        if image.is_some() && !self.config.capability.accepts_images() {
            return Err(SpatialMindError::InvalidRequest(format!(
                "pipeline {} does not accept images",
                self.config.tag()
            ))
            .into());
        }

        let schema = database.introspect_schema().await?;
        let schema_text = schema.render(self.config.schema_detail());
        let history = self.conversation.messages();

        let rephrased = self.rephrase(question, &history).await?;
        let answer = self.answer(&rephrased, &schema_text, &history, image).await?;

        let sql = extract_sql(&answer);
        match &sql {
            Some(query) => tracing::info!(source = ?query.source, "Extracted SQL from answer"),
            None => tracing::info!("No SQL found in answer"),
        }

        self.conversation.push(Turn::new(rephrased.clone(), answer.clone()));

        Ok(AskOutcome {
            rephrased_question: rephrased,
            answer,
            sql,
        })
    }

    async fn rephrase(&self, question: &str, history: &[Message]) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(prompts::build_rephrase_prompt()));
        messages.extend_from_slice(history);
        messages.push(Message::user(prompts::question_message(question)));

        let response = self.complete("rephrase stage", &messages).await?;
        let rephrased = response.content.trim();
        if rephrased.is_empty() {
            return Err(
                SpatialMindError::Provider("rephrase stage returned no text".to_string()).into(),
            );
        }

        tracing::debug!(original = question, rephrased, "Rephrased question");
        Ok(rephrased.to_string())
    }

    async fn answer(
        &self,
        question: &str,
        schema: &str,
        history: &[Message],
        image: Option<ImageAttachment>,
    ) -> Result<String> {
        let mut user = Message::user(prompts::question_message(question));
        if let Some(image) = image {
            user = user.with_image(image);
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(prompts::build_answer_prompt(
            self.config.capability,
            schema,
        )));
        messages.extend_from_slice(history);
        messages.push(user);

        let response = self.complete("answer stage", &messages).await?;
        if response.content.trim().is_empty() {
            return Err(
                SpatialMindError::Provider("answer stage returned no text".to_string()).into(),
            );
        }
        Ok(response.content)
    }

    async fn complete(&self, stage: &str, messages: &[Message]) -> Result<CompletionResponse> {
        tracing::debug!(
            stage,
            provider = self.provider.name(),
            messages = messages.len(),
            "Calling model"
        );

        let response = tokio::time::timeout(self.request_timeout, self.provider.complete(messages))
            .await
            .map_err(|_| {
                tracing::warn!(stage, "Model call timed out");
                SpatialMindError::Timeout {
                    operation: stage.to_string(),
                    seconds: self.request_timeout.as_secs(),
                }
            })??;

        if let Some(usage) = response.usage {
            tracing::debug!(
                stage,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Model call finished"
            );
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{QueryResult, SchemaDescription};
    use crate::providers::MockProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticDatabase {
        fail: bool,
        introspections: AtomicUsize,
    }

    impl StaticDatabase {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                introspections: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Database for StaticDatabase {
        async fn introspect_schema(&self) -> Result<SchemaDescription> {
            self.introspections.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SpatialMindError::Database("catalog unavailable".to_string()).into());
            }
            Ok(SchemaDescription::default())
        }

        async fn execute(&self, _sql: &str) -> QueryResult {
            QueryResult::failure("not used")
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn target(&self) -> String {
            "static".to_string()
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            request_timeout_seconds: 5,
            ..Default::default()
        }
    }

    fn scripted(replies: Vec<&'static str>) -> MockProvider {
        let mut mock = MockProvider::new();
        let mut seq = mockall::Sequence::new();
        for reply in replies {
            mock.expect_complete()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(CompletionResponse::new(reply)));
        }
        mock.expect_name().return_const("mock");
        mock.expect_model().returning(|| "mock-model".to_string());
        mock
    }

    fn pipeline(tag: &str, provider: MockProvider) -> Pipeline {
        Pipeline::new(tag.parse().unwrap(), Arc::new(provider), &settings())
    }

    #[tokio::test]
    async fn test_ask_records_rephrased_turn() {
        let provider = scripted(vec![
            "Which cities have more than 1 million people?",
            "```sql\nSELECT c.name FROM cities c WHERE c.population > 1000000;\n```",
        ]);
        let mut pipeline = pipeline("ollama_text", provider);
        let db = StaticDatabase::new(false);

        let outcome = pipeline.ask(&db, "cities over 1 million", None).await.unwrap();
        assert_eq!(
            outcome.sql.unwrap().sql,
            "SELECT c.name FROM cities c WHERE c.population > 1000000;"
        );
        assert_eq!(pipeline.conversation().len(), 1);
        assert_eq!(
            pipeline.conversation().turns()[0].question,
            "Which cities have more than 1 million people?"
        );
        assert_eq!(db.introspections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prose_answer_has_no_sql() {
        let provider = scripted(vec!["What tables exist?", "There is one table: cities."]);
        let mut pipeline = pipeline("gemini_text", provider);
        let outcome = pipeline
            .ask(&StaticDatabase::new(false), "what tables exist?", None)
            .await
            .unwrap();
        assert!(outcome.sql.is_none());
        assert_eq!(pipeline.conversation().len(), 1);
    }

    #[tokio::test]
    async fn test_second_question_sees_history() {
        let mut mock = MockProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_complete()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|messages| {
                assert_eq!(messages.len(), 2);
                Ok(CompletionResponse::new("```sql\nSELECT 1;\n```"))
            });
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|messages| {
                // system, prior user, prior assistant, new question
                assert_eq!(messages.len(), 4);
                assert_eq!(messages[1].role, "user");
                assert_eq!(messages[2].role, "assistant");
                Ok(CompletionResponse::new("Same but for towns"))
            });
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CompletionResponse::new("```sql\nSELECT 2;\n```")));
        mock.expect_name().return_const("mock");

        let mut pipeline = pipeline("ollama_text", mock);
        let db = StaticDatabase::new(false);
        pipeline.ask(&db, "first", None).await.unwrap();
        let outcome = pipeline.ask(&db, "same for towns", None).await.unwrap();
        assert_eq!(outcome.sql.unwrap().sql, "SELECT 2;");
        assert_eq!(pipeline.conversation().len(), 2);
    }

    #[tokio::test]
    async fn test_stage_failure_leaves_history_unchanged() {
        let mut mock = MockProvider::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(SpatialMindError::Provider("boom".to_string()).into()));
        mock.expect_name().return_const("mock");

        let mut pipeline = pipeline("ollama_text", mock);
        let err = pipeline
            .ask(&StaticDatabase::new(false), "anything", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpatialMindError>(),
            Some(SpatialMindError::Provider(_))
        ));
        assert!(pipeline.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_introspection_failure_skips_model() {
        let mut mock = MockProvider::new();
        mock.expect_complete().never();
        let mut pipeline = pipeline("gemini_text", mock);
        let err = pipeline
            .ask(&StaticDatabase::new(true), "anything", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpatialMindError>(),
            Some(SpatialMindError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_image_rejected_for_text_pipeline() {
        let mut mock = MockProvider::new();
        mock.expect_complete().never();
        let mut pipeline = pipeline("ollama_text", mock);
        let image = ImageAttachment {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        };
        let err = pipeline
            .ask(&StaticDatabase::new(false), "what is this?", Some(image))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpatialMindError>(),
            Some(SpatialMindError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_image_reaches_answer_stage_only() {
        let mut mock = MockProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|messages| {
                assert!(messages.iter().all(|m| m.images.is_empty()));
                Ok(CompletionResponse::new("Which parks appear in this map?"))
            });
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|messages| {
                assert_eq!(messages.last().unwrap().images.len(), 1);
                Ok(CompletionResponse::new("```sql\nSELECT p.name FROM parks p;\n```"))
            });
        mock.expect_name().return_const("mock");

        let mut pipeline = pipeline("gemini_vision", mock);
        let image = ImageAttachment {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        };
        let outcome = pipeline
            .ask(&StaticDatabase::new(false), "which parks are these?", Some(image))
            .await
            .unwrap();
        assert!(outcome.sql.is_some());
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let mut mock = MockProvider::new();
        mock.expect_complete().never();
        let mut pipeline = pipeline("ollama_text", mock);
        assert!(pipeline
            .ask(&StaticDatabase::new(false), "   ", None)
            .await
            .is_err());
    }
}
