//! Base provider trait and common types for SpatialMind
//!
//! This module defines the Provider trait that every model backend
//! implements, along with the message and response types shared by the
//! rephrase and answer stages.

use crate::error::Result;
use crate::image::ImageAttachment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message structure for a completion request
///
/// Represents one entry of the prompt: system instructions, a user
/// question (optionally with images), or an earlier assistant answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (system, user, assistant)
    pub role: String,
    /// Text content of the message
    pub content: String,
    /// Inline images attached to a user message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use spatialmind::providers::Message;
    ///
    /// let msg = Message::user("Which rivers cross Metropolis?");
    /// assert_eq!(msg.role, "user");
    /// assert!(msg.images.is_empty());
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Creates a new system message
    ///
    /// # Examples
    ///
    /// ```
    /// use spatialmind::providers::Message;
    ///
    /// let msg = Message::system("You write PostGIS queries");
    /// assert_eq!(msg.role, "system");
    /// ```
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Attach an image to this message
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Token usage reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: usize,
    /// Number of tokens in the completion
    pub completion_tokens: usize,
    /// Total tokens used (prompt + completion)
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    ///
    /// # Examples
    ///
    /// ```
    /// use spatialmind::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Completion text with optional token usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Assistant text
    pub content: String,
    /// Optional token usage information
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            usage: Some(usage),
        }
    }
}

/// Model-completion capability
///
/// Each backend turns an ordered prompt into free-form text. Failures
/// (transport, non-success status, malformed body) are provider errors;
/// the pipeline applies its own timeout around each call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Completes a prompt
    ///
    /// # Arguments
    ///
    /// * `messages` - System instructions, prior turns and the new question,
    ///   oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails or the response has no text
    async fn complete(&self, messages: &[Message]) -> Result<CompletionResponse>;

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Model identifier in use
    fn model(&self) -> String;
}
