//! Model backend tests against mock HTTP servers

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spatialmind::config::{GeminiConfig, OllamaConfig};
use spatialmind::error::{classify, SpatialMindError};
use spatialmind::image::ImageAttachment;
use spatialmind::providers::{GeminiProvider, Message, OllamaProvider, Provider};

const GEMINI_PATH: &str = "/v1beta/models/gemini-test:generateContent";

fn ollama(server: &MockServer) -> OllamaProvider {
    let config = OllamaConfig {
        host: server.uri(),
        model: "llama3.1:8b".to_string(),
        temperature: 0.8,
    };
    OllamaProvider::new(config, Duration::from_secs(5)).unwrap()
}

fn gemini(server: &MockServer) -> GeminiProvider {
    let config = GeminiConfig {
        api_base: server.uri(),
        model: "gemini-test".to_string(),
        temperature: 0.7,
        api_key: Some("test-key".to_string()),
    };
    GeminiProvider::new(config, Duration::from_secs(5)).unwrap()
}

fn image() -> ImageAttachment {
    ImageAttachment {
        mime_type: "image/png".to_string(),
        data: "iVBORw0KGgo=".to_string(),
    }
}

#[tokio::test]
async fn test_ollama_chat_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "messages": [
                {"role": "system", "content": "You write SQL."},
                {"role": "user", "content": "Question: cities?", "images": ["iVBORw0KGgo="]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.1:8b",
            "message": {"role": "assistant", "content": "```sql\nSELECT 1;\n```"},
            "done": true,
            "prompt_eval_count": 42,
            "eval_count": 7
        })))
        .expect(1)
        .mount(&server)
        .await;

    let messages = [
        Message::system("You write SQL."),
        Message::user("Question: cities?").with_image(image()),
    ];
    let response = ollama(&server).complete(&messages).await.unwrap();

    assert_eq!(response.content, "```sql\nSELECT 1;\n```");
    let usage = response.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 42);
    assert_eq!(usage.completion_tokens, 7);
}

#[tokio::test]
async fn test_ollama_error_status_is_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .expect(1)
        .mount(&server)
        .await;

    let err = ollama(&server)
        .complete(&[Message::user("hi")])
        .await
        .unwrap_err();

    match classify(&err) {
        Some(SpatialMindError::Provider(message)) => assert!(message.contains("model not found")),
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ollama_slow_response_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({"message": {"role": "assistant", "content": "late"}})),
        )
        .mount(&server)
        .await;

    let config = OllamaConfig {
        host: server.uri(),
        model: "llama3.1:8b".to_string(),
        temperature: 0.8,
    };
    let provider = OllamaProvider::new(config, Duration::from_millis(200)).unwrap();
    let err = provider.complete(&[Message::user("hi")]).await.unwrap_err();

    assert!(matches!(
        classify(&err),
        Some(SpatialMindError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_gemini_generate_content_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "systemInstruction": {"parts": [{"text": "You write SQL."}]},
            "contents": [
                {"role": "user", "parts": [{"text": "Question: first"}]},
                {"role": "model", "parts": [{"text": "SELECT 1;"}]}
            ],
            "generationConfig": {"temperature": 0.7}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "```sql\nSELECT 2;\n```"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 9}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let messages = [
        Message::system("You write SQL."),
        Message::user("Question: first"),
        Message::assistant("SELECT 1;"),
        Message::user("Question: second"),
    ];
    let response = gemini(&server).complete(&messages).await.unwrap();

    assert_eq!(response.content, "```sql\nSELECT 2;\n```");
    assert_eq!(response.usage.unwrap().prompt_tokens, 120);
}

#[tokio::test]
async fn test_gemini_sends_inline_image() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(body_partial_json(json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": "Question: what is shown?"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "A river delta."}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let messages = [Message::user("Question: what is shown?").with_image(image())];
    let response = gemini(&server).complete(&messages).await.unwrap();
    assert_eq!(response.content, "A river delta.");
    assert!(response.usage.is_none());
}

#[tokio::test]
async fn test_gemini_without_candidates_is_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = gemini(&server)
        .complete(&[Message::user("hi")])
        .await
        .unwrap_err();
    assert!(matches!(
        classify(&err),
        Some(SpatialMindError::Provider(_))
    ));
}
