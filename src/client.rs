use anyhow::{Context, Result};
use reqwest::Response;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::protocol::{
    AgentConfig, ChatResponse, ConfigUpdate, ConversationList, HealthResponse, History, ModelList,
};

/// Providers the backend can be switched to.
pub const PROVIDERS: &[&str] = &["ollama", "openai", "anthropic", "deepseek"];

/// Built-in model choices per provider.
pub fn model_options(provider: &str) -> &'static [&'static str] {
    match provider {
        "ollama" => &[
            "llama3.2:latest",
            "llama2",
            "codellama",
            "mistral",
            "mixtral",
            "neural-chat",
            "starling-lm",
        ],
        "openai" => &["gpt-4", "gpt-4-turbo", "gpt-3.5-turbo", "gpt-4o", "gpt-4o-mini"],
        "anthropic" => &[
            "claude-3-opus-20240229",
            "claude-3-sonnet-20240229",
            "claude-3-haiku-20240307",
            "claude-2.1",
            "claude-2.0",
        ],
        "deepseek" => &["deepseek-chat", "deepseek-coder"],
        _ => &[],
    }
}

/// Fresh id for a conversation the backend has not seen yet.
pub fn new_conversation_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("conv_{}", &id[..8])
}

/// HTTP client for the agent backend's REST API.
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .context("Failed to connect to agent backend")?;
        let response = ensure_success(response, "Health check failed").await?;
        response
            .json::<HealthResponse>()
            .await
            .context("Failed to parse health response")
    }

    pub async fn list_conversations(&self) -> Result<ConversationList> {
        let response = self
            .client
            .get(self.url("/api/conversations/"))
            .send()
            .await
            .context("Failed to list conversations")?;
        let response = ensure_success(response, "Failed to list conversations").await?;
        response
            .json::<ConversationList>()
            .await
            .context("Failed to parse conversation list")
    }

    pub async fn history(&self, conversation_id: &str) -> Result<History> {
        let url = self.url(&format!(
            "/api/chat/{}/history",
            urlencoding::encode(conversation_id)
        ));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to load history for {conversation_id}"))?;
        let response = ensure_success(response, "Failed to load history").await?;
        response
            .json::<History>()
            .await
            .context("Failed to parse history response")
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let url = self.url(&format!(
            "/api/conversations/{}",
            urlencoding::encode(conversation_id)
        ));
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("Failed to delete {conversation_id}"))?;
        ensure_success(response, "Failed to delete conversation").await?;
        debug!("Deleted conversation {}", conversation_id);
        Ok(())
    }

    pub async fn get_config(&self) -> Result<AgentConfig> {
        let response = self
            .client
            .get(self.url("/api/config/"))
            .send()
            .await
            .context("Failed to load agent config")?;
        let response = ensure_success(response, "Failed to load agent config").await?;
        response
            .json::<AgentConfig>()
            .await
            .context("Failed to parse agent config")
    }

    /// Apply a partial config update. Returns the backend's warning, if any
    /// (e.g. a provider selected without a usable key).
    pub async fn update_config(&self, update: &ConfigUpdate) -> Result<Option<String>> {
        let response = self
            .client
            .put(self.url("/api/config/"))
            .json(update)
            .send()
            .await
            .context("Failed to update agent config")?;
        let response = ensure_success(response, "Failed to update agent config").await?;
        let body: Value = response.json().await.unwrap_or_default();
        let warning = body
            .get("warning")
            .and_then(|v| v.as_str())
            .map(String::from);
        if let Some(w) = &warning {
            warn!("Config update warning: {}", w);
        }
        Ok(warning)
    }

    pub async fn ollama_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/api/config/ollama-models"))
            .send()
            .await
            .context("Failed to list ollama models")?;
        let response = ensure_success(response, "Failed to list ollama models").await?;
        let list = response
            .json::<ModelList>()
            .await
            .context("Failed to parse model list")?;
        Ok(list.models)
    }

    /// Models to offer for `provider`. Ollama prefers the live list and
    /// falls back to the built-in one.
    pub async fn available_models(&self, provider: &str) -> Vec<String> {
        let builtin = || -> Vec<String> {
            model_options(provider).iter().map(|m| m.to_string()).collect()
        };
        if provider != "ollama" {
            return builtin();
        }
        match self.ollama_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => builtin(),
            Err(e) => {
                warn!("Falling back to built-in ollama models: {:#}", e);
                builtin()
            }
        }
    }

    /// Non-streaming chat, used when the session channel is down.
    pub async fn send_chat(&self, message: &str, conversation_id: &str) -> Result<ChatResponse> {
        let body = json!({
            "message": message,
            "conversation_id": conversation_id,
        });
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await
            .context("Failed to send chat request")?;
        let response = ensure_success(response, "Chat request failed").await?;
        response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse chat response")
    }
}

/// Pass 2xx through; otherwise bail with the backend's `detail` when it
/// sends one, or the raw body.
async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or(text);
    anyhow::bail!("{} ({}): {}", what, status, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};

    async fn serve(app: Router) -> ApiClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ApiClient::new(&format!("http://{addr}/"))
    }

    #[test]
    fn test_model_options() {
        assert!(model_options("deepseek").contains(&"deepseek-chat"));
        assert_eq!(model_options("openai").len(), 5);
        assert!(model_options("unknown").is_empty());
    }

    #[test]
    fn test_new_conversation_id_shape() {
        let id = new_conversation_id();
        assert!(id.starts_with("conv_"));
        assert_eq!(id.len(), 13);
        assert_ne!(id, new_conversation_id());
    }

    #[tokio::test]
    async fn test_list_and_history() {
        let app = Router::new()
            .route(
                "/api/conversations/",
                get(|| async {
                    Json(json!({
                        "conversations": [
                            { "id": "conv_1", "title": "Disk", "message_count": 2,
                              "updated_at": "2024-12-25T10:30:00" }
                        ],
                        "total": 1
                    }))
                }),
            )
            .route(
                "/api/chat/{id}/history",
                get(|Path(id): Path<String>| async move {
                    Json(json!({
                        "total": 1,
                        "messages": [{ "role": "user", "content": format!("hello from {id}") }]
                    }))
                }),
            );
        let client = serve(app).await;

        let list = client.list_conversations().await.unwrap();
        assert_eq!(list.conversations.len(), 1);
        assert_eq!(list.conversations[0].display_title(), "Disk");

        let history = client.history("conv_1").await.unwrap();
        assert_eq!(history.messages[0].content.as_deref(), Some("hello from conv_1"));
    }

    #[tokio::test]
    async fn test_delete_surfaces_detail() {
        let app = Router::new().route(
            "/api/conversations/{id}",
            delete(|Path(id): Path<String>| async move {
                if id == "conv_ok" {
                    (StatusCode::OK, Json(json!({ "status": "success" })))
                } else {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({ "detail": "Conversation not found" })),
                    )
                }
            }),
        );
        let client = serve(app).await;

        client.delete_conversation("conv_ok").await.unwrap();
        let err = client.delete_conversation("conv_missing").await.unwrap_err();
        assert!(err.to_string().contains("Conversation not found"));
    }

    #[tokio::test]
    async fn test_update_config_returns_warning() {
        let app = Router::new().route(
            "/api/config/",
            get(|| async {
                Json(json!({ "llm_provider": "ollama", "model": "llama2", "autonomy_level": "semi" }))
            })
            .put(|Json(body): Json<Value>| async move {
                let warning = (body.get("llm_provider") == Some(&json!("openai")))
                    .then_some("No API key for openai");
                Json(json!({ "status": "ok", "warning": warning }))
            }),
        );
        let client = serve(app).await;

        assert_eq!(client.get_config().await.unwrap().model, "llama2");
        let update = ConfigUpdate {
            llm_provider: Some("openai".to_string()),
            ..Default::default()
        };
        assert_eq!(
            client.update_config(&update).await.unwrap().as_deref(),
            Some("No API key for openai")
        );
        assert_eq!(client.update_config(&ConfigUpdate::default()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ollama_models_fall_back_when_empty() {
        let app = Router::new().route(
            "/api/config/ollama-models",
            get(|| async { Json(json!({ "models": [] })) }),
        );
        let client = serve(app).await;
        let models = client.available_models("ollama").await;
        assert_eq!(models.first().map(String::as_str), Some("llama3.2:latest"));

        let app = Router::new().route(
            "/api/config/ollama-models",
            get(|| async { Json(json!({ "models": ["qwen2:7b"] })) }),
        );
        let client = serve(app).await;
        assert_eq!(client.available_models("ollama").await, vec!["qwen2:7b"]);
    }

    #[tokio::test]
    async fn test_send_chat_and_health() {
        let app = Router::new()
            .route(
                "/api/chat",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({
                        "conversation_id": body["conversation_id"],
                        "message": format!("echo: {}", body["message"].as_str().unwrap_or("")),
                        "tool_calls": null,
                        "iterations": 1
                    }))
                }),
            )
            .route(
                "/health",
                get(|| async { Json(json!({ "status": "healthy", "service": "agent", "version": "1.0.0" })) }),
            );
        let client = serve(app).await;

        let resp = client.send_chat("hi", "conv_9").await.unwrap();
        assert_eq!(resp.conversation_id, "conv_9");
        assert_eq!(resp.message, "echo: hi");
        assert!(resp.tool_calls.is_none());
        assert_eq!(client.health().await.unwrap().status, "healthy");
    }

    #[tokio::test]
    async fn test_server_error_without_detail() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = serve(app).await;
        let err = client.send_chat("hi", "conv_1").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("boom"));
    }
}
