use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Config;
use crate::types::{InputMessage, ResponseItem};
use crate::{Error, Result};

/// The AI model as seen by the agent: a request/response oracle.
#[async_trait]
pub trait Model: Send + Sync {
    /// Ask the computer-use model, which may answer with actions.
    async fn computer_use(&self, input: Vec<InputMessage>) -> Result<Vec<ResponseItem>>;

    /// Ask the vision model for prose only.
    async fn vision(&self, input: Vec<InputMessage>) -> Result<Vec<ResponseItem>>;
}

enum Auth {
    /// Azure resources take the key in an `api-key` header.
    ApiKey(String),
    Bearer(String),
}

/// HTTP client for the Responses API, bound to one endpoint for one run.
pub struct Brain {
    client: Client,
    url: String,
    auth: Auth,
    computer_model: String,
    vision_model: String,
    display: (u32, u32),
}

impl Brain {
    pub fn new(config: &Config) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::MissingConfig(vec!["AZURE_OPENAI_ENDPOINT"]));
        }
        let azure = is_azure_endpoint(&config.endpoint);
        let mut url = responses_url(&config.endpoint);
        if azure {
            url = format!("{url}?api-version={}", config.api_version.trim());
        }
        let auth = if azure {
            Auth::ApiKey(config.api_key.clone())
        } else {
            Auth::Bearer(config.api_key.clone())
        };

        Ok(Self {
            client: Client::new(),
            url,
            auth,
            computer_model: config.model_name.clone(),
            vision_model: config.vision_model_name.clone(),
            display: (config.display_width, config.display_height),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn computer_use_body(&self, input: &[InputMessage]) -> Value {
        json!({
            "model": self.computer_model,
            "input": input,
            "tools": [{
                "type": "computer_use_preview",
                "display_width": self.display.0,
                "display_height": self.display.1,
                "environment": "browser",
            }],
            "truncation": "auto",
        })
    }

    fn vision_body(&self, input: &[InputMessage]) -> Value {
        json!({
            "model": self.vision_model,
            "input": input,
        })
    }

    async fn send(&self, body: Value) -> Result<Vec<ResponseItem>> {
        let request = self.client.post(&self.url).json(&body);
        let request = match &self.auth {
            Auth::ApiKey(key) => request.header("api-key", key),
            Auth::Bearer(key) => request.header("Authorization", format!("Bearer {}", key)),
        };

        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;
        let json_resp: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);

        if !status.is_success() {
            let message = json_resp["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| raw.chars().take(200).collect());
            warn!("Model API error ({}): {}", status, message);
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Model replied: {}", json_resp);
        normalize_reply(json_resp)
    }
}

#[async_trait]
impl Model for Brain {
    async fn computer_use(&self, input: Vec<InputMessage>) -> Result<Vec<ResponseItem>> {
        self.send(self.computer_use_body(&input)).await
    }

    async fn vision(&self, input: Vec<InputMessage>) -> Result<Vec<ResponseItem>> {
        self.send(self.vision_body(&input)).await
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply {
    Responses { output: Vec<ResponseItem> },
    Chat { choices: Vec<ChatChoice> },
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Collapse either reply shape into the output-item list.
fn normalize_reply(json_resp: Value) -> Result<Vec<ResponseItem>> {
    match serde_json::from_value::<Reply>(json_resp)? {
        Reply::Responses { output } => Ok(output),
        Reply::Chat { choices } => Ok(choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .map(ResponseItem::message)
            .collect()),
    }
}

fn is_azure_endpoint(endpoint: &str) -> bool {
    url::Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .is_some_and(|host| host.ends_with(".azure.com"))
}

/// `{base}/responses`, where a base not already ending in `/v1` is treated as
/// an Azure resource root and gets `/openai/v1`.
fn responses_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/responses")
    } else {
        format!("{base}/openai/v1/responses")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> Config {
        Config {
            endpoint: endpoint.to_string(),
            api_key: "sk-test".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_responses_url() {
        assert_eq!(
            responses_url("https://res.openai.azure.com/"),
            "https://res.openai.azure.com/openai/v1/responses"
        );
        assert_eq!(
            responses_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1/responses"
        );
    }

    #[test]
    fn test_azure_detection() {
        assert!(is_azure_endpoint("https://res.openai.azure.com"));
        assert!(is_azure_endpoint("https://res.cognitiveservices.azure.com"));
        assert!(!is_azure_endpoint("https://api.openai.com/v1"));
        assert!(!is_azure_endpoint("garbage"));
    }

    #[test]
    fn test_azure_url_carries_api_version() {
        let brain = Brain::new(&config("https://res.openai.azure.com")).unwrap();
        assert_eq!(
            brain.url(),
            "https://res.openai.azure.com/openai/v1/responses?api-version=2025-03-01-preview"
        );
    }

    #[test]
    fn test_new_requires_endpoint() {
        assert!(matches!(
            Brain::new(&config("")),
            Err(Error::MissingConfig(_))
        ));
    }

    #[test]
    fn test_computer_use_body_declares_browser_tool() {
        let brain = Brain::new(&config("https://api.openai.com/v1")).unwrap();
        let body = brain.computer_use_body(&[InputMessage::user("hi")]);
        assert_eq!(body["model"], "computer-use-preview");
        assert_eq!(body["truncation"], "auto");
        assert_eq!(body["tools"][0]["type"], "computer_use_preview");
        assert_eq!(body["tools"][0]["environment"], "browser");
        assert_eq!(body["tools"][0]["display_width"], 1024);
        assert_eq!(body["tools"][0]["display_height"], 768);
        assert_eq!(body["input"][0]["role"], "user");
        assert_eq!(body["input"][0]["content"][0]["type"], "input_text");

        let body = brain.vision_body(&[]);
        assert_eq!(body["model"], "gpt-4o");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_normalize_chat_reply() {
        let items = normalize_reply(json!({
            "choices": [{"message": {"role": "assistant", "content": "Title: Layers"}}]
        }))
        .unwrap();
        assert_eq!(items, vec![ResponseItem::message("Title: Layers")]);
    }

    mod http_tests {
        use super::*;
        use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

        #[tokio::test]
        async fn test_computer_use_success() {
            let mock_server = MockServer::start().await;

            let body = json!({
                "id": "resp_1",
                "output": [
                    {"type": "reasoning", "summary": []},
                    {"type": "computer_call", "call_id": "call_1",
                     "action": {"type": "click", "button": "left", "x": 640, "y": 92}}
                ]
            });

            Mock::given(matchers::method("POST"))
                .and(matchers::path("/openai/v1/responses"))
                .and(matchers::header("authorization", "Bearer sk-test"))
                .and(matchers::body_partial_json(json!({
                    "model": "computer-use-preview",
                    "truncation": "auto"
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(&body))
                .expect(1)
                .mount(&mock_server)
                .await;

            let brain = Brain::new(&config(&mock_server.uri())).unwrap();
            let items = brain
                .computer_use(vec![InputMessage::user("click the search box")])
                .await
                .unwrap();

            assert_eq!(items.len(), 2);
            assert_eq!(items[0], ResponseItem::Other);
            match &items[1] {
                ResponseItem::ComputerCall { call_id, action } => {
                    assert_eq!(call_id.as_deref(), Some("call_1"));
                    assert_eq!(action.kind, "click");
                }
                other => panic!("expected computer_call, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_api_error_carries_message() {
            let mock_server = MockServer::start().await;

            let error_body =
                r#"{"error": {"message": "Invalid API key", "type": "invalid_request_error"}}"#;

            Mock::given(matchers::method("POST"))
                .respond_with(ResponseTemplate::new(401).set_body_string(error_body))
                .expect(1)
                .mount(&mock_server)
                .await;

            let brain = Brain::new(&config(&mock_server.uri())).unwrap();
            match brain.vision(vec![InputMessage::user("describe")]).await {
                Err(Error::Api { status, message }) => {
                    assert_eq!(status, 401);
                    assert_eq!(message, "Invalid API key");
                }
                other => panic!("expected Api error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_non_json_error_body() {
            let mock_server = MockServer::start().await;

            Mock::given(matchers::method("POST"))
                .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
                .mount(&mock_server)
                .await;

            let brain = Brain::new(&config(&mock_server.uri())).unwrap();
            match brain.vision(vec![]).await {
                Err(Error::Api { status, message }) => {
                    assert_eq!(status, 502);
                    assert_eq!(message, "Bad Gateway");
                }
                other => panic!("expected Api error, got {other:?}"),
            }
        }
    }
}
