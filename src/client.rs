//! Client for the hosted generative AI chat endpoint.
//!
//! [`ChatModel`] is the seam the [`Responder`](crate::Responder) talks to;
//! [`GenAiClient`] implements it over HTTP with a streamed
//! `text/event-stream` response.

use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::Stream;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{ModelConfig, auth_token_from_env};
use crate::error::{Error, Result};
use crate::message::{Message, Role};
use crate::observability::{CLIENT_REQUESTS, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS};
use crate::sse::process_sse;

const CHAT_PATH: &str = "20231130/actions/chat";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A finite, non-restartable sequence of answer fragments.
///
/// Fragments arrive in the order the model emitted them.  The stream ends
/// when the model signals completion; an `Err` item means the remote service
/// failed and nothing further will follow.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One request to the chat model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Conversation to answer; the last message is the filled prompt.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens in the answer.
    pub max_tokens: u32,
}

/// A remote chat model that streams its answers.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Submits the request and returns the answer as a fragment stream.
    ///
    /// # Errors
    ///
    /// Returns a remote service error if the request cannot be sent or is
    /// rejected.  Failures after the stream starts arrive as stream items.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream>;
}

#[async_trait::async_trait]
impl<M: ChatModel + ?Sized> ChatModel for std::sync::Arc<M> {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        (**self).stream_chat(request).await
    }
}

//////////////////////////////////////////// wire types ////////////////////////////////////////////

/// Request format the service expects for a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiFormat {
    /// `cohere.*` models: one message plus a separate chat history.
    Cohere,
    /// Every other model family: a list of role-tagged messages.
    Generic,
}

impl ApiFormat {
    fn for_model(model_id: &str) -> Self {
        if model_id.starts_with("cohere.") {
            ApiFormat::Cohere
        } else {
            ApiFormat::Generic
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatDetails<'a> {
    compartment_id: &'a str,
    serving_mode: ServingMode<'a>,
    chat_request: WireChatRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServingMode<'a> {
    serving_type: &'static str,
    model_id: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireChatRequest {
    Cohere(CohereChatRequest),
    Generic(GenericChatRequest),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CohereChatRequest {
    api_format: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    chat_history: Vec<CohereMessage>,
    is_stream: bool,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct CohereMessage {
    role: &'static str,
    message: String,
}

impl From<&Message> for CohereMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role() {
            Role::User => "USER",
            Role::Assistant => "CHATBOT",
        };
        CohereMessage {
            role,
            message: message.content().to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenericChatRequest {
    api_format: &'static str,
    messages: Vec<WireMessage>,
    is_stream: bool,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireContent>,
}

#[derive(Serialize)]
struct WireContent {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role() {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        };
        WireMessage {
            role,
            content: vec![WireContent {
                kind: "TEXT",
                text: message.content().to_string(),
            }],
        }
    }
}

/////////////////////////////////////////// GenAiClient ////////////////////////////////////////////

/// HTTP client for the generative AI inference service.
#[derive(Debug, Clone)]
pub struct GenAiClient {
    client: ReqwestClient,
    chat_url: Url,
    model_id: String,
    compartment_id: String,
    api_format: ApiFormat,
    auth_token: Option<String>,
}

impl GenAiClient {
    /// Creates a client bound to the model named in `config`.
    ///
    /// A bearer token is taken from `IB_GENAI_AUTH_TOKEN` when set.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        Self::with_auth_token(config, auth_token_from_env())
    }

    /// Creates a client with an explicit bearer token.
    pub fn with_auth_token(config: &ModelConfig, auth_token: Option<String>) -> Result<Self> {
        config.validate()?;
        let mut base = config.endpoint_url()?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let chat_url = base.join(CHAT_PATH)?;

        // Streams may run long; only connecting is bounded.
        let client = ReqwestClient::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            chat_url,
            model_id: config.inference_model_id.clone(),
            compartment_id: config.compartment_id.clone(),
            api_format: ApiFormat::for_model(&config.inference_model_id),
            auth_token,
        })
    }

    /// The URL chat requests are posted to.
    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                Error::configuration(
                    "auth token contains characters not allowed in a header",
                    Some(crate::config::AUTH_TOKEN_VAR.to_string()),
                )
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn body<'a>(&'a self, request: &ChatRequest) -> ChatDetails<'a> {
        let chat_request = match self.api_format {
            ApiFormat::Cohere => {
                // The last message is the prompt; everything before it is history.
                let (message, history) = match request.messages.split_last() {
                    Some((last, history)) => (last.content().to_string(), history),
                    None => (String::new(), &[][..]),
                };
                WireChatRequest::Cohere(CohereChatRequest {
                    api_format: "COHERE",
                    message,
                    chat_history: history.iter().map(CohereMessage::from).collect(),
                    is_stream: true,
                    max_tokens: request.max_tokens,
                    temperature: request.temperature,
                })
            }
            ApiFormat::Generic => WireChatRequest::Generic(GenericChatRequest {
                api_format: "GENERIC",
                messages: request.messages.iter().map(WireMessage::from).collect(),
                is_stream: true,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            }),
        };
        ChatDetails {
            compartment_id: &self.compartment_id,
            serving_mode: ServingMode {
                serving_type: "ON_DEMAND",
                model_id: &self.model_id,
            },
            chat_request,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<Response> {
        let response = self
            .client
            .post(self.chat_url.clone())
            .headers(self.headers()?)
            .json(&self.body(request))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let request_id = response
            .headers()
            .get("opc-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        #[derive(Deserialize)]
        struct ErrorBody {
            code: Option<String>,
            message: Option<String>,
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody {
                code: Some(code),
                message: Some(message),
            }) => format!("{code}: {message}"),
            Ok(ErrorBody {
                message: Some(message),
                ..
            }) => message,
            _ => body,
        };
        match status_code {
            408 | 504 => Error::timeout(message, None),
            _ => Error::api(status_code, message, request_id),
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for GenAiClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = self.send(request).await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        match result {
            Ok(response) => {
                let fragments = process_sse(response.bytes_stream());
                Ok(Box::pin(fragments))
            }
            Err(err) => {
                CLIENT_REQUEST_ERRORS.click();
                Err(err)
            }
        }
    }
}
