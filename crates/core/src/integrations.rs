//! External collaborators: text generation and file upload.

use crate::config::ConsoleConfig;
use crate::store::rest::{read_response, HttpClient};
use crate::store::Backend;
use crate::{ConsoleError, ConsoleResult};
use chrono::Utc;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::LazyLock;

const INVOKE_LLM_PATH: &str = "integration-endpoints/Core/InvokeLLM";
const UPLOAD_FILE_PATH: &str = "integration-endpoints/Core/UploadFile";

/// A text-generation request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_context_from_internet: Option<bool>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            add_context_from_internet: Some(false),
        }
    }
}

/// Read a generator reply: a bare string, a `response` field, or the JSON text itself.
pub fn interpret_reply(reply: Value) -> String {
    match reply {
        Value::String(text) => text,
        Value::Object(ref map) => match map.get("response") {
            Some(Value::String(text)) => text.clone(),
            _ => reply.to_string(),
        },
        other => other.to_string(),
    }
}

/// Where generation requests go.
#[derive(Clone, Debug)]
pub enum TextGenerator {
    /// A directly configured endpoint with an optional bearer token.
    Direct {
        client: reqwest::Client,
        url: String,
        token: Option<String>,
    },
    /// The REST proxy's built-in generation endpoint.
    Rest(HttpClient),
    Unconfigured,
}

impl TextGenerator {
    /// Prefer an explicitly configured endpoint, then the REST proxy.
    pub fn from_config(cfg: &ConsoleConfig, backend: &Backend) -> Self {
        if let Some(url) = cfg.ai_endpoint_url() {
            return TextGenerator::Direct {
                client: reqwest::Client::new(),
                url: url.to_string(),
                token: cfg.ai_endpoint_token().map(str::to_string),
            };
        }
        match backend {
            Backend::Rest(store) => TextGenerator::Rest(store.http().clone()),
            Backend::Document(_) => TextGenerator::Unconfigured,
        }
    }

    /// Run one prompt.
    ///
    /// # Errors
    ///
    /// `ConsoleError::TextGeneration` when no endpoint is configured or the endpoint answers
    /// with an error; `ConsoleError::Transport` when it cannot be reached.
    pub async fn generate(&self, request: &GenerateRequest) -> ConsoleResult<String> {
        let body = serde_json::to_value(request)?;
        let reply = match self {
            TextGenerator::Direct { client, url, token } => {
                let mut call = client
                    .post(url)
                    .header(CONTENT_TYPE, "application/json")
                    .json(&body);
                if let Some(token) = token {
                    call = call.header(AUTHORIZATION, format!("Bearer {token}"));
                }
                read_response(call.send().await?)
                    .await
                    .map_err(endpoint_error)?
            }
            TextGenerator::Rest(http) => {
                http.send_json(Method::POST, INVOKE_LLM_PATH, &[], Some(&body))
                    .await?
            }
            TextGenerator::Unconfigured => {
                return Err(ConsoleError::TextGeneration(
                    "AI endpoint is not configured. Set NUTRI_AI_ENDPOINT_URL.".into(),
                ));
            }
        };
        Ok(interpret_reply(reply))
    }
}

fn endpoint_error(err: ConsoleError) -> ConsoleError {
    match err {
        ConsoleError::Request { status, body, .. } => {
            let message = body
                .get("message")
                .map(|m| match m {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("AI endpoint error ({status})"));
            ConsoleError::TextGeneration(message)
        }
        other => other,
    }
}

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9._-]").unwrap());

/// Replace anything outside `[a-zA-Z0-9._-]` with `_`.
pub fn safe_file_name(name: &str) -> String {
    UNSAFE_FILE_CHARS.replace_all(name, "_").into_owned()
}

/// Where uploaded files go.
#[derive(Clone, Debug)]
pub enum Uploader {
    /// The REST proxy's upload endpoint.
    Rest(HttpClient),
    /// A local directory next to the document store.
    Local { dir: PathBuf },
}

impl Uploader {
    pub fn from_config(cfg: &ConsoleConfig, backend: &Backend) -> Self {
        match backend {
            Backend::Rest(store) => Uploader::Rest(store.http().clone()),
            Backend::Document(_) => Uploader::Local {
                dir: cfg.document_dir().join("uploads"),
            },
        }
    }

    /// Store `bytes` and return a URL that resolves to them.
    ///
    /// # Errors
    ///
    /// `ConsoleError::Upload` when the upload is rejected or the reply carries no
    /// `file_url`.
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ConsoleResult<String> {
        match self {
            Uploader::Rest(http) => {
                let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
                let form = reqwest::multipart::Form::new().part("file", part);
                let reply = http
                    .send_multipart(UPLOAD_FILE_PATH, form)
                    .await
                    .map_err(|e| match e {
                        ConsoleError::Request { status, .. } => {
                            ConsoleError::Upload(format!("Upload failed with status {status}"))
                        }
                        other => other,
                    })?;
                reply
                    .get("file_url")
                    .and_then(Value::as_str)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ConsoleError::Upload("Upload succeeded but file_url is missing".into())
                    })
            }
            Uploader::Local { dir } => {
                std::fs::create_dir_all(dir)?;
                let key = format!(
                    "{}_{}",
                    Utc::now().timestamp_millis(),
                    safe_file_name(file_name)
                );
                let path = dir.join(key);
                std::fs::write(&path, bytes)?;
                let absolute = std::fs::canonicalize(&path)?;
                Ok(format!("file://{}", absolute.display()))
            }
        }
    }
}
