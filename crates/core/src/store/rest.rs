//! REST proxy transport.
//!
//! Requests go to `{base}/api/apps/{appId}/...` with the application id header, an optional
//! bearer token and an optional functions-version header. Response bodies are decoded as JSON
//! or kept as text depending on the `Content-Type` header.

use super::{EntityStore, Patch, SortSpec};
use crate::config::RestSettings;
use crate::entities::Document;
use crate::{ConsoleError, ConsoleResult};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response};
use serde_json::Value;
use std::sync::Arc;

/// Thin HTTP client bound to one application on the REST proxy.
///
/// Shared by the entity transport, the identity lookup and the integration endpoints.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    settings: Arc<RestSettings>,
}

impl HttpClient {
    /// Build a client with the default headers for `settings`.
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Config` if the app id, token or version cannot be sent as a
    /// header value, or `ConsoleError::Transport` if the underlying client cannot be built.
    pub fn new(settings: RestSettings) -> ConsoleResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("X-App-Id", header_value(&settings.app_id)?);
        if let Some(token) = &settings.access_token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        }
        if let Some(version) = &settings.functions_version {
            headers.insert("Base44-Functions-Version", header_value(version)?);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            settings: Arc::new(settings),
        })
    }

    pub fn settings(&self) -> &RestSettings {
        &self.settings
    }

    /// Absolute URL for a path below the application root.
    pub fn app_url(&self, path: &str) -> String {
        format!(
            "{}/api/apps/{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.app_id,
            path.trim_start_matches('/')
        )
    }

    /// Send a JSON request and decode the response.
    ///
    /// # Errors
    ///
    /// `ConsoleError::Request` for any non-2xx status, `ConsoleError::Transport` when the
    /// request never completed.
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> ConsoleResult<Value> {
        let mut url = self.app_url(path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&encode_query(query));
        }
        let mut request = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        read_response(request.send().await?).await
    }

    /// Send a multipart form and decode the response.
    pub async fn send_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> ConsoleResult<Value> {
        let response = self
            .client
            .post(self.app_url(path))
            .multipart(form)
            .send()
            .await?;
        read_response(response).await
    }
}

/// Query string with every reserved byte percent-encoded, so a space travels as `%20`.
fn encode_query(pairs: &[(&str, String)]) -> String {
    fn encode(out: &mut String, text: &str) {
        for byte in text.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
                out.push(byte as char);
            } else {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }

    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        encode(&mut out, key);
        out.push('=');
        encode(&mut out, value);
    }
    out
}

fn header_value(value: &str) -> ConsoleResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ConsoleError::Config(format!("invalid header value: {e}")))
}

/// Decode a response body by content type, turning non-2xx statuses into errors.
pub(crate) async fn read_response(response: Response) -> ConsoleResult<Value> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let text = response.text().await?;
    let body = if is_json && !text.trim().is_empty() {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else if is_json {
        Value::Null
    } else {
        Value::String(text)
    };

    if status.is_success() {
        return Ok(body);
    }

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    tracing::error!(status = status.as_u16(), %message, "REST request failed");

    Err(ConsoleError::Request {
        status: status.as_u16(),
        message,
        body,
        retry_after,
    })
}

/// Map a 404 status, or a message mentioning "not found", to `ConsoleError::NotFound`.
fn normalize_not_found(err: ConsoleError, entity: &str, id: &str) -> ConsoleError {
    match &err {
        ConsoleError::Request {
            status, message, ..
        } if *status == 404 || message.to_lowercase().contains("not found") => {
            ConsoleError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            }
        }
        _ => err,
    }
}

fn into_document(value: Value) -> ConsoleResult<Document> {
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(ConsoleError::InvalidInput(format!(
            "expected a JSON object in the response, got {other}"
        ))),
    }
}

/// Entity CRUD over the REST proxy.
///
/// Cleared patch fields are omitted from the request body, so the server leaves them as they
/// are.
#[derive(Clone, Debug)]
pub struct RestStore {
    http: HttpClient,
}

impl RestStore {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }
}

fn entity_path(entity: &str, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("entities/{entity}/{id}"),
        None => format!("entities/{entity}"),
    }
}

impl EntityStore for RestStore {
    async fn list(&self, entity: &str, sort: Option<&SortSpec>) -> ConsoleResult<Vec<Document>> {
        let query: Vec<(&str, String)> = sort.map(|s| ("sort", s.to_string())).into_iter().collect();
        let value = self
            .http
            .send_json(Method::GET, &entity_path(entity, None), &query, None)
            .await?;
        match value {
            Value::Array(items) => items.into_iter().map(into_document).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(ConsoleError::InvalidInput(format!(
                "expected a JSON array listing {entity}, got {other}"
            ))),
        }
    }

    async fn get(&self, entity: &str, id: &str) -> ConsoleResult<Document> {
        let value = self
            .http
            .send_json(Method::GET, &entity_path(entity, Some(id)), &[], None)
            .await
            .map_err(|e| normalize_not_found(e, entity, id))?;
        match value {
            Value::Null => Err(ConsoleError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            }),
            other => into_document(other),
        }
    }

    async fn create(&self, entity: &str, data: Patch) -> ConsoleResult<Document> {
        let body = Value::Object(data.to_set_document());
        let value = self
            .http
            .send_json(Method::POST, &entity_path(entity, None), &[], Some(&body))
            .await?;
        into_document(value)
    }

    async fn update(&self, entity: &str, id: &str, patch: Patch) -> ConsoleResult<Document> {
        let body = Value::Object(patch.to_set_document());
        let value = self
            .http
            .send_json(Method::PUT, &entity_path(entity, Some(id)), &[], Some(&body))
            .await
            .map_err(|e| normalize_not_found(e, entity, id))?;
        into_document(value)
    }

    async fn delete(&self, entity: &str, id: &str) -> ConsoleResult<()> {
        self.http
            .send_json(Method::DELETE, &entity_path(entity, Some(id)), &[], None)
            .await
            .map_err(|e| normalize_not_found(e, entity, id))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::{Path, Query, RawQuery};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub(crate) async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub(crate) fn settings(base_url: String) -> RestSettings {
        RestSettings {
            base_url,
            app_id: "app_1".into(),
            access_token: Some("tok".into()),
            functions_version: Some("v7".into()),
        }
    }

    async fn list_foods(
        headers: AxumHeaders,
        RawQuery(raw): RawQuery,
        Query(q): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        Json(json!([{
            "id": "f1",
            "foodNameHe": "תרד",
            "appId": headers.get("x-app-id").and_then(|v| v.to_str().ok()),
            "auth": headers.get("authorization").and_then(|v| v.to_str().ok()),
            "version": headers.get("base44-functions-version").and_then(|v| v.to_str().ok()),
            "sort": q.get("sort"),
            "rawQuery": raw,
        }]))
    }

    async fn get_food(Path(id): Path<String>) -> impl IntoResponse {
        if id == "gone" {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Entity Food with ID gone not found" })),
            )
                .into_response()
        } else if id == "boom" {
            (StatusCode::INTERNAL_SERVER_ERROR, "plain failure").into_response()
        } else {
            Json(json!({ "id": id })).into_response()
        }
    }

    async fn put_food(Path(id): Path<String>, Json(body): Json<Value>) -> impl IntoResponse {
        let mut doc = body.as_object().cloned().unwrap_or_default();
        doc.insert("id".into(), json!(id));
        Json(Value::Object(doc))
    }

    fn router() -> Router {
        Router::new()
            .route("/api/apps/app_1/entities/Food", get(list_foods))
            .route(
                "/api/apps/app_1/entities/Food/:id",
                get(get_food).put(put_food),
            )
    }

    #[tokio::test]
    async fn list_sends_headers_and_sort() {
        let base = serve(router()).await;
        let store = RestStore::new(HttpClient::new(settings(base)).unwrap());

        let docs = store
            .list("Food", Some(&SortSpec::desc("created_date")))
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["appId"], "app_1");
        assert_eq!(docs[0]["auth"], "Bearer tok");
        assert_eq!(docs[0]["version"], "v7");
        assert_eq!(docs[0]["sort"], "created_date desc");
        assert_eq!(docs[0]["rawQuery"], "sort=created_date%20desc");
    }

    #[test]
    fn query_values_are_percent_encoded() {
        let query = [("sort", "a b".to_string()), ("q", "x&y=+ש".to_string())];
        assert_eq!(encode_query(&query), "sort=a%20b&q=x%26y%3D%2B%D7%A9");
    }

    #[tokio::test]
    async fn not_found_message_is_normalized() {
        let base = serve(router()).await;
        let store = RestStore::new(HttpClient::new(settings(base)).unwrap());

        let err = store.get("Food", "gone").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Entity Food with ID gone not found");
    }

    #[tokio::test]
    async fn text_error_body_falls_back_to_status_message() {
        let base = serve(router()).await;
        let store = RestStore::new(HttpClient::new(settings(base)).unwrap());

        match store.get("Food", "boom").await.unwrap_err() {
            ConsoleError::Request {
                status,
                message,
                body,
                ..
            } => {
                assert_eq!(status, 500);
                assert_eq!(message, "HTTP 500");
                assert_eq!(body, json!("plain failure"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_omits_cleared_fields() {
        let base = serve(router()).await;
        let store = RestStore::new(HttpClient::new(settings(base)).unwrap());

        let patch = Patch::new()
            .clear("labTestDeficiency")
            .set("labTestDeficiencyDetails", "merged");
        let doc = store.update("Food", "f1", patch).await.unwrap();

        assert_eq!(doc["id"], "f1");
        assert_eq!(doc["labTestDeficiencyDetails"], "merged");
        assert!(!doc.contains_key("labTestDeficiency"));
    }
}
