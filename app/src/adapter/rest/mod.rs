mod action;
mod automations;
mod backend;
mod devices;
mod groups;

pub use action::{Action, Binding, Command, CommandParams, Target};
pub use backend::SyncBackend;
pub use devices::{DEFAULT_PERMIT_JOIN_SECONDS, PermitJoin};
pub use groups::GroupStore;

use reqwest::header::{self, HeaderMap};
use reqwest::{Method, StatusCode, Url};
use reqwest_middleware::ClientWithMiddleware;

use crate::core::cbor::{self, Value};
use crate::error::{Error, TransportError};

/// Request/response side of the gateway. All bodies are CBOR.
#[derive(Debug, Clone)]
pub struct GatewayApi {
    client: ClientWithMiddleware,
    base_url: Url,
}

struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl GatewayApi {
    pub fn new(client: ClientWithMiddleware, base_url: Url) -> Self {
        Self { client, base_url }
    }

    async fn get_cbor(&self, segments: &[&str]) -> Result<Value, Error> {
        self.request_cbor(Method::GET, segments, None).await
    }

    async fn post_cbor(&self, segments: &[&str], body: &Value) -> Result<Value, Error> {
        self.request_cbor(Method::POST, segments, Some(body)).await
    }

    async fn patch_cbor(&self, segments: &[&str], body: &Value) -> Result<Value, Error> {
        self.request_cbor(Method::PATCH, segments, Some(body)).await
    }

    async fn delete_cbor(&self, segments: &[&str]) -> Result<Value, Error> {
        self.request_cbor(Method::DELETE, segments, None).await
    }

    async fn request_cbor(&self, method: Method, segments: &[&str], body: Option<&Value>) -> Result<Value, Error> {
        let response = self.request(method, segments, body).await?;
        Ok(cbor::decode_body(&response.body)?)
    }

    #[tracing::instrument(skip(self, body))]
    async fn request(&self, method: Method, segments: &[&str], body: Option<&Value>) -> Result<RawResponse, Error> {
        let url = self.url(segments)?;
        let path = url.path().to_owned();

        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.body(cbor::encode(body));
        }

        let response = request.send().await.map_err(|source| TransportError::Request {
            method: method.to_string(),
            path: path.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let details = if is_textual(response.headers()) {
                response.text().await.map(|t| t.trim().to_owned()).unwrap_or_default()
            } else {
                String::new()
            };

            return Err(TransportError::Status {
                method: method.to_string(),
                path,
                status: status.as_u16(),
                details,
            }
            .into());
        }

        // Chunked responses without a length header are common; read everything before decoding.
        let body = response.bytes().await.map_err(|source| TransportError::Body {
            method: method.to_string(),
            path: path.clone(),
            source,
        })?;

        tracing::debug!("{} {} -> {} ({} bytes)", method, path, status, body.len());

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }

    /// Base url joined with percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

// Only text and JSON error bodies are worth showing.
fn is_textual(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.type_() == mime::TEXT || (m.type_() == mime::APPLICATION && m.subtype() == mime::JSON))
}
