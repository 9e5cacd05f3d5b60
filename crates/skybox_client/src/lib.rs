use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use tracing::debug;

pub mod error;
pub mod participant;

pub use error::GenerationError;
pub use participant::{ClientEvent, ParticipantClient, SubmitOutcome};

pub const DEFAULT_BASE_URL: &str = "https://backend.blockadelabs.com/api/v1";

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Secret credential for the generation service. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub generator: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Job identifier. The service sends numbers; strings are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(id) => JobId(id.to_string()),
            Raw::Text(id) => JobId(id),
        })
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of one imagine request as reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagineRequest {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ImagineRequest {
    /// The finished panorama, if any. An empty string counts as absent.
    pub fn file_url(&self) -> Option<&str> {
        self.file_url.as_deref().filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ImagineEnvelope {
    request: ImagineRequest,
}

#[derive(Debug, Serialize)]
struct CreateImagineRequest<'a> {
    generator: &'a str,
    prompt: &'a str,
}

/// The three calls the generation workflow needs.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn list_generators(&self) -> Result<Vec<Generator>, GenerationError>;
    async fn create_job(
        &self,
        generator: &str,
        prompt: &str,
    ) -> Result<ImagineRequest, GenerationError>;
    async fn fetch_job(&self, id: &JobId) -> Result<ImagineRequest, GenerationError>;
}

pub struct BlockadeLabsClient {
    http: Client,
    base_url: String,
    api_key: ApiKey,
}

impl BlockadeLabsClient {
    pub fn new(base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, api_key: ApiKey) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn key_query(&self) -> [(&'static str, &str); 1] {
        [("api_key", self.api_key.expose())]
    }
}

#[async_trait]
impl GenerationService for BlockadeLabsClient {
    async fn list_generators(&self) -> Result<Vec<Generator>, GenerationError> {
        const ENDPOINT: &str = "list_generators";
        let response = self
            .http
            .get(format!("{}/generators", self.base_url))
            .query(&self.key_query())
            .send()
            .await
            .map_err(|e| GenerationError::transport(ENDPOINT, e))?;
        let generators: Vec<Generator> = read_json(ENDPOINT, response).await?;
        debug!(count = generators.len(), "listed generators");
        Ok(generators)
    }

    async fn create_job(
        &self,
        generator: &str,
        prompt: &str,
    ) -> Result<ImagineRequest, GenerationError> {
        const ENDPOINT: &str = "create_imagine_request";
        let response = self
            .http
            .post(format!("{}/imagine/requests", self.base_url))
            .query(&self.key_query())
            .json(&CreateImagineRequest { generator, prompt })
            .send()
            .await
            .map_err(|e| GenerationError::transport(ENDPOINT, e))?;
        let envelope: ImagineEnvelope = read_json(ENDPOINT, response).await?;
        debug!(job_id = %envelope.request.id, generator, "created imagine request");
        Ok(envelope.request)
    }

    async fn fetch_job(&self, id: &JobId) -> Result<ImagineRequest, GenerationError> {
        const ENDPOINT: &str = "get_imagine_request";
        let response = self
            .http
            .get(format!("{}/imagine/requests/{}", self.base_url, id))
            .query(&self.key_query())
            .send()
            .await
            .map_err(|e| GenerationError::transport(ENDPOINT, e))?;
        let envelope: ImagineEnvelope = read_json(ENDPOINT, response).await?;
        debug!(
            job_id = %envelope.request.id,
            status = envelope.request.status.as_deref().unwrap_or("unknown"),
            ready = envelope.request.file_url().is_some(),
            "polled imagine request"
        );
        Ok(envelope.request)
    }
}

async fn read_json<T: DeserializeOwned>(
    endpoint: &'static str,
    response: Response,
) -> Result<T, GenerationError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GenerationError::transport(endpoint, e))?;
    if !status.is_success() {
        return Err(GenerationError::Status {
            endpoint,
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }
    serde_json::from_str(&body).map_err(|source| GenerationError::Decode { endpoint, source })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
