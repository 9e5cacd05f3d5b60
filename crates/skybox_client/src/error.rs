use thiserror::Error;

/// Failures talking to the skybox generation service.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("generation service offered no generators")]
    NoGenerators,
}

impl GenerationError {
    pub(crate) fn transport(endpoint: &'static str, source: reqwest::Error) -> Self {
        // The request URL carries the api key; keep it out of logs.
        Self::Transport {
            endpoint,
            source: source.without_url(),
        }
    }

    pub fn endpoint(&self) -> Option<&'static str> {
        match self {
            GenerationError::Transport { endpoint, .. }
            | GenerationError::Status { endpoint, .. }
            | GenerationError::Decode { endpoint, .. } => Some(endpoint),
            GenerationError::NoGenerators => None,
        }
    }
}
