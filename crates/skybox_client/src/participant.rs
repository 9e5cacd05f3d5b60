//! Participant-side access to the authoritative session server.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use shared::{
    error::ApiError,
    protocol::{ClientRequest, ServerEvent, SessionSnapshot, SubmitRequest},
};
use tokio::{
    io::AsyncWriteExt,
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    State(SessionSnapshot),
    Rejected(ApiError),
    Error(String),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(SessionSnapshot),
    Rejected(ApiError),
}

/// Feed handle: snapshots arrive on `events`, prompts go out on `requests`.
pub struct ChangeFeed {
    pub events: broadcast::Receiver<ClientEvent>,
    pub requests: mpsc::Sender<ClientRequest>,
}

pub struct ParticipantClient {
    http: Client,
    server_url: String,
}

impl ParticipantClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url: String = server_url.into();
        Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn state(&self) -> Result<SessionSnapshot> {
        let snapshot = self
            .http
            .get(format!("{}/state", self.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(snapshot)
    }

    pub async fn submit(&self, prompt: &str) -> Result<SubmitOutcome> {
        let res = self
            .http
            .post(format!("{}/submit", self.server_url))
            .json(&SubmitRequest {
                prompt: prompt.to_string(),
            })
            .send()
            .await?;
        match res.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(SubmitOutcome::Accepted(res.json().await?)),
            status if status.is_client_error() => {
                let err: ApiError = res
                    .json()
                    .await
                    .with_context(|| format!("unreadable rejection body (status {status})"))?;
                Ok(SubmitOutcome::Rejected(err))
            }
            status => Err(anyhow!("submit failed with status {status}")),
        }
    }

    /// Streams the image at `url` into `destination`, returning bytes written.
    ///
    /// The body lands in a `.part` sibling first; `destination` is only
    /// replaced once the whole image has arrived.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        let partial = partial_path(destination);
        match self.fetch_into(url, &partial).await {
            Ok(written) => {
                tokio::fs::rename(&partial, destination)
                    .await
                    .with_context(|| format!("failed to move download to {}", destination.display()))?;
                debug!(url, written, "downloaded skybox");
                Ok(written)
            }
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), %cleanup, "no partial download to remove");
                }
                Err(err)
            }
        }
    }

    async fn fetch_into(&self, url: &str, path: &Path) -> Result<u64> {
        let mut res = self.http.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = res.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    pub async fn connect_feed(&self) -> Result<ChangeFeed> {
        let ws_url = ws_url(&self.server_url)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (events, events_rx) = broadcast::channel(64);
        let (requests, mut requests_rx) = mpsc::channel::<ClientRequest>(16);

        tokio::spawn(async move {
            while let Some(request) = requests_rx.recv().await {
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "failed to encode client request");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::StateChanged { snapshot }) => {
                            let _ = events.send(ClientEvent::State(snapshot));
                        }
                        Ok(ServerEvent::Error(err)) => {
                            let _ = events.send(ClientEvent::Rejected(err));
                        }
                        Err(err) => {
                            let _ = events.send(ClientEvent::Error(format!(
                                "invalid server event: {err}"
                            )));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = events.send(ClientEvent::Error(format!("websocket error: {err}")));
                        break;
                    }
                }
            }
            let _ = events.send(ClientEvent::Disconnected);
        });

        Ok(ChangeFeed {
            events: events_rx,
            requests,
        })
    }
}

fn ws_url(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url).with_context(|| format!("invalid server url {server_url}"))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(anyhow!("server_url must use http or https, got {other}")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {server_url} to {scheme}"))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}
