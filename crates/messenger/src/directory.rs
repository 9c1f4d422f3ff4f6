//! Directory service client: resolves usernames to peer addresses.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use messenger_core::peer::{GetPeerResponse, PeerRecord, PostPeerResponse};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to reach directory at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("directory at {url} answered {status}")]
    Status { url: String, status: StatusCode },

    #[error("malformed directory response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("directory refused request: {0}")]
    Server(String),

    #[error("peer {0:?} not found")]
    NotFound(String),

    #[error("username {0:?} already registered")]
    UsernameTaken(String),
}

pub struct DirectoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DirectoryClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// `GET /peer/{username}`
    pub async fn get_peer(&self, username: &str) -> Result<PeerRecord, DirectoryError> {
        let url = format!("{}/peer/{}", self.base_url, username);
        let resp = self.send(self.http.get(&url), &url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(username.to_string()));
        }
        let body: GetPeerResponse = decode(resp, &url).await?;
        if !body.ok {
            return Err(server_error(body.error));
        }
        body.peers
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::NotFound(username.to_string()))
    }

    /// `GET /peer/`
    pub async fn list_peers(&self) -> Result<Vec<PeerRecord>, DirectoryError> {
        let url = format!("{}/peer/", self.base_url);
        let resp = self.send(self.http.get(&url), &url).await?;
        let body: GetPeerResponse = decode(resp, &url).await?;
        if !body.ok {
            return Err(server_error(body.error));
        }
        Ok(body.peers)
    }

    /// `POST /peer/`
    pub async fn register(&self, peer: &PeerRecord) -> Result<(), DirectoryError> {
        let url = format!("{}/peer/", self.base_url);
        let resp = self.send(self.http.post(&url).json(peer), &url).await?;
        if resp.status() == StatusCode::CONFLICT {
            return Err(DirectoryError::UsernameTaken(peer.username.clone()));
        }
        let body: PostPeerResponse = decode(resp, &url).await?;
        if !body.ok {
            return Err(server_error(body.error));
        }
        tracing::info!(username = %peer.username, directory = %self.base_url, "registered with directory");
        Ok(())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, DirectoryError> {
        request
            .send()
            .await
            .map_err(|source| DirectoryError::Unreachable {
                url: url.to_string(),
                source,
            })
    }
}

async fn decode<T: DeserializeOwned>(
    resp: reqwest::Response,
    url: &str,
) -> Result<T, DirectoryError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(DirectoryError::Status {
            url: url.to_string(),
            status,
        });
    }
    resp.json::<T>().await.map_err(|source| DirectoryError::Decode {
        url: url.to_string(),
        source,
    })
}

fn server_error(error: Option<String>) -> DirectoryError {
    DirectoryError::Server(error.unwrap_or_else(|| "unspecified error".to_string()))
}
