//! Remote garden repository over HTTP.
//!
//! A genuinely remote target instance is reached through the same
//! [`EntityStore`] contract the engine uses locally: [`RemoteGarden`]
//! translates each repository call into a JSON POST. The HTTP client
//! itself is abstracted behind [`HttpClient`] so implementations can use
//! any HTTP library, and [`LoopbackClient`] routes requests to an
//! in-process garden for same-process testing.

use gardensync_core::{
    ChangePosition, EntityKind, EntityStore, MemoryGarden, NodeId, StoreError, StoreResult,
    Syncable,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual transport (reqwest, ureq,
/// a unix socket, or the in-process loopback below).
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
struct ChangedSinceRequest {
    position: ChangePosition,
    limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdRequest {
    id: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct UpsertResponse {
    ok: bool,
}

/// A garden repository backed by a remote instance.
///
/// Endpoints follow `{base}/sync/{entity-kind}/{operation}` with JSON
/// bodies; the remote side exposes the standard repository contract.
pub struct RemoteGarden<C: HttpClient> {
    base_url: String,
    client: C,
}

impl<C: HttpClient> RemoteGarden<C> {
    /// Creates a remote repository rooted at the given base URL.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns true if the underlying client reports healthy.
    pub fn is_healthy(&self) -> bool {
        self.client.is_healthy()
    }

    fn post_json<Req, Res>(&self, kind: EntityKind, op: &str, request: &Req) -> StoreResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let url = format!("{}/sync/{}/{}", self.base_url, kind.as_str(), op);
        let body = serde_json::to_vec(request)
            .map_err(|e| StoreError::backend(format!("failed to encode request: {e}")))?;
        let response = self.client.post(&url, body).map_err(StoreError::backend)?;
        serde_json::from_slice(&response)
            .map_err(|e| StoreError::backend(format!("failed to decode response: {e}")))
    }
}

impl<C, E> EntityStore<E> for RemoteGarden<C>
where
    C: HttpClient,
    E: Syncable + Serialize + DeserializeOwned,
{
    fn find_changed_since(&self, position: &ChangePosition, limit: usize) -> StoreResult<Vec<E>> {
        self.post_json(
            E::KIND,
            "changed-since",
            &ChangedSinceRequest {
                position: position.clone(),
                limit,
            },
        )
    }

    fn find_by_id(&self, id: &NodeId) -> StoreResult<Option<E>> {
        self.post_json(E::KIND, "find-by-id", &IdRequest { id: id.clone() })
    }

    fn exists(&self, id: &NodeId) -> StoreResult<bool> {
        let response: ExistsResponse =
            self.post_json(E::KIND, "exists", &IdRequest { id: id.clone() })?;
        Ok(response.exists)
    }

    fn upsert(&self, entity: E) -> StoreResult<()> {
        let response: UpsertResponse = self.post_json(E::KIND, "upsert", &entity)?;
        if response.ok {
            Ok(())
        } else {
            Err(StoreError::backend("remote rejected upsert"))
        }
    }
}

/// An HTTP client that routes requests to an in-process handler.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

/// Handles loopback POST requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to the given path and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Serves the repository contract from an in-process [`MemoryGarden`].
pub struct GardenLoopback {
    garden: Arc<MemoryGarden>,
}

impl GardenLoopback {
    /// Creates a loopback server over the given garden.
    pub fn new(garden: Arc<MemoryGarden>) -> Self {
        Self { garden }
    }

    fn dispatch<E>(&self, op: &str, body: &[u8]) -> Result<Vec<u8>, String>
    where
        E: Syncable + Serialize + DeserializeOwned,
        MemoryGarden: EntityStore<E>,
    {
        match op {
            "changed-since" => {
                let request: ChangedSinceRequest =
                    serde_json::from_slice(body).map_err(|e| e.to_string())?;
                let entities: Vec<E> = self
                    .garden
                    .find_changed_since(&request.position, request.limit)
                    .map_err(|e| e.to_string())?;
                serde_json::to_vec(&entities).map_err(|e| e.to_string())
            }
            "find-by-id" => {
                let request: IdRequest =
                    serde_json::from_slice(body).map_err(|e| e.to_string())?;
                let entity: Option<E> = self
                    .garden
                    .find_by_id(&request.id)
                    .map_err(|e| e.to_string())?;
                serde_json::to_vec(&entity).map_err(|e| e.to_string())
            }
            "exists" => {
                let request: IdRequest =
                    serde_json::from_slice(body).map_err(|e| e.to_string())?;
                let exists = EntityStore::<E>::exists(self.garden.as_ref(), &request.id)
                    .map_err(|e| e.to_string())?;
                serde_json::to_vec(&ExistsResponse { exists }).map_err(|e| e.to_string())
            }
            "upsert" => {
                let entity: E = serde_json::from_slice(body).map_err(|e| e.to_string())?;
                self.garden.upsert(entity).map_err(|e| e.to_string())?;
                serde_json::to_vec(&UpsertResponse { ok: true }).map_err(|e| e.to_string())
            }
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

impl LoopbackServer for GardenLoopback {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let mut segments = path.trim_start_matches('/').split('/');
        let (Some("sync"), Some(kind), Some(op)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(format!("malformed path: {path}"));
        };

        match kind {
            "content-node" => self.dispatch::<gardensync_core::ContentNode>(op, body),
            "sequence" => self.dispatch::<gardensync_core::Sequence>(op, body),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}
