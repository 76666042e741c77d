//! HTTP store backend.
//!
//! Speaks the revision-tracked document API of a remote member:
//! conditional GET/PUT per document, an atomic `_bulk` endpoint, and a
//! continuous `_changes` feed with heartbeats.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use converge_engine::{ChangeRecord, Checkpoint, Document, RevisionId};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{BulkOp, ChangeStream, DocumentStore, FetchedDocument};
use crate::config::ReplicaConfig;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PooledConnection};

/// [`DocumentStore`] backed by a remote HTTP member.
pub struct HttpStore {
    pool: Arc<ConnectionPool>,
    side: String,
    resource: String,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    revision: RevisionId,
}

#[derive(Debug, Serialize)]
struct BulkRequest<'a> {
    operations: &'a [BulkOp],
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    revisions: Vec<RevisionId>,
}

impl HttpStore {
    pub fn new(pool: Arc<ConnectionPool>, side: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            pool,
            side: side.into(),
            resource: resource.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Build a store and its pool from configuration.
    pub fn from_config(config: &ReplicaConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            config.max_connections,
            config.connect_timeout,
        ));
        Self {
            pool,
            side: config.side.clone(),
            resource: config.resource.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        }
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}", self.resource, id)
    }

    async fn connection(&self) -> Result<PooledConnection> {
        self.pool.acquire(&self.side, &self.resource).await
    }

    async fn fetch(&self, id: &str, with_conflicts: bool) -> Result<Option<FetchedDocument>> {
        let connection = self.connection().await?;
        let mut request = connection
            .client()
            .get(self.document_url(id))
            .timeout(self.request_timeout);
        if with_conflicts {
            request = request.query(&[("conflicts", "true")]);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(unexpected_status(response).await),
        }
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn get(&self, id: &str) -> Result<Option<FetchedDocument>> {
        self.fetch(id, false).await
    }

    async fn get_with_conflicts(&self, id: &str) -> Result<Option<FetchedDocument>> {
        self.fetch(id, true).await
    }

    async fn get_revision(&self, id: &str, revision: &str) -> Result<Option<Document>> {
        let connection = self.connection().await?;
        let response = connection
            .client()
            .get(self.document_url(id))
            .timeout(self.request_timeout)
            .query(&[("rev", revision)])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let fetched: FetchedDocument = response.json().await?;
                Ok(Some(fetched.document))
            }
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn put(
        &self,
        id: &str,
        expected: Option<&str>,
        document: &Document,
    ) -> Result<RevisionId> {
        let connection = self.connection().await?;
        let mut request = connection
            .client()
            .put(self.document_url(id))
            .timeout(self.request_timeout)
            .json(document);
        if let Some(revision) = expected {
            request = request.query(&[("rev", revision)]);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::CONFLICT => Err(Error::Conflict(id.to_string())),
            StatusCode::NOT_FOUND => Err(Error::NotFound(id.to_string())),
            status if status.is_success() => {
                let body: PutResponse = response.json().await?;
                Ok(body.revision)
            }
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<Vec<RevisionId>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let connection = self.connection().await?;
        let response = connection
            .client()
            .post(format!("{}/_bulk", self.resource))
            .timeout(self.request_timeout)
            .json(&BulkRequest { operations: &ops })
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => {
                let id = ops
                    .first()
                    .map(|op| op.id().to_string())
                    .unwrap_or_default();
                Err(Error::Conflict(id))
            }
            status if status.is_success() => {
                let body: BulkResponse = response.json().await?;
                Ok(body.revisions)
            }
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn changes(
        &self,
        since: Option<Checkpoint>,
        heartbeat: Duration,
    ) -> Result<ChangeStream> {
        let connection = self.connection().await?;
        let mut query = vec![
            ("feed", "continuous".to_string()),
            ("heartbeat", heartbeat.as_millis().to_string()),
        ];
        if let Some(checkpoint) = since {
            query.push(("since", checkpoint));
        }

        // No request timeout here: the feed stays open indefinitely.
        // Liveness is enforced per chunk against the heartbeat instead.
        let response = connection
            .client()
            .get(format!("{}/_changes", self.resource))
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }

        Ok(feed_lines(connection, response, heartbeat * 2))
    }
}

async fn unexpected_status(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Protocol(format!("unexpected status {status}: {body}"))
}

struct FeedState {
    // Keeps the pool permit checked out for the life of the feed.
    _connection: PooledConnection,
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    stall_after: Duration,
}

/// Turn a streaming response body into parsed change records.
///
/// Records arrive one per line; blank lines are heartbeats. A feed that
/// goes silent for two heartbeat intervals is treated as dead.
fn feed_lines(
    connection: PooledConnection,
    response: Response,
    stall_after: Duration,
) -> ChangeStream {
    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
        .boxed();
    let state = FeedState {
        _connection: connection,
        body,
        buffer: Vec::new(),
        stall_after,
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            while let Some(line) = take_line(&mut state.buffer) {
                if line.is_empty() {
                    continue; // heartbeat
                }
                match serde_json::from_slice::<ChangeRecord>(&line) {
                    Ok(record) => return Some((Ok(record), Some(state))),
                    Err(e) => {
                        let error = Error::Protocol(format!("bad change record: {e}"));
                        return Some((Err(error), None));
                    }
                }
            }

            match tokio::time::timeout(state.stall_after, state.body.next()).await {
                Ok(Some(Ok(chunk))) => state.buffer.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => {
                    let error = Error::Transport(format!("change feed failed: {e}"));
                    return Some((Err(error), None));
                }
                Ok(None) => return None,
                Err(_) => {
                    let error = Error::Transport("change feed stalled".to_string());
                    return Some((Err(error), None));
                }
            }
        }
    })
    .boxed()
}

fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let newline = buffer.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=newline).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_line_splits_on_newlines() {
        let mut buffer = b"first\nsecond\r\npartial".to_vec();

        assert_eq!(take_line(&mut buffer), Some(b"first".to_vec()));
        assert_eq!(take_line(&mut buffer), Some(b"second".to_vec()));
        assert_eq!(take_line(&mut buffer), None);
        assert_eq!(buffer, b"partial".to_vec());
    }

    #[test]
    fn take_line_yields_empty_heartbeat_lines() {
        let mut buffer = b"\n\n{\"x\":1}\n".to_vec();

        assert_eq!(take_line(&mut buffer), Some(Vec::new()));
        assert_eq!(take_line(&mut buffer), Some(Vec::new()));
        assert_eq!(take_line(&mut buffer), Some(b"{\"x\":1}".to_vec()));
        assert_eq!(take_line(&mut buffer), None);
    }

    #[test]
    fn resource_trailing_slash_trimmed() {
        let pool = Arc::new(ConnectionPool::new(1, Duration::from_secs(1)));
        let store = HttpStore::new(pool, "side-a", "http://localhost:5984/db/");
        assert_eq!(store.document_url("task-1"), "http://localhost:5984/db/task-1");
    }
}
