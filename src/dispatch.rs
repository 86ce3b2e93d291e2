//! Dispatch boundary between the network core and queue semantics.
//!
//! The server decodes requests and hands them to a [`Dispatch`] implementation
//! one at a time per connection. Everything about message storage, lease
//! enforcement, and deletion lives behind this trait; the network core only
//! cares that it gets a [`ClientResponse`] back. Failures returned here are
//! converted by the session into an internal-error response and never
//! terminate the connection.

use async_trait::async_trait;
use uuid::Uuid;

use crate::protocol::{ClientRequest, ClientResponse, Message};

/// Unexpected failure inside the dispatch boundary.
#[derive(Debug)]
pub struct DispatchError(pub String);

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dispatch failed: {}", self.0)
    }
}

impl std::error::Error for DispatchError {}

/// Turns a decoded request into a response.
///
/// Implementations own all queue semantics. The call may block on slow
/// backends; each connection has its own task, so a slow dispatch stalls only
/// that connection.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn handle(&self, request: ClientRequest) -> Result<ClientResponse, DispatchError>;
}

/// Placeholder dispatcher used until real queue semantics exist.
///
/// Echoes every request as a single freshly minted message: the published
/// content for PUBLISH, a dummy body for everything else.
#[derive(Debug, Default)]
pub struct StubDispatch;

#[async_trait]
impl Dispatch for StubDispatch {
    async fn handle(&self, request: ClientRequest) -> Result<ClientResponse, DispatchError> {
        let body = match request {
            ClientRequest::Publish { content } => content,
            _ => "Dummy message".to_string(),
        };

        Ok(ClientResponse {
            messages: vec![Message {
                message_id: Uuid::new_v4().to_string(),
                message: body,
            }],
            ..Default::default()
        })
    }
}
