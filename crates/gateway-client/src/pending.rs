//! Pending request table and send queue.
//!
//! A request lives in exactly one partition at a time:
//!
//! - **queued**: accepted from a caller but not yet written to a socket
//! - **in flight**: written to the current socket, awaiting its response
//!
//! and leaves the table when it is resolved or rejected.
//!
//! On connection loss only the in-flight partition is rejected. Queued
//! requests were never seen by the gateway, so they are safe to send
//! verbatim on the next authenticated connection; in-flight ones may have
//! been partially processed and are not retried.

use std::collections::{HashMap, VecDeque};

use gateway_core::RequestId;
use gateway_protocol::RequestFrame;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ClientError;

/// Completion channel for one request.
pub type ReplyTx = oneshot::Sender<Result<Value, ClientError>>;

/// A request accepted from a caller.
#[derive(Debug)]
pub struct PendingRequest {
    /// The frame to write.
    pub frame: RequestFrame,
    reply: ReplyTx,
}

impl PendingRequest {
    /// Wrap a frame and its completion channel.
    pub fn new(frame: RequestFrame, reply: ReplyTx) -> Self {
        Self { frame, reply }
    }

    /// Correlation id.
    pub fn id(&self) -> &RequestId {
        &self.frame.id
    }

    /// Method name.
    pub fn method(&self) -> &str {
        &self.frame.method
    }

    /// Whether the caller stopped waiting for the result.
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Deliver the outcome. A caller that stopped waiting is ignored.
    pub fn complete(self, result: Result<Value, ClientError>) {
        let _ = self.reply.send(result);
    }
}

/// Queued and in-flight requests, owned by the connection manager.
#[derive(Debug, Default)]
pub struct PendingTable {
    queued: VecDeque<PendingRequest>,
    in_flight: HashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the send queue.
    pub fn enqueue(&mut self, request: PendingRequest) {
        self.queued.push_back(request);
    }

    /// Take the oldest queued request.
    pub fn pop_queued(&mut self) -> Option<PendingRequest> {
        self.queued.pop_front()
    }

    /// Record a request as written to the socket.
    pub fn mark_in_flight(&mut self, request: PendingRequest) {
        let _ = self.in_flight.insert(request.id().clone(), request);
    }

    /// Resolve the in-flight request with the given id.
    ///
    /// Returns `false` when no such request is in flight (stale or duplicate
    /// response).
    pub fn resolve(&mut self, id: &RequestId, result: Result<Value, ClientError>) -> bool {
        match self.in_flight.remove(id) {
            Some(request) => {
                request.complete(result);
                true
            }
            None => false,
        }
    }

    /// Reject every in-flight request, leaving the queue untouched.
    ///
    /// Returns how many were rejected.
    pub fn fail_in_flight(&mut self, err: &ClientError) -> usize {
        let count = self.in_flight.len();
        for (_, request) in self.in_flight.drain() {
            request.complete(Err(err.clone()));
        }
        count
    }

    /// Reject everything, queued and in flight.
    pub fn fail_all(&mut self, err: &ClientError) -> usize {
        let mut count = self.fail_in_flight(err);
        while let Some(request) = self.queued.pop_front() {
            request.complete(Err(err.clone()));
            count += 1;
        }
        count
    }

    /// Number of requests waiting to be written.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Number of requests awaiting a response.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, id: &RequestId) -> bool {
        self.in_flight.contains_key(id)
    }
}
