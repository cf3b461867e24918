//! # Server Request
//!
//! One request key on the callee side: collects requesters from the calling
//! DON, triggers a single execution once `F+1` of them asked, and replays the
//! outcome to every requester, including late ones.
//!
//! The state machine never performs I/O. Each transition returns a
//! `ServerAction` (or the replies to send) for the caller to carry out after
//! releasing its lock.

use crate::errors::TargetError;
use shared_types::{DonInfo, ErrorCode, MessageBody, PeerId};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// A failed execution as reported to requesters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Serialized response payload or failure.
pub type ExecutionOutcome = Result<Vec<u8>, ExecutionFailure>;

/// What the owner must do after a requester was recorded.
#[derive(Debug, PartialEq, Eq)]
pub enum ServerAction {
    /// Quorum not reached yet.
    Wait,
    /// Run the underlying capability once, within `budget`.
    Execute { payload: Vec<u8>, budget: Duration },
    /// The outcome is known; send these replies.
    Reply(Vec<(PeerId, MessageBody)>),
}

pub struct ServerRequest {
    reply_template: MessageBody,
    payload: Vec<u8>,
    created_at: Instant,
    request_timeout: Duration,
    required_requesters: usize,
    requesters: Vec<PeerId>,
    replied: HashSet<PeerId>,
    outcome: Option<ExecutionOutcome>,
    executing: bool,
}

impl ServerRequest {
    /// Start tracking the request carried by `body`.
    pub fn new(body: &MessageBody, required_requesters: usize, request_timeout: Duration) -> Self {
        let reply_template = MessageBody::new(
            body.capability_id.clone(),
            body.capability_don_id,
            body.caller_don_id,
            body.method,
        )
        .with_message_id(body.message_id.clone());

        Self {
            reply_template,
            payload: body.payload.clone(),
            created_at: Instant::now(),
            request_timeout,
            required_requesters,
            requesters: Vec::new(),
            replied: HashSet::new(),
            outcome: None,
            executing: false,
        }
    }

    /// Record `peer` as a requester.
    ///
    /// # Errors
    /// - `NotDonMember` if `peer` is not in the calling DON
    /// - `DuplicateRequester` if `peer` was already recorded
    pub fn add_requester(
        &mut self,
        peer: PeerId,
        calling_don: &DonInfo,
    ) -> Result<ServerAction, TargetError> {
        if !calling_don.contains(&peer) {
            return Err(TargetError::NotDonMember {
                peer,
                don_id: calling_don.id,
            });
        }
        if self.requesters.contains(&peer) {
            return Err(TargetError::DuplicateRequester(peer));
        }
        self.requesters.push(peer);

        if self.outcome.is_some() {
            return Ok(ServerAction::Reply(self.pending_replies()));
        }
        if !self.executing && self.requesters.len() >= self.required_requesters {
            self.executing = true;
            return Ok(ServerAction::Execute {
                payload: self.payload.clone(),
                budget: self.remaining(),
            });
        }
        Ok(ServerAction::Wait)
    }

    /// Store the execution outcome and return replies for every requester
    /// recorded so far. A second outcome is ignored.
    pub fn set_outcome(&mut self, outcome: ExecutionOutcome) -> Vec<(PeerId, MessageBody)> {
        if self.outcome.is_some() {
            return Vec::new();
        }
        self.outcome = Some(outcome);
        self.executing = false;
        self.pending_replies()
    }

    /// Time the request out: pending requesters get a `TIMEOUT` reply.
    pub fn expire(&mut self) -> Vec<(PeerId, MessageBody)> {
        self.set_outcome(Err(ExecutionFailure::new(
            ErrorCode::Timeout,
            "request expired",
        )))
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.request_timeout
    }

    /// Lifetime left before expiry.
    pub fn remaining(&self) -> Duration {
        self.request_timeout.saturating_sub(self.created_at.elapsed())
    }

    pub fn has_outcome(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn requester_count(&self) -> usize {
        self.requesters.len()
    }

    fn pending_replies(&mut self) -> Vec<(PeerId, MessageBody)> {
        let Some(outcome) = &self.outcome else {
            return Vec::new();
        };
        let reply = match outcome {
            Ok(payload) => self.reply_template.clone().with_payload(payload.clone()),
            Err(failure) => self
                .reply_template
                .clone()
                .with_error(failure.code, failure.message.clone()),
        };

        let mut replies = Vec::new();
        for peer in &self.requesters {
            if self.replied.insert(*peer) {
                replies.push((*peer, reply.clone()));
            }
        }
        replies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Method;

    fn peer(i: u8) -> PeerId {
        PeerId([i; 32])
    }

    fn calling_don() -> DonInfo {
        // 4 members, F = 1, so F+1 = 2 requesters trigger execution.
        DonInfo::new(1, (0..4).map(peer).collect(), 1, [0u8; 16]).unwrap()
    }

    fn request() -> ServerRequest {
        let body = MessageBody::new("cap@1.0.0", 2, 1, Method::Execute)
            .with_message_id(b"wf:exec".to_vec())
            .with_payload(b"{\"inputs\":1}".to_vec());
        ServerRequest::new(&body, calling_don().f_plus_one(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_executes_once_at_quorum() {
        let don = calling_don();
        let mut req = request();

        assert_eq!(req.add_requester(peer(0), &don).unwrap(), ServerAction::Wait);
        match req.add_requester(peer(1), &don).unwrap() {
            ServerAction::Execute { payload, budget } => {
                assert_eq!(payload, b"{\"inputs\":1}".to_vec());
                assert!(budget <= Duration::from_secs(60));
            }
            other => panic!("expected execute, got {other:?}"),
        }
        // Quorum grows while executing: still a single execution.
        assert_eq!(req.add_requester(peer(2), &don).unwrap(), ServerAction::Wait);
        assert!(req.is_executing());
    }

    #[tokio::test]
    async fn test_outcome_is_replayed_to_everyone() {
        let don = calling_don();
        let mut req = request();
        req.add_requester(peer(0), &don).unwrap();
        req.add_requester(peer(1), &don).unwrap();

        let replies = req.set_outcome(Ok(b"result".to_vec()));
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|(_, b)| b.payload == b"result".to_vec()));

        match req.add_requester(peer(3), &don).unwrap() {
            ServerAction::Reply(late) => {
                assert_eq!(late.len(), 1);
                assert_eq!(late[0].0, peer(3));
                assert_eq!(late[0].1.payload, b"result".to_vec());
                assert_eq!(late[0].1.message_id, b"wf:exec".to_vec());
            }
            other => panic!("expected reply, got {other:?}"),
        }
        assert!(req.set_outcome(Ok(b"second".to_vec())).is_empty());
    }

    #[tokio::test]
    async fn test_rejects_outsiders_and_duplicates() {
        let don = calling_don();
        let mut req = request();

        assert!(matches!(
            req.add_requester(peer(9), &don),
            Err(TargetError::NotDonMember { don_id: 1, .. })
        ));
        req.add_requester(peer(0), &don).unwrap();
        assert_eq!(
            req.add_requester(peer(0), &don),
            Err(TargetError::DuplicateRequester(peer(0)))
        );
        assert_eq!(req.requester_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_reply_has_no_payload() {
        let don = calling_don();
        let mut req = request();
        req.add_requester(peer(0), &don).unwrap();
        req.add_requester(peer(1), &don).unwrap();

        let replies = req.set_outcome(Err(ExecutionFailure::new(
            ErrorCode::InternalError,
            "failed to execute capability: an error",
        )));
        for (_, body) in replies {
            assert_eq!(body.error, ErrorCode::InternalError);
            assert_eq!(body.error_msg, "failed to execute capability: an error");
            assert!(body.payload.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_times_out_pending_requesters() {
        let don = calling_don();
        let mut req = request();
        req.add_requester(peer(0), &don).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(req.is_expired());
        assert_eq!(req.remaining(), Duration::ZERO);

        let replies = req.expire();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.error, ErrorCode::Timeout);
        assert_eq!(replies[0].1.error_msg, "request expired");
    }

    #[tokio::test]
    async fn test_expire_after_outcome_sends_nothing() {
        let don = calling_don();
        let mut req = request();
        req.add_requester(peer(0), &don).unwrap();
        req.add_requester(peer(1), &don).unwrap();
        req.set_outcome(Ok(vec![1]));

        assert!(req.expire().is_empty());
    }
}
