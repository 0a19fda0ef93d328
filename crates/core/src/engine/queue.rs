//! FIFO of pending analysis requests and output attribution
//!
//! USI carries no request identifiers, so at most one request is ever in
//! flight. Search output is attributed to that request, which is always the
//! head of the queue.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::analysis::AnalysisResult;
use crate::error::{Error, Result};

pub type RequestId = u64;

/// Settles the caller waiting on a request
pub type Responder = oneshot::Sender<Result<AnalysisResult>>;

#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub position: String,
    pub depth: u32,
    score: Option<i32>,
    responder: Option<Responder>,
}

impl PendingRequest {
    pub fn new(id: RequestId, position: String, depth: u32, responder: Responder) -> Self {
        Self {
            id,
            position,
            depth,
            score: None,
            responder: Some(responder),
        }
    }

    /// Returns false if the request was already settled.
    fn settle(&mut self, outcome: Result<AnalysisResult>) -> bool {
        match self.responder.take() {
            Some(tx) => {
                // The caller may have stopped waiting.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// The `position` + `go` pair to write for a newly dispatched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub position: String,
    pub depth: u32,
}

/// Result of removing an expired request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Already settled
    NotFound,
    /// Removed before it reached the engine
    Queued,
    /// Removed while the engine was searching it; the search should be stopped
    InFlight,
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<PendingRequest>,
    /// Id of the head once its commands have been written
    in_flight: Option<RequestId>,
    /// The engine is still busy with a search whose request expired
    orphaned: bool,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight
    }

    /// Appends a request, dispatching it if the engine is idle.
    pub fn push(&mut self, request: PendingRequest) -> Option<Dispatch> {
        self.pending.push_back(request);
        self.next_dispatch()
    }

    fn next_dispatch(&mut self) -> Option<Dispatch> {
        if self.in_flight.is_some() || self.orphaned {
            return None;
        }
        let head = self.pending.front()?;
        self.in_flight = Some(head.id);
        Some(Dispatch {
            position: head.position.clone(),
            depth: head.depth,
        })
    }

    fn head_in_flight(&mut self) -> Option<&mut PendingRequest> {
        let id = self.in_flight?;
        self.pending.front_mut().filter(|head| head.id == id)
    }

    /// Records a `score cp` for the in-flight request.
    pub fn record_score(&mut self, cp: i32) {
        if self.orphaned {
            return;
        }
        match self.head_in_flight() {
            Some(head) => head.score = Some(cp),
            None => debug!(cp, "score with no request in flight"),
        }
    }

    /// Handles `bestmove`: settles the in-flight request, pops it and
    /// dispatches the next one.
    pub fn complete(&mut self, best_move: &str, score: Option<i32>) -> Option<Dispatch> {
        if self.orphaned {
            debug!(best_move, "discarding bestmove of an expired search");
            self.orphaned = false;
            return self.next_dispatch();
        }

        let Some(id) = self.in_flight.take() else {
            warn!(best_move, "bestmove with no request in flight");
            return None;
        };
        match self.pending.pop_front() {
            Some(mut head) => {
                debug_assert_eq!(head.id, id);
                if score.is_some() {
                    head.score = score;
                }
                let result = AnalysisResult {
                    score: head.score.unwrap_or(0),
                    best_move: best_move.to_string(),
                    depth: head.depth,
                };
                debug!(id, %best_move, score = result.score, "request settled");
                head.settle(Ok(result));
            }
            None => warn!(id, "in-flight request missing from queue"),
        }

        self.next_dispatch()
    }

    /// Removes a request whose deadline passed.
    pub fn expire(&mut self, id: RequestId) -> Expiry {
        let Some(index) = self.pending.iter().position(|r| r.id == id) else {
            return Expiry::NotFound;
        };
        // Dropping the request drops its responder unsent.
        self.pending.remove(index);

        if self.in_flight == Some(id) {
            self.in_flight = None;
            self.orphaned = true;
            Expiry::InFlight
        } else {
            Expiry::Queued
        }
    }

    /// Fails every pending request, e.g. when the engine process is gone.
    pub fn fail_all(&mut self, error: impl Fn() -> Error) -> usize {
        let mut failed = 0;
        for mut request in self.pending.drain(..) {
            if request.settle(Err(error())) {
                failed += 1;
            }
        }
        self.in_flight = None;
        self.orphaned = false;
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::error::TryRecvError;

    fn request(
        id: RequestId,
        position: &str,
        depth: u32,
    ) -> (PendingRequest, oneshot::Receiver<Result<AnalysisResult>>) {
        let (tx, rx) = oneshot::channel();
        (PendingRequest::new(id, position.into(), depth, tx), rx)
    }

    fn dispatch(position: &str, depth: u32) -> Option<Dispatch> {
        Some(Dispatch {
            position: position.into(),
            depth,
        })
    }

    #[test]
    fn test_first_push_dispatches_immediately() {
        let mut queue = RequestQueue::new();
        let (a, _rx_a) = request(1, "a", 10);
        let (b, _rx_b) = request(2, "b", 10);

        assert_eq!(queue.push(a), dispatch("a", 10));
        assert_eq!(queue.push(b), None);
        assert_eq!(queue.in_flight(), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_output_attributed_to_head_only() {
        let mut queue = RequestQueue::new();
        let (a, mut rx_a) = request(1, "a", 12);
        let (b, mut rx_b) = request(2, "b", 8);
        queue.push(a);
        queue.push(b);

        queue.record_score(-35);
        assert_eq!(queue.complete("7g7f", None), dispatch("b", 8));

        let first = rx_a.try_recv().unwrap().unwrap();
        assert_eq!(
            first,
            AnalysisResult {
                score: -35,
                best_move: "7g7f".into(),
                depth: 12
            }
        );
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));

        // b never saw a score
        assert_eq!(queue.complete("3c3d", None), None);
        let second = rx_b.try_recv().unwrap().unwrap();
        assert_eq!(second.score, 0);
        assert_eq!(second.best_move, "3c3d");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_same_line_score_overrides_earlier() {
        let mut queue = RequestQueue::new();
        let (a, mut rx_a) = request(1, "a", 5);
        queue.push(a);
        queue.record_score(10);
        queue.complete("2g2f", Some(25));
        assert_eq!(rx_a.try_recv().unwrap().unwrap().score, 25);
    }

    #[test]
    fn test_drains_n_requests_in_order() {
        let mut queue = RequestQueue::new();
        let mut receivers = Vec::new();
        for id in 1..=5 {
            let (r, rx) = request(id, &format!("p{}", id), 3);
            queue.push(r);
            receivers.push(rx);
        }
        for id in 1..=5 {
            queue.record_score(id as i32);
            queue.complete(&format!("m{}", id), None);
        }

        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), None);
        for (i, mut rx) in receivers.into_iter().enumerate() {
            let result = rx.try_recv().unwrap().unwrap();
            assert_eq!(result.best_move, format!("m{}", i + 1));
            assert_eq!(result.score, i as i32 + 1);
        }
    }

    #[test]
    fn test_bestmove_without_request_is_ignored() {
        let mut queue = RequestQueue::new();
        queue.record_score(100);
        assert_eq!(queue.complete("7g7f", None), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_expire_queued_request() {
        let mut queue = RequestQueue::new();
        let (a, _rx_a) = request(1, "a", 10);
        let (b, mut rx_b) = request(2, "b", 10);
        queue.push(a);
        queue.push(b);

        assert_eq!(queue.expire(2), Expiry::Queued);
        assert_eq!(queue.expire(2), Expiry::NotFound);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.in_flight(), Some(1));
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Closed)));
    }

    #[test]
    fn test_expire_in_flight_discards_orphaned_output() {
        let mut queue = RequestQueue::new();
        let (a, _rx_a) = request(1, "a", 10);
        let (b, mut rx_b) = request(2, "b", 10);
        queue.push(a);
        queue.push(b);

        assert_eq!(queue.expire(1), Expiry::InFlight);
        assert_eq!(queue.in_flight(), None);

        // late output of the expired search
        queue.record_score(999);
        assert_eq!(queue.complete("resign", None), dispatch("b", 10));
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));

        queue.complete("5g5f", None);
        let result = rx_b.try_recv().unwrap().unwrap();
        assert_eq!(result.best_move, "5g5f");
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_push_while_orphaned_waits_for_bestmove() {
        let mut queue = RequestQueue::new();
        let (a, _rx_a) = request(1, "a", 10);
        queue.push(a);
        queue.expire(1);

        let (b, _rx_b) = request(2, "b", 10);
        assert_eq!(queue.push(b), None);
        assert_eq!(queue.complete("resign", None), dispatch("b", 10));
    }

    #[test]
    fn test_settled_request_cannot_resettle() {
        let mut queue = RequestQueue::new();
        let (a, mut rx_a) = request(1, "a", 10);
        queue.push(a);
        queue.complete("7g7f", Some(1));
        // stray duplicate bestmove
        queue.complete("2g2f", Some(2));
        assert_eq!(queue.expire(1), Expiry::NotFound);
        assert_eq!(rx_a.try_recv().unwrap().unwrap().best_move, "7g7f");
    }

    #[test]
    fn test_fail_all() {
        let mut queue = RequestQueue::new();
        let (a, mut rx_a) = request(1, "a", 10);
        let (b, mut rx_b) = request(2, "b", 10);
        queue.push(a);
        queue.push(b);

        assert_eq!(queue.fail_all(|| Error::SubprocessExited), 2);
        assert!(queue.is_empty());
        assert!(matches!(rx_a.try_recv().unwrap(), Err(Error::SubprocessExited)));
        assert!(matches!(rx_b.try_recv().unwrap(), Err(Error::SubprocessExited)));
    }
}
