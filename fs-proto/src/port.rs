use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::{FsError, Reply, Request};

pub type MsgId = u64;

/// The kernel message port a server's dispatch loop waits on and replies
/// through (spec §6.1, §4.11). This is the boundary contract we consume,
/// not implement — `LocalPort` is an in-process stand-in used by tests and
/// by anything embedding a server without a live microkernel underneath it.
pub trait MessagePort {
    /// Pop the next queued request, if any, without blocking.
    fn poll(&mut self) -> Option<(MsgId, Request)>;

    /// Block until a request is queued or `timeout` elapses. Returns `true`
    /// if a request became available to [`poll`](Self::poll).
    fn wait(&mut self, timeout: Duration) -> bool;

    /// Send a reply for a previously polled request. Every polled message
    /// must get exactly one reply before the next message is dequeued
    /// (spec §4.11's request state machine).
    fn reply(&mut self, msgid: MsgId, result: Result<Reply, FsError>);
}

/// In-process message port: requests are pushed with [`LocalPort::submit`]
/// and replies are collected for inspection with [`LocalPort::take_reply`].
#[derive(Debug, Default)]
pub struct LocalPort {
    next_id: MsgId,
    inbox: VecDeque<(MsgId, Request)>,
    replies: HashMap<MsgId, Result<Reply, FsError>>,
}

impl LocalPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request, returning the message id it will be replied to.
    pub fn submit(&mut self, request: Request) -> MsgId {
        let id = self.next_id;
        self.next_id += 1;
        self.inbox.push_back((id, request));
        id
    }

    /// Remove and return the reply for `msgid`, if the dispatcher has
    /// already processed it.
    pub fn take_reply(&mut self, msgid: MsgId) -> Option<Result<Reply, FsError>> {
        self.replies.remove(&msgid)
    }

    pub fn has_pending(&self) -> bool {
        !self.inbox.is_empty()
    }
}

impl MessagePort for LocalPort {
    fn poll(&mut self) -> Option<(MsgId, Request)> {
        self.inbox.pop_front()
    }

    fn wait(&mut self, _timeout: Duration) -> bool {
        !self.inbox.is_empty()
    }

    fn reply(&mut self, msgid: MsgId, result: Result<Reply, FsError>) {
        self.replies.insert(msgid, result);
    }
}
