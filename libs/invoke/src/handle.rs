use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;

use relay_core::OperationResult;
use tokio::sync::oneshot;
use tokio::time::Sleep;

use crate::connection::PendingTable;
use crate::error::{InvocationError, Result};

/// What a completed invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// A twoway call came back with a result.
    Reply(OperationResult),
    /// A oneway request was written to the transport.
    Sent,
    /// The request was added to the proxy's batch queue.
    Queued,
}

impl InvocationOutcome {
    pub fn result(&self) -> Option<&OperationResult> {
        match self {
            Self::Reply(result) => Some(result),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<OperationResult> {
        match self {
            Self::Reply(result) => Some(result),
            _ => None,
        }
    }
}

enum State {
    Twoway {
        request_id: u32,
        rx: oneshot::Receiver<Result<OperationResult>>,
        pending: Weak<PendingTable>,
    },
    Sent {
        rx: oneshot::Receiver<Result<()>>,
    },
    Ready(Result<InvocationOutcome>),
    Done,
}

/// Future for a single in-flight invocation.
///
/// Dropping the handle cancels the call: its entry leaves the pending table
/// and a reply that arrives later is discarded by the connection. Polling a
/// handle again after it resolved yields [`InvocationError::Canceled`].
pub struct InvocationHandle {
    state: State,
    deadline: Option<(Duration, Pin<Box<Sleep>>)>,
}

impl InvocationHandle {
    pub(crate) fn twoway(
        request_id: u32,
        rx: oneshot::Receiver<Result<OperationResult>>,
        pending: Weak<PendingTable>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            state: State::Twoway {
                request_id,
                rx,
                pending,
            },
            deadline: timeout.map(deadline),
        }
    }

    pub(crate) fn sent(rx: oneshot::Receiver<Result<()>>, timeout: Option<Duration>) -> Self {
        Self {
            state: State::Sent { rx },
            deadline: timeout.map(deadline),
        }
    }

    pub(crate) fn queued() -> Self {
        Self::ready(Ok(InvocationOutcome::Queued))
    }

    pub(crate) fn failed(error: InvocationError) -> Self {
        Self::ready(Err(error))
    }

    fn ready(outcome: Result<InvocationOutcome>) -> Self {
        Self {
            state: State::Ready(outcome),
            deadline: None,
        }
    }

    /// Request id on the wire, for twoway calls still waiting on a reply.
    pub fn request_id(&self) -> Option<u32> {
        match &self.state {
            State::Twoway { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Abandon the call. The handle then resolves to
    /// [`InvocationError::Canceled`].
    pub fn cancel(&mut self) {
        self.abandon();
        self.deadline = None;
        self.state = State::Ready(Err(InvocationError::Canceled));
    }

    fn abandon(&mut self) {
        if let State::Twoway {
            request_id,
            pending,
            ..
        } = &self.state
        {
            if let Some(pending) = pending.upgrade() {
                pending.cancel(*request_id);
            }
        }
    }
}

fn deadline(timeout: Duration) -> (Duration, Pin<Box<Sleep>>) {
    (timeout, Box::pin(tokio::time::sleep(timeout)))
}

fn dropped() -> InvocationError {
    InvocationError::ConnectionLost("connection dropped".to_string())
}

impl Future for InvocationHandle {
    type Output = Result<InvocationOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if matches!(this.state, State::Ready(_)) {
            if let State::Ready(outcome) = std::mem::replace(&mut this.state, State::Done) {
                return Poll::Ready(outcome);
            }
        }

        let polled = match &mut this.state {
            State::Twoway { rx, .. } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(reply)) => Some(reply.map(InvocationOutcome::Reply)),
                Poll::Ready(Err(_)) => Some(Err(dropped())),
                Poll::Pending => None,
            },
            State::Sent { rx } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(sent)) => Some(sent.map(|()| InvocationOutcome::Sent)),
                Poll::Ready(Err(_)) => Some(Err(dropped())),
                Poll::Pending => None,
            },
            State::Ready(_) | State::Done => Some(Err(InvocationError::Canceled)),
        };

        if let Some(outcome) = polled {
            this.state = State::Done;
            this.deadline = None;
            return Poll::Ready(outcome);
        }

        if let Some((timeout, sleep)) = &mut this.deadline {
            if sleep.as_mut().poll(cx).is_ready() {
                let timeout = *timeout;
                this.abandon();
                this.state = State::Done;
                this.deadline = None;
                return Poll::Ready(Err(InvocationError::Timeout(timeout)));
            }
        }

        Poll::Pending
    }
}

impl Drop for InvocationHandle {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for InvocationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Twoway { .. } => "waiting for reply",
            State::Sent { .. } => "waiting for send",
            State::Ready(_) => "ready",
            State::Done => "done",
        };
        f.debug_struct("InvocationHandle")
            .field("state", &state)
            .field("request_id", &self.request_id())
            .finish()
    }
}
