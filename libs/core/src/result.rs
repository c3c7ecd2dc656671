use std::fmt;

use bytes::Bytes;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::exception::{self, ExceptionKind, ExceptionPayload};

/// Outcome class of a twoway dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    Ok,
    UserException,
    ObjectNotExist,
    OperationNotExist,
    UnknownLocalFailure,
}

impl ReplyStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::UserException => 1,
            Self::ObjectNotExist => 2,
            Self::OperationNotExist => 4,
            Self::UnknownLocalFailure => 5,
        }
    }

    /// Decode a status byte. Bytes this side does not know about degrade to
    /// [`ReplyStatus::UnknownLocalFailure`].
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::UserException,
            2 => Self::ObjectNotExist,
            4 => Self::OperationNotExist,
            _ => Self::UnknownLocalFailure,
        }
    }

    fn for_exception(kind: ExceptionKind) -> Self {
        match kind {
            ExceptionKind::UserDeclared => Self::UserException,
            ExceptionKind::ObjectNotExist => Self::ObjectNotExist,
            ExceptionKind::OperationNotExist => Self::OperationNotExist,
            ExceptionKind::UnknownLocal => Self::UnknownLocalFailure,
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::UserException => "user exception",
            Self::ObjectNotExist => "object does not exist",
            Self::OperationNotExist => "operation does not exist",
            Self::UnknownLocalFailure => "unknown local failure",
        };
        f.write_str(s)
    }
}

/// Result of a twoway dispatch: a status and exactly one payload, either the
/// success envelope (`status == Ok`) or an exception envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    status: ReplyStatus,
    payload: Envelope,
}

impl OperationResult {
    pub fn ok(payload: Envelope) -> Self {
        Self {
            status: ReplyStatus::Ok,
            payload,
        }
    }

    pub fn from_exception(exception: &ExceptionPayload) -> Self {
        Self {
            status: ReplyStatus::for_exception(exception.kind),
            payload: exception.encode(),
        }
    }

    /// Rebuild a result from its wire parts.
    pub fn from_parts(status: ReplyStatus, payload: Envelope) -> Self {
        Self { status, payload }
    }

    pub fn status(&self) -> ReplyStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// The raw payload envelope, whichever kind it is.
    pub fn payload(&self) -> &Envelope {
        &self.payload
    }

    /// Success bytes, or `None` when the result carries an exception.
    pub fn success(&self) -> Option<Result<Bytes>> {
        self.is_ok().then(|| self.payload.unwrap())
    }

    /// Decoded exception, or `None` on success.
    ///
    /// A payload that cannot be decoded still yields an exception: an
    /// [`ExceptionKind::UnknownLocal`] carrying the raw envelope bytes.
    pub fn exception(&self) -> Option<ExceptionPayload> {
        if self.is_ok() {
            return None;
        }
        Some(
            exception::decode_exception(&self.payload).unwrap_or_else(|_| ExceptionPayload {
                kind: ExceptionKind::UnknownLocal,
                type_id: None,
                fields: self.payload.as_bytes().clone(),
            }),
        )
    }

    /// The `(ok, raw out bytes)` pair of the raw invocation surface.
    pub fn into_pair(self) -> (bool, Envelope) {
        (self.is_ok(), self.payload)
    }
}
