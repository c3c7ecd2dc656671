//! Wire messages exchanged over a connection.
//!
//! Each transport frame carries exactly one message:
//!
//! ```text
//! Request       [0][request_id: u32][request body]
//! BatchRequest  [1][count: u32][request body] * count
//! Reply         [2][request_id: u32][status: u8][payload envelope]
//! Close         [4]
//! ```
//!
//! A request id of 0 marks a request that expects no reply.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use relay_core::{wire, Envelope, OperationRequest, OperationResult, ReplyStatus};
use thiserror::Error;

const REQUEST: u8 = 0;
const BATCH_REQUEST: u8 = 1;
const REPLY: u8 = 2;
const CLOSE_CONNECTION: u8 = 4;

/// Request id used for oneway and batched requests.
pub const NO_REPLY_ID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request {
        request_id: u32,
        request: OperationRequest,
    },
    Batch(Vec<OperationRequest>),
    Reply {
        request_id: u32,
        result: OperationResult,
    },
    Close,
}

/// A frame that could not be decoded.
///
/// `request_id` is set when the header was readable, so the failure can be
/// pinned to a single call instead of the whole connection.
#[derive(Error, Debug, Clone)]
#[error("malformed message: {source}")]
pub struct DecodeError {
    pub request_id: Option<u32>,
    pub source: relay_core::Error,
}

impl DecodeError {
    fn new(request_id: Option<u32>, source: relay_core::Error) -> Self {
        Self { request_id, source }
    }
}

impl Message {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::Request { request_id, request } => {
                buf.put_u8(REQUEST);
                buf.put_u32(*request_id);
                request.encode(&mut buf);
            }
            Self::Batch(requests) => {
                buf.put_u8(BATCH_REQUEST);
                buf.put_u32(requests.len() as u32);
                for request in requests {
                    request.encode(&mut buf);
                }
            }
            Self::Reply { request_id, result } => {
                buf.put_u8(REPLY);
                buf.put_u32(*request_id);
                buf.put_u8(result.status().as_u8());
                result.payload().write_to(&mut buf);
            }
            Self::Close => buf.put_u8(CLOSE_CONNECTION),
        }
        buf.freeze()
    }

    pub fn decode(mut frame: Bytes) -> Result<Self, DecodeError> {
        let message_type = wire::get_u8(&mut frame).map_err(|e| DecodeError::new(None, e))?;

        let message = match message_type {
            REQUEST => {
                let request_id = wire::get_u32(&mut frame).map_err(|e| DecodeError::new(None, e))?;
                let request = OperationRequest::decode(&mut frame)
                    .map_err(|e| DecodeError::new(Some(request_id), e))?;
                ensure_consumed(&frame, Some(request_id))?;
                Self::Request { request_id, request }
            }
            BATCH_REQUEST => {
                let count = wire::get_u32(&mut frame).map_err(|e| DecodeError::new(None, e))?;
                // Cap preallocation by what the frame could hold.
                let mut requests = Vec::with_capacity((count as usize).min(frame.remaining()));
                for _ in 0..count {
                    let request =
                        OperationRequest::decode(&mut frame).map_err(|e| DecodeError::new(None, e))?;
                    requests.push(request);
                }
                ensure_consumed(&frame, None)?;
                Self::Batch(requests)
            }
            REPLY => {
                let request_id = wire::get_u32(&mut frame).map_err(|e| DecodeError::new(None, e))?;
                let status = wire::get_u8(&mut frame)
                    .map(ReplyStatus::from_u8)
                    .map_err(|e| DecodeError::new(Some(request_id), e))?;
                let payload =
                    Envelope::read_from(&mut frame).map_err(|e| DecodeError::new(Some(request_id), e))?;
                ensure_consumed(&frame, Some(request_id))?;
                Self::Reply {
                    request_id,
                    result: OperationResult::from_parts(status, payload),
                }
            }
            CLOSE_CONNECTION => Self::Close,
            other => {
                return Err(DecodeError::new(
                    None,
                    relay_core::Error::MalformedEnvelope(format!("unknown message type {}", other)),
                ))
            }
        };
        Ok(message)
    }
}

fn ensure_consumed(frame: &Bytes, request_id: Option<u32>) -> Result<(), DecodeError> {
    if frame.has_remaining() {
        return Err(DecodeError::new(
            request_id,
            relay_core::Error::MalformedEnvelope(format!("{} trailing bytes", frame.remaining())),
        ));
    }
    Ok(())
}
