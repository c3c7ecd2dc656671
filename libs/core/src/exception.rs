//! Exception codec.
//!
//! Frames failures into the same [`Envelope`] used for success results. The
//! codec does not know the shape of any user-declared exception: it only
//! carries a type id and opaque field bytes for the caller to decode.
//!
//! Envelope data layout:
//!
//! ```text
//! [kind: u8][has_type_id: u8][type_id: str, if has_type_id == 1][fields: blob]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::wire;

/// Discriminant of a framed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// A failure declared by the operation's signature
    UserDeclared,
    OperationNotExist,
    ObjectNotExist,
    /// Anything the receiver could not classify, including kinds newer than
    /// this codec
    UnknownLocal,
}

impl ExceptionKind {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::UserDeclared => 1,
            Self::ObjectNotExist => 2,
            Self::OperationNotExist => 4,
            Self::UnknownLocal => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::UserDeclared),
            2 => Some(Self::ObjectNotExist),
            4 => Some(Self::OperationNotExist),
            5 => Some(Self::UnknownLocal),
            _ => None,
        }
    }
}

/// A decoded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionPayload {
    pub kind: ExceptionKind,
    pub type_id: Option<String>,
    pub fields: Bytes,
}

impl ExceptionPayload {
    pub fn user(type_id: impl Into<String>, fields: impl Into<Bytes>) -> Self {
        Self {
            kind: ExceptionKind::UserDeclared,
            type_id: Some(type_id.into()),
            fields: fields.into(),
        }
    }

    pub fn object_not_exist(identity: &Identity, operation: &str) -> Self {
        Self {
            kind: ExceptionKind::ObjectNotExist,
            type_id: None,
            fields: NotExistDetails::encode(identity, operation),
        }
    }

    pub fn operation_not_exist(identity: &Identity, operation: &str) -> Self {
        Self {
            kind: ExceptionKind::OperationNotExist,
            type_id: None,
            fields: NotExistDetails::encode(identity, operation),
        }
    }

    pub fn unknown_local(message: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::UnknownLocal,
            type_id: None,
            fields: Bytes::from(message.into().into_bytes()),
        }
    }

    pub fn encode(&self) -> Envelope {
        encode_exception(self.kind, self.type_id.as_deref(), self.fields.clone())
    }

    /// Diagnostics attached to a not-exist failure, if the fields carry them.
    pub fn not_exist_details(&self) -> Option<NotExistDetails> {
        match self.kind {
            ExceptionKind::ObjectNotExist | ExceptionKind::OperationNotExist => {
                NotExistDetails::decode(self.fields.clone()).ok()
            }
            _ => None,
        }
    }

    /// Message of an unknown-local failure, lossily decoded.
    pub fn message(&self) -> Option<String> {
        match self.kind {
            ExceptionKind::UnknownLocal => Some(String::from_utf8_lossy(&self.fields).into_owned()),
            _ => None,
        }
    }
}

/// Target and operation named by an object/operation-not-exist failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotExistDetails {
    pub identity: Identity,
    pub operation: String,
}

impl NotExistDetails {
    fn encode(identity: &Identity, operation: &str) -> Bytes {
        let mut buf = BytesMut::new();
        identity.encode(&mut buf);
        wire::put_str(&mut buf, operation);
        buf.freeze()
    }

    fn decode(mut fields: Bytes) -> Result<Self> {
        let identity = Identity::decode(&mut fields)?;
        let operation = wire::get_str(&mut fields)?;
        Ok(Self { identity, operation })
    }
}

/// Frame a failure into an envelope.
pub fn encode_exception(kind: ExceptionKind, type_id: Option<&str>, fields: impl Into<Bytes>) -> Envelope {
    let fields = fields.into();
    let mut buf = BytesMut::new();
    buf.put_u8(kind.as_u8());
    match type_id {
        Some(type_id) => {
            buf.put_u8(1);
            wire::put_str(&mut buf, type_id);
        }
        None => buf.put_u8(0),
    }
    wire::put_blob(&mut buf, &fields);
    Envelope::wrap(buf.freeze())
}

/// Decode a framed failure.
///
/// An unrecognised discriminant is not an error: it yields
/// [`ExceptionKind::UnknownLocal`] with the undecoded remainder as `fields`.
/// Only an envelope that cannot be unwrapped, or a known kind with a broken
/// body, fails.
pub fn decode_exception(envelope: &Envelope) -> Result<ExceptionPayload> {
    let mut data = envelope.unwrap()?;
    let raw_kind = wire::get_u8(&mut data)?;

    let Some(kind) = ExceptionKind::from_u8(raw_kind) else {
        return Ok(ExceptionPayload {
            kind: ExceptionKind::UnknownLocal,
            type_id: None,
            fields: data,
        });
    };

    let type_id = match wire::get_u8(&mut data)? {
        0 => None,
        1 => Some(wire::get_str(&mut data)?),
        other => {
            return Err(Error::MalformedEnvelope(format!(
                "invalid type id marker {}",
                other
            )))
        }
    };
    let fields = wire::get_blob(&mut data)?;
    if data.has_remaining() {
        return Err(Error::MalformedEnvelope(format!(
            "{} trailing bytes after exception fields",
            data.remaining()
        )));
    }

    Ok(ExceptionPayload {
        kind,
        type_id,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn user_exception_keeps_type_and_fields() {
        let env = encode_exception(ExceptionKind::UserDeclared, Some("T"), vec![1, 2, 3]);
        let decoded = decode_exception(&env).unwrap();
        assert_eq!(decoded, ExceptionPayload::user("T", vec![1, 2, 3]));
    }

    #[test]
    fn not_exist_carries_diagnostics() {
        let id = Identity::new("test").unwrap();
        let payload = ExceptionPayload::operation_not_exist(&id, "doesNotExist");
        let decoded = decode_exception(&payload.encode()).unwrap();

        assert_eq!(decoded.kind, ExceptionKind::OperationNotExist);
        let details = decoded.not_exist_details().unwrap();
        assert_eq!(details.identity, id);
        assert_eq!(details.operation, "doesNotExist");
    }

    #[test]
    fn unknown_discriminant_degrades_to_unknown_local() {
        let mut buf = BytesMut::new();
        buf.put_u8(99);
        buf.put_slice(b"future");
        let env = Envelope::wrap(buf.freeze());

        let decoded = decode_exception(&env).unwrap();
        assert_eq!(decoded.kind, ExceptionKind::UnknownLocal);
        assert_eq!(decoded.type_id, None);
        assert_eq!(&decoded.fields[..], b"future");
    }

    #[test]
    fn unknown_local_message_round_trips() {
        let payload = ExceptionPayload::unknown_local("boom");
        let decoded = decode_exception(&payload.encode()).unwrap();
        assert_eq!(decoded.message().as_deref(), Some("boom"));
    }

    #[test]
    fn empty_envelope_is_malformed() {
        assert!(decode_exception(&Envelope::empty()).is_err());
    }

    proptest! {
        #[test]
        fn user_fields_survive_byte_for_byte(
            type_id in "[:A-Za-z]{1,32}",
            fields in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let env = encode_exception(ExceptionKind::UserDeclared, Some(&type_id), fields.clone());
            let decoded = decode_exception(&env).unwrap();
            prop_assert_eq!(decoded.type_id, Some(type_id));
            prop_assert_eq!(&decoded.fields[..], &fields[..]);
        }
    }
}
