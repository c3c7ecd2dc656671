use std::collections::BTreeMap;

use bytes::{BufMut, Bytes};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::mode::{InvocationKind, OperationMode};
use crate::wire;

/// Request-scoped string metadata. Ordered so its encoding is deterministic.
pub type Context = BTreeMap<String, String>;

/// One call attempt: immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    identity: Identity,
    operation: String,
    mode: OperationMode,
    kind: InvocationKind,
    context: Context,
    params: Envelope,
}

impl OperationRequest {
    pub fn new(
        identity: Identity,
        operation: impl Into<String>,
        mode: OperationMode,
        kind: InvocationKind,
        context: Context,
        params: Envelope,
    ) -> Result<Self> {
        let operation = operation.into();
        if operation.is_empty() {
            return Err(Error::InvalidName("operation name must not be empty".to_string()));
        }
        Ok(Self {
            identity,
            operation,
            mode,
            kind,
            context,
            params,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn kind(&self) -> InvocationKind {
        self.kind
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn params(&self) -> &Envelope {
        &self.params
    }

    /// The same call travelling as `kind`.
    pub fn with_kind(mut self, kind: InvocationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Write the request body:
    /// `[identity][operation][mode][kind][context][params]`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        self.identity.encode(buf);
        wire::put_str(buf, &self.operation);
        buf.put_u8(self.mode.as_u8());
        buf.put_u8(self.kind.as_u8());
        buf.put_u32(self.context.len() as u32);
        for (key, value) in &self.context {
            wire::put_str(buf, key);
            wire::put_str(buf, value);
        }
        self.params.write_to(buf);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let identity = Identity::decode(buf)?;
        let operation = wire::get_str(buf)?;

        let raw_mode = wire::get_u8(buf)?;
        let mode = OperationMode::from_u8(raw_mode)
            .ok_or_else(|| Error::MalformedEnvelope(format!("unknown operation mode {}", raw_mode)))?;
        let raw_kind = wire::get_u8(buf)?;
        let kind = InvocationKind::from_u8(raw_kind)
            .ok_or_else(|| Error::MalformedEnvelope(format!("unknown invocation kind {}", raw_kind)))?;

        let count = wire::get_u32(buf)?;
        let mut context = Context::new();
        for _ in 0..count {
            let key = wire::get_str(buf)?;
            let value = wire::get_str(buf)?;
            context.insert(key, value);
        }

        let params = Envelope::read_from(buf)?;
        Self::new(identity, operation, mode, kind, context, params)
    }
}
