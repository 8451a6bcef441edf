use std::{fmt, marker::PhantomData};

use serde::{Deserialize, Serialize};

use crate::{
    codec::{EncodedPayload, JsonCodec, Message},
    descriptor::ComponentType,
    error::{EncodeError, ErrorReply},
    metadata::Metadata,
};

/// A call to a component method that has not been executed yet.
///
/// Built by a [`ComponentMethodRef`](crate::client::ComponentMethodRef), so
/// the method is known to exist and the message to match its parameters.
/// Immutable: [`with_metadata`](Self::with_metadata) returns a new call.
pub struct DeferredCall<Req, Res> {
    component_type: ComponentType,
    component_id: Option<String>,
    method_name: String,
    message: Req,
    metadata: Metadata,
    _reply: PhantomData<fn() -> Res>,
}

impl<Req: Message, Res: Message> DeferredCall<Req, Res> {
    pub(crate) fn new(
        component_type: ComponentType,
        component_id: Option<String>,
        method_name: String,
        message: Req,
        metadata: Metadata,
    ) -> Self {
        Self {
            component_type,
            component_id,
            method_name,
            message,
            metadata,
            _reply: PhantomData,
        }
    }

    pub fn component_type(&self) -> &ComponentType {
        &self.component_type
    }

    pub fn component_id(&self) -> Option<&str> {
        self.component_id.as_deref()
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn message(&self) -> &Req {
        &self.message
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// A copy of this call with `metadata` merged over its headers.
    pub fn with_metadata(&self, metadata: &Metadata) -> Self
    where
        Req: Clone,
    {
        Self {
            metadata: self.metadata.clone().merge(metadata),
            ..self.clone()
        }
    }

    /// Encodes the call into its wire form.
    pub fn encode(&self, codec: &JsonCodec) -> Result<ComponentCall, EncodeError> {
        Ok(ComponentCall {
            component_type: self.component_type.clone(),
            component_id: self.component_id.clone(),
            method_name: self.method_name.clone(),
            payload: codec.encode(&self.message)?,
            metadata: self.metadata.clone(),
        })
    }
}

impl<Req: Clone, Res> Clone for DeferredCall<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            component_type: self.component_type.clone(),
            component_id: self.component_id.clone(),
            method_name: self.method_name.clone(),
            message: self.message.clone(),
            metadata: self.metadata.clone(),
            _reply: PhantomData,
        }
    }
}

impl<Req: fmt::Debug, Res> fmt::Debug for DeferredCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCall")
            .field("component_type", &self.component_type)
            .field("component_id", &self.component_id)
            .field("method_name", &self.method_name)
            .field("message", &self.message)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Wire form of a call, as handed to and received from a transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCall {
    pub component_type: ComponentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    pub method_name: String,
    pub payload: EncodedPayload,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Wire form of the outcome of a call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub body: ReplyBody,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum ReplyBody {
    Ok(EncodedPayload),
    Error(ErrorReply),
}

impl Reply {
    pub fn ok(payload: EncodedPayload, metadata: Metadata) -> Self {
        Self {
            body: ReplyBody::Ok(payload),
            metadata,
        }
    }

    pub fn error(err: impl Into<ErrorReply>) -> Self {
        Self {
            body: ReplyBody::Error(err.into()),
            metadata: Metadata::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.body, ReplyBody::Ok(_))
    }

    pub fn into_result(self) -> Result<EncodedPayload, ErrorReply> {
        match self.body {
            ReplyBody::Ok(payload) => Ok(payload),
            ReplyBody::Error(err) => Err(err),
        }
    }
}
