//! Envelope - the unit of protocol exchange.
//!
//! On the wire an envelope is a MessagePack map:
//!
//! ```text
//! { stanza_id: int32, conversation_id: string, type: uint16,
//!   meta: map<string, any> (omitted when empty), body: <shape selected by type> }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::messages::{
    Acknowledgement, AssistantMessage, AssistantSentence, ErrorMessage, StartAnswer, UserMessage,
};
use crate::{Body, ConversationId, LocalId, MessageType, StanzaId, SyncError};

/// Well-known keys of the envelope `meta` map.
pub mod meta_keys {
    /// Client-local id of the message the envelope carries.
    pub const LOCAL_ID: &str = "localId";
    /// Origination time (unix millis).
    pub const TIMESTAMP: &str = "timestamp";
    /// Version string of the sending client.
    pub const CLIENT_VERSION: &str = "client_version";
    /// Server-provided reason attached to a negative acknowledgement.
    pub const REASON: &str = "reason";
}

/// A single out-of-band meta value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    Str(String),
}

impl MetaValue {
    /// The value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Str(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Str(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

/// Open string-keyed map of out-of-band fields.
pub type Meta = BTreeMap<String, MetaValue>;

/// One protocol message.
///
/// Envelopes are immutable: the builder-style methods consume the envelope
/// and return a modified copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    stanza_id: StanzaId,
    conversation_id: ConversationId,
    meta: Meta,
    body: Body,
}

impl Envelope {
    /// Create a new envelope. The message type is taken from the body.
    pub fn new(stanza_id: StanzaId, conversation_id: ConversationId, body: Body) -> Self {
        Self {
            stanza_id,
            conversation_id,
            meta: Meta::new(),
            body,
        }
    }

    /// Create an acknowledgement for `acknowledged`.
    pub fn acknowledgement(
        stanza_id: StanzaId,
        conversation_id: ConversationId,
        acknowledged: StanzaId,
        success: bool,
    ) -> Self {
        let body = Body::Acknowledgement(Acknowledgement {
            conversation_id: conversation_id.as_str().to_string(),
            acknowledged_stanza_id: acknowledged,
            success,
        });
        Self::new(stanza_id, conversation_id, body)
    }

    /// Return a copy carrying a different stanza id.
    pub fn with_stanza_id(mut self, stanza_id: StanzaId) -> Self {
        self.stanza_id = stanza_id;
        self
    }

    /// Return a copy with `key` set in the meta map.
    pub fn with_meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    /// The correlation id.
    pub fn stanza_id(&self) -> StanzaId {
        self.stanza_id
    }

    /// The owning conversation.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The message type.
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// The meta map.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// A string meta value.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(MetaValue::as_str)
    }

    /// The client-local id carried in `meta.localId`.
    pub fn local_id(&self) -> Option<LocalId> {
        self.meta_str(meta_keys::LOCAL_ID).map(LocalId::from)
    }

    /// The typed body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The acknowledgement body, if this is an acknowledgement.
    pub fn as_acknowledgement(&self) -> Option<&Acknowledgement> {
        match &self.body {
            Body::Acknowledgement(ack) => Some(ack),
            _ => None,
        }
    }

    /// Serialize to MessagePack bytes (named fields).
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        let wire = WireEnvelope {
            stanza_id: self.stanza_id,
            conversation_id: &self.conversation_id,
            message_type: self.message_type().code(),
            meta: &self.meta,
            body: &self.body,
        };
        rmp_serde::to_vec_named(&wire).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    ///
    /// The header is decoded first; its `type` then selects the body shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        let header: WireHeader = rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)?;
        let message_type = MessageType::try_from(header.message_type)?;

        let body = match message_type {
            MessageType::UserMessage => Body::UserMessage(decode_body::<UserMessage>(bytes)?),
            MessageType::Acknowledgement => {
                Body::Acknowledgement(decode_body::<Acknowledgement>(bytes)?)
            }
            MessageType::AssistantMessage => {
                Body::AssistantMessage(decode_body::<AssistantMessage>(bytes)?)
            }
            MessageType::AssistantSentence => {
                Body::AssistantSentence(decode_body::<AssistantSentence>(bytes)?)
            }
            MessageType::StartAnswer => Body::StartAnswer(decode_body::<StartAnswer>(bytes)?),
            MessageType::ErrorMessage => Body::ErrorMessage(decode_body::<ErrorMessage>(bytes)?),
            other => Body::Unmodeled(other),
        };

        Ok(Self {
            stanza_id: header.stanza_id,
            conversation_id: header.conversation_id,
            meta: header.meta.unwrap_or_default(),
            body,
        })
    }
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    stanza_id: StanzaId,
    conversation_id: &'a ConversationId,
    #[serde(rename = "type")]
    message_type: u16,
    #[serde(skip_serializing_if = "meta_is_empty")]
    meta: &'a Meta,
    body: &'a Body,
}

fn meta_is_empty(meta: &&Meta) -> bool {
    meta.is_empty()
}

#[derive(Deserialize)]
struct WireHeader {
    stanza_id: StanzaId,
    conversation_id: ConversationId,
    #[serde(rename = "type")]
    message_type: u16,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct WireBody<T> {
    body: T,
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
    rmp_serde::from_slice::<WireBody<T>>(bytes)
        .map(|wire| wire.body)
        .map_err(SyncError::Deserialization)
}
