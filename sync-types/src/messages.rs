//! Protocol message types and bodies.
//!
//! The envelope's `type` field selects the shape of its `body`. Only the
//! bodies the sync engine reads or authors are modeled; every other type
//! decodes to [`Body::Unmodeled`].

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::{StanzaId, SyncError};

/// Message type discriminator (numeric on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Error notification
    ErrorMessage = 1,
    /// User's text input
    UserMessage = 2,
    /// Complete assistant response (non-streaming)
    AssistantMessage = 3,
    /// Raw audio data segment
    AudioChunk = 4,
    /// Internal reasoning trace
    ReasoningStep = 5,
    /// Request to execute a tool
    ToolUseRequest = 6,
    /// Tool execution result
    ToolUseResult = 7,
    /// Confirm receipt of a stanza
    Acknowledgement = 8,
    /// Speech-to-text output
    Transcription = 9,
    /// Stop current operation
    ControlStop = 10,
    /// Edit/vary a previous message
    ControlVariation = 11,
    /// Session configuration
    Configuration = 12,
    /// Begin streaming response
    StartAnswer = 13,
    /// Memory retrieval log
    MemoryTrace = 14,
    /// Assistant commentary
    Commentary = 15,
    /// Streaming response chunk
    AssistantSentence = 16,
    /// Vote sent from client to server
    Feedback = 20,
    /// Server confirmation of a vote
    FeedbackConfirmation = 21,
    /// Note message
    UserNote = 22,
    /// Note confirmation
    NoteConfirmation = 23,
    /// Memory CRUD action
    MemoryAction = 24,
    /// Memory confirmation
    MemoryConfirmation = 25,
    /// Server info broadcast
    ServerInfo = 26,
    /// Session statistics
    SessionStats = 27,
    /// Dimension weight preference
    DimensionPreference = 29,
    /// Elite solution selection
    EliteSelect = 30,
    /// Available elite solutions
    EliteOptions = 31,
}

impl MessageType {
    /// The numeric wire code.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Human-readable name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            MessageType::ErrorMessage => "ErrorMessage",
            MessageType::UserMessage => "UserMessage",
            MessageType::AssistantMessage => "AssistantMessage",
            MessageType::AudioChunk => "AudioChunk",
            MessageType::ReasoningStep => "ReasoningStep",
            MessageType::ToolUseRequest => "ToolUseRequest",
            MessageType::ToolUseResult => "ToolUseResult",
            MessageType::Acknowledgement => "Acknowledgement",
            MessageType::Transcription => "Transcription",
            MessageType::ControlStop => "ControlStop",
            MessageType::ControlVariation => "ControlVariation",
            MessageType::Configuration => "Configuration",
            MessageType::StartAnswer => "StartAnswer",
            MessageType::MemoryTrace => "MemoryTrace",
            MessageType::Commentary => "Commentary",
            MessageType::AssistantSentence => "AssistantSentence",
            MessageType::Feedback => "Feedback",
            MessageType::FeedbackConfirmation => "FeedbackConfirmation",
            MessageType::UserNote => "UserNote",
            MessageType::NoteConfirmation => "NoteConfirmation",
            MessageType::MemoryAction => "MemoryAction",
            MessageType::MemoryConfirmation => "MemoryConfirmation",
            MessageType::ServerInfo => "ServerInfo",
            MessageType::SessionStats => "SessionStats",
            MessageType::DimensionPreference => "DimensionPreference",
            MessageType::EliteSelect => "EliteSelect",
            MessageType::EliteOptions => "EliteOptions",
        }
    }
}

impl TryFrom<u16> for MessageType {
    type Error = SyncError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::ErrorMessage),
            2 => Ok(MessageType::UserMessage),
            3 => Ok(MessageType::AssistantMessage),
            4 => Ok(MessageType::AudioChunk),
            5 => Ok(MessageType::ReasoningStep),
            6 => Ok(MessageType::ToolUseRequest),
            7 => Ok(MessageType::ToolUseResult),
            8 => Ok(MessageType::Acknowledgement),
            9 => Ok(MessageType::Transcription),
            10 => Ok(MessageType::ControlStop),
            11 => Ok(MessageType::ControlVariation),
            12 => Ok(MessageType::Configuration),
            13 => Ok(MessageType::StartAnswer),
            14 => Ok(MessageType::MemoryTrace),
            15 => Ok(MessageType::Commentary),
            16 => Ok(MessageType::AssistantSentence),
            20 => Ok(MessageType::Feedback),
            21 => Ok(MessageType::FeedbackConfirmation),
            22 => Ok(MessageType::UserNote),
            23 => Ok(MessageType::NoteConfirmation),
            24 => Ok(MessageType::MemoryAction),
            25 => Ok(MessageType::MemoryConfirmation),
            26 => Ok(MessageType::ServerInfo),
            27 => Ok(MessageType::SessionStats),
            29 => Ok(MessageType::DimensionPreference),
            30 => Ok(MessageType::EliteSelect),
            31 => Ok(MessageType::EliteOptions),
            _ => Err(SyncError::InvalidMessageType(value)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// User's text input (type 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    /// Message id
    pub id: String,
    /// Id of the message this one follows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Owning conversation
    pub conversation_id: String,
    /// Message text
    pub content: String,
    /// Authoring time (unix millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Confirmation that a stanza was received (type 8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    /// Owning conversation
    #[serde(default)]
    pub conversation_id: String,
    /// The stanza being acknowledged
    pub acknowledged_stanza_id: StanzaId,
    /// Whether the server accepted the stanza
    pub success: bool,
}

/// Complete assistant response (type 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    /// Message id
    pub id: String,
    /// Id of the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Owning conversation
    pub conversation_id: String,
    /// Response text
    pub content: String,
    /// Server time (unix millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Streaming response chunk (type 16).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSentence {
    /// Sentence id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Id of the StartAnswer this sentence belongs to
    pub previous_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Position in the answer
    pub sequence: i32,
    /// Sentence text
    pub text: String,
    /// Last sentence of the answer
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
}

/// Start of a streamed answer (type 13).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnswer {
    /// Answer id
    pub id: String,
    /// Id of the message being answered
    pub previous_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// "text", "voice" or "text+voice"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<String>,
    /// Expected number of sentences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_sentence_count: Option<i32>,
}

/// Error notification (type 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Error id
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Numeric error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// 0 = info, 1 = warning, 2 = error, 3 = critical
    pub severity: i32,
    /// Whether the client may retry
    pub recoverable: bool,
    /// Id of the message that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_id: Option<String>,
}

/// Type-tagged envelope body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// User's text input
    UserMessage(UserMessage),
    /// Receipt confirmation
    Acknowledgement(Acknowledgement),
    /// Complete assistant response
    AssistantMessage(AssistantMessage),
    /// Streaming response chunk
    AssistantSentence(AssistantSentence),
    /// Start of a streamed answer
    StartAnswer(StartAnswer),
    /// Error notification
    ErrorMessage(ErrorMessage),
    /// A type this crate does not model; the body is not retained.
    Unmodeled(MessageType),
}

impl Body {
    /// The message type this body is tagged with.
    pub fn message_type(&self) -> MessageType {
        match self {
            Body::UserMessage(_) => MessageType::UserMessage,
            Body::Acknowledgement(_) => MessageType::Acknowledgement,
            Body::AssistantMessage(_) => MessageType::AssistantMessage,
            Body::AssistantSentence(_) => MessageType::AssistantSentence,
            Body::StartAnswer(_) => MessageType::StartAnswer,
            Body::ErrorMessage(_) => MessageType::ErrorMessage,
            Body::Unmodeled(message_type) => *message_type,
        }
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Body::UserMessage(body) => body.serialize(serializer),
            Body::Acknowledgement(body) => body.serialize(serializer),
            Body::AssistantMessage(body) => body.serialize(serializer),
            Body::AssistantSentence(body) => body.serialize(serializer),
            Body::StartAnswer(body) => body.serialize(serializer),
            Body::ErrorMessage(body) => body.serialize(serializer),
            Body::Unmodeled(_) => serializer.serialize_unit(),
        }
    }
}
