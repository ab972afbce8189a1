//! ACL messages and their JSON wire codec
//!
//! One wire frame is one JSON object with camelCase keys:
//!
//! ```json
//! {"performative":"REQUEST","sender":"a","receiver":"b","content":"...",
//!  "conversationId":"c-1","replyWith":"r-1"}
//! ```
//!
//! `performative`, `sender` and `receiver` are required and non-empty.
//! `content` and `conversationId` default to the empty string; the reply
//! correlation fields and `language`/`ontology`/`protocol` are optional.
//! Unknown keys are ignored. The codec is stateless and does no framing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{DecodeError, DecodeResult};

/// Speech-act tag of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Performative {
    /// Accept a previously submitted proposal
    AcceptProposal,
    /// Agree to perform an action
    Agree,
    /// Cancel a previous request
    Cancel,
    /// Call for proposals
    Cfp,
    /// Confirm a proposition
    Confirm,
    /// Disconfirm a proposition
    Disconfirm,
    /// Report a failed action
    Failure,
    /// Inform that a proposition is true
    Inform,
    /// Inform whether a proposition is true
    InformIf,
    /// Inform the object referred to by a description
    InformRef,
    /// Report that a message was not understood
    NotUnderstood,
    /// Pass a message on to others
    Propagate,
    /// Submit a proposal
    Propose,
    /// Forward a message to selected agents
    Proxy,
    /// Ask whether a proposition is true
    QueryIf,
    /// Ask for the object referred to by a description
    QueryRef,
    /// Refuse to perform an action
    Refuse,
    /// Reject a proposal
    RejectProposal,
    /// Request an action
    Request,
    /// Request an action when a condition holds
    RequestWhen,
    /// Request an action whenever a condition holds
    RequestWhenever,
    /// Subscribe to changes of a reference
    Subscribe,
}

impl Performative {
    /// Every performative, in declaration order
    pub const ALL: [Performative; 22] = [
        Performative::AcceptProposal,
        Performative::Agree,
        Performative::Cancel,
        Performative::Cfp,
        Performative::Confirm,
        Performative::Disconfirm,
        Performative::Failure,
        Performative::Inform,
        Performative::InformIf,
        Performative::InformRef,
        Performative::NotUnderstood,
        Performative::Propagate,
        Performative::Propose,
        Performative::Proxy,
        Performative::QueryIf,
        Performative::QueryRef,
        Performative::Refuse,
        Performative::RejectProposal,
        Performative::Request,
        Performative::RequestWhen,
        Performative::RequestWhenever,
        Performative::Subscribe,
    ];

    /// Wire tag, e.g. `ACCEPT_PROPOSAL`
    pub fn as_str(&self) -> &'static str {
        match self {
            Performative::AcceptProposal => "ACCEPT_PROPOSAL",
            Performative::Agree => "AGREE",
            Performative::Cancel => "CANCEL",
            Performative::Cfp => "CFP",
            Performative::Confirm => "CONFIRM",
            Performative::Disconfirm => "DISCONFIRM",
            Performative::Failure => "FAILURE",
            Performative::Inform => "INFORM",
            Performative::InformIf => "INFORM_IF",
            Performative::InformRef => "INFORM_REF",
            Performative::NotUnderstood => "NOT_UNDERSTOOD",
            Performative::Propagate => "PROPAGATE",
            Performative::Propose => "PROPOSE",
            Performative::Proxy => "PROXY",
            Performative::QueryIf => "QUERY_IF",
            Performative::QueryRef => "QUERY_REF",
            Performative::Refuse => "REFUSE",
            Performative::RejectProposal => "REJECT_PROPOSAL",
            Performative::Request => "REQUEST",
            Performative::RequestWhen => "REQUEST_WHEN",
            Performative::RequestWhenever => "REQUEST_WHENEVER",
            Performative::Subscribe => "SUBSCRIBE",
        }
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Performative {
    type Err = DecodeError;

    /// Accepts `ACCEPT_PROPOSAL` as well as the FIPA spelling `accept-proposal`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Performative::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| DecodeError::UnknownPerformative(s.to_string()))
    }
}

/// A decoded ACL message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclMessage {
    /// Speech-act tag
    pub performative: Performative,
    /// Sending agent name
    pub sender: String,
    /// Receiving agent name
    pub receiver: String,
    /// Opaque payload
    pub content: String,
    /// Conversation the message belongs to
    pub conversation_id: String,
    /// Token the reply should quote in `in_reply_to`
    pub reply_with: Option<String>,
    /// Token of the message this one answers
    pub in_reply_to: Option<String>,
    /// Deadline for a reply, as sent
    pub reply_by: Option<String>,
    /// Content language
    pub language: Option<String>,
    /// Content ontology
    pub ontology: Option<String>,
    /// Interaction protocol
    pub protocol: Option<String>,
}

impl AclMessage {
    /// Create a message with empty content and no correlation fields
    pub fn new(
        performative: Performative,
        sender: impl Into<String>,
        receiver: impl Into<String>,
    ) -> Self {
        Self {
            performative,
            sender: sender.into(),
            receiver: receiver.into(),
            content: String::new(),
            conversation_id: String::new(),
            reply_with: None,
            in_reply_to: None,
            reply_by: None,
            language: None,
            ontology: None,
            protocol: None,
        }
    }

    /// Set the content
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Set the conversation id
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    /// Set the reply-with token
    pub fn with_reply_with(mut self, token: impl Into<String>) -> Self {
        self.reply_with = Some(token.into());
        self
    }

    /// Build a reply: sender and receiver swapped, conversation kept, and
    /// `in_reply_to` set from this message's `reply_with`.
    pub fn reply(&self, performative: Performative) -> Self {
        Self {
            performative,
            sender: self.receiver.clone(),
            receiver: self.sender.clone(),
            content: String::new(),
            conversation_id: self.conversation_id.clone(),
            reply_with: None,
            in_reply_to: self.reply_with.clone(),
            reply_by: None,
            language: self.language.clone(),
            ontology: self.ontology.clone(),
            protocol: self.protocol.clone(),
        }
    }
}

/// Wire shape of a frame, shared by both directions. Decoding validates
/// required fields afterwards; encoding always writes `content` and
/// `conversationId` and omits unset optional fields.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    performative: Option<String>,
    sender: Option<String>,
    receiver: Option<String>,
    content: Option<String>,
    conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ontology: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
}

impl From<&AclMessage> for WireMessage {
    fn from(message: &AclMessage) -> Self {
        Self {
            performative: Some(message.performative.as_str().to_string()),
            sender: Some(message.sender.clone()),
            receiver: Some(message.receiver.clone()),
            content: Some(message.content.clone()),
            conversation_id: Some(message.conversation_id.clone()),
            reply_with: message.reply_with.clone(),
            in_reply_to: message.in_reply_to.clone(),
            reply_by: message.reply_by.clone(),
            language: message.language.clone(),
            ontology: message.ontology.clone(),
            protocol: message.protocol.clone(),
        }
    }
}

fn required(value: Option<String>, field: &'static str) -> DecodeResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(DecodeError::MissingField(field))
}

/// Decode one wire frame into a message
pub fn decode(text: &str) -> DecodeResult<AclMessage> {
    let wire: WireMessage = serde_json::from_str(text)?;

    let performative = required(wire.performative, "performative")?.parse()?;
    let sender = required(wire.sender, "sender")?;
    let receiver = required(wire.receiver, "receiver")?;

    Ok(AclMessage {
        performative,
        sender,
        receiver,
        content: wire.content.unwrap_or_default(),
        conversation_id: wire.conversation_id.unwrap_or_default(),
        reply_with: wire.reply_with,
        in_reply_to: wire.in_reply_to,
        reply_by: wire.reply_by,
        language: wire.language,
        ontology: wire.ontology,
        protocol: wire.protocol,
    })
}

/// Encode a message as one single-line wire frame
pub fn encode(message: &AclMessage) -> serde_json::Result<String> {
    serde_json::to_string(&WireMessage::from(message))
}
