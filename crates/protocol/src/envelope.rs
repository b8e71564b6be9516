//! Request/response envelope.
//!
//! Every frame header is one [`Message`]. The payload stays raw JSON until
//! the receiver knows which type to expect. Lists that grow with the file
//! (stored identities, missing indices) do not fit a bounded header, so
//! payloads implementing [`BodyPayload`] move them into the frame body.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::MessageType;

/// Error details carried by an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("server error {code}: {message}")]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

/// Why a reply could not be accepted for a request.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("{0:?} is not a request type")]
    NotARequest(MessageType),

    #[error("response id {got} does not match request {expected}")]
    IdMismatch { expected: String, got: String },

    #[error("expected {expected:?}, got {got:?}")]
    UnexpectedType {
        expected: MessageType,
        got: MessageType,
    },

    #[error("error response without details")]
    MissingDetails,

    #[error(transparent)]
    Remote(RemoteError),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A payload whose bulky part travels in the frame body.
///
/// The defaults carry nothing in the body.
pub trait BodyPayload {
    /// Takes the bulky part out of `self` and encodes it as body bytes.
    fn detach_body(&mut self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(Vec::new())
    }

    /// Restores the part [`detach_body`](Self::detach_body) took out. An
    /// empty body leaves `self` unchanged.
    fn attach_body(&mut self, _body: &[u8]) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

impl BodyPayload for () {}

/// Header of one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

fn to_raw<T: Serialize + ?Sized>(payload: Option<&T>) -> Result<Option<Box<RawValue>>, serde_json::Error> {
    payload.map(serde_json::value::to_raw_value).transpose()
}

impl Message {
    /// Builds a request envelope.
    pub fn request<T: Serialize + ?Sized>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: to_raw(payload)?,
            error: None,
        })
    }

    /// Decodes the payload, if any.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.payload
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    /// Reply header for this request. Returns the body bytes the payload
    /// detached, to be sent with the header.
    pub fn reply<T: Serialize + BodyPayload>(
        &self,
        msg_type: MessageType,
        mut payload: T,
    ) -> Result<(Self, Vec<u8>), serde_json::Error> {
        let body = payload.detach_body()?;
        let header = Self {
            id: self.id.clone(),
            msg_type,
            payload: to_raw(Some(&payload))?,
            error: None,
        };
        Ok((header, body))
    }

    /// Error reply for this request.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(RemoteError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Checks that `reply` answers this request and decodes its payload,
    /// re-attaching whatever travelled in `body`.
    pub fn accept<T: DeserializeOwned + BodyPayload>(
        &self,
        reply: &Message,
        body: &[u8],
    ) -> Result<Option<T>, ReplyError> {
        let expected = self
            .msg_type
            .response_type()
            .ok_or(ReplyError::NotARequest(self.msg_type))?;
        if reply.id != self.id {
            return Err(ReplyError::IdMismatch {
                expected: self.id.clone(),
                got: reply.id.clone(),
            });
        }

        if reply.msg_type == MessageType::Error {
            return Err(reply
                .error
                .clone()
                .map_or(ReplyError::MissingDetails, ReplyError::Remote));
        }
        if reply.msg_type != expected {
            return Err(ReplyError::UnexpectedType {
                expected,
                got: reply.msg_type,
            });
        }

        let mut payload: Option<T> = reply.payload_as()?;
        if let Some(payload) = payload.as_mut() {
            if !body.is_empty() {
                payload.attach_body(body)?;
            }
        }
        Ok(payload)
    }
}
