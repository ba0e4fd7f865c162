//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

use crate::packet::consts::AttrType;

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// BGP message decoding errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    MessageHeader(MessageHeaderError),
    OpenMessage(OpenMessageError),
    UpdateMessage(UpdateMessageError),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MessageHeaderError {
    ReadOutOfBounds,
    BadMessageLength(u16),
    BadMessageType(u8),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum OpenMessageError {
    ReadOutOfBounds,
    UnsupportedVersion(u8),
    BadPeerAs,
    BadBgpIdentifier,
    UnsupportedOptParam,
    UnacceptableHoldTime,
    MalformedOptParam,
}

// UPDATE message errors.
//
// Every variant is fatal to the session: the UPDATE is discarded as a whole
// and a NOTIFICATION carrying the corresponding subcode is sent.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum UpdateMessageError {
    ReadOutOfBounds,
    MalformedAttributeList,
    MissingWellKnownAttribute(AttrType),
    AttributeFlagsError(AttrType),
    AttributeLengthError(Option<AttrType>),
    InvalidOriginAttribute(u8),
    OptionalAttributeError(AttrType),
    InvalidNetworkField,
    MalformedAsPath(AsPathError),
}

// AS_PATH parsing errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AsPathError {
    TruncatedSegmentHeader,
    InvalidSegmentType(u8),
    SegmentOverrun { count: u8, remaining: usize },
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::MessageHeader(error) => error.fmt(f),
            DecodeError::OpenMessage(error) => error.fmt(f),
            DecodeError::UpdateMessage(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

impl From<MessageHeaderError> for DecodeError {
    fn from(error: MessageHeaderError) -> DecodeError {
        DecodeError::MessageHeader(error)
    }
}

impl From<OpenMessageError> for DecodeError {
    fn from(error: OpenMessageError) -> DecodeError {
        DecodeError::OpenMessage(error)
    }
}

impl From<UpdateMessageError> for DecodeError {
    fn from(error: UpdateMessageError) -> DecodeError {
        DecodeError::UpdateMessage(error)
    }
}

// ===== impl MessageHeaderError =====

impl std::fmt::Display for MessageHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageHeaderError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            MessageHeaderError::BadMessageLength(len) => {
                write!(f, "invalid message length: {len}")
            }
            MessageHeaderError::BadMessageType(msg_type) => {
                write!(f, "invalid message type: {msg_type}")
            }
        }
    }
}

impl From<TryGetError> for MessageHeaderError {
    fn from(_error: TryGetError) -> MessageHeaderError {
        MessageHeaderError::ReadOutOfBounds
    }
}

// ===== impl OpenMessageError =====

impl std::fmt::Display for OpenMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OPEN message error: ")?;

        match self {
            OpenMessageError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            OpenMessageError::UnsupportedVersion(version) => {
                write!(f, "unsupported version number: {version}")
            }
            OpenMessageError::BadPeerAs => {
                write!(f, "bad peer AS")
            }
            OpenMessageError::BadBgpIdentifier => {
                write!(f, "bad BGP identifier")
            }
            OpenMessageError::UnsupportedOptParam => {
                write!(f, "unsupported optional parameter")
            }
            OpenMessageError::UnacceptableHoldTime => {
                write!(f, "unacceptable hold time")
            }
            OpenMessageError::MalformedOptParam => {
                write!(f, "malformed optional parameter")
            }
        }
    }
}

impl From<TryGetError> for OpenMessageError {
    fn from(_error: TryGetError) -> OpenMessageError {
        OpenMessageError::ReadOutOfBounds
    }
}

// ===== impl UpdateMessageError =====

impl std::fmt::Display for UpdateMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UPDATE message error: ")?;

        match self {
            UpdateMessageError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            UpdateMessageError::MalformedAttributeList => {
                write!(f, "malformed attribute list")
            }
            UpdateMessageError::MissingWellKnownAttribute(attr_type) => {
                write!(f, "missing well-known attribute: {attr_type:?}")
            }
            UpdateMessageError::AttributeFlagsError(attr_type) => {
                write!(f, "attribute flags error: {attr_type:?}")
            }
            UpdateMessageError::AttributeLengthError(Some(attr_type)) => {
                write!(f, "attribute length error: {attr_type:?}")
            }
            UpdateMessageError::AttributeLengthError(None) => {
                write!(f, "attribute section length mismatch")
            }
            UpdateMessageError::InvalidOriginAttribute(origin) => {
                write!(f, "invalid origin: {origin}")
            }
            UpdateMessageError::OptionalAttributeError(attr_type) => {
                write!(f, "optional attribute error: {attr_type:?}")
            }
            UpdateMessageError::InvalidNetworkField => {
                write!(f, "invalid network field")
            }
            UpdateMessageError::MalformedAsPath(error) => {
                write!(f, "malformed AS path: {error}")
            }
        }
    }
}

impl From<TryGetError> for UpdateMessageError {
    fn from(_error: TryGetError) -> UpdateMessageError {
        UpdateMessageError::ReadOutOfBounds
    }
}

impl From<AsPathError> for UpdateMessageError {
    fn from(error: AsPathError) -> UpdateMessageError {
        UpdateMessageError::MalformedAsPath(error)
    }
}

// ===== impl AsPathError =====

impl std::fmt::Display for AsPathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsPathError::TruncatedSegmentHeader => {
                write!(f, "truncated segment header")
            }
            AsPathError::InvalidSegmentType(seg_type) => {
                write!(f, "invalid segment type: {seg_type}")
            }
            AsPathError::SegmentOverrun { count, remaining } => {
                write!(
                    f,
                    "segment of {count} ASes overruns {remaining} remaining bytes"
                )
            }
        }
    }
}

impl std::error::Error for AsPathError {}
