//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use zebra_bgp::packet::consts::{
    AttrType, ErrorCode, MessageHeaderErrorSubcode, OpenMessageErrorSubcode,
    UpdateMessageErrorSubcode,
};
use zebra_bgp::packet::error::{
    DecodeError, MessageHeaderError, OpenMessageError, UpdateMessageError,
};
use zebra_bgp::packet::message::{Message, NotificationMsg};

use super::{test_decode_msg, test_encode_msg};

static NOTIFICATION1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x03, 0x01, 0x02, 0xff,
            0xff,
        ],
        Message::Notification(NotificationMsg {
            error_code: ErrorCode::MessageHeaderError as u8,
            error_subcode: MessageHeaderErrorSubcode::BadMessageLength as u8,
            data: vec![0xff, 0xff],
        }),
    )
});

#[test]
fn test_encode_notification1() {
    let (ref bytes, ref msg) = *NOTIFICATION1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_notification1() {
    let (ref bytes, ref msg) = *NOTIFICATION1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_notification_from_header_error() {
    let error = DecodeError::MessageHeader(MessageHeaderError::BadMessageType(9));
    let msg = NotificationMsg::from(error);
    assert_eq!(msg.error_code, ErrorCode::MessageHeaderError as u8);
    assert_eq!(
        msg.error_subcode,
        MessageHeaderErrorSubcode::BadMessageType as u8
    );
    assert_eq!(msg.data, vec![9]);
}

#[test]
fn test_notification_from_open_error() {
    let error = DecodeError::OpenMessage(OpenMessageError::UnsupportedVersion(4));
    let msg = NotificationMsg::from(error);
    assert_eq!(msg.error_code, ErrorCode::OpenMessageError as u8);
    assert_eq!(
        msg.error_subcode,
        OpenMessageErrorSubcode::UnsupportedVersionNumber as u8
    );
    assert_eq!(msg.data, vec![0x00, 0x04]);
}

#[test]
fn test_notification_from_update_error() {
    let error = DecodeError::UpdateMessage(
        UpdateMessageError::MissingWellKnownAttribute(AttrType::Nexthop),
    );
    let msg = NotificationMsg::from(error);
    assert_eq!(msg.error_code, ErrorCode::UpdateMessageError as u8);
    assert_eq!(
        msg.error_subcode,
        UpdateMessageErrorSubcode::MissingWellKnownAttribute as u8
    );
    assert_eq!(msg.data, vec![AttrType::Nexthop as u8]);
}
