//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use zebra_bgp::neighbor::PeerType;
use zebra_bgp::packet::error::{DecodeError, MessageHeaderError};
use zebra_bgp::packet::message::{KeepaliveMsg, Message};

use super::{test_decode_msg, test_decode_msg_error};

#[test]
fn test_message_len_incomplete() {
    // Header only partially received.
    let bytes = [0xff; 10];
    assert_eq!(Message::get_message_len(&bytes), None);

    // Body only partially received.
    let bytes = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x05, 0x00,
    ];
    assert_eq!(Message::get_message_len(&bytes), None);
}

#[test]
fn test_message_len_trailing_data() {
    // A KEEPALIVE followed by the start of another message.
    let bytes = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0x00, 0x13, 0x04, 0xff, 0xff,
    ];
    assert_eq!(Message::get_message_len(&bytes), Some(19));
}

#[test]
fn test_decode_marker_ignored() {
    // A zeroed marker is accepted.
    let bytes = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x13, 0x04,
    ];
    test_decode_msg(&bytes, &Message::Keepalive(KeepaliveMsg {}));

    // So is a partially set one.
    let mut bytes = bytes;
    bytes[..15].fill(0xff);
    test_decode_msg(&bytes, &Message::Keepalive(KeepaliveMsg {}));
}

#[test]
fn test_decode_bad_length() {
    // Length below the minimum.
    let bytes = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0x00, 0x12, 0x04,
    ];
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        DecodeError::MessageHeader(MessageHeaderError::BadMessageLength(18)),
    );

    // KEEPALIVE with a body.
    let bytes = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0x00, 0x14, 0x04, 0x00,
    ];
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        DecodeError::MessageHeader(MessageHeaderError::BadMessageLength(20)),
    );
}

#[test]
fn test_decode_bad_type() {
    let bytes = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0x00, 0x13, 0x09,
    ];
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        DecodeError::MessageHeader(MessageHeaderError::BadMessageType(9)),
    );
}
