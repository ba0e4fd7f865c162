//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use const_addrs::ip4;
use zebra_bgp::neighbor::PeerType;
use zebra_bgp::packet::consts::{Afi, BGP_VERSION, Safi};
use zebra_bgp::packet::error::{DecodeError, OpenMessageError};
use zebra_bgp::packet::message::{Capability, Message, OpenMsg};

use super::{test_decode_msg, test_decode_msg_error, test_encode_msg};

static OPEN1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1d, 0x01, 0x04, 0x00, 0x01,
            0x00, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x00,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 1,
            holdtime: 180,
            identifier: ip4!("1.1.1.1"),
            capabilities: [].into(),
        }),
    )
});

static OPEN2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x25, 0x01, 0x04, 0x00, 0x01,
            0x00, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x08, 0x02, 0x06, 0x01, 0x04,
            0x00, 0x01, 0x00, 0x01,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 1,
            holdtime: 180,
            identifier: ip4!("1.1.1.1"),
            capabilities: [Capability::MultiProtocol {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
            }]
            .into(),
        }),
    )
});

static OPEN3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x35, 0x01, 0x04, 0xfd, 0xe9,
            0x00, 0x5a, 0x01, 0x01, 0x01, 0x01, 0x18, 0x02, 0x06, 0x01, 0x04,
            0x00, 0x01, 0x00, 0x01, 0x02, 0x06, 0x01, 0x04, 0x00, 0x02, 0x00,
            0x01, 0x02, 0x02, 0x02, 0x00, 0x02, 0x02, 0x80, 0x00,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 65001,
            holdtime: 90,
            identifier: ip4!("1.1.1.1"),
            capabilities: [
                Capability::MultiProtocol {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                },
                Capability::MultiProtocol {
                    afi: Afi::Ipv6,
                    safi: Safi::Unicast,
                },
                Capability::RouteRefresh,
                Capability::RouteRefreshOld,
            ]
            .into(),
        }),
    )
});

// Unknown capabilities (four-octet AS number) are ignored.
static OPEN4: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x2d, 0x01, 0x04, 0x00, 0x01,
            0x00, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x10, 0x02, 0x06, 0x41, 0x04,
            0x00, 0x01, 0x00, 0x0e, 0x02, 0x06, 0x01, 0x04, 0x00, 0x01, 0x00,
            0x01,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 1,
            holdtime: 180,
            identifier: ip4!("1.1.1.1"),
            capabilities: [Capability::MultiProtocol {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
            }]
            .into(),
        }),
    )
});

// Builds an OPEN message without optional parameters.
fn open_bytes(version: u8, my_as: u16, holdtime: u16, id: [u8; 4]) -> Vec<u8> {
    let mut bytes = vec![0xff; 16];
    bytes.extend_from_slice(&[0x00, 0x1d, 0x01, version]);
    bytes.extend_from_slice(&my_as.to_be_bytes());
    bytes.extend_from_slice(&holdtime.to_be_bytes());
    bytes.extend_from_slice(&id);
    bytes.push(0x00);
    bytes
}

#[test]
fn test_encode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_decode_open4() {
    let (ref bytes, ref msg) = *OPEN4;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_decode_open_errors() {
    let bytes = open_bytes(3, 1, 180, [1, 1, 1, 1]);
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        DecodeError::OpenMessage(OpenMessageError::UnsupportedVersion(
            BGP_VERSION,
        )),
    );

    let bytes = open_bytes(BGP_VERSION, 0, 180, [1, 1, 1, 1]);
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        DecodeError::OpenMessage(OpenMessageError::BadPeerAs),
    );

    let bytes = open_bytes(BGP_VERSION, 1, 2, [1, 1, 1, 1]);
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        DecodeError::OpenMessage(OpenMessageError::UnacceptableHoldTime),
    );

    let bytes = open_bytes(BGP_VERSION, 1, 180, [0, 0, 0, 0]);
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        DecodeError::OpenMessage(OpenMessageError::BadBgpIdentifier),
    );
}

#[test]
fn test_decode_open_unsupported_param() {
    // Optional parameter type 1 (authentication) isn't supported.
    let bytes = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0x00, 0x20, 0x01, 0x04, 0x00, 0x01, 0x00, 0xb4,
        0x01, 0x01, 0x01, 0x01, 0x03, 0x01, 0x01, 0x00,
    ];
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        DecodeError::OpenMessage(OpenMessageError::UnsupportedOptParam),
    );
}
