//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::Bytes;
use const_addrs::{net4, net6};
use zebra_bgp::packet::error::UpdateMessageError;
use zebra_bgp::packet::message::{decode_ipv4_prefix, decode_ipv6_prefix};

#[test]
fn test_decode_ipv4_prefix1() {
    let mut buf = Bytes::new();
    let result = decode_ipv4_prefix(&mut buf);
    assert_eq!(result, Err(UpdateMessageError::ReadOutOfBounds));
}

#[test]
fn test_decode_ipv4_prefix2() {
    // Host bits are cleared.
    let mut buf = Bytes::from_static(&[0x14, 0x0a, 0x01, 0x1f]);
    let result = decode_ipv4_prefix(&mut buf);
    assert_eq!(result, Ok(net4!("10.1.16.0/20")));
    assert!(buf.is_empty());
}

#[test]
fn test_decode_ipv4_prefix3() {
    // Prefix length out of range.
    let mut buf = Bytes::from_static(&[0x21, 0x0a, 0x01, 0x01, 0x01, 0x01]);
    let result = decode_ipv4_prefix(&mut buf);
    assert_eq!(result, Err(UpdateMessageError::InvalidNetworkField));
}

#[test]
fn test_decode_ipv4_prefix4() {
    // Truncated prefix.
    let mut buf = Bytes::from_static(&[0x18, 0x0a, 0x01]);
    let result = decode_ipv4_prefix(&mut buf);
    assert_eq!(result, Err(UpdateMessageError::InvalidNetworkField));
}

#[test]
fn test_decode_ipv6_prefix1() {
    let mut buf = Bytes::new();
    let result = decode_ipv6_prefix(&mut buf);
    assert_eq!(result, Err(UpdateMessageError::ReadOutOfBounds));
}

#[test]
fn test_decode_ipv6_prefix2() {
    let mut buf =
        Bytes::from_static(&[0x30, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01]);
    let result = decode_ipv6_prefix(&mut buf);
    assert_eq!(result, Ok(net6!("2001:db8:1::/48")));
}

#[test]
fn test_decode_ipv6_prefix3() {
    let mut buf = Bytes::from_static(&[0x81]);
    let result = decode_ipv6_prefix(&mut buf);
    assert_eq!(result, Err(UpdateMessageError::InvalidNetworkField));
}
