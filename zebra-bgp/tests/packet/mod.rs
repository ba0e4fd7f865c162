//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod attrs;
mod header;
mod ip;
mod keepalive;
mod notification;
mod open;
mod route_refresh;
mod update;

use const_addrs::ip4;
use zebra_bgp::neighbor::PeerType;
use zebra_bgp::packet::error::DecodeError;
use zebra_bgp::packet::message::{DecodeCxt, EncodeCxt, Message};
use zebra_utils::assert_eq_hex;

//
// Helper functions.
//

fn encode_cxt() -> EncodeCxt {
    EncodeCxt {
        peer_type: PeerType::Internal,
        local_as: 65001,
        confed_id: None,
        transparent_as: false,
        rs_client: false,
        send_community: true,
        send_ext_community: true,
        reflector: false,
        router_id: ip4!("1.1.1.1"),
        cluster_id: ip4!("1.1.1.1"),
    }
}

fn decode_cxt(peer_type: PeerType) -> DecodeCxt {
    DecodeCxt {
        peer_type,
        local_as: 65001,
        confed_id: None,
    }
}

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    let cxt = encode_cxt();

    let bytes_actual = msg.encode(&cxt);
    assert_eq_hex!(bytes_expected, bytes_actual);
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    let cxt = decode_cxt(PeerType::Internal);

    let msg_size = Message::get_message_len(bytes)
        .expect("Buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_size], &cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}

fn test_decode_msg_error(
    bytes: &[u8],
    peer_type: PeerType,
    error_expected: DecodeError,
) {
    let cxt = decode_cxt(peer_type);

    let msg_size = Message::get_message_len(bytes)
        .expect("Buffer doesn't contain a full BGP message");
    let error_actual = Message::decode(&bytes[0..msg_size], &cxt).unwrap_err();
    assert_eq!(error_expected, error_actual);
}

// Builds an UPDATE message out of its three variable-length sections.
fn update_msg_bytes(withdrawn: &[u8], attrs: &[u8], nlri: &[u8]) -> Vec<u8> {
    let msg_len = 19 + 2 + withdrawn.len() + 2 + attrs.len() + nlri.len();

    let mut bytes = vec![0xff; 16];
    bytes.extend_from_slice(&(msg_len as u16).to_be_bytes());
    bytes.push(0x02);
    bytes.extend_from_slice(&(withdrawn.len() as u16).to_be_bytes());
    bytes.extend_from_slice(withdrawn);
    bytes.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
    bytes.extend_from_slice(attrs);
    bytes.extend_from_slice(nlri);
    bytes
}
