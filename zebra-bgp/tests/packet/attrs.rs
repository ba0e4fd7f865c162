//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::Bytes;
use const_addrs::{ip4, net4};
use zebra_bgp::neighbor::PeerType;
use zebra_bgp::packet::attribute::{
    AsPath, AsPathSegment, Attrs, BaseAttrs, Comms,
};
use zebra_bgp::packet::consts::{AsPathSegmentType, AttrType, Origin};
use zebra_bgp::packet::error::{
    AsPathError, DecodeError, UpdateMessageError,
};
use zebra_bgp::packet::message::{Message, ReachNlri, UpdateMsg};
use zebra_utils::assert_eq_hex;
use zebra_utils::bgp::Comm;

use super::{decode_cxt, encode_cxt, test_decode_msg_error, update_msg_bytes};

const ORIGIN_IGP: [u8; 4] = [0x40, 0x01, 0x01, 0x00];
const AS_PATH_65002: [u8; 7] = [0x40, 0x02, 0x04, 0x02, 0x01, 0xfd, 0xea];
const NEXTHOP: [u8; 7] = [0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x02];
const LOCAL_PREF_100: [u8; 7] = [0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64];
const NLRI: [u8; 4] = [0x18, 0xc0, 0xa8, 0x01];

fn decode_update(bytes: &[u8], peer_type: PeerType) -> UpdateMsg {
    let cxt = decode_cxt(peer_type);
    Message::decode(bytes, &cxt)
        .unwrap()
        .into_update()
        .unwrap()
}

fn update_error(error: UpdateMessageError) -> DecodeError {
    DecodeError::UpdateMessage(error)
}

#[test]
fn test_attr_missing_nexthop() {
    let attrs = [&ORIGIN_IGP[..], &AS_PATH_65002, &LOCAL_PREF_100].concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        update_error(UpdateMessageError::MissingWellKnownAttribute(
            AttrType::Nexthop,
        )),
    );
}

#[test]
fn test_attr_missing_local_pref() {
    // LOCAL_PREF is only mandatory on internal sessions.
    let attrs = [&ORIGIN_IGP[..], &AS_PATH_65002, &NEXTHOP].concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        update_error(UpdateMessageError::MissingWellKnownAttribute(
            AttrType::LocalPref,
        )),
    );

    let msg = decode_update(&bytes, PeerType::External);
    assert!(msg.reach.is_some());
}

#[test]
fn test_attr_invalid_origin() {
    let attrs = [
        &[0x40, 0x01, 0x01, 0x05][..],
        &AS_PATH_65002,
        &NEXTHOP,
        &LOCAL_PREF_100,
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        update_error(UpdateMessageError::InvalidOriginAttribute(5)),
    );
}

#[test]
fn test_attr_origin_flags() {
    // ORIGIN marked as optional.
    let attrs = [
        &[0x80, 0x01, 0x01, 0x00][..],
        &AS_PATH_65002,
        &NEXTHOP,
        &LOCAL_PREF_100,
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        update_error(UpdateMessageError::AttributeFlagsError(
            AttrType::Origin,
        )),
    );
}

#[test]
fn test_attr_length_overrun() {
    let attrs = [0x40, 0x01, 0x05, 0x00];
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        update_error(UpdateMessageError::AttributeLengthError(Some(
            AttrType::Origin,
        ))),
    );
}

#[test]
fn test_attr_fixed_length() {
    // MED with a 2-byte value.
    let attrs = [
        &ORIGIN_IGP[..],
        &AS_PATH_65002,
        &NEXTHOP,
        &[0x80, 0x04, 0x02, 0x00, 0x01],
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        update_error(UpdateMessageError::AttributeLengthError(Some(
            AttrType::Med,
        ))),
    );
}

#[test]
fn test_attr_duplicate_as_path() {
    let attrs = [
        &ORIGIN_IGP[..],
        &AS_PATH_65002,
        &AS_PATH_65002,
        &NEXTHOP,
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        update_error(UpdateMessageError::MalformedAttributeList),
    );
}

#[test]
fn test_attr_malformed_as_path() {
    let attrs = [
        &ORIGIN_IGP[..],
        &[0x40, 0x02, 0x04, 0x07, 0x01, 0xfd, 0xea],
        &NEXTHOP,
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::External,
        update_error(UpdateMessageError::MalformedAsPath(
            AsPathError::InvalidSegmentType(7),
        )),
    );
}

#[test]
fn test_attr_cluster_list_length() {
    let attrs = [
        &ORIGIN_IGP[..],
        &AS_PATH_65002,
        &NEXTHOP,
        &LOCAL_PREF_100,
        &[0x80, 0x0a, 0x03, 0x01, 0x01, 0x01],
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    test_decode_msg_error(
        &bytes,
        PeerType::Internal,
        update_error(UpdateMessageError::AttributeLengthError(Some(
            AttrType::ClusterList,
        ))),
    );
}

#[test]
fn test_attr_unknown_skipped() {
    let attrs = [
        &ORIGIN_IGP[..],
        &AS_PATH_65002,
        &NEXTHOP,
        &[0xc0, 0x63, 0x02, 0xaa, 0xbb],
        &[0xc0, 0x08, 0x04, 0xfd, 0xe9, 0x00, 0x64],
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    let msg = decode_update(&bytes, PeerType::External);
    let attrs = msg.attrs.unwrap();
    assert_eq!(attrs.comm, Some([Comm(0xfde90064)].into_iter().collect()));
}

#[test]
fn test_attr_as_path_loop() {
    // Our own AS in the path marks the attributes as invalid.
    let attrs = [
        &ORIGIN_IGP[..],
        &[0x40, 0x02, 0x06, 0x02, 0x02, 0xfd, 0xea, 0xfd, 0xe9],
        &NEXTHOP,
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    let msg = decode_update(&bytes, PeerType::External);
    let attrs = msg.attrs.unwrap();
    assert!(attrs.base.invalid);
    assert_eq!(attrs.as_path.to_string(), "65002 65001");
}

#[test]
fn test_attr_empty_as_path() {
    let attrs = [
        &ORIGIN_IGP[..],
        &[0x40, 0x02, 0x00],
        &NEXTHOP,
        &LOCAL_PREF_100,
    ]
    .concat();
    let bytes = update_msg_bytes(&[], &attrs, &NLRI);
    let msg = decode_update(&bytes, PeerType::Internal);
    let attrs = msg.attrs.unwrap();
    assert!(attrs.as_path.is_empty());
    assert_eq!(attrs.as_path.count(), 0);
}

#[test]
fn test_as_path_decode() {
    let mut buf = Bytes::from_static(&[0x02, 0x03, 0xfd, 0xea]);
    assert_eq!(
        AsPath::decode(&mut buf),
        Err(AsPathError::SegmentOverrun {
            count: 3,
            remaining: 2
        })
    );

    let mut buf = Bytes::from_static(&[0x02]);
    assert_eq!(
        AsPath::decode(&mut buf),
        Err(AsPathError::TruncatedSegmentHeader)
    );

    let mut buf = Bytes::from_static(&[
        0x03, 0x01, 0xfd, 0xe8, 0x02, 0x01, 0xfd, 0xea, 0x01, 0x02, 0x00, 0x01,
        0x00, 0x02,
    ]);
    let as_path = AsPath::decode(&mut buf).unwrap();
    assert_eq!(as_path.to_string(), "(65000) 65002 {1 2}");
    assert_eq!(as_path.count(), 3);
}

#[test]
fn test_attr_encode_ebgp() {
    // The local AS is prepended and LOCAL_PREF is omitted toward external
    // peers.
    let msg = Message::Update(UpdateMsg {
        reach: Some(ReachNlri {
            prefixes: vec![net4!("192.168.1.0/24")],
            nexthop: ip4!("10.0.0.1"),
        }),
        unreach: None,
        mp_reach: None,
        mp_unreach: None,
        attrs: Some(Attrs {
            base: BaseAttrs {
                origin: Origin::Igp,
                nexthop: Some(ip4!("10.0.0.1")),
                mp_nexthop: None,
                med: None,
                local_pref: Some(200),
                atomic_aggregate: false,
                aggregator: None,
                originator_id: None,
                weight: 0,
                invalid: false,
            },
            as_path: AsPath {
                segments: [AsPathSegment {
                    seg_type: AsPathSegmentType::Sequence,
                    members: [65002].into(),
                }]
                .into(),
            },
            comm: Some(Comms::from_iter([Comm(0xfde90064)])),
            ext_comm: None,
            cluster_list: None,
        }),
    });

    let mut cxt = encode_cxt();
    cxt.peer_type = PeerType::External;
    let attrs = [
        &ORIGIN_IGP[..],
        &[0x40, 0x02, 0x06, 0x02, 0x02, 0xfd, 0xe9, 0xfd, 0xea],
        &[0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x01],
        &[0xc0, 0x08, 0x04, 0xfd, 0xe9, 0x00, 0x64],
    ]
    .concat();
    let bytes_expected = update_msg_bytes(&[], &attrs, &NLRI);
    let bytes_actual = msg.encode(&cxt);
    assert_eq_hex!(bytes_expected, bytes_actual);

    // Communities are stripped unless enabled for the peer.
    cxt.send_community = false;
    let attrs = [
        &ORIGIN_IGP[..],
        &[0x40, 0x02, 0x06, 0x02, 0x02, 0xfd, 0xe9, 0xfd, 0xea],
        &[0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x01],
    ]
    .concat();
    let bytes_expected = update_msg_bytes(&[], &attrs, &NLRI);
    let bytes_actual = msg.encode(&cxt);
    assert_eq_hex!(bytes_expected, bytes_actual);
}
