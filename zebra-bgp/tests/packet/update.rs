//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use const_addrs::{ip4, ip6, net, net4};
use ipnetwork::IpNetwork;
use zebra_bgp::af::AfiSafi;
use zebra_bgp::neighbor::{NeighborUpdateQueue, PeerType};
use zebra_bgp::packet::attribute::{
    AsPath, AsPathSegment, Attrs, BaseAttrs, MpNexthop,
};
use zebra_bgp::packet::consts::{Afi, AsPathSegmentType, Origin, Safi};
use zebra_bgp::packet::message::{
    Message, MpReachNlri, MpUnreachNlri, ReachNlri, UnreachNlri, UpdateMsg,
};
use zebra_utils::bgp::Comm;

use super::{
    decode_cxt, encode_cxt, test_decode_msg, test_encode_msg,
    update_msg_bytes,
};

fn as_path(members: &[u16]) -> AsPath {
    AsPath {
        segments: [AsPathSegment {
            seg_type: AsPathSegmentType::Sequence,
            members: members.iter().copied().collect(),
        }]
        .into(),
    }
}

// IPv4 unicast routes received from an internal peer.
static UPDATE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x3e, 0x02, 0x00, 0x00, 0x00,
            0x20, 0x40, 0x01, 0x01, 0x00, 0x40, 0x02, 0x04, 0x02, 0x01, 0xfd,
            0xea, 0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x02, 0x80, 0x04, 0x04,
            0x00, 0x00, 0x00, 0x64, 0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64,
            0x10, 0x0a, 0x01, 0x18, 0xc0, 0xa8, 0x01,
        ],
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![net4!("10.1.0.0/16"), net4!("192.168.1.0/24")],
                nexthop: ip4!("10.0.0.2"),
            }),
            unreach: None,
            mp_reach: None,
            mp_unreach: None,
            attrs: Some(Attrs {
                base: BaseAttrs {
                    origin: Origin::Igp,
                    nexthop: Some(ip4!("10.0.0.2")),
                    mp_nexthop: None,
                    med: Some(100),
                    local_pref: Some(100),
                    atomic_aggregate: false,
                    aggregator: None,
                    originator_id: None,
                    weight: 0,
                    invalid: false,
                },
                as_path: as_path(&[65002]),
                comm: None,
                ext_comm: None,
                cluster_list: None,
            }),
        }),
    )
});

// IPv4 withdrawal without path attributes.
static UPDATE2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1a, 0x02, 0x00, 0x03, 0x10,
            0x0a, 0x01, 0x00, 0x00,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: Some(UnreachNlri {
                prefixes: vec![net4!("10.1.0.0/16")],
            }),
            mp_reach: None,
            mp_unreach: None,
            attrs: None,
        }),
    )
});

// IPv6 unicast route carried in MP_REACH_NLRI.
static UPDATE3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x49, 0x02, 0x00, 0x00, 0x00,
            0x32, 0x90, 0x0e, 0x00, 0x1c, 0x00, 0x02, 0x01, 0x10, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00, 0x30, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01,
            0x40, 0x01, 0x01, 0x00, 0x40, 0x02, 0x04, 0x02, 0x01, 0xfd, 0xea,
            0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: None,
            mp_reach: Some(MpReachNlri {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
                nexthop: MpNexthop::Ipv6(ip6!("2001:db8::1")),
                prefixes: vec![net!("2001:db8:1::/48")],
            }),
            mp_unreach: None,
            attrs: Some(Attrs {
                base: BaseAttrs {
                    origin: Origin::Igp,
                    nexthop: None,
                    mp_nexthop: Some(MpNexthop::Ipv6(ip6!("2001:db8::1"))),
                    med: None,
                    local_pref: Some(100),
                    atomic_aggregate: false,
                    aggregator: None,
                    originator_id: None,
                    weight: 0,
                    invalid: false,
                },
                as_path: as_path(&[65002]),
                comm: None,
                ext_comm: None,
                cluster_list: None,
            }),
        }),
    )
});

// IPv6 withdrawal carried in MP_UNREACH_NLRI.
static UPDATE4: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x24, 0x02, 0x00, 0x00, 0x00,
            0x0d, 0x80, 0x0f, 0x0a, 0x00, 0x02, 0x01, 0x30, 0x20, 0x01, 0x0d,
            0xb8, 0x00, 0x01,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: None,
            mp_reach: None,
            mp_unreach: Some(MpUnreachNlri {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
                prefixes: vec![net!("2001:db8:1::/48")],
            }),
            attrs: None,
        }),
    )
});

#[test]
fn test_encode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_decode_update4() {
    let (ref bytes, ref msg) = *UPDATE4;
    test_decode_msg(bytes, msg);
}

// Attributes of an IPv4 route carrying `count` communities.
fn large_attrs(count: u32) -> Attrs {
    Attrs {
        base: BaseAttrs {
            origin: Origin::Igp,
            nexthop: Some(ip4!("10.0.0.2")),
            mp_nexthop: None,
            med: None,
            local_pref: Some(100),
            atomic_aggregate: false,
            aggregator: None,
            originator_id: None,
            weight: 0,
            invalid: false,
        },
        as_path: as_path(&[65002]),
        comm: Some((0..count).map(|i| Comm(0xfdea_0000 + i)).collect()),
        ext_comm: None,
        cluster_list: None,
    }
}

fn large_attrs_bytes(count: u32) -> Vec<u8> {
    let mut attrs = vec![
        // ORIGIN, AS_PATH, NEXT_HOP, LOCAL_PREF.
        0x40, 0x01, 0x01, 0x00, 0x40, 0x02, 0x04, 0x02, 0x01, 0xfd, 0xea,
        0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x02, 0x40, 0x05, 0x04, 0x00,
        0x00, 0x00, 0x64,
    ];
    // COMMUNITIES, using the extended length field.
    attrs.extend_from_slice(&[0xd0, 0x08]);
    attrs.extend_from_slice(&((count * 4) as u16).to_be_bytes());
    for i in 0..count {
        attrs.extend_from_slice(&(0xfdea_0000 + i).to_be_bytes());
    }
    attrs
}

// UPDATE of exactly the maximum message size.
static UPDATE_MAX_LEN: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        update_msg_bytes(
            &[],
            &large_attrs_bytes(1010),
            &[0x18, 0xc0, 0xa8, 0x01],
        ),
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![net4!("192.168.1.0/24")],
                nexthop: ip4!("10.0.0.2"),
            }),
            unreach: None,
            mp_reach: None,
            mp_unreach: None,
            attrs: Some(large_attrs(1010)),
        }),
    )
});

fn update_queue(attrs: Attrs, count: u8) -> NeighborUpdateQueue {
    let prefixes = (0..count)
        .map(|i| IpNetwork::V4(format!("10.{i}.0.0/16").parse().unwrap()))
        .collect();
    let mut queue = NeighborUpdateQueue::default();
    queue.reach.insert(attrs, prefixes);
    queue
}

#[test]
fn test_encode_update_max_len() {
    let (ref bytes, ref msg) = *UPDATE_MAX_LEN;
    assert_eq!(bytes.len(), Message::MAX_LEN as usize);
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update_max_len() {
    let (ref bytes, ref msg) = *UPDATE_MAX_LEN;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_build_updates_attrs_too_large() {
    // Attributes that leave no room for NLRI once the outbound attributes
    // are accounted for. The routes are dropped.
    let (_, ref msg) = *UPDATE_MAX_LEN;
    let attrs = msg.as_update().unwrap().attrs.clone().unwrap();
    let mut queue = update_queue(attrs, 4);
    let msgs = AfiSafi::Ipv4Unicast.build_updates(&mut queue);
    assert!(msgs.is_empty());
    assert!(queue.reach.is_empty());
}

#[test]
fn test_build_updates_attrs_near_limit() {
    // Room for only three prefixes per message.
    let mut queue = update_queue(large_attrs(1000), 7);
    let msgs = AfiSafi::Ipv4Unicast.build_updates(&mut queue);
    assert_eq!(msgs.len(), 3);

    let mut prefixes = 0;
    for msg in &msgs {
        let bytes = msg.encode(&encode_cxt());
        assert!(bytes.len() <= Message::MAX_LEN as usize);

        let msg = Message::decode(&bytes, &decode_cxt(PeerType::Internal))
            .unwrap();
        let update = msg.as_update().unwrap();
        let comm = update.attrs.as_ref().unwrap().comm.as_ref().unwrap();
        assert_eq!(comm.0.len(), 1000);
        prefixes += update.reach.as_ref().unwrap().prefixes.len();
    }
    assert_eq!(prefixes, 7);
}

#[test]
fn test_build_updates_mp_attrs_too_large() {
    let mut attrs = large_attrs(1010);
    attrs.base.nexthop = None;
    attrs.base.mp_nexthop = Some(MpNexthop::Ipv6(ip6!("2001:db8::1")));
    let mut queue = NeighborUpdateQueue::default();
    queue
        .reach
        .insert(attrs, [net!("2001:db8:1::/48")].into_iter().collect());
    let msgs = AfiSafi::Ipv6Unicast.build_updates(&mut queue);
    assert!(msgs.is_empty());
}
