//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use const_addrs::{ip, ip4, net};
use ipnetwork::IpNetwork;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zebra_bgp::af::AfiSafi;
use zebra_bgp::config::{InstanceCfg, NeighborCfg, RedistributeCfg};
use zebra_bgp::error::Error;
use zebra_bgp::neighbor::{Neighbor, Neighbors, fsm};
use zebra_bgp::packet::attribute::{Attrs, ClusterList};
use zebra_bgp::packet::consts::Origin;
use zebra_bgp::policy::{FilterAction, PolicyCfg, RouteMapEntry, RouteMapSet};
use zebra_bgp::rib::{
    Rib, RibCxt, Route, RouteCompare, RouteOrigin, RouteRejectReason,
    RouteSubType,
};
use zebra_utils::bgp::Comm;
use zebra_utils::ip::AddressFamily;
use zebra_utils::southbound::{RouteKeyMsg, RouteMsg, RouteType};

//
// Test harness.
//

struct Harness {
    config: InstanceCfg,
    policy: PolicyCfg,
    neighbors: Neighbors,
    rib: Rib,
    sink: Vec<RouteMsg>,
}

impl Harness {
    fn new() -> Harness {
        let config = InstanceCfg {
            local_as: 65001,
            router_id: ip4!("1.1.1.1"),
            ..Default::default()
        };
        Harness {
            config,
            policy: Default::default(),
            neighbors: Default::default(),
            rib: Default::default(),
            sink: Default::default(),
        }
    }

    // Adds an established neighbor.
    fn neighbor_add(
        &mut self,
        addr: IpAddr,
        remote_as: u16,
        identifier: Ipv4Addr,
    ) -> &mut Neighbor {
        let nbr_cfg = NeighborCfg::new(addr, remote_as);
        let mut nbr = Neighbor::new(nbr_cfg, &self.config);
        nbr.state = fsm::State::Established;
        nbr.identifier = Some(identifier);
        nbr.families_nego = [AfiSafi::Ipv4Unicast].into();
        self.neighbors.entry(addr).or_insert(nbr)
    }

    fn with_cxt<T>(
        &mut self,
        f: impl FnOnce(&mut Rib, &mut RibCxt<'_>) -> T,
    ) -> T {
        let mut cxt = RibCxt {
            config: &self.config,
            policy: &self.policy,
            neighbors: &mut self.neighbors,
            sink: &mut self.sink,
        };
        f(&mut self.rib, &mut cxt)
    }

    fn update(
        &mut self,
        addr: IpAddr,
        prefix: IpNetwork,
        attrs: Attrs,
    ) -> Result<(), Error> {
        self.with_cxt(|rib, cxt| {
            rib.update(cxt, addr, AfiSafi::Ipv4Unicast, prefix, attrs)
        })
    }

    fn withdraw(&mut self, addr: IpAddr, prefix: IpNetwork) {
        self.with_cxt(|rib, cxt| {
            rib.withdraw(cxt, addr, AfiSafi::Ipv4Unicast, prefix)
        })
    }

    fn selected(&self, prefix: &IpNetwork) -> Option<&Route> {
        self.rib.tables.ipv4_unicast.selected(prefix)
    }

    fn selected_from(&self, prefix: &IpNetwork) -> Option<IpAddr> {
        self.selected(prefix)
            .and_then(|route| route.origin.remote_addr())
    }
}

fn attrs(nexthop: Ipv4Addr, as_path: &[u16]) -> Attrs {
    let mut attrs = Attrs::local(Origin::Igp, 0);
    attrs.base.nexthop = Some(nexthop);
    for asn in as_path.iter().rev() {
        attrs.as_path.add_left(*asn);
    }
    attrs
}

fn install(prefix: IpNetwork, nexthop: IpAddr) -> RouteMsg {
    RouteMsg::Install(RouteKeyMsg {
        prefix,
        family: AddressFamily::Ipv4,
        nexthop: Some(nexthop),
    })
}

fn uninstall(prefix: IpNetwork, nexthop: IpAddr) -> RouteMsg {
    RouteMsg::Uninstall(RouteKeyMsg {
        prefix,
        family: AddressFamily::Ipv4,
        nexthop: Some(nexthop),
    })
}

//
// Best path selection.
//

#[test]
fn select_higher_local_pref() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65001, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65001, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65010]);
    a.base.local_pref = Some(100);
    let mut b = attrs(ip4!("10.0.0.3"), &[65010]);
    b.base.local_pref = Some(200);
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    h.update(ip!("10.0.0.3"), prefix, b).unwrap();

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
    assert_eq!(
        h.sink,
        vec![
            install(prefix, ip!("10.0.0.2")),
            install(prefix, ip!("10.0.0.3")),
        ]
    );
}

#[test]
fn select_higher_weight() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65001, ip4!("2.2.2.2"))
        .config
        .weight = 500;
    h.neighbor_add(ip!("10.0.0.3"), 65001, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65010]);
    a.base.local_pref = Some(100);
    let mut b = attrs(ip4!("10.0.0.3"), &[65010]);
    b.base.local_pref = Some(200);
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    h.update(ip!("10.0.0.3"), prefix, b).unwrap();

    let route = h.selected(&prefix).unwrap();
    assert_eq!(route.origin.remote_addr(), Some(ip!("10.0.0.2")));
    assert_eq!(route.attrs.value.base.weight, 500);
}

#[test]
fn select_shorter_as_path() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    h.update(
        ip!("10.0.0.2"),
        prefix,
        attrs(ip4!("10.0.0.2"), &[65002, 65010]),
    )
    .unwrap();
    h.update(ip!("10.0.0.3"), prefix, attrs(ip4!("10.0.0.3"), &[65003]))
        .unwrap();

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
}

#[test]
fn select_lower_origin() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65002]);
    a.base.origin = Origin::Incomplete;
    let mut b = attrs(ip4!("10.0.0.3"), &[65003]);
    b.base.origin = Origin::Egp;
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    h.update(ip!("10.0.0.3"), prefix, b).unwrap();

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
}

#[test]
fn select_lower_med_same_neighbor_as() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65002, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65002]);
    a.base.med = Some(50);
    let mut b = attrs(ip4!("10.0.0.3"), &[65002]);
    b.base.med = Some(10);
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    h.update(ip!("10.0.0.3"), prefix, b).unwrap();

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
}

#[test]
fn med_ignored_across_neighbor_as() {
    let prefix = net!("192.168.0.0/24");
    let run = |always_compare_med: bool| {
        let mut h = Harness::new();
        h.config.always_compare_med = always_compare_med;
        h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
        h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));

        let mut a = attrs(ip4!("10.0.0.2"), &[65002]);
        a.base.med = Some(50);
        let mut b = attrs(ip4!("10.0.0.3"), &[65003]);
        b.base.med = Some(10);
        h.update(ip!("10.0.0.2"), prefix, a).unwrap();
        h.update(ip!("10.0.0.3"), prefix, b).unwrap();
        h.selected_from(&prefix)
    };

    // Falls through to the lower router-id.
    assert_eq!(run(false), Some(ip!("10.0.0.2")));
    assert_eq!(run(true), Some(ip!("10.0.0.3")));
}

#[test]
fn missing_med_as_worst() {
    let prefix = net!("192.168.0.0/24");
    let run = |missing_as_worst: bool| {
        let mut h = Harness::new();
        h.config.missing_as_worst = missing_as_worst;
        h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
        h.neighbor_add(ip!("10.0.0.3"), 65002, ip4!("3.3.3.3"));

        let a = attrs(ip4!("10.0.0.2"), &[65002]);
        let mut b = attrs(ip4!("10.0.0.3"), &[65002]);
        b.base.med = Some(10);
        h.update(ip!("10.0.0.2"), prefix, a).unwrap();
        h.update(ip!("10.0.0.3"), prefix, b).unwrap();
        h.selected_from(&prefix)
    };

    assert_eq!(run(false), Some(ip!("10.0.0.2")));
    assert_eq!(run(true), Some(ip!("10.0.0.3")));
}

#[test]
fn select_external_over_internal() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65001, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65010]);
    a.base.local_pref = Some(100);
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    h.update(ip!("10.0.0.3"), prefix, attrs(ip4!("10.0.0.3"), &[65003]))
        .unwrap();

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
}

#[test]
fn select_lower_router_id_numerically() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("10.0.0.1"));
    h.neighbor_add(ip!("10.0.0.3"), 65002, ip4!("9.0.0.1"));
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();
    h.update(ip!("10.0.0.3"), prefix, attrs(ip4!("10.0.0.3"), &[65002]))
        .unwrap();

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
}

#[test]
fn select_earlier_arrival() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65002, ip4!("2.2.2.2"));
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.3"), prefix, attrs(ip4!("10.0.0.3"), &[65002]))
        .unwrap();
    h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
}

#[test]
fn network_preferred_over_learned() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();
    h.with_cxt(|rib, cxt| {
        rib.static_add(cxt, AfiSafi::Ipv4Unicast, prefix, None)
    });

    let route = h.selected(&prefix).unwrap();
    assert_eq!(route.origin, RouteOrigin::Local);
    assert_eq!(route.sub_type, RouteSubType::Static);
    assert_eq!(
        h.sink,
        vec![
            install(prefix, ip!("10.0.0.2")),
            uninstall(prefix, ip!("10.0.0.2")),
        ]
    );

    // The learned route takes over once the network is removed.
    h.with_cxt(|rib, cxt| {
        rib.static_delete(cxt, AfiSafi::Ipv4Unicast, prefix)
    });
    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.2")));
    assert_eq!(h.sink.last(), Some(&install(prefix, ip!("10.0.0.2"))));
}

// Builds a random route learned from one of a handful of neighbors.
fn random_route(
    rng: &mut StdRng,
    rib: &mut Rib,
    seq: u64,
) -> Route {
    let peer_as = rng.random_range(65001..65004);
    let mut attrs = attrs(ip4!("10.0.0.1"), &[peer_as]);
    for _ in 0..rng.random_range(0..3) {
        attrs.as_path.add_left(peer_as);
    }
    attrs.base.weight = rng.random_range(0..2) * 100;
    attrs.base.local_pref = Some(rng.random_range(1..3) * 100);
    attrs.base.origin = match rng.random_range(0..3) {
        0 => Origin::Igp,
        1 => Origin::Egp,
        _ => Origin::Incomplete,
    };
    attrs.base.med = rng.random_bool(0.8).then(|| rng.random_range(0..3));

    let config = InstanceCfg {
        local_as: 65001,
        ..Default::default()
    };
    let identifier = Ipv4Addr::from(rng.random_range(1..5u32) << 24);
    let origin = RouteOrigin::Neighbor {
        remote_addr: IpAddr::V4(identifier),
        identifier,
        peer_type: zebra_bgp::neighbor::PeerType::new(&config, peer_as),
    };
    let attrs = rib.store.intern(&attrs);
    Route::new(origin, RouteType::Bgp, RouteSubType::Normal, attrs, seq)
}

fn preferred(a: &Route, b: &Route, config: &InstanceCfg) -> bool {
    matches!(a.compare(b, config), RouteCompare::Preferred(_))
}

#[test]
fn compare_total_order() {
    let config = InstanceCfg {
        local_as: 65001,
        always_compare_med: true,
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut rib = Rib::default();
    let routes = (0..40)
        .map(|seq| random_route(&mut rng, &mut rib, seq))
        .collect::<Vec<_>>();

    for a in &routes {
        for b in &routes {
            if a.seq == b.seq {
                continue;
            }

            // Antisymmetry.
            assert_ne!(
                preferred(a, b, &config),
                preferred(b, a, &config),
                "{a:?} {b:?}"
            );

            // Transitivity.
            for c in &routes {
                if c.seq == a.seq || c.seq == b.seq {
                    continue;
                }
                if preferred(a, b, &config) && preferred(b, c, &config) {
                    assert!(preferred(a, c, &config), "{a:?} {b:?} {c:?}");
                }
            }
        }
    }
}

#[test]
fn compare_reasons() {
    let config = InstanceCfg {
        local_as: 65001,
        ..Default::default()
    };
    let mut rib = Rib::default();
    let origin = RouteOrigin::Neighbor {
        remote_addr: ip!("10.0.0.2"),
        identifier: ip4!("2.2.2.2"),
        peer_type: zebra_bgp::neighbor::PeerType::External,
    };
    let route = |rib: &mut Rib, attrs: &Attrs, seq: u64| {
        let attrs = rib.store.intern(attrs);
        Route::new(origin, RouteType::Bgp, RouteSubType::Normal, attrs, seq)
    };

    let base = attrs(ip4!("10.0.0.2"), &[65002]);
    let a = route(&mut rib, &base, 1);

    let mut other = base.clone();
    other.base.local_pref = Some(50);
    let b = route(&mut rib, &other, 2);
    assert_eq!(
        a.compare(&b, &config),
        RouteCompare::Preferred(RouteRejectReason::LocalPrefLower)
    );
    assert_eq!(
        b.compare(&a, &config),
        RouteCompare::LessPreferred(RouteRejectReason::LocalPrefLower)
    );

    let mut other = base.clone();
    other.as_path.add_left(65002);
    let b = route(&mut rib, &other, 2);
    assert_eq!(
        a.compare(&b, &config),
        RouteCompare::Preferred(RouteRejectReason::AsPathLonger)
    );

    let b = route(&mut rib, &base, 2);
    assert_eq!(
        b.compare(&a, &config),
        RouteCompare::LessPreferred(RouteRejectReason::LaterArrival)
    );

    let attrs = rib.store.intern(&base);
    let connected = Route::new(
        RouteOrigin::Local,
        RouteType::Connected,
        RouteSubType::Redistribute,
        attrs,
        3,
    );
    assert_eq!(
        connected.compare(&a, &config),
        RouteCompare::Preferred(RouteRejectReason::ConnectedType)
    );
}

#[test]
fn single_selected_route() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut h = Harness::new();
    h.config.always_compare_med = true;
    let addrs = (2..8u8)
        .map(|i| IpAddr::V4(Ipv4Addr::new(10, 0, 0, i)))
        .collect::<Vec<_>>();
    for (i, addr) in addrs.iter().enumerate() {
        let identifier = Ipv4Addr::new(9, 9, 9, 9 - i as u8);
        h.neighbor_add(*addr, 65002 + (i % 2) as u16, identifier);
    }
    let prefixes = [
        net!("172.16.0.0/16"),
        net!("172.17.0.0/16"),
        net!("172.18.0.0/16"),
    ];

    for _ in 0..200 {
        let addr = addrs[rng.random_range(0..addrs.len())];
        let prefix = prefixes[rng.random_range(0..prefixes.len())];
        if rng.random_bool(0.3) {
            h.withdraw(addr, prefix);
            continue;
        }

        let peer_as = h.neighbors[&addr].config.remote_as;
        let mut attrs = attrs(ip4!("10.0.0.1"), &[peer_as]);
        attrs.base.med = Some(rng.random_range(0..4));
        if rng.random_bool(0.5) {
            attrs.as_path.add_left(peer_as);
        }
        h.update(addr, prefix, attrs).unwrap();

        for prefix in &prefixes {
            let Some(dest) = h.rib.tables.ipv4_unicast.prefixes.get(prefix)
            else {
                continue;
            };
            if dest.routes.is_empty() {
                continue;
            }
            let selected = dest
                .routes
                .iter()
                .filter(|route| route.selected)
                .collect::<Vec<_>>();
            assert_eq!(selected.len(), 1);
            assert!(dest.routes.iter().all(|route| {
                route.seq == selected[0].seq
                    || preferred(selected[0], route, &h.config)
            }));
        }
    }
}

//
// Route updates.
//

#[test]
fn implicit_withdraw() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65002]);
    a.base.med = Some(10);
    h.update(ip!("10.0.0.2"), prefix, a.clone()).unwrap();
    a.base.med = Some(20);
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();

    let dest = &h.rib.tables.ipv4_unicast.prefixes[&prefix];
    assert_eq!(dest.routes.len(), 1);
    assert_eq!(dest.routes[0].attrs.value.base.med, Some(20));
    assert_eq!(
        h.neighbors[&ip!("10.0.0.2")].prefix_count[&AfiSafi::Ipv4Unicast],
        1
    );
    assert_eq!(h.rib.store.records.len(), 1);
}

#[test]
fn withdraw_uninstalls() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();
    h.withdraw(ip!("10.0.0.2"), prefix);

    assert!(h.selected(&prefix).is_none());
    assert!(h.rib.tables.ipv4_unicast.prefixes.is_empty());
    assert!(h.rib.store.records.is_empty());
    assert_eq!(
        h.sink,
        vec![
            install(prefix, ip!("10.0.0.2")),
            uninstall(prefix, ip!("10.0.0.2")),
        ]
    );

    // Withdrawing an unknown route is harmless.
    h.withdraw(ip!("10.0.0.2"), prefix);
    assert_eq!(h.sink.len(), 2);
}

#[test]
fn withdraw_selects_next_best() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();
    h.update(
        ip!("10.0.0.3"),
        prefix,
        attrs(ip4!("10.0.0.3"), &[65003, 65010]),
    )
    .unwrap();
    h.withdraw(ip!("10.0.0.2"), prefix);

    assert_eq!(h.selected_from(&prefix), Some(ip!("10.0.0.3")));
    assert_eq!(h.sink.last(), Some(&install(prefix, ip!("10.0.0.3"))));
}

#[test]
fn loops_are_dropped() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65001, ip4!("2.2.2.2"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65010, 65001]);
    a.base.invalid = true;
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    assert!(h.selected(&prefix).is_none());

    let mut a = attrs(ip4!("10.0.0.2"), &[65010]);
    a.cluster_list = Some(ClusterList(vec![ip4!("1.1.1.1")]));
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    assert!(h.selected(&prefix).is_none());
    assert!(h.sink.is_empty());
}

#[test]
fn updates_from_unknown_neighbor_ignored() {
    let mut h = Harness::new();
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.9"), prefix, attrs(ip4!("10.0.0.9"), &[65009]))
        .unwrap();
    assert!(h.rib.tables.ipv4_unicast.prefixes.is_empty());
}

#[test]
fn max_prefix_exceeded() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"))
        .config
        .max_prefix = Some(2);

    h.update(
        ip!("10.0.0.2"),
        net!("192.168.0.0/24"),
        attrs(ip4!("10.0.0.2"), &[65002]),
    )
    .unwrap();
    let result = h.update(
        ip!("10.0.0.2"),
        net!("192.168.1.0/24"),
        attrs(ip4!("10.0.0.2"), &[65002]),
    );
    assert!(matches!(
        result,
        Err(Error::NbrMaxPrefixExceeded(addr, AfiSafi::Ipv4Unicast, 2))
            if addr == ip!("10.0.0.2")
    ));

    // The route is kept in the table.
    assert!(
        h.rib
            .tables
            .ipv4_unicast
            .prefixes
            .contains_key(&net!("192.168.1.0/24"))
    );
}

#[test]
fn announce_to_external_neighbor() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    let mut a = attrs(ip4!("10.0.0.2"), &[65002]);
    a.base.med = Some(10);
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();

    // MED is stripped and the next hop rewritten.
    let queue = h.neighbors[&ip!("10.0.0.3")]
        .update_queues
        .get(AfiSafi::Ipv4Unicast);
    let (attrs, prefixes) = queue.reach.iter().next().unwrap();
    assert!(prefixes.contains(&prefix));
    assert_eq!(attrs.base.med, None);
    assert_eq!(attrs.base.nexthop, Some(ip4!("1.1.1.1")));

    // Nothing is sent back to the originator.
    let queue = h.neighbors[&ip!("10.0.0.2")]
        .update_queues
        .get(AfiSafi::Ipv4Unicast);
    assert!(queue.is_empty());

    // The withdrawal replaces the pending announcement.
    h.withdraw(ip!("10.0.0.2"), prefix);
    let queue = h.neighbors[&ip!("10.0.0.3")]
        .update_queues
        .get(AfiSafi::Ipv4Unicast);
    assert!(queue.reach.is_empty());
    assert!(queue.unreach.contains(&prefix));
}

#[test]
fn internal_routes_not_reflected() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65001, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65001, ip4!("3.3.3.3"));
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65010]))
        .unwrap();
    assert!(
        h.neighbors[&ip!("10.0.0.3")]
            .update_queues
            .get(AfiSafi::Ipv4Unicast)
            .is_empty()
    );

    // Route-reflector clients do receive them.
    h.neighbors
        .get_mut(&ip!("10.0.0.3"))
        .unwrap()
        .config
        .reflector_client = true;
    h.with_cxt(|rib, cxt| {
        rib.announce_table(cxt, ip!("10.0.0.3"), AfiSafi::Ipv4Unicast)
    });
    let queue = h.neighbors[&ip!("10.0.0.3")]
        .update_queues
        .get(AfiSafi::Ipv4Unicast);
    let (attrs, _) = queue.reach.iter().next().unwrap();
    assert_eq!(attrs.base.originator_id, Some(ip4!("2.2.2.2")));
    assert_eq!(attrs.base.local_pref, Some(100));
}

#[test]
fn well_known_communities() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));
    h.neighbor_add(ip!("10.0.0.4"), 65001, ip4!("4.4.4.4"));
    let queue_empty = |h: &Harness, addr: IpAddr| {
        h.neighbors[&addr]
            .update_queues
            .get(AfiSafi::Ipv4Unicast)
            .is_empty()
    };

    // NO_EXPORT stays within the AS.
    let prefix = net!("192.168.0.0/24");
    let mut a = attrs(ip4!("10.0.0.2"), &[65002]);
    a.comm = Some([Comm::NO_EXPORT].into_iter().collect());
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    assert!(queue_empty(&h, ip!("10.0.0.3")));
    assert!(!queue_empty(&h, ip!("10.0.0.4")));

    // NO_ADVERTISE isn't sent to anyone.
    let prefix = net!("192.168.1.0/24");
    let mut a = attrs(ip4!("10.0.0.2"), &[65002]);
    a.comm = Some([Comm::NO_ADVERTISE].into_iter().collect());
    h.update(ip!("10.0.0.2"), prefix, a).unwrap();
    for addr in [ip!("10.0.0.3"), ip!("10.0.0.4")] {
        let queue = h.neighbors[&addr].update_queues.get(AfiSafi::Ipv4Unicast);
        assert!(queue.reach.values().all(|p| !p.contains(&prefix)));
    }
}

#[test]
fn clear_peer_removes_routes() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    let prefixes = [net!("192.168.0.0/24"), net!("192.168.1.0/24")];
    for prefix in prefixes {
        h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
            .unwrap();
    }

    let nbr = h.neighbors.get_mut(&ip!("10.0.0.2")).unwrap();
    h.rib.clear_peer(nbr);
    assert!(nbr.prefix_count.is_empty());
    h.with_cxt(|rib, cxt| rib.process_queued(cxt));

    assert!(h.rib.tables.ipv4_unicast.prefixes.is_empty());
    assert!(h.rib.store.records.is_empty());
    for prefix in prefixes {
        assert!(h.sink.contains(&uninstall(prefix, ip!("10.0.0.2"))));
    }
}

//
// Aggregation.
//

#[test]
fn aggregate_summary_only() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    h.neighbor_add(ip!("10.0.0.3"), 65003, ip4!("3.3.3.3"));
    let aggregate = net!("10.1.0.0/16");
    let children = [net!("10.1.0.0/24"), net!("10.1.1.0/24")];
    for prefix in children {
        h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
            .unwrap();
    }

    h.with_cxt(|rib, cxt| {
        rib.aggregate_add(cxt, AfiSafi::Ipv4Unicast, aggregate, true, false)
    });

    let table = &h.rib.tables.ipv4_unicast;
    assert_eq!(table.aggregates[&aggregate].count, 2);
    let route = table.selected(&aggregate).unwrap();
    assert_eq!(route.sub_type, RouteSubType::Aggregate);
    assert!(route.attrs.value.base.atomic_aggregate);
    for prefix in children {
        assert!(table.selected(&prefix).is_none());
        assert_eq!(table.prefixes[&prefix].routes[0].suppress, 1);
        assert!(h.sink.contains(&uninstall(prefix, ip!("10.0.0.2"))));
    }

    // Only the aggregate is announced.
    let queue = h.neighbors[&ip!("10.0.0.3")]
        .update_queues
        .get(AfiSafi::Ipv4Unicast);
    assert!(queue.reach.values().any(|p| p.contains(&aggregate)));
    for prefix in children {
        assert!(queue.unreach.contains(&prefix));
    }

    // Removing the aggregate restores the more specific routes.
    h.with_cxt(|rib, cxt| {
        rib.aggregate_delete(cxt, AfiSafi::Ipv4Unicast, aggregate)
    });
    let table = &h.rib.tables.ipv4_unicast;
    assert!(table.selected(&aggregate).is_none());
    for prefix in children {
        assert!(table.selected(&prefix).is_some());
        let installs = h
            .sink
            .iter()
            .filter(|msg| **msg == install(prefix, ip!("10.0.0.2")))
            .count();
        assert_eq!(installs, 2);
    }
}

#[test]
fn aggregate_follows_more_specifics() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    let aggregate = net!("10.1.0.0/16");
    let child = net!("10.1.5.0/24");

    // Nothing to aggregate yet.
    h.with_cxt(|rib, cxt| {
        rib.aggregate_add(cxt, AfiSafi::Ipv4Unicast, aggregate, false, false)
    });
    assert!(h.selected(&aggregate).is_none());

    // The aggregate itself doesn't count as a more specific route.
    h.update(ip!("10.0.0.2"), aggregate, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();
    assert_eq!(h.selected_from(&aggregate), Some(ip!("10.0.0.2")));

    h.update(ip!("10.0.0.2"), child, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();
    let route = h.selected(&aggregate).unwrap();
    assert_eq!(route.sub_type, RouteSubType::Aggregate);
    // Without summary-only, the more specific route stays selected.
    assert_eq!(h.selected_from(&child), Some(ip!("10.0.0.2")));

    h.withdraw(ip!("10.0.0.2"), child);
    assert_eq!(h.selected_from(&aggregate), Some(ip!("10.0.0.2")));
    assert_eq!(h.rib.tables.ipv4_unicast.aggregates[&aggregate].count, 0);
}

//
// Local routes.
//

#[test]
fn redistribute_configured_types() {
    let mut h = Harness::new();
    h.config.redistribute.push(RedistributeCfg {
        route_type: RouteType::Connected,
        route_map: None,
    });
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    let prefix = net!("10.9.0.0/24");

    h.with_cxt(|rib, cxt| {
        rib.redistribute_add(
            cxt,
            prefix,
            Some(ip!("10.0.0.254")),
            RouteType::Connected,
        );
        rib.redistribute_add(
            cxt,
            net!("10.8.0.0/24"),
            None,
            RouteType::Static,
        );
    });

    let route = h.selected(&prefix).unwrap();
    assert_eq!(route.origin, RouteOrigin::Local);
    assert_eq!(route.route_type, RouteType::Connected);
    assert_eq!(route.sub_type, RouteSubType::Redistribute);
    assert_eq!(route.attrs.value.base.origin, Origin::Incomplete);
    assert!(h.selected(&net!("10.8.0.0/24")).is_none());
    // Local routes are never installed.
    assert!(h.sink.is_empty());

    let queue = h.neighbors[&ip!("10.0.0.2")]
        .update_queues
        .get(AfiSafi::Ipv4Unicast);
    assert!(queue.reach.values().any(|p| p.contains(&prefix)));

    h.with_cxt(|rib, cxt| {
        rib.redistribute_delete(cxt, prefix, RouteType::Connected)
    });
    assert!(h.selected(&prefix).is_none());
    let queue = h.neighbors[&ip!("10.0.0.2")]
        .update_queues
        .get(AfiSafi::Ipv4Unicast);
    assert!(queue.unreach.contains(&prefix));
}

#[test]
fn redistribute_withdraw_all() {
    let mut h = Harness::new();
    h.config.redistribute.push(RedistributeCfg {
        route_type: RouteType::Ospf,
        route_map: None,
    });
    h.with_cxt(|rib, cxt| {
        rib.redistribute_add(cxt, net!("10.9.0.0/24"), None, RouteType::Ospf);
        rib.redistribute_add(cxt, net!("2001:db8::/32"), None, RouteType::Ospf);
        rib.redistribute_withdraw_all(cxt, RouteType::Ospf);
    });

    assert!(h.rib.tables.ipv4_unicast.prefixes.is_empty());
    assert!(h.rib.tables.ipv6_unicast.prefixes.is_empty());
    assert!(h.rib.store.records.is_empty());
}

#[test]
fn network_route_map() {
    let mut h = Harness::new();
    h.policy.route_map.insert(
        "NET".to_owned(),
        vec![RouteMapEntry {
            seq: 10,
            action: FilterAction::Permit,
            matches: vec![],
            sets: vec![RouteMapSet::LocalPreference(300)],
        }],
    );
    let prefix = net!("10.9.0.0/24");

    h.with_cxt(|rib, cxt| {
        rib.static_add(cxt, AfiSafi::Ipv4Unicast, prefix, Some("NET"));
        rib.static_add(
            cxt,
            AfiSafi::Ipv4Unicast,
            net!("10.8.0.0/24"),
            Some("UNKNOWN"),
        );
    });

    let route = h.selected(&prefix).unwrap();
    assert_eq!(route.attrs.value.base.local_pref, Some(300));
    assert_eq!(route.attrs.value.base.weight, 32768);
    assert!(h.selected(&net!("10.8.0.0/24")).is_none());
}

//
// Soft reconfiguration.
//

#[test]
fn soft_reconfig_inbound() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"))
        .config
        .soft_reconfiguration = true;
    let prefix = net!("192.168.0.0/24");

    h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
        .unwrap();
    assert_eq!(h.selected(&prefix).unwrap().attrs.value.base.local_pref, None);

    // New inbound policy.
    h.policy.route_map.insert(
        "IN".to_owned(),
        vec![RouteMapEntry {
            seq: 10,
            action: FilterAction::Permit,
            matches: vec![],
            sets: vec![RouteMapSet::LocalPreference(300)],
        }],
    );
    h.neighbors
        .get_mut(&ip!("10.0.0.2"))
        .unwrap()
        .config
        .route_map_in = Some("IN".to_owned());
    h.with_cxt(|rib, cxt| {
        rib.soft_reconfig_in(cxt, ip!("10.0.0.2"), AfiSafi::Ipv4Unicast)
    })
    .unwrap();
    assert_eq!(
        h.selected(&prefix).unwrap().attrs.value.base.local_pref,
        Some(300)
    );

    // A denying policy removes the route but keeps the Adj-RIB-In.
    h.policy.route_map.get_mut("IN").unwrap()[0].action = FilterAction::Deny;
    h.with_cxt(|rib, cxt| {
        rib.soft_reconfig_in(cxt, ip!("10.0.0.2"), AfiSafi::Ipv4Unicast)
    })
    .unwrap();
    assert!(h.selected(&prefix).is_none());
    let dest = &h.rib.tables.ipv4_unicast.prefixes[&prefix];
    assert!(dest.adj_rib[&ip!("10.0.0.2")].in_.is_some());
    assert_eq!(
        h.neighbors[&ip!("10.0.0.2")].prefix_count[&AfiSafi::Ipv4Unicast],
        0
    );
}

#[test]
fn terminate_uninstalls_everything() {
    let mut h = Harness::new();
    h.neighbor_add(ip!("10.0.0.2"), 65002, ip4!("2.2.2.2"));
    let prefixes = [net!("192.168.0.0/24"), net!("192.168.1.0/24")];
    for prefix in prefixes {
        h.update(ip!("10.0.0.2"), prefix, attrs(ip4!("10.0.0.2"), &[65002]))
            .unwrap();
    }

    let mut sink = vec![];
    h.rib.terminate(&mut sink);
    assert_eq!(
        sink,
        prefixes
            .iter()
            .map(|prefix| uninstall(*prefix, ip!("10.0.0.2")))
            .collect::<Vec<_>>()
    );
}
