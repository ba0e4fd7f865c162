//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::{debug, debug_span};
use zebra_utils::southbound::RedistributeMsg;

use crate::af::AfiSafi;
use crate::neighbor::fsm;
use crate::packet::message::Message;
use crate::rib::Route;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceStop(InstanceInactiveReason),
    NbrFsmEvent(&'a IpAddr, &'a fsm::Event),
    NbrFsmTransition(&'a IpAddr, &'a fsm::State, &'a fsm::State),
    NbrMsgRx(&'a IpAddr, &'a Message),
    NbrMsgTx(&'a IpAddr, &'a Message),
    NbrRouteFiltered(&'a IpAddr, &'a IpNetwork, RouteFilterReason),
    NbrRouteNotAnnounced(&'a IpAddr, &'a IpNetwork, RouteFilterReason),
    NbrRouteNotFound(&'a IpAddr, &'a IpNetwork),
    NbrRouteRefresh(&'a IpAddr, AfiSafi),
    UpdateTooLarge(AfiSafi, u16, usize),
    BestPathFound(&'a IpNetwork, &'a Route),
    BestPathNotFound(&'a IpNetwork),
    AggregateActivate(&'a IpNetwork),
    AggregateDeactivate(&'a IpNetwork),
    LocalRouteFiltered(&'a IpNetwork, &'a str),
    RedistributeRx(&'a RedistributeMsg),
    AttrIntern(u64, bool),
    AttrRelease(u64),
    PolicyDeny(&'a IpNetwork, &'static str, &'a str),
}

// Reason why an BGP instance is inactive.
#[derive(Debug)]
pub enum InstanceInactiveReason {
    AdminDown,
    MissingRouterId,
    MissingLocalAs,
}

// Reason why a route wasn't accepted or announced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteFilterReason {
    AsPathLoop,
    ClusterLoop,
    InputFilter,
    RouteMapIn,
    Community,
    OriginatorId,
    OutputFilter,
    DefaultRoute,
    RouteMapOut,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart => {
                // Parent span(s): bgp-instance
                debug!("{}", self);
            }
            Debug::InstanceStop(reason) => {
                // Parent span(s): bgp-instance
                debug!(%reason, "{}", self);
            }
            Debug::NbrFsmEvent(addr, event) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    })
                });
            }
            Debug::NbrFsmTransition(addr, old_state, new_state) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                });
            }
            Debug::NbrMsgRx(addr, msg) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data =
                            serde_json::to_string(&msg).unwrap_or_default();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrMsgTx(addr, msg) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data =
                            serde_json::to_string(&msg).unwrap_or_default();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrRouteFiltered(addr, prefix, reason)
            | Debug::NbrRouteNotAnnounced(addr, prefix, reason) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("rib").in_scope(|| {
                        debug!(%prefix, ?reason, "{}", self);
                    })
                });
            }
            Debug::NbrRouteNotFound(addr, prefix) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("rib").in_scope(|| {
                        debug!(%prefix, "{}", self);
                    })
                });
            }
            Debug::NbrRouteRefresh(addr, afi_safi) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!(%afi_safi, "{}", self);
                });
            }
            Debug::UpdateTooLarge(afi_safi, overhead, prefixes) => {
                // Parent span(s): bgp-instance
                debug_span!("output").in_scope(|| {
                    debug!(%afi_safi, %overhead, %prefixes, "{}", self);
                });
            }
            Debug::BestPathFound(prefix, route) => {
                // Parent span(s): bgp-instance
                debug_span!("rib").in_scope(|| {
                    debug!(%prefix, origin = ?route.origin, "{}", self);
                });
            }
            Debug::BestPathNotFound(prefix)
            | Debug::AggregateActivate(prefix)
            | Debug::AggregateDeactivate(prefix) => {
                // Parent span(s): bgp-instance
                debug_span!("rib").in_scope(|| {
                    debug!(%prefix, "{}", self);
                });
            }
            Debug::LocalRouteFiltered(prefix, route_map) => {
                // Parent span(s): bgp-instance
                debug_span!("rib").in_scope(|| {
                    debug!(%prefix, %route_map, "{}", self);
                });
            }
            Debug::RedistributeRx(msg) => {
                // Parent span(s): bgp-instance
                debug_span!("redistribute").in_scope(|| {
                    debug!(?msg, "{}", self);
                });
            }
            Debug::AttrIntern(index, created) => {
                // Parent span(s): bgp-instance
                debug_span!("store").in_scope(|| {
                    debug!(%index, %created, "{}", self);
                });
            }
            Debug::AttrRelease(index) => {
                // Parent span(s): bgp-instance
                debug_span!("store").in_scope(|| {
                    debug!(%index, "{}", self);
                });
            }
            Debug::PolicyDeny(prefix, list_type, name) => {
                // Parent span(s): bgp-instance
                debug_span!("policy").in_scope(|| {
                    debug!(%prefix, %list_type, %name, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop(..) => {
                write!(f, "stopping instance")
            }
            Debug::NbrFsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NbrMsgRx(..) | Debug::NbrMsgTx(..) => {
                write!(f, "message")
            }
            Debug::NbrRouteFiltered(..) => {
                write!(f, "route filtered")
            }
            Debug::NbrRouteNotAnnounced(..) => {
                write!(f, "route not announced")
            }
            Debug::NbrRouteNotFound(..) => {
                write!(f, "withdrawn route not found")
            }
            Debug::NbrRouteRefresh(..) => {
                write!(f, "route refresh")
            }
            Debug::UpdateTooLarge(..) => {
                write!(f, "attributes too large, routes not announced")
            }
            Debug::BestPathFound(..) => {
                write!(f, "best path found")
            }
            Debug::BestPathNotFound(..) => {
                write!(f, "best path not found")
            }
            Debug::AggregateActivate(..) => {
                write!(f, "aggregate route activated")
            }
            Debug::AggregateDeactivate(..) => {
                write!(f, "aggregate route deactivated")
            }
            Debug::LocalRouteFiltered(..) => {
                write!(f, "local route filtered")
            }
            Debug::RedistributeRx(..) => {
                write!(f, "redistributed route")
            }
            Debug::AttrIntern(..) => {
                write!(f, "attribute set interned")
            }
            Debug::AttrRelease(..) => {
                write!(f, "attribute set released")
            }
            Debug::PolicyDeny(..) => {
                write!(f, "denied by policy")
            }
        }
    }
}

// ===== impl InstanceInactiveReason =====

impl std::fmt::Display for InstanceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceInactiveReason::AdminDown => {
                write!(f, "administrative status down")
            }
            InstanceInactiveReason::MissingRouterId => {
                write!(f, "missing router-id")
            }
            InstanceInactiveReason::MissingLocalAs => {
                write!(f, "missing local AS")
            }
        }
    }
}
