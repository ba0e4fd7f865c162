//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::UnboundedSender;
use crate::ip::AddressFamily;

// Route installation request sent to the kernel-facing process.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteMsg {
    Install(RouteKeyMsg),
    Uninstall(RouteKeyMsg),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteKeyMsg {
    pub prefix: IpNetwork,
    pub family: AddressFamily,
    pub nexthop: Option<IpAddr>,
}

// Source of a route.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Kernel,
    Connected,
    Static,
    Rip,
    Ospf,
    Bgp,
}

// Route learned from another routing source, offered for redistribution.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RedistributeMsg {
    Add {
        prefix: IpNetwork,
        nexthop: Option<IpAddr>,
        route_type: RouteType,
    },
    Delete {
        prefix: IpNetwork,
        route_type: RouteType,
    },
}

// Consumer of route installation requests.
//
// Implementations must not block: the routing engine calls into the sink
// while processing protocol events.
pub trait RouteSink {
    fn send(&mut self, msg: RouteMsg);
}

// ===== impl RouteMsg =====

impl RouteMsg {
    pub fn key(&self) -> &RouteKeyMsg {
        match self {
            RouteMsg::Install(key) | RouteMsg::Uninstall(key) => key,
        }
    }
}

// ===== impl RouteType =====

impl std::fmt::Display for RouteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteType::Kernel => write!(f, "kernel"),
            RouteType::Connected => write!(f, "connected"),
            RouteType::Static => write!(f, "static"),
            RouteType::Rip => write!(f, "rip"),
            RouteType::Ospf => write!(f, "ospf"),
            RouteType::Bgp => write!(f, "bgp"),
        }
    }
}

// ===== impl UnboundedSender =====

impl RouteSink for UnboundedSender<RouteMsg> {
    fn send(&mut self, msg: RouteMsg) {
        if let Err(error) = UnboundedSender::send(self, msg) {
            error!(%error, "failed to send route installation request");
        }
    }
}

// ===== impl Vec =====

impl RouteSink for Vec<RouteMsg> {
    fn send(&mut self, msg: RouteMsg) {
        self.push(msg);
    }
}
