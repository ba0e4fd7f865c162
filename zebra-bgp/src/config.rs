//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use zebra_utils::southbound::RouteType;

use crate::af::AfiSafi;
use crate::packet::consts::BGP_PORT;

// BGP instance configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct InstanceCfg {
    pub local_as: u16,
    pub router_id: Ipv4Addr,
    pub cluster_id: Option<Ipv4Addr>,
    pub confederation_id: Option<u16>,
    pub confederation_peers: BTreeSet<u16>,
    pub always_compare_med: bool,
    pub missing_as_worst: bool,
    pub listen_port: u16,
    #[serde(rename = "neighbor")]
    pub neighbors: Vec<NeighborCfg>,
    #[serde(rename = "network")]
    pub networks: Vec<NetworkCfg>,
    #[serde(rename = "aggregate")]
    pub aggregates: Vec<AggregateCfg>,
    #[serde(rename = "redistribute")]
    pub redistribute: Vec<RedistributeCfg>,
}

// BGP neighbor configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct NeighborCfg {
    pub address: IpAddr,
    pub remote_as: u16,
    pub weight: u32,
    pub holdtime: u16,
    pub keepalive: Option<u16>,
    pub connect_retry: u16,
    pub passive: bool,
    pub shutdown: bool,
    pub next_hop_self: bool,
    pub soft_reconfiguration: bool,
    pub send_community: bool,
    pub send_ext_community: bool,
    pub reflector_client: bool,
    pub route_server_client: bool,
    pub default_originate: bool,
    pub transparent_as: bool,
    pub transparent_next_hop: bool,
    pub max_prefix: Option<u32>,
    pub distribute_list_in: Option<String>,
    pub distribute_list_out: Option<String>,
    pub prefix_list_in: Option<String>,
    pub prefix_list_out: Option<String>,
    pub filter_list_in: Option<String>,
    pub filter_list_out: Option<String>,
    pub route_map_in: Option<String>,
    pub route_map_out: Option<String>,
    pub afi_safi: BTreeSet<AfiSafi>,
}

// Locally originated network.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NetworkCfg {
    pub prefix: IpNetwork,
    #[serde(default)]
    pub multicast: bool,
    pub route_map: Option<String>,
}

// Aggregate address.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AggregateCfg {
    pub prefix: IpNetwork,
    #[serde(default)]
    pub multicast: bool,
    #[serde(default)]
    pub summary_only: bool,
    #[serde(default)]
    pub as_set: bool,
}

// Redistribution of routes learned from another routing source.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RedistributeCfg {
    pub route_type: RouteType,
    pub route_map: Option<String>,
}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    // Cluster identifier used for route reflection.
    pub fn cluster_id(&self) -> Ipv4Addr {
        self.cluster_id.unwrap_or(self.router_id)
    }

    // Returns whether any neighbor is configured as a route-reflector
    // client.
    pub fn reflector(&self) -> bool {
        self.neighbors.iter().any(|nbr| nbr.reflector_client)
    }

    pub fn redistribute_cfg(
        &self,
        route_type: RouteType,
    ) -> Option<&RedistributeCfg> {
        self.redistribute
            .iter()
            .find(|redist| redist.route_type == route_type)
    }
}

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            local_as: 0,
            router_id: Ipv4Addr::UNSPECIFIED,
            cluster_id: None,
            confederation_id: None,
            confederation_peers: Default::default(),
            always_compare_med: false,
            missing_as_worst: false,
            listen_port: BGP_PORT,
            neighbors: Default::default(),
            networks: Default::default(),
            aggregates: Default::default(),
            redistribute: Default::default(),
        }
    }
}

// ===== impl NeighborCfg =====

impl NeighborCfg {
    pub const DFLT_HOLDTIME: u16 = 180;
    pub const DFLT_CONNECT_RETRY: u16 = 120;

    pub fn new(address: IpAddr, remote_as: u16) -> NeighborCfg {
        NeighborCfg {
            address,
            remote_as,
            ..Default::default()
        }
    }
}

impl Default for NeighborCfg {
    fn default() -> NeighborCfg {
        NeighborCfg {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            remote_as: 0,
            weight: 0,
            holdtime: Self::DFLT_HOLDTIME,
            keepalive: None,
            connect_retry: Self::DFLT_CONNECT_RETRY,
            passive: false,
            shutdown: false,
            next_hop_self: false,
            soft_reconfiguration: false,
            send_community: true,
            send_ext_community: true,
            reflector_client: false,
            route_server_client: false,
            default_originate: false,
            transparent_as: false,
            transparent_next_hop: false,
            max_prefix: None,
            distribute_list_in: None,
            distribute_list_out: None,
            prefix_list_in: None,
            prefix_list_out: None,
            filter_list_in: None,
            filter_list_out: None,
            route_map_in: None,
            route_map_out: None,
            afi_safi: [AfiSafi::Ipv4Unicast].into(),
        }
    }
}

// ===== impl NetworkCfg =====

impl NetworkCfg {
    pub fn afi_safi(&self) -> AfiSafi {
        AfiSafi::from_prefix(&self.prefix, self.multicast)
    }
}

// ===== impl AggregateCfg =====

impl AggregateCfg {
    pub fn afi_safi(&self) -> AfiSafi {
        AfiSafi::from_prefix(&self.prefix, self.multicast)
    }
}
