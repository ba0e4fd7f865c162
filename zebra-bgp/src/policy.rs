//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnetwork::IpNetwork;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use tracing::warn;

use crate::config::NeighborCfg;
use crate::debug::Debug;
use crate::packet::attribute::{
    Aggregator, Attrs, Comm, CommList, Comms, ExtComm, MpNexthop,
};
use crate::packet::consts::Origin;

// Filtering policy configuration: named lists and route-maps.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PolicyCfg {
    pub prefix_list: BTreeMap<String, Vec<PrefixListEntry>>,
    pub access_list: BTreeMap<String, Vec<AccessListEntry>>,
    pub as_path_list: BTreeMap<String, Vec<AsPathListEntry>>,
    pub community_list: BTreeMap<String, Vec<CommunityListEntry>>,
    pub route_map: BTreeMap<String, Vec<RouteMapEntry>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Permit,
    Deny,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PrefixListEntry {
    pub seq: u32,
    pub action: FilterAction,
    pub prefix: IpNetwork,
    pub ge: Option<u8>,
    pub le: Option<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AccessListEntry {
    pub action: FilterAction,
    // No prefix means "any".
    pub prefix: Option<IpNetwork>,
    #[serde(default)]
    pub exact_match: bool,
}

#[serde_as]
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AsPathListEntry {
    pub action: FilterAction,
    #[serde_as(as = "DisplayFromStr")]
    pub regex: AsPathRegex,
}

#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CommunityListEntry {
    pub action: FilterAction,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub communities: Vec<Comm>,
}

// AS_PATH regular expression, using the "_" delimiter shorthand.
#[derive(Clone, Debug)]
pub struct AsPathRegex {
    source: String,
    regex: Regex,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RouteMapEntry {
    pub seq: u32,
    pub action: FilterAction,
    #[serde(default, rename = "match")]
    pub matches: Vec<RouteMapMatch>,
    #[serde(default, rename = "set")]
    pub sets: Vec<RouteMapSet>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteMapMatch {
    // Access-list applied to the prefix.
    IpAddress(String),
    IpAddressPrefixList(String),
    // Access-list applied to the IPv4 next hop.
    IpNextHop(String),
    Ipv6Address(String),
    Ipv6AddressPrefixList(String),
    Ipv6NextHop(Ipv6Addr),
    Metric(u32),
    AsPath(String),
    Community {
        name: String,
        #[serde(default)]
        exact: bool,
    },
}

#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteMapSet {
    IpNextHop(Ipv4Addr),
    Ipv6NextHopGlobal(Ipv6Addr),
    Ipv6NextHopLocal(Ipv6Addr),
    LocalPreference(u32),
    Weight(u32),
    Metric(#[serde_as(as = "DisplayFromStr")] MetricSet),
    AsPathPrepend(Vec<u16>),
    Community(#[serde_as(as = "Vec<DisplayFromStr>")] Vec<Comm>),
    CommunityAdditive(#[serde_as(as = "Vec<DisplayFromStr>")] Vec<Comm>),
    CommunityNone,
    ExtCommunityRt(Vec<String>),
    ExtCommunitySoo(Vec<String>),
    Origin(Origin),
    AtomicAggregate,
    Aggregator { asn: u16, address: Ipv4Addr },
    OriginatorId(Ipv4Addr),
}

// Metric modification: "N", "+N" or "-N".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricSet {
    Set(u32),
    Add(u32),
    Subtract(u32),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetricSetParseError;

// Direction of a neighbor filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterDirection {
    In,
    Out,
}

// ===== impl PolicyCfg =====

impl PolicyCfg {
    // Applies a prefix-list to a prefix.
    //
    // Entries are evaluated in sequence order and the first match wins. A
    // list without entries permits everything, while an unknown list or a
    // prefix that matches no entry is denied.
    pub fn prefix_list_apply(&self, name: &str, prefix: &IpNetwork) -> bool {
        let Some(entries) = self.prefix_list.get(name) else {
            return false;
        };
        if entries.is_empty() {
            return true;
        }

        entries
            .iter()
            .sorted_by_key(|entry| entry.seq)
            .find(|entry| entry.matches(prefix))
            .is_some_and(|entry| entry.action == FilterAction::Permit)
    }

    // Applies an access-list to a prefix.
    pub fn access_list_apply(&self, name: &str, prefix: &IpNetwork) -> bool {
        let Some(entries) = self.access_list.get(name) else {
            return false;
        };

        entries
            .iter()
            .find(|entry| entry.matches(prefix))
            .is_some_and(|entry| entry.action == FilterAction::Permit)
    }

    // Applies an AS-path access list to the printable form of an AS_PATH.
    pub fn as_path_list_apply(&self, name: &str, attrs: &Attrs) -> bool {
        let Some(entries) = self.as_path_list.get(name) else {
            return false;
        };

        let as_path = attrs.as_path.to_string();
        entries
            .iter()
            .find(|entry| entry.regex.is_match(&as_path))
            .is_some_and(|entry| entry.action == FilterAction::Permit)
    }

    // Applies a community list to the communities of a route.
    //
    // An entry matches when all of its communities are present (or, with
    // `exact`, when the route carries exactly those communities).
    pub fn community_list_apply(
        &self,
        name: &str,
        comm: Option<&Comms>,
        exact: bool,
    ) -> bool {
        let Some(entries) = self.community_list.get(name) else {
            return false;
        };
        let Some(comm) = comm else {
            return false;
        };

        entries
            .iter()
            .find(|entry| {
                let list = entry.communities.iter().copied().collect::<Comms>();
                if exact {
                    *comm == list
                } else {
                    comm.includes(&list)
                }
            })
            .is_some_and(|entry| entry.action == FilterAction::Permit)
    }

    // Applies a route-map, modifying the attributes in place.
    //
    // Returns whether the route is permitted. Unknown route-maps deny.
    pub fn route_map_apply(
        &self,
        name: &str,
        prefix: &IpNetwork,
        attrs: &mut Attrs,
    ) -> bool {
        let Some(entries) = self.route_map.get(name) else {
            return false;
        };

        for entry in entries.iter().sorted_by_key(|entry| entry.seq) {
            if !entry
                .matches
                .iter()
                .all(|rmatch| self.route_map_match(rmatch, prefix, attrs))
            {
                continue;
            }

            match entry.action {
                FilterAction::Permit => {
                    for set in &entry.sets {
                        route_map_set(set, attrs);
                    }
                    return true;
                }
                FilterAction::Deny => return false,
            }
        }

        false
    }

    // Applies the distribute-list, prefix-list and filter-list configured on
    // a neighbor for the given direction.
    pub fn neighbor_filter(
        &self,
        nbr: &NeighborCfg,
        dir: FilterDirection,
        prefix: &IpNetwork,
        attrs: &Attrs,
    ) -> bool {
        let (distribute_list, prefix_list, filter_list) = match dir {
            FilterDirection::In => (
                &nbr.distribute_list_in,
                &nbr.prefix_list_in,
                &nbr.filter_list_in,
            ),
            FilterDirection::Out => (
                &nbr.distribute_list_out,
                &nbr.prefix_list_out,
                &nbr.filter_list_out,
            ),
        };

        if let Some(name) = distribute_list
            && !self.access_list_apply(name, prefix)
        {
            Debug::PolicyDeny(prefix, "distribute-list", name).log();
            return false;
        }
        if let Some(name) = prefix_list
            && !self.prefix_list_apply(name, prefix)
        {
            Debug::PolicyDeny(prefix, "prefix-list", name).log();
            return false;
        }
        if let Some(name) = filter_list
            && !self.as_path_list_apply(name, attrs)
        {
            Debug::PolicyDeny(prefix, "filter-list", name).log();
            return false;
        }

        true
    }

    fn route_map_match(
        &self,
        rmatch: &RouteMapMatch,
        prefix: &IpNetwork,
        attrs: &Attrs,
    ) -> bool {
        match rmatch {
            RouteMapMatch::IpAddress(name) => {
                prefix.is_ipv4() && self.access_list_apply(name, prefix)
            }
            RouteMapMatch::IpAddressPrefixList(name) => {
                prefix.is_ipv4() && self.prefix_list_apply(name, prefix)
            }
            RouteMapMatch::IpNextHop(name) => {
                attrs.base.nexthop.is_some_and(|nexthop| {
                    self.access_list_apply(name, &host_prefix(nexthop.into()))
                })
            }
            RouteMapMatch::Ipv6Address(name) => {
                prefix.is_ipv6() && self.access_list_apply(name, prefix)
            }
            RouteMapMatch::Ipv6AddressPrefixList(name) => {
                prefix.is_ipv6() && self.prefix_list_apply(name, prefix)
            }
            RouteMapMatch::Ipv6NextHop(addr) => match attrs.base.mp_nexthop {
                Some(MpNexthop::Ipv6(global)) => global == *addr,
                Some(MpNexthop::Ipv6LinkLocal { global, local }) => {
                    global == *addr || local == *addr
                }
                _ => false,
            },
            RouteMapMatch::Metric(metric) => {
                attrs.base.med.unwrap_or(0) == *metric
            }
            RouteMapMatch::AsPath(name) => self.as_path_list_apply(name, attrs),
            RouteMapMatch::Community { name, exact } => {
                self.community_list_apply(name, attrs.comm.as_ref(), *exact)
            }
        }
    }
}

// ===== impl PrefixListEntry =====

impl PrefixListEntry {
    fn matches(&self, prefix: &IpNetwork) -> bool {
        if !same_family(&self.prefix, prefix)
            || prefix.prefix() < self.prefix.prefix()
            || !self.prefix.contains(prefix.ip())
        {
            return false;
        }

        let max_len = match prefix {
            IpNetwork::V4(_) => 32,
            IpNetwork::V6(_) => 128,
        };
        let (ge, le) = match (self.ge, self.le) {
            (None, None) => (self.prefix.prefix(), self.prefix.prefix()),
            (Some(ge), None) => (ge, max_len),
            (None, Some(le)) => (self.prefix.prefix(), le),
            (Some(ge), Some(le)) => (ge, le),
        };
        prefix.prefix() >= ge && prefix.prefix() <= le
    }
}

// ===== impl AccessListEntry =====

impl AccessListEntry {
    fn matches(&self, prefix: &IpNetwork) -> bool {
        let Some(filter) = &self.prefix else {
            return true;
        };
        if !same_family(filter, prefix)
            || prefix.prefix() < filter.prefix()
            || !filter.contains(prefix.ip())
        {
            return false;
        }
        !self.exact_match || prefix.prefix() == filter.prefix()
    }
}

// ===== impl AsPathRegex =====

impl AsPathRegex {
    fn is_match(&self, as_path: &str) -> bool {
        self.regex.is_match(as_path)
    }
}

impl FromStr for AsPathRegex {
    type Err = regex::Error;

    fn from_str(s: &str) -> Result<AsPathRegex, regex::Error> {
        let translated = s.replace('_', "(^|[,{}() ]|$)");
        Ok(AsPathRegex {
            source: s.to_owned(),
            regex: Regex::new(&translated)?,
        })
    }
}

impl std::fmt::Display for AsPathRegex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

// ===== impl MetricSet =====

impl FromStr for MetricSet {
    type Err = MetricSetParseError;

    fn from_str(s: &str) -> Result<MetricSet, MetricSetParseError> {
        let parse = |s: &str| s.parse::<u32>().map_err(|_| MetricSetParseError);
        if let Some(value) = s.strip_prefix('+') {
            Ok(MetricSet::Add(parse(value)?))
        } else if let Some(value) = s.strip_prefix('-') {
            Ok(MetricSet::Subtract(parse(value)?))
        } else {
            Ok(MetricSet::Set(parse(s)?))
        }
    }
}

impl std::fmt::Display for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricSet::Set(value) => write!(f, "{value}"),
            MetricSet::Add(value) => write!(f, "+{value}"),
            MetricSet::Subtract(value) => write!(f, "-{value}"),
        }
    }
}

impl std::fmt::Display for MetricSetParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid metric value")
    }
}

// ===== helper functions =====

fn same_family(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

fn host_prefix(addr: IpAddr) -> IpNetwork {
    IpNetwork::from(addr)
}

fn route_map_set(set: &RouteMapSet, attrs: &mut Attrs) {
    match set {
        RouteMapSet::IpNextHop(addr) => {
            attrs.base.nexthop = Some(*addr);
        }
        RouteMapSet::Ipv6NextHopGlobal(addr) => {
            attrs.base.mp_nexthop = Some(match attrs.base.mp_nexthop {
                Some(MpNexthop::Ipv6LinkLocal { local, .. }) => {
                    MpNexthop::Ipv6LinkLocal {
                        global: *addr,
                        local,
                    }
                }
                _ => MpNexthop::Ipv6(*addr),
            });
        }
        RouteMapSet::Ipv6NextHopLocal(addr) => {
            let global = match attrs.base.mp_nexthop {
                Some(MpNexthop::Ipv6(global))
                | Some(MpNexthop::Ipv6LinkLocal { global, .. }) => global,
                _ => Ipv6Addr::UNSPECIFIED,
            };
            attrs.base.mp_nexthop = Some(MpNexthop::Ipv6LinkLocal {
                global,
                local: *addr,
            });
        }
        RouteMapSet::LocalPreference(local_pref) => {
            attrs.base.local_pref = Some(*local_pref);
        }
        RouteMapSet::Weight(weight) => {
            attrs.base.weight = *weight;
        }
        RouteMapSet::Metric(metric) => {
            let med = attrs.base.med.unwrap_or(0);
            attrs.base.med = Some(match metric {
                MetricSet::Set(value) => *value,
                MetricSet::Add(value) => med.saturating_add(*value),
                MetricSet::Subtract(value) => med.saturating_sub(*value),
            });
        }
        RouteMapSet::AsPathPrepend(asns) => {
            for asn in asns.iter().rev() {
                attrs.as_path.prepend(*asn, 1);
            }
        }
        RouteMapSet::Community(comms) => {
            attrs.comm = Some(comms.iter().copied().collect());
        }
        RouteMapSet::CommunityAdditive(comms) => {
            let comms = comms.iter().copied().collect::<Comms>();
            match &mut attrs.comm {
                Some(comm) => comm.merge(&comms),
                None => attrs.comm = Some(comms),
            }
        }
        RouteMapSet::CommunityNone => {
            attrs.comm = None;
        }
        RouteMapSet::ExtCommunityRt(values) => {
            ext_comm_add(attrs, values, ExtComm::route_target);
        }
        RouteMapSet::ExtCommunitySoo(values) => {
            ext_comm_add(attrs, values, ExtComm::site_of_origin);
        }
        RouteMapSet::Origin(origin) => {
            attrs.base.origin = *origin;
        }
        RouteMapSet::AtomicAggregate => {
            attrs.base.atomic_aggregate = true;
        }
        RouteMapSet::Aggregator { asn, address } => {
            attrs.base.aggregator = Some(Aggregator {
                asn: *asn,
                identifier: *address,
            });
        }
        RouteMapSet::OriginatorId(originator_id) => {
            attrs.base.originator_id = Some(*originator_id);
        }
    }
}

// Extended communities are always added to the existing ones.
fn ext_comm_add<F, E>(attrs: &mut Attrs, values: &[String], parse: F)
where
    F: Fn(&str) -> Result<ExtComm, E>,
{
    let mut ext_comms = CommList(Default::default());
    for value in values {
        match parse(value) {
            Ok(ext_comm) => {
                ext_comms.0.insert(ext_comm);
            }
            Err(_) => {
                warn!(%value, "ignoring invalid extended community");
            }
        }
    }

    match &mut attrs.ext_comm {
        Some(ext_comm) => ext_comm.merge(&ext_comms),
        None if !ext_comms.0.is_empty() => attrs.ext_comm = Some(ext_comms),
        None => (),
    }
}

// ===== unit tests =====
