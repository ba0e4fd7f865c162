//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::warn;
use zebra_utils::ip::{Ipv4AddrExt, Ipv6AddrExt};

use crate::debug::Debug;
use crate::neighbor::NeighborUpdateQueue;
use crate::packet::attribute::{self, ATTR_MIN_LEN_EXT, MpNexthop};
use crate::packet::consts::{Afi, Safi};
use crate::packet::message::{
    Message, MpReachNlri, MpUnreachNlri, ReachNlri, UnreachNlri, UpdateMsg,
};

// Address families supported by the routing engine.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AfiSafi {
    Ipv4Unicast,
    Ipv4Multicast,
    Ipv6Unicast,
    Ipv6Multicast,
}

// ===== impl AfiSafi =====

impl AfiSafi {
    pub fn all() -> impl Iterator<Item = AfiSafi> {
        [
            AfiSafi::Ipv4Unicast,
            AfiSafi::Ipv4Multicast,
            AfiSafi::Ipv6Unicast,
            AfiSafi::Ipv6Multicast,
        ]
        .into_iter()
    }

    // Maps an (AFI, SAFI) pair to an address family. MPLS-VPN isn't
    // supported.
    pub fn from_afi_safi(afi: Afi, safi: Safi) -> Option<AfiSafi> {
        match (afi, safi) {
            (Afi::Ipv4, Safi::Unicast) => Some(AfiSafi::Ipv4Unicast),
            (Afi::Ipv4, Safi::Multicast) => Some(AfiSafi::Ipv4Multicast),
            (Afi::Ipv6, Safi::Unicast) => Some(AfiSafi::Ipv6Unicast),
            (Afi::Ipv6, Safi::Multicast) => Some(AfiSafi::Ipv6Multicast),
            (_, Safi::MplsVpn) => None,
        }
    }

    pub fn from_prefix(prefix: &IpNetwork, multicast: bool) -> AfiSafi {
        match (prefix, multicast) {
            (IpNetwork::V4(_), false) => AfiSafi::Ipv4Unicast,
            (IpNetwork::V4(_), true) => AfiSafi::Ipv4Multicast,
            (IpNetwork::V6(_), false) => AfiSafi::Ipv6Unicast,
            (IpNetwork::V6(_), true) => AfiSafi::Ipv6Multicast,
        }
    }

    pub fn afi(&self) -> Afi {
        match self {
            AfiSafi::Ipv4Unicast | AfiSafi::Ipv4Multicast => Afi::Ipv4,
            AfiSafi::Ipv6Unicast | AfiSafi::Ipv6Multicast => Afi::Ipv6,
        }
    }

    pub fn safi(&self) -> Safi {
        match self {
            AfiSafi::Ipv4Unicast | AfiSafi::Ipv6Unicast => Safi::Unicast,
            AfiSafi::Ipv4Multicast | AfiSafi::Ipv6Multicast => Safi::Multicast,
        }
    }

    pub fn is_unicast(&self) -> bool {
        self.safi() == Safi::Unicast
    }

    fn addr_len(&self) -> u16 {
        match self.afi() {
            Afi::Ipv4 => Ipv4Addr::LENGTH as u16,
            Afi::Ipv6 => Ipv6Addr::LENGTH as u16,
        }
    }

    // Returns how many prefixes fit in an UPDATE message once `overhead`
    // bytes are taken by the header and attributes, or `None` if not even
    // one does.
    fn max_prefixes(&self, overhead: u16) -> Option<usize> {
        let available = Message::MAX_LEN.checked_sub(overhead)?;
        let max = available / (1 + self.addr_len());
        (max > 0).then_some(max as usize)
    }

    // Builds BGP UPDATE messages out of the provided update queue, leaving
    // the queue empty.
    //
    // IPv4 unicast uses the classic NLRI fields, all other families use the
    // multiprotocol attributes.
    pub fn build_updates(
        &self,
        queue: &mut NeighborUpdateQueue,
    ) -> Vec<Message> {
        let mut msgs = vec![];
        let reach = std::mem::take(&mut queue.reach);
        let unreach = std::mem::take(&mut queue.unreach);

        // Reachable prefixes.
        for (attrs, prefixes) in reach.into_iter() {
            if *self == AfiSafi::Ipv4Unicast {
                let Some(nexthop) = attrs.base.nexthop else {
                    warn!(afi_safi = %self, "missing next hop");
                    continue;
                };
                let overhead = UpdateMsg::MIN_LEN
                    .saturating_add(attrs.length())
                    .saturating_add(attribute::nexthop::length());
                let Some(max) = self.max_prefixes(overhead) else {
                    Debug::UpdateTooLarge(*self, overhead, prefixes.len())
                        .log();
                    continue;
                };

                msgs.extend(
                    prefixes.into_iter().chunks(max).into_iter().map(
                        |chunk| {
                            let reach = ReachNlri {
                                prefixes: chunk
                                    .filter_map(|prefix| match prefix {
                                        IpNetwork::V4(prefix) => Some(prefix),
                                        IpNetwork::V6(_) => None,
                                    })
                                    .collect(),
                                nexthop,
                            };
                            Message::Update(UpdateMsg {
                                reach: Some(reach),
                                attrs: Some(attrs.clone()),
                                ..Default::default()
                            })
                        },
                    ),
                );
            } else {
                let nexthop = match (self.afi(), attrs.base.mp_nexthop) {
                    (Afi::Ipv4, _) => attrs.base.nexthop.map(MpNexthop::Ipv4),
                    (Afi::Ipv6, nexthop) => nexthop,
                };
                let Some(nexthop) = nexthop else {
                    warn!(afi_safi = %self, "missing next hop");
                    continue;
                };
                let overhead = (UpdateMsg::MIN_LEN
                    + ATTR_MIN_LEN_EXT
                    + MpReachNlri::MIN_LEN
                    + nexthop.length() as u16)
                    .saturating_add(attrs.length());
                let Some(max) = self.max_prefixes(overhead) else {
                    Debug::UpdateTooLarge(*self, overhead, prefixes.len())
                        .log();
                    continue;
                };

                msgs.extend(
                    prefixes.into_iter().chunks(max).into_iter().map(
                        |chunk| {
                            let mp_reach = MpReachNlri {
                                afi: self.afi(),
                                safi: self.safi(),
                                nexthop,
                                prefixes: chunk.collect(),
                            };
                            Message::Update(UpdateMsg {
                                mp_reach: Some(mp_reach),
                                attrs: Some(attrs.clone()),
                                ..Default::default()
                            })
                        },
                    ),
                );
            }
        }

        // Unreachable prefixes.
        if !unreach.is_empty() {
            if *self == AfiSafi::Ipv4Unicast {
                let max = self.max_prefixes(UpdateMsg::MIN_LEN).unwrap_or(1);

                msgs.extend(
                    unreach.into_iter().chunks(max).into_iter().map(
                        |chunk| {
                            let unreach = UnreachNlri {
                                prefixes: chunk
                                    .filter_map(|prefix| match prefix {
                                        IpNetwork::V4(prefix) => Some(prefix),
                                        IpNetwork::V6(_) => None,
                                    })
                                    .collect(),
                            };
                            Message::Update(UpdateMsg {
                                unreach: Some(unreach),
                                ..Default::default()
                            })
                        },
                    ),
                );
            } else {
                let max = self
                    .max_prefixes(
                        UpdateMsg::MIN_LEN
                            + ATTR_MIN_LEN_EXT
                            + MpUnreachNlri::MIN_LEN,
                    )
                    .unwrap_or(1);

                msgs.extend(
                    unreach.into_iter().chunks(max).into_iter().map(
                        |chunk| {
                            let mp_unreach = MpUnreachNlri {
                                afi: self.afi(),
                                safi: self.safi(),
                                prefixes: chunk.collect(),
                            };
                            Message::Update(UpdateMsg {
                                mp_unreach: Some(mp_unreach),
                                ..Default::default()
                            })
                        },
                    ),
                );
            }
        }

        msgs
    }
}

impl std::fmt::Display for AfiSafi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AfiSafi::Ipv4Unicast => write!(f, "ipv4-unicast"),
            AfiSafi::Ipv4Multicast => write!(f, "ipv4-multicast"),
            AfiSafi::Ipv6Unicast => write!(f, "ipv6-unicast"),
            AfiSafi::Ipv6Multicast => write!(f, "ipv6-multicast"),
        }
    }
}
