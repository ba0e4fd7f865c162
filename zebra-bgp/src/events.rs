//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::Utc;
use ipnetwork::IpNetwork;
use num_traits::FromPrimitive;
use zebra_utils::socket::{TcpConnInfo, TcpStream};
use zebra_utils::southbound::RedistributeMsg;

use crate::af::AfiSafi;
use crate::debug::Debug;
use crate::error::{Error, NbrRxError};
use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbors, fsm};
use crate::packet::attribute::MpNexthop;
use crate::packet::consts::{
    Afi, ErrorCode, FsmErrorSubcode, MessageHeaderErrorSubcode, Safi,
};
use crate::packet::message::{
    Message, NotificationMsg, RouteRefreshMsg, UpdateMsg,
};
use crate::rib::{Rib, RibCxt};

// ===== TCP connection request =====

pub(crate) fn process_tcp_accept(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };

    // Connection collisions aren't resolved: the existing connection wins.
    if nbr.conn_info.is_some() {
        return Ok(());
    }

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info));

    Ok(())
}

// ===== TCP connection established =====

pub(crate) fn process_tcp_connect(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };
    nbr.tasks.connect = None;

    // Connection collisions aren't resolved: the existing connection wins.
    if nbr.conn_info.is_some() {
        return Ok(());
    }

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info));

    Ok(())
}

// ===== neighbor message receipt =====

pub(crate) fn process_nbr_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    msg: Result<Message, NbrRxError>,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Process received message.
    match msg {
        Ok(msg) => {
            Debug::NbrMsgRx(&nbr.remote_addr, &msg).log();

            // Update statistics.
            nbr.statistics.msgs_rcvd.update(&msg);

            match msg {
                Message::Open(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdOpen(msg));
                }
                Message::Update(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdUpdate);
                    if nbr.state == fsm::State::Established {
                        process_nbr_update(instance, neighbors, nbr_addr, msg)?;
                    }
                }
                Message::Notification(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdNotif(msg.clone()));
                    // Keep track of the last received notification.
                    nbr.notification_rcvd = Some((Utc::now(), msg));
                }
                Message::Keepalive(_) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdKalive);
                }
                Message::RouteRefresh(msg) => {
                    process_nbr_route_refresh(
                        instance, neighbors, nbr_addr, msg,
                    )?;
                }
            }
        }
        Err(error) => match error {
            NbrRxError::TcpConnClosed => {
                nbr.fsm_event(instance, fsm::Event::ConnFail);
            }
            NbrRxError::MsgDecodeError(error) => {
                nbr.fsm_event(instance, fsm::Event::RcvdError(error));
            }
        },
    }

    Ok(())
}

fn process_nbr_update(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    msg: UpdateMsg,
) -> Result<(), Error> {
    let Some(nbr) = neighbors.get(&nbr_addr) else {
        return Ok(());
    };
    let families = nbr.families_nego.clone();

    let mut cxt = RibCxt {
        config: instance.config,
        policy: instance.policy,
        neighbors,
        sink: &mut *instance.sink,
    };
    let rib = &mut instance.state.rib;
    match nbr_update_apply(rib, &mut cxt, nbr_addr, &families, msg) {
        Err(error @ Error::NbrMaxPrefixExceeded(..)) => {
            error.log();
            if let Some(nbr) = neighbors.get_mut(&nbr_addr) {
                nbr.max_prefix_overflow(instance);
            }
            Ok(())
        }
        result => result,
    }
}

// Applies the NLRI carried by an UPDATE message to the RIB.
//
// Withdrawn routes are processed before the reachable ones, and only the
// address families negotiated for the session are taken into account.
fn nbr_update_apply(
    rib: &mut Rib,
    cxt: &mut RibCxt<'_>,
    nbr_addr: IpAddr,
    families: &BTreeSet<AfiSafi>,
    msg: UpdateMsg,
) -> Result<(), Error> {
    let ipv4_unicast = families.contains(&AfiSafi::Ipv4Unicast);

    // Process IPv4 unreachable NLRIs.
    if let Some(unreach) = msg.unreach
        && ipv4_unicast
    {
        for prefix in unreach.prefixes {
            let prefix = IpNetwork::V4(prefix);
            rib.withdraw(cxt, nbr_addr, AfiSafi::Ipv4Unicast, prefix);
        }
    }

    // Process IPv4 reachable NLRIs.
    //
    // Use nexthop from the NEXT_HOP attribute.
    if let Some(reach) = msg.reach
        && ipv4_unicast
    {
        for prefix in reach.prefixes {
            let prefix = IpNetwork::V4(prefix);
            match &msg.attrs {
                Some(attrs) => {
                    let mut attrs = attrs.clone();
                    attrs.base.nexthop = Some(reach.nexthop);
                    rib.update(
                        cxt,
                        nbr_addr,
                        AfiSafi::Ipv4Unicast,
                        prefix,
                        attrs,
                    )?;
                }
                // Treat as withdraw.
                None => {
                    rib.withdraw(cxt, nbr_addr, AfiSafi::Ipv4Unicast, prefix);
                }
            }
        }
    }

    // Process multiprotocol reachable NLRIs.
    //
    // Use nexthop(s) from the MP_REACH_NLRI attribute.
    if let Some(mp_reach) = msg.mp_reach
        && let Some(afi_safi) =
            AfiSafi::from_afi_safi(mp_reach.afi, mp_reach.safi)
        && families.contains(&afi_safi)
    {
        for prefix in mp_reach.prefixes {
            match &msg.attrs {
                Some(attrs) => {
                    let mut attrs = attrs.clone();
                    attrs.base.mp_nexthop = Some(mp_reach.nexthop);
                    if let MpNexthop::Ipv4(addr) = mp_reach.nexthop {
                        attrs.base.nexthop = Some(addr);
                    }
                    rib.update(cxt, nbr_addr, afi_safi, prefix, attrs)?;
                }
                // Treat as withdraw.
                None => {
                    rib.withdraw(cxt, nbr_addr, afi_safi, prefix);
                }
            }
        }
    }

    // Process multiprotocol unreachable NLRIs.
    if let Some(mp_unreach) = msg.mp_unreach
        && let Some(afi_safi) =
            AfiSafi::from_afi_safi(mp_unreach.afi, mp_unreach.safi)
        && families.contains(&afi_safi)
    {
        for prefix in mp_unreach.prefixes {
            rib.withdraw(cxt, nbr_addr, afi_safi, prefix);
        }
    }

    Ok(())
}

fn process_nbr_route_refresh(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    msg: RouteRefreshMsg,
) -> Result<(), Error> {
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // The message type is unknown to a peer that didn't negotiate the
    // capability.
    if !nbr.route_refresh_nego {
        let msg = NotificationMsg::new(
            ErrorCode::MessageHeaderError,
            MessageHeaderErrorSubcode::BadMessageType,
        );
        nbr.fsm_event(instance, fsm::Event::Stop(Some(msg)));
        return Err(Error::NbrRouteRefreshUnsupported(nbr_addr));
    }

    // ROUTE-REFRESH is only valid in the Established state.
    if nbr.state != fsm::State::Established {
        let error_subcode = match nbr.state {
            fsm::State::OpenSent => FsmErrorSubcode::UnexpectedMessageInOpenSent,
            fsm::State::OpenConfirm => {
                FsmErrorSubcode::UnexpectedMessageInOpenConfirm
            }
            _ => FsmErrorSubcode::UnexpectedMessage,
        };
        let msg = NotificationMsg::new(
            ErrorCode::FiniteStateMachineError,
            error_subcode,
        );
        nbr.fsm_event(instance, fsm::Event::Stop(Some(msg)));
        return Ok(());
    }

    // Unknown or non-negotiated address families are ignored.
    let Some(afi) = Afi::from_u16(msg.afi) else {
        return Ok(());
    };
    let Some(safi) = Safi::from_u8(msg.safi) else {
        return Ok(());
    };
    let Some(afi_safi) = AfiSafi::from_afi_safi(afi, safi) else {
        return Ok(());
    };
    if !nbr.families_nego.contains(&afi_safi) {
        return Ok(());
    }

    // Send the full routing table again.
    Debug::NbrRouteRefresh(&nbr_addr, afi_safi).log();
    let mut cxt = RibCxt {
        config: instance.config,
        policy: instance.policy,
        neighbors,
        sink: &mut *instance.sink,
    };
    instance
        .state
        .rib
        .announce_table(&mut cxt, nbr_addr, afi_safi);

    Ok(())
}

// ===== neighbor expired timeout =====

pub(crate) fn process_nbr_timer(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    timer: fsm::Timer,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Timer(timer));

    Ok(())
}

// ===== redistributed routes =====

pub(crate) fn process_redistribute(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: RedistributeMsg,
) {
    Debug::RedistributeRx(&msg).log();

    let mut cxt = RibCxt {
        config: instance.config,
        policy: instance.policy,
        neighbors,
        sink: &mut *instance.sink,
    };
    let rib = &mut instance.state.rib;
    match msg {
        RedistributeMsg::Add {
            prefix,
            nexthop,
            route_type,
        } => {
            rib.redistribute_add(&mut cxt, prefix, nexthop, route_type);
        }
        RedistributeMsg::Delete { prefix, route_type } => {
            rib.redistribute_delete(&mut cxt, prefix, route_type);
        }
    }
}
