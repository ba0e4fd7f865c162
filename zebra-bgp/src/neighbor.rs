//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU32};

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use zebra_utils::socket::{TcpConnInfo, TcpStream};
use zebra_utils::task::{IntervalTask, Task, TimeoutTask};
use zebra_utils::{Sender, UnboundedSender};

use crate::af::AfiSafi;
use crate::config::{InstanceCfg, NeighborCfg};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::packet::attribute::Attrs;
use crate::packet::consts::{
    BGP_VERSION, CeaseSubcode, ErrorCode, FsmErrorSubcode,
    OpenMessageErrorSubcode,
};
use crate::packet::message::{
    Capability, DecodeCxt, EncodeCxt, KeepaliveMsg, Message, NotificationMsg,
    OpenMsg, RouteRefreshMsg,
};
use crate::rib::Rib;
use crate::tasks;
use crate::tasks::messages::input::{NbrTimerMsg, TcpConnectMsg};
use crate::tasks::messages::output::NbrTxMsg;

// Large hold-time used during session initialization.
const LARGE_HOLDTIME: u16 = 240;

// Delay before an idle neighbor is automatically restarted.
const IDLE_HOLD_TIME: u16 = 1;

// BGP neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub remote_addr: IpAddr,
    pub config: NeighborCfg,
    pub state: fsm::State,
    pub peer_type: PeerType,
    pub conn_info: Option<TcpConnInfo>,
    pub shared_network: bool,
    pub nexthop: PeerNexthop,
    pub identifier: Option<Ipv4Addr>,
    pub holdtime_nego: Option<u16>,
    pub capabilities_adv: BTreeSet<Capability>,
    pub capabilities_rcvd: BTreeSet<Capability>,
    pub families_nego: BTreeSet<AfiSafi>,
    pub route_refresh_nego: bool,
    pub prefix_count: BTreeMap<AfiSafi, u32>,
    pub prefix_overflow: bool,
    pub announce_pending: bool,
    pub notification_sent: Option<(DateTime<Utc>, NotificationMsg)>,
    pub notification_rcvd: Option<(DateTime<Utc>, NotificationMsg)>,
    pub last_established: Option<DateTime<Utc>>,
    pub statistics: NeighborStatistics,
    pub tasks: NeighborTasks,
    pub update_queues: NeighborUpdateQueues,
    pub msg_txp: Option<UnboundedSender<NbrTxMsg>>,
}

// BGP peer type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PeerType {
    Internal,
    External,
    // External peer that belongs to the same confederation.
    Confed,
}

// Local addresses announced as next hop to a neighbor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerNexthop {
    pub v4: Ipv4Addr,
    pub v6_global: Ipv6Addr,
    pub v6_local: Option<Ipv6Addr>,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct NeighborStatistics {
    pub established_transitions: u32,
    pub msgs_rcvd: MessageStatistics,
    pub msgs_sent: MessageStatistics,
}

// Inbound and outbound message counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub total: Arc<AtomicU32>,
    pub updates: u32,
    pub notifications: u32,
    pub route_refreshes: u32,
}

// Neighbor tasks.
#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub autostart: Option<TimeoutTask>,
    pub connect: Option<Task<()>>,
    pub connect_retry: Option<TimeoutTask>,
    pub tcp_rx: Option<Task<()>>,
    pub keepalive: Option<IntervalTask>,
    pub holdtime: Option<TimeoutTask>,
}

// Neighbor Tx update queues.
#[derive(Debug, Default)]
pub struct NeighborUpdateQueues {
    pub ipv4_unicast: NeighborUpdateQueue,
    pub ipv4_multicast: NeighborUpdateQueue,
    pub ipv6_unicast: NeighborUpdateQueue,
    pub ipv6_multicast: NeighborUpdateQueue,
}

// Neighbor Tx update queue.
//
// Reachable prefixes are grouped by their outgoing attributes so that each
// group fits in as few UPDATE messages as possible.
#[derive(Debug, Default)]
pub struct NeighborUpdateQueue {
    pub reach: BTreeMap<Attrs, BTreeSet<IpNetwork>>,
    pub unreach: BTreeSet<IpNetwork>,
}

// Type of neighbor clearing requested by the operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ClearType {
    // Restart the session.
    Admin,
    // Re-send the Adj-RIB-Out.
    Soft,
    // Re-learn the routes received from the neighbor.
    SoftInbound,
}

// Type aliases.
pub type Neighbors = BTreeMap<IpAddr, Neighbor>;

// Finite State Machine.
pub mod fsm {
    use serde::{Deserialize, Serialize};
    use zebra_utils::socket::{TcpConnInfo, TcpStream};

    use crate::packet::error::DecodeError;
    use crate::packet::message::{NotificationMsg, OpenMsg};

    // FSM states.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        Idle,
        Connect,
        Active,
        OpenSent,
        OpenConfirm,
        Established,
    }

    // FSM events.
    //
    // The RFC 4271 FSM events are listed above each event.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart
        // ManualStart_with_PassiveTcpEstablishment
        Start,
        // ManualStop
        Stop(Option<NotificationMsg>),
        // Tcp_CR_Acked
        // TcpConnectionConfirmed
        Connected(TcpStream, TcpConnInfo),
        // TcpConnectionFails
        ConnFail,
        // BGPHeaderErr
        // BGPOpenMsgErr
        // UpdateMsgErr
        RcvdError(DecodeError),
        // BGPOpen
        RcvdOpen(OpenMsg),
        // NotifMsg
        RcvdNotif(NotificationMsg),
        // KeepAliveMsg
        RcvdKalive,
        // UpdateMsg
        RcvdUpdate,
        // ConnectRetryTimer_Expires
        // HoldTimer_Expires
        // AutomaticStart
        Timer(Timer),
    }

    // BGP timers.
    //
    // Note: KEEPALIVE messages are sent independently, separate from the FSM.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Hold,
        AutoStart,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    // Creates a new neighbor in the Idle state.
    pub fn new(
        config: NeighborCfg,
        instance_cfg: &InstanceCfg,
    ) -> Neighbor {
        let peer_type = PeerType::new(instance_cfg, config.remote_as);
        Neighbor {
            remote_addr: config.address,
            config,
            state: fsm::State::Idle,
            peer_type,
            conn_info: None,
            shared_network: false,
            nexthop: PeerNexthop::new(instance_cfg.router_id),
            identifier: None,
            holdtime_nego: None,
            capabilities_adv: Default::default(),
            capabilities_rcvd: Default::default(),
            families_nego: Default::default(),
            route_refresh_nego: false,
            prefix_count: Default::default(),
            prefix_overflow: false,
            announce_pending: false,
            notification_sent: None,
            notification_rcvd: None,
            last_established: None,
            statistics: Default::default(),
            tasks: Default::default(),
            update_queues: Default::default(),
            msg_txp: None,
        }
    }

    // Injects an event into the neighbor's FSM.
    pub(crate) fn fsm_event(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        event: fsm::Event,
    ) {
        Debug::NbrFsmEvent(&self.remote_addr, &event).log();

        // Process FSM event.
        let rib = &mut instance.state.rib;
        let next_state = match self.state {
            // Idle state
            fsm::State::Idle => match event {
                fsm::Event::Start
                | fsm::Event::Timer(fsm::Timer::AutoStart) => {
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    if self.config.passive {
                        Some(fsm::State::Active)
                    } else {
                        self.connect(&instance.tx.protocol_input.tcp_connect);
                        Some(fsm::State::Connect)
                    }
                }
                _ => None,
            },
            // Connect state
            fsm::State::Connect => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(_) => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connect_retry_stop();
                    self.connection_setup(stream, conn_info, instance);
                    self.open_send(instance.config);
                    self.holdtime_start(
                        LARGE_HOLDTIME,
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect(&instance.tx.protocol_input.tcp_connect);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    None
                }
                _ => {
                    // FSM error.
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
            },
            // Active state
            fsm::State::Active => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(_) => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connect_retry_stop();
                    self.connection_setup(stream, conn_info, instance);
                    self.open_send(instance.config);
                    self.holdtime_start(
                        LARGE_HOLDTIME,
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    if self.config.passive {
                        self.connect_retry_start(
                            &instance.tx.protocol_input.nbr_timer,
                        );
                        None
                    } else {
                        self.connect(&instance.tx.protocol_input.tcp_connect);
                        self.connect_retry_start(
                            &instance.tx.protocol_input.nbr_timer,
                        );
                        Some(fsm::State::Connect)
                    }
                }
                _ => {
                    // FSM error.
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
            },
            // OpenSent state
            fsm::State::OpenSent => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, None);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::Active)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(msg) => {
                    let next_state = self.open_process(instance, msg);
                    Some(next_state)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let error_code = ErrorCode::HoldTimerExpired;
                    let error_subcode = 0;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                _ => {
                    // FSM error.
                    let error_code = ErrorCode::FiniteStateMachineError;
                    let error_subcode =
                        FsmErrorSubcode::UnexpectedMessageInOpenSent;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // OpenConfirm state
            fsm::State::OpenConfirm => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtime_restart();
                    Some(fsm::State::Established)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let error_code = ErrorCode::HoldTimerExpired;
                    let error_subcode = 0;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                _ => {
                    // FSM error.
                    let error_code = ErrorCode::FiniteStateMachineError;
                    let error_subcode =
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // Established state
            fsm::State::Established => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(rib, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive | fsm::Event::RcvdUpdate => {
                    self.holdtime_restart();
                    None
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let error_code = ErrorCode::HoldTimerExpired;
                    let error_subcode = 0;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
                _ => {
                    // FSM error.
                    let error_code = ErrorCode::FiniteStateMachineError;
                    let error_subcode =
                        FsmErrorSubcode::UnexpectedMessageInEstablished;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(rib, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
        };

        // Change to next FSM state when applicable.
        if let Some(next_state) = next_state
            && self.state != next_state
        {
            // Schedule auto-start unless the peer has been manually disabled
            // or exceeded its maximum prefix count.
            if next_state == fsm::State::Idle
                && !self.config.shutdown
                && !self.prefix_overflow
            {
                self.autostart_start(&instance.tx.protocol_input.nbr_timer);
            } else {
                self.autostart_stop();
            }

            self.fsm_state_change(next_state);
        }
    }

    // Updates the neighbor's FSM state.
    fn fsm_state_change(&mut self, next_state: fsm::State) {
        Debug::NbrFsmTransition(&self.remote_addr, &self.state, &next_state)
            .log();

        // Keep track of the time that the BGP session last transitioned in or
        // out of the Established state.
        if self.state == fsm::State::Established
            || next_state == fsm::State::Established
        {
            self.last_established = Some(Utc::now());
        }

        if next_state == fsm::State::Established {
            // Update statistics.
            self.statistics.established_transitions += 1;

            // The routing table is sent once the event is fully processed.
            self.announce_pending = true;
        }

        self.state = next_state;
    }

    // Sets up the connection for the BGP neighbor, spawning necessary tasks for
    // TCP communication.
    fn connection_setup(
        &mut self,
        stream: TcpStream,
        conn_info: TcpConnInfo,
        instance: &InstanceUpView<'_>,
    ) {
        let config = instance.config;

        // Compute the next hops announced to this neighbor.
        self.nexthop = PeerNexthop::from_conn_info(&conn_info, config);
        self.shared_network = match conn_info.remote_addr {
            IpAddr::V4(_) => false,
            IpAddr::V6(addr) => addr.is_unicast_link_local(),
        };

        // Store TCP connection information.
        self.conn_info = Some(conn_info);

        // Split TCP stream into two halves.
        let (read_half, write_half) = stream.into_split();

        // Spawn neighbor TCP Tx task.
        let cxt = EncodeCxt {
            peer_type: self.peer_type,
            local_as: config.local_as,
            confed_id: config.confederation_id,
            transparent_as: self.config.transparent_as,
            rs_client: self.config.route_server_client,
            send_community: self.config.send_community,
            send_ext_community: self.config.send_ext_community,
            reflector: config.reflector(),
            router_id: config.router_id,
            cluster_id: config.cluster_id(),
        };
        let msg_txp = tasks::nbr_tx(
            self,
            cxt,
            write_half,
            #[cfg(feature = "testing")]
            &instance.tx.protocol_output,
        );
        self.msg_txp = Some(msg_txp);

        // Spawn neighbor TCP Rx task.
        let cxt = DecodeCxt {
            peer_type: self.peer_type,
            local_as: config.local_as,
            confed_id: config.confederation_id,
        };
        let tcp_rx_task = tasks::nbr_rx(
            self,
            cxt,
            read_half,
            &instance.tx.protocol_input.nbr_msg_rx,
        );
        self.tasks.tcp_rx = Some(tcp_rx_task);
    }

    // Closes the BGP session, performing necessary cleanup and releasing
    // resources.
    //
    // Routes learned from the neighbor are removed from the RIB. The affected
    // prefixes are reprocessed once the current event is fully handled.
    fn session_close(
        &mut self,
        rib: &mut Rib,
        send_notif: Option<NotificationMsg>,
    ) {
        // Send a notification message.
        if self.state >= fsm::State::OpenSent
            && let Some(msg) = send_notif
        {
            self.message_send(Message::Notification(msg));
        }

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Release all resources.
        rib.clear_peer(self);
        self.conn_info = None;
        self.shared_network = false;
        self.identifier = None;
        self.holdtime_nego = None;
        self.capabilities_adv.clear();
        self.capabilities_rcvd.clear();
        self.families_nego.clear();
        self.route_refresh_nego = false;
        self.announce_pending = false;
        self.tasks = Default::default();
        self.update_queues = Default::default();
        self.msg_txp = None;
    }

    // Enqueues a single BGP message for transmission.
    pub(crate) fn message_send(&mut self, msg: Message) {
        Debug::NbrMsgTx(&self.remote_addr, &msg).log();

        // Update statistics.
        self.statistics.msgs_sent.update(&msg);

        // Keep track of the last sent notification.
        if let Message::Notification(msg) = &msg {
            self.notification_sent = Some((Utc::now(), msg.clone()));
        }

        // Ignore any possible error as the connection might have gone down
        // already.
        if let Some(msg_txp) = &self.msg_txp {
            let nbr_addr = self.remote_addr;
            let msg = NbrTxMsg::SendMessage { nbr_addr, msg };
            let _ = msg_txp.send(msg);
        }
    }

    // Enqueues a list of BGP messages for transmission.
    //
    // This method is more efficient for handling a large number of messages,
    // as they are sent all at once.
    pub(crate) fn message_list_send(&mut self, msg_list: Vec<Message>) {
        for msg in &msg_list {
            Debug::NbrMsgTx(&self.remote_addr, msg).log();

            // Update statistics.
            self.statistics.msgs_sent.update(msg);
        }

        // Ignore any possible error as the connection might have gone down
        // already.
        if let Some(msg_txp) = &self.msg_txp {
            let nbr_addr = self.remote_addr;
            let msg = NbrTxMsg::SendMessageList { nbr_addr, msg_list };
            let _ = msg_txp.send(msg);
        }
    }

    // Sends a BGP OPEN message based on the local configuration.
    fn open_send(&mut self, instance_cfg: &InstanceCfg) {
        // Base capabilities.
        let mut capabilities: BTreeSet<_> =
            [Capability::RouteRefresh, Capability::RouteRefreshOld].into();

        // Multiprotocol capabilities.
        for afi_safi in &self.config.afi_safi {
            capabilities.insert(Capability::MultiProtocol {
                afi: afi_safi.afi(),
                safi: afi_safi.safi(),
            });
        }

        // Keep track of the advertised capabilities.
        self.capabilities_adv.clone_from(&capabilities);

        // Fill-in and send message.
        let msg = Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: instance_cfg.local_as,
            holdtime: self.config.holdtime,
            identifier: instance_cfg.router_id,
            capabilities,
        });
        self.message_send(msg);
    }

    // Processes the received OPEN message while in the OpenSent state.
    fn open_process(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        msg: OpenMsg,
    ) -> fsm::State {
        use OpenMessageErrorSubcode as ErrorSubcode;

        // Validate the received message.
        if let Err(error) = self.open_validate(instance.config, &msg) {
            error.log();

            // Close the session.
            let error_subcode = match error {
                Error::NbrBadAs(..) => ErrorSubcode::BadPeerAs,
                Error::NbrBadIdentifier(..) => ErrorSubcode::BadBgpIdentifier,
                Error::NbrBadHoldtime(..) => ErrorSubcode::UnacceptableHoldTime,
                _ => ErrorSubcode::Unspecific,
            };
            let error_code = ErrorCode::OpenMessageError;
            let msg = NotificationMsg::new(error_code, error_subcode);
            self.session_close(&mut instance.state.rib, Some(msg));

            // Transition to the Idle state.
            return fsm::State::Idle;
        }

        // Calculate negotiated hold-time.
        let holdtime_nego = std::cmp::min(msg.holdtime, self.config.holdtime);

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Send Keepalive message.
        self.message_send(Message::Keepalive(KeepaliveMsg {}));

        // Start Keepalive interval and session hold timer.
        if holdtime_nego != 0 {
            self.keepalive_interval_start(holdtime_nego);
            self.holdtime_start(
                holdtime_nego,
                &instance.tx.protocol_input.nbr_timer,
            );
        } else {
            self.holdtime_stop();
        }

        // Keep track of the received data.
        self.identifier = Some(msg.identifier);
        self.holdtime_nego = (holdtime_nego != 0).then_some(holdtime_nego);
        self.capabilities_rcvd = msg.capabilities;
        self.families_nego = self.negotiated_families();
        self.route_refresh_nego =
            self.capabilities_rcvd.iter().any(|cap| {
                matches!(
                    cap,
                    Capability::RouteRefresh | Capability::RouteRefreshOld
                )
            });

        // Transition to the OpenConfirm state.
        fsm::State::OpenConfirm
    }

    // Performs semantic validation of the received BGP OPEN message.
    // Syntactic errors (version, hold-time of 1 or 2 seconds) are detected
    // during the decoding phase.
    fn open_validate(
        &self,
        instance_cfg: &InstanceCfg,
        msg: &OpenMsg,
    ) -> Result<(), Error> {
        // Validate ASN.
        if self.config.remote_as != msg.my_as {
            return Err(Error::NbrBadAs(
                self.remote_addr,
                msg.my_as,
                self.config.remote_as,
            ));
        }

        // Validate BGP identifier.
        if msg.identifier.is_unspecified()
            || msg.identifier == instance_cfg.router_id
        {
            return Err(Error::NbrBadIdentifier(
                self.remote_addr,
                msg.identifier,
            ));
        }

        // Validate hold-time.
        if msg.holdtime == 1 || msg.holdtime == 2 {
            return Err(Error::NbrBadHoldtime(self.remote_addr, msg.holdtime));
        }

        Ok(())
    }

    // Computes the address families enabled for the session.
    //
    // A peer that doesn't advertise any multiprotocol capability supports
    // IPv4 unicast only.
    fn negotiated_families(&self) -> BTreeSet<AfiSafi> {
        let mut remote = self
            .capabilities_rcvd
            .iter()
            .filter_map(|cap| match cap {
                Capability::MultiProtocol { afi, safi } => {
                    AfiSafi::from_afi_safi(*afi, *safi)
                }
                _ => None,
            })
            .collect::<BTreeSet<_>>();
        if remote.is_empty() {
            remote.insert(AfiSafi::Ipv4Unicast);
        }
        self.config
            .afi_safi
            .intersection(&remote)
            .copied()
            .collect()
    }

    // Starts the auto-start timer.
    fn autostart_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::AutoStart,
            IDLE_HOLD_TIME,
            nbr_timerp,
        );
        self.tasks.autostart = Some(task);
    }

    // Stops the auto-start timer.
    fn autostart_stop(&mut self) {
        self.tasks.autostart = None;
    }

    // Starts a TCP connection task to the neighbor's remote address.
    fn connect(&mut self, tcp_connectp: &Sender<TcpConnectMsg>) {
        let task = tasks::tcp_connect(self, tcp_connectp);
        self.tasks.connect = Some(task);
    }

    // Starts the Keepalive Tx interval.
    fn keepalive_interval_start(&mut self, holdtime_nego: u16) {
        let interval = self.config.keepalive.unwrap_or(holdtime_nego / 3);
        if let Some(task) = tasks::nbr_kalive_interval(self, interval) {
            self.tasks.keepalive = Some(task);
        }
    }

    // Starts the session hold timer.
    fn holdtime_start(
        &mut self,
        seconds: u16,
        nbr_timerp: &Sender<NbrTimerMsg>,
    ) {
        let task =
            tasks::nbr_timer(self, fsm::Timer::Hold, seconds, nbr_timerp);
        self.tasks.holdtime = Some(task);
    }

    // Restarts the session hold timer if the negotiated HoldTime value is
    // non-zero.
    fn holdtime_restart(&mut self) {
        if let Some(holdtime) = self.tasks.holdtime.as_mut() {
            holdtime.reset(None);
        }
    }

    // Stops the session hold timer.
    fn holdtime_stop(&mut self) {
        self.tasks.holdtime = None;
    }

    // Starts the connect retry timer.
    fn connect_retry_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::ConnectRetry,
            self.config.connect_retry,
            nbr_timerp,
        );
        self.tasks.connect_retry = Some(task);
    }

    // Stops the connect retry timer.
    fn connect_retry_stop(&mut self) {
        self.tasks.connect_retry = None;
    }

    // Re-queues the current Adj-RIB-Out for transmission.
    pub(crate) fn resend_adj_rib_out(&mut self, rib: &Rib) {
        for afi_safi in self.families_nego.clone() {
            let table = rib.tables.get(afi_safi);
            let queue = self.update_queues.get_mut(afi_safi);
            for (prefix, dest) in &table.prefixes {
                if let Some(attrs) = dest
                    .adj_rib
                    .get(&self.remote_addr)
                    .and_then(|adj_rib| adj_rib.out.as_ref())
                {
                    queue.reach_add(*prefix, attrs.value.get());
                }
            }
        }
    }

    // Asks the neighbor to re-send its routes for every negotiated address
    // family.
    pub(crate) fn route_refresh_send(&mut self) {
        for afi_safi in self.families_nego.clone() {
            let msg = RouteRefreshMsg {
                afi: afi_safi.afi().to_u16().unwrap_or_default(),
                safi: afi_safi.safi().to_u8().unwrap_or_default(),
            };
            self.message_send(Message::RouteRefresh(msg));
        }
    }

    // Sends the pending routing updates.
    pub(crate) fn update_queues_flush(&mut self) {
        let mut msg_list = vec![];
        for afi_safi in AfiSafi::all() {
            let queue = self.update_queues.get_mut(afi_safi);
            if queue.is_empty() {
                continue;
            }
            msg_list.extend(afi_safi.build_updates(queue));
        }
        if !msg_list.is_empty() {
            self.message_list_send(msg_list);
        }
    }

    // Stops the session after the maximum prefix count was exceeded.
    //
    // The neighbor stays down until it's cleared administratively.
    pub(crate) fn max_prefix_overflow(
        &mut self,
        instance: &mut InstanceUpView<'_>,
    ) {
        self.prefix_overflow = true;
        let msg = NotificationMsg::new(
            ErrorCode::Cease,
            CeaseSubcode::MaximumNumberofPrefixesReached,
        );
        self.fsm_event(instance, fsm::Event::Stop(Some(msg)));
    }

    // Restarts the neighbor session.
    pub(crate) fn clear_admin(&mut self, instance: &mut InstanceUpView<'_>) {
        self.prefix_overflow = false;
        if self.state == fsm::State::Idle {
            if !self.config.shutdown {
                self.fsm_event(instance, fsm::Event::Start);
            }
        } else {
            let msg = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::AdministrativeReset,
            );
            self.fsm_event(instance, fsm::Event::Stop(Some(msg)));
        }
    }
}

// ===== impl PeerType =====

impl PeerType {
    // Classifies a peer based on its AS number.
    pub fn new(instance_cfg: &InstanceCfg, remote_as: u16) -> PeerType {
        if remote_as == instance_cfg.local_as {
            PeerType::Internal
        } else if instance_cfg.confederation_peers.contains(&remote_as) {
            PeerType::Confed
        } else {
            PeerType::External
        }
    }
}

// ===== impl PeerNexthop =====

impl PeerNexthop {
    fn new(router_id: Ipv4Addr) -> PeerNexthop {
        PeerNexthop {
            v4: router_id,
            v6_global: Ipv6Addr::UNSPECIFIED,
            v6_local: None,
        }
    }

    // Derives the announced next hops from the local end of the TCP
    // connection.
    fn from_conn_info(
        conn_info: &TcpConnInfo,
        instance_cfg: &InstanceCfg,
    ) -> PeerNexthop {
        let mut nexthop = PeerNexthop::new(instance_cfg.router_id);
        match conn_info.local_addr {
            IpAddr::V4(addr) => {
                nexthop.v4 = addr;
                nexthop.v6_global = addr.to_ipv6_mapped();
            }
            IpAddr::V6(addr) if addr.is_unicast_link_local() => {
                nexthop.v6_local = Some(addr);
            }
            IpAddr::V6(addr) => {
                nexthop.v6_global = addr;
            }
        }
        nexthop
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, msg: &Message) {
        self.total.fetch_add(1, atomic::Ordering::Relaxed);
        match msg {
            Message::Update(_) => {
                self.updates += 1;
            }
            Message::Notification(_) => {
                self.notifications += 1;
            }
            Message::RouteRefresh(_) => {
                self.route_refreshes += 1;
            }
            _ => {}
        }
    }
}

// ===== impl NeighborUpdateQueues =====

impl NeighborUpdateQueues {
    pub fn get(&self, afi_safi: AfiSafi) -> &NeighborUpdateQueue {
        match afi_safi {
            AfiSafi::Ipv4Unicast => &self.ipv4_unicast,
            AfiSafi::Ipv4Multicast => &self.ipv4_multicast,
            AfiSafi::Ipv6Unicast => &self.ipv6_unicast,
            AfiSafi::Ipv6Multicast => &self.ipv6_multicast,
        }
    }

    pub fn get_mut(&mut self, afi_safi: AfiSafi) -> &mut NeighborUpdateQueue {
        match afi_safi {
            AfiSafi::Ipv4Unicast => &mut self.ipv4_unicast,
            AfiSafi::Ipv4Multicast => &mut self.ipv4_multicast,
            AfiSafi::Ipv6Unicast => &mut self.ipv6_unicast,
            AfiSafi::Ipv6Multicast => &mut self.ipv6_multicast,
        }
    }
}

// ===== impl NeighborUpdateQueue =====

impl NeighborUpdateQueue {
    // Queues a prefix for announcement, replacing any pending announcement or
    // withdrawal of the same prefix.
    pub fn reach_add(&mut self, prefix: IpNetwork, attrs: Attrs) {
        self.remove(&prefix);
        self.reach.entry(attrs).or_default().insert(prefix);
    }

    // Queues a prefix for withdrawal, replacing any pending announcement of
    // the same prefix.
    pub fn unreach_add(&mut self, prefix: IpNetwork) {
        self.remove(&prefix);
        self.unreach.insert(prefix);
    }

    pub fn is_empty(&self) -> bool {
        self.reach.is_empty() && self.unreach.is_empty()
    }

    fn remove(&mut self, prefix: &IpNetwork) {
        self.unreach.remove(prefix);
        self.reach.retain(|_, prefixes| {
            prefixes.remove(prefix);
            !prefixes.is_empty()
        });
    }
}

// ===== unit tests =====
