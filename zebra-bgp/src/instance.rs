//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::sync::mpsc;
use zebra_utils::ip::AddressFamily;
use zebra_utils::socket::TcpListener;
use zebra_utils::southbound::{RedistributeMsg, RouteSink};
use zebra_utils::task::Task;
use zebra_utils::{Receiver, Sender, UnboundedReceiver};
#[cfg(feature = "testing")]
use zebra_utils::UnboundedSender;

use crate::debug::{Debug, InstanceInactiveReason};
use crate::error::{Error, IoError};
use crate::neighbor::{ClearType, Neighbor, Neighbors, fsm};
use crate::packet::consts::{CeaseSubcode, ErrorCode};
use crate::packet::message::NotificationMsg;
use crate::policy::PolicyCfg;
use crate::rib::{Rib, RibCxt};
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    NbrRxMsg, NbrTimerMsg, TcpAcceptMsg, TcpConnectMsg,
};
#[cfg(feature = "testing")]
use crate::tasks::messages::output::NbrTxMsg;
use crate::{config, events, network, tasks};

pub struct Instance {
    // Instance configuration data.
    pub config: config::InstanceCfg,
    // Routing policy definitions.
    pub policy: PolicyCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance neighbors.
    pub neighbors: Neighbors,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
    // Consumer of route installation requests.
    pub sink: Box<dyn RouteSink + Send>,
}

#[derive(Debug)]
pub struct InstanceState {
    // Instance Router ID.
    pub router_id: Ipv4Addr,
    // TCP listening socket.
    pub listener: TcpListenerTask,
    // BGP RIB.
    pub rib: Rib,
}

#[derive(Debug)]
pub struct TcpListenerTask {
    pub af: AddressFamily,
    pub socket: Arc<TcpListener>,
    _task: Task<()>,
}

#[derive(Clone, Debug)]
pub struct InstanceChannelsTx {
    pub protocol_input: ProtocolInputChannelsTx,
    // Messages sent to neighbors, captured for inspection.
    #[cfg(feature = "testing")]
    pub protocol_output: UnboundedSender<NbrTxMsg>,
}

#[derive(Debug)]
pub struct InstanceChannelsRx {
    pub protocol_input: ProtocolInputChannelsRx,
    #[cfg(feature = "testing")]
    pub protocol_output: UnboundedReceiver<NbrTxMsg>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // TCP accept event.
    pub tcp_accept: Sender<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Sender<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Sender<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Sender<NbrTimerMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    // TCP accept event.
    pub tcp_accept: Receiver<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Receiver<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Receiver<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Receiver<NbrTimerMsg>,
}

pub struct InstanceUpView<'a> {
    pub config: &'a config::InstanceCfg,
    pub policy: &'a PolicyCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx,
    pub sink: &'a mut dyn RouteSink,
}

// ===== impl Instance =====

impl Instance {
    // Creates a new BGP instance along with the receiving end of its
    // channels.
    //
    // The instance remains inactive until `update` is called.
    pub fn new(
        config: config::InstanceCfg,
        policy: PolicyCfg,
        sink: Box<dyn RouteSink + Send>,
    ) -> (Instance, InstanceChannelsRx) {
        let (protocol_input_tx, protocol_input_rx) = protocol_input_channels();
        #[cfg(feature = "testing")]
        let (protocol_output_tx, protocol_output_rx) =
            mpsc::unbounded_channel();

        let neighbors = config
            .neighbors
            .iter()
            .map(|nbr_cfg| {
                let nbr = Neighbor::new(nbr_cfg.clone(), &config);
                (nbr.remote_addr, nbr)
            })
            .collect();

        let instance = Instance {
            config,
            policy,
            state: None,
            neighbors,
            tx: InstanceChannelsTx {
                protocol_input: protocol_input_tx,
                #[cfg(feature = "testing")]
                protocol_output: protocol_output_tx,
            },
            sink,
        };
        let rx = InstanceChannelsRx {
            protocol_input: protocol_input_rx,
            #[cfg(feature = "testing")]
            protocol_output: protocol_output_rx,
        };

        (instance, rx)
    }

    // Checks if the instance needs to be started or stopped.
    pub fn update(&mut self) {
        match self.is_ready() {
            Ok(()) if !self.is_active() => {
                self.start();
            }
            Err(reason) if self.is_active() => {
                self.stop(reason);
            }
            _ => (),
        }
    }

    // Starts the BGP instance.
    fn start(&mut self) {
        Debug::InstanceStart.log();

        let router_id = self.config.router_id;
        match InstanceState::new(router_id, self.config.listen_port, &self.tx)
        {
            Ok(state) => {
                // Store instance initial state.
                self.state = Some(state);
            }
            Err(error) => {
                Error::InstanceStartError(Box::new(error)).log();
                return;
            }
        }

        let Some((mut instance, neighbors)) = self.as_up() else {
            return;
        };

        // Originate the configured networks and aggregates.
        let mut cxt = RibCxt {
            config: instance.config,
            policy: instance.policy,
            neighbors,
            sink: &mut *instance.sink,
        };
        let rib = &mut instance.state.rib;
        for aggregate in &instance.config.aggregates {
            rib.aggregate_add(
                &mut cxt,
                aggregate.afi_safi(),
                aggregate.prefix,
                aggregate.summary_only,
                aggregate.as_set,
            );
        }
        for network in &instance.config.networks {
            rib.static_add(
                &mut cxt,
                network.afi_safi(),
                network.prefix,
                network.route_map.as_deref(),
            );
        }

        // Start neighbors.
        for nbr in neighbors.values_mut() {
            if !nbr.config.shutdown {
                nbr.fsm_event(&mut instance, fsm::Event::Start);
            }
        }

        routes_flush(&mut instance, neighbors);
    }

    // Stops the BGP instance.
    fn stop(&mut self, reason: InstanceInactiveReason) {
        let Some((mut instance, neighbors)) = self.as_up() else {
            return;
        };

        Debug::InstanceStop(reason).log();

        // Withdraw installed routes.
        instance.state.rib.terminate(instance.sink);

        // Stop neighbors.
        let error_code = ErrorCode::Cease;
        let error_subcode = CeaseSubcode::AdministrativeShutdown;
        for nbr in neighbors.values_mut() {
            let msg = NotificationMsg::new(error_code, error_subcode);
            nbr.fsm_event(&mut instance, fsm::Event::Stop(Some(msg)));
            nbr.tasks = Default::default();
        }

        // Clear instance state.
        self.state = None;
    }

    // Stops the instance before it's dropped.
    pub fn shutdown(mut self) {
        self.stop(InstanceInactiveReason::AdminDown);
    }

    // Returns whether the BGP instance is operational.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    // Returns whether the instance is ready for BGP operation.
    fn is_ready(&self) -> Result<(), InstanceInactiveReason> {
        if self.config.router_id.is_unspecified() {
            return Err(InstanceInactiveReason::MissingRouterId);
        }
        if self.config.local_as == 0 {
            return Err(InstanceInactiveReason::MissingLocalAs);
        }

        Ok(())
    }

    // Returns a view struct for the instance if it is operational.
    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut Neighbors)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                config: &self.config,
                policy: &self.policy,
                state,
                tx: &self.tx,
                sink: &mut *self.sink,
            };
            Some((instance, &mut self.neighbors))
        } else {
            None
        }
    }

    // Processes a message sent by one of the instance's child tasks.
    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        // Ignore event if the instance isn't active.
        if let Some((mut instance, neighbors)) = self.as_up() {
            if let Err(error) =
                process_protocol_msg(&mut instance, neighbors, msg)
            {
                error.log();
            }
            routes_flush(&mut instance, neighbors);
        }
    }

    // Processes a route offered for redistribution.
    pub fn process_redistribute(&mut self, msg: RedistributeMsg) {
        if let Some((mut instance, neighbors)) = self.as_up() {
            events::process_redistribute(&mut instance, neighbors, msg);
            routes_flush(&mut instance, neighbors);
        }
    }

    // Clears the session with a neighbor.
    pub fn clear_neighbor(&mut self, nbr_addr: IpAddr, clear_type: ClearType) {
        let Some((mut instance, neighbors)) = self.as_up() else {
            return;
        };
        if let Err(error) =
            clear_neighbor(&mut instance, neighbors, nbr_addr, clear_type)
        {
            error.log();
        }
        routes_flush(&mut instance, neighbors);
    }

    // Runs the instance until the redistribution channel is closed.
    pub async fn run(
        mut self,
        mut rx: InstanceChannelsRx,
        mut redistribute_rx: UnboundedReceiver<RedistributeMsg>,
    ) {
        self.update();

        loop {
            tokio::select! {
                Some(msg) = rx.protocol_input.recv() => {
                    self.process_protocol_msg(msg);
                }
                msg = redistribute_rx.recv() => match msg {
                    Some(msg) => self.process_redistribute(msg),
                    None => break,
                },
            }
        }

        self.shutdown();
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new(
        router_id: Ipv4Addr,
        port: u16,
        instance_tx: &InstanceChannelsTx,
    ) -> Result<InstanceState, Error> {
        // Create TCP listener. An IPv6 socket accepts connections from both
        // address families, so IPv4 is used only as a fallback.
        let (af, socket) = match network::listen_socket(
            AddressFamily::Ipv6,
            port,
        ) {
            Ok(socket) => (AddressFamily::Ipv6, socket),
            Err(_) => {
                let socket = network::listen_socket(AddressFamily::Ipv4, port)
                    .map_err(IoError::TcpSocketError)?;
                (AddressFamily::Ipv4, socket)
            }
        };
        let socket = Arc::new(socket);
        let task =
            tasks::tcp_listener(&socket, &instance_tx.protocol_input.tcp_accept);
        let listener = TcpListenerTask {
            af,
            socket,
            _task: task,
        };

        Ok(InstanceState {
            router_id,
            listener,
            rib: Default::default(),
        })
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl ProtocolInputChannelsRx {
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.tcp_accept.recv() => {
                msg.map(ProtocolInputMsg::TcpAccept)
            }
            msg = self.tcp_connect.recv() => {
                msg.map(ProtocolInputMsg::TcpConnect)
            }
            msg = self.nbr_msg_rx.recv() => {
                msg.map(ProtocolInputMsg::NbrRx)
            }
            msg = self.nbr_timer.recv() => {
                msg.map(ProtocolInputMsg::NbrTimer)
            }
        }
    }
}

// ===== helper functions =====

fn protocol_input_channels() -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx)
{
    let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
    let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
    let (nbr_msg_rxp, nbr_msg_rxc) = mpsc::channel(4);
    let (nbr_timerp, nbr_timerc) = mpsc::channel(4);

    let tx = ProtocolInputChannelsTx {
        tcp_accept: tcp_acceptp,
        tcp_connect: tcp_connectp,
        nbr_msg_rx: nbr_msg_rxp,
        nbr_timer: nbr_timerp,
    };
    let rx = ProtocolInputChannelsRx {
        tcp_accept: tcp_acceptc,
        tcp_connect: tcp_connectc,
        nbr_msg_rx: nbr_msg_rxc,
        nbr_timer: nbr_timerc,
    };

    (tx, rx)
}

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Accepted TCP connection request.
        ProtocolInputMsg::TcpAccept(mut msg) => {
            if let Some(stream) = msg.stream() {
                events::process_tcp_accept(
                    instance,
                    neighbors,
                    stream,
                    msg.conn_info,
                )?;
            }
        }
        // Established TCP connection.
        ProtocolInputMsg::TcpConnect(mut msg) => {
            if let Some(stream) = msg.stream() {
                events::process_tcp_connect(
                    instance,
                    neighbors,
                    stream,
                    msg.conn_info,
                )?;
            }
        }
        // Received message from neighbor.
        ProtocolInputMsg::NbrRx(msg) => {
            events::process_nbr_msg(
                instance,
                neighbors,
                msg.nbr_addr,
                msg.msg,
            )?;
        }
        // Neighbor's timeout has expired.
        ProtocolInputMsg::NbrTimer(msg) => {
            events::process_nbr_timer(
                instance,
                neighbors,
                msg.nbr_addr,
                msg.timer,
            )?;
        }
    }

    Ok(())
}

fn clear_neighbor(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    clear_type: ClearType,
) -> Result<(), Error> {
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    match clear_type {
        ClearType::Admin => {
            nbr.clear_admin(instance);
        }
        ClearType::Soft => {
            if nbr.state == fsm::State::Established {
                nbr.resend_adj_rib_out(&instance.state.rib);
            }
        }
        ClearType::SoftInbound => {
            if nbr.state != fsm::State::Established {
                return Ok(());
            }
            if nbr.route_refresh_nego {
                nbr.route_refresh_send();
            } else if nbr.config.soft_reconfiguration {
                let families = nbr.families_nego.clone();
                let mut cxt = RibCxt {
                    config: instance.config,
                    policy: instance.policy,
                    neighbors,
                    sink: &mut *instance.sink,
                };
                let rib = &mut instance.state.rib;
                let result = families.into_iter().try_for_each(|afi_safi| {
                    rib.soft_reconfig_in(&mut cxt, nbr_addr, afi_safi)
                });
                match result {
                    Err(error @ Error::NbrMaxPrefixExceeded(..)) => {
                        error.log();
                        if let Some(nbr) = neighbors.get_mut(&nbr_addr) {
                            nbr.max_prefix_overflow(instance);
                        }
                    }
                    result => result?,
                }
            }
        }
    }

    Ok(())
}

// Completes the processing of an event: sends the routing table to newly
// established neighbors, runs the decision process for every queued prefix
// and transmits the resulting updates.
pub(crate) fn routes_flush(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
) {
    let pending = neighbors
        .values_mut()
        .filter(|nbr| nbr.announce_pending)
        .map(|nbr| {
            nbr.announce_pending = false;
            (nbr.remote_addr, nbr.families_nego.clone())
        })
        .collect::<Vec<_>>();

    let mut cxt = RibCxt {
        config: instance.config,
        policy: instance.policy,
        neighbors,
        sink: &mut *instance.sink,
    };
    let rib = &mut instance.state.rib;
    rib.process_queued(&mut cxt);
    for (nbr_addr, families) in pending {
        for afi_safi in families {
            rib.announce_table(&mut cxt, nbr_addr, afi_safi);
        }
    }

    for nbr in neighbors.values_mut() {
        nbr.update_queues_flush();
    }
}
