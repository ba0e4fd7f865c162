//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, atomic};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{Instrument, debug_span, error};
use zebra_utils::socket::{OwnedReadHalf, OwnedWriteHalf, TcpListener};
use zebra_utils::task::{IntervalTask, Task, TimeoutTask};
use zebra_utils::{Sender, UnboundedSender};

use crate::debug::Debug;
use crate::error::NbrRxError;
use crate::neighbor::{Neighbor, fsm};
use crate::network;
use crate::packet::message::{DecodeCxt, EncodeCxt, KeepaliveMsg, Message};

//
// BGP tasks diagram:
//                                     +--------------+
//                                     |    daemon    |
//                                     +--------------+
//                                           | ^
//                                           | |
//                       redistribute (1x)   V | (1x) route sink
//                                     +--------------+
//                                     |              |
//                tcp_listener (1x) -> |              |
//                 tcp_connect (Nx) -> |   instance   | -> (Nx) nbr_tx
//                      nbr_rx (Nx) -> |              | -> (Nx) nbr_kalive_interval
//                   nbr_timer (Nx) -> |              |
//                                     |              |
//                                     +--------------+
//

// BGP inter-task message types.
pub mod messages {
    use std::net::IpAddr;

    use serde::{Deserialize, Serialize};
    use zebra_utils::socket::{TcpConnInfo, TcpStream};

    use crate::error::NbrRxError;
    use crate::neighbor::fsm;
    use crate::packet::message::Message;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum ProtocolMsg {
            TcpAccept(TcpAcceptMsg),
            TcpConnect(TcpConnectMsg),
            NbrRx(NbrRxMsg),
            NbrTimer(NbrTimerMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct TcpAcceptMsg {
            #[serde(skip)]
            pub stream: Option<TcpStream>,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct TcpConnectMsg {
            #[serde(skip)]
            pub stream: Option<TcpStream>,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NbrRxMsg {
            pub nbr_addr: IpAddr,
            pub msg: Result<Message, NbrRxError>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NbrTimerMsg {
            pub nbr_addr: IpAddr,
            pub timer: fsm::Timer,
        }

        impl TcpAcceptMsg {
            pub(crate) fn stream(&mut self) -> Option<TcpStream> {
                #[cfg(not(feature = "testing"))]
                {
                    self.stream.take()
                }
                #[cfg(feature = "testing")]
                {
                    Some(Default::default())
                }
            }
        }

        impl TcpConnectMsg {
            pub(crate) fn stream(&mut self) -> Option<TcpStream> {
                #[cfg(not(feature = "testing"))]
                {
                    self.stream.take()
                }
                #[cfg(feature = "testing")]
                {
                    Some(Default::default())
                }
            }
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use super::*;

        #[derive(Debug, Serialize)]
        pub enum NbrTxMsg {
            SendMessage {
                nbr_addr: IpAddr,
                msg: Message,
            },
            SendMessageList {
                nbr_addr: IpAddr,
                msg_list: Vec<Message>,
            },
        }
    }
}

// ===== BGP tasks =====

// TCP listening task.
pub(crate) fn tcp_listener(
    session_socket: &Arc<TcpListener>,
    tcp_acceptp: &Sender<messages::input::TcpAcceptMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("session");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let session_socket = session_socket.clone();
        let tcp_acceptp = tcp_acceptp.clone();
        Task::spawn(
            async move {
                let _ = network::listen_loop(session_socket, tcp_acceptp).await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// TCP connect task.
pub(crate) fn tcp_connect(
    nbr: &Neighbor,
    tcp_connectp: &Sender<messages::input::TcpConnectMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span = debug_span!("neighbor", addr = %nbr.remote_addr);
        let _span_guard = span.enter();

        let remote_addr = nbr.remote_addr;
        let tcp_connectp = tcp_connectp.clone();
        Task::spawn(
            async move {
                loop {
                    match network::connect(remote_addr).await {
                        Ok((stream, conn_info)) => {
                            // Send message to the parent BGP task.
                            let msg = messages::input::TcpConnectMsg {
                                stream: Some(stream),
                                conn_info,
                            };
                            let _ = tcp_connectp.send(msg).await;
                            return;
                        }
                        Err(error) => {
                            error.log();
                            // Wait one second before trying again.
                            sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// Neighbor TCP Rx task.
pub(crate) fn nbr_rx(
    nbr: &Neighbor,
    cxt: DecodeCxt,
    read_half: OwnedReadHalf,
    nbr_msg_rxp: &Sender<messages::input::NbrRxMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let nbr_addr = nbr.remote_addr;
        let nbr_msg_rxp = nbr_msg_rxp.clone();

        // The read loop runs inside an inner task so that a panic caused by
        // malformed input is reported as a closed connection.
        Task::spawn(
            async move {
                let worker_task = {
                    let nbr_msg_rxp = nbr_msg_rxp.clone();
                    Task::spawn(async move {
                        let _ = network::nbr_read_loop(
                            read_half,
                            nbr_addr,
                            cxt,
                            nbr_msg_rxp,
                        )
                        .await;
                    })
                };
                if let Err(error) = worker_task.await
                    && error.is_panic()
                {
                    error!(%error, "task panicked");
                    let msg = messages::input::NbrRxMsg {
                        nbr_addr,
                        msg: Err(NbrRxError::TcpConnClosed),
                    };
                    let _ = nbr_msg_rxp.send(msg).await;
                }
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// Neighbor TCP Tx task.
//
// The returned channel feeds the task. The task outlives the neighbor's
// session so that a final NOTIFICATION is still written out after the
// session is closed, and it terminates once the channel is dropped.
pub(crate) fn nbr_tx(
    nbr: &Neighbor,
    cxt: EncodeCxt,
    write_half: OwnedWriteHalf,
    #[cfg(feature = "testing")] proto_output_tx: &UnboundedSender<
        messages::output::NbrTxMsg,
    >,
) -> UnboundedSender<messages::output::NbrTxMsg> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
        let _span1_guard = span1.enter();
        let span2 = debug_span!("output");
        let _span2_guard = span2.enter();

        let (msg_txp, msg_txc) = tokio::sync::mpsc::unbounded_channel();
        let mut task = Task::spawn(
            async move {
                network::nbr_write_loop(write_half, cxt, msg_txc).await;
            }
            .in_current_span(),
        );
        task.detach();
        msg_txp
    }
    #[cfg(feature = "testing")]
    {
        // Relay messages straight to the test framework.
        proto_output_tx.clone()
    }
}

// Neighbor timer task.
pub(crate) fn nbr_timer(
    nbr: &Neighbor,
    timer: fsm::Timer,
    seconds: u16,
    nbr_timerp: &Sender<messages::input::NbrTimerMsg>,
) -> TimeoutTask {
    let nbr_timerp = nbr_timerp.clone();
    let nbr_addr = nbr.remote_addr;

    TimeoutTask::new(
        Duration::from_secs(seconds.into()),
        move || async move {
            let msg = messages::input::NbrTimerMsg { nbr_addr, timer };
            let _ = nbr_timerp.send(msg).await;
        },
    )
}

// Send periodic keepalive messages.
pub(crate) fn nbr_kalive_interval(
    nbr: &Neighbor,
    interval: u16,
) -> Option<IntervalTask> {
    let msg_txp = nbr.msg_txp.as_ref()?.clone();
    if interval == 0 {
        return None;
    }
    let nbr_addr = nbr.remote_addr;
    let msg_counter = nbr.statistics.msgs_sent.total.clone();

    let task = IntervalTask::new(
        Duration::from_secs(interval.into()),
        false,
        move || {
            let msg_txp = msg_txp.clone();
            let msg_counter = msg_counter.clone();

            async move {
                let msg = Message::Keepalive(KeepaliveMsg {});
                Debug::NbrMsgTx(&nbr_addr, &msg).log();

                let msg =
                    messages::output::NbrTxMsg::SendMessage { nbr_addr, msg };
                let _ = msg_txp.send(msg);
                msg_counter.fetch_add(1, atomic::Ordering::Relaxed);
            }
        },
    );
    Some(task)
}
