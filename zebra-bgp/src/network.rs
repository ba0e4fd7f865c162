//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::error::SendError;
use zebra_utils::ip::{AddressFamily, IpAddrExt};
use zebra_utils::socket::{
    OwnedReadHalf, OwnedWriteHalf, TcpConnInfo, TcpListener, TcpSocket,
    TcpStream, TcpStreamExt,
};
use zebra_utils::{Sender, UnboundedReceiver};

use crate::error::{Error, IoError, NbrRxError};
use crate::packet::consts::BGP_PORT;
use crate::packet::message::{DecodeCxt, EncodeCxt, Message};
use crate::tasks::messages::input::{NbrRxMsg, TcpAcceptMsg};
use crate::tasks::messages::output::NbrTxMsg;

// ===== global functions =====

// Creates the passive TCP socket.
//
// An IPv6 listener also accepts IPv4 connections through IPv4-mapped
// addresses, which are converted back when the connection is accepted.
pub(crate) fn listen_socket(
    af: AddressFamily,
    port: u16,
) -> Result<TcpListener, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        // Create TCP socket.
        let socket = socket(af)?;

        // Bind socket.
        let sockaddr = SocketAddr::from((IpAddr::unspecified(af), port));
        socket.set_reuseaddr(true)?;
        socket.bind(sockaddr)?;

        // Convert the socket into a TcpListener.
        let socket = socket.listen(4096)?;

        Ok(socket)
    }
    #[cfg(feature = "testing")]
    {
        Ok(TcpListener::default())
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn listen_loop(
    listener: Arc<TcpListener>,
    tcp_acceptp: Sender<TcpAcceptMsg>,
) -> Result<(), SendError<TcpAcceptMsg>> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => match stream.conn_info() {
                Ok(conn_info) => {
                    let msg = TcpAcceptMsg {
                        stream: Some(stream),
                        conn_info,
                    };
                    tcp_acceptp.send(msg).await?;
                }
                Err(error) => {
                    IoError::TcpInfoError(error).log();
                }
            },
            Err(error) => {
                IoError::TcpAcceptError(error).log();
            }
        }
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn connect(
    remote_addr: IpAddr,
) -> Result<(TcpStream, TcpConnInfo), Error> {
    let af = remote_addr.address_family();

    // Create TCP socket.
    let socket = socket(af).map_err(IoError::TcpSocketError)?;

    // Connect to remote address on the BGP port.
    let sockaddr = SocketAddr::from((remote_addr, BGP_PORT));
    let stream = socket
        .connect(sockaddr)
        .await
        .map_err(IoError::TcpConnectError)?;

    // Obtain TCP connection address/port information.
    let conn_info = stream.conn_info().map_err(IoError::TcpInfoError)?;

    Ok((stream, conn_info))
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn nbr_write_loop(
    mut stream: OwnedWriteHalf,
    cxt: EncodeCxt,
    mut nbr_msg_txc: UnboundedReceiver<NbrTxMsg>,
) {
    while let Some(msg) = nbr_msg_txc.recv().await {
        match msg {
            // Send message to the peer.
            NbrTxMsg::SendMessage { msg, .. } => {
                let buf = msg.encode(&cxt);
                if let Err(error) = stream.write_all(&buf).await {
                    IoError::TcpSendError(error).log();
                }
            }
            // Send list of messages to the peer.
            NbrTxMsg::SendMessageList { msg_list, .. } => {
                for msg in msg_list {
                    let buf = msg.encode(&cxt);
                    if let Err(error) = stream.write_all(&buf).await {
                        IoError::TcpSendError(error).log();
                    }
                }
            }
        }
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn nbr_read_loop(
    mut stream: OwnedReadHalf,
    nbr_addr: IpAddr,
    cxt: DecodeCxt,
    nbr_msg_rxp: Sender<NbrRxMsg>,
) -> Result<(), SendError<NbrRxMsg>> {
    const BUF_SIZE: usize = 65535;
    let mut buf = [0; BUF_SIZE];
    let mut data = Vec::with_capacity(BUF_SIZE);

    loop {
        // Read data from the network.
        match stream.read(&mut buf).await {
            Ok(0) => {
                // Notify that the connection was closed by the remote end.
                let msg = NbrRxMsg {
                    nbr_addr,
                    msg: Err(NbrRxError::TcpConnClosed),
                };
                nbr_msg_rxp.send(msg).await?;
                return Ok(());
            }
            Ok(num_bytes) => data.extend_from_slice(&buf[..num_bytes]),
            Err(error) => {
                IoError::TcpRecvError(error).log();
                let msg = NbrRxMsg {
                    nbr_addr,
                    msg: Err(NbrRxError::TcpConnClosed),
                };
                nbr_msg_rxp.send(msg).await?;
                return Ok(());
            }
        };

        // Decode message(s).
        while let Some(msg_size) = Message::get_message_len(&data) {
            let msg = Message::decode(&data[0..msg_size], &cxt)
                .map_err(NbrRxError::MsgDecodeError);
            data.drain(..msg_size);

            // Stop reading after a malformed message, the session is going
            // to be torn down anyway.
            let failed = msg.is_err();

            // Notify that the BGP message was received.
            let msg = NbrRxMsg { nbr_addr, msg };
            nbr_msg_rxp.send(msg).await?;
            if failed {
                return Ok(());
            }
        }
    }
}

// ===== helper functions =====

#[cfg(not(feature = "testing"))]
fn socket(af: AddressFamily) -> Result<TcpSocket, std::io::Error> {
    match af {
        AddressFamily::Ipv4 => TcpSocket::new_v4(),
        AddressFamily::Ipv6 => TcpSocket::new_v6(),
    }
}
