//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
// Normal build: re-export standard socket types.
#[cfg(not(feature = "testing"))]
pub use tokio::net::{
    TcpListener, TcpSocket, TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf,
};

// Test build: export mock sockets.
#[cfg(feature = "testing")]
pub use crate::socket::mock::{
    OwnedReadHalf, OwnedWriteHalf, TcpListener, TcpSocket, TcpStream,
};

// Addresses and ports of an established TCP connection.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// Extension methods for TcpStream.
pub trait TcpStreamExt {
    // Returns the addresses and ports of both connection ends.
    fn conn_info(&self) -> std::io::Result<TcpConnInfo>;
}

// ===== impl TcpStream =====

#[cfg(not(feature = "testing"))]
impl TcpStreamExt for TcpStream {
    fn conn_info(&self) -> std::io::Result<TcpConnInfo> {
        let local = self.local_addr()?;
        let remote = self.peer_addr()?;
        Ok(TcpConnInfo {
            local_addr: local.ip().to_canonical(),
            local_port: local.port(),
            remote_addr: remote.ip().to_canonical(),
            remote_port: remote.port(),
        })
    }
}

// ===== Mock sockets for unit testing =====

pub mod mock {
    #[derive(Debug, Default)]
    pub struct TcpSocket();

    #[derive(Debug, Default)]
    pub struct TcpListener();

    #[derive(Debug, Default)]
    pub struct TcpStream();

    #[derive(Debug, Default)]
    pub struct OwnedReadHalf();

    #[derive(Debug, Default)]
    pub struct OwnedWriteHalf();

    impl TcpStream {
        pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
            (OwnedReadHalf(), OwnedWriteHalf())
        }
    }
}
