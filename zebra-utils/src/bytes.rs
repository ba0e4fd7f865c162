//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

thread_local!(
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(4096))
);

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets an IPv4 addr from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    ///
    /// Returns an error if there are fewer than 4 bytes remaining.
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError>;

    /// Gets an optional IPv4 addr from `self` in big-endian byte order.
    ///
    /// An all-zeros address is returned as `None`.
    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError>;

    /// Gets an IPv6 addr from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    ///
    /// Returns an error if there are fewer than 16 bytes remaining.
    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError>;

    /// Splits off the next `len` bytes, advancing the current position past
    /// them.
    ///
    /// Returns an error if there are fewer than `len` bytes remaining.
    fn try_split_to(&mut self, len: usize) -> Result<Bytes, TryGetError>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes an IP addr to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4 or 16.
    fn put_ip(&mut self, addr: &IpAddr);

    /// Writes an IPv4 addr to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    fn put_ipv4(&mut self, addr: &Ipv4Addr);

    /// Writes an IPv6 addr to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    fn put_ipv6(&mut self, addr: &Ipv6Addr);

    /// Overwrites the 16-bit length field at `pos` with the number of bytes
    /// written after `pos + 2`.
    fn patch_u16_len(&mut self, pos: usize);

    /// Overwrites the 8-bit length field at `pos` with the number of bytes
    /// written after `pos + 1`.
    fn patch_u8_len(&mut self, pos: usize);
}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError> {
        Ok(Ipv4Addr::from(self.try_get_u32()?))
    }

    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError> {
        let addr = self.try_get_ipv4()?;
        if addr.is_unspecified() {
            Ok(None)
        } else {
            Ok(Some(addr))
        }
    }

    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError> {
        Ok(Ipv6Addr::from(self.try_get_u128()?))
    }

    fn try_split_to(&mut self, len: usize) -> Result<Bytes, TryGetError> {
        if self.remaining() < len {
            return Err(TryGetError {
                requested: len,
                available: self.remaining(),
            });
        }
        Ok(self.split_to(len))
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_ip(&mut self, addr: &IpAddr) {
        match addr {
            IpAddr::V4(addr) => self.put_slice(&addr.octets()),
            IpAddr::V6(addr) => self.put_slice(&addr.octets()),
        }
    }

    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_u32((*addr).into())
    }

    fn put_ipv6(&mut self, addr: &Ipv6Addr) {
        self.put_slice(&addr.octets())
    }

    fn patch_u16_len(&mut self, pos: usize) {
        let len = (self.len() - pos - 2) as u16;
        self[pos..pos + 2].copy_from_slice(&len.to_be_bytes());
    }

    fn patch_u8_len(&mut self, pos: usize) {
        let len = (self.len() - pos - 1) as u8;
        self[pos] = len;
    }
}

// ===== unit tests =====
