//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! BGP value types shared between the protocol engine and the daemon's
//! configuration layer.

use std::net::Ipv4Addr;
use std::str::FromStr;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comm(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ExtComm(pub [u8; 8]);

// BGP Well-known Communities.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-well-known-communities/bgp-well-known-communities.xhtml
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[repr(u32)]
pub enum WellKnownCommunities {
    NoExport = 0xFFFFFF01,
    NoAdvertise = 0xFFFFFF02,
    NoExportSubconfed = 0xFFFFFF03,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommParseError;

// ===== impl Origin =====

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Igp => write!(f, "i"),
            Origin::Egp => write!(f, "e"),
            Origin::Incomplete => write!(f, "?"),
        }
    }
}

// ===== impl Comm =====

impl Comm {
    pub const NO_EXPORT: Comm = Comm(WellKnownCommunities::NoExport as u32);
    pub const NO_ADVERTISE: Comm =
        Comm(WellKnownCommunities::NoAdvertise as u32);
    pub const LOCAL_AS: Comm =
        Comm(WellKnownCommunities::NoExportSubconfed as u32);
}

impl std::fmt::Display for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match WellKnownCommunities::from_u32(self.0) {
            Some(WellKnownCommunities::NoExport) => write!(f, "no-export"),
            Some(WellKnownCommunities::NoAdvertise) => {
                write!(f, "no-advertise")
            }
            Some(WellKnownCommunities::NoExportSubconfed) => {
                write!(f, "local-AS")
            }
            None => write!(f, "{}:{}", self.0 >> 16, self.0 & 0xFFFF),
        }
    }
}

impl FromStr for Comm {
    type Err = CommParseError;

    // Accepts the well-known community names and the "AA:NN" notation.
    fn from_str(s: &str) -> Result<Comm, CommParseError> {
        match s {
            "no-export" => return Ok(Comm::NO_EXPORT),
            "no-advertise" => return Ok(Comm::NO_ADVERTISE),
            "local-AS" => return Ok(Comm::LOCAL_AS),
            _ => (),
        }

        let (asn, local) = s.split_once(':').ok_or(CommParseError)?;
        let asn = asn.parse::<u16>().map_err(|_| CommParseError)?;
        let local = local.parse::<u16>().map_err(|_| CommParseError)?;
        Ok(Comm(((asn as u32) << 16) | local as u32))
    }
}

// ===== impl CommParseError =====

impl std::fmt::Display for CommParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid community value")
    }
}

impl std::error::Error for CommParseError {}

// ===== impl ExtComm =====

impl ExtComm {
    const TYPE_AS2: u8 = 0x00;
    const TYPE_IPV4: u8 = 0x01;
    const SUBTYPE_RT: u8 = 0x02;
    const SUBTYPE_SOO: u8 = 0x03;

    // Returns a route-target extended community.
    pub fn route_target(value: &str) -> Result<ExtComm, CommParseError> {
        ExtComm::from_admin_value(Self::SUBTYPE_RT, value)
    }

    // Returns a site-of-origin extended community.
    pub fn site_of_origin(value: &str) -> Result<ExtComm, CommParseError> {
        ExtComm::from_admin_value(Self::SUBTYPE_SOO, value)
    }

    // Parses either "ASN:NN" (2-octet AS specific) or "A.B.C.D:NN" (IPv4
    // address specific).
    fn from_admin_value(
        subtype: u8,
        value: &str,
    ) -> Result<ExtComm, CommParseError> {
        let (admin, local) = value.rsplit_once(':').ok_or(CommParseError)?;
        let mut bytes = [0; 8];
        bytes[1] = subtype;
        if let Ok(addr) = admin.parse::<Ipv4Addr>() {
            let local = local.parse::<u16>().map_err(|_| CommParseError)?;
            bytes[0] = Self::TYPE_IPV4;
            bytes[2..6].copy_from_slice(&addr.octets());
            bytes[6..8].copy_from_slice(&local.to_be_bytes());
        } else {
            let asn = admin.parse::<u16>().map_err(|_| CommParseError)?;
            let local = local.parse::<u32>().map_err(|_| CommParseError)?;
            bytes[0] = Self::TYPE_AS2;
            bytes[2..4].copy_from_slice(&asn.to_be_bytes());
            bytes[4..8].copy_from_slice(&local.to_be_bytes());
        }
        Ok(ExtComm(bytes))
    }
}

impl std::fmt::Display for ExtComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.0[1] {
            Self::SUBTYPE_RT => "rt",
            Self::SUBTYPE_SOO => "soo",
            _ => "raw",
        };
        match self.0[0] {
            Self::TYPE_AS2 => {
                let asn = u16::from_be_bytes([self.0[2], self.0[3]]);
                let local = u32::from_be_bytes([
                    self.0[4], self.0[5], self.0[6], self.0[7],
                ]);
                write!(f, "{kind}:{asn}:{local}")
            }
            Self::TYPE_IPV4 => {
                let addr =
                    Ipv4Addr::new(self.0[2], self.0[3], self.0[4], self.0[5]);
                let local = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "{kind}:{addr}:{local}")
            }
            _ => {
                write!(f, "raw:")?;
                for byte in &self.0 {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
        }
    }
}

// ===== unit tests =====
