//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use zebra_utils::bytes::{BytesExt, BytesMutExt};
use zebra_utils::ip::Ipv4AddrExt;

use crate::neighbor::PeerType;
use crate::packet::consts::{
    Afi, AsPathSegmentType, AttrFlags, AttrType, Origin, Safi,
};
use crate::packet::error::{AsPathError, UpdateMessageError};
use crate::packet::message::{
    DecodeCxt, EncodeCxt, MpReachNlri, MpUnreachNlri, ReachNlri,
    decode_prefixes, encode_prefix,
};

pub const ATTR_MIN_LEN: u16 = 3;
pub const ATTR_MIN_LEN_EXT: u16 = 4;
pub const DEFAULT_LOCAL_PREF: u32 = 100;

// Path attributes of a route.
//
// This is the plain, owned form of the attributes, used while decoding,
// while applying policies and while encoding. Stored routes reference the
// interned form (see `crate::store`).
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Attrs {
    pub base: BaseAttrs,
    pub as_path: AsPath,
    pub comm: Option<Comms>,
    pub ext_comm: Option<ExtComms>,
    pub cluster_list: Option<ClusterList>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct BaseAttrs {
    pub origin: Origin,
    pub nexthop: Option<Ipv4Addr>,
    pub mp_nexthop: Option<MpNexthop>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub atomic_aggregate: bool,
    pub aggregator: Option<Aggregator>,
    pub originator_id: Option<Ipv4Addr>,
    // Local-only attributes.
    pub weight: u32,
    pub invalid: bool,
}

// Next hop carried in the MP_REACH_NLRI attribute.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MpNexthop {
    Ipv4(Ipv4Addr),
    Vpnv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Ipv6LinkLocal { global: Ipv6Addr, local: Ipv6Addr },
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: VecDeque<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsPathSegmentType,
    pub members: VecDeque<u16>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Aggregator {
    pub asn: u16,
    pub identifier: Ipv4Addr,
}

// Cluster list, in wire order.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ClusterList(pub Vec<Ipv4Addr>);

// Re-exports for convenience.
pub type Comm = zebra_utils::bgp::Comm;
pub type ExtComm = zebra_utils::bgp::ExtComm;

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct CommList<T: CommType>(pub BTreeSet<T>);

pub trait CommType:
    Clone + std::fmt::Debug + std::fmt::Display + Eq + Ord + PartialEq + PartialOrd
{
    const TYPE: AttrType;
    const LENGTH: usize;

    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &mut Bytes) -> Self;
}

// Useful type definitions.
pub type Comms = CommList<Comm>;
pub type ExtComms = CommList<ExtComm>;

// ===== impl Attrs =====

impl Attrs {
    // Returns the attributes of a locally originated route.
    pub fn local(origin: Origin, weight: u32) -> Attrs {
        Attrs {
            base: BaseAttrs {
                origin,
                nexthop: None,
                mp_nexthop: None,
                med: None,
                local_pref: None,
                atomic_aggregate: false,
                aggregator: None,
                originator_id: None,
                weight,
                invalid: false,
            },
            as_path: AsPath::default(),
            comm: None,
            ext_comm: None,
            cluster_list: None,
        }
    }

    // Encodes the attributes toward the peer described by `cxt`.
    //
    // Peer-dependent transformations of the AS_PATH, LOCAL_PREF and route
    // reflection attributes are applied here. Other per-peer changes are
    // expected to have been applied to `self` already.
    pub(crate) fn encode(
        &self,
        buf: &mut BytesMut,
        reach: &Option<ReachNlri>,
        mp_reach: &Option<MpReachNlri>,
        mp_unreach: &Option<MpUnreachNlri>,
        cxt: &EncodeCxt,
    ) {
        // MP_REACH_NLRI and MP_UNREACH_NLRI go first.
        if let Some(mp_reach) = mp_reach {
            mp_reach.encode(buf);
        }
        if let Some(mp_unreach) = mp_unreach {
            mp_unreach.encode(buf);
        }

        // ORIGIN attribute.
        origin::encode(self.base.origin, buf);

        // AS_PATH attribute.
        self.outbound_as_path(cxt).encode(buf);

        // NEXT_HOP attribute.
        if let Some(reach) = reach {
            nexthop::encode(reach.nexthop, buf);
        }

        // MULTI_EXIT_DISC attribute.
        if let Some(metric) = self.base.med {
            med::encode(metric, buf);
        }

        // LOCAL_PREF attribute.
        if matches!(cxt.peer_type, PeerType::Internal | PeerType::Confed) {
            let local_pref =
                self.base.local_pref.unwrap_or(DEFAULT_LOCAL_PREF);
            local_pref::encode(local_pref, buf);
        }

        // ATOMIC_AGGREGATE attribute.
        if self.base.atomic_aggregate {
            atomic_aggregate::encode(buf);
        }

        // AGGREGATOR attribute.
        if let Some(aggregator) = &self.base.aggregator {
            aggregator.encode(buf);
        }

        // COMMUNITIES attribute.
        if cxt.send_community
            && let Some(comm) = &self.comm
        {
            comm.encode(buf);
        }

        // ORIGINATOR_ID and CLUSTER_LIST attributes.
        if cxt.peer_type == PeerType::Internal && cxt.reflector {
            let originator_id =
                self.base.originator_id.unwrap_or(cxt.router_id);
            originator_id::encode(originator_id, buf);

            let mut cluster_list = self.cluster_list.clone().unwrap_or_default();
            cluster_list.0.push(cxt.cluster_id);
            cluster_list.encode(buf);
        }

        // EXTENDED COMMUNITIES attribute.
        if cxt.send_ext_community
            && let Some(ext_comm) = &self.ext_comm
        {
            ext_comm.encode(buf);
        }
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        nlri_present: bool,
        mp_unreach: &mut Option<MpUnreachNlri>,
        mp_reach: &mut Option<MpReachNlri>,
    ) -> Result<Option<Self>, UpdateMessageError> {
        let mut origin = None;
        let mut as_path = None;
        let mut nexthop = None;
        let mut med = None;
        let mut local_pref = None;
        let mut atomic_aggregate = false;
        let mut aggregator = None;
        let mut originator_id = None;
        let mut cluster_list = None;
        let mut comm = None;
        let mut ext_comm = None;

        // Parse attributes.
        while buf.remaining() > 0 {
            if buf.remaining() < ATTR_MIN_LEN as usize {
                return Err(UpdateMessageError::AttributeLengthError(None));
            }

            // Parse attribute flags.
            let attr_flags = AttrFlags::from_bits_truncate(buf.get_u8());

            // Parse attribute type.
            let attr_type_raw = buf.get_u8();
            let attr_type = AttrType::from_u8(attr_type_raw);

            // Parse attribute length.
            let attr_len = if attr_flags.contains(AttrFlags::EXTENDED) {
                buf.try_get_u16().map_err(|_| {
                    UpdateMessageError::AttributeLengthError(attr_type)
                })? as usize
            } else {
                buf.get_u8() as usize
            };
            if attr_len > buf.remaining() {
                return Err(UpdateMessageError::AttributeLengthError(
                    attr_type,
                ));
            }
            let mut buf = buf.split_to(attr_len);

            // Unknown attributes are skipped.
            let Some(attr_type) = attr_type else {
                continue;
            };

            // Parse attribute value.
            match attr_type {
                AttrType::Origin => {
                    origin::decode(&mut buf, attr_flags, &mut origin)?
                }
                AttrType::AsPath => {
                    if as_path.is_some() {
                        return Err(UpdateMessageError::MalformedAttributeList);
                    }
                    as_path = Some(AsPath::decode(&mut buf)?);
                }
                AttrType::Nexthop => nexthop::decode(&mut buf, &mut nexthop)?,
                AttrType::Med => med::decode(&mut buf, &mut med)?,
                AttrType::LocalPref => {
                    local_pref::decode(&mut buf, &mut local_pref)
                }
                AttrType::AtomicAggregate => {
                    atomic_aggregate::decode(&mut buf, &mut atomic_aggregate)?
                }
                AttrType::Aggregator => {
                    Aggregator::decode(&mut buf, &mut aggregator)?
                }
                AttrType::Communities => Comms::decode(&mut buf, &mut comm)?,
                AttrType::OriginatorId => {
                    originator_id::decode(&mut buf, &mut originator_id)?
                }
                AttrType::ClusterList => {
                    ClusterList::decode(&mut buf, &mut cluster_list)?
                }
                AttrType::Dpa => buf.advance(buf.remaining()),
                AttrType::MpReachNlri => {
                    MpReachNlri::decode(&mut buf, mp_reach)?
                }
                AttrType::MpUnreachNlri => {
                    MpUnreachNlri::decode(&mut buf, mp_unreach)?
                }
                AttrType::ExtCommunities => {
                    ExtComms::decode(&mut buf, &mut ext_comm)?
                }
            }

            // The attribute value must be consumed entirely.
            if buf.remaining() != 0 {
                return Err(UpdateMessageError::AttributeLengthError(Some(
                    attr_type,
                )));
            }
        }

        // Attributes are only meaningful when reachability information is
        // present.
        if !nlri_present && mp_reach.is_none() {
            return Ok(None);
        }

        // Check for missing well-known attributes.
        let Some(origin) = origin else {
            return Err(UpdateMessageError::MissingWellKnownAttribute(
                AttrType::Origin,
            ));
        };
        let Some(as_path) = as_path else {
            return Err(UpdateMessageError::MissingWellKnownAttribute(
                AttrType::AsPath,
            ));
        };
        if nlri_present && nexthop.is_none() {
            return Err(UpdateMessageError::MissingWellKnownAttribute(
                AttrType::Nexthop,
            ));
        }
        if cxt.peer_type == PeerType::Internal && local_pref.is_none() {
            return Err(UpdateMessageError::MissingWellKnownAttribute(
                AttrType::LocalPref,
            ));
        }

        // Routes whose AS_PATH contains our own AS are kept out of the
        // decision process.
        let invalid = as_path.loop_check(cxt.local_as)
            || cxt
                .confed_id
                .is_some_and(|confed_id| as_path.loop_check(confed_id));

        Ok(Some(Attrs {
            base: BaseAttrs {
                origin,
                nexthop,
                mp_nexthop: mp_reach.as_ref().map(|mp_reach| mp_reach.nexthop),
                med,
                local_pref,
                atomic_aggregate,
                aggregator,
                originator_id,
                weight: 0,
                invalid,
            },
            as_path,
            comm,
            ext_comm,
            cluster_list,
        }))
    }

    // Upper bound of the encoded length of the attributes, accounting for
    // the outbound AS_PATH prepending and route reflection attributes.
    pub(crate) fn length(&self) -> u16 {
        let mut length = 0;

        length += origin::length();
        length += ATTR_MIN_LEN_EXT + self.as_path.body_len() + 4;
        length += nexthop::length();
        if self.base.med.is_some() {
            length += med::length();
        }
        length += local_pref::length();
        if self.base.atomic_aggregate {
            length += atomic_aggregate::length();
        }
        if self.base.aggregator.is_some() {
            length += Aggregator::length();
        }
        if let Some(comm) = &self.comm {
            length += comm.length();
        }
        length += originator_id::length();
        length += ATTR_MIN_LEN_EXT
            + Ipv4Addr::LENGTH as u16
                * (self.cluster_list.as_ref().map_or(0, |c| c.0.len()) + 1)
                    as u16;
        if let Some(ext_comm) = &self.ext_comm {
            length += ext_comm.length();
        }

        length
    }

    fn outbound_as_path(&self, cxt: &EncodeCxt) -> AsPath {
        let mut as_path = self.as_path.clone();
        match cxt.peer_type {
            PeerType::External if !cxt.rs_client && !cxt.transparent_as => {
                if let Some(confed_id) = cxt.confed_id {
                    as_path.strip_confed();
                    as_path.add_left(confed_id);
                } else {
                    as_path.add_left(cxt.local_as);
                }
            }
            PeerType::Confed => {
                as_path.add_left_confed(cxt.local_as);
            }
            _ => (),
        }
        as_path
    }
}

// ===== ORIGIN attribute =====

mod origin {
    use super::*;
    const LEN: u8 = 1;

    pub(super) fn encode(origin: Origin, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::Origin as u8);
        buf.put_u8(LEN);
        buf.put_u8(origin as u8);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        attr_flags: AttrFlags,
        origin: &mut Option<Origin>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() != LEN as usize {
            return Err(UpdateMessageError::AttributeLengthError(Some(
                AttrType::Origin,
            )));
        }

        if attr_flags != AttrFlags::TRANSITIVE {
            return Err(UpdateMessageError::AttributeFlagsError(
                AttrType::Origin,
            ));
        }

        let value = buf.get_u8();
        match Origin::from_u8(value) {
            Some(value) => {
                *origin = Some(value);
                Ok(())
            }
            None => Err(UpdateMessageError::InvalidOriginAttribute(value)),
        }
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== impl AsPath =====

impl AsPath {
    fn encode(&self, buf: &mut BytesMut) {
        let body_len = self.body_len();
        encode_attr_header(
            buf,
            AttrFlags::TRANSITIVE,
            AttrType::AsPath,
            body_len,
        );
        for segment in &self.segments {
            segment.encode(buf);
        }
    }

    // Parses the wire form of an AS_PATH attribute value.
    //
    // The whole input must consist of well-formed segments.
    pub fn decode(buf: &mut Bytes) -> Result<AsPath, AsPathError> {
        let mut segments = VecDeque::new();
        while buf.remaining() > 0 {
            let segment = AsPathSegment::decode(buf)?;
            segments.push_back(segment);
        }
        Ok(AsPath { segments })
    }

    // Length of the attribute value on the wire.
    pub fn body_len(&self) -> u16 {
        self.segments
            .iter()
            .map(|segment| segment.length())
            .sum::<u16>()
    }

    // Number of ASes used for path length comparison. Confederation segments
    // are not counted.
    pub fn count(&self) -> u32 {
        self.segments
            .iter()
            .map(|segment| match segment.seg_type {
                AsPathSegmentType::Sequence | AsPathSegmentType::Set => {
                    segment.members.len()
                }
                AsPathSegmentType::ConfedSequence
                | AsPathSegmentType::ConfedSet => 0,
            })
            .sum::<usize>() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    // Returns the leftmost AS of a leading AS_SEQUENCE segment.
    pub fn first_as(&self) -> Option<u16> {
        self.segments
            .front()
            .filter(|segment| segment.seg_type == AsPathSegmentType::Sequence)
            .and_then(|segment| segment.members.front().copied())
    }

    // Returns whether both paths start with the same neighboring AS.
    pub fn cmp_left(&self, other: &AsPath) -> bool {
        match (self.first_as(), other.first_as()) {
            (Some(asn1), Some(asn2)) => asn1 == asn2,
            _ => false,
        }
    }

    // Returns whether the given AS appears anywhere in the path.
    pub fn loop_check(&self, asn: u16) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.members.contains(&asn))
    }

    pub fn add_left(&mut self, asn: u16) {
        self.push_left(AsPathSegmentType::Sequence, asn);
    }

    pub fn add_left_confed(&mut self, asn: u16) {
        self.push_left(AsPathSegmentType::ConfedSequence, asn);
    }

    pub fn prepend(&mut self, asn: u16, count: usize) {
        for _ in 0..count {
            self.add_left(asn);
        }
    }

    // Removes the leading confederation segments.
    pub fn strip_confed(&mut self) {
        while let Some(segment) = self.segments.front()
            && matches!(
                segment.seg_type,
                AsPathSegmentType::ConfedSequence
                    | AsPathSegmentType::ConfedSet
            )
        {
            self.segments.pop_front();
        }
    }

    fn push_left(&mut self, seg_type: AsPathSegmentType, asn: u16) {
        if let Some(segment) = self.segments.front_mut()
            && segment.seg_type == seg_type
            && segment.members.len() < 255
        {
            segment.members.push_front(asn);
        } else {
            self.segments.push_front(AsPathSegment {
                seg_type,
                members: [asn].into(),
            });
        }
    }
}

impl std::fmt::Display for AsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl AsPathSegment {
    const MIN_LEN: u16 = 2;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.seg_type as u8);
        buf.put_u8(self.members.len() as u8);
        for member in &self.members {
            buf.put_u16(*member);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, AsPathError> {
        if buf.remaining() < Self::MIN_LEN as usize {
            return Err(AsPathError::TruncatedSegmentHeader);
        }

        // Decode segment type.
        let seg_type = buf.get_u8();
        let Some(seg_type) = AsPathSegmentType::from_u8(seg_type) else {
            return Err(AsPathError::InvalidSegmentType(seg_type));
        };

        // Decode segment length.
        let count = buf.get_u8();
        if count as usize * 2 > buf.remaining() {
            return Err(AsPathError::SegmentOverrun {
                count,
                remaining: buf.remaining(),
            });
        }

        // Decode segment members.
        let members = (0..count).map(|_| buf.get_u16()).collect();
        Ok(AsPathSegment { seg_type, members })
    }

    fn length(&self) -> u16 {
        Self::MIN_LEN + self.members.len() as u16 * 2
    }
}

impl std::fmt::Display for AsPathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (open, close) = match self.seg_type {
            AsPathSegmentType::Sequence => ("", ""),
            AsPathSegmentType::Set => ("{", "}"),
            AsPathSegmentType::ConfedSequence => ("(", ")"),
            AsPathSegmentType::ConfedSet => ("[", "]"),
        };
        write!(f, "{open}")?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{member}")?;
        }
        write!(f, "{close}")
    }
}

// ===== NEXT_HOP attribute =====

pub(crate) mod nexthop {
    use super::*;
    const LEN: u8 = 4;

    pub(super) fn encode(addr: Ipv4Addr, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::Nexthop as u8);
        buf.put_u8(LEN);
        buf.put_ipv4(&addr);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        nexthop: &mut Option<Ipv4Addr>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() != LEN as usize {
            return Err(UpdateMessageError::AttributeLengthError(Some(
                AttrType::Nexthop,
            )));
        }

        let value = buf.try_get_ipv4()?;
        *nexthop = Some(value);
        Ok(())
    }

    pub(crate) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== MULTI_EXIT_DISC attribute =====

mod med {
    use super::*;
    const LEN: u8 = 4;

    pub(super) fn encode(metric: u32, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::OPTIONAL.bits());
        buf.put_u8(AttrType::Med as u8);
        buf.put_u8(LEN);
        buf.put_u32(metric);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        med: &mut Option<u32>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() != LEN as usize {
            return Err(UpdateMessageError::AttributeLengthError(Some(
                AttrType::Med,
            )));
        }

        let value = buf.get_u32();
        *med = Some(value);
        Ok(())
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== LOCAL_PREF attribute =====

mod local_pref {
    use super::*;
    const LEN: u8 = 4;

    pub(super) fn encode(local_pref: u32, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::LocalPref as u8);
        buf.put_u8(LEN);
        buf.put_u32(local_pref);
    }

    // A value of unexpected length reads as zero.
    pub(super) fn decode(buf: &mut Bytes, local_pref: &mut Option<u32>) {
        let value = if buf.remaining() == LEN as usize {
            buf.get_u32()
        } else {
            buf.advance(buf.remaining());
            0
        };
        *local_pref = Some(value);
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== ATOMIC_AGGREGATE attribute =====

mod atomic_aggregate {
    use super::*;
    const LEN: u8 = 0;

    pub(super) fn encode(buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::AtomicAggregate as u8);
        buf.put_u8(LEN);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        atomic_aggregate: &mut bool,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() != LEN as usize {
            return Err(UpdateMessageError::AttributeLengthError(Some(
                AttrType::AtomicAggregate,
            )));
        }

        *atomic_aggregate = true;
        Ok(())
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== impl Aggregator =====

impl Aggregator {
    const LEN: u8 = 6;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE).bits());
        buf.put_u8(AttrType::Aggregator as u8);
        buf.put_u8(Self::LEN);
        buf.put_u16(self.asn);
        buf.put_ipv4(&self.identifier);
    }

    fn decode(
        buf: &mut Bytes,
        aggregator: &mut Option<Self>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() != Self::LEN as usize {
            return Err(UpdateMessageError::AttributeLengthError(Some(
                AttrType::Aggregator,
            )));
        }

        let asn = buf.get_u16();
        let identifier = buf.try_get_ipv4()?;
        *aggregator = Some(Aggregator { asn, identifier });
        Ok(())
    }

    fn length() -> u16 {
        ATTR_MIN_LEN + Self::LEN as u16
    }
}

// ===== ORIGINATOR_ID attribute =====

mod originator_id {
    use super::*;
    const LEN: u8 = 4;

    pub(super) fn encode(originator_id: Ipv4Addr, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::OPTIONAL.bits());
        buf.put_u8(AttrType::OriginatorId as u8);
        buf.put_u8(LEN);
        buf.put_ipv4(&originator_id);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        originator_id: &mut Option<Ipv4Addr>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() != LEN as usize {
            return Err(UpdateMessageError::AttributeLengthError(Some(
                AttrType::OriginatorId,
            )));
        }

        let value = buf.try_get_ipv4()?;
        *originator_id = Some(value);
        Ok(())
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== impl ClusterList =====

impl ClusterList {
    fn encode(&self, buf: &mut BytesMut) {
        let body_len = (self.0.len() * Ipv4Addr::LENGTH) as u16;
        encode_attr_header(
            buf,
            AttrFlags::OPTIONAL,
            AttrType::ClusterList,
            body_len,
        );
        for cluster_id in &self.0 {
            buf.put_ipv4(cluster_id);
        }
    }

    fn decode(
        buf: &mut Bytes,
        cluster_list: &mut Option<Self>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() % Ipv4Addr::LENGTH != 0 {
            return Err(UpdateMessageError::AttributeLengthError(Some(
                AttrType::ClusterList,
            )));
        }

        let mut list = Vec::with_capacity(buf.remaining() / Ipv4Addr::LENGTH);
        while buf.remaining() > 0 {
            list.push(buf.try_get_ipv4()?);
        }

        *cluster_list = Some(ClusterList(list));
        Ok(())
    }

    // Returns whether the given cluster ID is already in the list.
    pub fn loop_check(&self, cluster_id: Ipv4Addr) -> bool {
        self.0.contains(&cluster_id)
    }
}

// ===== impl MpNexthop =====

impl MpNexthop {
    // Length of the next hop on the wire.
    pub fn length(&self) -> u8 {
        match self {
            MpNexthop::Ipv4(..) => 4,
            MpNexthop::Vpnv4(..) => 12,
            MpNexthop::Ipv6(..) => 16,
            MpNexthop::Ipv6LinkLocal { .. } => 32,
        }
    }

    // Returns the address that should be installed in the forwarding table.
    pub fn global(&self) -> IpAddr {
        match *self {
            MpNexthop::Ipv4(addr) | MpNexthop::Vpnv4(addr) => addr.into(),
            MpNexthop::Ipv6(addr) => addr.into(),
            MpNexthop::Ipv6LinkLocal { global, .. } => global.into(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.length());
        match self {
            MpNexthop::Ipv4(addr) => buf.put_ipv4(addr),
            MpNexthop::Vpnv4(addr) => {
                // Zeroed route distinguisher.
                buf.put_u64(0);
                buf.put_ipv4(addr);
            }
            MpNexthop::Ipv6(addr) => buf.put_ipv6(addr),
            MpNexthop::Ipv6LinkLocal { global, local } => {
                buf.put_ipv6(global);
                buf.put_ipv6(local);
            }
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, UpdateMessageError> {
        let nexthop_len = buf.try_get_u8()?;
        let nexthop = match nexthop_len {
            4 => MpNexthop::Ipv4(buf.try_get_ipv4()?),
            12 => {
                let _rd = buf.try_get_u64()?;
                MpNexthop::Vpnv4(buf.try_get_ipv4()?)
            }
            16 => MpNexthop::Ipv6(buf.try_get_ipv6()?),
            32 => {
                let global = buf.try_get_ipv6()?;
                let local = buf.try_get_ipv6()?;
                // A non link-local second address is ignored.
                if local.is_unicast_link_local() {
                    MpNexthop::Ipv6LinkLocal { global, local }
                } else {
                    MpNexthop::Ipv6(global)
                }
            }
            _ => {
                return Err(UpdateMessageError::OptionalAttributeError(
                    AttrType::MpReachNlri,
                ));
            }
        };
        Ok(nexthop)
    }
}

// ===== impl MpReachNlri =====

impl MpReachNlri {
    pub const MIN_LEN: u16 = 5;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::EXTENDED).bits());
        buf.put_u8(AttrType::MpReachNlri as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        buf.put_u16(self.afi as u16);
        buf.put_u8(self.safi as u8);
        self.nexthop.encode(buf);
        // Number of SNPAs.
        buf.put_u8(0);
        for prefix in &self.prefixes {
            encode_prefix(buf, prefix);
        }

        // Rewrite attribute length.
        buf.patch_u16_len(start_pos);
    }

    fn decode(
        buf: &mut Bytes,
        mp_reach: &mut Option<Self>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() < Self::MIN_LEN as usize {
            return Err(UpdateMessageError::OptionalAttributeError(
                AttrType::MpReachNlri,
            ));
        }

        // Parse AFI and SAFI.
        let afi = buf.get_u16();
        let safi = buf.get_u8();

        // Parse nexthop.
        let nexthop = MpNexthop::decode(buf)?;

        // Skip SNPAs.
        let snpa_num = buf.try_get_u8()?;
        for _ in 0..snpa_num {
            let snpa_len = buf.try_get_u8()? as usize;
            buf.try_split_to((snpa_len + 1) >> 1)?;
        }

        // Unknown address families are ignored.
        let (Some(afi), Some(safi)) = (Afi::from_u16(afi), Safi::from_u8(safi))
        else {
            buf.advance(buf.remaining());
            return Ok(());
        };

        // Parse prefixes.
        let prefixes = if safi == Safi::MplsVpn {
            buf.advance(buf.remaining());
            vec![]
        } else {
            decode_prefixes(afi, buf)?
        };

        *mp_reach = Some(MpReachNlri {
            afi,
            safi,
            nexthop,
            prefixes,
        });
        Ok(())
    }
}

// ===== impl MpUnreachNlri =====

impl MpUnreachNlri {
    pub const MIN_LEN: u16 = 3;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::EXTENDED).bits());
        buf.put_u8(AttrType::MpUnreachNlri as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        buf.put_u16(self.afi as u16);
        buf.put_u8(self.safi as u8);
        for prefix in &self.prefixes {
            encode_prefix(buf, prefix);
        }

        // Rewrite attribute length.
        buf.patch_u16_len(start_pos);
    }

    fn decode(
        buf: &mut Bytes,
        mp_unreach: &mut Option<Self>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() < Self::MIN_LEN as usize {
            return Err(UpdateMessageError::OptionalAttributeError(
                AttrType::MpUnreachNlri,
            ));
        }

        // Parse AFI and SAFI.
        let afi = buf.get_u16();
        let safi = buf.get_u8();

        // Unknown address families are ignored.
        let (Some(afi), Some(safi)) = (Afi::from_u16(afi), Safi::from_u8(safi))
        else {
            buf.advance(buf.remaining());
            return Ok(());
        };

        // Parse prefixes.
        let prefixes = if safi == Safi::MplsVpn {
            buf.advance(buf.remaining());
            vec![]
        } else {
            decode_prefixes(afi, buf)?
        };

        *mp_unreach = Some(MpUnreachNlri {
            afi,
            safi,
            prefixes,
        });
        Ok(())
    }
}

// ===== impl Comm =====

impl CommType for Comm {
    const TYPE: AttrType = AttrType::Communities;
    const LENGTH: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0);
    }

    fn decode(buf: &mut Bytes) -> Self {
        let value = buf.get_u32();
        Self(value)
    }
}

// ===== impl ExtComm =====

impl CommType for ExtComm {
    const TYPE: AttrType = AttrType::ExtCommunities;
    const LENGTH: usize = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn decode(buf: &mut Bytes) -> Self {
        let mut value = [0; 8];
        buf.copy_to_slice(&mut value);
        Self(value)
    }
}

// ===== impl CommList =====

impl<T: CommType> CommList<T> {
    fn encode(&self, buf: &mut BytesMut) {
        let body_len = (self.0.len() * T::LENGTH) as u16;
        encode_attr_header(
            buf,
            AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL,
            T::TYPE,
            body_len,
        );
        for value in &self.0 {
            value.encode(buf);
        }
    }

    // An empty attribute value leaves the attribute absent.
    fn decode(
        buf: &mut Bytes,
        comm: &mut Option<Self>,
    ) -> Result<(), UpdateMessageError> {
        if buf.remaining() % T::LENGTH != 0 {
            return Err(UpdateMessageError::OptionalAttributeError(T::TYPE));
        }
        if buf.remaining() == 0 {
            *comm = None;
            return Ok(());
        }

        let mut list = BTreeSet::new();
        while buf.remaining() >= T::LENGTH {
            let value = T::decode(buf);
            list.insert(value);
        }

        *comm = Some(CommList(list));
        Ok(())
    }

    fn length(&self) -> u16 {
        ATTR_MIN_LEN_EXT + (self.0.len() * T::LENGTH) as u16
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.0.contains(value)
    }

    // Returns whether every value of `other` is also present in `self`.
    pub fn includes(&self, other: &CommList<T>) -> bool {
        other.0.is_subset(&self.0)
    }

    pub fn merge(&mut self, other: &CommList<T>) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl<T: CommType> FromIterator<T> for CommList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        CommList(iter.into_iter().collect())
    }
}

impl<T: CommType> std::fmt::Display for CommList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

// ===== helper functions =====

// Encodes the attribute header, setting the extended length bit only when
// the value doesn't fit in a single octet.
fn encode_attr_header(
    buf: &mut BytesMut,
    mut attr_flags: AttrFlags,
    attr_type: AttrType,
    body_len: u16,
) {
    if body_len > 255 {
        attr_flags.insert(AttrFlags::EXTENDED);
    }
    buf.put_u8(attr_flags.bits());
    buf.put_u8(attr_type as u8);
    if body_len > 255 {
        buf.put_u16(body_len);
    } else {
        buf.put_u8(body_len as u8);
    }
}

// ===== unit tests =====
