// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flow programming messages exchanged with tenant controllers
//! and physical switches.
//!
//! These are decoded representations; the wire codec lives with the
//! connection handling code and is not a concern of this crate.

use super::ip::Ipv4Addr;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

bitflags! {
    /// Fields of an [`OfMatch`] which are "don't care".
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
        Serialize,
    )]
    pub struct Wildcards: u32 {
        const IN_PORT = 1 << 0;
        const DL_VLAN = 1 << 1;
        const DL_SRC = 1 << 2;
        const DL_DST = 1 << 3;
        const DL_TYPE = 1 << 4;
        const NW_PROTO = 1 << 5;
        const TP_SRC = 1 << 6;
        const TP_DST = 1 << 7;
        const NW_SRC = 1 << 8;
        const NW_DST = 1 << 14;
        const DL_VLAN_PCP = 1 << 20;
        const NW_TOS = 1 << 21;
    }
}

/// A flow match.
///
/// Every field always carries a concrete value, even when the
/// matching wildcard bit marks it as "don't care".
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OfMatch {
    pub wildcards: Wildcards,
    pub in_port: u16,
    pub dl_type: u16,
    pub nw_proto: u8,
    pub nw_src: Ipv4Addr,
    pub nw_dst: Ipv4Addr,
    pub tp_src: u16,
    pub tp_dst: u16,
}

impl Default for OfMatch {
    fn default() -> Self {
        Self::any()
    }
}

impl OfMatch {
    /// A match with every field wildcarded.
    pub fn any() -> Self {
        Self {
            wildcards: Wildcards::all(),
            in_port: 0,
            dl_type: 0,
            nw_proto: 0,
            nw_src: Ipv4Addr::ANY_ADDR,
            nw_dst: Ipv4Addr::ANY_ADDR,
            tp_src: 0,
            tp_dst: 0,
        }
    }

    pub fn is_wildcarded(&self, field: Wildcards) -> bool {
        self.wildcards.contains(field)
    }

    pub fn with_in_port(mut self, port: u16) -> Self {
        self.in_port = port;
        self.wildcards.remove(Wildcards::IN_PORT);
        self
    }

    pub fn with_dl_type(mut self, dl_type: u16) -> Self {
        self.dl_type = dl_type;
        self.wildcards.remove(Wildcards::DL_TYPE);
        self
    }

    pub fn with_nw_src(mut self, ip: Ipv4Addr) -> Self {
        self.nw_src = ip;
        self.wildcards.remove(Wildcards::NW_SRC);
        self
    }

    pub fn with_nw_dst(mut self, ip: Ipv4Addr) -> Self {
        self.nw_dst = ip;
        self.wildcards.remove(Wildcards::NW_DST);
        self
    }
}

impl Display for OfMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        let mut field = |f: &mut fmt::Formatter, s: fmt::Arguments| {
            let sep = if first { "" } else { "," };
            first = false;
            write!(f, "{sep}{s}")
        };

        if !self.is_wildcarded(Wildcards::IN_PORT) {
            field(f, format_args!("in_port={}", self.in_port))?;
        }
        if !self.is_wildcarded(Wildcards::DL_TYPE) {
            field(f, format_args!("dl_type={:#06x}", self.dl_type))?;
        }
        if !self.is_wildcarded(Wildcards::NW_PROTO) {
            field(f, format_args!("nw_proto={}", self.nw_proto))?;
        }
        if !self.is_wildcarded(Wildcards::NW_SRC) {
            field(f, format_args!("nw_src={}", self.nw_src))?;
        }
        if !self.is_wildcarded(Wildcards::NW_DST) {
            field(f, format_args!("nw_dst={}", self.nw_dst))?;
        }
        if !self.is_wildcarded(Wildcards::TP_SRC) {
            field(f, format_args!("tp_src={}", self.tp_src))?;
        }
        if !self.is_wildcarded(Wildcards::TP_DST) {
            field(f, format_args!("tp_dst={}", self.tp_dst))?;
        }
        if first {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// A flow action. An empty action list drops the packet.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OfAction {
    Output { port: u16, max_len: u16 },
    SetNwSrc(Ipv4Addr),
    SetNwDst(Ipv4Addr),
}

impl Display for OfAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Output { port, .. } => write!(f, "output:{port}"),
            Self::SetNwSrc(ip) => write!(f, "set_nw_src:{ip}"),
            Self::SetNwDst(ip) => write!(f, "set_nw_dst:{ip}"),
        }
    }
}

bitflags! {
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
        Serialize,
    )]
    pub struct FlowModFlags: u16 {
        /// Send a flow-removed message when the flow expires or is
        /// deleted.
        const SEND_FLOW_REM = 1 << 0;
        const CHECK_OVERLAP = 1 << 1;
        const EMERG = 1 << 2;
    }
}

/// A request to install a flow.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowMod {
    pub cookie: u64,
    pub of_match: OfMatch,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: FlowModFlags,
    pub actions: Vec<OfAction>,
}

impl FlowMod {
    pub fn new(of_match: OfMatch, priority: u16) -> Self {
        Self {
            cookie: 0,
            of_match,
            priority,
            idle_timeout: 0,
            hard_timeout: 0,
            flags: FlowModFlags::empty(),
            actions: Vec::new(),
        }
    }

    pub fn has_flag(&self, flag: FlowModFlags) -> bool {
        self.flags.contains(flag)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FlowRemovedReason {
    IdleTimeout,
    HardTimeout,
    Delete,
}

impl Display for FlowRemovedReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::IdleTimeout => "IDLE_TIMEOUT",
            Self::HardTimeout => "HARD_TIMEOUT",
            Self::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// Notification that an installed flow expired or was deleted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowRemoved {
    pub cookie: u64,
    pub of_match: OfMatch,
    pub priority: u16,
    pub reason: FlowRemovedReason,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
}

impl Display for FlowRemoved {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FlowRemoved: cookie={:#x} priority={} match={} reason={}",
            self.cookie, self.priority, self.of_match, self.reason,
        )
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PacketInReason {
    NoMatch,
    Action,
}

/// A packet punted from a switch to its controller.
///
/// `pkt_match` holds the header fields extracted from `data`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PacketIn {
    pub buffer_id: Option<u32>,
    pub in_port: u16,
    pub reason: PacketInReason,
    pub pkt_match: OfMatch,
    pub data: Vec<u8>,
}
