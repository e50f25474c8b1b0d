// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod ip;
pub mod of;

pub use cmd::*;
pub use ip::*;
pub use of::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment.
pub const API_VERSION: u64 = 3;

/// Identifies an isolated virtual network.
///
/// A tenant id is fixed for the lifetime of the virtual network. It
/// scopes every virtual address and every flow the tenant installs.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct TenantId(u32);

impl TenantId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn val(&self) -> u32 {
        self.0
    }
}

impl From<u32> for TenantId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for TenantId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(Self)
            .map_err(|e| format!("bad tenant id {s}: {e}"))
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A datapath id, naming either a physical or a virtual switch.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Dpid(u64);

impl Dpid {
    pub const fn new(dpid: u64) -> Self {
        Self(dpid)
    }

    pub const fn val(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Dpid {
    fn from(dpid: u64) -> Self {
        Self(dpid)
    }
}

// Datapath ids are conventionally shown as eight colon separated
// octets.
impl Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        )
    }
}

/// A flow cookie as seen inside the hypervisor.
///
/// The upper 32 bits carry the [`TenantId`] owning the flow and the
/// lower 32 bits carry a flow id that is unique within the virtual
/// switch which installed it. Physical switches echo the cookie back
/// untouched, which lets any part of the hypervisor recover flow
/// ownership from the cookie alone.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FlowCookie(u64);

impl FlowCookie {
    const TENANT_SHIFT: u32 = 32;
    const FLOW_ID_MASK: u64 = 0xFFFF_FFFF;

    pub const fn new(tenant: TenantId, flow_id: u32) -> Self {
        Self(((tenant.val() as u64) << Self::TENANT_SHIFT) | flow_id as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// The tenant which owns the flow.
    pub const fn tenant(&self) -> TenantId {
        TenantId::new((self.0 >> Self::TENANT_SHIFT) as u32)
    }

    /// The per-switch flow id.
    pub const fn flow_id(&self) -> u32 {
        (self.0 & Self::FLOW_ID_MASK) as u32
    }
}

impl Display for FlowCookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Errors returned by the administrative surface of the hypervisor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum VnetError {
    BadConfig(String),
    FlowNotFound(FlowCookie),
    MappingConflict(String),
    MappingNotFound(String),
    MaxCapacity(u64),
    PoolExhausted(TenantId),
    SwitchExists {
        tenant: TenantId,
        dpid: Dpid,
    },
    SwitchNotFound {
        tenant: TenantId,
        dpid: Dpid,
    },
    TenantExists(TenantId),
    UnknownTenant(TenantId),
}

impl Display for VnetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadConfig(msg) => write!(f, "bad config: {msg}"),
            Self::FlowNotFound(cookie) => {
                write!(f, "no flow for cookie {cookie}")
            }
            Self::MappingConflict(msg) => {
                write!(f, "inconsistent mapping: {msg}")
            }
            Self::MappingNotFound(msg) => write!(f, "no mapping: {msg}"),
            Self::MaxCapacity(limit) => {
                write!(f, "table at max capacity: {limit}")
            }
            Self::PoolExhausted(tenant) => {
                write!(f, "no physical IPs left for tenant {tenant}")
            }
            Self::SwitchExists { tenant, dpid } => {
                write!(f, "tenant {tenant} already has switch {dpid}")
            }
            Self::SwitchNotFound { tenant, dpid } => {
                write!(f, "tenant {tenant} has no switch {dpid}")
            }
            Self::TenantExists(tenant) => {
                write!(f, "tenant {tenant} already exists")
            }
            Self::UnknownTenant(tenant) => write!(f, "unknown tenant {tenant}"),
        }
    }
}
