// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::Dpid;
use super::FlowCookie;
use super::TenantId;
use super::ip::Ipv4Addr;
use super::of::FlowMod;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// The virtual to physical IP mappings of a single tenant.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TenantIpMapResp {
    pub tenant: TenantId,
    /// (virtual, physical) pairs, ordered by virtual address.
    pub ip4: Vec<(Ipv4Addr, Ipv4Addr)>,
}

/// Dump the IP mappings of every tenant.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpIpMappingsResp {
    pub mappings: Vec<TenantIpMapResp>,
}

/// A single pending flow in a virtual flow table.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowEntryDump {
    /// The cookie installed on the physical switches.
    pub cookie: FlowCookie,
    /// The flow as the tenant specified it.
    pub flow_mod: FlowMod,
}

/// Dump the pending flows of a virtual switch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpFlowTableResp {
    pub tenant: TenantId,
    pub dpid: Dpid,
    pub limit: u32,
    pub flows: Vec<FlowEntryDump>,
}
