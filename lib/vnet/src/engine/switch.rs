// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Virtual switches.

use super::flow_table::VirtFlowTable;
use crate::api::DumpFlowTableResp;
use crate::api::Dpid;
use crate::api::FlowRemoved;
use crate::api::PacketIn;
use crate::api::TenantId;
use core::fmt;
use core::num::NonZeroU32;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A message travelling from the hypervisor up to a tenant's
/// controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NorthboundMsg {
    FlowRemoved(FlowRemoved),
    PacketIn(PacketIn),
}

impl fmt::Display for NorthboundMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FlowRemoved(msg) => write!(f, "{msg}"),
            Self::PacketIn(msg) => write!(
                f,
                "PacketIn: in_port={} reason={:?} match={}",
                msg.in_port, msg.reason, msg.pkt_match
            ),
        }
    }
}

/// The connection to a tenant's controller.
///
/// Sending is fire and forget: delivery failures are the channel's
/// business and are never reported back into the hypervisor.
pub trait TenantChannel: Send + Sync {
    fn send(&self, vdpid: Dpid, msg: NorthboundMsg);
}

/// A switch as one tenant sees it.
///
/// A virtual switch is backed by one or more physical switches. When
/// there is more than one, it is a "big switch" and any flow the
/// tenant installs on it is installed on every member.
pub struct VirtSwitch {
    tenant: TenantId,
    dpid: Dpid,
    members: Vec<Dpid>,
    flow_table: VirtFlowTable,
    chan: Arc<dyn TenantChannel>,
}

impl fmt::Debug for VirtSwitch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VirtSwitch")
            .field("tenant", &self.tenant)
            .field("dpid", &self.dpid)
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

impl VirtSwitch {
    pub fn new<I>(
        tenant: TenantId,
        dpid: Dpid,
        members: I,
        ft_limit: NonZeroU32,
        chan: Arc<dyn TenantChannel>,
    ) -> Self
    where
        I: IntoIterator<Item = Dpid>,
    {
        // Sorted and free of duplicates.
        let members: BTreeSet<Dpid> = members.into_iter().collect();

        Self {
            tenant,
            dpid,
            members: members.into_iter().collect(),
            flow_table: VirtFlowTable::new(tenant, ft_limit),
            chan,
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// The datapath id the tenant knows this switch by.
    pub fn dpid(&self) -> Dpid {
        self.dpid
    }

    /// The physical switches backing this virtual switch.
    pub fn members(&self) -> &[Dpid] {
        &self.members
    }

    pub fn is_big_switch(&self) -> bool {
        self.members.len() > 1
    }

    pub fn flow_table(&self) -> &VirtFlowTable {
        &self.flow_table
    }

    pub fn send_to_tenant(&self, msg: NorthboundMsg) {
        self.chan.send(self.dpid, msg);
    }

    pub fn dump_flow_table(&self) -> DumpFlowTableResp {
        DumpFlowTableResp {
            tenant: self.tenant,
            dpid: self.dpid,
            limit: self.flow_table.limit().get(),
            flows: self.flow_table.dump(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::FlowMod;
    use crate::api::OfMatch;
    use crate::sync::KMutex;

    #[derive(Default)]
    struct Recorder {
        msgs: KMutex<Vec<(Dpid, NorthboundMsg)>>,
    }

    impl TenantChannel for Recorder {
        fn send(&self, vdpid: Dpid, msg: NorthboundMsg) {
            self.msgs.lock().push((vdpid, msg));
        }
    }

    #[test]
    fn members_are_deduplicated() {
        let chan = Arc::new(Recorder::default());
        let vsw = VirtSwitch::new(
            TenantId::new(1),
            Dpid::new(0x10),
            [3, 1, 3].map(Dpid::new),
            NonZeroU32::new(8).unwrap(),
            chan.clone(),
        );

        assert_eq!(vsw.members(), &[Dpid::new(1), Dpid::new(3)]);
        assert!(vsw.is_big_switch());

        vsw.flow_table().add_flow_mod(FlowMod::new(OfMatch::any(), 1)).unwrap();
        let dump = vsw.dump_flow_table();
        assert_eq!(dump.dpid, Dpid::new(0x10));
        assert_eq!(dump.limit, 8);
        assert_eq!(dump.flows.len(), 1);
    }

    #[test]
    fn send_uses_virtual_dpid() {
        let chan = Arc::new(Recorder::default());
        let vsw = VirtSwitch::new(
            TenantId::new(1),
            Dpid::new(0x10),
            [Dpid::new(7)],
            NonZeroU32::new(8).unwrap(),
            chan.clone(),
        );
        assert!(!vsw.is_big_switch());

        let pkt = PacketIn {
            buffer_id: None,
            in_port: 1,
            reason: crate::api::PacketInReason::NoMatch,
            pkt_match: OfMatch::any(),
            data: vec![],
        };
        vsw.send_to_tenant(NorthboundMsg::PacketIn(pkt));
        let msgs = chan.msgs.lock();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].0, Dpid::new(0x10));
    }
}
