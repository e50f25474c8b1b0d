// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Virtualization of messages coming up from physical switches.

use super::Hypervisor;
use super::switch::NorthboundMsg;
use crate::api::Dpid;
use crate::api::FlowCookie;
use crate::api::FlowModFlags;
use crate::api::FlowRemoved;
use crate::api::PacketIn;
use crate::provider::LogLevel;
use core::fmt;
use core::fmt::Display;

/// A message sent by a physical switch which may concern a tenant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SouthboundMsg {
    FlowRemoved(FlowRemoved),
    PacketIn(PacketIn),
}

/// What became of a message handed to [`Hypervisor::virtualize`].
///
/// None of these are errors: the caller has nothing left to do with
/// the message in any case.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VirtOutcome {
    /// The translated message was sent to the tenant.
    Delivered,

    /// The message was accounted for, but the tenant did not ask to
    /// hear about it.
    Consumed,

    /// No tenant has a virtual switch which claims the message.
    NotOwned,

    /// The message was already handled by way of another member of
    /// the same big switch.
    Duplicate,

    /// A lookup failed and the message was dropped.
    Dropped,
}

impl Display for VirtOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Delivered => "delivered",
            Self::Consumed => "consumed",
            Self::NotOwned => "not owned",
            Self::Duplicate => "duplicate",
            Self::Dropped => "dropped",
        };
        write!(f, "{s}")
    }
}

impl Hypervisor {
    /// Translate `msg`, received from the physical switch `phys`, into
    /// the view of the tenant owning it and pass it on.
    pub fn virtualize(&self, phys: Dpid, msg: SouthboundMsg) -> VirtOutcome {
        match msg {
            SouthboundMsg::FlowRemoved(fr) => {
                self.virtualize_flow_removed(phys, fr)
            }
            SouthboundMsg::PacketIn(pkt) => {
                self.virtualize_packet_in(phys, pkt)
            }
        }
    }

    /// Handle a flow-removed message.
    ///
    /// The owning tenant comes from the cookie. The pending record of
    /// the flow is taken out of the virtual flow table atomically, so
    /// when every member of a big switch reports the same flow only
    /// the first report gets through. The tenant is notified only if
    /// it asked for it, and then sees the cookie, match, priority, and
    /// idle timeout exactly as it originally specified them.
    pub fn virtualize_flow_removed(
        &self,
        phys: Dpid,
        mut fr: FlowRemoved,
    ) -> VirtOutcome {
        let cookie = FlowCookie::from_raw(fr.cookie);
        let tenant = cookie.tenant();

        let outcome = 'outcome: {
            // Flows not installed on behalf of a tenant, such as those
            // backing virtual links, land here.
            if !self.mappings.has_virt_switch(phys, tenant) {
                break 'outcome VirtOutcome::NotOwned;
            }

            let vsw = match self.mappings.get_virt_switch(phys, tenant) {
                Ok(vsw) => vsw,
                Err(e) => {
                    self.ectx.log.log(
                        LogLevel::Warn,
                        &format!(
                            "dropping flow removed from {phys} \
                             (cookie {cookie}): {e}"
                        ),
                    );
                    break 'outcome VirtOutcome::Dropped;
                }
            };

            let pending = match vsw.flow_table().take_flow_mod(cookie) {
                Ok(pending) => pending,
                Err(_) => break 'outcome VirtOutcome::Duplicate,
            };

            let fm = pending.flow_mod();
            if !fm.has_flag(FlowModFlags::SEND_FLOW_REM) {
                break 'outcome VirtOutcome::Consumed;
            }

            fr.cookie = fm.cookie;
            fr.of_match = fm.of_match;
            fr.priority = fm.priority;
            fr.idle_timeout = fm.idle_timeout;
            vsw.send_to_tenant(NorthboundMsg::FlowRemoved(fr));
            VirtOutcome::Delivered
        };

        self.flow_removed_probe(phys, cookie, outcome);
        outcome
    }

    /// Handle a packet-in message.
    ///
    /// The owning tenant is found by mapping the packet's physical
    /// source address, or failing that its destination address, back
    /// to a tenant. Addresses with a mapping are rewritten to their
    /// virtual values in the decoded match; `data` is passed through
    /// as is.
    pub fn virtualize_packet_in(
        &self,
        phys: Dpid,
        mut pkt: PacketIn,
    ) -> VirtOutcome {
        let outcome = 'outcome: {
            let m = &mut pkt.pkt_match;
            let owner = self
                .mappings
                .ip_to_tenant(m.nw_src)
                .or_else(|| self.mappings.ip_to_tenant(m.nw_dst));

            let Some((tenant, _)) = owner else {
                break 'outcome VirtOutcome::NotOwned;
            };

            let Ok(vsw) = self.mappings.get_virt_switch(phys, tenant) else {
                break 'outcome VirtOutcome::NotOwned;
            };

            if let Ok(vip) = self.mappings.get_virt_ip(tenant, m.nw_src) {
                m.nw_src = vip;
            }
            if let Ok(vip) = self.mappings.get_virt_ip(tenant, m.nw_dst) {
                m.nw_dst = vip;
            }

            vsw.send_to_tenant(NorthboundMsg::PacketIn(pkt));
            VirtOutcome::Delivered
        };

        self.packet_in_probe(phys, outcome);
        outcome
    }

    fn flow_removed_probe(
        &self,
        phys: Dpid,
        cookie: FlowCookie,
        outcome: VirtOutcome,
    ) {
        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let dpid_s = phys.to_string();
                let outcome_s = outcome.to_string();
                crate::vnet_provider::flow__removed!(
                    || (dpid_s, cookie.raw(), outcome_s)
                );
            } else {
                let (_, _, _) = (phys, cookie, outcome);
            }
        }
    }

    fn packet_in_probe(&self, phys: Dpid, outcome: VirtOutcome) {
        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let dpid_s = phys.to_string();
                let outcome_s = outcome.to_string();
                crate::vnet_provider::packet__in!(|| (dpid_s, outcome_s));
            } else {
                let (_, _) = (phys, outcome);
            }
        }
    }
}
