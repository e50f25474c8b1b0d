// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for integration tests.

use slog::Drain;
use std::sync::Arc;
use vnet::ExecCtx;
use vnet::api::Dpid;
use vnet::api::FlowCookie;
use vnet::api::FlowMod;
use vnet::api::FlowModFlags;
use vnet::api::FlowRemoved;
use vnet::api::FlowRemovedReason;
use vnet::api::Ipv4Addr;
use vnet::api::OfAction;
use vnet::api::OfMatch;
use vnet::api::PacketIn;
use vnet::api::PacketInReason;
use vnet::api::TenantId;
use vnet::cfg::RewriteMode;
use vnet::cfg::TenantCfg;
use vnet::engine::Hypervisor;
use vnet::engine::switch::NorthboundMsg;
use vnet::engine::switch::TenantChannel;
use vnet::engine::switch::VirtSwitch;
use vnet::provider::SlogLog;
use vnet::sync::KMutex;

pub use vnet::engine::SouthboundMsg;
pub use vnet::engine::VirtOutcome;

/// The virtual dpid given to switches built by [`big_switch`].
pub const VDPID: Dpid = Dpid::new(0x00aa_0000_0000_0001);

/// A tenant channel which records everything sent through it.
#[derive(Default)]
pub struct RecordingChannel {
    msgs: KMutex<Vec<(Dpid, NorthboundMsg)>>,
}

impl TenantChannel for RecordingChannel {
    fn send(&self, vdpid: Dpid, msg: NorthboundMsg) {
        self.msgs.lock().push((vdpid, msg));
    }
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn num_msgs(&self) -> usize {
        self.msgs.lock().len()
    }

    pub fn msgs(&self) -> Vec<(Dpid, NorthboundMsg)> {
        self.msgs.lock().clone()
    }

    pub fn flow_removed(&self) -> Vec<FlowRemoved> {
        self.msgs
            .lock()
            .iter()
            .filter_map(|(_, msg)| match msg {
                NorthboundMsg::FlowRemoved(fr) => Some(fr.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn packet_in(&self) -> Vec<PacketIn> {
        self.msgs
            .lock()
            .iter()
            .filter_map(|(_, msg)| match msg {
                NorthboundMsg::PacketIn(pkt) => Some(pkt.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A logger writing to the test harness' captured stdout.
pub fn test_logger() -> slog::Logger {
    let dec = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(dec).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("component" => "vnet-test"))
}

pub fn test_ectx() -> ExecCtx {
    ExecCtx { log: Box::new(SlogLog::new(test_logger())) }
}

/// A hypervisor with default settings and the given tenants, each
/// with a derived pool.
pub fn hypervisor(tenants: &[u32]) -> Hypervisor {
    let hv = Hypervisor::new(test_ectx());
    for id in tenants {
        hv.add_tenant(&TenantCfg::new(TenantId::new(*id))).unwrap();
    }
    hv
}

/// A hypervisor with a single tenant using `pool` and `rewrite`.
pub fn hypervisor_with_pool(
    tenant: u32,
    pool: &str,
    rewrite: RewriteMode,
) -> Hypervisor {
    let hv = Hypervisor::new(test_ectx());
    let cfg = TenantCfg {
        id: TenantId::new(tenant),
        pool: Some(pool.parse().unwrap()),
        rewrite,
    };
    hv.add_tenant(&cfg).unwrap();
    hv
}

/// Give `tenant` a virtual switch, [`VDPID`], backed by the physical
/// switches `members`.
pub fn big_switch(
    hv: &Hypervisor,
    tenant: u32,
    members: &[u64],
) -> (Arc<VirtSwitch>, Arc<RecordingChannel>) {
    let chan = RecordingChannel::new();
    let vsw = hv
        .add_virt_switch(
            TenantId::new(tenant),
            VDPID,
            members.iter().map(|m| Dpid::new(*m)),
            chan.clone(),
        )
        .unwrap();
    (vsw, chan)
}

pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

/// A tenant flow from `src` to `dst` going out `port`.
pub fn flow_mod(
    cookie: u64,
    src: &str,
    dst: &str,
    port: u16,
    notify: bool,
) -> FlowMod {
    let m = OfMatch::any()
        .with_dl_type(0x0800)
        .with_nw_src(ip(src))
        .with_nw_dst(ip(dst));
    let mut fm = FlowMod::new(m, 1000);
    fm.cookie = cookie;
    fm.idle_timeout = 30;
    fm.hard_timeout = 300;
    fm.actions.push(OfAction::Output { port, max_len: 0 });
    if notify {
        fm.flags |= FlowModFlags::SEND_FLOW_REM;
    }
    fm
}

/// The flow-removed message a physical switch would send for the
/// physical flow `fm`.
pub fn flow_removed_for(fm: &FlowMod) -> FlowRemoved {
    FlowRemoved {
        cookie: fm.cookie,
        of_match: fm.of_match,
        priority: fm.priority,
        reason: FlowRemovedReason::IdleTimeout,
        duration_sec: 42,
        duration_nsec: 500,
        idle_timeout: fm.idle_timeout,
        packet_count: 12,
        byte_count: 1_200,
    }
}

/// A flow-removed message carrying an arbitrary cookie.
pub fn flow_removed(cookie: FlowCookie) -> FlowRemoved {
    let mut fr = flow_removed_for(&FlowMod::new(OfMatch::any(), 0));
    fr.cookie = cookie.raw();
    fr
}

/// A packet-in from physical `src` to physical `dst`.
pub fn packet_in(src: Ipv4Addr, dst: Ipv4Addr) -> PacketIn {
    PacketIn {
        buffer_id: Some(7),
        in_port: 1,
        reason: PacketInReason::NoMatch,
        pkt_match: OfMatch::any()
            .with_in_port(1)
            .with_dl_type(0x0800)
            .with_nw_src(src)
            .with_nw_dst(dst),
        data: vec![0; 64],
    }
}
