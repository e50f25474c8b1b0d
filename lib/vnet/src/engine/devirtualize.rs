// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Translation of tenant flows onto the physical switches.

use super::Hypervisor;
use super::Result;
use crate::api::Dpid;
use crate::api::FlowMod;
use crate::api::TenantId;
use crate::cfg::RewriteMode;

/// A flow ready to be sent to one physical switch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhysFlowMod {
    pub dpid: Dpid,
    pub flow_mod: FlowMod,
}

impl Hypervisor {
    /// Translate a flow the tenant installs on its virtual switch
    /// `vdpid` into the flows to install on the physical members of
    /// that switch.
    ///
    /// The tenant's flow is recorded in the virtual flow table under a
    /// freshly generated cookie, which is what the physical flows
    /// carry. Nothing is recorded unless translation succeeds.
    ///
    /// # Errors
    ///
    /// * [`VnetError::UnknownTenant`], [`VnetError::SwitchNotFound`]
    /// * [`VnetError::PoolExhausted`]: an address of the flow could
    ///   not be mapped. Do not install anything for this flow.
    /// * [`VnetError::MaxCapacity`]: the virtual flow table is full.
    ///
    /// [`VnetError::UnknownTenant`]: crate::api::VnetError::UnknownTenant
    /// [`VnetError::SwitchNotFound`]: crate::api::VnetError::SwitchNotFound
    /// [`VnetError::PoolExhausted`]: crate::api::VnetError::PoolExhausted
    /// [`VnetError::MaxCapacity`]: crate::api::VnetError::MaxCapacity
    pub fn devirtualize_flow_mod(
        &self,
        tenant: TenantId,
        vdpid: Dpid,
        fm: FlowMod,
    ) -> Result<Vec<PhysFlowMod>> {
        let tmaps = self.mappings.tenant(tenant)?;
        let vsw = tmaps.virt_switch(vdpid)?;

        let mut phys = fm.clone();
        match tmaps.rewrite_mode() {
            RewriteMode::Match => {
                self.mapper.rewrite_match(tenant, &mut phys.of_match)?;
            }

            RewriteMode::Actions => {
                let mut actions =
                    self.mapper.rewrite_actions(tenant, &fm.of_match)?;
                actions.append(&mut phys.actions);
                phys.actions = actions;
            }
        }

        let cookie = vsw.flow_table().add_flow_mod(fm)?;
        phys.cookie = cookie.raw();

        Ok(vsw
            .members()
            .iter()
            .map(|dpid| PhysFlowMod { dpid: *dpid, flow_mod: phys.clone() })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ExecCtx;
    use crate::api::FlowCookie;
    use crate::api::OfAction;
    use crate::api::OfMatch;
    use crate::api::VnetError;
    use crate::cfg::TenantCfg;
    use crate::engine::switch::NorthboundMsg;
    use crate::engine::switch::TenantChannel;
    use crate::provider::PrintlnLog;
    use std::sync::Arc;

    struct NullChan;

    impl TenantChannel for NullChan {
        fn send(&self, _vdpid: Dpid, _msg: NorthboundMsg) {}
    }

    fn hypervisor(rewrite: RewriteMode) -> Hypervisor {
        let hv = Hypervisor::new(ExecCtx { log: Box::new(PrintlnLog) });
        let mut cfg = TenantCfg::new(TenantId::new(1));
        cfg.rewrite = rewrite;
        hv.add_tenant(&cfg).unwrap();
        hv.add_virt_switch(
            TenantId::new(1),
            Dpid::new(0x100),
            [1, 2].map(Dpid::new),
            Arc::new(NullChan),
        )
        .unwrap();
        hv
    }

    fn tenant_flow() -> FlowMod {
        let m = OfMatch::any()
            .with_nw_src("10.0.0.1".parse().unwrap())
            .with_nw_dst("10.0.0.2".parse().unwrap());
        let mut fm = FlowMod::new(m, 100);
        fm.cookie = 0x77;
        fm.actions.push(OfAction::Output { port: 3, max_len: 0 });
        fm
    }

    #[test]
    fn match_mode() {
        let hv = hypervisor(RewriteMode::Match);
        let t1 = TenantId::new(1);
        let out = hv
            .devirtualize_flow_mod(t1, Dpid::new(0x100), tenant_flow())
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].dpid, Dpid::new(1));
        assert_eq!(out[1].dpid, Dpid::new(2));
        let fm = &out[0].flow_mod;
        assert_eq!(fm.of_match.nw_src, "1.0.0.1".parse().unwrap());
        assert_eq!(fm.of_match.nw_dst, "1.0.0.2".parse().unwrap());
        assert_eq!(fm.actions, tenant_flow().actions);

        let cookie = FlowCookie::from_raw(fm.cookie);
        assert_eq!(cookie.tenant(), t1);
        let dump = hv.dump_flow_table(t1, Dpid::new(0x100)).unwrap();
        assert_eq!(dump.flows.len(), 1);
        assert_eq!(dump.flows[0].cookie, cookie);
        assert_eq!(dump.flows[0].flow_mod, tenant_flow());
    }

    #[test]
    fn actions_mode() {
        let hv = hypervisor(RewriteMode::Actions);
        let out = hv
            .devirtualize_flow_mod(
                TenantId::new(1),
                Dpid::new(0x100),
                tenant_flow(),
            )
            .unwrap();

        let fm = &out[0].flow_mod;
        assert_eq!(fm.of_match, tenant_flow().of_match);
        assert_eq!(
            fm.actions,
            vec![
                OfAction::SetNwSrc("1.0.0.1".parse().unwrap()),
                OfAction::SetNwDst("1.0.0.2".parse().unwrap()),
                OfAction::Output { port: 3, max_len: 0 },
            ]
        );
    }

    #[test]
    fn unknown_switch() {
        let hv = hypervisor(RewriteMode::Match);
        let t1 = TenantId::new(1);
        assert_eq!(
            hv.devirtualize_flow_mod(t1, Dpid::new(0x200), tenant_flow()),
            Err(VnetError::SwitchNotFound {
                tenant: t1,
                dpid: Dpid::new(0x200)
            })
        );
        assert_eq!(
            hv.devirtualize_flow_mod(
                TenantId::new(9),
                Dpid::new(0x100),
                tenant_flow()
            ),
            Err(VnetError::UnknownTenant(TenantId::new(9)))
        );
        // Nothing was mapped on the way.
        assert!(hv.dump_ip_mappings().mappings[0].ip4.is_empty());
    }
}
