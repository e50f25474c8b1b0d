// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The tenant virtualization engine.
//!
//! The [`Hypervisor`] owns the tenant registry and is shared by every
//! physical switch connection. Messages from physical switches go
//! through [`Hypervisor::virtualize`]; flows from tenant controllers
//! go through [`Hypervisor::devirtualize_flow_mod`].
pub mod addr_pool;
pub mod devirtualize;
pub mod flow_table;
pub mod ip_mapper;
pub mod mapping;
pub mod switch;
pub mod virtualize;

use crate::ExecCtx;
use crate::api::DumpFlowTableResp;
use crate::api::DumpIpMappingsResp;
use crate::api::Dpid;
use crate::api::TenantId;
use crate::api::VnetError;
use crate::cfg::TenantCfg;
use crate::cfg::VnetCfg;
use crate::cfg::validate_pool;
use crate::provider::LogLevel;
use addr_pool::AddrPool;
use addr_pool::TENANT_BITS_DEF;
use addr_pool::derive_cidr;
use core::num::NonZeroU32;
use flow_table::FLOW_TABLE_DEF_MAX_ENTRIES;
use ip_mapper::IpMapper;
use mapping::VnetMappings;
use std::sync::Arc;
use switch::TenantChannel;
use switch::VirtSwitch;

pub use devirtualize::PhysFlowMod;
pub use virtualize::SouthboundMsg;
pub use virtualize::VirtOutcome;

type Result<T> = core::result::Result<T, VnetError>;

pub struct Hypervisor {
    ectx: Arc<ExecCtx>,
    mappings: Arc<VnetMappings>,
    mapper: IpMapper,
    tenant_bits: u8,
    ft_limit: NonZeroU32,
}

impl Hypervisor {
    /// Create a hypervisor with no tenants and the default settings.
    pub fn new(ectx: ExecCtx) -> Self {
        Self::with_params(ectx, TENANT_BITS_DEF, FLOW_TABLE_DEF_MAX_ENTRIES)
    }

    fn with_params(
        ectx: ExecCtx,
        tenant_bits: u8,
        ft_limit: NonZeroU32,
    ) -> Self {
        let ectx = Arc::new(ectx);
        let mappings = Arc::new(VnetMappings::new());
        let mapper = IpMapper::new(mappings.clone(), ectx.clone());
        Self { ectx, mappings, mapper, tenant_bits, ft_limit }
    }

    /// Create a hypervisor and provision every tenant in `cfg`.
    pub fn from_cfg(cfg: &VnetCfg, ectx: ExecCtx) -> Result<Self> {
        cfg.validate()?;

        let ft_limit = NonZeroU32::new(cfg.flow_table_limit).ok_or_else(|| {
            VnetError::BadConfig("flow_table_limit must be non-zero".into())
        })?;

        let hv = Self::with_params(ectx, cfg.tenant_bits, ft_limit);
        for tenant in &cfg.tenants {
            hv.add_tenant(tenant)?;
        }
        Ok(hv)
    }

    /// Provision a tenant. Without an explicit pool, the tenant's
    /// pool is derived from its id.
    pub fn add_tenant(&self, cfg: &TenantCfg) -> Result<()> {
        let cidr = match cfg.pool {
            Some(cidr) => cidr,
            None => derive_cidr(cfg.id, self.tenant_bits)
                .map_err(VnetError::BadConfig)?,
        };
        validate_pool(cfg.id, cidr)?;

        let pool = AddrPool::new(cfg.id, cidr);
        self.mappings.add_tenant(cfg.id, pool, cfg.rewrite)?;
        self.ectx.log.log(
            LogLevel::Note,
            &format!(
                "added tenant {} with pool {cidr} ({:?} rewrite)",
                cfg.id, cfg.rewrite
            ),
        );
        Ok(())
    }

    /// Remove a tenant along with all of its mappings, switches, and
    /// pending flows.
    pub fn remove_tenant(&self, tenant: TenantId) -> Result<()> {
        let maps = self.mappings.remove_tenant(tenant)?;
        for vsw in maps.virt_switches() {
            vsw.flow_table().clear();
        }
        self.ectx.log.log(
            LogLevel::Note,
            &format!("removed tenant {tenant}"),
        );
        Ok(())
    }

    /// Create a virtual switch for `tenant` backed by the physical
    /// switches in `members`.
    pub fn add_virt_switch<I>(
        &self,
        tenant: TenantId,
        vdpid: Dpid,
        members: I,
        chan: Arc<dyn TenantChannel>,
    ) -> Result<Arc<VirtSwitch>>
    where
        I: IntoIterator<Item = Dpid>,
    {
        let vsw = Arc::new(VirtSwitch::new(
            tenant,
            vdpid,
            members,
            self.ft_limit,
            chan,
        ));
        self.mappings.add_virt_switch(vsw.clone())?;
        Ok(vsw)
    }

    pub fn mappings(&self) -> &Arc<VnetMappings> {
        &self.mappings
    }

    pub fn mapper(&self) -> &IpMapper {
        &self.mapper
    }

    pub fn tenant_bits(&self) -> u8 {
        self.tenant_bits
    }

    pub fn flow_table_limit(&self) -> NonZeroU32 {
        self.ft_limit
    }

    pub fn dump_ip_mappings(&self) -> DumpIpMappingsResp {
        self.mappings.dump_ip_mappings()
    }

    pub fn dump_flow_table(
        &self,
        tenant: TenantId,
        vdpid: Dpid,
    ) -> Result<DumpFlowTableResp> {
        let vsw = self.mappings.tenant(tenant)?.virt_switch(vdpid)?;
        Ok(vsw.dump_flow_table())
    }
}
