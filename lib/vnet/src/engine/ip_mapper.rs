// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Translation of tenant IP addresses.
//!
//! A tenant's virtual addresses are mapped lazily: the first time an
//! address is seen it is assigned an address from the tenant's pool,
//! and that assignment sticks for as long as the mapping exists.
//! Address space is only consumed by addresses a tenant actually
//! uses.

use super::mapping::MapError;
use super::mapping::VnetMappings;
use crate::ExecCtx;
use crate::api::Ipv4Addr;
use crate::api::OfAction;
use crate::api::OfMatch;
use crate::api::TenantId;
use crate::api::Wildcards;
use crate::provider::LogLevel;
use std::sync::Arc;

type Result<T> = core::result::Result<T, MapError>;

/// Map tenant addresses onto the physical network and back.
pub struct IpMapper {
    mappings: Arc<VnetMappings>,
    ectx: Arc<ExecCtx>,
}

impl IpMapper {
    pub fn new(mappings: Arc<VnetMappings>, ectx: Arc<ExecCtx>) -> Self {
        Self { mappings, ectx }
    }

    /// Return the physical address of `vip` in `tenant`, assigning
    /// one from the tenant's pool if this is the first time `vip` is
    /// seen.
    ///
    /// Repeated calls for the same address return the same result for
    /// the life of the mapping.
    ///
    /// # Errors
    ///
    /// * [`MapError::PoolExhausted`]: the tenant's pool has no address
    ///   left. Nothing is recorded.
    /// * [`MapError::MappingConflict`]: the registry already binds the
    ///   newly assigned address to some other virtual address.
    /// * [`MapError::UnknownTenant`]
    pub fn resolve_phys(
        &self,
        tenant: TenantId,
        vip: Ipv4Addr,
    ) -> Result<Ipv4Addr> {
        match self.mappings.get_or_alloc_phys_ip(tenant, vip) {
            Ok((pip, allocated)) => {
                if allocated {
                    self.ip_alloc_probe(tenant, vip, pip);
                }
                Ok(pip)
            }

            Err(e) => {
                match &e {
                    MapError::PoolExhausted(_) => self.ectx.log.log(
                        LogLevel::Error,
                        &format!(
                            "no available physical IPs for virtual ip {vip} \
                             in tenant {tenant}"
                        ),
                    ),

                    MapError::MappingConflict(msg) => self.ectx.log.log(
                        LogLevel::Error,
                        &format!(
                            "inconsistent physical-virtual mapping: {msg}"
                        ),
                    ),

                    _ => self.ectx.log.log(
                        LogLevel::Warn,
                        &format!(
                            "failed to map virtual ip {vip} in tenant \
                             {tenant}: {e}"
                        ),
                    ),
                }
                self.ip_alloc_fail_probe(tenant, vip, &e);
                Err(e)
            }
        }
    }

    /// Replace the source and destination addresses of `m` with their
    /// physical counterparts.
    ///
    /// Wildcards are not consulted: a match always carries concrete
    /// address values and those must land in physical space too.
    /// Both addresses are resolved before either is written, so on
    /// error `m` is left untouched.
    pub fn rewrite_match(
        &self,
        tenant: TenantId,
        m: &mut OfMatch,
    ) -> Result<()> {
        let src = self.resolve_phys(tenant, m.nw_src)?;
        let dst = self.resolve_phys(tenant, m.nw_dst)?;
        m.nw_src = src;
        m.nw_dst = dst;
        Ok(())
    }

    /// Build the actions which rewrite the non-wildcarded addresses
    /// of `m` to their physical values. The source action, if any,
    /// comes first.
    pub fn rewrite_actions(
        &self,
        tenant: TenantId,
        m: &OfMatch,
    ) -> Result<Vec<OfAction>> {
        let mut actions = Vec::with_capacity(2);

        if !m.is_wildcarded(Wildcards::NW_SRC) {
            let src = self.resolve_phys(tenant, m.nw_src)?;
            actions.push(OfAction::SetNwSrc(src));
        }

        if !m.is_wildcarded(Wildcards::NW_DST) {
            let dst = self.resolve_phys(tenant, m.nw_dst)?;
            actions.push(OfAction::SetNwDst(dst));
        }

        Ok(actions)
    }

    /// Build the actions which set the non-wildcarded addresses back
    /// to the values carried by `m`, the match as the tenant wrote it.
    /// The source action, if any, comes first.
    pub fn unrewrite_actions(m: &OfMatch) -> Vec<OfAction> {
        let mut actions = Vec::with_capacity(2);

        if !m.is_wildcarded(Wildcards::NW_SRC) {
            actions.push(OfAction::SetNwSrc(m.nw_src));
        }

        if !m.is_wildcarded(Wildcards::NW_DST) {
            actions.push(OfAction::SetNwDst(m.nw_dst));
        }

        actions
    }

    fn ip_alloc_probe(&self, tenant: TenantId, vip: Ipv4Addr, pip: Ipv4Addr) {
        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let vip_s = vip.to_string();
                let pip_s = pip.to_string();
                crate::vnet_provider::ip__alloc!(
                    || (tenant.val(), vip_s, pip_s)
                );
            } else {
                let (_, _, _) = (tenant, vip, pip);
            }
        }
    }

    fn ip_alloc_fail_probe(
        &self,
        tenant: TenantId,
        vip: Ipv4Addr,
        err: &MapError,
    ) {
        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let vip_s = vip.to_string();
                let err_s = err.to_string();
                crate::vnet_provider::ip__alloc__fail!(
                    || (tenant.val(), vip_s, err_s)
                );
            } else {
                let (_, _, _) = (tenant, vip, err);
            }
        }
    }
}
