// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The tenant mapping registry.
//!
//! This is the process-wide store of virtual to physical mappings,
//! both for IP addresses and for switches. It is partitioned by
//! tenant: every tenant gets a [`TenantMaps`] with its own locks, so
//! work done on behalf of one tenant never waits on another.

use super::addr_pool::AddrPool;
use super::switch::VirtSwitch;
use crate::api::DumpIpMappingsResp;
use crate::api::Dpid;
use crate::api::FlowCookie;
use crate::api::Ipv4Addr;
use crate::api::TenantId;
use crate::api::TenantIpMapResp;
use crate::api::VnetError;
use crate::cfg::RewriteMode;
use crate::sync::KMutex;
use crate::sync::KRwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while translating or looking up tenant state.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum MapError {
    #[error("no available physical IPs for tenant {0}")]
    PoolExhausted(TenantId),

    #[error("no mapping for {0}")]
    MappingNotFound(String),

    #[error("inconsistent physical-virtual mapping: {0}")]
    MappingConflict(String),

    #[error("unknown tenant {0}")]
    UnknownTenant(TenantId),

    #[error("tenant {0} already exists")]
    TenantExists(TenantId),

    #[error("tenant {tenant} already has a virtual switch on {dpid}")]
    SwitchExists { tenant: TenantId, dpid: Dpid },

    #[error("tenant {tenant} has no virtual switch {dpid}")]
    SwitchNotFound { tenant: TenantId, dpid: Dpid },

    #[error("virtual switch {0} has no physical members")]
    NoMembers(Dpid),

    #[error("no flow for cookie {0}")]
    FlowNotFound(FlowCookie),

    #[error("flow table at max capacity: {0}")]
    MaxCapacity(u64),
}

impl From<MapError> for VnetError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::PoolExhausted(tenant) => Self::PoolExhausted(tenant),
            MapError::MappingNotFound(msg) => Self::MappingNotFound(msg),
            MapError::MappingConflict(msg) => Self::MappingConflict(msg),
            MapError::UnknownTenant(tenant) => Self::UnknownTenant(tenant),
            MapError::TenantExists(tenant) => Self::TenantExists(tenant),
            MapError::SwitchExists { tenant, dpid } => {
                Self::SwitchExists { tenant, dpid }
            }
            MapError::SwitchNotFound { tenant, dpid } => {
                Self::SwitchNotFound { tenant, dpid }
            }
            MapError::NoMembers(dpid) => {
                Self::BadConfig(format!("switch {dpid} has no members"))
            }
            MapError::FlowNotFound(cookie) => Self::FlowNotFound(cookie),
            MapError::MaxCapacity(limit) => Self::MaxCapacity(limit),
        }
    }
}

#[derive(Debug, Default)]
struct IpMaps {
    v2p: BTreeMap<Ipv4Addr, Ipv4Addr>,
    p2v: BTreeMap<Ipv4Addr, Ipv4Addr>,
}

#[derive(Default)]
struct SwitchMaps {
    by_phys: BTreeMap<Dpid, Arc<VirtSwitch>>,
    by_virt: BTreeMap<Dpid, Arc<VirtSwitch>>,
}

/// Everything the hypervisor knows about one tenant.
pub struct TenantMaps {
    tenant: TenantId,
    rewrite: RewriteMode,
    pool: Arc<AddrPool>,
    // Lock order: `addrs` before the pool's internal lock.
    addrs: KMutex<IpMaps>,
    switches: KRwLock<SwitchMaps>,
}

impl TenantMaps {
    pub fn new(tenant: TenantId, pool: AddrPool, rewrite: RewriteMode) -> Self {
        Self {
            tenant,
            rewrite,
            pool: Arc::new(pool),
            addrs: KMutex::new(IpMaps::default()),
            switches: KRwLock::new(SwitchMaps::default()),
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn rewrite_mode(&self) -> RewriteMode {
        self.rewrite
    }

    pub fn pool(&self) -> &Arc<AddrPool> {
        &self.pool
    }

    /// Look up the physical address for `vip`, allocating and
    /// recording a fresh one if there is none yet. The second value
    /// is `true` if the mapping was created by this call.
    ///
    /// The check, allocation, and insert happen under the tenant's
    /// address lock, so concurrent translations of the same new
    /// address always agree on the result.
    pub fn get_or_alloc_phys_ip(
        &self,
        vip: Ipv4Addr,
    ) -> Result<(Ipv4Addr, bool), MapError> {
        let mut addrs = self.addrs.lock();

        if let Some(pip) = addrs.v2p.get(&vip) {
            return Ok((*pip, false));
        }

        let pip = self.pool.next_ip()?;
        if let Some(other) = addrs.p2v.get(&pip) {
            // Leave the pool as it was; `pip` still belongs to `other`.
            self.pool.release(pip);
            return Err(MapError::MappingConflict(format!(
                "tenant {} physical {pip} allocated for {vip} but bound \
                 to {other}",
                self.tenant
            )));
        }

        addrs.v2p.insert(vip, pip);
        addrs.p2v.insert(pip, vip);
        Ok((pip, true))
    }

    pub fn has_phys_ip(&self, vip: Ipv4Addr) -> bool {
        self.addrs.lock().v2p.contains_key(&vip)
    }

    pub fn get_phys_ip(&self, vip: Ipv4Addr) -> Result<Ipv4Addr, MapError> {
        self.addrs.lock().v2p.get(&vip).copied().ok_or_else(|| {
            MapError::MappingNotFound(format!(
                "virtual {vip} in tenant {}",
                self.tenant
            ))
        })
    }

    pub fn get_virt_ip(&self, pip: Ipv4Addr) -> Result<Ipv4Addr, MapError> {
        self.addrs.lock().p2v.get(&pip).copied().ok_or_else(|| {
            MapError::MappingNotFound(format!(
                "physical {pip} in tenant {}",
                self.tenant
            ))
        })
    }

    /// Record an explicit mapping. Adding an identical mapping twice
    /// is not an error.
    ///
    /// # Errors
    ///
    /// [`MapError::MappingConflict`] if either address is already
    /// bound to something else, or if `pip` is not available from
    /// this tenant's pool.
    pub fn add_ip_mapping(
        &self,
        pip: Ipv4Addr,
        vip: Ipv4Addr,
    ) -> Result<(), MapError> {
        let mut addrs = self.addrs.lock();

        match (addrs.v2p.get(&vip), addrs.p2v.get(&pip)) {
            (Some(p), Some(v)) if *p == pip && *v == vip => return Ok(()),
            (Some(p), _) => {
                return Err(MapError::MappingConflict(format!(
                    "tenant {} virtual {vip} already bound to {p}",
                    self.tenant
                )));
            }
            (_, Some(v)) => {
                return Err(MapError::MappingConflict(format!(
                    "tenant {} physical {pip} already bound to {v}",
                    self.tenant
                )));
            }
            (None, None) => {}
        }

        if !self.pool.reserve(pip) {
            return Err(MapError::MappingConflict(format!(
                "physical {pip} is not available in pool {} of tenant {}",
                self.pool.cidr(),
                self.tenant
            )));
        }

        addrs.v2p.insert(vip, pip);
        addrs.p2v.insert(pip, vip);
        Ok(())
    }

    /// Remove the mapping for `vip` and return its physical address
    /// to the pool.
    pub fn del_ip_mapping(&self, vip: Ipv4Addr) -> Result<Ipv4Addr, MapError> {
        let mut addrs = self.addrs.lock();

        let pip = addrs.v2p.remove(&vip).ok_or_else(|| {
            MapError::MappingNotFound(format!(
                "virtual {vip} in tenant {}",
                self.tenant
            ))
        })?;
        addrs.p2v.remove(&pip);
        self.pool.release(pip);
        Ok(pip)
    }

    pub fn dump_ip4(&self) -> Vec<(Ipv4Addr, Ipv4Addr)> {
        self.addrs.lock().v2p.iter().map(|(v, p)| (*v, *p)).collect()
    }

    /// Register `vsw` under its own dpid and under each of its
    /// physical members.
    pub fn add_virt_switch(
        &self,
        vsw: Arc<VirtSwitch>,
    ) -> Result<(), MapError> {
        if vsw.members().is_empty() {
            return Err(MapError::NoMembers(vsw.dpid()));
        }

        let mut switches = self.switches.write();

        if switches.by_virt.contains_key(&vsw.dpid()) {
            return Err(MapError::SwitchExists {
                tenant: self.tenant,
                dpid: vsw.dpid(),
            });
        }

        if let Some(dpid) =
            vsw.members().iter().find(|m| switches.by_phys.contains_key(*m))
        {
            return Err(MapError::SwitchExists {
                tenant: self.tenant,
                dpid: *dpid,
            });
        }

        for member in vsw.members() {
            switches.by_phys.insert(*member, vsw.clone());
        }
        switches.by_virt.insert(vsw.dpid(), vsw);
        Ok(())
    }

    pub fn has_virt_switch(&self, phys: Dpid) -> bool {
        self.switches.read().by_phys.contains_key(&phys)
    }

    /// Find the virtual switch backed (possibly among others) by the
    /// physical switch `phys`.
    pub fn get_virt_switch(
        &self,
        phys: Dpid,
    ) -> Result<Arc<VirtSwitch>, MapError> {
        self.switches.read().by_phys.get(&phys).cloned().ok_or_else(|| {
            MapError::MappingNotFound(format!(
                "virtual switch of tenant {} on physical {phys}",
                self.tenant
            ))
        })
    }

    /// Find the virtual switch with the virtual dpid `vdpid`.
    pub fn virt_switch(
        &self,
        vdpid: Dpid,
    ) -> Result<Arc<VirtSwitch>, MapError> {
        self.switches.read().by_virt.get(&vdpid).cloned().ok_or(
            MapError::SwitchNotFound { tenant: self.tenant, dpid: vdpid },
        )
    }

    pub fn virt_switches(&self) -> Vec<Arc<VirtSwitch>> {
        self.switches.read().by_virt.values().cloned().collect()
    }
}

/// The registry of every tenant's mappings.
pub struct VnetMappings {
    tenants: KRwLock<BTreeMap<TenantId, Arc<TenantMaps>>>,
}

impl Default for VnetMappings {
    fn default() -> Self {
        Self::new()
    }
}

impl VnetMappings {
    pub fn new() -> Self {
        Self { tenants: KRwLock::new(BTreeMap::new()) }
    }

    /// Provision a new tenant.
    ///
    /// # Errors
    ///
    /// * [`MapError::TenantExists`]
    /// * [`MapError::MappingConflict`]: `pool` overlaps the pool of an
    ///   existing tenant.
    pub fn add_tenant(
        &self,
        tenant: TenantId,
        pool: AddrPool,
        rewrite: RewriteMode,
    ) -> Result<Arc<TenantMaps>, MapError> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&tenant) {
            return Err(MapError::TenantExists(tenant));
        }

        let cidr = pool.cidr();
        if let Some(other) = tenants.values().find(|t| {
            let other = t.pool().cidr();
            other.is_member(cidr.ip()) || cidr.is_member(other.ip())
        }) {
            return Err(MapError::MappingConflict(format!(
                "pool {cidr} of tenant {tenant} overlaps pool {} of \
                 tenant {}",
                other.pool().cidr(),
                other.tenant()
            )));
        }

        let maps = Arc::new(TenantMaps::new(tenant, pool, rewrite));
        tenants.insert(tenant, maps.clone());
        Ok(maps)
    }

    /// Remove a tenant along with all of its mappings and switches.
    pub fn remove_tenant(
        &self,
        tenant: TenantId,
    ) -> Result<Arc<TenantMaps>, MapError> {
        self.tenants
            .write()
            .remove(&tenant)
            .ok_or(MapError::UnknownTenant(tenant))
    }

    pub fn has_tenant(&self, tenant: TenantId) -> bool {
        self.tenants.read().contains_key(&tenant)
    }

    /// Get the maps of `tenant`. The registry lock is only held for
    /// the lookup itself.
    pub fn tenant(
        &self,
        tenant: TenantId,
    ) -> Result<Arc<TenantMaps>, MapError> {
        self.tenants
            .read()
            .get(&tenant)
            .cloned()
            .ok_or(MapError::UnknownTenant(tenant))
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.tenants.read().keys().copied().collect()
    }

    pub fn get_tenant_addr_pool(
        &self,
        tenant: TenantId,
    ) -> Result<Arc<AddrPool>, MapError> {
        Ok(self.tenant(tenant)?.pool().clone())
    }

    pub fn has_phys_ip(&self, tenant: TenantId, vip: Ipv4Addr) -> bool {
        self.tenant(tenant).is_ok_and(|t| t.has_phys_ip(vip))
    }

    pub fn get_phys_ip(
        &self,
        tenant: TenantId,
        vip: Ipv4Addr,
    ) -> Result<Ipv4Addr, MapError> {
        self.tenant(tenant)?.get_phys_ip(vip)
    }

    pub fn get_or_alloc_phys_ip(
        &self,
        tenant: TenantId,
        vip: Ipv4Addr,
    ) -> Result<(Ipv4Addr, bool), MapError> {
        self.tenant(tenant)?.get_or_alloc_phys_ip(vip)
    }

    pub fn add_ip_mapping(
        &self,
        tenant: TenantId,
        pip: Ipv4Addr,
        vip: Ipv4Addr,
    ) -> Result<(), MapError> {
        self.tenant(tenant)?.add_ip_mapping(pip, vip)
    }

    pub fn del_ip_mapping(
        &self,
        tenant: TenantId,
        vip: Ipv4Addr,
    ) -> Result<Ipv4Addr, MapError> {
        self.tenant(tenant)?.del_ip_mapping(vip)
    }

    pub fn get_virt_ip(
        &self,
        tenant: TenantId,
        pip: Ipv4Addr,
    ) -> Result<Ipv4Addr, MapError> {
        self.tenant(tenant)?.get_virt_ip(pip)
    }

    /// Map a physical IP back to the tenant owning it, along with the
    /// tenant's virtual address for it.
    ///
    /// Tenant pools never overlap, so at most one tenant can own a
    /// given physical address.
    pub fn ip_to_tenant(&self, pip: Ipv4Addr) -> Option<(TenantId, Ipv4Addr)> {
        let owner = self
            .tenants
            .read()
            .values()
            .find(|t| t.pool().cidr().is_member(pip))
            .cloned()?;

        owner.get_virt_ip(pip).ok().map(|vip| (owner.tenant(), vip))
    }

    pub fn add_virt_switch(
        &self,
        vsw: Arc<VirtSwitch>,
    ) -> Result<(), MapError> {
        self.tenant(vsw.tenant())?.add_virt_switch(vsw)
    }

    pub fn has_virt_switch(&self, phys: Dpid, tenant: TenantId) -> bool {
        self.tenant(tenant).is_ok_and(|t| t.has_virt_switch(phys))
    }

    pub fn get_virt_switch(
        &self,
        phys: Dpid,
        tenant: TenantId,
    ) -> Result<Arc<VirtSwitch>, MapError> {
        self.tenant(tenant)?.get_virt_switch(phys)
    }

    /// Iterate all tenants and produce a [`DumpIpMappingsResp`].
    pub fn dump_ip_mappings(&self) -> DumpIpMappingsResp {
        let tenants: Vec<Arc<TenantMaps>> =
            self.tenants.read().values().cloned().collect();

        DumpIpMappingsResp {
            mappings: tenants
                .iter()
                .map(|t| TenantIpMapResp {
                    tenant: t.tenant(),
                    ip4: t.dump_ip4(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::switch::NorthboundMsg;
    use crate::engine::switch::TenantChannel;
    use core::num::NonZeroU32;

    struct NullChan;

    impl TenantChannel for NullChan {
        fn send(&self, _vdpid: Dpid, _msg: NorthboundMsg) {}
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn registry() -> VnetMappings {
        let maps = VnetMappings::new();
        for id in [1, 2] {
            let tenant = TenantId::new(id);
            let pool = AddrPool::for_tenant(tenant, 8).unwrap();
            maps.add_tenant(tenant, pool, RewriteMode::Match).unwrap();
        }
        maps
    }

    fn vsw(tenant: u32, dpid: u64, members: &[u64]) -> Arc<VirtSwitch> {
        Arc::new(VirtSwitch::new(
            TenantId::new(tenant),
            Dpid::new(dpid),
            members.iter().map(|m| Dpid::new(*m)),
            NonZeroU32::new(16).unwrap(),
            Arc::new(NullChan),
        ))
    }

    #[test]
    fn alloc_is_recorded_once() {
        let maps = registry();
        let t1 = TenantId::new(1);
        let vip = ip("10.0.0.1");

        assert!(!maps.has_phys_ip(t1, vip));
        let (pip, new) = maps.get_or_alloc_phys_ip(t1, vip).unwrap();
        assert!(new);
        assert_eq!(pip, ip("1.0.0.1"));
        assert_eq!(maps.get_or_alloc_phys_ip(t1, vip).unwrap(), (pip, false));
        assert!(maps.has_phys_ip(t1, vip));
        assert_eq!(maps.get_phys_ip(t1, vip).unwrap(), pip);
        assert_eq!(maps.get_virt_ip(t1, pip).unwrap(), vip);
        assert_eq!(maps.ip_to_tenant(pip), Some((t1, vip)));
    }

    #[test]
    fn unknown_tenant() {
        let maps = registry();
        let t9 = TenantId::new(9);
        assert_eq!(
            maps.get_or_alloc_phys_ip(t9, ip("10.0.0.1")),
            Err(MapError::UnknownTenant(t9))
        );
        assert!(matches!(
            maps.get_tenant_addr_pool(t9),
            Err(MapError::UnknownTenant(_))
        ));
        assert!(!maps.has_phys_ip(t9, ip("10.0.0.1")));
    }

    #[test]
    fn explicit_mappings_conflict() {
        let maps = registry();
        let t1 = TenantId::new(1);
        let (vip, pip) = (ip("10.0.0.5"), ip("1.0.0.5"));

        maps.add_ip_mapping(t1, pip, vip).unwrap();
        // Same pair again is fine.
        maps.add_ip_mapping(t1, pip, vip).unwrap();

        assert!(matches!(
            maps.add_ip_mapping(t1, ip("1.0.0.6"), vip),
            Err(MapError::MappingConflict(_))
        ));
        assert!(matches!(
            maps.add_ip_mapping(t1, pip, ip("10.0.0.6")),
            Err(MapError::MappingConflict(_))
        ));
        // Outside of the tenant's pool.
        assert!(matches!(
            maps.add_ip_mapping(t1, ip("2.0.0.1"), ip("10.0.0.7")),
            Err(MapError::MappingConflict(_))
        ));

        // The explicitly mapped address is never handed out.
        for n in 1..10 {
            let vip = Ipv4Addr::from([172, 16, 0, n]);
            let (p, _) = maps.get_or_alloc_phys_ip(t1, vip).unwrap();
            assert_ne!(p, pip);
        }
    }

    #[test]
    fn alloc_conflict_leaves_pool_alone() {
        let maps = registry();
        let t1 = TenantId::new(1);
        let pool = maps.get_tenant_addr_pool(t1).unwrap();

        let (p1, _) = maps.get_or_alloc_phys_ip(t1, ip("10.0.0.1")).unwrap();
        // Hand the address back behind the registry's back so the next
        // allocation collides with the existing binding.
        assert!(pool.release(p1));
        let before = pool.num_avail();

        assert!(matches!(
            maps.get_or_alloc_phys_ip(t1, ip("10.0.0.2")),
            Err(MapError::MappingConflict(_))
        ));
        assert_eq!(pool.num_avail(), before);
        assert!(!maps.has_phys_ip(t1, ip("10.0.0.2")));
        assert_eq!(maps.get_phys_ip(t1, ip("10.0.0.1")).unwrap(), p1);
        assert_eq!(maps.get_virt_ip(t1, p1).unwrap(), ip("10.0.0.1"));
    }

    #[test]
    fn delete_releases_address() {
        let maps = registry();
        let t1 = TenantId::new(1);
        let pool = maps.get_tenant_addr_pool(t1).unwrap();
        let before = pool.num_avail();

        let (pip, _) = maps.get_or_alloc_phys_ip(t1, ip("10.0.0.1")).unwrap();
        assert_eq!(pool.num_avail(), before - 1);
        assert_eq!(maps.del_ip_mapping(t1, ip("10.0.0.1")).unwrap(), pip);
        assert_eq!(pool.num_avail(), before);
        assert!(maps.get_virt_ip(t1, pip).is_err());
        assert!(maps.del_ip_mapping(t1, ip("10.0.0.1")).is_err());
    }

    #[test]
    fn virt_switch_registration() {
        let maps = registry();
        let t1 = TenantId::new(1);
        let t2 = TenantId::new(2);

        maps.add_virt_switch(vsw(1, 0x100, &[1, 2, 3])).unwrap();
        // A different tenant may share the physical switches.
        maps.add_virt_switch(vsw(2, 0x100, &[1])).unwrap();

        for phys in [1, 2, 3] {
            assert!(maps.has_virt_switch(Dpid::new(phys), t1));
            let found = maps.get_virt_switch(Dpid::new(phys), t1).unwrap();
            assert_eq!(found.dpid(), Dpid::new(0x100));
            assert!(found.is_big_switch());
        }
        assert!(!maps.has_virt_switch(Dpid::new(2), t2));
        assert!(maps.get_virt_switch(Dpid::new(2), t2).is_err());

        assert_eq!(
            maps.add_virt_switch(vsw(1, 0x200, &[3, 4])),
            Err(MapError::SwitchExists { tenant: t1, dpid: Dpid::new(3) })
        );
        assert_eq!(
            maps.add_virt_switch(vsw(1, 0x100, &[5])),
            Err(MapError::SwitchExists { tenant: t1, dpid: Dpid::new(0x100) })
        );
        assert_eq!(
            maps.add_virt_switch(vsw(1, 0x300, &[])),
            Err(MapError::NoMembers(Dpid::new(0x300)))
        );
        assert!(!maps.has_virt_switch(Dpid::new(4), t1));
    }

    #[test]
    fn overlapping_pools_rejected() {
        let maps = registry();
        let t3 = TenantId::new(3);
        let pool = AddrPool::new(t3, "1.2.0.0/16".parse().unwrap());
        assert!(matches!(
            maps.add_tenant(t3, pool, RewriteMode::Match),
            Err(MapError::MappingConflict(_))
        ));

        let pool = AddrPool::for_tenant(TenantId::new(1), 8).unwrap();
        assert!(matches!(
            maps.add_tenant(TenantId::new(1), pool, RewriteMode::Match),
            Err(MapError::TenantExists(_))
        ));
        assert!(!maps.has_tenant(t3));
    }

    #[test]
    fn remove_tenant_drops_everything() {
        let maps = registry();
        let t1 = TenantId::new(1);
        maps.get_or_alloc_phys_ip(t1, ip("10.0.0.1")).unwrap();
        maps.add_virt_switch(vsw(1, 0x100, &[1])).unwrap();

        maps.remove_tenant(t1).unwrap();
        assert!(!maps.has_tenant(t1));
        assert!(!maps.has_virt_switch(Dpid::new(1), t1));
        assert_eq!(maps.ip_to_tenant(ip("1.0.0.1")), None);
        assert!(matches!(
            maps.remove_tenant(t1),
            Err(MapError::UnknownTenant(_))
        ));
        assert_eq!(maps.tenant_ids(), vec![TenantId::new(2)]);
    }
}
