// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The per-tenant pool of physical IPv4 addresses.

use super::mapping::MapError;
use crate::api::Ipv4Addr;
use crate::api::Ipv4Cidr;
use crate::api::TenantId;
use crate::sync::KMutex;
use std::collections::BTreeSet;

/// The smallest number of tenant bits allowed when deriving a pool
/// from a tenant id.
pub const TENANT_BITS_MIN: u8 = 1;

/// The largest number of tenant bits allowed when deriving a pool
/// from a tenant id. This leaves every tenant at least a /24.
pub const TENANT_BITS_MAX: u8 = 24;

pub const TENANT_BITS_DEF: u8 = 8;

/// A source of unused physical addresses for a single tenant.
///
/// The pool covers one IPv4 prefix. Host offset zero is never handed
/// out, so the all-zero host of the prefix can not be confused with
/// a valid translation.
#[derive(Debug)]
pub struct AddrPool {
    tenant: TenantId,
    cidr: Ipv4Cidr,
    state: KMutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    // Offsets below this mark have been handed out at least once.
    next: u64,
    // Offsets below `next` which have since been released.
    free: BTreeSet<u64>,
    // Offsets at or above `next` which were claimed explicitly.
    reserved: BTreeSet<u64>,
}

impl AddrPool {
    pub fn new(tenant: TenantId, cidr: Ipv4Cidr) -> Self {
        Self {
            tenant,
            cidr,
            state: KMutex::new(PoolState {
                next: 1,
                free: BTreeSet::new(),
                reserved: BTreeSet::new(),
            }),
        }
    }

    /// Derive a pool by placing the tenant id in the upper
    /// `tenant_bits` bits of the address. Pools derived this way for
    /// different tenants never overlap.
    pub fn for_tenant(
        tenant: TenantId,
        tenant_bits: u8,
    ) -> Result<Self, String> {
        Ok(Self::new(tenant, derive_cidr(tenant, tenant_bits)?))
    }

    pub fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Hand out an unused address, preferring previously released
    /// ones.
    ///
    /// # Errors
    ///
    /// [`MapError::PoolExhausted`] when every address is in use.
    pub fn next_ip(&self) -> Result<Ipv4Addr, MapError> {
        let mut state = self.state.lock();

        if let Some(off) = state.free.pop_first() {
            return self.addr(off);
        }

        while state.next < self.cidr.size() {
            let off = state.next;
            state.next += 1;
            if state.reserved.remove(&off) {
                // Claimed explicitly; it is not free to hand out.
                continue;
            }
            return self.addr(off);
        }

        Err(MapError::PoolExhausted(self.tenant))
    }

    /// Claim a specific address. Return `false` if the address is
    /// outside of the pool or already in use.
    pub fn reserve(&self, ip: Ipv4Addr) -> bool {
        let off = match self.cidr.offset_of(ip) {
            Some(off) if off != 0 => off,
            _ => return false,
        };

        let mut state = self.state.lock();
        if off >= state.next {
            state.reserved.insert(off)
        } else {
            state.free.remove(&off)
        }
    }

    /// Return an address to the pool. Return `false` if the address
    /// was not in use.
    pub fn release(&self, ip: Ipv4Addr) -> bool {
        let off = match self.cidr.offset_of(ip) {
            Some(off) if off != 0 => off,
            _ => return false,
        };

        let mut state = self.state.lock();
        if off >= state.next {
            state.reserved.remove(&off)
        } else {
            state.free.insert(off)
        }
    }

    /// The number of addresses which can still be handed out.
    pub fn num_avail(&self) -> u64 {
        let state = self.state.lock();
        (self.cidr.size() - state.next) - state.reserved.len() as u64
            + state.free.len() as u64
    }

    fn addr(&self, off: u64) -> Result<Ipv4Addr, MapError> {
        self.cidr.nth(off).ok_or(MapError::PoolExhausted(self.tenant))
    }
}

/// Compute the prefix owned by `tenant` when the tenant id occupies
/// the upper `tenant_bits` bits of the address.
pub fn derive_cidr(
    tenant: TenantId,
    tenant_bits: u8,
) -> Result<Ipv4Cidr, String> {
    if !(TENANT_BITS_MIN..=TENANT_BITS_MAX).contains(&tenant_bits) {
        return Err(format!(
            "tenant bits must be between {TENANT_BITS_MIN} and \
             {TENANT_BITS_MAX}: {tenant_bits}"
        ));
    }

    if u64::from(tenant.val()) >= 1u64 << tenant_bits {
        return Err(format!(
            "tenant {tenant} does not fit in {tenant_bits} bits"
        ));
    }

    let base = tenant.val() << (32 - u32::from(tenant_bits));
    Ipv4Cidr::new_checked(Ipv4Addr::from(base), tenant_bits)
}

#[cfg(test)]
mod test {
    use super::*;

    fn pool(cidr: &str) -> AddrPool {
        AddrPool::new(TenantId::new(1), cidr.parse().unwrap())
    }

    #[test]
    fn hands_out_hosts_in_order() {
        let pool = pool("10.0.0.0/30");
        assert_eq!(pool.num_avail(), 3);
        assert_eq!(pool.next_ip().unwrap(), "10.0.0.1".parse().unwrap());
        assert_eq!(pool.next_ip().unwrap(), "10.0.0.2".parse().unwrap());
        assert_eq!(pool.next_ip().unwrap(), "10.0.0.3".parse().unwrap());
        assert_eq!(pool.num_avail(), 0);
        assert_eq!(
            pool.next_ip(),
            Err(MapError::PoolExhausted(TenantId::new(1)))
        );
    }

    #[test]
    fn never_hands_out_host_zero() {
        let p31 = pool("10.0.0.4/31");
        assert_eq!(p31.next_ip().unwrap(), "10.0.0.5".parse().unwrap());
        assert!(p31.next_ip().is_err());

        let p32 = pool("10.0.0.4/32");
        assert_eq!(p32.num_avail(), 0);
        assert_eq!(
            p32.next_ip(),
            Err(MapError::PoolExhausted(TenantId::new(1)))
        );
    }

    #[test]
    fn released_addresses_are_reused() {
        let pool = pool("10.0.0.0/30");
        let a = pool.next_ip().unwrap();
        let _b = pool.next_ip().unwrap();
        assert!(pool.release(a));
        assert!(!pool.release(a));
        assert_eq!(pool.num_avail(), 2);
        assert_eq!(pool.next_ip().unwrap(), a);
    }

    #[test]
    fn reserved_addresses_are_skipped() {
        let pool = pool("10.0.0.0/29");
        assert!(pool.reserve("10.0.0.2".parse().unwrap()));
        assert!(!pool.reserve("10.0.0.2".parse().unwrap()));
        assert!(!pool.reserve("10.0.0.0".parse().unwrap()));
        assert!(!pool.reserve("10.0.1.1".parse().unwrap()));
        assert_eq!(pool.num_avail(), 6);

        assert_eq!(pool.next_ip().unwrap(), "10.0.0.1".parse().unwrap());
        assert_eq!(pool.next_ip().unwrap(), "10.0.0.3".parse().unwrap());

        // An address handed out by the pool can't be reserved again.
        assert!(!pool.reserve("10.0.0.1".parse().unwrap()));
        assert!(pool.release("10.0.0.1".parse().unwrap()));
        assert!(pool.reserve("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn derived_pools_are_disjoint() {
        let a = AddrPool::for_tenant(TenantId::new(1), 8).unwrap();
        let b = AddrPool::for_tenant(TenantId::new(2), 8).unwrap();
        assert_eq!(a.cidr(), "1.0.0.0/8".parse().unwrap());
        assert_eq!(b.cidr(), "2.0.0.0/8".parse().unwrap());
        assert!(!a.cidr().is_member(b.cidr().ip()));

        assert!(AddrPool::for_tenant(TenantId::new(256), 8).is_err());
        assert!(AddrPool::for_tenant(TenantId::new(1), 0).is_err());
        assert!(AddrPool::for_tenant(TenantId::new(1), 25).is_err());
    }
}
