// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The virtual flow table.
//!
//! Every virtual switch keeps a record of the flows its tenant has
//! installed through it and which may still produce a flow-removed
//! notification. The record is keyed by the hypervisor cookie that
//! was installed on the physical switches in place of the tenant's
//! own cookie.

use super::mapping::MapError;
use crate::api::FlowCookie;
use crate::api::FlowEntryDump;
use crate::api::FlowMod;
use crate::api::TenantId;
use crate::sync::KMutex;
use core::num::NonZeroU32;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

pub const FLOW_TABLE_DEF_MAX_ENTRIES: NonZeroU32 =
    NonZeroU32::new(8192).unwrap();

type Result<T> = core::result::Result<T, MapError>;

/// A flow the tenant asked for, exactly as the tenant asked for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingFlowMod {
    flow_mod: FlowMod,
}

impl PendingFlowMod {
    pub fn new(flow_mod: FlowMod) -> Self {
        Self { flow_mod }
    }

    /// The cookie the tenant chose for this flow.
    pub fn cookie(&self) -> u64 {
        self.flow_mod.cookie
    }

    pub fn flow_mod(&self) -> &FlowMod {
        &self.flow_mod
    }
}

#[derive(Debug)]
struct FlowTableInner {
    map: BTreeMap<FlowCookie, PendingFlowMod>,
    // The next never used flow id.
    next_id: u32,
    // Flow ids given back by removed flows.
    free_ids: BTreeSet<u32>,
}

#[derive(Debug)]
pub struct VirtFlowTable {
    tenant: TenantId,
    limit: NonZeroU32,
    inner: KMutex<FlowTableInner>,
}

impl VirtFlowTable {
    pub fn new(tenant: TenantId, limit: NonZeroU32) -> Self {
        Self {
            tenant,
            limit,
            inner: KMutex::new(FlowTableInner {
                map: BTreeMap::new(),
                next_id: 1,
                free_ids: BTreeSet::new(),
            }),
        }
    }

    /// Record `flow_mod` and return the cookie to install on the
    /// physical switches in its place.
    ///
    /// # Errors
    ///
    /// If the table is at max capacity, an error is returned and no
    /// modification is made to the table.
    pub fn add_flow_mod(&self, flow_mod: FlowMod) -> Result<FlowCookie> {
        let mut inner = self.inner.lock();

        if inner.map.len() >= self.limit.get() as usize {
            return Err(MapError::MaxCapacity(u64::from(self.limit.get())));
        }

        let id = match inner.free_ids.pop_first() {
            Some(id) => id,
            None => {
                // The limit is a u32, so the table fills up long
                // before the id space runs out.
                let id = inner.next_id;
                inner.next_id += 1;
                id
            }
        };

        let cookie = FlowCookie::new(self.tenant, id);
        inner.map.insert(cookie, PendingFlowMod::new(flow_mod));
        Ok(cookie)
    }

    pub fn has_flow_mod(&self, cookie: FlowCookie) -> bool {
        self.inner.lock().map.contains_key(&cookie)
    }

    pub fn get_flow_mod(&self, cookie: FlowCookie) -> Result<PendingFlowMod> {
        self.inner
            .lock()
            .map
            .get(&cookie)
            .cloned()
            .ok_or(MapError::FlowNotFound(cookie))
    }

    /// Remove and return the record for `cookie`.
    ///
    /// Exactly one caller can take a given record, no matter how many
    /// race for it.
    ///
    /// # Errors
    ///
    /// [`MapError::FlowNotFound`] if there is no record, including
    /// when another caller already took it.
    pub fn take_flow_mod(&self, cookie: FlowCookie) -> Result<PendingFlowMod> {
        let mut inner = self.inner.lock();
        let pending =
            inner.map.remove(&cookie).ok_or(MapError::FlowNotFound(cookie))?;
        inner.free_ids.insert(cookie.flow_id());
        Ok(pending)
    }

    pub fn num_flows(&self) -> u32 {
        self.inner.lock().map.len() as u32
    }

    pub fn limit(&self) -> NonZeroU32 {
        self.limit
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.free_ids.clear();
        inner.next_id = 1;
    }

    pub fn dump(&self) -> Vec<FlowEntryDump> {
        let inner = self.inner.lock();
        let mut flows = Vec::with_capacity(inner.map.len());
        for (cookie, pending) in &inner.map {
            flows.push(FlowEntryDump {
                cookie: *cookie,
                flow_mod: pending.flow_mod().clone(),
            });
        }
        flows
    }
}
