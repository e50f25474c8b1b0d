// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Hypervisor configuration.
//!
//! ```toml
//! tenant_bits = 8
//! flow_table_limit = 8192
//!
//! [[tenants]]
//! id = 1
//!
//! [[tenants]]
//! id = 2
//! pool = "172.30.0.0/16"
//! rewrite = "actions"
//! ```

use crate::api::Ipv4Cidr;
use crate::api::TenantId;
use crate::api::VnetError;
use crate::engine::addr_pool::TENANT_BITS_DEF;
use crate::engine::addr_pool::TENANT_BITS_MAX;
use crate::engine::addr_pool::TENANT_BITS_MIN;
use crate::engine::addr_pool::derive_cidr;
use crate::engine::flow_table::FLOW_TABLE_DEF_MAX_ENTRIES;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;

/// How a tenant's addresses are translated when installing flows.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RewriteMode {
    /// Translate the flow's match in place.
    #[default]
    Match,
    /// Keep the tenant's match and prepend header rewrite actions.
    Actions,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TenantCfg {
    pub id: TenantId,

    /// The physical address pool of the tenant. When absent, the pool
    /// is derived from the tenant id.
    #[serde(default, with = "opt_cidr")]
    pub pool: Option<Ipv4Cidr>,

    #[serde(default)]
    pub rewrite: RewriteMode,
}

impl TenantCfg {
    pub fn new(id: TenantId) -> Self {
        Self { id, pool: None, rewrite: RewriteMode::default() }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VnetCfg {
    /// The number of leading address bits holding the tenant id in
    /// derived pools.
    #[serde(default = "default_tenant_bits")]
    pub tenant_bits: u8,

    /// The maximum number of pending flows per virtual switch.
    #[serde(default = "default_flow_table_limit")]
    pub flow_table_limit: u32,

    #[serde(default)]
    pub tenants: Vec<TenantCfg>,
}

fn default_tenant_bits() -> u8 {
    TENANT_BITS_DEF
}

fn default_flow_table_limit() -> u32 {
    FLOW_TABLE_DEF_MAX_ENTRIES.get()
}

impl Default for VnetCfg {
    fn default() -> Self {
        Self {
            tenant_bits: default_tenant_bits(),
            flow_table_limit: default_flow_table_limit(),
            tenants: vec![],
        }
    }
}

impl VnetCfg {
    /// Parse and validate a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, VnetError> {
        let cfg: Self =
            toml::from_str(s).map_err(|e| VnetError::BadConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The pool a tenant ends up with under this config.
    pub fn tenant_pool(
        &self,
        tenant: &TenantCfg,
    ) -> Result<Ipv4Cidr, VnetError> {
        match tenant.pool {
            Some(cidr) => Ok(cidr),
            None => derive_cidr(tenant.id, self.tenant_bits)
                .map_err(VnetError::BadConfig),
        }
    }

    pub fn validate(&self) -> Result<(), VnetError> {
        if !(TENANT_BITS_MIN..=TENANT_BITS_MAX).contains(&self.tenant_bits) {
            return Err(VnetError::BadConfig(format!(
                "tenant_bits must be between {TENANT_BITS_MIN} and \
                 {TENANT_BITS_MAX}: {}",
                self.tenant_bits
            )));
        }

        if self.flow_table_limit == 0 {
            return Err(VnetError::BadConfig(
                "flow_table_limit must be non-zero".to_string(),
            ));
        }

        let mut ids = BTreeSet::new();
        let mut pools: Vec<(TenantId, Ipv4Cidr)> = vec![];

        for tenant in &self.tenants {
            if !ids.insert(tenant.id) {
                return Err(VnetError::BadConfig(format!(
                    "duplicate tenant {}",
                    tenant.id
                )));
            }

            let pool = self.tenant_pool(tenant)?;
            validate_pool(tenant.id, pool)?;

            if let Some((other, _)) =
                pools.iter().find(|(_, p)| cidrs_overlap(*p, pool))
            {
                return Err(VnetError::BadConfig(format!(
                    "pool {pool} of tenant {} overlaps pool of tenant {other}",
                    tenant.id
                )));
            }
            pools.push((tenant.id, pool));
        }

        Ok(())
    }
}

/// A pool must have at least one address besides the all-zero host.
pub(crate) fn validate_pool(
    tenant: TenantId,
    pool: Ipv4Cidr,
) -> Result<(), VnetError> {
    if pool.prefix_len() > 31 {
        return Err(VnetError::BadConfig(format!(
            "pool {pool} of tenant {tenant} has no usable addresses"
        )));
    }
    Ok(())
}

fn cidrs_overlap(a: Ipv4Cidr, b: Ipv4Cidr) -> bool {
    a.is_member(b.ip()) || b.is_member(a.ip())
}

/// (De)serialize an optional CIDR as a plain string, e.g.
/// `"10.0.0.0/8"`.
mod opt_cidr {
    use crate::api::Ipv4Cidr;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use serde::de::Error;

    pub fn serialize<S>(
        cidr: &Option<Ipv4Cidr>,
        s: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match cidr {
            Some(cidr) => s.collect_str(cidr),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Ipv4Cidr>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|s| s.parse::<Ipv4Cidr>().map_err(D::Error::custom))
            .transpose()
    }
}
