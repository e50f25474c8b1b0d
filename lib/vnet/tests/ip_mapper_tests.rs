// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Integration tests for tenant address translation.

use std::collections::BTreeSet;
use std::sync::Barrier;
use vnet::api::OfAction;
use vnet::api::OfMatch;
use vnet::api::TenantId;
use vnet::api::VnetError;
use vnet::api::Wildcards;
use vnet::cfg::RewriteMode;
use vnet::engine::ip_mapper::IpMapper;
use vnet::engine::mapping::MapError;
use vnet_test_utils::*;

#[test]
fn translation_is_idempotent() {
    let hv = hypervisor(&[1]);
    let t1 = TenantId::new(1);

    for n in 1..=20u8 {
        let vip = ip(&format!("10.0.0.{n}"));
        let first = hv.mapper().resolve_phys(t1, vip).unwrap();
        for _ in 0..3 {
            assert_eq!(hv.mapper().resolve_phys(t1, vip).unwrap(), first);
        }
        assert_eq!(hv.mappings().get_phys_ip(t1, vip).unwrap(), first);
    }

    let dump = hv.dump_ip_mappings();
    assert_eq!(dump.mappings.len(), 1);
    assert_eq!(dump.mappings[0].ip4.len(), 20);
}

#[test]
fn tenants_are_isolated() {
    let hv = hypervisor(&[1, 2]);
    let t1 = TenantId::new(1);
    let t2 = TenantId::new(2);
    let vip = ip("10.0.0.1");

    let p1 = hv.mapper().resolve_phys(t1, vip).unwrap();
    let p2 = hv.mapper().resolve_phys(t2, vip).unwrap();
    assert_ne!(p1, p2);

    // Each physical address maps back to its own tenant only.
    assert_eq!(hv.mappings().ip_to_tenant(p1), Some((t1, vip)));
    assert_eq!(hv.mappings().ip_to_tenant(p2), Some((t2, vip)));
    assert!(hv.mappings().get_virt_ip(t2, p1).is_err());
    assert!(hv.mappings().get_virt_ip(t1, p2).is_err());
}

#[test]
fn concurrent_first_translation_agrees() {
    const THREADS: usize = 8;
    let hv = hypervisor(&[1]);
    let t1 = TenantId::new(1);
    let barrier = Barrier::new(THREADS);
    let (hv, barrier) = (&hv, &barrier);

    let results: Vec<Vec<_>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(move || {
                    barrier.wait();
                    (1..=16u8)
                        .map(|n| {
                            let vip = ip(&format!("10.1.0.{n}"));
                            hv.mapper().resolve_phys(t1, vip).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for r in &results[1..] {
        assert_eq!(r, &results[0]);
    }

    // Every virtual address got its own physical address and nothing
    // else was taken from the pool.
    let distinct: BTreeSet<_> = results[0].iter().collect();
    assert_eq!(distinct.len(), 16);
    assert_eq!(hv.dump_ip_mappings().mappings[0].ip4.len(), 16);
}

#[test]
fn wildcards_gate_actions() {
    let hv = hypervisor(&[1]);
    let t1 = TenantId::new(1);
    let vdst = ip("10.0.0.2");

    // Source wildcarded, destination concrete.
    let mut m = OfMatch::any().with_nw_dst(vdst);
    m.nw_src = ip("10.0.0.1");
    assert!(m.is_wildcarded(Wildcards::NW_SRC));

    let pdst = hv.mapper().resolve_phys(t1, vdst).unwrap();
    let acts = hv.mapper().rewrite_actions(t1, &m).unwrap();
    assert_eq!(acts, vec![OfAction::SetNwDst(pdst)]);
    // Wildcarded source was never mapped.
    assert!(!hv.mappings().has_phys_ip(t1, ip("10.0.0.1")));

    // The physical-scope equivalent.
    let mut pm = m;
    pm.nw_dst = pdst;
    let acts = IpMapper::unrewrite_actions(&pm);
    assert_eq!(acts, vec![OfAction::SetNwDst(pdst)]);

    // And back with the virtual match.
    assert_eq!(IpMapper::unrewrite_actions(&m), vec![OfAction::SetNwDst(vdst)]);
}

#[test]
fn pool_exhaustion_records_nothing() {
    // A /30 has three usable addresses.
    let hv = hypervisor_with_pool(5, "192.168.50.0/30", RewriteMode::Match);
    let t5 = TenantId::new(5);

    for n in 1..=3u8 {
        hv.mapper().resolve_phys(t5, ip(&format!("10.0.0.{n}"))).unwrap();
    }

    let vip = ip("10.0.0.4");
    assert_eq!(
        hv.mapper().resolve_phys(t5, vip),
        Err(MapError::PoolExhausted(t5))
    );
    assert!(!hv.mappings().has_phys_ip(t5, vip));
    assert_eq!(hv.dump_ip_mappings().mappings[0].ip4.len(), 3);

    // Existing mappings keep working.
    assert_eq!(
        hv.mapper().resolve_phys(t5, ip("10.0.0.1")).unwrap(),
        ip("192.168.50.1")
    );

    // A flow needing a new address is refused without leaving a
    // pending record behind.
    let (vsw, _chan) = big_switch(&hv, 5, &[1]);
    let fm = flow_mod(1, "10.0.0.1", "10.0.0.9", 2, true);
    assert_eq!(
        hv.devirtualize_flow_mod(t5, VDPID, fm),
        Err(VnetError::PoolExhausted(t5))
    );
    assert_eq!(vsw.flow_table().num_flows(), 0);

    // Freeing a mapping makes room again.
    hv.mappings().del_ip_mapping(t5, ip("10.0.0.2")).unwrap();
    assert_eq!(hv.mapper().resolve_phys(t5, vip).unwrap(), ip("192.168.50.2"));
}

#[test]
fn unknown_tenant_is_reported() {
    let hv = hypervisor(&[1]);
    let t3 = TenantId::new(3);
    assert_eq!(
        hv.mapper().resolve_phys(t3, ip("10.0.0.1")),
        Err(MapError::UnknownTenant(t3))
    );

    let mut m = OfMatch::any();
    assert!(hv.mapper().rewrite_match(t3, &mut m).is_err());
    assert_eq!(m, OfMatch::any());
}

#[test]
fn removed_tenant_can_return() {
    let hv = hypervisor(&[1]);
    let t1 = TenantId::new(1);
    hv.mapper().resolve_phys(t1, ip("10.0.0.1")).unwrap();
    let (_vsw, _chan) = big_switch(&hv, 1, &[1, 2]);

    hv.remove_tenant(t1).unwrap();
    assert_eq!(hv.remove_tenant(t1), Err(VnetError::UnknownTenant(t1)));

    hv.add_tenant(&vnet::cfg::TenantCfg::new(t1)).unwrap();
    assert!(!hv.mappings().has_phys_ip(t1, ip("10.0.0.1")));
    let (_vsw, _chan) = big_switch(&hv, 1, &[1, 2]);
}
