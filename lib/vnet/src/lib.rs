// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Tenant isolation for a sliced switching fabric.
//!
//! One physical fabric is carved into many virtual networks. Each
//! tenant sees its own private IPv4 address space and its own view of
//! flow state; this crate translates between the two worlds. See
//! [`engine::Hypervisor`] for the entry points used by the switch
//! connection handling code.
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]
#![cfg_attr(
    all(feature = "usdt", target_os = "macos", not(usdt_stable_asm_sym)),
    feature(asm_sym)
)]

#[macro_use]
extern crate cfg_if;

pub mod api {
    pub use vnet_api::*;
}
pub mod cfg;
pub mod engine;
pub mod print;
pub mod provider;
pub mod sync;

use provider::LogProvider;

/// The execution context handed to the engine.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}

// ================================================================
// DTrace USDT Provider
//
// Allowing us to use USDT to trace the engine's decisions when
// running in a userland process.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod vnet_provider {
    fn ip__alloc(tenant: u32, vip: &str, pip: &str) {}
    fn ip__alloc__fail(tenant: u32, vip: &str, err: &str) {}
    fn flow__removed(dpid: &str, cookie: u64, outcome: &str) {}
    fn packet__in(dpid: &str, outcome: &str) {}
}
