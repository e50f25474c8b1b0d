// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print dumps in a human-friendly manner.

use crate::api::DumpFlowTableResp;
use crate::api::DumpIpMappingsResp;
use crate::api::FlowEntryDump;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpIpMappingsResp`].
pub fn print_ip_mappings(resp: &DumpIpMappingsResp) -> std::io::Result<()> {
    print_ip_mappings_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpIpMappingsResp`] into a given writer.
pub fn print_ip_mappings_into(
    writer: &mut impl Write,
    resp: &DumpIpMappingsResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "IPv4 mappings")?;
    write_hrb(&mut t)?;
    writeln!(t, "TENANT\tVIRTUAL\tPHYSICAL")?;
    for tenant in &resp.mappings {
        for (vip, pip) in &tenant.ip4 {
            writeln!(t, "{}\t{vip}\t{pip}", tenant.tenant)?;
        }
    }
    t.flush()
}

/// Print a [`DumpFlowTableResp`].
pub fn print_flow_table(resp: &DumpFlowTableResp) -> std::io::Result<()> {
    print_flow_table_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpFlowTableResp`] into a given writer.
pub fn print_flow_table_into(
    writer: &mut impl Write,
    resp: &DumpFlowTableResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(
        t,
        "Virtual switch {} (tenant {}) flows: {}/{}",
        resp.dpid,
        resp.tenant,
        resp.flows.len(),
        resp.limit
    )?;
    write_hrb(&mut t)?;
    writeln!(t, "COOKIE\tTENANT COOKIE\tPRIO\tIDLE\tNOTIFY\tMATCH\tACTIONS")?;
    for flow in &resp.flows {
        print_flow(&mut t, flow)?;
    }
    t.flush()
}

fn print_flow(t: &mut impl Write, flow: &FlowEntryDump) -> std::io::Result<()> {
    let fm = &flow.flow_mod;
    let actions = fm
        .actions
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",");

    writeln!(
        t,
        "{}\t{:#x}\t{}\t{}\t{}\t{}\t{}",
        flow.cookie,
        fm.cookie,
        fm.priority,
        fm.idle_timeout,
        fm.has_flag(crate::api::FlowModFlags::SEND_FLOW_REM),
        fm.of_match,
        if actions.is_empty() { "drop" } else { actions.as_str() },
    )
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Dpid;
    use crate::api::FlowCookie;
    use crate::api::FlowMod;
    use crate::api::OfAction;
    use crate::api::OfMatch;
    use crate::api::TenantId;
    use crate::api::TenantIpMapResp;

    #[test]
    fn ip_mappings_table() {
        let resp = DumpIpMappingsResp {
            mappings: vec![TenantIpMapResp {
                tenant: TenantId::new(4),
                ip4: vec![(
                    "10.0.0.1".parse().unwrap(),
                    "4.0.0.1".parse().unwrap(),
                )],
            }],
        };

        let mut out = vec![];
        print_ip_mappings_into(&mut out, &resp).unwrap();
        let out = String::from_utf8(out).unwrap();
        let row = out.lines().last().unwrap();
        let cols: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(cols, ["4", "10.0.0.1", "4.0.0.1"]);
    }

    #[test]
    fn flow_table() {
        let mut fm = FlowMod::new(OfMatch::any().with_in_port(2), 9);
        fm.cookie = 0x10;
        fm.actions.push(OfAction::Output { port: 1, max_len: 0 });
        let resp = DumpFlowTableResp {
            tenant: TenantId::new(1),
            dpid: Dpid::new(0x100),
            limit: 8,
            flows: vec![FlowEntryDump {
                cookie: FlowCookie::new(TenantId::new(1), 1),
                flow_mod: fm,
            }],
        };

        let mut out = vec![];
        print_flow_table_into(&mut out, &resp).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with(
            "Virtual switch 00:00:00:00:00:00:01:00 (tenant 1) flows: 1/8"
        ));
        let row = out.lines().last().unwrap();
        let cols: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(
            cols,
            [
                "0x0000000100000001",
                "0x10",
                "9",
                "0",
                "false",
                "in_port=2",
                "output:1"
            ]
        );
    }
}
