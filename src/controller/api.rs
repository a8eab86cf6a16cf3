/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use serde_json::{json, Value};

use super::model::*;
use super::store::Store;
use super::{now_ms, EmbeddedNetworkController, CONTROLLER_API_VERSION};
use crate::crypto::random;
use crate::identity::Identity;
use crate::inetaddress::InetAddress;
use crate::Address;

fn parse_network_id(s: &str) -> Option<u64> {
    if s.len() == 16 {
        u64::from_str_radix(s, 16).ok()
    } else {
        None
    }
}

fn parse_member_address(s: &str) -> Option<Address> {
    if s.len() == 10 {
        Address::from_str(s).ok()
    } else {
        None
    }
}

/// Parse "ip/suffix" where the suffix is netmask bits or a gateway metric.
fn parse_ip_slash(s: &str) -> Option<(IpAddr, u32)> {
    let (ip_s, suffix_s) = s.rsplit_once('/')?;
    let ip = IpAddr::from_str(ip_s).ok()?;
    let suffix = suffix_s.parse::<u32>().ok()?;
    Some((ip, suffix))
}

fn ip_version_of(ip: &IpAddr) -> u8 {
    if ip.is_ipv4() {
        4
    } else {
        6
    }
}

impl<S: Store> EmbeddedNetworkController<S> {
    pub(super) fn cp_get(&self, path: &[&str]) -> (u16, String) {
        if path.first() != Some(&"network") {
            // Controller status: lets a client discover that this node runs
            // a controller and which API it speaks.
            return (
                200,
                json!({"controller": true, "apiVersion": CONTROLLER_API_VERSION, "clock": now_ms()}).to_string(),
            );
        }

        let store = self.store.lock();
        match path {
            ["network"] => {
                let ids: Vec<String> = store.list_networks().iter().map(|id| format!("{:0>16x}", id)).collect();
                (200, serde_json::to_string(&ids).unwrap())
            }
            ["network", nwid_s] => match parse_network_id(nwid_s).and_then(|id| store.get_network(id)) {
                Some(network) => (200, Self::network_json(&*store, &network).to_string()),
                None => (404, String::new()),
            },
            ["network", nwid_s, "member", addr_s] => {
                let found = parse_network_id(nwid_s).zip(parse_member_address(addr_s)).and_then(|(nwid, addr)| {
                    store.get_member(nwid, addr).map(|m| Self::member_json(&*store, &m))
                });
                match found {
                    Some(body) => (200, body.to_string()),
                    None => (404, String::new()),
                }
            }
            _ => (404, String::new()),
        }
    }

    pub(super) fn cp_post(&self, path: &[&str], body: &str) -> (u16, String) {
        if path.first() != Some(&"network") {
            return (404, String::new());
        }

        // POST /network/<nwid>/member/<addr>
        if path.len() == 4 && path[2] == "member" {
            let (Some(nwid), Some(addr)) = (parse_network_id(path[1]), parse_member_address(path[3])) else {
                return (404, String::new());
            };
            {
                let mut store = self.store.lock();
                let Some(mut network) = store.get_network(nwid) else {
                    return (404, String::new());
                };
                let mut member = store.get_member(nwid, addr).unwrap_or(MemberRecord {
                    network_id: nwid,
                    node_id: addr,
                    authorized: false,
                    active_bridge: false,
                });

                if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
                    if let Some(v) = obj.get("authorized").and_then(Value::as_bool) {
                        member.authorized = v;
                    }
                    if let Some(v) = obj.get("activeBridge").and_then(Value::as_bool) {
                        member.active_bridge = v;
                    }
                    if let Some(list) = obj.get("ipAssignments").and_then(Value::as_array) {
                        store.delete_ip_assignments_for_member(nwid, addr);
                        for entry in list {
                            let Some((ip, bits)) = entry.as_str().and_then(parse_ip_slash) else {
                                continue;
                            };
                            let assignment = IpAssignmentRecord {
                                network_id: nwid,
                                node_id: addr,
                                ip,
                                netmask_bits: bits.min(255) as u8,
                                ip_version: ip_version_of(&ip),
                            };
                            if store.put_ip_assignment(assignment).is_err() {
                                return (500, String::new());
                            }
                        }
                    }
                }
                store.put_member(member);

                network.revision += 1;
                store.put_network(network);
            }
            return self.cp_get(path);
        }

        // POST /network/<nwid> including the ##########______ mint form.
        if path.len() != 2 || path[1].len() != 16 {
            return (404, String::new());
        }
        let seg = path[1];
        let existing_id = parse_network_id(seg);
        let minting = seg.ends_with("______") && u64::from_str_radix(&seg[..10], 16).is_ok();
        if existing_id.is_none() && !minting {
            return (404, String::new());
        }

        let final_id;
        {
            let mut store = self.store.lock();

            let (mut network, old_revision) = match existing_id.and_then(|id| store.get_network(id)) {
                Some(n) => {
                    let rev = n.revision;
                    (n, rev)
                }
                None => {
                    let id = if minting {
                        let prefix_addr = u64::from_str_radix(&seg[..10], 16).unwrap();
                        if prefix_addr != self.signing_id.address.to_u64() {
                            return (403, String::new());
                        }
                        let prefix = prefix_addr << 24;
                        let mut postfix = random::next_u64_secure() & 0xff_ffff;
                        let first_tried = postfix;
                        loop {
                            let try_id = prefix | postfix;
                            if store.get_network(try_id).is_none() {
                                break try_id;
                            }
                            postfix = (postfix + 1) & 0xff_ffff;
                            if postfix == first_tried {
                                // Out of IDs under this prefix. You should
                                // not be hosting sixteen million networks on
                                // one controller.
                                return (503, String::new());
                            }
                        }
                    } else {
                        existing_id.unwrap()
                    };
                    (NetworkRecord::new(id, now_ms()), 0)
                }
            };
            final_id = network.id;

            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
                if let Some(v) = obj.get("name").and_then(Value::as_str) {
                    if !v.is_empty() {
                        network.name = v.to_string();
                    }
                }
                if let Some(v) = obj.get("private").and_then(Value::as_bool) {
                    network.private = v;
                }
                if let Some(v) = obj.get("enableBroadcast").and_then(Value::as_bool) {
                    network.enable_broadcast = v;
                }
                if let Some(v) = obj.get("allowPassiveBridging").and_then(Value::as_bool) {
                    network.allow_passive_bridging = v;
                }
                if let Some(v) = obj.get("v4AssignMode").and_then(Value::as_str) {
                    network.v4_assign_mode = v.to_string();
                }
                if let Some(v) = obj.get("v6AssignMode").and_then(Value::as_str) {
                    network.v6_assign_mode = v.to_string();
                }
                if let Some(v) = obj.get("multicastLimit").and_then(Value::as_u64) {
                    network.multicast_limit = v.min(u32::MAX as u64) as u32;
                }

                if let Some(list) = obj.get("relays").and_then(Value::as_array) {
                    let mut by_node: BTreeMap<Address, InetAddress> = BTreeMap::new();
                    for relay in list {
                        let address = relay.get("address").and_then(Value::as_str).and_then(|s| Address::from_str(s).ok());
                        let phy = relay.get("phyAddress").and_then(Value::as_str).and_then(|s| InetAddress::from_str(s).ok());
                        if let (Some(a), Some(p)) = (address, phy) {
                            by_node.insert(a, p);
                        }
                    }
                    store.replace_relays(
                        final_id,
                        by_node
                            .into_iter()
                            .map(|(node_id, phy_address)| RelayRecord { network_id: final_id, node_id, phy_address })
                            .collect(),
                    );
                }

                if let Some(list) = obj.get("routes").and_then(Value::as_array) {
                    let mut routes = Vec::new();
                    for route in list {
                        let node_id = route.get("nodeId").and_then(Value::as_str).and_then(|s| Address::from_str(s).ok());
                        let net = route.get("network").and_then(Value::as_str).and_then(|s| IpAddr::from_str(s).ok());
                        let bits = route.get("netmaskBits").and_then(Value::as_u64).unwrap_or(0);
                        if let Some(ip) = net {
                            let ipv = ip_version_of(&ip);
                            let max_bits = if ipv == 4 { 32 } else { 128 };
                            if bits > 0 && bits < max_bits {
                                routes.push(RouteRecord { network_id: final_id, node_id, ip, netmask_bits: bits as u8, ip_version: ipv });
                            }
                        }
                    }
                    store.replace_routes(final_id, routes);
                }

                if let Some(list) = obj.get("gateways").and_then(Value::as_array) {
                    let mut gateways = Vec::new();
                    for gw in list {
                        if let Some((ip, metric)) = gw.as_str().and_then(parse_ip_slash) {
                            gateways.push(GatewayRecord { network_id: final_id, ip, ip_version: ip_version_of(&ip), metric });
                        }
                    }
                    store.replace_gateways(final_id, gateways);
                }

                if let Some(list) = obj.get("ipAssignmentPools").and_then(Value::as_array) {
                    let mut pools = Vec::new();
                    for pool in list {
                        let route_ip = pool.get("network").and_then(Value::as_str).and_then(|s| IpAddr::from_str(s).ok());
                        let ip_first = pool.get("ipFirst").and_then(Value::as_str).and_then(|s| IpAddr::from_str(s).ok());
                        let ip_last = pool.get("ipLast").and_then(Value::as_str).and_then(|s| IpAddr::from_str(s).ok());
                        if let (Some(route_ip), Some(ip_first), Some(ip_last)) = (route_ip, ip_first, ip_last) {
                            if ip_version_of(&route_ip) == ip_version_of(&ip_first) && ip_version_of(&ip_first) == ip_version_of(&ip_last) {
                                pools.push(IpAssignmentPoolRecord { network_id: final_id, route_ip, ip_first, ip_last });
                            }
                        }
                    }
                    store.replace_ip_assignment_pools(final_id, pools);
                }

                if let Some(list) = obj.get("rules").and_then(Value::as_array) {
                    let mut rules = Vec::new();
                    for rj in list {
                        if rj.get("ruleNo").is_none() {
                            continue;
                        }
                        if let Ok(mut rule) = serde_json::from_value::<RuleRecord>(rj.clone()) {
                            if !rule.action.is_empty() {
                                rule.network_id = final_id;
                                rules.push(rule);
                            }
                        }
                    }
                    store.replace_rules(final_id, rules);
                }
            }

            network.revision = old_revision + 1;
            store.put_network(network);
        }

        self.cp_get(&["network", format!("{:0>16x}", final_id).as_str()])
    }

    pub(super) fn cp_delete(&self, path: &[&str]) -> (u16, String) {
        if path.first() != Some(&"network") {
            return (404, String::new());
        }

        let mut store = self.store.lock();
        match path {
            ["network", nwid_s] => match parse_network_id(nwid_s) {
                Some(nwid) if store.delete_network(nwid) => (200, String::new()),
                _ => (404, String::new()),
            },
            ["network", nwid_s, "member", addr_s] => {
                let (Some(nwid), Some(addr)) = (parse_network_id(nwid_s), parse_member_address(addr_s)) else {
                    return (404, String::new());
                };
                let Some(mut network) = store.get_network(nwid) else {
                    return (404, String::new());
                };
                if !store.delete_member(nwid, addr) {
                    return (404, String::new());
                }
                network.revision += 1;
                store.put_network(network);
                (200, String::new())
            }
            _ => (404, String::new()),
        }
    }

    fn network_json(store: &S, network: &NetworkRecord) -> Value {
        let members: Vec<String> = store.list_members(network.id).iter().map(|a| a.to_string()).collect();
        let relays: Vec<Value> = store
            .relays(network.id)
            .iter()
            .map(|r| json!({"address": r.node_id.to_string(), "phyAddress": r.phy_address.to_string()}))
            .collect();
        let gateways: Vec<String> = store.gateways(network.id).iter().map(|g| format!("{}/{}", g.ip, g.metric)).collect();
        let routes: Vec<Value> = store
            .routes(network.id)
            .iter()
            .map(|r| json!({"network": r.ip.to_string(), "netmaskBits": r.netmask_bits}))
            .collect();
        let pools: Vec<Value> = store
            .ip_assignment_pools(network.id)
            .iter()
            .map(|p| json!({"network": p.route_ip.to_string(), "ipFirst": p.ip_first.to_string(), "ipLast": p.ip_last.to_string()}))
            .collect();
        let rules: Vec<Value> = store.rules(network.id).iter().map(|r| serde_json::to_value(r).unwrap_or(Value::Null)).collect();

        json!({
            "nwid": network.id_string(),
            "name": network.name,
            "private": network.private,
            "enableBroadcast": network.enable_broadcast,
            "allowPassiveBridging": network.allow_passive_bridging,
            "v4AssignMode": network.v4_assign_mode,
            "v6AssignMode": network.v6_assign_mode,
            "multicastLimit": network.multicast_limit,
            "creationTime": network.creation_time,
            "revision": network.revision,
            "members": members,
            "relays": relays,
            "gateways": gateways,
            "routes": routes,
            "ipAssignmentPools": pools,
            "rules": rules,
        })
    }

    fn member_json(store: &S, member: &MemberRecord) -> Value {
        let node = store.get_node(member.node_id);
        let identity = node
            .as_ref()
            .and_then(|n| Identity::from_str(n.identity.as_str()).ok())
            .map(|i| i.to_public_string())
            .unwrap_or_default();
        let assignments: Vec<String> = store
            .ip_assignments_for_member(member.network_id, member.node_id)
            .iter()
            .map(|a| format!("{}/{}", a.ip, a.netmask_bits))
            .collect();

        json!({
            "nwid": format!("{:0>16x}", member.network_id),
            "address": member.node_id.to_string(),
            "authorized": member.authorized,
            "activeBridge": member.active_bridge,
            "lastAt": node.as_ref().and_then(|n| n.last_at.as_ref()).map(|a| a.to_string()).unwrap_or_default(),
            "lastSeen": node.as_ref().map(|n| n.last_seen).unwrap_or(0),
            "firstSeen": node.as_ref().map(|n| n.first_seen).unwrap_or(0),
            "identity": identity,
            "ipAssignments": assignments,
        })
    }
}
