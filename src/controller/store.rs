/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::collections::BTreeMap;
use std::net::IpAddr;

use thiserror::Error;

use super::model::*;
use crate::Address;

#[derive(Error, Debug)]
pub enum StoreError {
    /// An insert violated the `(network, ip, version)` uniqueness index.
    #[error("IP address already assigned on this network")]
    IpAlreadyAssigned,
}

/// Operations the controller needs from its state store.
///
/// Each method mirrors one query the controller performs; a durable
/// implementation would back these with its database of choice. The
/// controller serializes access, so implementations need no internal
/// locking, and a call sequence between two revision bumps is one logical
/// transaction.
pub trait Store: Send {
    fn get_network(&self, id: u64) -> Option<NetworkRecord>;
    fn put_network(&mut self, network: NetworkRecord);
    /// Delete a network and cascade to every dependent row.
    fn delete_network(&mut self, id: u64) -> bool;
    fn list_networks(&self) -> Vec<u64>;

    fn get_node(&self, id: Address) -> Option<NodeRecord>;
    fn put_node(&mut self, node: NodeRecord);

    fn get_member(&self, network_id: u64, node_id: Address) -> Option<MemberRecord>;
    fn put_member(&mut self, member: MemberRecord);
    /// Delete a member and its IP assignments.
    fn delete_member(&mut self, network_id: u64, node_id: Address) -> bool;
    fn list_members(&self, network_id: u64) -> Vec<Address>;
    /// Addresses of authorized active bridges, ascending.
    fn active_bridges(&self, network_id: u64) -> Vec<Address>;

    /// Rules ordered by rule number.
    fn rules(&self, network_id: u64) -> Vec<RuleRecord>;
    fn replace_rules(&mut self, network_id: u64, rules: Vec<RuleRecord>);

    /// Routes ordered by IP.
    fn routes(&self, network_id: u64) -> Vec<RouteRecord>;
    fn replace_routes(&mut self, network_id: u64, routes: Vec<RouteRecord>);

    /// Pools in stable (route IP) order.
    fn ip_assignment_pools(&self, network_id: u64) -> Vec<IpAssignmentPoolRecord>;
    fn replace_ip_assignment_pools(&mut self, network_id: u64, pools: Vec<IpAssignmentPoolRecord>);

    /// Relays ordered by node ID.
    fn relays(&self, network_id: u64) -> Vec<RelayRecord>;
    fn replace_relays(&mut self, network_id: u64, relays: Vec<RelayRecord>);

    /// Gateways ordered by metric.
    fn gateways(&self, network_id: u64) -> Vec<GatewayRecord>;
    fn replace_gateways(&mut self, network_id: u64, gateways: Vec<GatewayRecord>);

    /// A member's assignments ordered by IP.
    fn ip_assignments_for_member(&self, network_id: u64, node_id: Address) -> Vec<IpAssignmentRecord>;
    fn is_ip_assigned(&self, network_id: u64, ip: IpAddr, ip_version: u8) -> bool;
    /// Atomic check-and-insert against the uniqueness index.
    fn put_ip_assignment(&mut self, assignment: IpAssignmentRecord) -> Result<(), StoreError>;
    fn delete_ip_assignments_for_member(&mut self, network_id: u64, node_id: Address);
}

/// In-memory store.
///
/// The reference store for tests and for embedded controllers that persist
/// some other way. Plain BTreeMaps keyed the way the uniqueness indexes
/// demand; nothing clever.
#[derive(Default)]
pub struct MemoryStore {
    networks: BTreeMap<u64, NetworkRecord>,
    nodes: BTreeMap<Address, NodeRecord>,
    members: BTreeMap<(u64, Address), MemberRecord>,
    rules: BTreeMap<u64, Vec<RuleRecord>>,
    routes: BTreeMap<u64, Vec<RouteRecord>>,
    pools: BTreeMap<u64, Vec<IpAssignmentPoolRecord>>,
    relays: BTreeMap<u64, Vec<RelayRecord>>,
    gateways: BTreeMap<u64, Vec<GatewayRecord>>,
    assignments: BTreeMap<(u64, IpAddr, u8), IpAssignmentRecord>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl Store for MemoryStore {
    fn get_network(&self, id: u64) -> Option<NetworkRecord> {
        self.networks.get(&id).cloned()
    }

    fn put_network(&mut self, network: NetworkRecord) {
        self.networks.insert(network.id, network);
    }

    fn delete_network(&mut self, id: u64) -> bool {
        if self.networks.remove(&id).is_none() {
            return false;
        }
        self.members.retain(|(nwid, _), _| *nwid != id);
        self.rules.remove(&id);
        self.routes.remove(&id);
        self.pools.remove(&id);
        self.relays.remove(&id);
        self.gateways.remove(&id);
        self.assignments.retain(|(nwid, _, _), _| *nwid != id);
        true
    }

    fn list_networks(&self) -> Vec<u64> {
        self.networks.keys().copied().collect()
    }

    fn get_node(&self, id: Address) -> Option<NodeRecord> {
        self.nodes.get(&id).cloned()
    }

    fn put_node(&mut self, node: NodeRecord) {
        self.nodes.insert(node.id, node);
    }

    fn get_member(&self, network_id: u64, node_id: Address) -> Option<MemberRecord> {
        self.members.get(&(network_id, node_id)).copied()
    }

    fn put_member(&mut self, member: MemberRecord) {
        self.members.insert((member.network_id, member.node_id), member);
    }

    fn delete_member(&mut self, network_id: u64, node_id: Address) -> bool {
        let existed = self.members.remove(&(network_id, node_id)).is_some();
        if existed {
            self.delete_ip_assignments_for_member(network_id, node_id);
        }
        existed
    }

    fn list_members(&self, network_id: u64) -> Vec<Address> {
        self.members
            .range((network_id, Address::from_u64(1).unwrap())..)
            .take_while(|((nwid, _), _)| *nwid == network_id)
            .map(|((_, a), _)| *a)
            .collect()
    }

    fn active_bridges(&self, network_id: u64) -> Vec<Address> {
        self.members
            .values()
            .filter(|m| m.network_id == network_id && m.authorized && m.active_bridge)
            .map(|m| m.node_id)
            .collect()
    }

    fn rules(&self, network_id: u64) -> Vec<RuleRecord> {
        let mut v = self.rules.get(&network_id).cloned().unwrap_or_default();
        v.sort_by_key(|r| r.rule_no);
        v
    }

    fn replace_rules(&mut self, network_id: u64, rules: Vec<RuleRecord>) {
        self.rules.insert(network_id, rules);
    }

    fn routes(&self, network_id: u64) -> Vec<RouteRecord> {
        let mut v = self.routes.get(&network_id).cloned().unwrap_or_default();
        v.sort_by_key(|r| r.ip);
        v
    }

    fn replace_routes(&mut self, network_id: u64, routes: Vec<RouteRecord>) {
        self.routes.insert(network_id, routes);
    }

    fn ip_assignment_pools(&self, network_id: u64) -> Vec<IpAssignmentPoolRecord> {
        let mut v = self.pools.get(&network_id).cloned().unwrap_or_default();
        v.sort_by_key(|p| p.route_ip);
        v
    }

    fn replace_ip_assignment_pools(&mut self, network_id: u64, pools: Vec<IpAssignmentPoolRecord>) {
        self.pools.insert(network_id, pools);
    }

    fn relays(&self, network_id: u64) -> Vec<RelayRecord> {
        let mut v = self.relays.get(&network_id).cloned().unwrap_or_default();
        v.sort_by_key(|r| r.node_id);
        v
    }

    fn replace_relays(&mut self, network_id: u64, relays: Vec<RelayRecord>) {
        self.relays.insert(network_id, relays);
    }

    fn gateways(&self, network_id: u64) -> Vec<GatewayRecord> {
        let mut v = self.gateways.get(&network_id).cloned().unwrap_or_default();
        v.sort_by_key(|g| g.metric);
        v
    }

    fn replace_gateways(&mut self, network_id: u64, gateways: Vec<GatewayRecord>) {
        self.gateways.insert(network_id, gateways);
    }

    fn ip_assignments_for_member(&self, network_id: u64, node_id: Address) -> Vec<IpAssignmentRecord> {
        let mut v: Vec<IpAssignmentRecord> = self
            .assignments
            .values()
            .filter(|a| a.network_id == network_id && a.node_id == node_id)
            .cloned()
            .collect();
        v.sort_by_key(|a| a.ip);
        v
    }

    fn is_ip_assigned(&self, network_id: u64, ip: IpAddr, ip_version: u8) -> bool {
        self.assignments.contains_key(&(network_id, ip, ip_version))
    }

    fn put_ip_assignment(&mut self, assignment: IpAssignmentRecord) -> Result<(), StoreError> {
        let key = (assignment.network_id, assignment.ip, assignment.ip_version);
        if self.assignments.contains_key(&key) {
            return Err(StoreError::IpAlreadyAssigned);
        }
        self.assignments.insert(key, assignment);
        Ok(())
    }

    fn delete_ip_assignments_for_member(&mut self, network_id: u64, node_id: Address) {
        self.assignments.retain(|_, a| !(a.network_id == network_id && a.node_id == node_id));
    }
}
