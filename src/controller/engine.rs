/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use parking_lot::Mutex;

use super::model::*;
use super::netconf::{build_network_config, NetworkConfigInputs};
use super::store::{MemoryStore, Store};
use super::{now_ms, NetworkController, ResultCode};
use crate::dictionary::Dictionary;
use crate::error::InvalidParameterError;
use crate::identity::Identity;
use crate::inetaddress::InetAddress;
use crate::Address;

/// The embedded network controller.
///
/// One mutex serializes every reader and writer against the record store;
/// the span between taking the lock and the revision bump is the transaction
/// scope of a mutation. A deployment that shards by network ID must keep the
/// one-bump-per-mutation discipline per network.
pub struct EmbeddedNetworkController<S: Store = MemoryStore> {
    pub(super) signing_id: Identity,
    pub(super) store: Mutex<S>,
}

impl EmbeddedNetworkController<MemoryStore> {
    /// Controller over a fresh in-memory store. The signing identity must
    /// include its private key; there is nothing a controller that cannot
    /// sign could ever do, so this is fatal at initialization.
    pub fn new(signing_id: Identity) -> Result<Self, InvalidParameterError> {
        Self::with_store(signing_id, MemoryStore::new())
    }
}

impl<S: Store> EmbeddedNetworkController<S> {
    pub fn with_store(signing_id: Identity, store: S) -> Result<Self, InvalidParameterError> {
        if !signing_id.has_private() {
            return Err(InvalidParameterError("controller signing identity lacks its private key"));
        }
        Ok(EmbeddedNetworkController { signing_id, store: Mutex::new(store) })
    }

    #[inline(always)]
    pub fn signing_identity(&self) -> &Identity {
        &self.signing_id
    }

    /// Attempt to auto-assign one IPv4 address for a member.
    ///
    /// Pools are scanned in stable order; each candidate from first through
    /// last inclusive is checked against the uniqueness index and the first
    /// free one is bound with the netmask of the pool's route. Exhausted
    /// pools are simply skipped: no address is not an error, the member just
    /// gets no static assignment. Iteration is 32-bit host-order arithmetic,
    /// so this is IPv4 only; IPv6 static assignments are stored when
    /// submitted through the API but never auto-generated.
    pub(super) fn auto_assign_v4(store: &mut S, network_id: u64, node_id: Address) -> Option<(Ipv4Addr, u8)> {
        let routes = store.routes(network_id);
        for pool in store.ip_assignment_pools(network_id) {
            let (IpAddr::V4(first), IpAddr::V4(last)) = (pool.ip_first, pool.ip_last) else {
                continue;
            };
            let Some(route) = routes.iter().find(|r| r.ip_version == 4 && r.ip == pool.route_ip) else {
                continue;
            };
            if route.netmask_bits == 0 || route.netmask_bits >= 32 {
                continue;
            }
            for candidate in u32::from(first)..=u32::from(last) {
                let ip = IpAddr::V4(Ipv4Addr::from(candidate));
                if !store.is_ip_assigned(network_id, ip, 4)
                    && store
                        .put_ip_assignment(IpAssignmentRecord {
                            network_id,
                            node_id,
                            ip,
                            netmask_bits: route.netmask_bits,
                            ip_version: 4,
                        })
                        .is_ok()
                {
                    return Some((Ipv4Addr::from(candidate), route.netmask_bits));
                }
            }
        }
        None
    }
}

impl<S: Store> NetworkController for EmbeddedNetworkController<S> {
    fn do_network_config_request(
        &self,
        from_physical: Option<InetAddress>,
        signing_id: &Identity,
        requester: &Identity,
        network_id: u64,
        _metadata: &Dictionary,
        have_revision: Option<u64>,
    ) -> (ResultCode, Option<Dictionary>) {
        if !signing_id.has_private() {
            return (ResultCode::InternalServerError, None);
        }
        if signing_id.address.to_u64() != (network_id >> 24) {
            tracing::warn!("config request for network {:0>16x}, which is not under this controller's prefix", network_id);
            return (ResultCode::InternalServerError, None);
        }

        let mut store = self.store.lock();
        let now = now_ms();

        // Create or update the node record. Identities are first-come-
        // first-claim: a differing identity for a known address is denied.
        match store.get_node(requester.address) {
            Some(mut node) => {
                match Identity::from_str(node.identity.as_str()) {
                    Ok(stored) if stored == *requester => {
                        node.last_seen = now;
                        if from_physical.is_some() {
                            // Relayed requests don't update the physical
                            // address; we only know where the relay is.
                            node.last_at = from_physical;
                        }
                        store.put_node(node);
                    }
                    _ => return (ResultCode::AccessDenied, None),
                }
            }
            None => {
                store.put_node(NodeRecord {
                    id: requester.address,
                    identity: requester.to_public_string(),
                    last_at: from_physical,
                    last_seen: now,
                    first_seen: now,
                });
            }
        }

        let Some(network) = store.get_network(network_id) else {
            return (ResultCode::ObjectNotFound, None);
        };

        // Create the member lazily, auto-authorizing on public networks.
        let member = match store.get_member(network_id, requester.address) {
            Some(m) => m,
            None => {
                let m = MemberRecord {
                    network_id,
                    node_id: requester.address,
                    authorized: !network.private,
                    active_bridge: false,
                };
                store.put_member(m);
                m
            }
        };

        if !member.authorized {
            return (ResultCode::AccessDenied, None);
        }

        // Unchanged from the revision the client already has: no body.
        if have_revision == Some(network.revision) {
            return (ResultCode::OkButNotNewer, None);
        }

        let allowed_ethertypes = store
            .rules(network_id)
            .iter()
            .filter(|r| r.action == "accept")
            .filter_map(|r| r.ether_type)
            .filter(|et| *et <= 0xffff)
            .map(|et| et as u16)
            .collect();
        let active_bridges = store.active_bridges(network_id);
        let relays = store.relays(network_id);
        let gateways = store.gateways(network_id);

        let mut ipv4_static: Vec<(Ipv4Addr, u8)> = Vec::new();
        if network.v4_assign_mode == "zt" {
            for a in store.ip_assignments_for_member(network_id, requester.address) {
                if let IpAddr::V4(ip) = a.ip {
                    if a.ip_version == 4 && a.netmask_bits > 0 && a.netmask_bits <= 32 {
                        ipv4_static.push((ip, a.netmask_bits));
                    }
                }
            }
            if ipv4_static.is_empty() {
                if let Some(assigned) = Self::auto_assign_v4(&mut store, network_id, requester.address) {
                    ipv4_static.push(assigned);
                }
            }
        }

        let inputs = NetworkConfigInputs {
            network: &network,
            issued_to: requester.address,
            allowed_ethertypes,
            active_bridges,
            relays,
            gateways,
            ipv4_static,
        };
        match build_network_config(&inputs, signing_id, now) {
            Some(netconf) => (ResultCode::Ok, Some(netconf)),
            None => (ResultCode::InternalServerError, None),
        }
    }

    fn handle_http_get(&self, path: &[&str]) -> (u16, String) {
        self.cp_get(path)
    }

    fn handle_http_post(&self, path: &[&str], body: &str) -> (u16, String) {
        self.cp_post(path, body)
    }

    fn handle_http_delete(&self, path: &[&str]) -> (u16, String) {
        self.cp_delete(path)
    }
}
