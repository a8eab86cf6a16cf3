/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::identity::Identity;
use crate::peer::Peer;
use crate::Address;

/// Registry of known peers keyed by their 40-bit address.
///
/// Peers are handed out as Arc so callers hold stable references while the
/// map itself stays the single owner of record. Identities are
/// first-come-first-claim: once an address maps to an identity, a HELLO
/// presenting a different identity for that address is rejected.
pub struct PeerMap {
    peers: RwLock<HashMap<Address, Arc<Peer>>>,
}

/// Outcome of attempting to add a peer to the registry.
pub enum AddPeerResult {
    Added(Arc<Peer>),
    /// Same identity already present; the existing session is returned.
    AlreadyKnown(Arc<Peer>),
    /// A different identity already claims this address.
    IdentityCollision,
    /// Key agreement failed (local identity lacks its secret).
    AgreementFailed,
}

impl PeerMap {
    pub fn new() -> PeerMap {
        PeerMap { peers: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, address: Address) -> Option<Arc<Peer>> {
        self.peers.read().get(&address).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Add a peer session for a newly learned identity.
    pub fn add(&self, local: &Identity, remote: Identity) -> AddPeerResult {
        let address = remote.address;
        let mut peers = self.peers.write();
        if let Some(existing) = peers.get(&address) {
            return if existing.identity == remote {
                AddPeerResult::AlreadyKnown(existing.clone())
            } else {
                AddPeerResult::IdentityCollision
            };
        }
        match Peer::new(local, remote) {
            Some(p) => {
                let p = Arc::new(p);
                peers.insert(address, p.clone());
                AddPeerResult::Added(p)
            }
            None => AddPeerResult::AgreementFailed,
        }
    }

    pub fn remove(&self, address: Address) -> Option<Arc<Peer>> {
        self.peers.write().remove(&address)
    }

    pub fn each<F: FnMut(&Arc<Peer>)>(&self, mut f: F) {
        for p in self.peers.read().values() {
            f(p);
        }
    }
}

impl Default for PeerMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_come_first_claim() {
        let local = Identity::generate();
        let remote = Identity::generate();

        let map = PeerMap::new();
        let p = match map.add(&local, remote.clone_without_secret()) {
            AddPeerResult::Added(p) => p,
            _ => panic!("expected Added"),
        };
        assert_eq!(map.len(), 1);
        assert!(Arc::ptr_eq(
            &map.get(remote.address).unwrap(),
            &p
        ));

        // Same identity again: known.
        assert!(matches!(map.add(&local, remote.clone_without_secret()), AddPeerResult::AlreadyKnown(_)));

        // A different identity claiming the same address is rejected.
        let mut impostor = Identity::generate().clone_without_secret();
        impostor.address = remote.address;
        assert!(matches!(map.add(&local, impostor), AddPeerResult::IdentityCollision));

        assert!(map.remove(remote.address).is_some());
        assert!(map.get(remote.address).is_none());
    }
}
