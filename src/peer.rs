/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::crypto::Secret;
use crate::identity::Identity;
use crate::inetaddress::InetAddress;

/// A physical path to a peer.
#[derive(Clone, Debug)]
pub struct Path {
    pub address: InetAddress,
    pub last_send: i64,
    pub last_receive: i64,
    /// Preferred paths sort ahead of everything else regardless of recency.
    pub preferred: bool,
}

/// Session state for a remote peer.
///
/// The 32-byte packet key is derived exactly once from the long-term key
/// pair via C25519 and cached here. Per-packet key mangling is cheap enough
/// that the mangled variants are recomputed on the fly rather than cached.
/// Everything else is bookkeeping: known physical paths in preference order,
/// activity timestamps, and a smoothed latency estimate.
pub struct Peer {
    pub identity: Identity,
    key: Secret<32>,
    paths: Mutex<Vec<Path>>,
    last_send: AtomicI64,
    last_receive: AtomicI64,
    latency_ms: AtomicU32,
}

impl Peer {
    /// Create a session for a remote peer. None if local identity lacks its
    /// secret or key agreement is otherwise impossible.
    pub fn new(local: &Identity, remote: Identity) -> Option<Peer> {
        let shared = local.agree(&remote)?;
        Some(Peer {
            identity: remote.clone_without_secret(),
            key: shared.first_n_clone(),
            paths: Mutex::new(Vec::new()),
            last_send: AtomicI64::new(0),
            last_receive: AtomicI64::new(0),
            latency_ms: AtomicU32::new(0),
        })
    }

    /// The long-term shared packet key for this peer.
    #[inline(always)]
    pub fn key(&self) -> &Secret<32> {
        &self.key
    }

    /// Record receipt of an authenticated packet from a physical address.
    /// Paths are learned here: authentication is what makes an address
    /// trustworthy enough to reply to.
    pub fn received(&self, from: InetAddress, now: i64) {
        self.last_receive.store(now, Ordering::Relaxed);
        let mut paths = self.paths.lock();
        match paths.iter_mut().find(|p| p.address == from) {
            Some(p) => p.last_receive = now,
            None => paths.push(Path { address: from, last_send: 0, last_receive: now, preferred: false }),
        }
    }

    /// Record a send to a physical address.
    pub fn sent(&self, to: InetAddress, now: i64) {
        self.last_send.store(now, Ordering::Relaxed);
        let mut paths = self.paths.lock();
        if let Some(p) = paths.iter_mut().find(|p| p.address == to) {
            p.last_send = now;
        }
    }

    /// Mark a path as administratively preferred.
    pub fn set_path_preferred(&self, address: InetAddress, preferred: bool) {
        let mut paths = self.paths.lock();
        if let Some(p) = paths.iter_mut().find(|p| p.address == address) {
            p.preferred = preferred;
        }
    }

    /// The best current path: preferred first, then most recently active.
    pub fn best_path(&self) -> Option<Path> {
        let paths = self.paths.lock();
        paths
            .iter()
            .max_by_key(|p| (p.preferred, p.last_receive.max(p.last_send)))
            .cloned()
    }

    pub fn paths(&self) -> Vec<Path> {
        let mut paths = self.paths.lock().clone();
        paths.sort_by_key(|p| std::cmp::Reverse((p.preferred, p.last_receive.max(p.last_send))));
        paths
    }

    #[inline(always)]
    pub fn last_send(&self) -> i64 {
        self.last_send.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn last_receive(&self) -> i64 {
        self.last_receive.load(Ordering::Relaxed)
    }

    /// Feed one round-trip sample into the smoothed latency estimate.
    pub fn record_latency_sample(&self, ms: u32) {
        let prev = self.latency_ms.load(Ordering::Relaxed);
        let next = if prev == 0 { ms } else { (prev * 3 + ms) / 4 };
        self.latency_ms.store(next, Ordering::Relaxed);
    }

    /// Smoothed latency estimate in milliseconds, zero if unknown.
    #[inline(always)]
    pub fn latency(&self) -> u32 {
        self.latency_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn keys_agree_both_ways() {
        let a = Identity::generate();
        let b = Identity::generate();
        let pa = Peer::new(&a, b.clone_without_secret()).unwrap();
        let pb = Peer::new(&b, a.clone_without_secret()).unwrap();
        assert_eq!(pa.key(), pb.key());
        assert!(Peer::new(&a.clone_without_secret(), b.clone_without_secret()).is_none());
    }

    #[test]
    fn path_preference_ordering() {
        let a = Identity::generate();
        let b = Identity::generate();
        let p = Peer::new(&a, b.clone_without_secret()).unwrap();

        let lan = InetAddress::from_str("192.168.1.5/9993").unwrap();
        let wan = InetAddress::from_str("203.0.113.7/9993").unwrap();

        p.received(lan, 100);
        p.received(wan, 200);
        assert_eq!(p.best_path().unwrap().address, wan);

        // A preferred path wins even when less recently active.
        p.set_path_preferred(lan, true);
        assert_eq!(p.best_path().unwrap().address, lan);

        // Duplicate receives update rather than add.
        p.received(wan, 300);
        assert_eq!(p.paths().len(), 2);
        assert_eq!(p.last_receive(), 300);
    }

    #[test]
    fn latency_smoothing() {
        let a = Identity::generate();
        let b = Identity::generate();
        let p = Peer::new(&a, b.clone_without_secret()).unwrap();
        assert_eq!(p.latency(), 0);
        p.record_latency_sample(100);
        assert_eq!(p.latency(), 100);
        p.record_latency_sample(20);
        assert!(p.latency() < 100 && p.latency() >= 20);
    }
}
