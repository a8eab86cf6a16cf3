/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::sync::Arc;

use parking_lot::Mutex;

use crate::controller::{NetworkController, ResultCode};
use crate::defrag::Defragmenter;
use crate::dictionary::Dictionary;
use crate::error::InvalidParameterError;
use crate::identity::Identity;
use crate::inetaddress::InetAddress;
use crate::packet::{is_fragment, parse_beacon, Fragment, Packet};
use crate::peer::Peer;
use crate::proto::{ErrorCode, Verb, CIPHER_SUITE_C25519_POLY1305_NONE};
use crate::topology::{AddPeerResult, PeerMap};
use crate::verbs::{self, IncomingVerb};
use crate::Address;

/// What the inbound pipeline produced for one datagram.
///
/// Silence (None from `receive`) is the normal fate of anything malformed,
/// unauthenticated, or incomplete; peers learn nothing from us about why.
pub enum SwitchEvent {
    /// An authenticated, decoded verb from a known peer.
    Verb {
        peer: Arc<Peer>,
        packet_id: u64,
        hops: u8,
        verb: IncomingVerb,
    },
    /// A LAN beacon from a node announcing its presence.
    Beacon(Address),
    /// An authenticated packet addressed to some other node; the host may
    /// relay it (hop count already incremented) or drop it.
    Transit(Packet),
    /// A packet from an address we hold no session for and that did not
    /// introduce itself; the host should WHOIS the address.
    WantPeer(Address),
    /// A HELLO claimed an address that is already bound to a different
    /// identity. The host should reply with ERROR(IDENTITY_COLLISION).
    IdentityCollision { source: Address, packet_id: u64 },
}

/// The inbound packet pipeline.
///
/// Bytes come in from the transport; what comes out are authenticated,
/// decrypted, decompressed, parsed verbs attributed to peers. All state
/// lives in the peer registry and the fragment reassembly window.
pub struct Switch {
    identity: Identity,
    pub peers: PeerMap,
    defrag: Mutex<Defragmenter>,
}

impl Switch {
    /// The local identity must include its private key; every inbound
    /// packet needs key agreement against it.
    pub fn new(identity: Identity) -> Result<Switch, InvalidParameterError> {
        if !identity.has_private() {
            return Err(InvalidParameterError("local identity lacks its private key"));
        }
        Ok(Switch { identity, peers: PeerMap::new(), defrag: Mutex::new(Defragmenter::new()) })
    }

    #[inline(always)]
    pub fn address(&self) -> Address {
        self.identity.address
    }

    #[inline(always)]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Process one received datagram. Returns None for anything dropped,
    /// which per protocol is never reported to the sender.
    pub fn receive(&self, from: InetAddress, datagram: &[u8], now: i64) -> Option<SwitchEvent> {
        if let Some(sender) = parse_beacon(datagram) {
            return if sender != self.identity.address {
                Some(SwitchEvent::Beacon(sender))
            } else {
                None
            };
        }

        if is_fragment(datagram) {
            let frag = Fragment::from_bytes(datagram).ok()?;
            if !frag.length_valid() || frag.destination()? != self.identity.address {
                // Relaying loose fragments for third parties is the host's
                // problem; we only reassemble what is addressed to us.
                return None;
            }
            let assembled = self.defrag.lock().assemble_fragment(frag, now)?;
            return self.finish_packet(from, assembled, now);
        }

        let packet = Packet::from_bytes(datagram).ok()?;
        if !packet.length_valid() {
            return None;
        }
        let dest = packet.destination()?;
        if dest != self.identity.address {
            let mut transit = packet;
            transit.increment_hops();
            return Some(SwitchEvent::Transit(transit));
        }
        let assembled = self.defrag.lock().assemble_packet(packet, now)?;
        self.finish_packet(from, assembled, now)
    }

    fn finish_packet(&self, from: InetAddress, mut packet: Packet, now: i64) -> Option<SwitchEvent> {
        let source = packet.source()?;
        let hops = packet.hops();

        let peer = match self.peers.get(source) {
            Some(p) => {
                if packet.dearmor(p.key()).is_ok() {
                    p
                } else if packet.verb() == Some(Verb::Hello) && packet.cipher() == CIPHER_SUITE_C25519_POLY1305_NONE {
                    // A HELLO that does not authenticate under the stored
                    // key may be presenting a different identity for this
                    // address; the bootstrap path surfaces the collision.
                    return self.hello_bootstrap(from, packet, now);
                } else {
                    return None;
                }
            }
            None => {
                // The only way to talk to a stranger is HELLO: it carries
                // the identity whose key authenticates it.
                return self.hello_bootstrap(from, packet, now);
            }
        };

        packet.uncompress().ok()?;
        let verb = verbs::parse(&packet).ok()?;

        // A HELLO from a known address must still present the same identity.
        if let IncomingVerb::Hello(h) = &verb {
            if h.identity != peer.identity {
                return Some(SwitchEvent::IdentityCollision { source, packet_id: packet.packet_id() });
            }
        }

        peer.received(from, now);
        Some(SwitchEvent::Verb { peer, packet_id: packet.packet_id(), hops, verb })
    }

    fn hello_bootstrap(&self, from: InetAddress, mut packet: Packet, now: i64) -> Option<SwitchEvent> {
        let source = packet.source()?;
        if packet.verb() != Some(Verb::Hello) || packet.cipher() != CIPHER_SUITE_C25519_POLY1305_NONE {
            return Some(SwitchEvent::WantPeer(source));
        }

        // HELLO payloads are cleartext, so the claimed identity can be read
        // before authentication; the MAC keyed by agreement with it is then
        // what proves the sender holds the matching secret.
        let parsed = verbs::parse(&packet).ok()?;
        let IncomingVerb::Hello(hello) = parsed else {
            return None;
        };
        if hello.identity.address != source {
            tracing::debug!(%from.ip, "dropping HELLO whose identity does not match its source");
            return None;
        }
        let candidate = Peer::new(&self.identity, hello.identity.clone())?;
        packet.dearmor(candidate.key()).ok()?;
        if !hello.identity.validate() {
            tracing::debug!(%from.ip, "dropping HELLO with an identity that fails address derivation");
            return None;
        }

        let peer = match self.peers.add(&self.identity, hello.identity.clone()) {
            AddPeerResult::Added(p) | AddPeerResult::AlreadyKnown(p) => p,
            AddPeerResult::IdentityCollision => {
                return Some(SwitchEvent::IdentityCollision { source, packet_id: packet.packet_id() })
            }
            AddPeerResult::AgreementFailed => return None,
        };
        peer.received(from, now);
        Some(SwitchEvent::Verb {
            peer,
            packet_id: packet.packet_id(),
            hops: packet.hops(),
            verb: IncomingVerb::Hello(hello),
        })
    }
}

/// Service a decoded NETWORK_CONFIG_REQUEST against a controller and build
/// the reply packet, if any.
///
/// OK carries the signed dictionary; OBJECT_NOT_FOUND and ACCESS_DENIED map
/// to protocol ERRORs with the network ID as detail. OK_BUT_NOT_NEWER and
/// internal failures produce no reply at all: the former because the client
/// already has the current config, the latter because our own
/// misconfiguration is not a peer's business.
pub fn service_network_config_request(
    controller: &dyn NetworkController,
    signing_id: &Identity,
    local_address: Address,
    requester: &Identity,
    from: Option<InetAddress>,
    in_re_packet_id: u64,
    network_id: u64,
    metadata: &Dictionary,
    have_revision: Option<u64>,
) -> Option<Packet> {
    let (code, netconf) = controller.do_network_config_request(from, signing_id, requester, network_id, metadata, have_revision);
    let reply = match (code, netconf) {
        (ResultCode::Ok, Some(netconf)) => {
            verbs::make_ok_network_config(requester.address, local_address, in_re_packet_id, network_id, &netconf)
        }
        (ResultCode::ObjectNotFound, _) => verbs::make_error(
            requester.address,
            local_address,
            Verb::NetworkConfigRequest,
            in_re_packet_id,
            ErrorCode::ObjNotFound,
            &network_id.to_be_bytes(),
        ),
        (ResultCode::AccessDenied, _) => verbs::make_error(
            requester.address,
            local_address,
            Verb::NetworkConfigRequest,
            in_re_packet_id,
            ErrorCode::NetworkAccessDenied,
            &network_id.to_be_bytes(),
        ),
        _ => return None,
    };
    reply.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn phy(s: &str) -> InetAddress {
        InetAddress::from_str(s).unwrap()
    }

    #[test]
    fn hello_bootstrap_then_frames() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let sw_b = Switch::new(bob.clone()).unwrap();

        // Alice introduces herself: armored HELLO with cleartext payload.
        let mut hello = verbs::make_hello(bob.address, alice.address, 1, 0, 0, 1000, &alice, None).unwrap();
        let alice_to_bob = alice.agree(&bob).unwrap().first_n_clone::<32>();
        hello.armor(&alice_to_bob, false);

        match sw_b.receive(phy("10.0.0.1/9993"), hello.as_bytes(), 0) {
            Some(SwitchEvent::Verb { peer, verb: IncomingVerb::Hello(h), .. }) => {
                assert_eq!(peer.identity.address, alice.address);
                assert_eq!(h.identity.address, alice.address);
            }
            _ => panic!("expected authenticated HELLO"),
        }
        assert!(sw_b.peers.get(alice.address).is_some());

        // Now an encrypted frame is understood.
        let mut frame = verbs::make_frame(bob.address, alice.address, 0x1234, 0x0800, b"payload").unwrap();
        frame.armor(&alice_to_bob, true);
        match sw_b.receive(phy("10.0.0.1/9993"), frame.as_bytes(), 5) {
            Some(SwitchEvent::Verb { verb: IncomingVerb::Frame { network_id, ethertype, payload }, .. }) => {
                assert_eq!((network_id, ethertype), (0x1234, 0x0800));
                assert_eq!(payload, b"payload".to_vec());
            }
            _ => panic!("expected FRAME"),
        }

        // The physical path was learned from authenticated traffic.
        let p = sw_b.peers.get(alice.address).unwrap();
        assert_eq!(p.best_path().unwrap().address, phy("10.0.0.1/9993"));
    }

    #[test]
    fn strangers_without_hello_are_flagged() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let sw_b = Switch::new(bob.clone()).unwrap();

        let mut frame = verbs::make_frame(bob.address, alice.address, 1, 0x0800, b"x").unwrap();
        frame.armor(&alice.agree(&bob).unwrap().first_n_clone::<32>(), true);
        match sw_b.receive(phy("10.0.0.1/9993"), frame.as_bytes(), 0) {
            Some(SwitchEvent::WantPeer(a)) => assert_eq!(a, alice.address),
            _ => panic!("expected WantPeer"),
        }
    }

    #[test]
    fn transit_packets_gain_a_hop() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let carol_address = Address::from_u64(0x3333333333).unwrap();
        let sw_b = Switch::new(bob).unwrap();

        let mut p = verbs::make_frame(carol_address, alice.address, 1, 0x0800, b"x").unwrap();
        p.armor(&crate::crypto::Secret([1u8; 32]), true);
        match sw_b.receive(phy("10.0.0.1/9993"), p.as_bytes(), 0) {
            Some(SwitchEvent::Transit(t)) => {
                assert_eq!(t.destination(), Some(carol_address));
                assert_eq!(t.hops(), 1);
            }
            _ => panic!("expected Transit"),
        }
    }

    #[test]
    fn corrupted_packets_vanish_silently() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let sw_b = Switch::new(bob.clone()).unwrap();
        let key = alice.agree(&bob).unwrap().first_n_clone::<32>();

        let mut hello = verbs::make_hello(bob.address, alice.address, 1, 0, 0, 0, &alice, None).unwrap();
        hello.armor(&key, false);
        assert!(sw_b.receive(phy("10.0.0.1/9993"), hello.as_bytes(), 0).is_some());

        let mut frame = verbs::make_frame(bob.address, alice.address, 1, 0x0800, b"x").unwrap();
        frame.armor(&key, true);
        let mut bytes = frame.as_bytes().to_vec();
        *bytes.last_mut().unwrap() ^= 1;
        assert!(sw_b.receive(phy("10.0.0.1/9993"), &bytes, 1).is_none());

        // Truncated datagrams too.
        assert!(sw_b.receive(phy("10.0.0.1/9993"), &frame.as_bytes()[..20], 2).is_none());
    }
}
