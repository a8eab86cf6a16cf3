/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::net::Ipv4Addr;

use super::model::{GatewayRecord, NetworkRecord, RelayRecord};
use crate::dictionary::Dictionary;
use crate::identity::Identity;
use crate::membership::{CertificateOfMembership, COM_REVISION_MAX_DELTA};
use crate::Address;

/* Dictionary keys. These are the wire contract; do not rename. */

pub const NETCONF_KEY_TIMESTAMP: &str = "ts";
pub const NETCONF_KEY_REVISION: &str = "r";
pub const NETCONF_KEY_NETWORK_ID: &str = "nwid";
pub const NETCONF_KEY_ISSUED_TO: &str = "id";
pub const NETCONF_KEY_PRIVATE: &str = "p";
pub const NETCONF_KEY_NAME: &str = "n";
pub const NETCONF_KEY_ENABLE_BROADCAST: &str = "eb";
pub const NETCONF_KEY_ALLOW_PASSIVE_BRIDGING: &str = "pb";
pub const NETCONF_KEY_ALLOWED_ETHERNET_TYPES: &str = "et";
pub const NETCONF_KEY_MULTICAST_LIMIT: &str = "ml";
pub const NETCONF_KEY_ACTIVE_BRIDGES: &str = "ab";
pub const NETCONF_KEY_RELAYS: &str = "rl";
pub const NETCONF_KEY_GATEWAYS: &str = "gw";
pub const NETCONF_KEY_IPV4_STATIC: &str = "v4s";
pub const NETCONF_KEY_CERTIFICATE_OF_MEMBERSHIP: &str = "com";

/// Everything the builder needs, pre-fetched from the store by the engine.
pub struct NetworkConfigInputs<'a> {
    pub network: &'a NetworkRecord,
    pub issued_to: Address,
    /// Ethertypes from rules whose action is accept, unsorted and possibly
    /// duplicated; the builder normalizes.
    pub allowed_ethertypes: Vec<u16>,
    pub active_bridges: Vec<Address>,
    pub relays: Vec<RelayRecord>,
    pub gateways: Vec<GatewayRecord>,
    /// This member's IPv4 assignments as (address, netmask bits).
    pub ipv4_static: Vec<(Ipv4Addr, u8)>,
}

/// Project controller state for one `(network, member)` pair into the
/// signed dictionary a member receives in OK(NETWORK_CONFIG_REQUEST).
///
/// Fails only if signing fails, which means the signing identity is unusable.
pub fn build_network_config(inputs: &NetworkConfigInputs<'_>, signing_id: &Identity, now: u64) -> Option<Dictionary> {
    let network = inputs.network;
    let mut d = Dictionary::new();

    d.set(NETCONF_KEY_TIMESTAMP, format!("{:0>16x}", now).as_str());
    d.set(NETCONF_KEY_REVISION, format!("{:0>16x}", network.revision).as_str());
    d.set(NETCONF_KEY_NETWORK_ID, network.id_string().as_str());
    d.set(NETCONF_KEY_ISSUED_TO, inputs.issued_to.to_string().as_str());
    d.set_bool(NETCONF_KEY_PRIVATE, network.private);
    d.set(NETCONF_KEY_NAME, network.name.as_str());
    d.set_bool(NETCONF_KEY_ENABLE_BROADCAST, network.enable_broadcast);
    d.set_bool(NETCONF_KEY_ALLOW_PASSIVE_BRIDGING, network.allow_passive_bridging);

    let mut ethertypes = inputs.allowed_ethertypes.clone();
    ethertypes.sort_unstable();
    ethertypes.dedup();
    d.set(
        NETCONF_KEY_ALLOWED_ETHERNET_TYPES,
        ethertypes.iter().map(|et| format!("{:0>4x}", et)).collect::<Vec<String>>().join(",").as_str(),
    );

    if network.multicast_limit > 0 {
        d.set_hex_u64(NETCONF_KEY_MULTICAST_LIMIT, network.multicast_limit as u64);
    }

    if !inputs.active_bridges.is_empty() {
        d.set(
            NETCONF_KEY_ACTIVE_BRIDGES,
            inputs.active_bridges.iter().map(|a| a.to_string()).collect::<Vec<String>>().join(",").as_str(),
        );
    }

    if !inputs.relays.is_empty() {
        d.set(
            NETCONF_KEY_RELAYS,
            inputs
                .relays
                .iter()
                .map(|r| format!("{};{}", r.node_id.to_string(), r.phy_address.to_string()))
                .collect::<Vec<String>>()
                .join(",")
                .as_str(),
        );
    }

    if !inputs.gateways.is_empty() {
        d.set(
            NETCONF_KEY_GATEWAYS,
            inputs
                .gateways
                .iter()
                .map(|g| format!("{}/{}", g.ip, g.metric))
                .collect::<Vec<String>>()
                .join(",")
                .as_str(),
        );
    }

    if !inputs.ipv4_static.is_empty() {
        d.set(
            NETCONF_KEY_IPV4_STATIC,
            inputs
                .ipv4_static
                .iter()
                .map(|(ip, bits)| format!("{}/{}", ip, bits))
                .collect::<Vec<String>>()
                .join(",")
                .as_str(),
        );
    }

    if network.private {
        let mut com = CertificateOfMembership::new(network.revision, COM_REVISION_MAX_DELTA, network.id, inputs.issued_to);
        if !com.sign(signing_id) {
            return None;
        }
        d.set(NETCONF_KEY_CERTIFICATE_OF_MEMBERSHIP, com.to_string().as_str());
    }

    if !d.sign(signing_id, now) {
        return None;
    }
    Some(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::x25519::{Ed25519KeyPair, X25519KeyPair};
    use crate::identity::IdentitySecret;
    use std::str::FromStr;

    /// A key-valid identity with an arbitrary address; the controller never
    /// re-runs address derivation, so tests can skip the expensive search.
    fn test_identity(address: u64) -> Identity {
        let x = X25519KeyPair::generate();
        let e = Ed25519KeyPair::generate();
        Identity {
            address: Address::from_u64(address).unwrap(),
            x25519: x.public_bytes(),
            ed25519: e.public_bytes(),
            secret: Some(IdentitySecret { x25519: x, ed25519: e }),
        }
    }

    #[test]
    fn key_set_and_signature() {
        let signer = test_identity(0xdeadbeefde);
        let network = NetworkRecord {
            private: true,
            multicast_limit: 32,
            ..NetworkRecord::new(0xdeadbeefde000001, 1000)
        };
        let inputs = NetworkConfigInputs {
            network: &network,
            issued_to: Address::from_u64(0x0000000042).unwrap(),
            allowed_ethertypes: vec![0x0800, 0x0806, 0x0800, 0x86dd],
            active_bridges: vec![Address::from_u64(0x0000000099).unwrap()],
            relays: vec![RelayRecord {
                network_id: network.id,
                node_id: Address::from_u64(0x0000000077).unwrap(),
                phy_address: crate::inetaddress::InetAddress::from_str("1.2.3.4/9993").unwrap(),
            }],
            gateways: vec![GatewayRecord {
                network_id: network.id,
                ip: "10.0.0.1".parse().unwrap(),
                ip_version: 4,
                metric: 0,
            }],
            ipv4_static: vec![(Ipv4Addr::new(10, 0, 0, 5), 24)],
        };

        let d = build_network_config(&inputs, &signer, 555666).unwrap();
        assert_eq!(d.get(NETCONF_KEY_NETWORK_ID), Some("deadbeefde000001"));
        assert_eq!(d.get(NETCONF_KEY_ISSUED_TO), Some("0000000042"));
        assert_eq!(d.get(NETCONF_KEY_PRIVATE), Some("1"));
        assert_eq!(d.get(NETCONF_KEY_ALLOWED_ETHERNET_TYPES), Some("0800,0806,86dd"));
        assert_eq!(d.get_hex_u64(NETCONF_KEY_MULTICAST_LIMIT, 0), 32);
        assert_eq!(d.get(NETCONF_KEY_ACTIVE_BRIDGES), Some("0000000099"));
        assert_eq!(d.get(NETCONF_KEY_RELAYS), Some("0000000077;1.2.3.4/9993"));
        assert_eq!(d.get(NETCONF_KEY_GATEWAYS), Some("10.0.0.1/0"));
        assert_eq!(d.get(NETCONF_KEY_IPV4_STATIC), Some("10.0.0.5/24"));
        assert_eq!(d.get_hex_u64(NETCONF_KEY_REVISION, 0), 1);
        assert!(d.verify(&signer));

        let com = crate::membership::CertificateOfMembership::from_str(d.get(NETCONF_KEY_CERTIFICATE_OF_MEMBERSHIP).unwrap()).unwrap();
        assert!(com.verify(&signer));
        assert_eq!(com.issued_to(), Some(inputs.issued_to));
        assert_eq!(com.network_id(), network.id);

        // Public network: no certificate.
        let mut public_net = network.clone();
        public_net.private = false;
        let inputs2 = NetworkConfigInputs { network: &public_net, ipv4_static: vec![], ..inputs };
        let d2 = build_network_config(&inputs2, &signer, 555667).unwrap();
        assert!(!d2.contains(NETCONF_KEY_CERTIFICATE_OF_MEMBERSHIP));
        assert!(!d2.contains(NETCONF_KEY_IPV4_STATIC));

        // No secret key: cannot sign.
        assert!(build_network_config(&inputs2, &signer.clone_without_secret(), 1).is_none());
    }
}
