/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::inetaddress::InetAddress;
use crate::Address;

/// A virtual network.
///
/// Identifiers are 64 bits: the high 40 are the controlling node's address,
/// the low 24 distinguish its networks. The revision counter advances by
/// exactly one for every successful mutation touching the network and is
/// the unit of config freshness for members.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: u64,
    pub name: String,
    pub private: bool,
    pub enable_broadcast: bool,
    pub allow_passive_bridging: bool,
    pub v4_assign_mode: String,
    pub v6_assign_mode: String,
    pub multicast_limit: u32,
    pub creation_time: u64,
    pub revision: u64,
}

impl NetworkRecord {
    /// A new network with the schema defaults: private, broadcast enabled,
    /// no auto-assignment, named after its own ID.
    pub fn new(id: u64, creation_time: u64) -> NetworkRecord {
        NetworkRecord {
            id,
            name: format!("{:0>16x}", id),
            private: true,
            enable_broadcast: true,
            allow_passive_bridging: false,
            v4_assign_mode: "none".to_string(),
            v6_assign_mode: "none".to_string(),
            multicast_limit: 32,
            creation_time,
            revision: 1,
        }
    }

    #[inline(always)]
    pub fn id_string(&self) -> String {
        format!("{:0>16x}", self.id)
    }
}

/// Membership of a node in a network, unique on `(network_id, node_id)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct MemberRecord {
    pub network_id: u64,
    pub node_id: Address,
    pub authorized: bool,
    pub active_bridge: bool,
}

/// A node the controller has seen. Created on first config request and
/// never deleted; the identity field is immutable once stored, which is
/// what makes addresses first-come-first-claim.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: Address,
    pub identity: String,
    pub last_at: Option<InetAddress>,
    pub last_seen: u64,
    pub first_seen: u64,
}

/// A filter rule. Null match fields are wildcards; rules apply in
/// `rule_no` order.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
    #[serde(skip)]
    pub network_id: u64,
    pub rule_no: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_id: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vlan_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vlan_pcp: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ether_type: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mac_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mac_dest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip_dest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip_tos: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip_protocol: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip_source_port: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip_dest_port: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub flags: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inv_flags: Option<u64>,
    #[serde(default = "default_rule_action")]
    pub action: String,
}

fn default_rule_action() -> String {
    "accept".to_string()
}

/// A route advertised to members, optionally via a gateway node.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RouteRecord {
    pub network_id: u64,
    pub node_id: Option<Address>,
    pub ip: IpAddr,
    pub netmask_bits: u8,
    pub ip_version: u8,
}

/// An inclusive range of auto-assignable addresses bound to a route.
/// First and last are stored separately; assignments inherit the netmask of
/// the route whose network contains the pool.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IpAssignmentPoolRecord {
    pub network_id: u64,
    pub route_ip: IpAddr,
    pub ip_first: IpAddr,
    pub ip_last: IpAddr,
}

/// A static or auto-assigned IP, unique on `(network_id, ip, ip_version)`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IpAssignmentRecord {
    pub network_id: u64,
    pub node_id: Address,
    pub ip: IpAddr,
    pub netmask_bits: u8,
    pub ip_version: u8,
}

/// A relay node members may use to reach each other indirectly.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RelayRecord {
    pub network_id: u64,
    pub node_id: Address,
    pub phy_address: InetAddress,
}

/// A default gateway advertised to members, lowest metric first.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GatewayRecord {
    pub network_id: u64,
    pub ip: IpAddr,
    pub ip_version: u8,
    pub metric: u32,
}
