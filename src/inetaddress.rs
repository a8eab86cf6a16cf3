/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InvalidFormatError;

/// An IP address with an attached port.
///
/// The string form is `ip/port` as it has always been in this protocol's
/// configuration surfaces; a bare `ip` parses with port zero. Port zero is
/// also how controller records carry plain IPs through the same type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InetAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl InetAddress {
    #[inline(always)]
    pub fn new(ip: IpAddr, port: u16) -> InetAddress {
        InetAddress { ip, port }
    }

    #[inline(always)]
    pub fn from_ipv4(ip: [u8; 4], port: u16) -> InetAddress {
        InetAddress { ip: IpAddr::V4(Ipv4Addr::from(ip)), port }
    }

    #[inline(always)]
    pub fn from_ipv6(ip: [u8; 16], port: u16) -> InetAddress {
        InetAddress { ip: IpAddr::V6(Ipv6Addr::from(ip)), port }
    }

    #[inline(always)]
    pub fn is_ipv4(&self) -> bool {
        self.ip.is_ipv4()
    }

    #[inline(always)]
    pub fn is_ipv6(&self) -> bool {
        self.ip.is_ipv6()
    }

    /// 4 for IPv4, 6 for IPv6; the tag stored in controller records.
    #[inline(always)]
    pub fn ip_version(&self) -> u8 {
        if self.ip.is_ipv4() {
            4
        } else {
            6
        }
    }

    /// Raw IP bytes in network order (4 or 16 of them).
    pub fn ip_bytes(&self) -> Vec<u8> {
        match self.ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }
}

impl ToString for InetAddress {
    fn to_string(&self) -> String {
        format!("{}/{}", self.ip, self.port)
    }
}

impl FromStr for InetAddress {
    type Err = InvalidFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip_s, port_s) = match s.rfind('/') {
            Some(i) => (&s[..i], Some(&s[i + 1..])),
            None => (s, None),
        };
        let ip = IpAddr::from_str(ip_s).map_err(|_| InvalidFormatError)?;
        let port = match port_s {
            Some(p) => u16::from_str(p).map_err(|_| InvalidFormatError)?,
            None => 0,
        };
        Ok(InetAddress { ip, port })
    }
}

impl Debug for InetAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_string().as_str())
    }
}

impl Serialize for InetAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'de> Deserialize<'de> for InetAddress {
    fn deserialize<D>(deserializer: D) -> Result<InetAddress, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        InetAddress::from_str(s.as_str()).map_err(|_| serde::de::Error::custom("invalid IP address"))
    }
}
