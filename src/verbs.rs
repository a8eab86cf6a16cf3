/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use crate::dictionary::Dictionary;
use crate::error::PacketFault;
use crate::identity::Identity;
use crate::inetaddress::InetAddress;
use crate::membership::CertificateOfMembership;
use crate::packet::Packet;
use crate::proto::*;
use crate::Address;

pub const EXT_FRAME_FLAG_COM_ATTACHED: u8 = 0x01;
pub const MULTICAST_FRAME_FLAG_COM_ATTACHED: u8 = 0x01;
pub const MULTICAST_FRAME_FLAG_GATHER_LIMIT: u8 = 0x02;
pub const MULTICAST_FRAME_FLAG_SOURCE_MAC: u8 = 0x04;

/// HELLO: announcement of a node's existence, the only verb ever sent in
/// the clear since it is what transports the public key.
#[derive(Clone, Debug)]
pub struct Hello {
    pub protocol_version: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub revision: u16,
    pub timestamp: u64,
    pub identity: Identity,
    /// The wire address this HELLO was sent to; lets the receiver detect NAT
    /// and learn its external address when the OK echoes it back.
    pub physical_destination: Option<InetAddress>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MulticastGroup {
    pub network_id: u64,
    pub mac: [u8; 6],
    pub adi: u32,
}

/// A fully decoded verb payload.
#[derive(Clone, Debug)]
pub enum IncomingVerb {
    Nop,
    Hello(Hello),
    Error {
        in_re_verb: u8,
        in_re_packet_id: u64,
        error_code: ErrorCode,
        payload: Vec<u8>,
    },
    Ok {
        in_re_verb: u8,
        in_re_packet_id: u64,
        payload: Vec<u8>,
    },
    Whois {
        address: Address,
    },
    Rendezvous {
        flags: u8,
        peer_address: Address,
        port: u16,
        physical: Option<InetAddress>,
    },
    Frame {
        network_id: u64,
        ethertype: u16,
        payload: Vec<u8>,
    },
    ExtFrame {
        network_id: u64,
        flags: u8,
        com: Option<CertificateOfMembership>,
        dest_mac: [u8; 6],
        source_mac: [u8; 6],
        ethertype: u16,
        payload: Vec<u8>,
    },
    MulticastLike(Vec<MulticastGroup>),
    NetworkMembershipCertificate(Vec<CertificateOfMembership>),
    NetworkConfigRequest {
        network_id: u64,
        metadata: Dictionary,
        have_revision: Option<u64>,
    },
    NetworkConfigRefresh(Vec<u64>),
    MulticastGather {
        network_id: u64,
        flags: u8,
        mac: [u8; 6],
        adi: u32,
        gather_limit: u32,
        com: Option<CertificateOfMembership>,
    },
    MulticastFrame {
        network_id: u64,
        flags: u8,
        com: Option<CertificateOfMembership>,
        gather_limit: Option<u32>,
        source_mac: Option<[u8; 6]>,
        dest_mac: [u8; 6],
        dest_adi: u32,
        ethertype: u16,
        payload: Vec<u8>,
    },
    Cma {
        flags: u8,
        addresses: Vec<InetAddress>,
    },
}

fn read_physical<const CAP: usize>(
    buf: &crate::buffer::Buffer<CAP>,
    cursor: &mut usize,
    addr_type: u8,
) -> Result<Option<InetAddress>, PacketFault> {
    match addr_type {
        DEST_ADDRESS_TYPE_NONE => Ok(None),
        DEST_ADDRESS_TYPE_ETHERNET => {
            let _ = buf.read_bytes_fixed::<6>(cursor)?;
            Ok(None)
        }
        DEST_ADDRESS_TYPE_IPV4 => {
            let ip = *buf.read_bytes_fixed::<4>(cursor)?;
            let port = buf.read_u16(cursor)?;
            Ok(Some(InetAddress::from_ipv4(ip, port)))
        }
        DEST_ADDRESS_TYPE_IPV6 => {
            let ip = *buf.read_bytes_fixed::<16>(cursor)?;
            let port = buf.read_u16(cursor)?;
            Ok(Some(InetAddress::from_ipv6(ip, port)))
        }
        _ => Err(PacketFault::InvalidVerbPayload),
    }
}

fn append_physical<const CAP: usize>(buf: &mut crate::buffer::Buffer<CAP>, addr: Option<&InetAddress>) -> Result<(), PacketFault> {
    match addr {
        None => buf.append_u8(DEST_ADDRESS_TYPE_NONE)?,
        Some(a) => {
            if a.is_ipv4() {
                buf.append_u8(DEST_ADDRESS_TYPE_IPV4)?;
            } else {
                buf.append_u8(DEST_ADDRESS_TYPE_IPV6)?;
            }
            buf.append_bytes(a.ip_bytes().as_slice())?;
            buf.append_u16(a.port)?;
        }
    }
    Ok(())
}

/// Decode a packet's verb payload. The packet must already be dearmored and
/// decompressed. Anything structurally wrong yields a fault and the packet
/// is dropped by the caller; trailing bytes beyond known fields are ignored
/// for forward compatibility, as they always have been.
pub fn parse(packet: &Packet) -> Result<IncomingVerb, PacketFault> {
    let verb = packet.verb().ok_or(PacketFault::UnrecognizedVerb)?;
    let buf = packet.buffer();
    let mut cursor = PACKET_IDX_PAYLOAD;

    match verb {
        Verb::Nop => Ok(IncomingVerb::Nop),

        Verb::Hello => {
            let protocol_version = buf.read_u8(&mut cursor)?;
            let major_version = buf.read_u8(&mut cursor)?;
            let minor_version = buf.read_u8(&mut cursor)?;
            let revision = buf.read_u16(&mut cursor)?;
            let timestamp = buf.read_u64(&mut cursor)?;
            let identity = Identity::unmarshal(buf, &mut cursor).map_err(|_| PacketFault::InvalidVerbPayload)?;
            let addr_type = buf.read_u8(&mut cursor)?;
            let physical_destination = read_physical(buf, &mut cursor, addr_type)?;
            Ok(IncomingVerb::Hello(Hello {
                protocol_version,
                major_version,
                minor_version,
                revision,
                timestamp,
                identity,
                physical_destination,
            }))
        }

        Verb::Error => {
            let in_re_verb = buf.read_u8(&mut cursor)?;
            let in_re_packet_id = buf.read_u64(&mut cursor)?;
            let error_code = ErrorCode::from_u8(buf.read_u8(&mut cursor)?).ok_or(PacketFault::InvalidVerbPayload)?;
            let payload = buf.bytes_starting_at(cursor)?.to_vec();
            Ok(IncomingVerb::Error { in_re_verb, in_re_packet_id, error_code, payload })
        }

        Verb::Ok => {
            let in_re_verb = buf.read_u8(&mut cursor)?;
            let in_re_packet_id = buf.read_u64(&mut cursor)?;
            let payload = buf.bytes_starting_at(cursor)?.to_vec();
            Ok(IncomingVerb::Ok { in_re_verb, in_re_packet_id, payload })
        }

        Verb::Whois => {
            let address = Address::from_bytes(buf.read_bytes(&mut cursor, ADDRESS_SIZE)?).ok_or(PacketFault::InvalidAddress)?;
            Ok(IncomingVerb::Whois { address })
        }

        Verb::Rendezvous => {
            let flags = buf.read_u8(&mut cursor)?;
            let peer_address = Address::from_bytes(buf.read_bytes(&mut cursor, ADDRESS_SIZE)?).ok_or(PacketFault::InvalidAddress)?;
            let port = buf.read_u16(&mut cursor)?;
            let addr_len = buf.read_u8(&mut cursor)? as usize;
            let physical = match addr_len {
                4 => Some(InetAddress::from_ipv4(*buf.read_bytes_fixed::<4>(&mut cursor)?, port)),
                16 => Some(InetAddress::from_ipv6(*buf.read_bytes_fixed::<16>(&mut cursor)?, port)),
                _ => {
                    let _ = buf.read_bytes(&mut cursor, addr_len)?;
                    None
                }
            };
            Ok(IncomingVerb::Rendezvous { flags, peer_address, port, physical })
        }

        Verb::Frame => {
            let network_id = buf.read_u64(&mut cursor)?;
            let ethertype = buf.read_u16(&mut cursor)?;
            let payload = buf.bytes_starting_at(cursor)?.to_vec();
            Ok(IncomingVerb::Frame { network_id, ethertype, payload })
        }

        Verb::ExtFrame => {
            let network_id = buf.read_u64(&mut cursor)?;
            let flags = buf.read_u8(&mut cursor)?;
            let com = if flags & EXT_FRAME_FLAG_COM_ATTACHED != 0 {
                Some(CertificateOfMembership::unmarshal(buf, &mut cursor).map_err(|_| PacketFault::InvalidVerbPayload)?)
            } else {
                None
            };
            let dest_mac = *buf.read_bytes_fixed::<6>(&mut cursor)?;
            let source_mac = *buf.read_bytes_fixed::<6>(&mut cursor)?;
            let ethertype = buf.read_u16(&mut cursor)?;
            let payload = buf.bytes_starting_at(cursor)?.to_vec();
            Ok(IncomingVerb::ExtFrame { network_id, flags, com, dest_mac, source_mac, ethertype, payload })
        }

        Verb::MulticastLike => {
            let mut groups = Vec::new();
            while cursor < buf.len() {
                groups.push(MulticastGroup {
                    network_id: buf.read_u64(&mut cursor)?,
                    mac: *buf.read_bytes_fixed::<6>(&mut cursor)?,
                    adi: buf.read_u32(&mut cursor)?,
                });
            }
            Ok(IncomingVerb::MulticastLike(groups))
        }

        Verb::NetworkMembershipCertificate => {
            let mut certs = Vec::new();
            while cursor < buf.len() {
                certs.push(CertificateOfMembership::unmarshal(buf, &mut cursor).map_err(|_| PacketFault::InvalidVerbPayload)?);
            }
            Ok(IncomingVerb::NetworkMembershipCertificate(certs))
        }

        Verb::NetworkConfigRequest => {
            let network_id = buf.read_u64(&mut cursor)?;
            let meta_len = buf.read_u16(&mut cursor)? as usize;
            let meta_bytes = buf.read_bytes(&mut cursor, meta_len)?;
            let metadata = Dictionary::from_string(String::from_utf8_lossy(meta_bytes).as_ref());
            let have_revision = if cursor + 8 <= buf.len() {
                Some(buf.read_u64(&mut cursor)?)
            } else {
                None
            };
            Ok(IncomingVerb::NetworkConfigRequest { network_id, metadata, have_revision })
        }

        Verb::NetworkConfigRefresh => {
            let mut ids = Vec::new();
            while cursor < buf.len() {
                ids.push(buf.read_u64(&mut cursor)?);
            }
            Ok(IncomingVerb::NetworkConfigRefresh(ids))
        }

        Verb::MulticastGather => {
            let network_id = buf.read_u64(&mut cursor)?;
            let flags = buf.read_u8(&mut cursor)?;
            let mac = *buf.read_bytes_fixed::<6>(&mut cursor)?;
            let adi = buf.read_u32(&mut cursor)?;
            let gather_limit = buf.read_u32(&mut cursor)?;
            let com = if flags & MULTICAST_FRAME_FLAG_COM_ATTACHED != 0 {
                Some(CertificateOfMembership::unmarshal(buf, &mut cursor).map_err(|_| PacketFault::InvalidVerbPayload)?)
            } else {
                None
            };
            Ok(IncomingVerb::MulticastGather { network_id, flags, mac, adi, gather_limit, com })
        }

        Verb::MulticastFrame => {
            let network_id = buf.read_u64(&mut cursor)?;
            let flags = buf.read_u8(&mut cursor)?;
            let com = if flags & MULTICAST_FRAME_FLAG_COM_ATTACHED != 0 {
                Some(CertificateOfMembership::unmarshal(buf, &mut cursor).map_err(|_| PacketFault::InvalidVerbPayload)?)
            } else {
                None
            };
            let gather_limit = if flags & MULTICAST_FRAME_FLAG_GATHER_LIMIT != 0 {
                Some(buf.read_u32(&mut cursor)?)
            } else {
                None
            };
            let source_mac = if flags & MULTICAST_FRAME_FLAG_SOURCE_MAC != 0 {
                Some(*buf.read_bytes_fixed::<6>(&mut cursor)?)
            } else {
                None
            };
            let dest_mac = *buf.read_bytes_fixed::<6>(&mut cursor)?;
            let dest_adi = buf.read_u32(&mut cursor)?;
            let ethertype = buf.read_u16(&mut cursor)?;
            let payload = buf.bytes_starting_at(cursor)?.to_vec();
            Ok(IncomingVerb::MulticastFrame {
                network_id,
                flags,
                com,
                gather_limit,
                source_mac,
                dest_mac,
                dest_adi,
                ethertype,
                payload,
            })
        }

        Verb::Cma => {
            let flags = buf.read_u8(&mut cursor)?;
            let n = buf.read_u16(&mut cursor)? as usize;
            let mut addresses = Vec::with_capacity(n.min(64));
            for _ in 0..n {
                let t = buf.read_u8(&mut cursor)?;
                if let Some(a) = read_physical(buf, &mut cursor, t)? {
                    addresses.push(a);
                }
            }
            Ok(IncomingVerb::Cma { flags, addresses })
        }
    }
}

/* Composition helpers for the verbs this engine originates. */

/// Compose a HELLO packet (unencrypted once armored; it carries the key).
pub fn make_hello(
    dest: Address,
    source: Address,
    major: u8,
    minor: u8,
    revision: u16,
    timestamp: u64,
    identity: &Identity,
    physical_destination: Option<&InetAddress>,
) -> Result<Packet, PacketFault> {
    let mut p = Packet::new(dest, source, Verb::Hello);
    let b = p.buffer_mut();
    b.append_u8(PROTOCOL_VERSION)?;
    b.append_u8(major)?;
    b.append_u8(minor)?;
    b.append_u16(revision)?;
    b.append_u64(timestamp)?;
    identity.marshal(b)?;
    append_physical(b, physical_destination)?;
    Ok(p)
}

/// Compose an ERROR reply to a received packet.
pub fn make_error(
    dest: Address,
    source: Address,
    in_re_verb: Verb,
    in_re_packet_id: u64,
    error_code: ErrorCode,
    detail: &[u8],
) -> Result<Packet, PacketFault> {
    let mut p = Packet::new(dest, source, Verb::Error);
    let b = p.buffer_mut();
    b.append_u8(in_re_verb as u8)?;
    b.append_u64(in_re_packet_id)?;
    b.append_u8(error_code as u8)?;
    b.append_bytes(detail)?;
    Ok(p)
}

/// Compose an OK(NETWORK_CONFIG_REQUEST) reply carrying a serialized
/// network configuration dictionary.
pub fn make_ok_network_config(
    dest: Address,
    source: Address,
    in_re_packet_id: u64,
    network_id: u64,
    netconf: &Dictionary,
) -> Result<Packet, PacketFault> {
    let dict = netconf.to_string();
    let mut p = Packet::new(dest, source, Verb::Ok);
    let b = p.buffer_mut();
    b.append_u8(Verb::NetworkConfigRequest as u8)?;
    b.append_u64(in_re_packet_id)?;
    b.append_u64(network_id)?;
    b.append_u16(dict.len() as u16)?;
    b.append_bytes(dict.as_bytes())?;
    Ok(p)
}

/// Compose a NETWORK_CONFIG_REQUEST.
pub fn make_network_config_request(
    dest: Address,
    source: Address,
    network_id: u64,
    metadata: &Dictionary,
    have_revision: Option<u64>,
) -> Result<Packet, PacketFault> {
    let meta = metadata.to_string();
    let mut p = Packet::new(dest, source, Verb::NetworkConfigRequest);
    let b = p.buffer_mut();
    b.append_u64(network_id)?;
    b.append_u16(meta.len() as u16)?;
    b.append_bytes(meta.as_bytes())?;
    if let Some(r) = have_revision {
        b.append_u64(r)?;
    }
    Ok(p)
}

/// Compose a WHOIS query.
pub fn make_whois(dest: Address, source: Address, address: Address) -> Result<Packet, PacketFault> {
    let mut p = Packet::new(dest, source, Verb::Whois);
    p.buffer_mut().append_bytes(&address.to_bytes())?;
    Ok(p)
}

/// Compose a unicast FRAME.
pub fn make_frame(dest: Address, source: Address, network_id: u64, ethertype: u16, payload: &[u8]) -> Result<Packet, PacketFault> {
    let mut p = Packet::new(dest, source, Verb::Frame);
    let b = p.buffer_mut();
    b.append_u64(network_id)?;
    b.append_u16(ethertype)?;
    b.append_bytes(payload)?;
    Ok(p)
}
