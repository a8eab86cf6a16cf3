/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

/* Common constants */

/// Protocol version implemented by this engine.
pub const PROTOCOL_VERSION: u8 = 4;

/// Minimum protocol version we will talk to.
pub const PROTOCOL_VERSION_MIN: u8 = 4;

/// Length of a ZeroTier address in bytes.
pub const ADDRESS_SIZE: usize = 5;

/// Length of a ZeroTier address in hex characters.
pub const ADDRESS_SIZE_STRING: usize = 10;

/// Reserved first address byte; addresses beginning with 0xff are invalid.
/// This byte doubles as the fragment indicator on the wire.
pub const ADDRESS_RESERVED_PREFIX: u8 = 0xff;

/// Default payload MTU for UDP transport.
pub const UDP_DEFAULT_PAYLOAD_MTU: usize = 1444;

/// Maximum number of fragments per packet (4-bit counters on the wire).
pub const MAX_PACKET_FRAGMENTS: usize = 16;

/// Maximum size of an assembled packet.
pub const MAX_PACKET_SIZE: usize = MAX_PACKET_FRAGMENTS * UDP_DEFAULT_PAYLOAD_MTU;

/// How long an incomplete set of fragments may sit in the reassembly window.
pub const FRAGMENT_RECEIVE_TIMEOUT_MS: i64 = 1000;

/* Packet header layout (28 bytes, big-endian) */

pub const PACKET_IDX_IV: usize = 0;
pub const PACKET_IDX_DEST: usize = 8;
pub const PACKET_IDX_SOURCE: usize = 13;
pub const PACKET_IDX_FLAGS: usize = 18;
pub const PACKET_IDX_MAC: usize = 19;
pub const PACKET_IDX_VERB: usize = 27;
pub const PACKET_IDX_PAYLOAD: usize = 28;

/// Minimum viable packet length, which is also the length of the header.
pub const MIN_PACKET_SIZE: usize = PACKET_IDX_PAYLOAD;

/* Fragment header layout (16 bytes) */

pub const FRAGMENT_IDX_PACKET_ID: usize = 0;
pub const FRAGMENT_IDX_DEST: usize = 8;
pub const FRAGMENT_IDX_INDICATOR: usize = 13;
pub const FRAGMENT_IDX_FRAGMENT_NO: usize = 14;
pub const FRAGMENT_IDX_HOPS: usize = 15;
pub const FRAGMENT_IDX_PAYLOAD: usize = 16;

/// Value found at FRAGMENT_IDX_INDICATOR in fragments.
pub const FRAGMENT_INDICATOR: u8 = ADDRESS_RESERVED_PREFIX;

/// Minimum viable fragment length.
pub const MIN_FRAGMENT_SIZE: usize = FRAGMENT_IDX_PAYLOAD;

/* Flags byte: FFCCCHHH -- 2 outer flags, 3 cipher bits, 3 hop bits */

/// Deprecated "payload encrypted" flag, still mirrored from the cipher field
/// for the benefit of pre-1.0.3 peers. Covered by the MAC like everything
/// except the hop bits.
pub const HEADER_FLAG_ENCRYPTED: u8 = 0x80;

/// At least one fragment follows this packet.
pub const HEADER_FLAG_FRAGMENTED: u8 = 0x40;

/// Mask that hides the mutable hop bits, used when deriving per-packet keys.
pub const HEADER_FLAGS_MASK_HIDE_HOPS: u8 = 0xf8;

/// Maximum hop count representable in the 3-bit hop field.
pub const MAX_HOPS: u8 = 7;

/* Cipher suites (3-bit selector in the flags byte) */

/// Curve25519 key agreement, Poly1305 MAC, no payload encryption.
/// Only HELLO is ever sent this way since it transports a public key.
pub const CIPHER_SUITE_C25519_POLY1305_NONE: u8 = 0;

/// Curve25519 key agreement, Poly1305 MAC, Salsa20/12 payload encryption.
pub const CIPHER_SUITE_C25519_POLY1305_SALSA2012: u8 = 1;

/// Reserved for the negotiated ephemeral (PFS) suite.
pub const CIPHER_SUITE_EPHEMERAL: u8 = 7;

/// Verb flag indicating that the payload is LZ4 compressed.
pub const VERB_FLAG_COMPRESSED: u8 = 0x80;

/// Salsa20 rounds used for packet armor.
pub const SALSA20_ROUNDS: usize = 12;

/// Payload must exceed this many bytes past the header before compression
/// is even attempted.
pub const COMPRESSION_THRESHOLD: usize = 32;

/* Beacons */

/// Length of a LAN beacon: 8 random bytes then the sender's address.
pub const BEACON_SIZE: usize = 13;

pub const BEACON_IDX_ADDRESS: usize = 8;

/* Identity proof of work */

/// Accept a derived digest only if its first byte is below this threshold.
pub const IDENTITY_POW_THRESHOLD: u8 = 17;

/* HELLO / OK(HELLO) physical destination address types */

pub const DEST_ADDRESS_TYPE_NONE: u8 = 0;
pub const DEST_ADDRESS_TYPE_ETHERNET: u8 = 1;
pub const DEST_ADDRESS_TYPE_IPV4: u8 = 4;
pub const DEST_ADDRESS_TYPE_IPV6: u8 = 6;

/// Protocol verbs, the low 5 bits of the byte that begins the encrypted
/// envelope. The high 3 bits are verb flags (compression).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Verb {
    Nop = 0,
    Hello = 1,
    Error = 2,
    Ok = 3,
    Whois = 4,
    Rendezvous = 5,
    Frame = 6,
    ExtFrame = 7,
    MulticastLike = 9,
    NetworkMembershipCertificate = 10,
    NetworkConfigRequest = 11,
    NetworkConfigRefresh = 12,
    MulticastGather = 13,
    MulticastFrame = 14,
    Cma = 16,
}

impl Verb {
    /// Decode the low 5 bits of a verb byte. Unassigned values (including
    /// the deprecated P5 multicast frame and the retired ephemeral key push)
    /// return None and the packet is dropped by the caller.
    pub fn from_u8(b: u8) -> Option<Verb> {
        match b & 0x1f {
            0 => Some(Verb::Nop),
            1 => Some(Verb::Hello),
            2 => Some(Verb::Error),
            3 => Some(Verb::Ok),
            4 => Some(Verb::Whois),
            5 => Some(Verb::Rendezvous),
            6 => Some(Verb::Frame),
            7 => Some(Verb::ExtFrame),
            9 => Some(Verb::MulticastLike),
            10 => Some(Verb::NetworkMembershipCertificate),
            11 => Some(Verb::NetworkConfigRequest),
            12 => Some(Verb::NetworkConfigRefresh),
            13 => Some(Verb::MulticastGather),
            14 => Some(Verb::MulticastFrame),
            16 => Some(Verb::Cma),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Verb::Nop => "NOP",
            Verb::Hello => "HELLO",
            Verb::Error => "ERROR",
            Verb::Ok => "OK",
            Verb::Whois => "WHOIS",
            Verb::Rendezvous => "RENDEZVOUS",
            Verb::Frame => "FRAME",
            Verb::ExtFrame => "EXT_FRAME",
            Verb::MulticastLike => "MULTICAST_LIKE",
            Verb::NetworkMembershipCertificate => "NETWORK_MEMBERSHIP_CERTIFICATE",
            Verb::NetworkConfigRequest => "NETWORK_CONFIG_REQUEST",
            Verb::NetworkConfigRefresh => "NETWORK_CONFIG_REFRESH",
            Verb::MulticastGather => "MULTICAST_GATHER",
            Verb::MulticastFrame => "MULTICAST_FRAME",
            Verb::Cma => "CMA",
        }
    }
}

/// Error codes carried by the ERROR verb.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    InvalidRequest = 1,
    BadProtocolVersion = 2,
    ObjNotFound = 3,
    IdentityCollision = 4,
    UnsupportedOperation = 5,
    NeedMembershipCertificate = 6,
    NetworkAccessDenied = 7,
    UnwantedMulticast = 8,
}

impl ErrorCode {
    pub fn from_u8(b: u8) -> Option<ErrorCode> {
        match b {
            0 => Some(ErrorCode::None),
            1 => Some(ErrorCode::InvalidRequest),
            2 => Some(ErrorCode::BadProtocolVersion),
            3 => Some(ErrorCode::ObjNotFound),
            4 => Some(ErrorCode::IdentityCollision),
            5 => Some(ErrorCode::UnsupportedOperation),
            6 => Some(ErrorCode::NeedMembershipCertificate),
            7 => Some(ErrorCode::NetworkAccessDenied),
            8 => Some(ErrorCode::UnwantedMulticast),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::None => "NONE",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::BadProtocolVersion => "BAD_PROTOCOL_VERSION",
            ErrorCode::ObjNotFound => "OBJECT_NOT_FOUND",
            ErrorCode::IdentityCollision => "IDENTITY_COLLISION",
            ErrorCode::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            ErrorCode::NeedMembershipCertificate => "NEED_MEMBERSHIP_CERTIFICATE",
            ErrorCode::NetworkAccessDenied => "NETWORK_ACCESS_DENIED",
            ErrorCode::UnwantedMulticast => "UNWANTED_MULTICAST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_codes_round_trip() {
        for v in [
            Verb::Nop,
            Verb::Hello,
            Verb::Error,
            Verb::Ok,
            Verb::Whois,
            Verb::Rendezvous,
            Verb::Frame,
            Verb::ExtFrame,
            Verb::MulticastLike,
            Verb::NetworkMembershipCertificate,
            Verb::NetworkConfigRequest,
            Verb::NetworkConfigRefresh,
            Verb::MulticastGather,
            Verb::MulticastFrame,
            Verb::Cma,
        ] {
            assert_eq!(Verb::from_u8(v as u8), Some(v));
            // Verb flags in the high bits must not affect decoding.
            assert_eq!(Verb::from_u8(v as u8 | VERB_FLAG_COMPRESSED), Some(v));
        }
        assert_eq!(Verb::from_u8(8), None); // deprecated P5_MULTICAST_FRAME
        assert_eq!(Verb::from_u8(15), None); // retired SET_EPHEMERAL_KEY
    }

    #[test]
    fn header_layout() {
        assert_eq!(MIN_PACKET_SIZE, 28);
        assert_eq!(MIN_FRAGMENT_SIZE, 16);
        assert_eq!(PACKET_IDX_MAC + 8, PACKET_IDX_VERB);
    }
}
