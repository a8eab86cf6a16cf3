/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

/// Error thrown when a string or byte representation cannot be parsed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InvalidFormatError;

impl std::fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid format")
    }
}

impl std::error::Error for InvalidFormatError {}

/// Error thrown when a function is called with an unusable argument.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InvalidParameterError(pub &'static str);

impl std::fmt::Display for InvalidParameterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid parameter: {}", self.0)
    }
}

impl std::error::Error for InvalidParameterError {}

/// A fault in a received packet or fragment.
///
/// An unauthenticated attacker can intentionally trigger every one of these,
/// so they are never reported back to the network: the datagram is dropped
/// and at most a debug-level log line is emitted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PacketFault {
    /// Too short to carry even a header.
    Truncated,

    /// The 8-byte truncated Poly1305 tag did not verify.
    FailedAuthentication,

    /// The 3-bit cipher selector names a suite we do not implement.
    UnrecognizedCipherSuite,

    /// The compressed flag was set but the payload did not decompress, or
    /// the decompressed payload would exceed the packet buffer.
    InvalidCompressedPayload,

    /// A source or destination address was zero or used the reserved prefix.
    InvalidAddress,

    /// Fragment counters out of range, a duplicate index, or a fragment set
    /// that would exceed the maximum packet size.
    InvalidFragment,

    /// The verb byte decoded to an unassigned verb.
    UnrecognizedVerb,

    /// A verb payload ended before its fixed fields did.
    InvalidVerbPayload,
}

impl std::fmt::Display for PacketFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PacketFault::Truncated => "truncated packet",
            PacketFault::FailedAuthentication => "failed MAC check",
            PacketFault::UnrecognizedCipherSuite => "unrecognized cipher suite",
            PacketFault::InvalidCompressedPayload => "invalid compressed payload",
            PacketFault::InvalidAddress => "invalid address",
            PacketFault::InvalidFragment => "invalid fragment",
            PacketFault::UnrecognizedVerb => "unrecognized verb",
            PacketFault::InvalidVerbPayload => "invalid verb payload",
        })
    }
}

impl std::error::Error for PacketFault {}

impl From<crate::buffer::OutOfBoundsError> for PacketFault {
    #[inline(always)]
    fn from(_: crate::buffer::OutOfBoundsError) -> Self {
        PacketFault::Truncated
    }
}
