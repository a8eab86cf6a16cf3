/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use crate::buffer::{Buffer, OutOfBoundsError};
use crate::crypto::{poly1305, random, salsa::Salsa, secure_eq, Secret};
use crate::error::{InvalidParameterError, PacketFault};
use crate::proto::*;
use crate::Address;

/// Buffer type sized to the largest assembled packet.
pub type PacketBuffer = Buffer<MAX_PACKET_SIZE>;

/// A protocol packet.
///
/// Wire format:
/// ```text
///   [0..8]   random initialization vector (doubles as 64-bit packet ID)
///   [8..13]  destination address
///   [13..18] source address
///   [18]     flags/cipher/hops: FFCCCHHH
///   [19..27] MAC (first 8 bytes of the Poly1305 tag)
///   -- begin encrypted envelope --
///   [27]     verb flags (top 3 bits) and verb (low 5 bits)
///   [28..]   verb payload
/// ```
///
/// Anything smaller than 28 bytes is invalid and silently discarded. The
/// 3-bit hop count is the only field mutable in transit without invalidating
/// the MAC; intermediate nodes increment it as they relay.
///
/// For unencrypted packets the MAC is computed over plaintext. Only HELLO is
/// ever sent in the clear, as it is the "here is my public key" message.
pub struct Packet(PacketBuffer);

impl Packet {
    /// Construct a new packet with a fresh random IV and zeroed flags.
    pub fn new(dest: Address, source: Address, verb: Verb) -> Packet {
        let mut b = PacketBuffer::new_with_length(MIN_PACKET_SIZE);
        random::fill_bytes_secure(b.bytes_at_mut(PACKET_IDX_IV, 8).unwrap());
        b.bytes_at_mut(PACKET_IDX_DEST, ADDRESS_SIZE).unwrap().copy_from_slice(&dest.to_bytes());
        b.bytes_at_mut(PACKET_IDX_SOURCE, ADDRESS_SIZE).unwrap().copy_from_slice(&source.to_bytes());
        let mut p = Packet(b);
        p.set_verb(verb);
        p
    }

    /// Wrap received bytes. Fails only on datagrams too large for the buffer;
    /// short datagrams are caught by `length_valid` so beacons can still be
    /// recognized.
    pub fn from_bytes(b: &[u8]) -> Result<Packet, OutOfBoundsError> {
        PacketBuffer::from_bytes(b).map(Packet)
    }

    #[inline(always)]
    pub fn buffer(&self) -> &PacketBuffer {
        &self.0
    }

    #[inline(always)]
    pub fn buffer_mut(&mut self) -> &mut PacketBuffer {
        &mut self.0
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline(always)]
    pub fn length_valid(&self) -> bool {
        self.0.len() >= MIN_PACKET_SIZE
    }

    /// The IV field interpreted as a 64-bit packet ID.
    #[inline(always)]
    pub fn packet_id(&self) -> u64 {
        self.0.u64_at(PACKET_IDX_IV).unwrap_or(0)
    }

    /// Generate a new IV / packet ID in place, allowing a composed packet to
    /// be re-armored and sent as a technically distinct copy.
    pub fn new_initialization_vector(&mut self) {
        random::fill_bytes_secure(self.0.bytes_at_mut(PACKET_IDX_IV, 8).unwrap());
    }

    pub fn destination(&self) -> Option<Address> {
        self.0.bytes_at(PACKET_IDX_DEST, ADDRESS_SIZE).ok().and_then(Address::from_bytes)
    }

    pub fn source(&self) -> Option<Address> {
        self.0.bytes_at(PACKET_IDX_SOURCE, ADDRESS_SIZE).ok().and_then(Address::from_bytes)
    }

    pub fn set_destination(&mut self, dest: Address) {
        self.0.bytes_at_mut(PACKET_IDX_DEST, ADDRESS_SIZE).unwrap().copy_from_slice(&dest.to_bytes());
    }

    pub fn set_source(&mut self, source: Address) {
        self.0.bytes_at_mut(PACKET_IDX_SOURCE, ADDRESS_SIZE).unwrap().copy_from_slice(&source.to_bytes());
    }

    #[inline(always)]
    fn flags(&self) -> u8 {
        self.0.u8_at(PACKET_IDX_FLAGS).unwrap_or(0)
    }

    #[inline(always)]
    pub fn fragmented(&self) -> bool {
        self.flags() & HEADER_FLAG_FRAGMENTED != 0
    }

    /// Set or clear the fragmented flag. This must be done before armoring:
    /// the flag is covered by the MAC and the receiver authenticates the
    /// reassembled packet with it still set.
    pub fn set_fragmented(&mut self, f: bool) {
        let b = self.flags();
        let _ = self.0.set_u8_at(
            PACKET_IDX_FLAGS,
            if f {
                b | HEADER_FLAG_FRAGMENTED
            } else {
                b & !HEADER_FLAG_FRAGMENTED
            },
        );
    }

    #[inline(always)]
    pub fn hops(&self) -> u8 {
        self.flags() & 0x07
    }

    /// Increment the hop count, saturating at the protocol maximum of 7.
    /// Relays may do this to an armored packet without breaking its MAC.
    pub fn increment_hops(&mut self) {
        let b = self.flags();
        let h = (b & 0x07) + 1;
        let _ = self.0.set_u8_at(PACKET_IDX_FLAGS, (b & HEADER_FLAGS_MASK_HIDE_HOPS) | h.min(MAX_HOPS));
    }

    /// Cipher suite selector: 0-7.
    #[inline(always)]
    pub fn cipher(&self) -> u8 {
        (self.flags() & 0x38) >> 3
    }

    fn set_cipher(&mut self, c: u8) {
        let mut b = (self.flags() & 0xc7) | ((c << 3) & 0x38);
        // Deprecated "encrypted" flag, still expected by pre-1.0.3 peers.
        if c == CIPHER_SUITE_C25519_POLY1305_SALSA2012 {
            b |= HEADER_FLAG_ENCRYPTED;
        } else {
            b &= !HEADER_FLAG_ENCRYPTED;
        }
        let _ = self.0.set_u8_at(PACKET_IDX_FLAGS, b);
    }

    /// Set the packet verb, clearing any verb flags.
    pub fn set_verb(&mut self, v: Verb) {
        let _ = self.0.set_u8_at(PACKET_IDX_VERB, v as u8);
    }

    /// The packet verb, None if the verb byte decodes to nothing we know.
    pub fn verb(&self) -> Option<Verb> {
        self.0.u8_at(PACKET_IDX_VERB).ok().and_then(Verb::from_u8)
    }

    /// True if the compressed verb flag is set (only meaningful once the
    /// envelope has been decrypted).
    pub fn compressed(&self) -> bool {
        self.0.u8_at(PACKET_IDX_VERB).map_or(false, |b| b & VERB_FLAG_COMPRESSED != 0)
    }

    #[inline(always)]
    pub fn payload(&self) -> &[u8] {
        self.0.bytes_starting_at(PACKET_IDX_PAYLOAD).unwrap_or(&[])
    }

    pub fn append_payload(&mut self, b: &[u8]) -> Result<(), OutOfBoundsError> {
        self.0.append_bytes(b)
    }

    /// Derive the per-packet Salsa20/12 key by folding header bytes into the
    /// shared secret.
    ///
    /// The IV and both addresses divide the key space (A->B and B->A differ),
    /// the flags byte participates with the hop bits masked off since relays
    /// mutate those, and the total packet length is mixed in little-endian so
    /// every packet size is its own key space. The remainder of the key
    /// passes through untouched. Salsa20 key setup is essentially free, so a
    /// fresh key per packet costs nothing.
    fn mangled_key(&self, key: &Secret<32>) -> Secret<32> {
        let mut out = Secret(key.0);
        let d = self.0.as_bytes();
        for i in 0..18 {
            out.0[i] ^= d[i];
        }
        out.0[18] ^= d[PACKET_IDX_FLAGS] & HEADER_FLAGS_MASK_HIDE_HOPS;
        let len = self.0.len();
        out.0[19] ^= len as u8;
        out.0[20] ^= len.wrapping_shr(8) as u8;
        out
    }

    /// Armor this packet for transport: select the cipher suite, derive the
    /// per-packet key, optionally encrypt the envelope, and stamp the
    /// truncated Poly1305 MAC.
    pub fn armor(&mut self, key: &Secret<32>, encrypt_payload: bool) {
        self.set_cipher(if encrypt_payload {
            CIPHER_SUITE_C25519_POLY1305_SALSA2012
        } else {
            CIPHER_SUITE_C25519_POLY1305_NONE
        });

        let mangled = self.mangled_key(key);
        let iv: [u8; 8] = *self.0.bytes_fixed_at::<8>(PACKET_IDX_IV).unwrap();
        let mut s20: Salsa<SALSA20_ROUNDS> = Salsa::new(mangled.as_bytes(), &iv);

        // The MAC key is always the first 32 bytes of the keystream, the
        // same construction DJB's NaCl library uses.
        let mut mac_key = Secret([0u8; 32]);
        s20.crypt_in_place(&mut mac_key.0);

        let envelope = self.0.bytes_starting_at_mut(PACKET_IDX_VERB).unwrap();
        if encrypt_payload {
            s20.crypt_in_place(envelope);
        }

        let mac = poly1305::compute(mac_key.as_bytes(), self.0.bytes_starting_at(PACKET_IDX_VERB).unwrap());
        self.0.bytes_at_mut(PACKET_IDX_MAC, 8).unwrap().copy_from_slice(&mac[..8]);
    }

    /// Verify the MAC in constant time and, if the cipher suite demands it,
    /// decrypt the envelope. On any failure the packet must be dropped
    /// without a reply; an attacker should learn nothing from us.
    pub fn dearmor(&mut self, key: &Secret<32>) -> Result<(), PacketFault> {
        if !self.length_valid() {
            return Err(PacketFault::Truncated);
        }
        let cs = self.cipher();
        if cs != CIPHER_SUITE_C25519_POLY1305_NONE && cs != CIPHER_SUITE_C25519_POLY1305_SALSA2012 {
            return Err(PacketFault::UnrecognizedCipherSuite);
        }

        let mangled = self.mangled_key(key);
        let iv: [u8; 8] = *self.0.bytes_fixed_at::<8>(PACKET_IDX_IV).unwrap();
        let mut s20: Salsa<SALSA20_ROUNDS> = Salsa::new(mangled.as_bytes(), &iv);

        let mut mac_key = Secret([0u8; 32]);
        s20.crypt_in_place(&mut mac_key.0);

        let mac = poly1305::compute(mac_key.as_bytes(), self.0.bytes_starting_at(PACKET_IDX_VERB).unwrap());
        if !secure_eq(&mac[..8], self.0.bytes_at(PACKET_IDX_MAC, 8).unwrap()) {
            tracing::debug!(packet_id = self.packet_id(), "dropping packet: MAC check failed");
            return Err(PacketFault::FailedAuthentication);
        }

        if cs == CIPHER_SUITE_C25519_POLY1305_SALSA2012 {
            s20.crypt_in_place(self.0.bytes_starting_at_mut(PACKET_IDX_VERB).unwrap());
        }
        Ok(())
    }

    /// Attempt to LZ4 compress the payload in place (must not yet be
    /// encrypted). The compressed form replaces the original only if it is
    /// strictly smaller; the verb's compressed flag reflects what happened.
    pub fn compress(&mut self) -> bool {
        let mut scratch = [0u8; MAX_PACKET_SIZE];
        if !self.compressed() && self.0.len() > (PACKET_IDX_PAYLOAD + COMPRESSION_THRESHOLD) {
            let pl = self.0.len() - PACKET_IDX_PAYLOAD;
            if let Ok(cl) = lz4_flex::block::compress_into(self.0.bytes_starting_at(PACKET_IDX_PAYLOAD).unwrap(), &mut scratch) {
                if cl > 0 && cl < pl {
                    let vb = self.0.u8_at(PACKET_IDX_VERB).unwrap();
                    let _ = self.0.set_u8_at(PACKET_IDX_VERB, vb | VERB_FLAG_COMPRESSED);
                    self.0.set_size(PACKET_IDX_PAYLOAD + cl);
                    self.0.bytes_starting_at_mut(PACKET_IDX_PAYLOAD).unwrap().copy_from_slice(&scratch[..cl]);
                    return true;
                }
            }
        }
        if let Ok(vb) = self.0.u8_at(PACKET_IDX_VERB) {
            let _ = self.0.set_u8_at(PACKET_IDX_VERB, vb & !VERB_FLAG_COMPRESSED);
        }
        false
    }

    /// Decompress the payload in place if the compressed verb flag is set
    /// (must already be decrypted). Fails if the payload is corrupt or the
    /// decompressed size would exceed the packet buffer.
    pub fn uncompress(&mut self) -> Result<(), PacketFault> {
        if self.compressed() && self.length_valid() {
            let mut scratch = [0u8; MAX_PACKET_SIZE];
            if self.0.len() > PACKET_IDX_PAYLOAD {
                let max_out = MAX_PACKET_SIZE - PACKET_IDX_PAYLOAD;
                let ucl = lz4_flex::block::decompress_into(self.0.bytes_starting_at(PACKET_IDX_PAYLOAD).unwrap(), &mut scratch)
                    .map_err(|_| PacketFault::InvalidCompressedPayload)?;
                if ucl == 0 || ucl > max_out {
                    return Err(PacketFault::InvalidCompressedPayload);
                }
                self.0.set_size(PACKET_IDX_PAYLOAD + ucl);
                self.0.bytes_starting_at_mut(PACKET_IDX_PAYLOAD).unwrap().copy_from_slice(&scratch[..ucl]);
            }
            let vb = self.0.u8_at(PACKET_IDX_VERB).unwrap();
            let _ = self.0.set_u8_at(PACKET_IDX_VERB, vb & !VERB_FLAG_COMPRESSED);
        }
        Ok(())
    }

    /// Split an armored packet into the tail fragments for the given MTU.
    ///
    /// Fragment zero is simply the first `mtu` bytes of the packet itself;
    /// the caller sends `as_bytes()[..mtu]` for it. The fragmented header
    /// flag must have been set before armoring or the receiver will never
    /// wait for the tail.
    pub fn fragment(&self, mtu: usize) -> Result<Vec<Fragment>, InvalidParameterError> {
        if mtu <= MIN_FRAGMENT_SIZE || self.0.len() <= mtu {
            return Err(InvalidParameterError("packet does not need fragmentation"));
        }
        let frag_payload = mtu - MIN_FRAGMENT_SIZE;
        let mut remaining = self.0.len() - mtu;
        let tail_count = (remaining + frag_payload - 1) / frag_payload;
        let total = tail_count + 1;
        if total > MAX_PACKET_FRAGMENTS {
            return Err(InvalidParameterError("packet too large for fragmentation at this MTU"));
        }

        let mut frags = Vec::with_capacity(tail_count);
        let mut frag_start = mtu;
        for fno in 1..total {
            let chunk = remaining.min(frag_payload);
            frags.push(Fragment::new(self, frag_start, chunk, fno as u8, total as u8).unwrap());
            frag_start += chunk;
            remaining -= chunk;
        }
        Ok(frags)
    }
}

/// A packet fragment.
///
/// Sent when a packet exceeds the UDP MTU. The first fragment is the packet
/// itself truncated to the MTU with the fragmented flag set; the rest use
/// this 16-byte header:
/// ```text
///   [0..8]  packet ID of the packet this fragment belongs to
///   [8..13] destination address
///   [13]    0xff, a reserved address byte, marking this as not a packet
///   [14]    total fragments (high 4 bits), fragment number (low 4 bits)
///   [15]    hop count (top 5 bits unused and must be zero)
///   [16..]  fragment data
/// ```
///
/// Fragments carry the total, so the receiver learns it from whichever
/// fragment arrives first. Loss of any fragment is loss of the packet; there
/// is no retransmission and no per-fragment MAC. Authentication happens on
/// the assembled packet.
///
/// The total nibble holds 1-15 directly; a full 16-fragment packet wraps to
/// zero on the wire. A real fragment count is never zero, so zero reads back
/// as 16 (fragment numbers need no such trick: tails are 1-15).
pub struct Fragment(PacketBuffer);

impl Fragment {
    fn new(p: &Packet, frag_start: usize, frag_len: usize, frag_no: u8, frag_total: u8) -> Result<Fragment, OutOfBoundsError> {
        let mut b = PacketBuffer::new_with_length(MIN_FRAGMENT_SIZE);
        // Copies both the packet ID and the destination address in one go.
        b.bytes_at_mut(FRAGMENT_IDX_PACKET_ID, 13)
            .unwrap()
            .copy_from_slice(p.buffer().bytes_at(PACKET_IDX_IV, 13)?);
        b.set_u8_at(FRAGMENT_IDX_INDICATOR, FRAGMENT_INDICATOR).unwrap();
        // A total of 16 masks to zero here; total_fragments() undoes it.
        b.set_u8_at(FRAGMENT_IDX_FRAGMENT_NO, (frag_total & 0x0f) << 4 | (frag_no & 0x0f)).unwrap();
        b.set_u8_at(FRAGMENT_IDX_HOPS, 0).unwrap();
        b.append_bytes(p.buffer().bytes_at(frag_start, frag_len)?)?;
        Ok(Fragment(b))
    }

    pub fn from_bytes(b: &[u8]) -> Result<Fragment, OutOfBoundsError> {
        PacketBuffer::from_bytes(b).map(Fragment)
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[inline(always)]
    pub fn length_valid(&self) -> bool {
        self.0.len() >= MIN_FRAGMENT_SIZE
    }

    #[inline(always)]
    pub fn packet_id(&self) -> u64 {
        self.0.u64_at(FRAGMENT_IDX_PACKET_ID).unwrap_or(0)
    }

    pub fn destination(&self) -> Option<Address> {
        self.0.bytes_at(FRAGMENT_IDX_DEST, ADDRESS_SIZE).ok().and_then(Address::from_bytes)
    }

    /// Total number of fragments in the packet, including the head. A zero
    /// nibble on the wire means the protocol maximum of 16.
    #[inline(always)]
    pub fn total_fragments(&self) -> u8 {
        match self.0.u8_at(FRAGMENT_IDX_FRAGMENT_NO).unwrap_or(0) >> 4 {
            0 => MAX_PACKET_FRAGMENTS as u8,
            t => t,
        }
    }

    #[inline(always)]
    pub fn fragment_number(&self) -> u8 {
        self.0.u8_at(FRAGMENT_IDX_FRAGMENT_NO).unwrap_or(0) & 0x0f
    }

    #[inline(always)]
    pub fn hops(&self) -> u8 {
        self.0.u8_at(FRAGMENT_IDX_HOPS).unwrap_or(0)
    }

    pub fn increment_hops(&mut self) {
        let h = self.hops();
        let _ = self.0.set_u8_at(FRAGMENT_IDX_HOPS, (h + 1).min(MAX_HOPS));
    }

    #[inline(always)]
    pub fn payload(&self) -> &[u8] {
        self.0.bytes_starting_at(FRAGMENT_IDX_PAYLOAD).unwrap_or(&[])
    }
}

/// True if a datagram is a fragment rather than a packet: the byte where a
/// packet's destination address would begin is the reserved 0xff prefix.
#[inline]
pub fn is_fragment(datagram: &[u8]) -> bool {
    datagram.len() > FRAGMENT_IDX_INDICATOR && datagram[FRAGMENT_IDX_INDICATOR] == FRAGMENT_INDICATOR
}

/// Compose a 13-byte LAN beacon: 8 random bytes then the sender's address.
pub fn make_beacon(sender: Address) -> [u8; BEACON_SIZE] {
    let mut b = [0u8; BEACON_SIZE];
    random::fill_bytes_secure(&mut b[..8]);
    b[BEACON_IDX_ADDRESS..].copy_from_slice(&sender.to_bytes());
    b
}

/// Recognize a beacon and extract the sender's address.
pub fn parse_beacon(datagram: &[u8]) -> Option<Address> {
    if datagram.len() == BEACON_SIZE {
        Address::from_bytes(&datagram[BEACON_IDX_ADDRESS..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addresses() -> (Address, Address) {
        (Address::from_u64(0x1111111111).unwrap(), Address::from_u64(0x2222222222).unwrap())
    }

    #[test]
    fn armor_dearmor_round_trip() {
        let (d, s) = test_addresses();
        let key = Secret([3u8; 32]);
        for encrypt in [false, true] {
            let mut p = Packet::new(d, s, Verb::Frame);
            p.append_payload(b"some frame bytes").unwrap();
            let original_payload = p.payload().to_vec();
            p.armor(&key, encrypt);
            assert_eq!(p.payload() == original_payload.as_slice(), !encrypt);

            let mut r = Packet::from_bytes(p.as_bytes()).unwrap();
            r.dearmor(&key).unwrap();
            assert_eq!(r.verb(), Some(Verb::Frame));
            assert_eq!(r.payload(), original_payload.as_slice());
        }
    }

    #[test]
    fn dearmor_rejects_wrong_key() {
        let (d, s) = test_addresses();
        let mut p = Packet::new(d, s, Verb::Nop);
        p.armor(&Secret([3u8; 32]), true);
        let mut r = Packet::from_bytes(p.as_bytes()).unwrap();
        assert_eq!(r.dearmor(&Secret([4u8; 32])), Err(PacketFault::FailedAuthentication));
    }

    #[test]
    fn dearmor_rejects_unknown_cipher() {
        let (d, s) = test_addresses();
        let key = Secret([3u8; 32]);
        let mut p = Packet::new(d, s, Verb::Nop);
        p.armor(&key, true);
        // Force the reserved ephemeral suite into the selector.
        let b = p.buffer().u8_at(PACKET_IDX_FLAGS).unwrap();
        let _ = p.buffer_mut().set_u8_at(PACKET_IDX_FLAGS, b | 0x38);
        assert_eq!(p.dearmor(&key), Err(PacketFault::UnrecognizedCipherSuite));
    }

    #[test]
    fn hop_bits_are_mutable_in_transit() {
        let (d, s) = test_addresses();
        let key = Secret([9u8; 32]);
        let mut p = Packet::new(d, s, Verb::Frame);
        p.append_payload(&[0x55; 64]).unwrap();
        p.armor(&key, true);

        let mut relayed = Packet::from_bytes(p.as_bytes()).unwrap();
        relayed.increment_hops();
        relayed.increment_hops();
        assert_eq!(relayed.hops(), 2);
        assert!(relayed.dearmor(&key).is_ok());

        // Saturation at 7.
        let mut r2 = Packet::from_bytes(p.as_bytes()).unwrap();
        for _ in 0..20 {
            r2.increment_hops();
        }
        assert_eq!(r2.hops(), MAX_HOPS);
        assert!(r2.dearmor(&key).is_ok());
    }

    #[test]
    fn every_non_hop_bit_is_authenticated() {
        let (d, s) = test_addresses();
        let key = Secret([7u8; 32]);
        let mut p = Packet::new(d, s, Verb::Frame);
        p.append_payload(&[0xa5; 40]).unwrap();
        p.armor(&key, true);
        let armored = p.as_bytes().to_vec();

        for byte in 0..armored.len() {
            for bit in 0..8u8 {
                // Skip the MAC field itself and the hop sub-field.
                if (PACKET_IDX_MAC..PACKET_IDX_MAC + 8).contains(&byte) {
                    continue;
                }
                if byte == PACKET_IDX_FLAGS && bit < 3 {
                    continue;
                }
                let mut corrupt = armored.clone();
                corrupt[byte] ^= 1 << bit;
                let mut r = Packet::from_bytes(&corrupt).unwrap();
                assert!(r.dearmor(&key).is_err(), "bit {} of byte {} was not authenticated", bit, byte);
            }
        }
    }

    #[test]
    fn empty_encrypted_ping() {
        // Zero key, NOP verb, no payload: cipher bits must read 001 and the
        // MAC must be non-zero, and dearmor must yield an empty payload.
        let (d, s) = test_addresses();
        let key = Secret([0u8; 32]);
        let mut p = Packet::new(d, s, Verb::Nop);
        p.armor(&key, true);
        assert_eq!(p.cipher(), CIPHER_SUITE_C25519_POLY1305_SALSA2012);
        assert_ne!(p.buffer().bytes_at(PACKET_IDX_MAC, 8).unwrap(), &[0u8; 8]);

        let mut r = Packet::from_bytes(p.as_bytes()).unwrap();
        r.dearmor(&key).unwrap();
        assert_eq!(r.verb(), Some(Verb::Nop));
        assert!(r.payload().is_empty());
    }

    #[test]
    fn compression_only_replaces_when_smaller() {
        let (d, s) = test_addresses();

        // Highly compressible payload.
        let mut p = Packet::new(d, s, Verb::Frame);
        p.append_payload(&[0x41; 4096]).unwrap();
        assert!(p.compress());
        assert!(p.compressed());
        assert!(p.len() < MIN_PACKET_SIZE + 4096);
        p.uncompress().unwrap();
        assert!(!p.compressed());
        assert_eq!(p.payload(), &[0x41; 4096][..]);

        // Payload too small to bother with.
        let mut small = Packet::new(d, s, Verb::Frame);
        small.append_payload(&[1, 2, 3]).unwrap();
        assert!(!small.compress());
        assert!(!small.compressed());

        // Incompressible payload leaves the flag unset.
        let mut noisy = Packet::new(d, s, Verb::Frame);
        let mut junk = [0u8; 512];
        let mut state = 0x9e3779b97f4a7c15u64;
        for b in junk.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            *b = (state >> 56) as u8;
        }
        noisy.append_payload(&junk).unwrap();
        let before = noisy.as_bytes().to_vec();
        assert!(!noisy.compress());
        assert!(!noisy.compressed());
        assert_eq!(noisy.as_bytes(), before.as_slice());
    }

    #[test]
    fn uncompress_rejects_garbage() {
        let (d, s) = test_addresses();
        let mut p = Packet::new(d, s, Verb::Frame);
        p.append_payload(&[0xff; 64]).unwrap();
        let vb = p.buffer().u8_at(PACKET_IDX_VERB).unwrap();
        let _ = p.buffer_mut().set_u8_at(PACKET_IDX_VERB, vb | VERB_FLAG_COMPRESSED);
        assert!(p.uncompress().is_err());
    }

    #[test]
    fn fragment_layout() {
        let (d, s) = test_addresses();
        let mut p = Packet::new(d, s, Verb::Frame);
        p.append_payload(&[0x77; 3000]).unwrap();
        p.set_fragmented(true);
        p.armor(&Secret([1u8; 32]), true);

        let frags = p.fragment(UDP_DEFAULT_PAYLOAD_MTU).unwrap();
        assert_eq!(frags.len(), 2);
        let total_payload: usize = frags.iter().map(|f| f.payload().len()).sum();
        assert_eq!(UDP_DEFAULT_PAYLOAD_MTU + total_payload, p.len());
        for (i, f) in frags.iter().enumerate() {
            assert!(is_fragment(f.as_bytes()));
            assert_eq!(f.packet_id(), p.packet_id());
            assert_eq!(f.destination(), Some(d));
            assert_eq!(f.total_fragments(), 3);
            assert_eq!(f.fragment_number(), (i + 1) as u8);
        }
        assert!(!is_fragment(p.as_bytes()));
    }

    #[test]
    fn sixteen_fragment_total_wraps_to_zero_on_the_wire() {
        // Large enough to need fifteen tails after the head: the total
        // nibble can only express 16 as zero, and the accessor must read it
        // back as 16.
        let (d, s) = test_addresses();
        let mut p = Packet::new(d, s, Verb::Frame);
        p.append_payload(&[0x5a; 22000]).unwrap();
        p.set_fragmented(true);
        p.armor(&Secret([2u8; 32]), true);

        let frags = p.fragment(UDP_DEFAULT_PAYLOAD_MTU).unwrap();
        assert_eq!(frags.len(), MAX_PACKET_FRAGMENTS - 1);
        for (i, f) in frags.iter().enumerate() {
            assert_eq!(f.as_bytes()[FRAGMENT_IDX_FRAGMENT_NO] >> 4, 0);
            assert_eq!(f.total_fragments(), MAX_PACKET_FRAGMENTS as u8);
            assert_eq!(f.fragment_number(), (i + 1) as u8);
        }
        let total_payload: usize = frags.iter().map(|f| f.payload().len()).sum();
        assert_eq!(UDP_DEFAULT_PAYLOAD_MTU + total_payload, p.len());

        // One more tail than the field can carry is refused outright.
        let mut too_big = Packet::new(d, s, Verb::Frame);
        too_big.append_payload(&[0x5a; 22900]).unwrap();
        too_big.set_fragmented(true);
        too_big.armor(&Secret([2u8; 32]), true);
        assert!(too_big.fragment(UDP_DEFAULT_PAYLOAD_MTU).is_err());
    }

    #[test]
    fn beacons() {
        let (_, s) = test_addresses();
        let b = make_beacon(s);
        assert_eq!(parse_beacon(&b), Some(s));
        assert_eq!(parse_beacon(&b[..12]), None);
    }
}
