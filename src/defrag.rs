/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::collections::HashMap;

use crate::packet::{Fragment, Packet};
use crate::proto::{FRAGMENT_RECEIVE_TIMEOUT_MS, MAX_PACKET_FRAGMENTS};

/// Upper bound on packets concurrently awaiting fragments in one window.
/// Beyond this new fragment sets are dropped, which is just packet loss.
const MAX_INCOMPLETE_PACKETS: usize = 32;

struct FragmentedPacket {
    creation_time: i64,
    /// Total including the head; zero until learned from a tail fragment.
    total: u8,
    /// Bitmask of pieces received. Bit 0 is the head.
    have: u16,
    head: Option<Packet>,
    tails: [Option<Vec<u8>>; MAX_PACKET_FRAGMENTS],
}

impl FragmentedPacket {
    fn new(now: i64) -> Self {
        Self { creation_time: now, total: 0, have: 0, head: None, tails: Default::default() }
    }

    fn is_complete(&self) -> bool {
        // Widened shift: a full 16-piece packet needs the entire u16 mask
        // and 1u16 << 16 would overflow.
        self.total > 0 && self.head.is_some() && u32::from(self.have) == (1u32 << self.total) - 1
    }

    fn into_packet(self) -> Option<Packet> {
        let mut head = self.head?;
        for t in self.tails.iter().take(self.total as usize).skip(1) {
            head.buffer_mut().append_bytes(t.as_deref()?).ok()?;
        }
        Some(head)
    }
}

/// Reassembly window for fragmented packets.
///
/// Fragments may arrive in any order; the head (the packet itself, truncated
/// to the MTU with the fragmented flag set) may come before or after its
/// tails. Incomplete sets are dropped after a timeout: loss of any piece is
/// loss of the packet, as there is no retransmission at this layer. Nothing
/// here is authenticated; the assembled packet still has to pass dearmor.
pub struct Defragmenter {
    in_flight: HashMap<u64, FragmentedPacket>,
}

impl Defragmenter {
    pub fn new() -> Self {
        Self { in_flight: HashMap::with_capacity(MAX_INCOMPLETE_PACKETS) }
    }

    /// Submit a packet whose fragmented flag may be set. Returns the packet
    /// itself if it is whole, the assembled packet if this head completed a
    /// fragment set, or None if tails are still outstanding.
    pub fn assemble_packet(&mut self, packet: Packet, now: i64) -> Option<Packet> {
        if !packet.fragmented() {
            return Some(packet);
        }
        let id = packet.packet_id();
        let slot = self.slot(id, now)?;
        if slot.have & 1 != 0 {
            // Duplicate head; drop it silently.
            return None;
        }
        slot.have |= 1;
        slot.head = Some(packet);
        self.take_if_complete(id)
    }

    /// Submit a tail fragment. Returns the assembled packet if this was the
    /// last missing piece.
    pub fn assemble_fragment(&mut self, frag: Fragment, now: i64) -> Option<Packet> {
        let no = frag.fragment_number();
        let total = frag.total_fragments();
        if !frag.length_valid() || no == 0 || total as usize > MAX_PACKET_FRAGMENTS || no >= total {
            tracing::debug!(packet_id = frag.packet_id(), "dropping fragment: counters out of range");
            return None;
        }

        let id = frag.packet_id();
        if self.in_flight.get(&id).map_or(false, |s| s.total != 0 && s.total != total) {
            // Two fragments disagreeing about the total cannot both belong
            // to the real packet; drop the whole thing.
            self.in_flight.remove(&id);
            return None;
        }
        let slot = self.slot(id, now)?;
        if slot.total == 0 {
            slot.total = total;
        }
        let bit = 1u16 << no;
        if slot.have & bit != 0 {
            return None;
        }
        slot.have |= bit;
        slot.tails[no as usize] = Some(frag.payload().to_vec());
        self.take_if_complete(id)
    }

    /// Drop any fragment sets older than the receive timeout.
    pub fn expire(&mut self, now: i64) {
        self.in_flight.retain(|_, s| now - s.creation_time < FRAGMENT_RECEIVE_TIMEOUT_MS);
    }

    fn slot(&mut self, id: u64, now: i64) -> Option<&mut FragmentedPacket> {
        if !self.in_flight.contains_key(&id) {
            if self.in_flight.len() >= MAX_INCOMPLETE_PACKETS {
                self.expire(now);
                if self.in_flight.len() >= MAX_INCOMPLETE_PACKETS {
                    return None;
                }
            }
            self.in_flight.insert(id, FragmentedPacket::new(now));
        }
        self.in_flight.get_mut(&id)
    }

    fn take_if_complete(&mut self, id: u64) -> Option<Packet> {
        if self.in_flight.get(&id).map_or(false, |s| s.is_complete()) {
            let slot = self.in_flight.remove(&id).unwrap();
            let assembled = slot.into_packet();
            if assembled.is_none() {
                tracing::debug!(packet_id = id, "dropping packet: assembled size exceeds buffer");
            }
            assembled
        } else {
            None
        }
    }
}

impl Default for Defragmenter {
    fn default() -> Self {
        Self::new()
    }
}
