/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use poly1305::universal_hash::KeyInit;

pub const POLY1305_ONE_TIME_KEY_SIZE: usize = 32;
pub const POLY1305_MAC_SIZE: usize = 16;

/// The poly1305 one-time message authentication function.
///
/// The key must never be used to authenticate more than one message. Packet
/// armor derives a fresh key for every packet from the Salsa20/12 keystream,
/// which is the same construction DJB's NaCl library uses.
pub fn compute(one_time_key: &[u8; POLY1305_ONE_TIME_KEY_SIZE], message: &[u8]) -> [u8; POLY1305_MAC_SIZE] {
    poly1305::Poly1305::new(one_time_key.into()).compute_unpadded(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc7539_vector() {
        // RFC 7539 section 2.5.2.
        let key: [u8; 32] = [
            0x85, 0xd6, 0xbe, 0x78, 0x57, 0x55, 0x6d, 0x33, 0x7f, 0x44, 0x52, 0xfe, 0x42, 0xd5, 0x06, 0xa8, 0x01,
            0x03, 0x80, 0x8a, 0xfb, 0x0d, 0xb2, 0xfd, 0x4a, 0xbf, 0xf6, 0xaf, 0x41, 0x49, 0xf5, 0x1b,
        ];
        let msg = b"Cryptographic Forum Research Group";
        let expected: [u8; 16] = [
            0xa8, 0x06, 0x1d, 0xc1, 0x30, 0x51, 0x36, 0xc6, 0xc2, 0x2b, 0x8b, 0xaf, 0x0c, 0x01, 0x27, 0xa9,
        ];
        assert_eq!(compute(&key, msg), expected);
    }

    #[test]
    fn different_keys_different_tags() {
        let m = b"message";
        assert_ne!(compute(&[1u8; 32], m), compute(&[2u8; 32], m));
    }
}
