/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use rand_core::{OsRng, RngCore};

/// Fill a buffer with secure random bytes from the operating system.
#[inline]
pub fn fill_bytes_secure(dest: &mut [u8]) {
    OsRng.fill_bytes(dest);
}

/// Get a secure random 64-bit integer.
#[inline]
pub fn next_u64_secure() -> u64 {
    OsRng.next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_obviously_broken() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        fill_bytes_secure(&mut a);
        fill_bytes_secure(&mut b);
        assert_ne!(a, b);
        assert_ne!(next_u64_secure(), next_u64_secure());
    }
}
