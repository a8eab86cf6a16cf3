/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

pub mod poly1305;
pub mod random;
pub mod salsa;
pub mod x25519;

// Re-export so implementors use the same exact version we do.
pub use rand_core;

/// Constant time byte slice equality.
#[inline]
pub fn secure_eq<A: AsRef<[u8]> + ?Sized, B: AsRef<[u8]> + ?Sized>(a: &A, b: &B) -> bool {
    let (a, b) = (a.as_ref(), b.as_ref());
    if a.len() == b.len() {
        let mut x = 0u8;
        for (aa, bb) in a.iter().zip(b.iter()) {
            x |= *aa ^ *bb;
        }
        x == 0
    } else {
        false
    }
}

/// Container for secrets that clears them on drop.
///
/// Libraries beneath us may keep their own copies, so this is not a complete
/// guarantee, but it keeps the number of secrets left lying around in process
/// memory down.
#[derive(Clone)]
#[repr(transparent)]
pub struct Secret<const L: usize>(pub [u8; L]);

impl<const L: usize> Secret<L> {
    /// Create a new all-zero secret.
    #[inline(always)]
    pub fn new() -> Self {
        Self([0u8; L])
    }

    #[inline(always)]
    pub fn from_bytes(b: [u8; L]) -> Self {
        Self(b)
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8; L] {
        &self.0
    }

    /// Get the first N bytes of this secret as a fixed length array.
    #[inline(always)]
    pub fn first_n<const N: usize>(&self) -> &[u8; N] {
        assert!(N <= L);
        self.0[..N].try_into().unwrap()
    }

    /// Clone the first N bytes of this secret as another secret.
    #[inline(always)]
    pub fn first_n_clone<const N: usize>(&self) -> Secret<N> {
        Secret::<N>(*self.first_n())
    }
}

impl<const L: usize> Drop for Secret<L> {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

impl<const L: usize> Default for Secret<L> {
    #[inline(always)]
    fn default() -> Self {
        Self([0u8; L])
    }
}

impl<const L: usize> AsRef<[u8]> for Secret<L> {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const L: usize> PartialEq for Secret<L> {
    fn eq(&self, other: &Self) -> bool {
        secure_eq(&self.0, &other.0)
    }
}

impl<const L: usize> Eq for Secret<L> {}

impl<const L: usize> std::fmt::Debug for Secret<L> {
    /// Secrets never appear in logs or panic output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret<{}>(..)", L)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_basics() {
        assert!(secure_eq(&[1u8, 2, 3], &[1u8, 2, 3]));
        assert!(!secure_eq(&[1u8, 2, 3], &[1u8, 2, 4]));
        assert!(!secure_eq(&[1u8, 2, 3], &[1u8, 2]));
        assert!(secure_eq(&[] as &[u8], &[] as &[u8]));
    }

    #[test]
    fn secret_prefix() {
        let s: Secret<8> = Secret::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(s.first_n::<4>(), &[1, 2, 3, 4]);
        assert_eq!(s.first_n_clone::<2>().as_bytes(), &[1, 2]);
    }
}
