/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use ed25519_dalek::{Signer, Verifier};
use rand_core::OsRng;
use sha2::{Digest, Sha512};

use crate::crypto::Secret;

pub const C25519_PUBLIC_KEY_SIZE: usize = 32;
pub const C25519_SECRET_KEY_SIZE: usize = 32;
pub const C25519_SHARED_SECRET_SIZE: usize = 64;
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;
pub const ED25519_SECRET_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Size of the legacy signature format: a 64-byte Ed25519 signature followed
/// by the first 32 bytes of the SHA-512 digest of the signed message.
pub const SIGNATURE_SIZE: usize = 96;

/// Curve25519 Diffie-Hellman key pair.
#[derive(Clone)]
pub struct X25519KeyPair {
    secret: x25519_dalek::StaticSecret,
    public: x25519_dalek::PublicKey,
}

impl X25519KeyPair {
    pub fn generate() -> X25519KeyPair {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        X25519KeyPair { secret, public }
    }

    pub fn from_bytes(public_bytes: &[u8; C25519_PUBLIC_KEY_SIZE], secret_bytes: &[u8; C25519_SECRET_KEY_SIZE]) -> Option<X25519KeyPair> {
        let secret = x25519_dalek::StaticSecret::from(*secret_bytes);
        let public = x25519_dalek::PublicKey::from(*public_bytes);
        // The public key must actually belong to the secret.
        if x25519_dalek::PublicKey::from(&secret).as_bytes() == public.as_bytes() {
            Some(X25519KeyPair { secret, public })
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn public_bytes(&self) -> [u8; C25519_PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    #[inline(always)]
    pub fn secret_bytes(&self) -> Secret<C25519_SECRET_KEY_SIZE> {
        Secret(self.secret.to_bytes())
    }

    /// Perform ECDH key agreement and run the raw shared secret through
    /// SHA-512, yielding the 64-byte session secret the protocol keys are
    /// cut from.
    pub fn agree(&self, other_public: &[u8; C25519_PUBLIC_KEY_SIZE]) -> Secret<C25519_SHARED_SECRET_SIZE> {
        let raw = self.secret.diffie_hellman(&x25519_dalek::PublicKey::from(*other_public));
        let mut h = Sha512::new();
        h.update(raw.as_bytes());
        Secret(h.finalize().into())
    }
}

/// Ed25519 signing key pair.
#[derive(Clone)]
pub struct Ed25519KeyPair {
    secret: ed25519_dalek::SigningKey,
}

impl Ed25519KeyPair {
    pub fn generate() -> Ed25519KeyPair {
        Ed25519KeyPair { secret: ed25519_dalek::SigningKey::generate(&mut OsRng) }
    }

    pub fn from_bytes(public_bytes: &[u8; ED25519_PUBLIC_KEY_SIZE], secret_bytes: &[u8; ED25519_SECRET_KEY_SIZE]) -> Option<Ed25519KeyPair> {
        let secret = ed25519_dalek::SigningKey::from_bytes(secret_bytes);
        if secret.verifying_key().to_bytes() == *public_bytes {
            Some(Ed25519KeyPair { secret })
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn public_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.secret.verifying_key().to_bytes()
    }

    #[inline(always)]
    pub fn secret_bytes(&self) -> Secret<ED25519_SECRET_KEY_SIZE> {
        Secret(self.secret.to_bytes())
    }

    /// Produce a plain 64-byte Ed25519 signature.
    pub fn sign_raw(&self, msg: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.secret.sign(msg).to_bytes()
    }

    /// Produce a legacy 96-byte signature: the Ed25519 signature followed by
    /// the first 32 bytes of SHA-512(msg). The digest suffix lets receivers
    /// cheaply pre-screen corrupted messages before the curve operation.
    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        out[..ED25519_SIGNATURE_SIZE].copy_from_slice(&self.sign_raw(msg));
        let mut h = Sha512::new();
        h.update(msg);
        let digest = h.finalize();
        out[ED25519_SIGNATURE_SIZE..].copy_from_slice(&digest[..32]);
        out
    }
}

/// Verify a signature in either the raw 64-byte or legacy 96-byte format.
pub fn ed25519_verify(public_bytes: &[u8; ED25519_PUBLIC_KEY_SIZE], signature: &[u8], msg: &[u8]) -> bool {
    if signature.len() < ED25519_SIGNATURE_SIZE {
        return false;
    }
    if signature.len() >= SIGNATURE_SIZE {
        // Legacy format carries a digest prefix; reject early on mismatch.
        let mut h = Sha512::new();
        h.update(msg);
        let digest = h.finalize();
        if !crate::crypto::secure_eq(&signature[ED25519_SIGNATURE_SIZE..SIGNATURE_SIZE], &digest[..32]) {
            return false;
        }
    }
    let Ok(vk) = ed25519_dalek::VerifyingKey::from_bytes(public_bytes) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(&signature[..ED25519_SIGNATURE_SIZE]) else {
        return false;
    };
    vk.verify(msg, &sig).is_ok()
}
