/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use arrayvec::ArrayVec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

use crate::buffer::Buffer;
use crate::crypto::salsa::Salsa;
use crate::crypto::secure_eq;
use crate::crypto::x25519::*;
use crate::crypto::Secret;
use crate::error::InvalidFormatError;
use crate::proto::{ADDRESS_SIZE, ADDRESS_SIZE_STRING, IDENTITY_POW_THRESHOLD};
use crate::Address;

/// Combined public key material: X25519 key followed by Ed25519 key.
pub const IDENTITY_PUBLIC_KEY_SIZE: usize = C25519_PUBLIC_KEY_SIZE + ED25519_PUBLIC_KEY_SIZE;

/// Combined secret key material.
pub const IDENTITY_SECRET_KEY_SIZE: usize = C25519_SECRET_KEY_SIZE + ED25519_SECRET_KEY_SIZE;

/// Maximum length of a binary serialized identity including secrets.
pub const IDENTITY_BYTE_LENGTH_MAX: usize = ADDRESS_SIZE + 1 + IDENTITY_PUBLIC_KEY_SIZE + 1 + IDENTITY_SECRET_KEY_SIZE;

const ADDRESS_DERIVATION_MEMORY_SIZE: usize = 2097152;

/// Secret halves of an identity.
#[derive(Clone)]
pub struct IdentitySecret {
    pub x25519: X25519KeyPair,
    pub ed25519: Ed25519KeyPair,
}

/// A unique identity on the network: a 40-bit address tied to a C25519 key
/// pair for agreement and an Ed25519 key pair for signatures.
///
/// The address is not arbitrary. It is the tail of a memory-hard digest of
/// the public keys, and the digest must also clear a difficulty threshold.
/// That makes intentional address collisions expensive, and it makes the
/// first identity seen for an address the one that counts: whoever stores an
/// identity first claims the address (see the controller's node records).
///
/// SECURITY NOTE: secrets are not exported by to_string() or to_bytes().
/// Use the *_secret variants when persisting a full identity.
#[derive(Clone)]
pub struct Identity {
    pub address: Address,
    pub x25519: [u8; C25519_PUBLIC_KEY_SIZE],
    pub ed25519: [u8; ED25519_PUBLIC_KEY_SIZE],
    pub secret: Option<IdentitySecret>,
}

/// The memory-hard work function from which addresses are derived.
///
/// The digest seeds a Salsa20/20 keystream that fills a 2 MiB arena, then
/// the digest is repeatedly swapped against keystream-selected slots of the
/// arena. Sequential, memory-bound, and (unlike a plain hash) miserable to
/// implement in a small circuit.
fn address_derivation_work_function(digest: &mut [u8; 64]) {
    let mut genmem = vec![0u8; ADDRESS_DERIVATION_MEMORY_SIZE];

    let mut salsa: Salsa<20> = Salsa::new(digest[..32].try_into().unwrap(), digest[32..40].try_into().unwrap());
    salsa.crypt_in_place(&mut genmem[..64]);
    let mut k = 0;
    while k < (ADDRESS_DERIVATION_MEMORY_SIZE - 64) {
        let (prev, next) = genmem.split_at_mut(k + 64);
        next[..64].copy_from_slice(&prev[k..k + 64]);
        salsa.crypt_in_place(&mut next[..64]);
        k += 64;
    }

    let mut i = 0;
    while i < ADDRESS_DERIVATION_MEMORY_SIZE {
        let idx1 = ((genmem[i + 7] % 8) as usize) * 8;
        let idx2 = ((u64::from_be_bytes(genmem[i + 8..i + 16].try_into().unwrap())
            % ((ADDRESS_DERIVATION_MEMORY_SIZE / 8) as u64))
            * 8) as usize;
        i += 16;
        let mut tmp = [0u8; 8];
        tmp.copy_from_slice(&genmem[idx2..idx2 + 8]);
        genmem[idx2..idx2 + 8].copy_from_slice(&digest[idx1..idx1 + 8]);
        digest[idx1..idx1 + 8].copy_from_slice(&tmp);
        salsa.crypt_in_place(digest);
    }
}

fn derive_address(x25519_pub: &[u8; C25519_PUBLIC_KEY_SIZE], ed25519_pub: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Option<Address> {
    let mut h = Sha512::new();
    h.update(x25519_pub);
    h.update(ed25519_pub);
    let mut digest: [u8; 64] = h.finalize().into();
    address_derivation_work_function(&mut digest);
    if digest[0] < IDENTITY_POW_THRESHOLD {
        Address::from_bytes(&digest[59..64])
    } else {
        None
    }
}

impl Identity {
    /// Generate a new identity.
    ///
    /// This repeats the memory-hard derivation until it yields a valid
    /// address, so it takes a perceptible amount of CPU time.
    pub fn generate() -> Identity {
        let ed25519 = Ed25519KeyPair::generate();
        let ed25519_pub = ed25519.public_bytes();
        loop {
            let x25519 = X25519KeyPair::generate();
            let x25519_pub = x25519.public_bytes();
            if let Some(address) = derive_address(&x25519_pub, &ed25519_pub) {
                return Identity {
                    address,
                    x25519: x25519_pub,
                    ed25519: ed25519_pub,
                    secret: Some(IdentitySecret { x25519, ed25519 }),
                };
            }
        }
    }

    /// Locally check that the address really belongs to these keys.
    ///
    /// Somewhat time consuming due to the memory-hard work function.
    pub fn validate(&self) -> bool {
        derive_address(&self.x25519, &self.ed25519).map_or(false, |a| a == self.address)
    }

    /// Create a clone minus any secret key it holds.
    pub fn clone_without_secret(&self) -> Identity {
        Identity { address: self.address, x25519: self.x25519, ed25519: self.ed25519, secret: None }
    }

    #[inline(always)]
    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    /// Perform C25519 ECDH key agreement with another identity.
    ///
    /// None if this identity does not hold its secret portion. The 64-byte
    /// result is the session secret; packet armor uses its first 32 bytes.
    pub fn agree(&self, other: &Identity) -> Option<Secret<C25519_SHARED_SECRET_SIZE>> {
        self.secret.as_ref().map(|s| s.x25519.agree(&other.x25519))
    }

    /// Sign a message, legacy 96-byte format. None without a secret key.
    pub fn sign(&self, msg: &[u8]) -> Option<[u8; SIGNATURE_SIZE]> {
        self.secret.as_ref().map(|s| s.ed25519.sign(msg))
    }

    /// Verify a signature made by this identity.
    #[inline]
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        ed25519_verify(&self.ed25519, signature, msg)
    }

    fn marshal_internal<const CAP: usize>(&self, buf: &mut Buffer<CAP>, include_secret: bool) -> Result<(), crate::buffer::OutOfBoundsError> {
        buf.append_bytes(&self.address.to_bytes())?;
        buf.append_u8(0)?; // key type 0: x25519/ed25519
        buf.append_bytes(&self.x25519)?;
        buf.append_bytes(&self.ed25519)?;
        if include_secret && self.secret.is_some() {
            let s = self.secret.as_ref().unwrap();
            buf.append_u8(IDENTITY_SECRET_KEY_SIZE as u8)?;
            buf.append_bytes(s.x25519.secret_bytes().as_bytes())?;
            buf.append_bytes(s.ed25519.secret_bytes().as_bytes())?;
        } else {
            buf.append_u8(0)?;
        }
        Ok(())
    }

    /// Serialize the public portion into a packet-style buffer.
    #[inline(always)]
    pub fn marshal<const CAP: usize>(&self, buf: &mut Buffer<CAP>) -> Result<(), crate::buffer::OutOfBoundsError> {
        self.marshal_internal(buf, false)
    }

    /// Serialize the public portion to a byte vector.
    pub fn to_bytes(&self) -> ArrayVec<u8, IDENTITY_BYTE_LENGTH_MAX> {
        let mut buf: Buffer<IDENTITY_BYTE_LENGTH_MAX> = Buffer::new();
        self.marshal_internal(&mut buf, false).unwrap();
        let mut v = ArrayVec::new();
        v.try_extend_from_slice(buf.as_bytes()).unwrap();
        v
    }

    /// Serialize including secret keys.
    pub fn to_secret_bytes(&self) -> ArrayVec<u8, IDENTITY_BYTE_LENGTH_MAX> {
        let mut buf: Buffer<IDENTITY_BYTE_LENGTH_MAX> = Buffer::new();
        self.marshal_internal(&mut buf, true).unwrap();
        let mut v = ArrayVec::new();
        v.try_extend_from_slice(buf.as_bytes()).unwrap();
        v
    }

    /// Deserialize from a buffer at a cursor, advancing the cursor.
    pub fn unmarshal<const CAP: usize>(buf: &Buffer<CAP>, cursor: &mut usize) -> Result<Identity, InvalidFormatError> {
        let address =
            Address::from_bytes_fixed(buf.read_bytes_fixed::<ADDRESS_SIZE>(cursor).map_err(|_| InvalidFormatError)?).ok_or(InvalidFormatError)?;
        if buf.read_u8(cursor).map_err(|_| InvalidFormatError)? != 0 {
            return Err(InvalidFormatError);
        }
        let x25519 = *buf.read_bytes_fixed::<C25519_PUBLIC_KEY_SIZE>(cursor).map_err(|_| InvalidFormatError)?;
        let ed25519 = *buf.read_bytes_fixed::<ED25519_PUBLIC_KEY_SIZE>(cursor).map_err(|_| InvalidFormatError)?;
        let secret = match buf.read_u8(cursor).map_err(|_| InvalidFormatError)? {
            0 => None,
            b if b == IDENTITY_SECRET_KEY_SIZE as u8 => {
                let x25519_s = buf.read_bytes_fixed::<C25519_SECRET_KEY_SIZE>(cursor).map_err(|_| InvalidFormatError)?;
                let ed25519_s = buf.read_bytes_fixed::<ED25519_SECRET_KEY_SIZE>(cursor).map_err(|_| InvalidFormatError)?;
                Some(IdentitySecret {
                    x25519: X25519KeyPair::from_bytes(&x25519, x25519_s).ok_or(InvalidFormatError)?,
                    ed25519: Ed25519KeyPair::from_bytes(&ed25519, ed25519_s).ok_or(InvalidFormatError)?,
                })
            }
            _ => return Err(InvalidFormatError),
        };
        Ok(Identity { address, x25519, ed25519, secret })
    }

    pub fn from_bytes(b: &[u8]) -> Result<Identity, InvalidFormatError> {
        let buf: Buffer<IDENTITY_BYTE_LENGTH_MAX> = Buffer::from_bytes(b).map_err(|_| InvalidFormatError)?;
        let mut cursor = 0;
        Self::unmarshal(&buf, &mut cursor)
    }

    fn to_string_internal(&self, include_secret: bool) -> String {
        let mut s = String::with_capacity(280);
        s.push_str(self.address.to_string().as_str());
        s.push_str(":0:");
        s.push_str(hex::encode(self.x25519).as_str());
        s.push_str(hex::encode(self.ed25519).as_str());
        if include_secret {
            if let Some(secret) = self.secret.as_ref() {
                s.push(':');
                s.push_str(hex::encode(secret.x25519.secret_bytes().as_bytes()).as_str());
                s.push_str(hex::encode(secret.ed25519.secret_bytes().as_bytes()).as_str());
            }
        }
        s
    }

    #[inline(always)]
    pub fn to_public_string(&self) -> String {
        self.to_string_internal(false)
    }

    #[inline(always)]
    pub fn to_secret_string(&self) -> String {
        self.to_string_internal(true)
    }
}

impl ToString for Identity {
    #[inline(always)]
    fn to_string(&self) -> String {
        self.to_string_internal(false)
    }
}

impl FromStr for Identity {
    type Err = InvalidFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() < 3 || fields.len() > 4 || fields[0].len() != ADDRESS_SIZE_STRING || fields[1] != "0" {
            return Err(InvalidFormatError);
        }
        let address = Address::from_str(fields[0]).map_err(|_| InvalidFormatError)?;

        let public = hex::decode(fields[2]).map_err(|_| InvalidFormatError)?;
        if public.len() != IDENTITY_PUBLIC_KEY_SIZE {
            return Err(InvalidFormatError);
        }
        let x25519: [u8; C25519_PUBLIC_KEY_SIZE] = public[..C25519_PUBLIC_KEY_SIZE].try_into().unwrap();
        let ed25519: [u8; ED25519_PUBLIC_KEY_SIZE] = public[C25519_PUBLIC_KEY_SIZE..].try_into().unwrap();

        let secret = if fields.len() == 4 && !fields[3].is_empty() {
            let sec = hex::decode(fields[3]).map_err(|_| InvalidFormatError)?;
            if sec.len() != IDENTITY_SECRET_KEY_SIZE {
                return Err(InvalidFormatError);
            }
            Some(IdentitySecret {
                x25519: X25519KeyPair::from_bytes(&x25519, sec[..C25519_SECRET_KEY_SIZE].try_into().unwrap()).ok_or(InvalidFormatError)?,
                ed25519: Ed25519KeyPair::from_bytes(&ed25519, sec[C25519_SECRET_KEY_SIZE..].try_into().unwrap()).ok_or(InvalidFormatError)?,
            })
        } else {
            None
        };

        Ok(Identity { address, x25519, ed25519, secret })
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && secure_eq(&self.x25519, &other.x25519) && secure_eq(&self.ed25519, &other.ed25519)
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.address.into())
    }
}

impl Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_string().as_str())
    }
}

impl Serialize for Identity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.to_public_string().as_str())
        } else {
            serializer.serialize_bytes(self.to_bytes().as_slice())
        }
    }
}

struct IdentityVisitor;

impl<'de> serde::de::Visitor<'de> for IdentityVisitor {
    type Value = Identity;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a ZeroTier identity")
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Identity::from_bytes(v).map_err(|e| E::custom(e.to_string()))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Identity::from_str(v).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D>(deserializer: D) -> Result<Identity, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(IdentityVisitor)
        } else {
            deserializer.deserialize_bytes(IdentityVisitor)
        }
    }
}
