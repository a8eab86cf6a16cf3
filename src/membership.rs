/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::str::FromStr;

use crate::buffer::Buffer;
use crate::crypto::x25519::SIGNATURE_SIZE;
use crate::error::InvalidFormatError;
use crate::identity::Identity;
use crate::proto::ADDRESS_SIZE;
use crate::Address;

/// Reserved qualifier IDs. Every controller-issued certificate carries all
/// three.
pub const COM_RESERVED_ID_REVISION: u64 = 0;
pub const COM_RESERVED_ID_NETWORK_ID: u64 = 1;
pub const COM_RESERVED_ID_ISSUED_TO: u64 = 2;

/// Revision window within which two certificates on the same network still
/// agree, so a peer holding a config one revision behind is not cut off
/// mid-update.
pub const COM_REVISION_MAX_DELTA: u64 = 16;

const COM_TYPE_UINT64_ED25519: u8 = 1;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Qualifier {
    id: u64,
    value: u64,
    max_delta: u64,
}

/// A certificate of network membership.
///
/// This is a set of `(id, value, max-delta)` qualifier triples signed by the
/// network controller. Two certificates agree when, for every qualifier ID
/// they share, the values differ by no more than the smaller of the two
/// max-deltas. Peers on a private network attach their certificate to
/// frames; the receiver admits the frame only if its own certificate agrees
/// with the presented one. Mutual agreement plus the controller's signature
/// is what "membership" means on the wire.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CertificateOfMembership {
    qualifiers: Vec<Qualifier>,
    signed_by: Option<Address>,
    signature: [u8; SIGNATURE_SIZE],
}

impl CertificateOfMembership {
    /// Create the standard certificate for a network member: the network's
    /// current revision (within the revision window), the exact network ID,
    /// and the exact address the certificate is issued to.
    pub fn new(revision: u64, revision_max_delta: u64, network_id: u64, issued_to: Address) -> CertificateOfMembership {
        CertificateOfMembership {
            qualifiers: vec![
                Qualifier { id: COM_RESERVED_ID_REVISION, value: revision, max_delta: revision_max_delta },
                Qualifier { id: COM_RESERVED_ID_NETWORK_ID, value: network_id, max_delta: 0 },
                Qualifier { id: COM_RESERVED_ID_ISSUED_TO, value: issued_to.to_u64(), max_delta: 0 },
            ],
            signed_by: None,
            signature: [0u8; SIGNATURE_SIZE],
        }
    }

    fn qualifier(&self, id: u64) -> Option<&Qualifier> {
        self.qualifiers.iter().find(|q| q.id == id)
    }

    pub fn revision(&self) -> u64 {
        self.qualifier(COM_RESERVED_ID_REVISION).map_or(0, |q| q.value)
    }

    pub fn network_id(&self) -> u64 {
        self.qualifier(COM_RESERVED_ID_NETWORK_ID).map_or(0, |q| q.value)
    }

    pub fn issued_to(&self) -> Option<Address> {
        self.qualifier(COM_RESERVED_ID_ISSUED_TO).and_then(|q| Address::from_u64(q.value))
    }

    #[inline(always)]
    pub fn signed_by(&self) -> Option<Address> {
        self.signed_by
    }

    /// Add or replace a qualifier. Invalidates any existing signature.
    pub fn set_qualifier(&mut self, id: u64, value: u64, max_delta: u64) {
        self.signed_by = None;
        match self.qualifiers.iter_mut().find(|q| q.id == id) {
            Some(q) => {
                q.value = value;
                q.max_delta = max_delta;
            }
            None => {
                self.qualifiers.push(Qualifier { id, value, max_delta });
                self.qualifiers.sort_by_key(|q| q.id);
            }
        }
    }

    /// Do this certificate and another agree?
    ///
    /// For every qualifier ID present in both, the values must differ by no
    /// more than the smaller max-delta. Qualifiers unknown to one side are
    /// not held against it.
    pub fn agrees_with(&self, other: &CertificateOfMembership) -> bool {
        for q in self.qualifiers.iter() {
            if let Some(o) = other.qualifier(q.id) {
                let diff = q.value.max(o.value) - q.value.min(o.value);
                if diff > q.max_delta.min(o.max_delta) {
                    return false;
                }
            }
        }
        true
    }

    /// The byte sequence covered by the signature: the packed qualifier
    /// triples in ascending ID order.
    fn signing_buffer(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.qualifiers.len() * 24);
        for q in self.qualifiers.iter() {
            v.extend_from_slice(&q.id.to_be_bytes());
            v.extend_from_slice(&q.value.to_be_bytes());
            v.extend_from_slice(&q.max_delta.to_be_bytes());
        }
        v
    }

    /// Sign this certificate. Basically can't fail unless the identity
    /// lacks its private key.
    pub fn sign(&mut self, with: &Identity) -> bool {
        match with.sign(self.signing_buffer().as_slice()) {
            Some(sig) => {
                self.signature = sig;
                self.signed_by = Some(with.address);
                true
            }
            None => false,
        }
    }

    /// Verify the signature against the issuing identity. The identity's
    /// address must match the certificate's signer field.
    pub fn verify(&self, signer: &Identity) -> bool {
        self.signed_by.map_or(false, |a| a == signer.address) && signer.verify(self.signing_buffer().as_slice(), &self.signature)
    }

    /// Serialize to wire format.
    pub fn marshal<const CAP: usize>(&self, buf: &mut Buffer<CAP>) -> Result<(), crate::buffer::OutOfBoundsError> {
        buf.append_u8(COM_TYPE_UINT64_ED25519)?;
        buf.append_u16(self.qualifiers.len() as u16)?;
        for q in self.qualifiers.iter() {
            buf.append_u64(q.id)?;
            buf.append_u64(q.value)?;
            buf.append_u64(q.max_delta)?;
        }
        match self.signed_by {
            Some(a) => {
                buf.append_bytes(&a.to_bytes())?;
                buf.append_bytes(&self.signature)?;
            }
            None => buf.append_bytes(&[0u8; ADDRESS_SIZE])?,
        }
        Ok(())
    }

    /// Deserialize from wire format, advancing the cursor.
    pub fn unmarshal<const CAP: usize>(buf: &Buffer<CAP>, cursor: &mut usize) -> Result<CertificateOfMembership, InvalidFormatError> {
        if buf.read_u8(cursor).map_err(|_| InvalidFormatError)? != COM_TYPE_UINT64_ED25519 {
            return Err(InvalidFormatError);
        }
        let count = buf.read_u16(cursor).map_err(|_| InvalidFormatError)? as usize;
        let mut qualifiers = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            qualifiers.push(Qualifier {
                id: buf.read_u64(cursor).map_err(|_| InvalidFormatError)?,
                value: buf.read_u64(cursor).map_err(|_| InvalidFormatError)?,
                max_delta: buf.read_u64(cursor).map_err(|_| InvalidFormatError)?,
            });
        }
        let signed_by_bytes = buf.read_bytes_fixed::<ADDRESS_SIZE>(cursor).map_err(|_| InvalidFormatError)?;
        let signed_by = Address::from_bytes_fixed(signed_by_bytes);
        let mut signature = [0u8; SIGNATURE_SIZE];
        if signed_by.is_some() {
            signature.copy_from_slice(buf.read_bytes_fixed::<SIGNATURE_SIZE>(cursor).map_err(|_| InvalidFormatError)?);
        } else if signed_by_bytes != &[0u8; ADDRESS_SIZE] {
            return Err(InvalidFormatError);
        }
        Ok(CertificateOfMembership { qualifiers, signed_by, signature })
    }
}

impl ToString for CertificateOfMembership {
    fn to_string(&self) -> String {
        let mut s = String::with_capacity(128);
        s.push_str("1:");
        s.push_str(hex::encode(self.signing_buffer()).as_str());
        if let Some(a) = self.signed_by {
            s.push(':');
            s.push_str(a.to_string().as_str());
            s.push(':');
            s.push_str(hex::encode(self.signature).as_str());
        }
        s
    }
}

impl FromStr for CertificateOfMembership {
    type Err = InvalidFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if (fields.len() != 2 && fields.len() != 4) || fields[0] != "1" {
            return Err(InvalidFormatError);
        }
        let packed = hex::decode(fields[1]).map_err(|_| InvalidFormatError)?;
        if packed.len() % 24 != 0 {
            return Err(InvalidFormatError);
        }
        let mut qualifiers = Vec::with_capacity(packed.len() / 24);
        for t in packed.chunks_exact(24) {
            qualifiers.push(Qualifier {
                id: u64::from_be_bytes(t[0..8].try_into().unwrap()),
                value: u64::from_be_bytes(t[8..16].try_into().unwrap()),
                max_delta: u64::from_be_bytes(t[16..24].try_into().unwrap()),
            });
        }
        let (signed_by, signature) = if fields.len() == 4 {
            let sig = hex::decode(fields[3]).map_err(|_| InvalidFormatError)?;
            if sig.len() != SIGNATURE_SIZE {
                return Err(InvalidFormatError);
            }
            (
                Some(Address::from_str(fields[2]).map_err(|_| InvalidFormatError)?),
                sig.as_slice().try_into().unwrap(),
            )
        } else {
            (None, [0u8; SIGNATURE_SIZE])
        };
        Ok(CertificateOfMembership { qualifiers, signed_by, signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_u64(n).unwrap()
    }

    #[test]
    fn standard_qualifiers() {
        let com = CertificateOfMembership::new(7, COM_REVISION_MAX_DELTA, 0xdeadbeef00000001, addr(0x1122334455));
        assert_eq!(com.revision(), 7);
        assert_eq!(com.network_id(), 0xdeadbeef00000001);
        assert_eq!(com.issued_to(), Some(addr(0x1122334455)));
    }

    #[test]
    fn agreement_window() {
        let nwid = 0xfeed00000000cafe;
        for (r1, r2, delta, expect) in [
            (10u64, 10u64, 16u64, true),
            (10, 11, 16, true),
            (10, 26, 16, true),
            (10, 27, 16, false),
            (27, 10, 16, false),
            (5, 6, 0, false),
            (5, 5, 0, true),
        ] {
            let a = CertificateOfMembership::new(r1, delta, nwid, addr(0x0000000001));
            let b = CertificateOfMembership::new(r2, delta, nwid, addr(0x0000000002));
            assert_eq!(a.agrees_with(&b), expect, "r1={} r2={} delta={}", r1, r2, delta);
            assert_eq!(b.agrees_with(&a), expect);
        }

        // Different network: exact-match qualifier fails regardless of revision.
        let a = CertificateOfMembership::new(1, 16, 1, addr(0x0000000001));
        let b = CertificateOfMembership::new(1, 16, 2, addr(0x0000000002));
        assert!(!a.agrees_with(&b));

        // The lower max-delta of the two governs.
        let mut tight = CertificateOfMembership::new(10, 1, 1, addr(0x0000000001));
        let loose = CertificateOfMembership::new(13, 16, 1, addr(0x0000000002));
        assert!(!tight.agrees_with(&loose));
        tight.set_qualifier(COM_RESERVED_ID_REVISION, 12, 1);
        assert!(tight.agrees_with(&loose));
    }

    #[test]
    fn qualifiers_unknown_to_one_side_are_ignored() {
        let mut a = CertificateOfMembership::new(1, 16, 9, addr(0x0000000001));
        let b = CertificateOfMembership::new(1, 16, 9, addr(0x0000000002));
        a.set_qualifier(100, 12345, 0);
        assert!(a.agrees_with(&b));
        assert!(b.agrees_with(&a));
    }

    #[test]
    fn sign_verify_and_serialize() {
        let controller = crate::identity::Identity::generate();
        let mut com = CertificateOfMembership::new(3, COM_REVISION_MAX_DELTA, 0x0102030405060708, addr(0x0000000042));
        assert!(com.sign(&controller));
        assert!(com.verify(&controller));

        // Wire round trip.
        let mut buf: Buffer<1024> = Buffer::new();
        com.marshal(&mut buf).unwrap();
        let mut cursor = 0;
        let com2 = CertificateOfMembership::unmarshal(&buf, &mut cursor).unwrap();
        assert_eq!(cursor, buf.len());
        assert_eq!(com, com2);
        assert!(com2.verify(&controller));

        // String round trip.
        let com3 = CertificateOfMembership::from_str(com.to_string().as_str()).unwrap();
        assert_eq!(com, com3);
        assert!(com3.verify(&controller));

        // Tampering breaks verification.
        let mut bad = com.clone();
        bad.qualifiers[0].value += 1;
        assert!(!bad.verify(&controller));
    }
}
