/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::fmt::Debug;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InvalidFormatError;
use crate::proto::{ADDRESS_RESERVED_PREFIX, ADDRESS_SIZE, ADDRESS_SIZE_STRING};

/// A 40-bit node address.
///
/// Zero is not a valid address, and no valid address begins with 0xff: that
/// prefix is reserved so the wire can distinguish fragments from packets by
/// their destination byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Address(NonZeroU64);

impl Address {
    /// Construct from a u64 whose low 40 bits are the address.
    /// Returns None for zero or for the reserved 0xff prefix.
    #[inline]
    pub fn from_u64(i: u64) -> Option<Address> {
        let i = i & 0xff_ffff_ffff;
        if (i >> 32) as u8 == ADDRESS_RESERVED_PREFIX {
            return None;
        }
        NonZeroU64::new(i).map(Address)
    }

    /// Construct from exactly 5 bytes. None if the slice is short or the
    /// value is invalid.
    pub fn from_bytes(b: &[u8]) -> Option<Address> {
        if b.len() >= ADDRESS_SIZE {
            Self::from_u64(
                (b[0] as u64) << 32 | (b[1] as u64) << 24 | (b[2] as u64) << 16 | (b[3] as u64) << 8 | b[4] as u64,
            )
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn from_bytes_fixed(b: &[u8; ADDRESS_SIZE]) -> Option<Address> {
        Self::from_bytes(b)
    }

    #[inline(always)]
    pub fn to_u64(self) -> u64 {
        self.0.get()
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; ADDRESS_SIZE] {
        let i = self.0.get();
        [(i >> 32) as u8, (i >> 24) as u8, (i >> 16) as u8, (i >> 8) as u8, i as u8]
    }
}

impl From<Address> for u64 {
    #[inline(always)]
    fn from(a: Address) -> u64 {
        a.to_u64()
    }
}

impl ToString for Address {
    fn to_string(&self) -> String {
        format!("{:0>10x}", self.0.get())
    }
}

impl FromStr for Address {
    type Err = InvalidFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == ADDRESS_SIZE_STRING {
            u64::from_str_radix(s, 16)
                .ok()
                .and_then(Address::from_u64)
                .ok_or(InvalidFormatError)
        } else {
            Err(InvalidFormatError)
        }
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_string().as_str())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_str(s.as_str()).map_err(|_| serde::de::Error::custom("invalid address"))
    }
}
