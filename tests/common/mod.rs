/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use zerotier_one_core::crypto::x25519::{Ed25519KeyPair, X25519KeyPair};
use zerotier_one_core::identity::{Identity, IdentitySecret};
use zerotier_one_core::Address;

/// Build a key-valid identity with a chosen address, skipping the expensive
/// address-derivation search. The controller never re-derives addresses, so
/// these are fine for exercising it; anything that calls
/// `Identity::validate` needs `Identity::generate` instead.
#[allow(dead_code)]
pub fn test_identity(address: u64) -> Identity {
    let x = X25519KeyPair::generate();
    let e = Ed25519KeyPair::generate();
    Identity {
        address: Address::from_u64(address).unwrap(),
        x25519: x.public_bytes(),
        ed25519: e.public_bytes(),
        secret: Some(IdentitySecret { x25519: x, ed25519: e }),
    }
}
