/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

//! The v1 wire protocol engine and embedded network controller.
//!
//! This crate implements the packet format (armor/dearmor, compression,
//! fragmentation), node identities, the membership credential system, the
//! per-peer session layer, and the controller that issues signed network
//! configurations. Transport and OS integration are left to the host via
//! the contracts in [`phy`].

pub mod buffer;
pub mod controller;
pub mod crypto;
pub mod defrag;
pub mod dictionary;
pub mod error;
pub mod identity;
pub mod inetaddress;
pub mod membership;
pub mod packet;
pub mod peer;
pub mod phy;
pub mod proto;
pub mod switch;
pub mod topology;
pub mod verbs;

mod address;

pub use address::Address;
pub use identity::Identity;
pub use inetaddress::InetAddress;
