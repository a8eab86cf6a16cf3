/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

mod api;
mod engine;
pub mod model;
pub mod netconf;
pub mod store;

pub use engine::EmbeddedNetworkController;

use crate::dictionary::Dictionary;
use crate::identity::Identity;
use crate::inetaddress::InetAddress;

/// API version reported via the JSON control plane.
pub const CONTROLLER_API_VERSION: u32 = 1;

/// Result of a network configuration request.
///
/// These are fatal to the request, never to the process. The node-facing
/// layer maps them onto protocol ERROR verbs and the HTTP layer onto status
/// codes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResultCode {
    /// Config was built and signed; the dictionary is the reply body.
    Ok,
    /// The requester's revision is already current; no body.
    OkButNotNewer,
    /// No such network.
    ObjectNotFound,
    /// Requester is not an authorized member (or an identity collision).
    AccessDenied,
    /// Misconfiguration on our side, e.g. a signing identity that cannot
    /// sign or does not own the network ID's controller prefix.
    InternalServerError,
}

/// The capability surface a network controller presents to its host.
///
/// The wire engine calls `do_network_config_request` when it dispatches a
/// NETWORK_CONFIG_REQUEST verb; the host's control plane calls the HTTP
/// handlers with pre-split path segments and (for POST) a JSON body. A
/// controller implementation owns whatever state store it needs behind this
/// boundary.
pub trait NetworkController: Send + Sync {
    /// Compute (and possibly sign) the network config for a requesting
    /// member. On `Ok` the dictionary is present; on every other result it
    /// is None.
    fn do_network_config_request(
        &self,
        from_physical: Option<InetAddress>,
        signing_id: &Identity,
        requester: &Identity,
        network_id: u64,
        metadata: &Dictionary,
        have_revision: Option<u64>,
    ) -> (ResultCode, Option<Dictionary>);

    /// Serve a GET on the JSON control plane. Returns HTTP status and body.
    fn handle_http_get(&self, path: &[&str]) -> (u16, String);

    /// Serve a POST. Collection fields present in the body replace their
    /// prior contents atomically; the network revision advances exactly once.
    fn handle_http_post(&self, path: &[&str], body: &str) -> (u16, String);

    /// Serve a DELETE. 200 on success, 404 if the target does not exist.
    fn handle_http_delete(&self, path: &[&str]) -> (u16, String);
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
