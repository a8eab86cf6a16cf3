/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

mod common;

use std::str::FromStr;

use serde_json::Value;

use common::test_identity;
use zerotier_one_core::controller::netconf::*;
use zerotier_one_core::controller::{EmbeddedNetworkController, NetworkController, ResultCode};
use zerotier_one_core::dictionary::Dictionary;
use zerotier_one_core::membership::CertificateOfMembership;
use zerotier_one_core::Identity;

const CONTROLLER_ADDRESS: u64 = 0xdeadbeefde;

fn controller() -> (EmbeddedNetworkController, Identity) {
    let id = test_identity(CONTROLLER_ADDRESS);
    (EmbeddedNetworkController::new(id.clone()).unwrap(), id)
}

fn request(
    c: &EmbeddedNetworkController,
    signing: &Identity,
    who: &Identity,
    nwid: u64,
    have_revision: Option<u64>,
) -> (ResultCode, Option<Dictionary>) {
    c.do_network_config_request(None, signing, who, nwid, &Dictionary::new(), have_revision)
}

fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

#[test]
fn controller_status() {
    let (c, _) = controller();
    let (status, body) = c.handle_http_get(&["controller"]);
    assert_eq!(status, 200);
    let v = json(&body);
    assert_eq!(v["controller"], Value::Bool(true));
    assert_eq!(v["apiVersion"], Value::from(1));
    assert!(v["clock"].as_u64().unwrap() > 0);
}

#[test]
fn bootstrap_mints_a_network_under_our_prefix() {
    let (c, _) = controller();

    let (status, body) = c.handle_http_post(&["network", "deadbeefde______"], "{}");
    assert_eq!(status, 200);
    let v = json(&body);
    let nwid = v["nwid"].as_str().unwrap();
    assert_eq!(nwid.len(), 16);
    assert!(nwid.starts_with("deadbeefde"));
    assert_eq!(v["revision"].as_u64(), Some(1));
    assert_eq!(v["private"], Value::Bool(true));

    // Listed afterwards.
    let (_, list) = c.handle_http_get(&["network"]);
    assert!(list.contains(nwid));

    // A second mint yields a distinct ID under the same prefix.
    let (status2, body2) = c.handle_http_post(&["network", "deadbeefde______"], "{}");
    assert_eq!(status2, 200);
    let nwid2 = json(&body2)["nwid"].as_str().unwrap().to_string();
    assert_ne!(nwid2, nwid);
    assert!(nwid2.starts_with("deadbeefde"));

    // Minting under someone else's prefix is refused.
    let (status3, _) = c.handle_http_post(&["network", "aaaaaaaaaa______"], "{}");
    assert_eq!(status3, 403);
}

#[test]
fn join_private_network_after_authorization() {
    let (c, signing) = controller();
    let (_, body) = c.handle_http_post(&["network", "deadbeefde______"], "{}");
    let nwid_s = json(&body)["nwid"].as_str().unwrap().to_string();
    let nwid = u64::from_str_radix(&nwid_s, 16).unwrap();

    let alice = test_identity(0x0000000aaa);

    // Not yet a member of the private network.
    let (code, d) = request(&c, &signing, &alice, nwid, None);
    assert_eq!(code, ResultCode::AccessDenied);
    assert!(d.is_none());

    // Authorize and retry: signed config plus a certificate naming alice.
    let (status, _) = c.handle_http_post(
        &["network", nwid_s.as_str(), "member", alice.address.to_string().as_str()],
        r#"{"authorized": true}"#,
    );
    assert_eq!(status, 200);

    let (code, d) = request(&c, &signing, &alice, nwid, None);
    assert_eq!(code, ResultCode::Ok);
    let d = d.unwrap();
    assert_eq!(d.get(NETCONF_KEY_NETWORK_ID), Some(nwid_s.as_str()));
    assert_eq!(d.get(NETCONF_KEY_ISSUED_TO), Some(alice.address.to_string().as_str()));
    assert_eq!(d.get(NETCONF_KEY_PRIVATE), Some("1"));
    assert!(d.verify(&signing));

    let com = CertificateOfMembership::from_str(d.get(NETCONF_KEY_CERTIFICATE_OF_MEMBERSHIP).unwrap()).unwrap();
    assert!(com.verify(&signing));
    assert_eq!(com.issued_to(), Some(alice.address));
    assert_eq!(com.network_id(), nwid);
    assert_eq!(com.revision(), d.get_hex_u64(NETCONF_KEY_REVISION, 0));
}

#[test]
fn revision_gating_returns_no_body_when_current() {
    let (c, signing) = controller();
    let (_, body) = c.handle_http_post(&["network", "deadbeefde______"], r#"{"private": false}"#);
    let nwid = u64::from_str_radix(json(&body)["nwid"].as_str().unwrap(), 16).unwrap();

    let bob = test_identity(0x0000000bbb);
    let (code, d) = request(&c, &signing, &bob, nwid, None);
    assert_eq!(code, ResultCode::Ok);
    let current = d.unwrap().get_hex_u64(NETCONF_KEY_REVISION, 0);

    let (code, d) = request(&c, &signing, &bob, nwid, Some(current));
    assert_eq!(code, ResultCode::OkButNotNewer);
    assert!(d.is_none());

    // A stale revision still gets a fresh config.
    let (code, d) = request(&c, &signing, &bob, nwid, Some(current - 1));
    assert_eq!(code, ResultCode::Ok);
    assert!(d.is_some());
}

#[test]
fn missing_network_is_not_found() {
    let (c, signing) = controller();
    let who = test_identity(0x0000000ccc);
    let (code, _) = request(&c, &signing, &who, (CONTROLLER_ADDRESS << 24) | 0x123456, None);
    assert_eq!(code, ResultCode::ObjectNotFound);
}

#[test]
fn signing_identity_must_own_the_network_prefix() {
    let (c, signing) = controller();
    let who = test_identity(0x0000000ddd);
    // Network ID whose high 40 bits are someone else's address.
    let (code, _) = request(&c, &signing, &who, 0xaaaaaaaaaa_000001, None);
    assert_eq!(code, ResultCode::InternalServerError);
    // Or a signing identity that cannot sign.
    let (code, _) = c.do_network_config_request(
        None,
        &signing.clone_without_secret(),
        &who,
        (CONTROLLER_ADDRESS << 24) | 1,
        &Dictionary::new(),
        None,
    );
    assert_eq!(code, ResultCode::InternalServerError);
}

#[test]
fn identities_are_first_come_first_claim() {
    let (c, signing) = controller();
    let (_, body) = c.handle_http_post(&["network", "deadbeefde______"], r#"{"private": false}"#);
    let nwid = u64::from_str_radix(json(&body)["nwid"].as_str().unwrap(), 16).unwrap();

    let genuine = test_identity(0x0000000eee);
    let (code, _) = request(&c, &signing, &genuine, nwid, None);
    assert_eq!(code, ResultCode::Ok);

    // Same address, different keys: denied, the address is claimed.
    let impostor = test_identity(0x0000000eee);
    let (code, _) = request(&c, &signing, &impostor, nwid, None);
    assert_eq!(code, ResultCode::AccessDenied);

    // The rightful owner is unaffected.
    let (code, _) = request(&c, &signing, &genuine, nwid, None);
    assert_eq!(code, ResultCode::Ok);
}

#[test]
fn ipv4_auto_assignment_walks_the_pool_in_order() {
    let (c, signing) = controller();
    let (_, body) = c.handle_http_post(
        &["network", "deadbeefde______"],
        r#"{
            "private": false,
            "v4AssignMode": "zt",
            "routes": [{"network": "10.0.0.0", "netmaskBits": 24}],
            "ipAssignmentPools": [{"network": "10.0.0.0", "ipFirst": "10.0.0.1", "ipLast": "10.0.0.3"}]
        }"#,
    );
    let v = json(&body);
    let nwid_s = v["nwid"].as_str().unwrap().to_string();
    let nwid = u64::from_str_radix(&nwid_s, 16).unwrap();
    assert_eq!(v["routes"][0]["network"], Value::from("10.0.0.0"));
    assert_eq!(v["ipAssignmentPools"][0]["ipFirst"], Value::from("10.0.0.1"));

    let members: Vec<Identity> = (1..=4).map(|i| test_identity(0x0000000100 + i)).collect();
    let mut seen = Vec::new();
    for (i, m) in members.iter().enumerate() {
        let (code, d) = request(&c, &signing, m, nwid, None);
        assert_eq!(code, ResultCode::Ok);
        let d = d.unwrap();
        match i {
            0 => assert_eq!(d.get(NETCONF_KEY_IPV4_STATIC), Some("10.0.0.1/24")),
            1 => assert_eq!(d.get(NETCONF_KEY_IPV4_STATIC), Some("10.0.0.2/24")),
            2 => assert_eq!(d.get(NETCONF_KEY_IPV4_STATIC), Some("10.0.0.3/24")),
            // Pool exhausted: no static assignment, not an error.
            _ => assert_eq!(d.get(NETCONF_KEY_IPV4_STATIC), None),
        }
        if let Some(v4s) = d.get(NETCONF_KEY_IPV4_STATIC) {
            assert!(!seen.contains(&v4s.to_string()), "address assigned twice");
            seen.push(v4s.to_string());
        }
    }

    // Assignments are stable across repeat requests.
    let (_, d) = request(&c, &signing, &members[0], nwid, None);
    assert_eq!(d.unwrap().get(NETCONF_KEY_IPV4_STATIC), Some("10.0.0.1/24"));

    // And visible through the member API.
    let (_, mbody) = c.handle_http_get(&["network", nwid_s.as_str(), "member", members[0].address.to_string().as_str()]);
    let mv = json(&mbody);
    assert_eq!(mv["ipAssignments"][0], Value::from("10.0.0.1/24"));
}

#[test]
fn revision_advances_exactly_once_per_mutation() {
    let (c, _) = controller();
    let (_, body) = c.handle_http_post(&["network", "deadbeefde______"], "{}");
    let nwid_s = json(&body)["nwid"].as_str().unwrap().to_string();
    let path = ["network", nwid_s.as_str()];

    let rev_of = |c: &EmbeddedNetworkController| {
        let (_, b) = c.handle_http_get(&path);
        json(&b)["revision"].as_u64().unwrap()
    };

    let mut expected = 1;
    assert_eq!(rev_of(&c), expected);

    // Scalar update.
    c.handle_http_post(&path, r#"{"name": "alpha", "multicastLimit": 64}"#);
    expected += 1;
    assert_eq!(rev_of(&c), expected);

    // A multi-collection update is still one mutation.
    c.handle_http_post(
        &path,
        r#"{
            "rules": [{"ruleNo": 10, "etherType": 2048, "action": "accept"}, {"ruleNo": 20, "action": "drop"}],
            "gateways": ["10.9.0.1/0"],
            "relays": [{"address": "0000000abc", "phyAddress": "192.0.2.1/9993"}]
        }"#,
    );
    expected += 1;
    assert_eq!(rev_of(&c), expected);

    // Member create + authorize via POST.
    c.handle_http_post(&["network", nwid_s.as_str(), "member", "0000000abc"], r#"{"authorized": true}"#);
    expected += 1;
    assert_eq!(rev_of(&c), expected);

    // Member static IP replacement.
    c.handle_http_post(
        &["network", nwid_s.as_str(), "member", "0000000abc"],
        r#"{"ipAssignments": ["10.9.0.50/24", "fd00::1/64"]}"#,
    );
    expected += 1;
    assert_eq!(rev_of(&c), expected);

    // Member delete.
    let (status, _) = c.handle_http_delete(&["network", nwid_s.as_str(), "member", "0000000abc"]);
    assert_eq!(status, 200);
    expected += 1;
    assert_eq!(rev_of(&c), expected);
}

#[test]
fn network_json_round_trips_collections() {
    let (c, _) = controller();
    let (_, body) = c.handle_http_post(
        &["network", "deadbeefde000042"],
        r#"{
            "name": "engineering",
            "private": true,
            "enableBroadcast": false,
            "rules": [{"ruleNo": 10, "etherType": 2048, "action": "accept"}]
        }"#,
    );
    let v = json(&body);
    assert_eq!(v["nwid"], Value::from("deadbeefde000042"));
    assert_eq!(v["name"], Value::from("engineering"));
    assert_eq!(v["enableBroadcast"], Value::Bool(false));
    assert_eq!(v["rules"][0]["ruleNo"].as_i64(), Some(10));
    assert_eq!(v["rules"][0]["etherType"].as_i64(), Some(2048));
    assert_eq!(v["rules"][0]["action"], Value::from("accept"));

    // Posting a new rules collection replaces, never merges.
    let (_, body2) = c.handle_http_post(
        &["network", "deadbeefde000042"],
        r#"{"rules": [{"ruleNo": 5, "action": "drop"}]}"#,
    );
    let v2 = json(&body2);
    assert_eq!(v2["rules"].as_array().unwrap().len(), 1);
    assert_eq!(v2["rules"][0]["ruleNo"].as_i64(), Some(5));

    // Collections left out of the body are untouched.
    let (_, body3) = c.handle_http_post(&["network", "deadbeefde000042"], r#"{"name": "eng"}"#);
    let v3 = json(&body3);
    assert_eq!(v3["rules"].as_array().unwrap().len(), 1);
}

#[test]
fn deletes_cascade_and_404_when_absent() {
    let (c, signing) = controller();
    let (_, body) = c.handle_http_post(&["network", "deadbeefde______"], r#"{"private": false}"#);
    let nwid_s = json(&body)["nwid"].as_str().unwrap().to_string();
    let nwid = u64::from_str_radix(&nwid_s, 16).unwrap();

    let m = test_identity(0x0000000f01);
    let (code, _) = request(&c, &signing, &m, nwid, None);
    assert_eq!(code, ResultCode::Ok);

    let member_path = ["network", nwid_s.as_str(), "member", "0000000f01"];
    let (status, _) = c.handle_http_get(&member_path);
    assert_eq!(status, 200);

    let (status, _) = c.handle_http_delete(&["network", nwid_s.as_str()]);
    assert_eq!(status, 200);
    let (status, _) = c.handle_http_get(&["network", nwid_s.as_str()]);
    assert_eq!(status, 404);
    let (status, _) = c.handle_http_get(&member_path);
    assert_eq!(status, 404);
    let (status, _) = c.handle_http_delete(&["network", nwid_s.as_str()]);
    assert_eq!(status, 404);

    // Member delete on a live network 404s when the member is unknown.
    let (_, body) = c.handle_http_post(&["network", "deadbeefde______"], "{}");
    let nwid2 = json(&body)["nwid"].as_str().unwrap().to_string();
    let (status, _) = c.handle_http_delete(&["network", nwid2.as_str(), "member", "0000000f02"]);
    assert_eq!(status, 404);
}

#[test]
fn ethertypes_come_from_accept_rules_sorted_and_deduplicated() {
    let (c, signing) = controller();
    let (_, body) = c.handle_http_post(
        &["network", "deadbeefde______"],
        r#"{
            "private": false,
            "rules": [
                {"ruleNo": 30, "etherType": 34525, "action": "accept"},
                {"ruleNo": 10, "etherType": 2048, "action": "accept"},
                {"ruleNo": 20, "etherType": 2054, "action": "drop"},
                {"ruleNo": 40, "etherType": 2048, "action": "accept"}
            ]
        }"#,
    );
    let nwid = u64::from_str_radix(json(&body)["nwid"].as_str().unwrap(), 16).unwrap();

    let m = test_identity(0x0000000f03);
    let (_, d) = request(&c, &signing, &m, nwid, None);
    // 0x0800 and 0x86dd accepted, sorted, duplicate collapsed; the dropped
    // 0x0806 does not appear.
    assert_eq!(d.unwrap().get(NETCONF_KEY_ALLOWED_ETHERNET_TYPES), Some("0800,86dd"));
}
