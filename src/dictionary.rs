/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

use std::collections::BTreeMap;

use crate::identity::Identity;

/// Reserved keys added or updated by sign(). The "~!" prefix is reserved
/// for signature data fields.
pub const DICTIONARY_SIGNATURE: &str = "~!ed25519";
pub const DICTIONARY_SIGNATURE_IDENTITY: &str = "~!sigid";
pub const DICTIONARY_SIGNATURE_TIMESTAMP: &str = "~!sigts";

/// Simple key/value dictionary with a flat string serialization.
///
/// The format is `key=value` lines with backslash escapes for the few
/// characters that would break framing. It is human-readable whenever the
/// keys and values are. Ordering is sorted by key, which the detached
/// signature depends on; nothing else does.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Dictionary(BTreeMap<String, String>);

fn append_escaped(s: &str, to: &mut String) {
    for c in s.chars() {
        match c {
            '\0' => to.push_str("\\0"),
            '\r' => to.push_str("\\r"),
            '\n' => to.push_str("\\n"),
            '\\' => to.push_str("\\\\"),
            '=' => to.push_str("\\e"),
            _ => to.push(c),
        }
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary(BTreeMap::new())
    }

    /// Parse a string-serialized dictionary. Unparseable lines are skipped
    /// rather than fatal; this format has always been forgiving.
    pub fn from_string(s: &str) -> Dictionary {
        let mut d = Dictionary::new();
        for line in s.split('\n') {
            if line.is_empty() {
                continue;
            }
            let mut key = String::new();
            let mut value = String::new();
            let mut in_value = false;
            let mut escape = false;
            for c in line.chars() {
                let target = if in_value { &mut value } else { &mut key };
                if escape {
                    escape = false;
                    match c {
                        '0' => target.push('\0'),
                        'r' => target.push('\r'),
                        'n' => target.push('\n'),
                        'e' => target.push('='),
                        _ => target.push(c),
                    }
                } else if c == '\\' {
                    escape = true;
                } else if c == '=' && !in_value {
                    in_value = true;
                } else if c != '\r' {
                    target.push(c);
                }
            }
            if !key.is_empty() && in_value {
                d.0.insert(key, value);
            }
        }
        d
    }

    pub fn to_string(&self) -> String {
        let mut s = String::with_capacity(self.0.len() * 32);
        for (k, v) in self.0.iter() {
            append_escaped(k, &mut s);
            s.push('=');
            append_escaped(v, &mut s);
            s.push('\n');
        }
        s
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline(always)]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[inline(always)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Boolean interpretation: first character 1/t/T/y/Y is true.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| {
            v.chars().next().map_or(default, |c| matches!(c, '1' | 't' | 'T' | 'y' | 'Y'))
        })
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default)
    }

    pub fn get_hex_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| u64::from_str_radix(v, 16).ok()).unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, if value { "1" } else { "0" });
    }

    pub fn set_u64(&mut self, key: &str, value: u64) {
        self.set(key, value.to_string().as_str());
    }

    pub fn set_hex_u64(&mut self, key: &str, value: u64) {
        self.set(key, format!("{:x}", value).as_str());
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// The canonical byte sequence covered by the detached signature: every
    /// entry except the signature itself, serialized in sorted order.
    fn signing_buffer(&self) -> String {
        let mut s = String::with_capacity(self.0.len() * 32);
        for (k, v) in self.0.iter() {
            if k != DICTIONARY_SIGNATURE {
                append_escaped(k, &mut s);
                s.push('=');
                append_escaped(v, &mut s);
                s.push('\n');
            }
        }
        s
    }

    #[inline(always)]
    pub fn has_signature(&self) -> bool {
        self.contains(DICTIONARY_SIGNATURE)
    }

    /// The string-serialized identity that signed this dictionary, if any.
    pub fn signing_identity(&self) -> Option<&str> {
        self.get(DICTIONARY_SIGNATURE_IDENTITY)
    }

    /// Signature timestamp in milliseconds since epoch, zero if unsigned.
    pub fn signature_timestamp(&self) -> u64 {
        self.get_hex_u64(DICTIONARY_SIGNATURE_TIMESTAMP, 0)
    }

    pub fn remove_signature(&mut self) {
        self.remove(DICTIONARY_SIGNATURE);
        self.remove(DICTIONARY_SIGNATURE_IDENTITY);
        self.remove(DICTIONARY_SIGNATURE_TIMESTAMP);
    }

    /// Add or update signature fields, signing all other keys and values.
    /// The signing identity and timestamp become part of the signed content.
    pub fn sign(&mut self, id: &Identity, now: u64) -> bool {
        self.remove(DICTIONARY_SIGNATURE);
        self.set(DICTIONARY_SIGNATURE_IDENTITY, id.to_public_string().as_str());
        self.set_hex_u64(DICTIONARY_SIGNATURE_TIMESTAMP, now);
        match id.sign(self.signing_buffer().as_bytes()) {
            Some(sig) => {
                self.set(DICTIONARY_SIGNATURE, hex::encode(sig).as_str());
                true
            }
            None => {
                self.remove_signature();
                false
            }
        }
    }

    /// Verify the detached signature against an identity.
    pub fn verify(&self, id: &Identity) -> bool {
        self.get(DICTIONARY_SIGNATURE)
            .and_then(|sig_hex| hex::decode(sig_hex).ok())
            .map_or(false, |sig| id.verify(self.signing_buffer().as_bytes(), &sig))
    }
}

impl ToString for Dictionary {
    #[inline(always)]
    fn to_string(&self) -> String {
        Dictionary::to_string(self)
    }
}
