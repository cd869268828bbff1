//! Destination allowlist checked before any remote session is opened.
//!
//! Rules come from a JSON file:
//!
//! ```json
//! {
//!   "allowedHostnames": ["*.corp.example.com", "jump-??"],
//!   "allowedIpv4Cidrs": ["10.0.0.0/8", "192.168.1.20"],
//!   "allowedDestinationRegex": ["^rdp-[0-9]+\\.lab:3389$"]
//! }
//! ```
//!
//! A policy with no rules allows everything. Otherwise a destination is
//! allowed if any rule matches, checked in this order: destination
//! regexes against `host:port`, hostname globs (non-IPv4 hosts only),
//! then CIDR ranges (IPv4 hosts only).

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::BridgeError;

/// Raw rule lists, exactly as read from the policy file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyRules {
    pub allowed_hostnames: Vec<String>,
    pub allowed_ipv4_cidrs: Vec<String>,
    pub allowed_destination_regex: Vec<String>,
}

impl PolicyRules {
    pub fn is_empty(&self) -> bool {
        self.allowed_hostnames.is_empty()
            && self.allowed_ipv4_cidrs.is_empty()
            && self.allowed_destination_regex.is_empty()
    }
}

/// Outcome of [`SecurityPolicy::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Validation {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }
}

/// Compiled, read-only destination policy.
///
/// Patterns are compiled once at construction; invalid ones are logged
/// and never match, but still count as rules (so a policy made only of
/// broken patterns denies everything).
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    rules: PolicyRules,
    hostnames: Vec<Regex>,
    cidrs: Vec<Cidr>,
    destinations: Vec<Regex>,
}

impl SecurityPolicy {
    pub fn new(rules: PolicyRules) -> Self {
        let hostnames = rules
            .allowed_hostnames
            .iter()
            .filter_map(|p| match glob_to_regex(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    error!(pattern = %p, error = %e, "invalid hostname glob");
                    None
                }
            })
            .collect();
        let cidrs = rules
            .allowed_ipv4_cidrs
            .iter()
            .filter_map(|c| {
                let parsed = Cidr::parse(c);
                if parsed.is_none() {
                    error!(cidr = %c, "invalid IPv4 CIDR");
                }
                parsed
            })
            .collect();
        let destinations = rules
            .allowed_destination_regex
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    error!(pattern = %p, error = %e, "invalid destination regex");
                    None
                }
            })
            .collect();
        Self {
            rules,
            hostnames,
            cidrs,
            destinations,
        }
    }

    /// The allow-everything policy.
    pub fn allow_all() -> Self {
        Self::new(PolicyRules::default())
    }

    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        let rules: PolicyRules =
            serde_json::from_str(text).map_err(|e| BridgeError::Policy(e.to_string()))?;
        Ok(Self::new(rules))
    }

    /// Load from `path`. A missing or unreadable file yields the
    /// allow-all policy with a log line; it never fails.
    pub fn load_from_file(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "security policy not found; allowing all destinations");
                return Self::allow_all();
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot read security policy; allowing all destinations");
                return Self::allow_all();
            }
        };
        match Self::from_json(&text) {
            Ok(policy) => {
                info!(
                    path = %path.display(),
                    hostnames = policy.rules.allowed_hostnames.len(),
                    cidrs = policy.rules.allowed_ipv4_cidrs.len(),
                    regexes = policy.rules.allowed_destination_regex.len(),
                    "security policy loaded"
                );
                policy
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "invalid security policy; allowing all destinations");
                Self::allow_all()
            }
        }
    }

    pub fn rules(&self) -> &PolicyRules {
        &self.rules
    }

    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    pub fn validate(&self, host: &str, port: u16) -> Validation {
        if !self.has_rules() {
            return Validation::allow();
        }

        let destination = format!("{host}:{port}");
        if self.destinations.iter().any(|re| re.is_match(&destination)) {
            return Validation::allow();
        }

        match parse_ipv4(host) {
            None if self.hostnames.iter().any(|re| re.is_match(host)) => Validation::allow(),
            Some(ip) if self.cidrs.iter().any(|c| c.contains(ip)) => Validation::allow(),
            _ => Validation {
                allowed: false,
                reason: Some(format!("Connection to {destination} blocked by security policy")),
            },
        }
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

// ── Matching primitives ──────────────────────────────────────────

/// Dotted-quad IPv4 with 1-3 digit octets, each at most 255.
pub fn parse_ipv4(s: &str) -> Option<u32> {
    let mut value = 0u32;
    let mut octets = 0;
    for part in s.split('.') {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let octet: u32 = part.parse().ok()?;
        if octet > 255 {
            return None;
        }
        value = (value << 8) | octet;
        octets += 1;
    }
    (octets == 4).then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cidr {
    base: u32,
    mask: u32,
}

impl Cidr {
    /// `a.b.c.d/n`; a missing prefix means `/32`.
    fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, prefix.parse::<u32>().ok()?),
            None => (s, 32),
        };
        if prefix > 32 {
            return None;
        }
        let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
        Some(Self {
            base: parse_ipv4(addr)? & mask,
            mask,
        })
    }

    fn contains(&self, ip: u32) -> bool {
        ip & self.mask == self.base
    }
}

pub fn is_ip_in_cidr(ip: &str, cidr: &str) -> bool {
    match (parse_ipv4(ip), Cidr::parse(cidr)) {
        (Some(ip), Some(cidr)) => cidr.contains(ip),
        _ => false,
    }
}

/// Compile a shell-style glob into an anchored, case-insensitive regex.
///
/// `*` matches any run of characters, `?` exactly one, `[abc]` / `[!abc]`
/// a (negated) class, and `\` escapes the next character. A `[` with no
/// closing `]` is literal.
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if matches!(chars.get(j), Some('!' | '^')) {
                        out.push('^');
                        j += 1;
                    }
                    while j < end {
                        if chars[j] == '\\' && j + 1 < end {
                            out.push('\\');
                            out.push(chars[j + 1]);
                            j += 2;
                        } else {
                            if matches!(chars[j], '[' | '&' | '~') {
                                out.push('\\');
                            }
                            out.push(chars[j]);
                            j += 1;
                        }
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str("\\["),
            },
            '\\' => match chars.get(i + 1) {
                Some(&next) => {
                    out.push_str(&regex::escape(&next.to_string()));
                    i += 1;
                }
                None => out.push_str("\\\\"),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    RegexBuilder::new(&out).case_insensitive(true).build()
}

/// Index of the `]` closing the class opened at `open`.
fn class_end(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    if matches!(chars.get(j), Some('!' | '^')) {
        j += 1;
    }
    while j < chars.len() {
        match chars[j] {
            '\\' if j + 1 < chars.len() => j += 2,
            ']' => return Some(j),
            _ => j += 1,
        }
    }
    None
}

pub fn match_glob(s: &str, pattern: &str) -> bool {
    match glob_to_regex(pattern) {
        Ok(re) => re.is_match(s),
        Err(e) => {
            error!(pattern, error = %e, "invalid hostname glob");
            false
        }
    }
}
