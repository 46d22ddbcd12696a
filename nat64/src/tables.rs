// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Prefix and mapping tables.

use crate::config::Nat64Config;
use lpm::{IpPrefix, Lpm4, Lpm6, Prefix4, Prefix6};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Upper bound on translation prefixes per instance.
pub const MAX_PREFIXES: usize = 16;

/// Table construction failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// Too many prefixes.
    #[error("at most {MAX_PREFIXES} prefixes are supported ({0} given)")]
    TooManyPrefixes(usize),
    /// A prefix that is not a /96.
    #[error("prefix '{0}' must be a /96")]
    NotSlash96(String),
    /// An address that does not parse.
    #[error("bad address '{0}'")]
    BadAddress(String),
    /// A mapping referencing a prefix that is not declared.
    #[error("mapping '{ip4}' references prefix {index} of {count}")]
    DanglingPrefix {
        /// IPv4 side of the offending mapping.
        ip4: String,
        /// Referenced index.
        index: usize,
        /// Declared prefix count.
        count: usize,
    },
    /// The same address mapped twice.
    #[error("duplicate mapping for '{0}'")]
    DuplicateMapping(String),
}

/// One `{ipv4, ipv6, prefix}` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// IPv4 side.
    pub ip4: [u8; 4],
    /// IPv6 side.
    pub ip6: [u8; 16],
    /// Index into the prefix array.
    pub prefix: usize,
}

/// The lookup structures of one instance.
#[derive(Debug, Clone)]
pub struct Nat64Tables {
    /// /96 prefixes, stored as their upper 12 bytes.
    prefixes: Vec<[u8; 12]>,
    mappings: Vec<Mapping>,
    by_v4: Lpm4<usize>,
    by_v6: Lpm6<usize>,
    src_prefixes: Lpm6<usize>,
}

impl Nat64Tables {
    /// Build the tables from raw configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] on malformed prefixes, addresses or
    /// cross-references.
    pub fn build(config: &Nat64Config) -> Result<Self, TableError> {
        if config.prefixes.len() > MAX_PREFIXES {
            return Err(TableError::TooManyPrefixes(config.prefixes.len()));
        }
        let mut prefixes = Vec::with_capacity(config.prefixes.len());
        let mut src_prefixes = Lpm6::new();
        for (index, raw) in config.prefixes.iter().enumerate() {
            let (addr, len) = raw
                .split_once('/')
                .ok_or_else(|| TableError::NotSlash96(raw.clone()))?;
            if len != "96" {
                return Err(TableError::NotSlash96(raw.clone()));
            }
            let addr: Ipv6Addr = addr
                .parse()
                .map_err(|_| TableError::BadAddress(raw.clone()))?;
            let mut upper = [0u8; 12];
            upper.copy_from_slice(&addr.octets()[..12]);
            prefixes.push(upper);
            let prefix =
                Prefix6::new(addr, 96).map_err(|_| TableError::NotSlash96(raw.clone()))?;
            src_prefixes.insert(prefix, index);
        }

        let mut mappings = Vec::with_capacity(config.mappings.len());
        let mut by_v4 = Lpm4::new();
        let mut by_v6 = Lpm6::new();
        for row in &config.mappings {
            let ip4: Ipv4Addr = row
                .ip4
                .parse()
                .map_err(|_| TableError::BadAddress(row.ip4.clone()))?;
            let ip6: Ipv6Addr = row
                .ip6
                .parse()
                .map_err(|_| TableError::BadAddress(row.ip6.clone()))?;
            if row.prefix >= prefixes.len() {
                return Err(TableError::DanglingPrefix {
                    ip4: row.ip4.clone(),
                    index: row.prefix,
                    count: prefixes.len(),
                });
            }
            let id = mappings.len();
            let p4 = Prefix4::new(ip4, 32).map_err(|_| TableError::BadAddress(row.ip4.clone()))?;
            let p6 = Prefix6::new(ip6, 128).map_err(|_| TableError::BadAddress(row.ip6.clone()))?;
            if by_v4.insert(p4, id).is_some() {
                return Err(TableError::DuplicateMapping(row.ip4.clone()));
            }
            if by_v6.insert(p6, id).is_some() {
                return Err(TableError::DuplicateMapping(row.ip6.clone()));
            }
            mappings.push(Mapping {
                ip4: ip4.octets(),
                ip6: ip6.octets(),
                prefix: row.prefix,
            });
        }

        Ok(Self {
            prefixes,
            mappings,
            by_v4,
            by_v6,
            src_prefixes,
        })
    }

    /// The mapping whose IPv4 side covers `addr`.
    #[must_use]
    pub fn mapping_by_v4(&self, addr: Ipv4Addr) -> Option<&Mapping> {
        self.by_v4
            .lookup(addr)
            .and_then(|(_, id)| self.mappings.get(*id))
    }

    /// The mapping whose IPv6 side covers `addr`.
    #[must_use]
    pub fn mapping_by_v6(&self, addr: Ipv6Addr) -> Option<&Mapping> {
        self.by_v6
            .lookup(addr)
            .and_then(|(_, id)| self.mappings.get(*id))
    }

    /// Longest-match a source address onto a translation prefix.
    #[must_use]
    pub fn prefix_of(&self, addr: Ipv6Addr) -> Option<usize> {
        self.src_prefixes.lookup(addr).map(|(_, idx)| *idx)
    }

    /// The upper 12 bytes of prefix `index`.
    #[must_use]
    pub fn prefix_bytes(&self, index: usize) -> Option<[u8; 12]> {
        self.prefixes.get(index).copied()
    }

    /// Synthesize `prefix ‖ v4` for a mapping's prefix.
    #[must_use]
    pub fn synthesize(&self, prefix: usize, v4: [u8; 4]) -> Option<[u8; 16]> {
        let upper = self.prefix_bytes(prefix)?;
        let mut out = [0u8; 16];
        out[..12].copy_from_slice(&upper);
        out[12..].copy_from_slice(&v4);
        Some(out)
    }

    /// Declared mappings, for invariant checks.
    #[must_use]
    pub fn mappings(&self) -> &[Mapping] {
        self.mappings
            .as_slice()
    }
}
