/*
 * resolver.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an asynchronous HTTP client.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Name resolution with IDNA encoding and cached answers.
//!
//! The cache key is `encoded_host:port:family`; the returned records carry
//! the original (pre-encoding) hostname so TLS SNI sees what the caller
//! typed, not the xn-- form or a bare address.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::dns::cache::DnsCache;
use crate::error::{Error, Result};

/// Address family filter for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Any,
    V4,
    V6,
}

impl AddressFamily {
    fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }

    fn key_tag(&self) -> u8 {
        match self {
            AddressFamily::Any => 0,
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 6,
        }
    }
}

/// One resolved address, paired with the hostname to present to TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrRecord {
    /// Original hostname as given by the caller.
    pub hostname: String,
    pub addr: SocketAddr,
}

/// Asynchronous resolver backed by the runtime's lookup, with an optional
/// shared answer cache.
pub struct Resolver {
    cache: Option<Arc<DnsCache>>,
}

impl Resolver {
    pub fn new(cache: Option<Arc<DnsCache>>) -> Self {
        Self { cache }
    }

    /// IDNA-to-ASCII mapping, falling back to the original string when the
    /// domain cannot be encoded.
    pub fn encode_host(host: &str) -> String {
        idna::domain_to_ascii(host).unwrap_or_else(|_| host.to_string())
    }

    /// Cache key for a lookup.
    pub fn cache_key(encoded_host: &str, port: u16, family: AddressFamily) -> String {
        format!("{}:{}:{}", encoded_host, port, family.key_tag())
    }

    /// Resolve `host:port`, consulting the cache first. Fails with a
    /// resolution error when the lookup yields no records.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> Result<Vec<AddrRecord>> {
        let encoded = Self::encode_host(host);
        let key = Self::cache_key(&encoded, port, family);

        if let Some(cache) = &self.cache {
            if let Some(addrs) = cache.get(&key) {
                return Ok(addrs
                    .into_iter()
                    .map(|addr| AddrRecord {
                        hostname: host.to_string(),
                        addr,
                    })
                    .collect());
            }
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((encoded.as_str(), port))
            .await
            .map_err(|e| Error::Resolve(format!("{host}: {e}")))?
            .filter(|a| family.matches(a))
            .collect();

        if addrs.is_empty() {
            return Err(Error::Resolve(format!("no addresses for {host}")));
        }

        if let Some(cache) = &self.cache {
            cache.set(&key, addrs.clone(), None);
        }

        Ok(addrs
            .into_iter()
            .map(|addr| AddrRecord {
                hostname: host.to_string(),
                addr,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    #[test]
    fn idna_encoding_and_fallback() {
        assert_eq!(Resolver::encode_host("example.com"), "example.com");
        assert_eq!(Resolver::encode_host("bücher.de"), "xn--bcher-kva.de");
        // Uppercase input is lowercased by the mapping.
        assert_eq!(Resolver::encode_host("EXAMPLE.com"), "example.com");
    }

    #[test]
    fn idna_roundtrip_casefolds() {
        let domains = ["Example.COM", "bücher.de", "münchen.example"];
        for d in domains {
            let encoded = Resolver::encode_host(d);
            let (decoded, result) = idna::domain_to_unicode(&encoded);
            assert!(result.is_ok());
            assert_eq!(decoded.to_lowercase(), d.to_lowercase());
        }
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(
            Resolver::cache_key("example.com", 443, AddressFamily::Any),
            "example.com:443:0"
        );
        assert_eq!(
            Resolver::cache_key("example.com", 80, AddressFamily::V4),
            "example.com:80:4"
        );
    }

    #[tokio::test]
    async fn cached_answer_preserves_original_hostname() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(60), 8));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
        cache.set("xn--bcher-kva.de:8080:0", vec![addr], None);

        let resolver = Resolver::new(Some(cache));
        let records = resolver
            .resolve("bücher.de", 8080, AddressFamily::Any)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname, "bücher.de");
        assert_eq!(records[0].addr, addr);
    }

    #[tokio::test]
    async fn resolves_localhost() {
        let resolver = Resolver::new(None);
        let records = resolver
            .resolve("localhost", 80, AddressFamily::Any)
            .await
            .unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.hostname == "localhost"));
        assert!(records.iter().all(|r| r.addr.port() == 80));
    }

    #[tokio::test]
    async fn lookup_populates_cache() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(60), 8));
        let resolver = Resolver::new(Some(cache.clone()));
        resolver
            .resolve("localhost", 80, AddressFamily::Any)
            .await
            .unwrap();
        assert!(cache.contains("localhost:80:0"));
    }
}
