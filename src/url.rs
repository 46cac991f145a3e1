/*
 * url.rs
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

//! URL parsing for http/https/ws/wss targets, plus a bounded cache of
//! parsed URLs keyed by the raw string.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Parsed request target. Only the schemes this client speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    /// Explicit port from the URL, if any.
    pub port: Option<u16>,
    /// Path component, always starting with '/'.
    pub path: String,
    /// Query string without the leading '?'.
    pub query: Option<String>,
}

impl ParsedUrl {
    /// Parse an absolute URL. Fails with a parsing error when the scheme is
    /// unknown or the host is missing.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = match url.split_once("://") {
            Some((s, r)) => (s.to_ascii_lowercase(), r),
            None => return Err(Error::HttpParsing(format!("not an absolute url: {url}"))),
        };
        match scheme.as_str() {
            "http" | "https" | "ws" | "wss" => {}
            other => return Err(Error::HttpParsing(format!("unsupported scheme: {other}"))),
        }

        // Strip fragment first; it never goes on the wire.
        let rest = rest.split('#').next().unwrap_or(rest);

        let (authority, path_and_query) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => match rest.find('?') {
                // host?query with no path
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, ""),
            },
        };

        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path_and_query, None),
        };
        let path = if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };

        let (host, port) = split_authority(authority)?;
        if host.is_empty() {
            return Err(Error::HttpParsing("missing hostname".into()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
            query,
        })
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }

    /// Effective port: explicit, else 443 for secure schemes, else 80.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    /// Affinity key used by pools and connection reuse.
    pub fn host_port_key(&self) -> String {
        format!("{}-{}", self.host, self.port_or_default())
    }

    /// Path plus query, as written on the request line.
    pub fn request_path(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Resolve a Location header against this URL. Absolute locations are
    /// parsed as-is; `/rooted` and relative paths stay on this authority.
    pub fn join(&self, location: &str) -> Result<ParsedUrl> {
        if location.contains("://") {
            return ParsedUrl::parse(location);
        }
        let mut out = self.clone();
        if let Some(rooted) = location.strip_prefix('/') {
            let (path, query) = match rooted.split_once('?') {
                Some((p, q)) => (format!("/{p}"), Some(q.to_string())),
                None => (format!("/{rooted}"), None),
            };
            out.path = path;
            out.query = query;
        } else {
            // Relative to the current path's directory.
            let dir = match self.path.rfind('/') {
                Some(i) => &self.path[..=i],
                None => "/",
            };
            let (path, query) = match location.split_once('?') {
                Some((p, q)) => (format!("{dir}{p}"), Some(q.to_string())),
                None => (format!("{dir}{location}"), None),
            };
            out.path = path;
            out.query = query;
        }
        Ok(out)
    }
}

/// Split `host[:port]`, handling IPv6 literals in brackets.
fn split_authority(authority: &str) -> Result<(&str, Option<u16>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => {
                let host = &rest[..end];
                let after = &rest[end + 1..];
                let port = match after.strip_prefix(':') {
                    Some(p) => Some(
                        p.parse::<u16>()
                            .map_err(|_| Error::HttpParsing("invalid port".into()))?,
                    ),
                    None => None,
                };
                Ok((host, port))
            }
            None => Err(Error::HttpParsing("unterminated IPv6 bracket".into())),
        }
    } else {
        match authority.rfind(':') {
            Some(i) => {
                let port = authority[i + 1..]
                    .parse::<u16>()
                    .map_err(|_| Error::HttpParsing("invalid port".into()))?;
                Ok((&authority[..i], Some(port)))
            }
            None => Ok((authority, None)),
        }
    }
}

/// Bounded cache of parsed URLs, LRU-evicted. Keeps repeat requests to the
/// same targets from re-parsing.
pub struct UrlCache {
    max_size: usize,
    map: HashMap<String, ParsedUrl>,
    order: VecDeque<String>,
}

impl UrlCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn parse(&mut self, url: &str) -> Result<ParsedUrl> {
        if let Some(parsed) = self.map.get(url) {
            let parsed = parsed.clone();
            self.touch(url);
            return Ok(parsed);
        }
        let parsed = ParsedUrl::parse(url)?;
        if self.map.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.map.insert(url.to_string(), parsed.clone());
        self.order.push_back(url.to_string());
        Ok(parsed)
    }

    fn touch(&mut self, url: &str) {
        if let Some(pos) = self.order.iter().position(|u| u == url) {
            let key = self.order.remove(pos).unwrap();
            self.order.push_back(key);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
