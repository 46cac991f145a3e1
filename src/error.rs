/*
 * error.rs
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

//! Client errors. One variant per user-visible failure kind.

use std::io;

/// Errors surfaced by the client.
///
/// Timeouts are split by which budget expired: `ConnectTimeout` for the
/// transport open, `ReadTimeout` for a bounded read, `PoolAcquireTimeout`
/// for the pool permit, `RequestTimeout` for the whole request. An inner
/// `ConnectTimeout` is never rewritten into `RequestTimeout`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport open exceeded sock_connect")]
    ConnectTimeout,

    #[error("read exceeded its budget")]
    ReadTimeout,

    #[error("request exceeded request_timeout")]
    RequestTimeout,

    #[error("could not obtain a pool permit within pool_acquire")]
    PoolAcquireTimeout,

    #[error("http parsing error: {0}")]
    HttpParsing(String),

    #[error("exceeded maximum number of redirects")]
    MaxRedirects,

    #[error("writer not set")]
    MissingWriter,

    #[error("reader not set")]
    MissingReader,

    #[error("unhandled http2 event: {0}")]
    MissingEvent(String),

    #[error("peer closed the connection unexpectedly")]
    ConnectionDisconnected,

    #[error("sse parsing error: {0}")]
    SseParsing(String),

    #[error("sse connection error: {0}")]
    SseConnection(String),

    #[error("multipart value error: {0}")]
    MultipartValue(String),

    #[error("dns resolution error: {0}")]
    Resolve(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
