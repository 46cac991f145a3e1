/*
 * mod.rs
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

//! HTTP layer: headers, request assembly, response parsing, the client
//! engine, and multipart form encoding.

pub mod client;
pub mod headers;
pub mod multipart;
pub mod request;
pub mod response;

pub use client::{HttpClient, RequestBuilder};
pub use headers::HttpHeaders;
pub use multipart::{MultipartFile, MultipartForm};
pub use request::{BodyProducer, IterBody, Method, RequestData};
pub use response::{Compression, HttpResponse};
