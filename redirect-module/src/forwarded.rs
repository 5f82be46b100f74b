// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Accessors for the client-facing request as described by the `X-Forwarded-*` headers.
//!
//! The headers are only considered if the request was received through a trusted reverse proxy,
//! otherwise the values are taken from the request itself.

use http::header::{self, HeaderName};

use crate::RedirectRequest;

/// Protocol of the original request as set by the reverse proxy
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
/// Host of the original request as set by the reverse proxy
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
/// Request URI (path and query) of the original request as set by the reverse proxy
pub const X_FORWARDED_URI: HeaderName = HeaderName::from_static("x-forwarded-uri");
/// Path prefix the reverse proxy mounted the application under
pub const X_FORWARDED_PREFIX: HeaderName = HeaderName::from_static("x-forwarded-prefix");

fn forwarded_header<'a>(request: &'a RedirectRequest<'_>, name: &HeaderName) -> Option<&'a str> {
    if !is_forwarded_request(request) {
        return None;
    }
    request.header(name).filter(|value| !value.is_empty())
}

fn first_hop(value: &str) -> &str {
    value.split(',').next().unwrap_or_default().trim()
}

/// Checks whether the request was received through a trusted reverse proxy.
pub fn is_forwarded_request(request: &RedirectRequest<'_>) -> bool {
    request.reverse_proxy()
}

/// Determines the protocol of the original request, `http` or `https` typically.
pub fn request_proto(request: &RedirectRequest<'_>) -> String {
    if let Some(proto) = forwarded_header(request, &X_FORWARDED_PROTO).map(first_hop) {
        proto.to_owned()
    } else if let Some(scheme) = request.uri().scheme_str() {
        scheme.to_owned()
    } else if request.tls() {
        "https".to_owned()
    } else {
        "http".to_owned()
    }
}

/// Determines the host of the original request, including the port if any. Empty if the host
/// is unknown.
pub fn request_host(request: &RedirectRequest<'_>) -> String {
    forwarded_header(request, &X_FORWARDED_HOST)
        .map(first_hop)
        .or_else(|| request.header(header::HOST))
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()))
        .unwrap_or_default()
        .to_owned()
}

/// Determines the request URI (path and query) of the original request.
pub fn request_uri(request: &RedirectRequest<'_>) -> String {
    forwarded_header(request, &X_FORWARDED_URI)
        .unwrap_or_else(|| request.request_uri())
        .to_owned()
}

/// Determines the path prefix the application is mounted under, `/` if none.
pub fn request_prefix(request: &RedirectRequest<'_>) -> String {
    forwarded_header(request, &X_FORWARDED_PREFIX)
        .unwrap_or("/")
        .to_owned()
}
