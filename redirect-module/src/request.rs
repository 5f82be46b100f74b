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

//! Read-only view of the request data relevant for redirect resolution.

use http::header::AsHeaderName;
use http::{HeaderMap, Request, Uri};
use log::debug;

/// The parts of an HTTP request that redirect strategies can read
#[derive(Debug, Clone)]
pub struct RedirectRequest<'a> {
    uri: &'a Uri,
    headers: &'a HeaderMap,
    form: Vec<(String, String)>,
    reverse_proxy: bool,
    tls: bool,
}

impl<'a> RedirectRequest<'a> {
    /// Creates a view of a request with the given URI and headers.
    ///
    /// Form values are decoded from the query string of the URI, body values can be added via
    /// [`Self::with_form_body`]. The request is considered a direct request over a plain
    /// connection unless changed via [`Self::with_reverse_proxy`] and [`Self::with_tls`].
    pub fn new(uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        let query = uri.query().unwrap_or_default();
        let form = match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
            Ok(form) => form,
            Err(err) => {
                debug!("Ignoring query string of {uri} that cannot be decoded: {err}");
                Vec::new()
            }
        };

        Self {
            uri,
            headers,
            form,
            reverse_proxy: false,
            tls: false,
        }
    }

    /// Creates a view of an `http` crate request.
    pub fn from_http<B>(request: &'a Request<B>) -> Self {
        Self::new(request.uri(), request.headers())
    }

    /// Adds form values decoded from an `application/x-www-form-urlencoded` request body.
    ///
    /// Body values take precedence over query string values with the same name.
    pub fn with_form_body(mut self, body: &[u8]) -> Self {
        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            Ok(mut form) => {
                form.append(&mut self.form);
                self.form = form;
            }
            Err(err) => debug!("Ignoring request body that cannot be decoded: {err}"),
        }
        self
    }

    /// Marks the request as received through a trusted reverse proxy, making `X-Forwarded-*`
    /// headers relevant.
    pub fn with_reverse_proxy(mut self, reverse_proxy: bool) -> Self {
        self.reverse_proxy = reverse_proxy;
        self
    }

    /// Marks the downstream connection as a TLS connection.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Returns `true` if the request was received through a trusted reverse proxy.
    pub fn reverse_proxy(&self) -> bool {
        self.reverse_proxy
    }

    /// Returns `true` if the downstream connection is a TLS connection.
    pub fn tls(&self) -> bool {
        self.tls
    }

    /// Returns the request URI.
    pub fn uri(&self) -> &Uri {
        self.uri
    }

    /// Returns the first form value with the given name if any.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the first value of the given header if it is present and valid visible ASCII.
    pub fn header(&self, name: impl AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the path and query of the request URI, the way it would appear in the request
    /// line of an origin-form request.
    pub fn request_uri(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|path| path.as_str())
            .filter(|path| !path.is_empty())
            .unwrap_or("/")
    }
}
