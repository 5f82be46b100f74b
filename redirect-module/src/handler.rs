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

//! Handler for the `request_filter` phase.

use async_trait::async_trait;
use http::{header, Method, StatusCode};
use log::{debug, trace, warn};
use pandora_module_utils::pingora::{Error, ErrorType, SessionWrapper};
use pandora_module_utils::standard_response::redirect_response;
use pandora_module_utils::{RequestFilter, RequestFilterResult};

use crate::configuration::RedirectConf;
use crate::prefix::path_segments;
use crate::{DomainValidator, ProxyPrefix, RedirectRequest, RedirectResolver, RedirectStrategy};

/// Redirect target resolved for the current request, stored in the session extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRedirect(pub String);

/// Retrieves the redirect target resolved by [`RedirectHandler`] for the current request.
pub fn app_redirect(session: &impl SessionWrapper) -> Option<&str> {
    session
        .extensions()
        .get::<AppRedirect>()
        .map(|AppRedirect(redirect)| redirect.as_str())
}

const MAX_BODY_SIZE: usize = 4096;

/// Reads the request body of a form submission, `None` for other requests.
async fn read_form_body(session: &mut impl SessionWrapper) -> Option<Vec<u8>> {
    if session.req_header().method != Method::POST {
        return None;
    }

    let is_form = session
        .req_header()
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.split_once(';').map_or(h, |(h, _)| h))
        .map(str::trim)
        .is_some_and(|h| h == "application/x-www-form-urlencoded");
    if !is_form {
        trace!("Not reading request body, MIME type is not application/x-www-form-urlencoded");
        return None;
    }

    let mut data = Vec::new();
    loop {
        match session.read_request_body().await {
            Ok(None) => break,
            Ok(Some(bytes)) => {
                if data.len() + bytes.len() > MAX_BODY_SIZE {
                    warn!("Ignoring request body, it is too long");
                    return None;
                }
                data.extend_from_slice(&bytes);
            }
            Err(err) => {
                warn!("Failed reading request body, ignoring it: {err}");
                return None;
            }
        }
    }
    Some(data)
}

/// Handler for Pingora’s `request_filter` phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHandler {
    resolver: RedirectResolver<DomainValidator>,
    reverse_proxy: bool,
    strategies: Vec<RedirectStrategy>,
    endpoint: Option<Vec<String>>,
}

impl RedirectHandler {
    /// Returns the resolver used by this handler.
    pub fn resolver(&self) -> &RedirectResolver<DomainValidator> {
        &self.resolver
    }

    fn is_endpoint(&self, path: &str) -> bool {
        self.endpoint
            .as_ref()
            .is_some_and(|endpoint| *endpoint == path_segments(path))
    }
}

impl TryFrom<RedirectConf> for RedirectHandler {
    type Error = Box<Error>;

    fn try_from(conf: RedirectConf) -> Result<Self, Self::Error> {
        debug!("Redirect configuration received: {conf:#?}");

        if !conf.redirect_proxy_prefix.starts_with('/') {
            return Err(Error::explain(
                ErrorType::InternalError,
                "redirect_proxy_prefix setting has to start with a slash",
            ));
        }
        let proxy_prefix = ProxyPrefix::new(&conf.redirect_proxy_prefix).ok_or_else(|| {
            Error::explain(
                ErrorType::InternalError,
                "redirect_proxy_prefix setting cannot be the root path",
            )
        })?;

        let endpoint = match conf.redirect_endpoint {
            Some(endpoint) if endpoint.starts_with('/') => Some(path_segments(&endpoint)),
            Some(_) => {
                return Err(Error::explain(
                    ErrorType::InternalError,
                    "redirect_endpoint setting has to start with a slash",
                ))
            }
            None => None,
        };

        if conf.redirect_strategies.is_empty() {
            warn!("No redirect strategies configured, all requests will redirect to /");
        }

        let validator = DomainValidator::new(&conf.redirect_allowed_domains)?;
        Ok(Self {
            resolver: RedirectResolver::new(proxy_prefix, validator),
            reverse_proxy: conf.redirect_reverse_proxy,
            strategies: conf.redirect_strategies,
            endpoint,
        })
    }
}

#[async_trait]
impl RequestFilter for RedirectHandler {
    type Conf = RedirectConf;

    type CTX = ();

    fn new_ctx() -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let is_endpoint = self.is_endpoint(session.req_header().uri.path());
        // The body is only consumed if the request is answered here
        let body = if is_endpoint {
            read_form_body(session).await
        } else {
            None
        };

        let tls = session
            .digest()
            .and_then(|digest| digest.ssl_digest.as_ref())
            .is_some();
        let redirect = {
            let header = session.req_header();
            let mut request = RedirectRequest::new(&header.uri, &header.headers)
                .with_reverse_proxy(self.reverse_proxy)
                .with_tls(tls);
            if let Some(body) = &body {
                request = request.with_form_body(body);
            }
            self.resolver.resolve(&self.strategies, &request)
        };
        trace!("Resolved redirect target: {redirect}");

        session
            .extensions_mut()
            .insert(AppRedirect(redirect.clone()));

        if is_endpoint {
            trace!("Request to redirect endpoint, redirecting to {redirect}");
            redirect_response(session, StatusCode::FOUND, &redirect).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }

        Ok(RequestFilterResult::Unhandled)
    }
}
