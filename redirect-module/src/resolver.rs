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

//! Strategies determining the redirect target from the request.

use http::header::HeaderName;
use log::{error, trace};
use pandora_module_utils::pingora::{Error, ErrorType};
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

use crate::forwarded::{
    is_forwarded_request, request_host, request_prefix, request_proto, request_uri,
};
use crate::{ProxyPrefix, RedirectRequest, RedirectValidator};

/// Name of the query string parameter containing the redirect target
pub const RD_PARAMETER: &str = "rd";

/// Header downstream applications can use to declare the redirect target
pub const X_AUTH_REQUEST_REDIRECT: HeaderName =
    HeaderName::from_static("x-auth-request-redirect");

/// Redirect target used if no strategy produces one
pub const DEFAULT_REDIRECT: &str = "/";

/// Origin of a redirect candidate, determines the diagnostic message for rejected candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectSource {
    /// The `rd` query string parameter
    RdQuerystring,
    /// The `X-Auth-Request-Redirect` header
    XAuthRequestRedirect,
    /// The URL composed from `X-Forwarded-*` headers
    XForwardedHeaders,
    /// The `X-Forwarded-Uri` header or the request URI
    XForwardedUri,
}

impl Display for RedirectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RdQuerystring => "provided in rd querystring parameter",
            Self::XAuthRequestRedirect => "provided in X-Auth-Request-Redirect header",
            Self::XForwardedHeaders => "generated from X-Forwarded-* headers",
            Self::XForwardedUri => "generated from X-Forwarded-Uri header",
        })
    }
}

/// Identifies one of the strategies of [`RedirectResolver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectStrategy {
    /// [`RedirectResolver::rd_querystring_redirect`]
    RdQuerystring,
    /// [`RedirectResolver::x_auth_request_redirect`]
    XAuthRequestRedirect,
    /// [`RedirectResolver::x_forwarded_headers_redirect`]
    XForwardedHeaders,
    /// [`RedirectResolver::uri_redirect`]
    Uri,
}

impl RedirectStrategy {
    /// All strategies, most explicit ones first
    pub const DEFAULT_ORDER: [Self; 4] = [
        Self::RdQuerystring,
        Self::XAuthRequestRedirect,
        Self::XForwardedHeaders,
        Self::Uri,
    ];
}

impl FromStr for RedirectStrategy {
    type Err = Box<Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rd_querystring" => Ok(Self::RdQuerystring),
            "x_auth_request_redirect" => Ok(Self::XAuthRequestRedirect),
            "x_forwarded_headers" => Ok(Self::XForwardedHeaders),
            "uri" => Ok(Self::Uri),
            _ => Err(Error::explain(
                ErrorType::InternalError,
                "invalid redirect strategy value",
            )),
        }
    }
}

/// Determines where to send the user after authentication
///
/// The resolver is created once and holds the reserved prefix of the proxy along with the
/// validator deciding which redirect targets are acceptable. Each strategy method returns either
/// a validated redirect target or an empty string if the strategy found nothing usable.
///
/// ```rust
/// use http::Request;
/// use redirect_module::{DomainValidator, ProxyPrefix, RedirectRequest, RedirectResolver};
///
/// let resolver = RedirectResolver::new(
///     ProxyPrefix::new("/oauth2").unwrap(),
///     DomainValidator::default(),
/// );
///
/// let request = Request::get("/oauth2/start?rd=%2Fdashboard").body(()).unwrap();
/// let request = RedirectRequest::from_http(&request);
/// assert_eq!(resolver.rd_querystring_redirect(&request), "/dashboard");
/// assert_eq!(resolver.uri_redirect(&request), "/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectResolver<V> {
    proxy_prefix: ProxyPrefix,
    validator: V,
}

impl<V: RedirectValidator> RedirectResolver<V> {
    /// Creates a new resolver from the reserved prefix and the validator to use.
    pub fn new(proxy_prefix: ProxyPrefix, validator: V) -> Self {
        Self {
            proxy_prefix,
            validator,
        }
    }

    /// Returns the reserved prefix of the proxy.
    pub fn proxy_prefix(&self) -> &ProxyPrefix {
        &self.proxy_prefix
    }

    /// Returns `redirect` if the validator accepts it, an empty string otherwise.
    ///
    /// Rejecting a non-empty candidate produces an error message mentioning its source.
    pub fn validate_redirect(&self, redirect: &str, source: RedirectSource) -> String {
        if self.validator.is_valid_redirect(redirect) {
            return redirect.to_owned();
        }

        if !redirect.is_empty() {
            error!("Invalid redirect {source}: {redirect}");
        }
        String::new()
    }

    /// Checks whether the path belongs to the proxy’s own endpoints.
    pub fn has_proxy_prefix(&self, path: &str) -> bool {
        self.proxy_prefix.contains(path)
    }

    /// Takes the redirect target from the `rd` query string parameter.
    pub fn rd_querystring_redirect(&self, request: &RedirectRequest<'_>) -> String {
        self.validate_redirect(
            request.form_value(RD_PARAMETER).unwrap_or_default(),
            RedirectSource::RdQuerystring,
        )
    }

    /// Takes the redirect target from the `X-Auth-Request-Redirect` header.
    pub fn x_auth_request_redirect(&self, request: &RedirectRequest<'_>) -> String {
        self.validate_redirect(
            request
                .header(&X_AUTH_REQUEST_REDIRECT)
                .unwrap_or_default(),
            RedirectSource::XAuthRequestRedirect,
        )
    }

    /// Reconstructs the original URL from `X-Forwarded-Proto`, `X-Forwarded-Host`,
    /// `X-Forwarded-Prefix` and `X-Forwarded-Uri` headers.
    ///
    /// Only applies to requests received through a trusted reverse proxy. If the forwarded URI
    /// belongs to the proxy’s own endpoints, the redirect goes to the forwarded prefix instead.
    pub fn x_forwarded_headers_redirect(&self, request: &RedirectRequest<'_>) -> String {
        if !is_forwarded_request(request) {
            return String::new();
        }

        let mut uri = request_uri(request);
        let prefix = request_prefix(request);
        if self.has_proxy_prefix(&uri) {
            uri = prefix;
        } else if prefix != "/" {
            uri = join_path(&prefix, &uri);
        }

        let redirect = format!(
            "{}://{}{}",
            request_proto(request),
            request_host(request),
            uri
        );
        self.validate_redirect(&redirect, RedirectSource::XForwardedHeaders)
    }

    /// Redirects to the request URI: `X-Forwarded-Uri` header for forwarded requests, the actual
    /// request URI otherwise.
    ///
    /// Never produces an empty string. If the URI belongs to the proxy’s own endpoints, `/` is
    /// returned.
    pub fn uri_redirect(&self, request: &RedirectRequest<'_>) -> String {
        let mut redirect =
            self.validate_redirect(&request_uri(request), RedirectSource::XForwardedUri);
        if redirect.is_empty() {
            redirect = request.request_uri().to_owned();
            // Browsers treat these as scheme-relative URLs
            if redirect.starts_with("//") || redirect.starts_with("/\\") {
                trace!("Request URI {redirect} is not a local path, using {DEFAULT_REDIRECT}");
                return DEFAULT_REDIRECT.to_owned();
            }
        }

        if self.has_proxy_prefix(&redirect) {
            trace!("Request URI {redirect} belongs to the proxy, using {DEFAULT_REDIRECT}");
            return DEFAULT_REDIRECT.to_owned();
        }
        redirect
    }

    /// Runs a single strategy.
    pub fn redirect_for(
        &self,
        strategy: RedirectStrategy,
        request: &RedirectRequest<'_>,
    ) -> String {
        match strategy {
            RedirectStrategy::RdQuerystring => self.rd_querystring_redirect(request),
            RedirectStrategy::XAuthRequestRedirect => self.x_auth_request_redirect(request),
            RedirectStrategy::XForwardedHeaders => self.x_forwarded_headers_redirect(request),
            RedirectStrategy::Uri => self.uri_redirect(request),
        }
    }

    /// Tries the strategies in the given order and returns the first non-empty result, `/` if
    /// there is none.
    pub fn resolve(
        &self,
        strategies: &[RedirectStrategy],
        request: &RedirectRequest<'_>,
    ) -> String {
        for strategy in strategies {
            let redirect = self.redirect_for(*strategy, request);
            if !redirect.is_empty() {
                trace!("Redirect target {redirect} determined by strategy {strategy:?}");
                return redirect;
            }
        }

        trace!("No strategy produced a redirect target, using {DEFAULT_REDIRECT}");
        DEFAULT_REDIRECT.to_owned()
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{prefix}{path}")
    } else {
        format!("{prefix}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::Request;
    use test_log::test;

    use crate::DomainValidator;

    fn permissive(redirect: &str) -> bool {
        !redirect.is_empty()
    }

    fn local_only(redirect: &str) -> bool {
        redirect.starts_with('/') && !redirect.starts_with("//")
    }

    fn resolver<V: RedirectValidator>(validator: V) -> RedirectResolver<V> {
        RedirectResolver::new(ProxyPrefix::new("/oauth2").unwrap(), validator)
    }

    fn get(uri: &str) -> Request<()> {
        Request::get(uri).body(()).unwrap()
    }

    fn forwarded(proto: &str, host: &str, prefix: &str, uri: &str) -> Request<()> {
        Request::get("/oauth2/auth")
            .header("Host", "proxy.internal")
            .header("X-Forwarded-Proto", proto)
            .header("X-Forwarded-Host", host)
            .header("X-Forwarded-Prefix", prefix)
            .header("X-Forwarded-Uri", uri)
            .body(())
            .unwrap()
    }

    #[test]
    fn rd_querystring() {
        let resolver = resolver(local_only);

        let r = get("/oauth2/start?rd=%2Fapp%2Fpage%3Fa%3D1");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.rd_querystring_redirect(&request), "/app/page?a=1");

        let r = get("/oauth2/start?rd=/plain");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.rd_querystring_redirect(&request), "/plain");

        let r = get("/oauth2/start");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.rd_querystring_redirect(&request), "");

        let r = get("/oauth2/start?rd=");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.rd_querystring_redirect(&request), "");
    }

    #[test]
    fn rd_querystring_off_site() {
        let resolver = resolver(DomainValidator::default());
        let r = get("/oauth2/start?rd=https://evil.example/phish");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.rd_querystring_redirect(&request), "");

        let resolver = resolver(DomainValidator::new(["app.example"]).unwrap());
        let r = get("/oauth2/start?rd=https://app.example/home");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(
            resolver.rd_querystring_redirect(&request),
            "https://app.example/home"
        );
    }

    #[test]
    fn x_auth_request_redirect() {
        let resolver = resolver(local_only);

        let r = Request::get("/")
            .header("X-Auth-Request-Redirect", "/from-header")
            .body(())
            .unwrap();
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.x_auth_request_redirect(&request), "/from-header");

        let r = Request::get("/")
            .header("X-Auth-Request-Redirect", "https://evil.example/")
            .body(())
            .unwrap();
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.x_auth_request_redirect(&request), "");

        let r = get("/?rd=/ignored");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.x_auth_request_redirect(&request), "");
    }

    #[test]
    fn x_forwarded_headers() {
        let resolver = resolver(permissive);

        let r = forwarded("https", "app.example", "/", "/dashboard");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(
            resolver.x_forwarded_headers_redirect(&request),
            "https://app.example/dashboard"
        );

        let r = forwarded("https", "app.example", "/app", "/dashboard?tab=1");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(
            resolver.x_forwarded_headers_redirect(&request),
            "https://app.example/app/dashboard?tab=1"
        );

        let r = forwarded("https", "app.example", "/app/", "/dashboard");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(
            resolver.x_forwarded_headers_redirect(&request),
            "https://app.example/app/dashboard"
        );
    }

    #[test]
    fn x_forwarded_headers_proxy_prefix() {
        let resolver = resolver(permissive);

        let r = forwarded("https", "app.example", "/app", "/oauth2/sign_in?rd=/x");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        let redirect = resolver.x_forwarded_headers_redirect(&request);
        assert_eq!(redirect, "https://app.example/app");

        let r = forwarded("https", "app.example", "/app", "/oauth2/callback/more");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(resolver.x_forwarded_headers_redirect(&request), redirect);

        let r = forwarded("http", "app.example", "/", "/oauth2");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(
            resolver.x_forwarded_headers_redirect(&request),
            "http://app.example/"
        );

        let r = forwarded("https", "app.example", "/", "/oauth2-other/page");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(
            resolver.x_forwarded_headers_redirect(&request),
            "https://app.example/oauth2-other/page"
        );
    }

    #[test]
    fn x_forwarded_headers_not_forwarded() {
        let validated = std::sync::atomic::AtomicBool::new(false);
        let resolver = resolver(|_: &str| {
            validated.store(true, std::sync::atomic::Ordering::Relaxed);
            true
        });

        let r = forwarded("https", "app.example", "/", "/dashboard");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.x_forwarded_headers_redirect(&request), "");
        assert!(!validated.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn x_forwarded_headers_validated() {
        let resolver = resolver(DomainValidator::new([".example.com"]).unwrap());

        let r = forwarded("https", "app.example.com", "/", "/dashboard");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(
            resolver.x_forwarded_headers_redirect(&request),
            "https://app.example.com/dashboard"
        );

        let r = forwarded("https", "evil.example", "/", "/dashboard");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(resolver.x_forwarded_headers_redirect(&request), "");
    }

    #[test]
    fn uri() {
        let resolver = resolver(local_only);

        let r = get("/dashboard?tab=1");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.uri_redirect(&request), "/dashboard?tab=1");

        let r = get("/oauth2/userinfo");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.uri_redirect(&request), "/");

        let r = get("/x/../oauth2/sign_in");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.uri_redirect(&request), "/");

        let r = get("/oauth2-other/userinfo");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.uri_redirect(&request), "/oauth2-other/userinfo");

        let r = forwarded("https", "app.example", "/", "/from-proxy");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(resolver.uri_redirect(&request), "/from-proxy");

        let r = forwarded("https", "app.example", "/", "/oauth2/callback");
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(resolver.uri_redirect(&request), "/");
    }

    #[test]
    fn uri_invalid_forwarded_uri() {
        let resolver = resolver(local_only);

        let r = Request::get("/dashboard")
            .header("X-Forwarded-Uri", "https://evil.example/")
            .body(())
            .unwrap();
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(resolver.uri_redirect(&request), "/dashboard");

        let r = Request::get("/oauth2/callback")
            .header("X-Forwarded-Uri", "//evil.example/")
            .body(())
            .unwrap();
        let request = RedirectRequest::from_http(&r).with_reverse_proxy(true);
        assert_eq!(resolver.uri_redirect(&request), "/");
    }

    #[test]
    fn uri_scheme_relative() {
        let resolver = resolver(DomainValidator::default());

        let r = get("//evil.example/");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(request.request_uri(), "//evil.example/");
        assert_eq!(resolver.uri_redirect(&request), "/");

        let r = get("//evil.example/?rd=//evil.example/");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(
            resolver.resolve(&RedirectStrategy::DEFAULT_ORDER, &request),
            "/"
        );

        let r = get("/dashboard//page");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.uri_redirect(&request), "/dashboard//page");
    }

    #[test]
    fn resolve_order() {
        let resolver = resolver(local_only);

        let r = Request::get("/page?rd=/from-rd")
            .header("X-Auth-Request-Redirect", "/from-header")
            .body(())
            .unwrap();
        let request = RedirectRequest::from_http(&r);
        assert_eq!(
            resolver.resolve(&RedirectStrategy::DEFAULT_ORDER, &request),
            "/from-rd"
        );
        assert_eq!(
            resolver.resolve(
                &[
                    RedirectStrategy::XAuthRequestRedirect,
                    RedirectStrategy::RdQuerystring
                ],
                &request
            ),
            "/from-header"
        );
        assert_eq!(
            resolver.resolve(
                &[RedirectStrategy::XForwardedHeaders, RedirectStrategy::Uri],
                &request
            ),
            "/page?rd=/from-rd"
        );

        let r = Request::get("/oauth2/start?rd=https://evil.example/")
            .header("X-Auth-Request-Redirect", "//evil.example/")
            .body(())
            .unwrap();
        let request = RedirectRequest::from_http(&r);
        assert_eq!(
            resolver.resolve(&RedirectStrategy::DEFAULT_ORDER, &request),
            "/"
        );
    }

    #[test]
    fn resolve_default() {
        let resolver = resolver(local_only);
        let r = get("/page");
        let request = RedirectRequest::from_http(&r);
        assert_eq!(resolver.resolve(&[], &request), DEFAULT_REDIRECT);
        assert_eq!(
            resolver.resolve(&[RedirectStrategy::RdQuerystring], &request),
            DEFAULT_REDIRECT
        );
    }

    #[test]
    fn strategy_names() {
        assert_eq!(
            "rd_querystring".parse::<RedirectStrategy>().ok(),
            Some(RedirectStrategy::RdQuerystring)
        );
        assert_eq!(
            "x_forwarded_headers".parse::<RedirectStrategy>().ok(),
            Some(RedirectStrategy::XForwardedHeaders)
        );
        assert!("rd".parse::<RedirectStrategy>().is_err());
    }
}
