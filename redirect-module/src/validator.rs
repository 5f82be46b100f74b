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

//! Validation of redirect targets against open redirects.

use http::uri::{Scheme, Uri};
use log::debug;
use once_cell::sync::Lazy;
use pandora_module_utils::pingora::{Error, ErrorType};
use regex::Regex;

// A slash or backslash followed by another one, with nothing but whitespace or up to two dots in
// between. Browsers treat `/\example.com` and `/ /example.com` like `//example.com`.
static INVALID_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/\\](?:\s*|\.{1,2})[/\\]").unwrap());

/// Decides whether a redirect target is safe to send the user to
///
/// Implemented for closures taking the redirect target, which is convenient for tests:
///
/// ```rust
/// use redirect_module::RedirectValidator;
///
/// let local_only = |redirect: &str| redirect.starts_with('/') && !redirect.starts_with("//");
/// assert!(local_only.is_valid_redirect("/dashboard"));
/// assert!(!local_only.is_valid_redirect("https://evil.example/"));
/// ```
pub trait RedirectValidator: Send + Sync {
    /// Returns `true` if the user can be redirected to the given target.
    fn is_valid_redirect(&self, redirect: &str) -> bool;
}

impl<F> RedirectValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid_redirect(&self, redirect: &str) -> bool {
        self(redirect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowedPort {
    /// Only URLs without an explicit port
    Default,
    /// Any port
    Any,
    Specific(u16),
}

/// A domain that absolute redirect URLs may point to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedDomain {
    host: String,
    subdomains: bool,
    port: AllowedPort,
}

impl AllowedDomain {
    fn matches(&self, uri: &Uri) -> bool {
        let host = match uri.host() {
            Some(host) => host.to_ascii_lowercase(),
            None => return false,
        };

        let host_matches = host == self.host
            || (self.subdomains
                && host
                    .strip_suffix(&self.host)
                    .is_some_and(|subdomain| subdomain.ends_with('.')));
        if !host_matches {
            return false;
        }

        match self.port {
            AllowedPort::Any => true,
            AllowedPort::Default => uri.port_u16().is_none(),
            AllowedPort::Specific(port) => uri.port_u16() == Some(port),
        }
    }
}

impl TryFrom<&str> for AllowedDomain {
    type Error = Box<Error>;

    /// Parses an allowed domain like `example.com`, `.example.com` (the domain and all its
    /// subdomains), `example.com:8443` (specific port) or `example.com:*` (any port).
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid = || {
            Error::explain(
                ErrorType::InternalError,
                format!("invalid allowed redirect domain: {value}"),
            )
        };

        let (host, port) = match value.rsplit_once(':') {
            // IPv6 literals contain colons, only a colon after the closing bracket starts a port
            Some((host, port)) if !port.contains(']') => {
                let port = if port == "*" {
                    AllowedPort::Any
                } else {
                    AllowedPort::Specific(port.parse().map_err(|_| invalid())?)
                };
                (host, port)
            }
            _ => (value, AllowedPort::Default),
        };

        let (host, subdomains) = if let Some(host) = host.strip_prefix('.') {
            (host, true)
        } else {
            (host, false)
        };

        if host.is_empty() || host.contains(['/', '?', '#', '@']) {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_ascii_lowercase(),
            subdomains,
            port,
        })
    }
}

/// The default validator: accepts local paths and absolute URLs pointing to allowed domains
///
/// ```rust
/// use redirect_module::{DomainValidator, RedirectValidator};
///
/// let validator = DomainValidator::new([".example.com", "localhost:*"]).unwrap();
/// assert!(validator.is_valid_redirect("/dashboard?tab=2"));
/// assert!(validator.is_valid_redirect("https://app.example.com/"));
/// assert!(validator.is_valid_redirect("http://localhost:8080/"));
/// assert!(!validator.is_valid_redirect("https://evil.example/"));
/// assert!(!validator.is_valid_redirect("//evil.example/"));
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DomainValidator {
    allowed_domains: Vec<AllowedDomain>,
}

impl DomainValidator {
    /// Creates a validator from a list of allowed domains.
    ///
    /// An empty list only accepts local paths.
    pub fn new<I>(allowed_domains: I) -> Result<Self, Box<Error>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Ok(Self {
            allowed_domains: allowed_domains
                .into_iter()
                .map(|domain| AllowedDomain::try_from(domain.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    fn is_valid_local_path(redirect: &str) -> bool {
        redirect.starts_with('/')
            && !redirect.starts_with("//")
            && !INVALID_REDIRECT.is_match(redirect)
    }

    fn is_allowed_url(&self, redirect: &str) -> bool {
        let uri = match Uri::try_from(redirect) {
            Ok(uri) => uri,
            Err(err) => {
                debug!("Rejecting invalid redirect {redirect:?}: {err}");
                return false;
            }
        };

        if !self.allowed_domains.iter().any(|domain| domain.matches(&uri)) {
            debug!("Rejecting invalid redirect {redirect:?}: domain or port not allowed");
            return false;
        }
        true
    }
}

impl RedirectValidator for DomainValidator {
    fn is_valid_redirect(&self, redirect: &str) -> bool {
        if redirect.is_empty() {
            return false;
        }

        if redirect.chars().any(char::is_control) {
            debug!("Rejecting invalid redirect {redirect:?}: contains control characters");
            return false;
        }

        if redirect.starts_with('/') {
            let valid = Self::is_valid_local_path(redirect);
            if !valid {
                debug!("Rejecting invalid redirect {redirect:?}: not a local path");
            }
            return valid;
        }

        let scheme = redirect
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());
        if scheme.as_deref() == Some(Scheme::HTTP.as_str())
            || scheme.as_deref() == Some(Scheme::HTTPS.as_str())
        {
            return self.is_allowed_url(redirect);
        }

        debug!("Rejecting invalid redirect {redirect:?}: not an absolute or relative URL");
        false
    }
}
