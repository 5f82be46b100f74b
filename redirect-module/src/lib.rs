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

//! # Redirect Module for Pandora Web Server
//!
//! This crate determines where a user should be sent once authentication completes. The redirect
//! target is taken from the request, and only targets considered safe are accepted: local paths
//! and absolute URLs pointing to explicitly allowed domains. Redirects into the server’s own
//! authentication endpoints are never produced.
//!
//! A configuration could look like this:
//!
//! ```yaml
//! redirect_proxy_prefix: /oauth2
//! redirect_reverse_proxy: true
//! redirect_allowed_domains:
//! - .example.com
//! - app.example.net:8443
//! redirect_endpoint: /oauth2/redirect
//! ```
//!
//! ## Redirect strategies
//!
//! The redirect target is determined by trying a number of strategies in order. The first
//! strategy producing a valid redirect target wins, `/` is used if none does. The
//! `redirect_strategies` setting lists the strategies to try, by default all of them in the order
//! given here:
//!
//! * `rd_querystring`: The `rd` query string parameter, e.g. `/oauth2/start?rd=%2Fdashboard`.
//! * `x_auth_request_redirect`: The `X-Auth-Request-Redirect` request header, typically set by
//!   the application behind the server.
//! * `x_forwarded_headers`: An absolute URL composed from `X-Forwarded-Proto`,
//!   `X-Forwarded-Host`, `X-Forwarded-Prefix` and `X-Forwarded-Uri` headers. This strategy only
//!   applies in reverse proxy mode. If the forwarded URI points to the server’s own endpoints, it
//!   is replaced by the forwarded prefix.
//! * `uri`: The request URI itself (`X-Forwarded-Uri` header in reverse proxy mode). If it points
//!   to the server’s own endpoints, `/` is used instead.
//!
//! ## Settings
//!
//! * `redirect_proxy_prefix`: Path prefix of the server’s own endpoints (sign-in, callback,
//!   static resources), `/oauth2` by default. Paths are compared segment by segment: `/oauth2/x`
//!   is located within `/oauth2` but `/oauth2-other/x` is not.
//! * `redirect_reverse_proxy`: If `true`, the server is considered to be running behind a reverse
//!   proxy and `X-Forwarded-*` headers are trusted. Only enable this if the reverse proxy reliably
//!   sets or removes these headers.
//! * `redirect_allowed_domains`: Domains that absolute redirect URLs may point to. `example.com`
//!   only allows this exact host, `.example.com` allows the host and all its subdomains. A port
//!   can be specified (`example.com:8443`) or allowed generally (`example.com:*`). Without a port
//!   only URLs without an explicit port are accepted.
//! * `redirect_endpoint`: If set, requests to this path are answered with a `302 Found`
//!   redirect to the resolved target. For `POST` requests to this endpoint the form values of an
//!   `application/x-www-form-urlencoded` body are considered as well, taking precedence over the
//!   query string.
//!
//! For all other requests the resolved target is stored with the request, and subsequent
//! handlers can retrieve it via [`app_redirect`].
//!
//! ## Code example
//!
//! You would normally put this handler in front of the handlers implementing authentication. The
//! `pandora-module-utils` and `startup-module` crates provide helpers to simplify merging of
//! configuration and the command-line options of various handlers as well as creating a server
//! instance from the configuration:
//!
//! ```rust
//! use clap::Parser;
//! use pandora_module_utils::{merge_conf, merge_opt, FromYaml, RequestFilter};
//! use redirect_module::{RedirectHandler, RedirectOpt};
//! use startup_module::{DefaultApp, StartupConf, StartupOpt};
//!
//! #[derive(Debug, RequestFilter)]
//! struct Handler {
//!     redirect: RedirectHandler,
//! }
//!
//! #[merge_conf]
//! struct Conf {
//!     startup: StartupConf,
//!     handler: <Handler as RequestFilter>::Conf,
//! }
//!
//! #[merge_opt]
//! struct Opt {
//!     startup: StartupOpt,
//!     redirect: RedirectOpt,
//! }
//!
//! let opt = Opt::parse();
//! let mut conf = Conf::load_from_files(opt.startup.conf.as_deref().unwrap_or(&[])).unwrap();
//! conf.handler.redirect.merge_with_opt(opt.redirect);
//!
//! let app = DefaultApp::<Handler>::from_conf(conf.handler).unwrap();
//! let server = conf.startup.into_server(app, Some(opt.startup)).unwrap();
//!
//! // Do something with the server here, e.g. call server.run_forever()
//! ```
//!
//! The resolver can also be used directly, with any validator:
//!
//! ```rust
//! use http::Request;
//! use redirect_module::{ProxyPrefix, RedirectRequest, RedirectResolver, RedirectStrategy};
//!
//! let resolver = RedirectResolver::new(ProxyPrefix::new("/oauth2").unwrap(), |redirect: &str| {
//!     redirect.starts_with('/') && !redirect.starts_with("//")
//! });
//!
//! let request = Request::get("/oauth2/callback")
//!     .header("X-Auth-Request-Redirect", "/dashboard")
//!     .body(())
//!     .unwrap();
//! let request = RedirectRequest::from_http(&request);
//! assert_eq!(
//!     resolver.resolve(&RedirectStrategy::DEFAULT_ORDER, &request),
//!     "/dashboard"
//! );
//! ```

pub mod configuration;
pub mod forwarded;
mod handler;
mod prefix;
mod request;
mod resolver;
pub mod validator;

pub use configuration::{RedirectConf, RedirectOpt};
pub use handler::{app_redirect, AppRedirect, RedirectHandler};
pub use prefix::ProxyPrefix;
pub use request::RedirectRequest;
pub use resolver::{
    RedirectResolver, RedirectSource, RedirectStrategy, DEFAULT_REDIRECT, RD_PARAMETER,
    X_AUTH_REQUEST_REDIRECT,
};
pub use validator::{DomainValidator, RedirectValidator};
