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

//! Structures required to deserialize Redirect Module configuration from YAML configuration files.

use clap::Parser;
use pandora_module_utils::DeserializeMap;

use crate::RedirectStrategy;

/// Command line options of the redirect module
#[derive(Debug, Parser)]
pub struct RedirectOpt {
    /// Path prefix of the proxy’s own endpoints, redirects into it are never produced.
    #[clap(long)]
    pub redirect_proxy_prefix: Option<String>,
    /// Trust the X-Forwarded-* headers of incoming requests. Only use this if a reverse proxy in
    /// front of the server sets these headers reliably.
    #[clap(long)]
    pub redirect_reverse_proxy: bool,
    /// A domain that absolute redirect URLs are allowed to point to, e.g. example.com,
    /// .example.com (including subdomains) or example.com:8443. This command line flag can be
    /// specified multiple times.
    #[clap(long)]
    pub redirect_allowed_domains: Option<Vec<String>>,
    /// Strategy used to determine the redirect target: rd_querystring, x_auth_request_redirect,
    /// x_forwarded_headers or uri. This command line flag can be specified multiple times, the
    /// strategies replace the configured ones and are tried in the order given.
    #[clap(long)]
    pub redirect_strategies: Option<Vec<RedirectStrategy>>,
    /// Path of the endpoint responding with a redirect to the resolved target
    #[clap(long)]
    pub redirect_endpoint: Option<String>,
}

/// Configuration file settings of the redirect module
#[derive(Debug, Clone, PartialEq, Eq, DeserializeMap)]
pub struct RedirectConf {
    /// Path prefix of the proxy’s own endpoints such as sign-in and callback
    pub redirect_proxy_prefix: String,

    /// If `true`, requests are considered to be received through a trusted reverse proxy and
    /// their `X-Forwarded-*` headers are used.
    pub redirect_reverse_proxy: bool,

    /// Domains that absolute redirect URLs are allowed to point to
    pub redirect_allowed_domains: Vec<String>,

    /// Strategies used to determine the redirect target, in the order of priority
    pub redirect_strategies: Vec<RedirectStrategy>,

    /// Path of the endpoint responding with a redirect to the resolved target
    pub redirect_endpoint: Option<String>,
}

impl RedirectConf {
    /// Merges the command line options into the current configuration. Command line options
    /// present overwrite existing settings, with the exception of `--redirect-allowed-domains`
    /// that adds to the existing ones.
    pub fn merge_with_opt(&mut self, opt: RedirectOpt) {
        if let Some(redirect_proxy_prefix) = opt.redirect_proxy_prefix {
            self.redirect_proxy_prefix = redirect_proxy_prefix;
        }

        if opt.redirect_reverse_proxy {
            self.redirect_reverse_proxy = true;
        }

        if let Some(redirect_allowed_domains) = opt.redirect_allowed_domains {
            self.redirect_allowed_domains
                .extend(redirect_allowed_domains);
        }

        if let Some(redirect_strategies) = opt.redirect_strategies {
            self.redirect_strategies = redirect_strategies;
        }

        if opt.redirect_endpoint.is_some() {
            self.redirect_endpoint = opt.redirect_endpoint;
        }
    }
}

impl Default for RedirectConf {
    fn default() -> Self {
        Self {
            redirect_proxy_prefix: "/oauth2".to_owned(),
            redirect_reverse_proxy: false,
            redirect_allowed_domains: Vec::new(),
            redirect_strategies: RedirectStrategy::DEFAULT_ORDER.to_vec(),
            redirect_endpoint: None,
        }
    }
}
