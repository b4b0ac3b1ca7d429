use anyhow::{Context, Result};
use url::Url;

use crate::config::RouteConfig;

/// A compiled `prefix -> upstream` rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Literal path prefix, matched byte-wise and case-sensitively
    pub prefix: String,

    /// Base address of the owning service (e.g. "http://user-service")
    pub upstream: Url,

    /// Optional service name for logging
    pub name: Option<String>,
}

impl Route {
    pub fn new(config: &RouteConfig) -> Result<Self> {
        let upstream = Url::parse(&config.upstream)
            .with_context(|| format!("Invalid upstream URL {:?}", config.upstream))?;

        Ok(Self {
            prefix: config.prefix.clone(),
            upstream,
            name: config.name.clone(),
        })
    }

    /// Get a display name for the route's upstream (name or URL)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.upstream.as_str())
    }

    /// `host[:port]` of the upstream, as sent in the `Host` header
    pub fn authority(&self) -> String {
        let host = self.upstream.host_str().unwrap_or_default();
        match self.upstream.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Socket address string to dial, defaulting to port 80
    pub fn socket_addr(&self) -> String {
        let host = self.upstream.host_str().unwrap_or_default();
        let port = self.upstream.port_or_known_default().unwrap_or(80);
        format!("{}:{}", host, port)
    }
}

/// Result of matching a path against the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,

    /// The request path with exactly the matched prefix removed; may be empty
    pub remainder: &'a str,
}

impl RouteMatch<'_> {
    /// Origin-form request target for the upstream.
    ///
    /// Joins the upstream's base path with the remainder. An empty remainder
    /// addresses the upstream root, and a remainder that does not begin with
    /// `/` gets one so the target stays a valid path.
    pub fn upstream_target(&self) -> String {
        let base = self.route.upstream.path().trim_end_matches('/');

        let mut target = String::with_capacity(base.len() + self.remainder.len() + 1);
        target.push_str(base);
        if !self.remainder.is_empty() && !self.remainder.starts_with('/') {
            target.push('/');
        }
        target.push_str(self.remainder);

        if target.is_empty() {
            target.push('/');
        }
        target
    }
}

/// Ordered, immutable set of routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Compile the configured routes, keeping their order
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self> {
        let routes = configs
            .iter()
            .map(Route::new)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(routes))
    }

    /// Find the first route, in registration order, whose prefix starts `path`.
    ///
    /// First match wins even if a later prefix is longer, so narrower prefixes
    /// must be registered before broader ones to avoid shadowing.
    pub fn resolve<'a>(&'a self, path: &'a str) -> Option<RouteMatch<'a>> {
        self.routes.iter().find_map(|route| {
            path.strip_prefix(route.prefix.as_str())
                .map(|remainder| RouteMatch { route, remainder })
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
