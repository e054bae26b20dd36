//! Request attributes handed over by the hosting dispatch layer.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use super::policy::RateLimitPolicy;

/// Headers consulted, in order, to find the originating client behind proxies.
const CLIENT_IP_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "proxy-client-ip",
    "wl-proxy-client-ip",
    "x-real-ip",
];

/// Client address used when neither headers nor peer address are known.
pub const UNKNOWN_CLIENT_IP: &str = "unknown";

/// The handler a request was routed to, with the policies declared on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerMeta {
    /// Handler name, conventionally `Controller::method`
    pub name: String,
    /// Policy declared on the handler itself
    pub method_policy: Option<RateLimitPolicy>,
    /// Policy declared on the controller owning the handler
    pub class_policy: Option<RateLimitPolicy>,
}

impl HandlerMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_method_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.method_policy = Some(policy);
        self
    }

    pub fn with_class_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.class_policy = Some(policy);
        self
    }

    /// The policy in force: method level first, then class level.
    pub fn effective_policy(&self) -> Option<&RateLimitPolicy> {
        self.method_policy.as_ref().or(self.class_policy.as_ref())
    }
}

/// A request as seen by the rate limit interceptor.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request method, e.g. `GET`
    pub method: String,
    /// Request path without query string
    pub path: String,
    /// Headers keyed by lowercase name
    headers: HashMap<String, String>,
    /// Address of the connected peer
    pub remote_addr: Option<IpAddr>,
    /// Handler matched by the dispatch layer, if any
    pub handler: Option<HandlerMeta>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_handler(mut self, handler: HandlerMeta) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Address of the originating client.
    ///
    /// Proxy headers win over the peer address; for `X-Forwarded-For` the
    /// first hop is taken. IPv6 loopback is reported as `127.0.0.1`.
    pub fn client_ip(&self) -> String {
        let forwarded = CLIENT_IP_HEADERS.iter().find_map(|name| {
            let value = self.header(name)?.split(',').next()?.trim();
            if value.is_empty() || value.eq_ignore_ascii_case(UNKNOWN_CLIENT_IP) {
                None
            } else {
                Some(value.to_string())
            }
        });

        let ip = forwarded.or_else(|| self.remote_addr.map(|addr| addr.to_string()));
        match ip {
            Some(ip) if ip == "::1" || ip == "0:0:0:0:0:0:0:1" => Ipv4Addr::LOCALHOST.to_string(),
            Some(ip) => ip,
            None => UNKNOWN_CLIENT_IP.to_string(),
        }
    }
}
