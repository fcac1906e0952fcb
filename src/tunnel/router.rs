//! Picks the endpoint an inbound request is addressed to.
//!
//! - **Path mode**: `/<id>/rest` → endpoint `<id>`, path `/rest`.
//! - **Subdomain mode**: `Host: <id>.<base host>` → endpoint `<id>`, path unchanged.
//!
//! Routing is a pure function of the request line, the `Host` header and the
//! routing config. Whether the target exists is the registry's business.

use crate::config::{RoutingConfig, RoutingMode};

/// Which endpoint a request names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The request explicitly names this endpoint ID.
    Endpoint(String),
    /// The request names no endpoint.
    Unspecified,
}

/// Routing decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: Target,
    /// Path to forward to the endpoint, without the query string.
    pub path: String,
}

/// Path prefix owned by the gateway itself. Never forwarded to an endpoint.
pub const RESERVED_PREFIX: &str = "/_tunnel";

/// Whether `path` falls under [`RESERVED_PREFIX`].
pub fn is_reserved(path: &str) -> bool {
    path.strip_prefix(RESERVED_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

pub fn route(host: Option<&str>, path: &str, config: &RoutingConfig) -> Route {
    match config.mode {
        RoutingMode::Path => route_by_path(path),
        RoutingMode::Subdomain => Route {
            target: subdomain_target(host, config.base_url.host()),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        },
    }
}

fn route_by_path(path: &str) -> Route {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let (segment, remainder) = rest.split_once('/').unwrap_or((rest, ""));
    let target = if segment.is_empty() {
        Target::Unspecified
    } else {
        Target::Endpoint(segment.to_string())
    };
    Route {
        target,
        path: format!("/{remainder}"),
    }
}

fn subdomain_target(host: Option<&str>, base_host: &str) -> Target {
    let Some(host) = host.map(strip_port) else {
        return Target::Unspecified;
    };
    match host.split_once('.') {
        Some((label, domain)) if !label.is_empty() && domain.eq_ignore_ascii_case(base_host) => {
            Target::Endpoint(label.to_ascii_lowercase())
        }
        _ => Target::Unspecified,
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BaseUrl, NoTargetPolicy};

    fn config(mode: RoutingMode, base_url: &str) -> RoutingConfig {
        RoutingConfig {
            mode,
            base_url: BaseUrl::parse(base_url).unwrap(),
            no_target: NoTargetPolicy::Fallback,
        }
    }

    fn endpoint(id: &str) -> Target {
        Target::Endpoint(id.to_string())
    }

    #[test]
    fn test_path_mode_strips_first_segment() {
        let cfg = config(RoutingMode::Path, "http://localhost:3000");
        let routed = route(Some("localhost:3000"), "/abc123/foo", &cfg);
        assert_eq!(routed.target, endpoint("abc123"));
        assert_eq!(routed.path, "/foo");
    }

    #[test]
    fn test_path_mode_defaults_to_root() {
        let cfg = config(RoutingMode::Path, "http://localhost:3000");
        for path in ["/abc123", "/abc123/"] {
            let routed = route(None, path, &cfg);
            assert_eq!(routed.target, endpoint("abc123"));
            assert_eq!(routed.path, "/");
        }
    }

    #[test]
    fn test_path_mode_keeps_nested_path() {
        let cfg = config(RoutingMode::Path, "http://localhost:3000");
        let routed = route(None, "/abc123/a/b/c.txt", &cfg);
        assert_eq!(routed.path, "/a/b/c.txt");
    }

    #[test]
    fn test_path_mode_root_has_no_target() {
        let cfg = config(RoutingMode::Path, "http://localhost:3000");
        let root = route(None, "/", &cfg);
        assert_eq!(root.target, Target::Unspecified);
        assert_eq!(root.path, "/");

        let empty_segment = route(None, "//x", &cfg);
        assert_eq!(empty_segment.target, Target::Unspecified);
        assert_eq!(empty_segment.path, "/x");
    }

    #[test]
    fn test_subdomain_mode_uses_leading_label() {
        let cfg = config(RoutingMode::Subdomain, "https://example.com");
        let routed = route(Some("xyz.example.com"), "/foo", &cfg);
        assert_eq!(routed.target, endpoint("xyz"));
        assert_eq!(routed.path, "/foo");
    }

    #[test]
    fn test_subdomain_mode_ignores_port_and_case() {
        let cfg = config(RoutingMode::Subdomain, "http://localhost:3000");
        let routed = route(Some("ABC123.LocalHost:3000"), "/", &cfg);
        assert_eq!(routed.target, endpoint("abc123"));
    }

    #[test]
    fn test_subdomain_mode_without_label() {
        let cfg = config(RoutingMode::Subdomain, "https://example.com");
        for host in [Some("example.com"), Some("other.org"), Some("a.b.example.com"), None] {
            assert_eq!(route(host, "/", &cfg).target, Target::Unspecified, "{host:?}");
        }
    }

    #[test]
    fn test_is_reserved() {
        assert!(is_reserved("/_tunnel"));
        assert!(is_reserved("/_tunnel/"));
        assert!(is_reserved("/_tunnel/secret"));
        assert!(!is_reserved("/_tunnelx"));
        assert!(!is_reserved("/abc123/_tunnel/x"));
        assert!(!is_reserved("/"));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:3000"), "[::1]");
    }
}
