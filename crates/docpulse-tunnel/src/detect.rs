//! Public endpoint detection in tunnel process output.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Strategy for recognising the public URL in one line of process output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDetector {
    /// ngrok JSON log line with `"msg": "started tunnel"` and a `url` field.
    NgrokJson,
    /// First URL whose host ends with the given suffix.
    HostSuffix(&'static str),
    /// First publicly reachable URL on the line.
    FirstUrl,
}

impl EndpointDetector {
    /// Return the public URL announced on `line`, if any.
    pub fn detect(&self, line: &str) -> Option<Url> {
        match self {
            Self::NgrokJson => {
                let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
                if value.get("msg")?.as_str()? != "started tunnel" {
                    return None;
                }
                value.get("url")?.as_str().and_then(parse_endpoint)
            }
            Self::HostSuffix(suffix) => urls(line)
                .find(|url| url.host_str().is_some_and(|h| h.ends_with(suffix))),
            Self::FirstUrl => urls(line).next(),
        }
    }
}

/// Rewrite an `http` endpoint to `https`.
///
/// Tunnel providers terminate TLS for every public endpoint; the document platform
/// rejects plain-http callback addresses.
pub fn normalize_https(mut url: Url) -> Url {
    if url.scheme() == "http" {
        // http and https are both special schemes, so the switch cannot be refused.
        let _ = url.set_scheme("https");
    }
    url
}

/// `scheme://host[:port]` of an endpoint, without a trailing slash.
pub fn public_origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn urls(line: &str) -> impl Iterator<Item = Url> + '_ {
    line.split(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '|' | '<' | '>' | ','))
        .filter(|token| token.starts_with("https://") || token.starts_with("http://"))
        .filter_map(|token| parse_endpoint(token.trim_end_matches(['.', ';', ')'])))
}

/// Parse a candidate endpoint. Credentials and local-only hosts are never a tunnel's
/// public address.
fn parse_endpoint(candidate: &str) -> Option<Url> {
    let url = Url::parse(candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https")
        || !url.username().is_empty()
        || url.password().is_some()
    {
        return None;
    }
    let public = match url.host()? {
        Host::Domain(domain) => !domain.is_empty() && domain != "localhost",
        Host::Ipv4(ip) => !ip.is_loopback() && ip != Ipv4Addr::UNSPECIFIED,
        Host::Ipv6(ip) => !ip.is_loopback() && ip != Ipv6Addr::UNSPECIFIED,
    };
    public.then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(detector: EndpointDetector, line: &str) -> Option<String> {
        detector.detect(line).map(|url| public_origin(&url))
    }

    #[test]
    fn test_ngrok_started_tunnel() {
        let line = r#"{"addr":"http://localhost:5001","lvl":"info","msg":"started tunnel","name":"command_line","obj":"tunnels","url":"https://a1b2.ngrok-free.app"}"#;
        assert_eq!(
            detect(EndpointDetector::NgrokJson, line).as_deref(),
            Some("https://a1b2.ngrok-free.app")
        );
    }

    #[test]
    fn test_ngrok_ignores_other_lines() {
        let line = r#"{"lvl":"info","msg":"client session established","url":"https://ignored"}"#;
        assert_eq!(EndpointDetector::NgrokJson.detect(line), None);
        assert_eq!(EndpointDetector::NgrokJson.detect("not json"), None);
    }

    #[test]
    fn test_cloudflared_banner() {
        let detector = EndpointDetector::HostSuffix(".trycloudflare.com");
        let noise = "2024-05-01T10:00:00Z INF Requesting new quick Tunnel on trycloudflare.com...";
        let banner = "2024-05-01T10:00:01Z INF |  https://calm-river-bold.trycloudflare.com  |";

        assert_eq!(detector.detect(noise), None);
        assert_eq!(
            detect(detector, banner).as_deref(),
            Some("https://calm-river-bold.trycloudflare.com")
        );
        assert_eq!(
            detector.detect("INF see https://www.cloudflare.com/website-terms/"),
            None
        );
    }

    #[test]
    fn test_host_suffix_ignores_userinfo() {
        let detector = EndpointDetector::HostSuffix(".trycloudflare.com");
        assert_eq!(
            detector.detect("INF http://user@evil.test@x.trycloudflare.com"),
            None
        );
        assert_eq!(
            detector.detect("INF https://x.trycloudflare.com@evil.test"),
            None
        );
    }

    #[test]
    fn test_first_url() {
        assert_eq!(
            detect(
                EndpointDetector::FirstUrl,
                "listening at http://demo.example.test:8443, ready."
            )
            .as_deref(),
            Some("http://demo.example.test:8443")
        );
        assert_eq!(EndpointDetector::FirstUrl.detect("starting up"), None);
    }

    #[test]
    fn test_first_url_skips_local_addresses() {
        let line = "inspector on http://[::1]:4040 and http://127.0.0.1:4040, public at https://pub.example.test";
        assert_eq!(
            detect(EndpointDetector::FirstUrl, line).as_deref(),
            Some("https://pub.example.test")
        );
        assert_eq!(
            EndpointDetector::FirstUrl.detect("web ui http://localhost:4040"),
            None
        );
    }

    #[test]
    fn test_normalize_https() {
        let url = normalize_https(Url::parse("http://abc.example.test/").unwrap());
        assert_eq!(url.scheme(), "https");
        assert_eq!(public_origin(&url), "https://abc.example.test");

        let url = normalize_https(Url::parse("https://abc.example.test").unwrap());
        assert_eq!(public_origin(&url), "https://abc.example.test");
    }
}
