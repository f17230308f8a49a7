//! Input validation for user-supplied video links.
//!
//! Links are fetched server-side by the worker, so anything pointing at
//! loopback, private ranges or cloud metadata services is refused (SSRF).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::{Host, Url};

/// Maximum URL length.
pub const MAX_URL_LENGTH: usize = 2048;

/// Hostname patterns that never point at user content.
static BLOCKED_HOSTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^localhost$",
        r"\.localhost$",
        r"^metadata\.",
        r"^metadata$",
        r"\.internal$",
        r"\.local$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Result of URL validation.
#[derive(Debug, PartialEq, Eq)]
pub enum UrlValidationResult {
    /// URL is acceptable; carries the trimmed form.
    Valid(String),
    /// Malformed or uses an unsupported scheme.
    Invalid(String),
    /// Targets an internal or restricted endpoint.
    Blocked(String),
    TooLong,
}

impl UrlValidationResult {
    pub fn into_result(self) -> Result<String, String> {
        match self {
            Self::Valid(url) => Ok(url),
            Self::Invalid(msg) | Self::Blocked(msg) => Err(msg),
            Self::TooLong => Err(format!("URL exceeds maximum length of {} characters", MAX_URL_LENGTH)),
        }
    }
}

/// Validate a video link before it is stored and handed to the worker.
pub fn validate_video_url(url: &str) -> UrlValidationResult {
    let url = url.trim();
    if url.len() > MAX_URL_LENGTH {
        return UrlValidationResult::TooLong;
    }
    if url.is_empty() {
        return UrlValidationResult::Invalid("URL cannot be empty".to_string());
    }

    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => return UrlValidationResult::Invalid(format!("Invalid URL format: {}", e)),
    };

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return UrlValidationResult::Invalid(format!(
                "Invalid protocol '{}'. Only HTTP and HTTPS are allowed.",
                scheme
            ))
        }
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return UrlValidationResult::Invalid("URL must not contain credentials".to_string());
    }

    let blocked = match parsed.host() {
        None => return UrlValidationResult::Invalid("URL must have a valid host".to_string()),
        Some(Host::Ipv4(ip)) => is_restricted_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_restricted_ip(IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            BLOCKED_HOSTS.iter().any(|re| re.is_match(&domain))
        }
    };

    if blocked {
        warn!(url = %url, "Blocked URL target");
        return UrlValidationResult::Blocked(
            "URL appears to target an internal or restricted endpoint".to_string(),
        );
    }

    UrlValidationResult::Valid(url.to_string())
}

fn is_restricted_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_restricted_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_restricted_v4(v4);
            }
            is_restricted_v6(v6)
        }
    }
}

fn is_restricted_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        // carrier-grade NAT 100.64.0.0/10
        || (a == 100 && (64..128).contains(&b))
}

fn is_restricted_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
}

/// Strip control characters and trim.
pub fn sanitize_string(input: &str, max_chars: usize) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_links_are_valid() {
        assert_eq!(
            validate_video_url("  https://cdn.example.com/videos/clip.mp4 "),
            UrlValidationResult::Valid("https://cdn.example.com/videos/clip.mp4".to_string())
        );
        assert!(matches!(
            validate_video_url("http://203.0.113.10/v.mp4"),
            UrlValidationResult::Valid(_)
        ));
    }

    #[test]
    fn test_blocked_internal_targets() {
        for url in [
            "http://127.0.0.1/video.mp4",
            "http://localhost:8080/video.mp4",
            "http://192.168.1.1/video.mp4",
            "http://10.1.2.3/video.mp4",
            "http://172.20.0.5/video.mp4",
            "http://169.254.169.254/latest/meta-data/",
            "http://metadata.google.internal/computeMetadata/v1/",
            "http://[::1]/v.mp4",
            "http://[fd12::1]/v.mp4",
            "http://[::ffff:127.0.0.1]/v.mp4",
            "http://100.100.1.1/v.mp4",
        ] {
            assert!(
                matches!(validate_video_url(url), UrlValidationResult::Blocked(_)),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(validate_video_url("ftp://example.com/v.mp4"), UrlValidationResult::Invalid(_)));
        assert!(matches!(validate_video_url("javascript:alert(1)"), UrlValidationResult::Invalid(_)));
        assert!(matches!(validate_video_url("not a url"), UrlValidationResult::Invalid(_)));
        assert!(matches!(validate_video_url("https://user:pw@example.com/v.mp4"), UrlValidationResult::Invalid(_)));
        assert!(matches!(validate_video_url(""), UrlValidationResult::Invalid(_)));
    }

    #[test]
    fn test_too_long() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert_eq!(validate_video_url(&url), UrlValidationResult::TooLong);
    }

    #[test]
    fn test_sanitize_string() {
        assert_eq!(sanitize_string("  Jane\u{0007} Doe  ", 100), "Jane Doe");
        assert_eq!(sanitize_string("abcdef", 3), "abc");
    }
}
