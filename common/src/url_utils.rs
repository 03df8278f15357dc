use std::net::SocketAddr;

use anyhow::anyhow;
use url::Url;

pub fn parse_socket_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    addr.parse()
        .map_err(|e| anyhow!("invalid listen address '{}': {}", addr, e))
}

/// Validates a service base URL; only http/https are accepted.
pub fn sanitize_url(url: &str) -> anyhow::Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("URL cannot be empty"));
    }

    if url.contains('\0') || url.contains('\r') || url.contains('\n') {
        return Err(anyhow!("URL contains invalid control characters"));
    }

    let parsed_url = Url::parse(url).map_err(|e| anyhow!("Invalid URL format: {}", e))?;

    match parsed_url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Unsupported URL scheme: {}", other)),
    }

    Ok(parsed_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_url() {
        assert!(sanitize_url("http://inventory.example:10053").is_ok());
        assert!(sanitize_url("ftp://inventory.example").is_err());
        assert!(sanitize_url("").is_err());
    }

    #[test]
    fn test_parse_socket_addr() {
        assert!(parse_socket_addr("0.0.0.0:8585").is_ok());
        assert!(parse_socket_addr("not-an-addr").is_err());
    }
}
