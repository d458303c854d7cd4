use std::collections::BTreeMap;

use crate::config::RunsApiConfig;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for run endpoint requests.
///
/// Extra headers are applied last and win over the defaults.
pub fn build_headers(config: &RunsApiConfig) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    headers.insert(HEADER_ACCEPT.to_owned(), "application/json".to_owned());

    if let Some(token) = config.access_token.as_deref().and_then(sanitize_nonempty) {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    }

    let ua = config
        .user_agent
        .as_deref()
        .and_then(sanitize_nonempty)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    headers
}

fn sanitize_nonempty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn default_user_agent() -> String {
    format!(
        "stream_reconcile/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_adds_no_authorization() {
        let config = RunsApiConfig::default().with_access_token("   ");
        assert!(!build_headers(&config).contains_key(HEADER_AUTHORIZATION));
    }

    #[test]
    fn extra_headers_are_lowercased_and_override_defaults() {
        let config = RunsApiConfig::default()
            .with_access_token("tok")
            .insert_header("Accept", "text/plain")
            .insert_header(" X-Client ", " cli ");
        let headers = build_headers(&config);
        assert_eq!(headers["authorization"], "Bearer tok");
        assert_eq!(headers["accept"], "text/plain");
        assert_eq!(headers["x-client"], "cli");
    }
}
