//! Shared HTTP plumbing for the search tiers.

use std::io::Read;
use std::time::Duration;

use crate::protocol::SearchFailure;

/// Thin wrapper around one shared `ureq` agent.
///
/// Each call is a single attempt; retry policy lives with the orchestrator.
pub struct HttpTransport {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(7))
            .timeout_write(Duration::from_secs(7))
            .build();
        Self {
            agent,
            user_agent: user_agent.to_string(),
        }
    }

    pub fn get_text(
        &self,
        url: &str,
        accept: &str,
        timeout: Duration,
    ) -> Result<String, SearchFailure> {
        let response = self
            .agent
            .get(url)
            .set("User-Agent", &self.user_agent)
            .set("Accept", accept)
            .timeout(timeout)
            .call()
            .map_err(|error| classify_ureq_failure(&error))?;

        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| {
                let message = format!("Failed to read response: {error}");
                if classify_io_timeout(&error) {
                    SearchFailure::transient(message)
                } else {
                    SearchFailure::permanent(message)
                }
            })?;
        Ok(body)
    }
}

pub fn classify_ureq_failure(error: &ureq::Error) -> SearchFailure {
    let message = format!("Request failed: {error}");
    match error {
        ureq::Error::Status(code, response) => match code {
            429 => SearchFailure::rate_limited(message, parse_retry_after(response.header("retry-after"))),
            408 | 500 | 502 | 503 | 504 => SearchFailure::transient(message),
            _ => SearchFailure::permanent(message),
        },
        ureq::Error::Transport(transport) => {
            let lowered = transport.to_string().to_ascii_lowercase();
            if lowered.contains("timed out")
                || lowered.contains("timeout")
                || lowered.contains("reset")
            {
                SearchFailure::transient(message)
            } else {
                SearchFailure::permanent(message)
            }
        }
    }
}

pub fn classify_io_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    ) || error.to_string().to_ascii_lowercase().contains("timed out")
}

/// Parses a `Retry-After` header carrying delay seconds. The HTTP-date form
/// is rare on catalog endpoints and reads as absent.
fn parse_retry_after(header: Option<&str>) -> Option<Duration> {
    let seconds: u64 = header?.trim().parse().ok()?;
    Some(Duration::from_secs(seconds))
}
