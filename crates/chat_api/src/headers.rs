use std::collections::BTreeMap;

use crate::config::ChatApiConfig;
use crate::error::ChatApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";

/// Build a deterministic header map for one chat-completion request.
pub fn build_headers(
    config: &ChatApiConfig,
    streaming: bool,
) -> Result<BTreeMap<String, String>, ChatApiError> {
    let api_key = config.api_key.trim();
    if api_key.is_empty() {
        return Err(ChatApiError::MissingApiKey);
    }

    let mut headers = BTreeMap::new();
    headers.insert(
        HEADER_AUTHORIZATION.to_owned(),
        format!("Bearer {api_key}"),
    );
    headers.insert(HEADER_CONTENT_TYPE.to_owned(), JSON.to_owned());
    headers.insert(
        HEADER_ACCEPT.to_owned(),
        if streaming { EVENT_STREAM } else { JSON }.to_owned(),
    );

    let user_agent = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    Ok(headers)
}

fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match runtime_os_triplet() {
        Some((platform, release, arch)) => {
            format!("agent-bench/{version} ({platform} {release}; {arch})")
        }
        None => format!("agent-bench/{version}"),
    }
}

#[cfg(unix)]
fn runtime_os_triplet() -> Option<(String, String, String)> {
    use std::ffi::CStr;
    use std::mem::MaybeUninit;

    let mut raw = MaybeUninit::<libc::utsname>::uninit();
    // SAFETY: `uname` initializes the provided `utsname` struct on success.
    let rc = unsafe { libc::uname(raw.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }

    // SAFETY: We checked `uname` returned success, so `raw` is initialized.
    let raw = unsafe { raw.assume_init() };
    // SAFETY: `uname` provides NUL-terminated fixed-size C strings.
    let platform = unsafe { CStr::from_ptr(raw.sysname.as_ptr()) }
        .to_string_lossy()
        .to_lowercase();
    // SAFETY: `uname` provides NUL-terminated fixed-size C strings.
    let release = unsafe { CStr::from_ptr(raw.release.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    // SAFETY: `uname` provides NUL-terminated fixed-size C strings.
    let arch = unsafe { CStr::from_ptr(raw.machine.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    if platform.is_empty() || release.is_empty() || arch.is_empty() {
        None
    } else {
        Some((platform, release, arch))
    }
}

#[cfg(not(unix))]
fn runtime_os_triplet() -> Option<(String, String, String)> {
    None
}

#[cfg(test)]
mod tests {
    use super::{build_headers, HEADER_ACCEPT, HEADER_AUTHORIZATION, HEADER_USER_AGENT};
    use crate::config::ChatApiConfig;
    use crate::error::ChatApiError;

    #[test]
    fn streaming_headers_carry_bearer_and_event_stream_accept() {
        let config = ChatApiConfig::new(" sk-test ", "http://localhost/v1", "m")
            .insert_header("X-Trace", "abc");
        let headers = build_headers(&config, true).expect("headers");

        assert_eq!(headers[HEADER_AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers[HEADER_ACCEPT], "text/event-stream");
        assert_eq!(headers["x-trace"], "abc");
        assert!(headers[HEADER_USER_AGENT].starts_with("agent-bench/"));
    }

    #[test]
    fn blocking_headers_accept_json_and_honor_user_agent_override() {
        let config = ChatApiConfig::new("k", "u", "m").with_user_agent("bench-ci");
        let headers = build_headers(&config, false).expect("headers");

        assert_eq!(headers[HEADER_ACCEPT], "application/json");
        assert_eq!(headers[HEADER_USER_AGENT], "bench-ci");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = ChatApiConfig::new("  ", "u", "m");
        assert!(matches!(
            build_headers(&config, true),
            Err(ChatApiError::MissingApiKey)
        ));
    }
}
