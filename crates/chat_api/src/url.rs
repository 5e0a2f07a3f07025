const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Normalize a configured base URL to a chat-completions endpoint.
///
/// Normalization rules:
/// 1) keep `/chat/completions` unchanged
/// 2) append `/chat/completions` when path ends in `/v1`
/// 3) leave anything else as given, minus trailing slashes
pub fn normalize_chat_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.ends_with(CHAT_COMPLETIONS_PATH) {
        return trimmed.to_string();
    }
    if trimmed.ends_with("/v1") {
        return format!("{trimmed}{CHAT_COMPLETIONS_PATH}");
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::normalize_chat_url;

    #[test]
    fn normalizes_api_roots_and_keeps_full_endpoints() {
        assert_eq!(
            normalize_chat_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            normalize_chat_url(" https://api.example.com/v1/chat/completions "),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            normalize_chat_url("http://127.0.0.1:8080/proxy"),
            "http://127.0.0.1:8080/proxy"
        );
    }
}
