use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Assembles the plain-text RFC 5322 message the provider expects in its
/// `raw` field. Lines are joined with `\n`.
pub fn build_rfc5322(from: &str, to: &str, subject: &str, body_text: Option<&str>) -> String {
    [
        format!("From: {from}"),
        format!("To: {to}"),
        format!("Subject: {subject}"),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/plain; charset=\"UTF-8\"".to_string(),
        String::new(),
        body_text.unwrap_or_default().to_string(),
    ]
    .join("\n")
}

/// base64url without padding, as the provider's `raw` field requires.
pub fn encode_raw(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}
