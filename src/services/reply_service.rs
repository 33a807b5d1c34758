use tracing::warn;

use crate::gmail::MailProvider;

const THREAD_SCAN_LIMIT: u32 = 20;

/// Decides whether the recipient has replied in `thread_id` strictly after
/// the `since_ms` watermark.
///
/// Per-message fetch errors are skipped; a list-level error returns false.
/// The bias is deliberate: a transient provider error must not stop a
/// sequence, even at the cost of a possibly-unwanted follow-up.
pub async fn has_reply(
    provider: &dyn MailProvider,
    refresh_token: &str,
    thread_id: &str,
    recipient_email: &str,
    since_ms: i64,
) -> bool {
    let ids = match provider
        .list_thread(refresh_token, thread_id, THREAD_SCAN_LIMIT)
        .await
    {
        Ok(ids) => ids,
        Err(e) => {
            warn!(thread_id, error = %e, "thread listing failed, assuming no reply");
            return false;
        }
    };

    let needle = recipient_email.to_ascii_lowercase();
    for message_id in ids {
        let headers = match provider.message_headers(refresh_token, &message_id).await {
            Ok(h) => h,
            Err(e) => {
                warn!(%message_id, error = %e, "header fetch failed, skipping message");
                continue;
            }
        };
        let from_matches = headers
            .from
            .as_deref()
            .map(|f| f.to_ascii_lowercase().contains(&needle))
            .unwrap_or(false);
        if !from_matches {
            continue;
        }
        let Some(date) = headers.date.as_deref() else {
            continue;
        };
        match chrono::DateTime::parse_from_rfc2822(date.trim()) {
            Ok(dt) if dt.timestamp_millis() > since_ms => return true,
            Ok(_) => {}
            Err(e) => warn!(%message_id, error = %e, "unparseable Date header, skipping message"),
        }
    }
    false
}
