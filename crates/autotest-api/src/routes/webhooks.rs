//! GitHub webhook endpoint and scheduler status.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use autotest_scheduler::SchedulerStatus;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::services::normalizer::{parse_comment, parse_push};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/githubWebhook", post(github_webhook))
        .route("/status", get(status))
}

/// Handle GitHub webhook events.
///
/// Well-formed requests are always acknowledged, even when the event is
/// dropped.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("Invalid signature".to_string()));
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!(event = %event_type, delivery = %delivery, "Received GitHub webhook");

    match event_type {
        "push" => match parse_push(&payload) {
            Some(push) => {
                info!(
                    commit = %push.commit_url,
                    branch = %push.branch,
                    "Processing push event"
                );
                state.scheduler.handle_push(push, None).await;
            }
            None => {
                info!(delivery = %delivery, "Push dropped (branch deletion or incomplete payload)");
            }
        },
        "commit_comment" | "issue_comment" => match parse_comment(&payload, &state.bot_name) {
            Some(comment) => {
                info!(
                    commit = %comment.commit_url,
                    person = %comment.person_id,
                    deliv = ?comment.deliv_id,
                    "Processing comment event"
                );
                state.scheduler.handle_comment(comment).await;
            }
            None => {
                info!(event = %event_type, delivery = %delivery, "Comment dropped (incomplete payload)");
            }
        },
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
        }
    }

    Ok(StatusCode::OK)
}

/// Queue and execution snapshot.
async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

/// Verify GitHub webhook signature (HMAC-SHA256).
pub fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_verify_signature() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let signature = sign("s3cret", body);

        assert!(verify_github_signature("s3cret", body, Some(&signature)));
        assert!(!verify_github_signature("other", body, Some(&signature)));
        assert!(!verify_github_signature("s3cret", b"tampered", Some(&signature)));
        assert!(!verify_github_signature("s3cret", body, None));
        assert!(!verify_github_signature("s3cret", body, Some("sha1=abcd")));
        assert!(!verify_github_signature("s3cret", body, Some("sha256=zz")));
    }
}
