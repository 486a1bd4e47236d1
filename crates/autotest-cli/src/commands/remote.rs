//! Commands that talk to a running webhook server.

use crate::Event;
use anyhow::{Context, Result, anyhow, bail};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;
use url::Url;

fn endpoint(base: &str, path: &str) -> Result<Url> {
    let base = Url::parse(base).with_context(|| format!("Invalid server URL: {}", base))?;
    Ok(base.join(path)?)
}

fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid webhook secret: {}", e))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// POST a saved payload to the webhook endpoint.
pub async fn replay(base: &str, payload: &Path, event: Event, secret: Option<&str>) -> Result<()> {
    let body = std::fs::read(payload)
        .with_context(|| format!("Failed to read {}", payload.display()))?;
    serde_json::from_slice::<serde_json::Value>(&body)
        .with_context(|| format!("{} is not valid JSON", payload.display()))?;

    let url = endpoint(base, "/githubWebhook")?;
    let mut request = reqwest::Client::new()
        .post(url.clone())
        .header("Content-Type", "application/json")
        .header("X-GitHub-Event", event.header_value())
        .header(
            "X-GitHub-Delivery",
            format!("replay-{}", chrono::Utc::now().timestamp_millis()),
        );
    if let Some(secret) = secret {
        request = request.header("X-Hub-Signature-256", sign(secret, &body)?);
    }

    let response = request.body(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Server returned {}: {}", status, text);
    }

    println!("Delivered {} event to {}", event.header_value(), url);
    Ok(())
}

/// Print the scheduler snapshot.
pub async fn status(base: &str) -> Result<()> {
    let url = endpoint(base, "/status")?;
    let response = reqwest::get(url).await?.error_for_status()?;
    let snapshot: serde_json::Value = response.json().await?;

    for lane in ["express", "standard"] {
        let jobs = snapshot[lane].as_array().cloned().unwrap_or_default();
        println!("{} ({}):", lane, jobs.len());
        for job in jobs {
            println!(
                "  {} {}",
                job["delivId"].as_str().unwrap_or("?"),
                job["commitURL"].as_str().unwrap_or("?")
            );
        }
    }

    let executing = snapshot["executing"].as_array().cloned().unwrap_or_default();
    println!("executing ({}):", executing.len());
    for job in executing {
        println!(
            "  {} {} at {} since {}",
            job["key"]["delivId"].as_str().unwrap_or("?"),
            job["key"]["commitURL"].as_str().unwrap_or("?"),
            job["address"].as_str().unwrap_or("?"),
            job["started"].as_str().unwrap_or("?"),
        );
    }
    Ok(())
}
