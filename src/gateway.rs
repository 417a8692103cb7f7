use std::time::Duration;

use serde_json::{json, Value};

use crate::error::ApiError;
use crate::types::{AppState, ProviderCredentials};

const SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Preflight for outbound sends: every missing credential is reported at
/// once, not just the first.
pub fn require_provider_config(creds: &ProviderCredentials) -> Result<(), ApiError> {
    let missing = creds.missing();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Configuration { missing })
    }
}

/// The API key never appears unmasked in log output.
pub fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .skip(key.chars().count().saturating_sub(4))
        .collect();
    format!("****{tail}")
}

/// Issue one `message_send` call to the provider. Single attempt with a hard
/// timeout; no retry, so operators see failures immediately. Updates the
/// sent/error counters and `last_error` as a side effect.
pub async fn send_message(
    state: &AppState,
    chat_number: &str,
    text: &str,
    send_date: Option<&str>,
) -> Result<Value, ApiError> {
    require_provider_config(&state.provider)?;
    // Preflight guarantees these are present.
    let endpoint = state.provider.endpoint.clone().unwrap_or_default();
    let api_key = state.provider.api_key.clone().unwrap_or_default();
    let account_id = state.provider.account_id.clone().unwrap_or_default();
    let phone_id = state.provider.phone_id.clone().unwrap_or_default();

    let mut params = vec![
        ("key", api_key.clone()),
        ("account_id", account_id),
        ("phone_id", phone_id),
        ("action", "message_send".to_string()),
        ("text", text.to_string()),
        ("chat_number", chat_number.to_string()),
    ];
    if let Some(send_date) = send_date {
        // Provider validates the `YYYY-MM-DD HH:MM` format, not us.
        params.push(("send_date", send_date.to_string()));
    }

    let response = state
        .http_client
        .post(&endpoint)
        .query(&params)
        .timeout(SEND_TIMEOUT)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            let payload = json!({ "message": err.to_string() });
            tracing::warn!(
                key = %mask_key(&api_key),
                "chatguru send to {chat_number} failed: {err}"
            );
            record_send_error(state, payload.clone()).await;
            return Err(ApiError::Upstream {
                error: payload,
                status: None,
            });
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<Value>(&body).unwrap_or_else(|_| json!({ "raw": body }));

    if status.is_success() {
        let mut runtime = state.runtime.lock().await;
        runtime.counters.sent_messages += 1;
        tracing::info!(key = %mask_key(&api_key), "chatguru send to {chat_number} ok");
        return Ok(parsed);
    }

    tracing::warn!(
        key = %mask_key(&api_key),
        "chatguru send to {chat_number} failed with status {}",
        status.as_u16()
    );
    record_send_error(state, parsed.clone()).await;
    Err(ApiError::Upstream {
        error: parsed,
        status: Some(status.as_u16()),
    })
}

async fn record_send_error(state: &AppState, payload: Value) {
    let mut runtime = state.runtime.lock().await;
    runtime.counters.send_errors += 1;
    runtime.counters.last_error = Some(payload);
}
