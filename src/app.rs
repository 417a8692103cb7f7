use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;

use crate::auth::{self, AdminGuard};
use crate::error::ApiError;
use crate::gateway;
use crate::types::{coerce_string, now_iso, AppState, LastChat};

fn parse_body(body: &Bytes) -> Value {
    serde_json::from_slice::<Value>(body).unwrap_or_else(|_| json!({}))
}

fn headers_to_value(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            Value::String(value.to_str().unwrap_or("").to_string()),
        );
    }
    Value::Object(map)
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn audit_admin_action(state: &AppState, event: Value) {
    if let Err(err) = state.audit.append(&event) {
        tracing::warn!("audit append failed: {err}");
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "online" }))
}

async fn version(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "commit": state.commit.clone(),
        "renderedAt": now_iso()
    }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body = parse_body(&body);
    let user = body.get("user").and_then(Value::as_str).unwrap_or("");
    let pass = body.get("pass").and_then(Value::as_str).unwrap_or("");

    // Unconfigured credentials fail closed, and a bad pair never reveals
    // which field was wrong.
    let (Some(expected_user), Some(expected_pass)) =
        (state.admin.user.as_deref(), state.admin.pass.as_deref())
    else {
        return Err(ApiError::Unauthorized);
    };
    if user.is_empty() || user != expected_user || pass != expected_pass {
        return Err(ApiError::Unauthorized);
    }

    let token = auth::issue_session_token(&state.admin.session_secret).unwrap_or_default();
    Ok((
        [(header::SET_COOKIE, auth::session_set_cookie(&token))],
        Json(json!({ "ok": true })),
    ))
}

async fn logout() -> impl IntoResponse {
    // Idempotent: clearing an absent session is not an error.
    (
        [(header::SET_COOKIE, auth::session_clear_cookie())],
        Json(json!({ "ok": true })),
    )
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::SignedSession.authorize(&state, &headers)?;
    let config = state.config.get().await;
    let runtime = state.runtime.lock().await;
    Ok(Json(json!({
        "ok": true,
        "counters": runtime.counters.clone(),
        "lastChat": runtime.last_chat.clone(),
        "config": config
    })))
}

async fn get_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::SignedSession.authorize(&state, &headers)?;
    let config = state.config.get().await;
    Ok(Json(json!({ "ok": true, "config": config })))
}

async fn post_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::SignedSession.authorize(&state, &headers)?;
    let patch = parse_body(&body);
    let config = state.config.update(&patch).await;
    // Durability is best-effort: the in-memory update stands even if the
    // write fails.
    if let Err(err) = state.config.persist().await {
        tracing::warn!("config persist failed: {err}");
    }
    audit_admin_action(
        &state,
        json!({ "type": "config_update", "at": now_iso(), "config": config }),
    );
    Ok(Json(json!({ "ok": true, "config": config })))
}

async fn get_knowledge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::SignedSession.authorize(&state, &headers)?;
    let text = state.knowledge.get().await;
    Ok(Json(json!({ "ok": true, "text": text })))
}

async fn post_knowledge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::SignedSession.authorize(&state, &headers)?;
    let body = parse_body(&body);
    // Absent or non-string text becomes the empty string.
    let text = body
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let text = state.knowledge.set(text).await;
    if let Err(err) = state.knowledge.persist().await {
        tracing::warn!("knowledge persist failed: {err}");
    }
    audit_admin_action(
        &state,
        json!({ "type": "knowledge_update", "at": now_iso(), "bytes": text.len() }),
    );
    Ok(Json(json!({ "ok": true, "text": text })))
}

/// Provider callbacks always acknowledge with 200, whatever the payload
/// shape; the provider must never see a failure response. Never triggers an
/// outbound send.
async fn ingest_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let payload = parse_body(&body);

    {
        let mut runtime = state.runtime.lock().await;
        runtime.counters.received_webhooks += 1;
    }

    let event = json!({
        "receivedAt": now_iso(),
        "ip": client_ip(&headers),
        "headers": headers_to_value(&headers),
        "body": payload
    });
    if let Err(err) = state.audit.append(&event) {
        tracing::warn!("audit append failed: {err}");
    }

    // Identifying phone, in fixed priority order.
    let celular = coerce_string(payload.get("celular"))
        .or_else(|| coerce_string(payload.get("chat_number")))
        .or_else(|| coerce_string(payload.get("telefone")));

    match celular {
        Some(celular) => {
            // Strict replace: absent payload fields become null rather than
            // keeping stale values.
            let chat = LastChat {
                updated_at: now_iso(),
                celular,
                chat_id: coerce_string(payload.get("chat_id")),
                nome: coerce_string(payload.get("nome")),
                phone_id: coerce_string(payload.get("phone_id")),
                origem: coerce_string(payload.get("origem")),
                texto_mensagem: coerce_string(payload.get("texto_mensagem")),
            };
            tracing::info!("webhook from {} updated lastChat", chat.celular);
            let mut runtime = state.runtime.lock().await;
            runtime.last_chat = Some(chat);
        }
        None => {
            tracing::info!("webhook without identifying phone, lastChat unchanged");
        }
    }

    (StatusCode::OK, Json(json!({ "ok": true })))
}

async fn send_test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::StaticToken.authorize(&state, &headers)?;
    gateway::require_provider_config(&state.provider)?;

    let body = parse_body(&body);
    let chat_number = coerce_string(body.get("chat_number"))
        .ok_or_else(|| ApiError::Validation("chat_number is required".to_string()))?;
    let text = coerce_string(body.get("text"))
        .ok_or_else(|| ApiError::Validation("text is required".to_string()))?;
    let send_date = coerce_string(body.get("send_date"));

    let result = gateway::send_message(&state, &chat_number, &text, send_date.as_deref()).await?;
    audit_admin_action(
        &state,
        json!({ "type": "message_send", "at": now_iso(), "target": chat_number }),
    );
    Ok(Json(json!({ "ok": true, "result": result })))
}

async fn reply_last(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::StaticToken.authorize(&state, &headers)?;
    gateway::require_provider_config(&state.provider)?;

    let last_chat = {
        let runtime = state.runtime.lock().await;
        runtime.last_chat.clone()
    };
    let Some(last_chat) = last_chat else {
        return Err(ApiError::Validation(
            "no lastChat yet; send a message to the webhook first".to_string(),
        ));
    };

    let body = parse_body(&body);
    let text = coerce_string(body.get("text"))
        .ok_or_else(|| ApiError::Validation("text is required".to_string()))?;
    let send_date = coerce_string(body.get("send_date"));

    let result =
        gateway::send_message(&state, &last_chat.celular, &text, send_date.as_deref()).await?;
    audit_admin_action(
        &state,
        json!({ "type": "message_send", "at": now_iso(), "target": last_chat.celular.clone() }),
    );
    Ok(Json(json!({
        "ok": true,
        "target": last_chat.celular.clone(),
        "lastChat": last_chat,
        "result": result
    })))
}

async fn get_last_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    AdminGuard::StaticToken.authorize(&state, &headers)?;
    let runtime = state.runtime.lock().await;
    Ok(Json(json!({ "ok": true, "lastChat": runtime.last_chat.clone() })))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/stats", get(get_stats))
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/knowledge", get(get_knowledge).post(post_knowledge))
        .route("/webhook/chatguru", post(ingest_webhook))
        .route("/send-test", post(send_test))
        .route("/reply-last", post(reply_last))
        .route("/last-chat", get(get_last_chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
