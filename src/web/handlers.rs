//! HTTP request handlers.

use super::AppState;
use crate::db::Target;
use crate::scheduler::{DowntimeRecord, MonitorFilter, RegistryError};

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{Local, SecondsFormat};
use serde::Deserialize;

// ============================================================================
// Errors
// ============================================================================

fn registry_error(e: RegistryError) -> Response {
    let status = match &e {
        RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::Duplicate(_) => StatusCode::CONFLICT,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::Store(_) => {
            tracing::error!("Store failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string()).into_response()
}

// ============================================================================
// API: Monitors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetRequest {
    /// URL the record is currently stored under.
    pub original_url: String,
    #[serde(flatten)]
    pub target: Target,
}

pub async fn handle_list_monitors(
    State(state): State<AppState>,
    Query(filter): Query<MonitorFilter>,
) -> impl IntoResponse {
    Json(state.registry.snapshots(&filter).await)
}

pub async fn handle_create_monitor(
    State(state): State<AppState>,
    Json(target): Json<Target>,
) -> Response {
    match state.registry.add(target).await {
        Ok(monitor) => (StatusCode::CREATED, Json(monitor.snapshot(chrono::Utc::now()))).into_response(),
        Err(e) => registry_error(e),
    }
}

pub async fn handle_update_monitor(
    State(state): State<AppState>,
    Json(req): Json<UpdateTargetRequest>,
) -> Response {
    match state.registry.update(&req.original_url, req.target).await {
        Ok(monitor) => Json(monitor.snapshot(chrono::Utc::now())).into_response(),
        Err(e) => registry_error(e),
    }
}

pub async fn handle_delete_monitor(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Response {
    match state.registry.remove(&query.url).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => registry_error(e),
    }
}

pub async fn handle_start_monitor(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Response {
    match state.registry.start(&query.url).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => registry_error(e),
    }
}

pub async fn handle_stop_monitor(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Response {
    match state.registry.stop(&query.url).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => registry_error(e),
    }
}

pub async fn handle_ping_monitor(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Response {
    match state.registry.ping(&query.url).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => registry_error(e),
    }
}

pub async fn handle_reload(State(state): State<AppState>) -> Response {
    match state.registry.reload().await {
        Ok(count) => Json(serde_json::json!({ "loaded": count })).into_response(),
        Err(e) => registry_error(e),
    }
}

// ============================================================================
// API: Aggregates
// ============================================================================

pub async fn handle_summary(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.summary.borrow().clone();
    Json(summary)
}

pub async fn handle_facets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.facets().await)
}

pub async fn handle_downtimes(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.downtimes().await)
}

pub async fn handle_downtimes_csv(State(state): State<AppState>) -> impl IntoResponse {
    let body = downtimes_csv(&state.registry.downtimes().await);
    let disposition = format!(
        "attachment; filename=\"downtimes_{}.csv\"",
        Local::now().format("%Y%m%d_%H%M")
    );

    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
}

// ============================================================================
// Helpers
// ============================================================================

/// Render downtime records as CSV, one row per interval.
pub fn downtimes_csv(records: &[DowntimeRecord]) -> String {
    let mut out = String::from("Name,Url,StartUtc,EndUtc,DurationSeconds,Open\n");

    for r in records {
        let d = &r.interval;
        let end = d
            .end_utc
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            escape_csv(&d.name),
            escape_csv(&d.url),
            d.start_utc.to_rfc3339_opts(SecondsFormat::Secs, true),
            end,
            r.duration_seconds,
            r.open,
        ));
    }

    out
}

fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DowntimeInterval;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    #[test]
    fn test_downtimes_csv() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let closed = DowntimeInterval {
            name: "Shop, EU".to_string(),
            url: "https://shop.example".to_string(),
            start_utc: start,
            end_utc: Some(start + ChronoDuration::seconds(90)),
        };
        let open = DowntimeInterval {
            name: "Blog".to_string(),
            url: "https://blog.example".to_string(),
            start_utc: start,
            end_utc: None,
        };
        let now = start + ChronoDuration::seconds(30);

        let csv = downtimes_csv(&[DowntimeRecord::new(closed, now), DowntimeRecord::new(open, now)]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Name,Url,StartUtc,EndUtc,DurationSeconds,Open");
        assert_eq!(
            lines[1],
            "\"Shop, EU\",https://shop.example,2024-05-01T12:00:00Z,2024-05-01T12:01:30Z,90,false"
        );
        assert_eq!(lines[2], "Blog,https://blog.example,2024-05-01T12:00:00Z,,30,true");
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("say \"hi\", ok"), "\"say \"\"hi\"\", ok\"");
        assert_eq!(escape_csv("line\nbreak"), "\"line\nbreak\"");
        assert_eq!(escape_csv("cr\rhere"), "\"cr\rhere\"");
    }
}
