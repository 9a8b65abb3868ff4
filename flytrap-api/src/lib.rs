//! Read-only HTTP API over the envelope store.
//!
//! Three endpoints, all returning JSON arrays of envelope records:
//! `/envelopes/today`, `/envelopes/{day}` (`YYYYMMDD`), and
//! `/envelopes?from=YYYYMMDD&to=YYYYMMDD` (inclusive). The honeypot's
//! internals never leak: store failures map to a terse 500.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use flytrap_common::{envelope::Envelope, Signal};
use flytrap_store::{service::parse_day, EnvelopeStore, StoreError};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    store: Arc<EnvelopeStore>,
}

type ApiResult = Result<Json<Vec<Envelope>>, (StatusCode, String)>;

fn store_failure(err: StoreError) -> (StatusCode, String) {
    error!("API query failed: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal error".to_string(),
    )
}

async fn today(State(state): State<AppState>) -> ApiResult {
    state
        .store
        .view_today_envelopes()
        .map(Json)
        .map_err(store_failure)
}

async fn by_day(State(state): State<AppState>, Path(day): Path<String>) -> ApiResult {
    let day = parse_day(&day).map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    state
        .store
        .view_envelopes_for(day)
        .map(Json)
        .map_err(store_failure)
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    from: String,
    to: String,
}

async fn by_range(State(state): State<AppState>, Query(range): Query<RangeParams>) -> ApiResult {
    let from = parse_day(&range.from).map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    let to = parse_day(&range.to).map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    match state.store.view_envelopes_between(from, to) {
        Ok(envelopes) => Ok(Json(envelopes)),
        Err(err @ StoreError::InvalidDay(_)) => Err((StatusCode::BAD_REQUEST, err.to_string())),
        Err(err) => Err(store_failure(err)),
    }
}

pub fn router(store: Arc<EnvelopeStore>) -> Router {
    Router::new()
        .route("/envelopes", get(by_range))
        .route("/envelopes/today", get(today))
        .route("/envelopes/{day}", get(by_day))
        .with_state(AppState { store })
}

/// Serve the API until the shutdown signal arrives.
///
/// # Errors
/// If the listener cannot bind or the server fails.
pub async fn serve(
    store: Arc<EnvelopeStore>,
    bind_address: String,
    mut shutdown: broadcast::Receiver<Signal>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("HTTP API listening on {bind_address}");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
    };
    use chrono::{TimeZone, Utc};
    use flytrap_common::{address::parse_mailbox, envelope::Envelope};
    use flytrap_store::EnvelopeStore;

    use super::{by_day, by_range, AppState, RangeParams};

    fn state_with_envelopes() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvelopeStore::open(dir.path().join("mail.db")).unwrap();

        for day in [8, 9, 10] {
            let opened = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
            let mut envelope = Envelope::new("203.0.113.7:49152", opened);
            envelope.set_sender(parse_mailbox("<a@b.example>").unwrap(), false);
            envelope.add_recipient(parse_mailbox("<c@d.example>").unwrap());
            envelope.seal(b"hello\r\n".to_vec());
            store.store_envelope(&envelope).unwrap();
        }

        (
            AppState {
                store: Arc::new(store),
            },
            dir,
        )
    }

    #[tokio::test]
    async fn by_day_returns_one_bucket() {
        let (state, _dir) = state_with_envelopes();

        let Ok(json) = by_day(State(state), Path("20240309".to_string())).await else {
            panic!("expected a JSON reply");
        };
        assert_eq!(json.0.len(), 1);
        assert_eq!(json.0[0].message(), b"hello\r\n");
    }

    #[tokio::test]
    async fn by_day_rejects_malformed_days() {
        let (state, _dir) = state_with_envelopes();

        let err = by_day(State(state), Path("2024-03-09".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn range_is_inclusive() {
        let (state, _dir) = state_with_envelopes();

        let Ok(json) = by_range(
            State(state),
            Query(RangeParams {
                from: "20240308".to_string(),
                to: "20240310".to_string(),
            }),
        )
        .await
        else {
            panic!("expected a JSON reply");
        };
        assert_eq!(json.0.len(), 3);
    }

    #[tokio::test]
    async fn inverted_range_is_a_client_error() {
        let (state, _dir) = state_with_envelopes();

        let err = by_range(
            State(state),
            Query(RangeParams {
                from: "20240310".to_string(),
                to: "20240308".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
