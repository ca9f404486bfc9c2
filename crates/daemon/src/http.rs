use actionlog_core::api::{PivotQuery, SnapshotQuery, SubmitResponse};
use actionlog_core::ActionRecord;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use crate::buffer::SubmitError;
use crate::queries::LookupError;
use crate::supervisor::{Status, Supervisor};

#[derive(Clone)]
pub struct AppState {
    sup: Supervisor,
}

pub fn router(sup: Supervisor) -> Router {
    let state = AppState { sup };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/actions", post(submit_actions))
        .route("/v1/actions/first", get(first_action))
        .route("/v1/actions/last", get(last_action))
        .route("/v1/actions/next", get(next_action))
        .route("/v1/actions/previous", get(previous_action))
        .with_state(state)
}

async fn healthz(State(st): State<AppState>) -> Json<Status> {
    Json(st.sup.status())
}

async fn submit_actions(
    State(st): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), SubmitError> {
    let Json(batch) = body.map_err(|rejection| {
        tracing::warn!(error = %rejection, "unreadable action batch");
        SubmitError::InvalidInput
    })?;
    st.sup.submit(batch).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            ok: true,
            message: None,
        }),
    ))
}

async fn first_action(
    State(st): State<AppState>,
    Query(q): Query<SnapshotQuery>,
) -> Result<Json<Option<ActionRecord>>, AppError> {
    Ok(Json(st.sup.get_first(&q.task_id, &q.user_id).await?))
}

async fn last_action(
    State(st): State<AppState>,
    Query(q): Query<SnapshotQuery>,
) -> Result<Json<Option<ActionRecord>>, AppError> {
    Ok(Json(st.sup.get_last(&q.task_id, &q.user_id).await?))
}

async fn next_action(
    State(st): State<AppState>,
    Query(q): Query<PivotQuery>,
) -> Result<Json<Option<ActionRecord>>, AppError> {
    Ok(Json(st.sup.get_next(&q.task_id, &q.user_id, q.timestamp).await?))
}

async fn previous_action(
    State(st): State<AppState>,
    Query(q): Query<PivotQuery>,
) -> Result<Json<Option<ActionRecord>>, AppError> {
    Ok(Json(
        st.sup
            .get_previous(&q.task_id, &q.user_id, q.timestamp)
            .await?,
    ))
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let code = match self {
            SubmitError::InvalidInput => StatusCode::BAD_REQUEST,
            SubmitError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = SubmitResponse {
            ok: false,
            message: Some(self.to_string()),
        };
        (code, Json(body)).into_response()
    }
}

#[derive(Debug)]
pub struct AppError(LookupError);

impl From<LookupError> for AppError {
    fn from(value: LookupError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            LookupError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            LookupError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %self.0, "lookup failed");
        let body = Json(serde_json::json!({
            "error": self.0.to_string()
        }));
        (code, body).into_response()
    }
}
