use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};

use super::super::AppState;
use super::super::error::ApiResult;
use crate::core::linear::IngestReport;

pub const SIGNATURE_HEADER: &str = "linear-signature";

/// Raw-body ingest: the signature covers the exact bytes on the wire, so the
/// body must not pass through a JSON extractor first.
pub async fn linear_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IngestReport>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let report = state.ingest.handle(&body, signature).await?;
    Ok(Json(report))
}
