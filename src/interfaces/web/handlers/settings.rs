use axum::{Json, extract::State};

use super::super::AppState;
use super::super::error::ApiResult;
use crate::core::lifecycle::SleepSchedule;

pub async fn get_sleep_schedule(State(state): State<AppState>) -> Json<SleepSchedule> {
    Json(state.lifecycle.sleep_schedule())
}

pub async fn put_sleep_schedule(
    State(state): State<AppState>,
    Json(schedule): Json<SleepSchedule>,
) -> ApiResult<Json<SleepSchedule>> {
    Ok(Json(state.lifecycle.set_sleep_schedule(schedule)?))
}
