use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::{Deserialize, Serialize};

use labman_tasks::{render_chart, ChartSeries};

use crate::error::ApiError;
use crate::state::AppState;

/// Human-readable RFC 3339 rendering of a Unix timestamp, for clients
/// that want to display a date without doing the conversion themselves.
fn datestr(ts: f64) -> String {
    let secs = ts.floor() as i64;
    let nanos = ((ts - secs as f64) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Serialize)]
struct LoggedLastValue {
    name: String,
    value: f64,
    datestr: String,
}

pub async fn main_page(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let last_values = state.session.logged_last_values()?;
    let mut names: Vec<&String> = last_values.keys().collect();
    names.sort();

    let mut rows = String::new();
    for name in names {
        let sample = &last_values[name];
        rows.push_str(&format!(
            "<tr><td>{name}</td><td>{:.3}</td><td>{:.6}</td></tr>",
            sample.ts, sample.value
        ));
    }
    let body = format!(
        "<html><head><title>labman session</title></head><body>\
         <h1>labman session</h1>\
         <table border=\"1\" cellpadding=\"4\">\
         <tr><th>variable</th><th>timestamp</th><th>value</th></tr>{rows}</table>\
         </body></html>"
    );
    Ok(Html(body))
}

pub async fn logged_last_values(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let last_values = state.session.logged_last_values()?;
    let mut names: Vec<&String> = last_values.keys().collect();
    names.sort();
    let out: Vec<LoggedLastValue> = names
        .into_iter()
        .map(|name| {
            let sample = &last_values[name];
            LoggedLastValue {
                name: name.clone(),
                value: sample.value,
                datestr: datestr(sample.ts),
            }
        })
        .collect();
    Ok(Json(out))
}

pub async fn get_parameters(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let params = state.session.parameters()?;
    Ok(Json(params))
}

#[derive(Deserialize)]
pub struct DataFromTsRequest {
    name: String,
    last_ts: f64,
}

pub async fn data_from_ts(
    State(state): State<AppState>,
    Json(body): Json<DataFromTsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let samples = state
        .session
        .logged_data_from_timestamp(&body.name, body.last_ts)?;
    let out: Vec<[f64; 2]> = samples.into_iter().map(|s| [s.ts, s.value]).collect();
    Ok(Json(out))
}

#[derive(Serialize)]
struct CurrentTs {
    ts: f64,
}

pub async fn server_current_ts() -> impl IntoResponse {
    let now = chrono::Utc::now();
    let ts = now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1e9;
    Json(CurrentTs { ts })
}

pub async fn plot_figure(
    State(state): State<AppState>,
    Path(fignum): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let figures = state.session.figures()?;
    let figure = figures
        .into_iter()
        .find(|f| f.fignum == fignum)
        .ok_or_else(|| anyhow::anyhow!("no figure registered with number {fignum}"))?;

    let series: Vec<ChartSeries> = figure
        .variables
        .iter()
        .map(|name| {
            let points = state
                .session
                .store()
                .query_log(name)
                .unwrap_or_default()
                .into_iter()
                .map(|s| (s.ts, s.value))
                .collect();
            ChartSeries {
                name: name.clone(),
                points,
            }
        })
        .collect();

    let png = render_chart(&series, 640, 400, figure.ymin, figure.ymax)?;
    Ok(([(axum::http::header::CONTENT_TYPE, "image/png")], png))
}
