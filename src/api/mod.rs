use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::{
    BenchmarkContext, MAX_SUPPORTED_AGE, PlanAnalysis, PlanInput, SweepResult, YearRow,
    analyze_retirement_plan, check_benchmark_return, sweep_work_end_ages,
};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct ProjectionRequest {
    #[serde(flatten)]
    plan: PlanInput,
    #[serde(default)]
    benchmark_real_return: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SweepRequest {
    #[serde(flatten)]
    plan: PlanInput,
    #[serde(default)]
    from_age: Option<u32>,
    #[serde(default)]
    to_age: Option<u32>,
    #[serde(default)]
    benchmark_real_return: Option<f64>,
}

/// Rows plus their analysis, as returned by `/api/projection` and the CLI's
/// `--json` output.
#[derive(Debug, Serialize)]
pub struct ProjectionResponse {
    pub rows: Vec<YearRow>,
    pub analysis: PlanAnalysis,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Projects `plan` and analyzes it against its own target age.
pub fn build_projection_response(
    plan: &PlanInput,
    benchmark_real_return: Option<f64>,
) -> Result<ProjectionResponse> {
    check_benchmark_return(benchmark_real_return)?;
    let projection = plan.project()?;
    let benchmark = benchmark_real_return.map(|r| {
        BenchmarkContext::new(
            &plan.accounts,
            plan.profile.current_age,
            plan.profile.work_end_age,
        )
        .with_real_return(r)
    });
    let analysis =
        analyze_retirement_plan(&projection, plan.profile.target_age, benchmark.as_ref());

    Ok(ProjectionResponse {
        rows: projection.rows,
        analysis,
    })
}

fn build_sweep_response(request: &SweepRequest) -> Result<SweepResult> {
    let from_age = request.from_age.unwrap_or(request.plan.profile.current_age);
    let to_age = request.to_age.unwrap_or(request.plan.profile.target_age);
    if to_age < from_age {
        return Err(Error::invalid("to_age", "must be >= from_age"));
    }
    if to_age > MAX_SUPPORTED_AGE {
        return Err(Error::invalid("to_age", format!("must be at most {MAX_SUPPORTED_AGE}")));
    }
    sweep_work_end_ages(
        &request.plan,
        from_age..=to_age,
        request.benchmark_real_return,
    )
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/projection", post(projection_handler))
        .route("/api/sweep", post(sweep_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("retirement planner API listening on http://{addr}");
    info!("local access: http://127.0.0.1:{port}/health");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn projection_handler(
    payload: std::result::Result<Json<ProjectionRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejected(rejection),
    };
    debug!(accounts = request.plan.accounts.len(), "projection request");
    run_blocking(move || build_projection_response(&request.plan, request.benchmark_real_return))
        .await
}

async fn sweep_handler(
    payload: std::result::Result<Json<SweepRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejected(rejection),
    };
    debug!(
        from_age = ?request.from_age,
        to_age = ?request.to_age,
        "sweep request"
    );
    run_blocking(move || build_sweep_response(&request)).await
}

/// Runs the computation off the async worker threads and maps its outcome to
/// a JSON response.
async fn run_blocking<T, F>(work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            warn!("computation task failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Computation failed")
        }
    }
}

fn rejected(rejection: JsonRejection) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        &format!("Invalid JSON payload: {}", rejection.body_text()),
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn projection_request_from_json(json: &str) -> Result<ProjectionRequest> {
    Ok(serde_json::from_str::<ProjectionRequest>(json)?)
}
