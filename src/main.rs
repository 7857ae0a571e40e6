use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, Request, Response, StatusCode};
use opentelemetry::KeyValue;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{MakeSpan, OnResponse, TraceLayer},
};
use tracing::Span;

use crop_diagnosis::{
    AppState, Config,
    clients::{HttpDiseaseClassifier, HttpSpreadEstimator, OpenMeteoAggregator},
    db::{self, MemoryRecordStore, PgRecordStore, RecordStore},
    llm::{self, LlmClient, client::Fallback},
    pipeline::{DiagnosisPipeline, LlmReportGenerator, PromptTemplate, StagePolicies},
    routes,
    telemetry::{HTTP_REQUEST_DURATION, HTTP_REQUESTS_TOTAL, init_telemetry},
    uploads::LocalImageStore,
};

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Upper bound on a whole request. The diagnosis task itself is detached and
/// keeps running past it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let method = request.method().as_str();
        let uri = request.uri();
        let path = uri.path();

        let request_id = request
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        tracing::info_span!(
            "HTTP request",
            otel.name = %format!("{} {}", method, path),
            http.method = %method,
            http.route = %path,
            http.target = %uri,
            http.scheme = "http",
            http.flavor = ?request.version(),
            http.user_agent = request.headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
            http.request_id = %request_id,
            http.response.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        )
    }
}

#[derive(Clone)]
struct HttpOnResponse;

impl<B> OnResponse<B> for HttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status().as_u16();

        span.record("http.response.status_code", status as i64);

        if status >= 500 {
            span.record("otel.status_code", "ERROR");
        } else {
            span.record("otel.status_code", "OK");
        }

        let latency_ms = latency.as_secs_f64() * 1000.0;
        let status_class = format!("{}xx", status / 100);

        HTTP_REQUESTS_TOTAL.add(
            1,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class.clone()),
            ],
        );

        HTTP_REQUEST_DURATION.record(
            latency_ms,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class),
            ],
        );

        tracing::info!(
            http.response.status_code = status,
            latency_ms = latency_ms,
            "finished processing request"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let telemetry_guard = init_telemetry(&config)?;

    tracing::info!(
        port = config.port,
        environment = %config.environment,
        "Starting crop-diagnosis"
    );

    let store: Arc<dyn RecordStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;
            Arc::new(PgRecordStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory only");
            Arc::new(MemoryRecordStore::new())
        }
    };

    let llm_client = Arc::new(build_llm_client(&config)?);

    let prompt = match &config.report_prompt_path {
        Some(path) => PromptTemplate::default().with_report_file(Path::new(path))?,
        None => PromptTemplate::default(),
    };
    tracing::info!(prompt_version = %prompt.version, "Report prompt loaded");

    let upstream_timeout = Duration::from_secs(config.upstream_timeout_secs);
    let pipeline = DiagnosisPipeline {
        store: store.clone(),
        images: Arc::new(LocalImageStore::new(
            &config.upload_dir,
            &config.public_base_url,
        )),
        classifier: Arc::new(HttpDiseaseClassifier::new(
            &config.classifier_url,
            upstream_timeout,
        )),
        spread: Arc::new(HttpSpreadEstimator::new(
            &config.spread_estimator_url,
            upstream_timeout,
        )),
        weather: Arc::new(OpenMeteoAggregator::new(
            &config.weather_api_url,
            Duration::from_secs(config.weather_timeout_secs),
        )),
        reports: Arc::new(LlmReportGenerator::new(
            llm_client,
            config.llm_model.clone(),
            config.llm_temperature,
            config.llm_max_tokens,
            prompt,
        )),
        policies: StagePolicies::new(
            config.spread_failure_policy,
            config.weather_failure_policy,
            config.report_persist_failure_policy,
        ),
        user_id: config.default_user_id,
    };

    tracing::info!(
        store = store.backend(),
        spread_policy = %config.spread_failure_policy,
        weather_policy = %config.weather_failure_policy,
        report_persist_policy = %config.report_persist_failure_policy,
        "Diagnosis pipeline ready"
    );

    let port = config.port;
    let state = AppState {
        store,
        pipeline: Arc::new(pipeline),
        config: Arc::new(config),
    };

    let app = routes::create_router(state)
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(HttpMakeSpan)
                .on_response(HttpOnResponse),
        )
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    telemetry_guard.shutdown();

    Ok(())
}

fn build_llm_client(config: &Config) -> anyhow::Result<LlmClient> {
    let primary = llm::provider_from_name(&config.llm_provider, config).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown LLM_PROVIDER {:?}, expected groq|openai|ollama",
            config.llm_provider
        )
    })?;

    let fallback = match config.fallback_provider.as_str() {
        "none" | "" => None,
        name => {
            let provider = llm::provider_from_name(name, config).ok_or_else(|| {
                anyhow::anyhow!("unknown FALLBACK_PROVIDER {name:?}, expected groq|openai|ollama|none")
            })?;
            Some(Fallback {
                provider,
                model: config.fallback_model.clone(),
            })
        }
    };

    tracing::info!(
        primary_provider = %config.llm_provider,
        model = %config.llm_model,
        fallback_provider = %config.fallback_provider,
        "LLM client initialized"
    );

    Ok(LlmClient::new(primary, fallback))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
