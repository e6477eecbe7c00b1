use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
};
use metrics_util::debugging::DebuggingRecorder;
use scorta::cache::{
    AcceptAll, CacheConfig, CacheProvider, FilterOptions, FilterState, NoConditional, NullOracle,
    factory, response_cache_filter,
};
use tower::ServiceExt;

fn css_response(status: StatusCode, body: &'static str) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "text/css")
        .body(Body::from(body))
        .expect("response builds")
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Backend fallback: an unreachable remote degrades to the local store.
    let fallback_config = CacheConfig {
        provider: CacheProvider::Redis,
        hostname: Some("127.0.0.1".to_string()),
        port: Some(1),
        ..Default::default()
    };
    let fallback = factory::build(&fallback_config).await;
    assert_eq!(fallback.provider(), CacheProvider::Memory);

    // Outcome counters through the middleware path.
    let state = FilterState::new(
        FilterOptions::default(),
        Arc::new(AcceptAll),
        Arc::new(NullOracle),
        Arc::new(NoConditional),
    )
    .await
    .expect("filter state builds");

    let app = Router::new()
        .route(
            "/missing.css",
            get(|| async { css_response(StatusCode::NOT_FOUND, "") }),
        )
        .fallback(get(|| async { css_response(StatusCode::OK, "body{}") }))
        .layer(middleware::from_fn_with_state(state, response_cache_filter));

    for uri in [
        "/site.css",
        "/site.css",
        "/site.css?_dbg_",
        "/missing.css",
    ] {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let _ = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
    }

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "scorta_cache_found_total",
        "scorta_cache_not_found_total",
        "scorta_cache_added_total",
        "scorta_cache_skipped_total",
        "scorta_cache_backend_fallback_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
