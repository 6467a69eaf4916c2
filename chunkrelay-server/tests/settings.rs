use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use chunkrelay_core::RelayConfig;
use chunkrelay_server::settings::{
    apply_defaults, BlobBackend, PipelineBackend, ResultsBackend, ENV_PREFIX,
};
use chunkrelay_server::{build, Settings};
use http_body_util::BodyExt;
use tower::ServiceExt;

fn config_from(vars: &[(&str, &str)]) -> RelayConfig {
    let mut config = RelayConfig::new();
    config.merge_env(
        ENV_PREFIX,
        vars.iter().map(|(k, v)| (k.to_string(), v.to_string())),
    );
    apply_defaults(&mut config);
    config
}

#[test]
fn defaults_run_fully_in_memory() -> anyhow::Result<()> {
    let settings = Settings::from_config(&config_from(&[]).snapshot())?;

    assert_eq!(settings.addr(), "127.0.0.1:3036");
    assert_eq!(settings.blob.upload_rules.block_digits, 8);
    assert_eq!(settings.blob.session_ttl, Duration::from_secs(86_400));
    assert_eq!(settings.sweep_interval, Duration::from_secs(300));
    assert_eq!(settings.max_items_per_page, 100);
    assert!(matches!(settings.blob_backend, BlobBackend::Memory));
    assert!(matches!(settings.pipeline_backend, PipelineBackend::Memory));
    assert!(matches!(settings.results_backend, ResultsBackend::Memory));
    assert!(settings.auth.is_none());
    Ok(())
}

#[test]
fn environment_overrides_defaults() -> anyhow::Result<()> {
    let config = config_from(&[
        ("CHUNKRELAY__HTTP__PORT", "8080"),
        ("CHUNKRELAY__BLOB__BACKEND", "s3"),
        ("CHUNKRELAY__BLOB__BUCKET", "uploaded"),
        ("CHUNKRELAY__BLOB__ENDPOINT", "http://localhost:9000"),
        ("CHUNKRELAY__PIPELINE__BACKEND", "http"),
        ("CHUNKRELAY__PIPELINE__BASE_URL", "https://engine.test/"),
        ("CHUNKRELAY__AUTH__TOKEN_URL", "https://login.test/token"),
        ("CHUNKRELAY__AUTH__CLIENT_ID", "relay"),
        ("CHUNKRELAY__AUTH__CLIENT_SECRET", "s3cret"),
        ("CHUNKRELAY__AUTH__SCOPE", "api://engine/.default other"),
        ("UNRELATED", "ignored"),
    ]);

    let settings = Settings::from_config(&config.snapshot())?;

    assert_eq!(settings.port, 8080);
    match &settings.blob_backend {
        BlobBackend::S3(s3) => {
            assert_eq!(s3.bucket, "uploaded");
            assert_eq!(s3.region, "us-east-1");
            assert_eq!(s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
        }
        other => panic!("expected s3 backend, got {other:?}"),
    }
    match &settings.pipeline_backend {
        PipelineBackend::Http(engine) => assert_eq!(engine.base_url, "https://engine.test/"),
        other => panic!("expected http engine, got {other:?}"),
    }
    let auth = settings.auth.expect("auth configured");
    assert_eq!(auth.scopes, vec!["api://engine/.default", "other"]);
    Ok(())
}

#[test]
fn invalid_settings_are_rejected() {
    for vars in [
        vec![("CHUNKRELAY__BLOB__BACKEND", "ftp")],
        vec![("CHUNKRELAY__HTTP__PORT", "eighty")],
        vec![("CHUNKRELAY__UPLOAD__SWEEP_INTERVAL_SECS", "0")],
        vec![("CHUNKRELAY__RESULTS__MAX_ITEMS_PER_PAGE", "0")],
        vec![("CHUNKRELAY__BLOB__BACKEND", "s3")],
        vec![
            ("CHUNKRELAY__RESULTS__BACKEND", "http"),
            ("CHUNKRELAY__RESULTS__BASE_URL", "https://results.test/"),
        ],
    ] {
        let config = config_from(&vars);
        assert!(
            Settings::from_config(&config.snapshot()).is_err(),
            "expected {vars:?} to be rejected"
        );
    }
}

#[tokio::test]
async fn bad_block_digits_fail_the_build() -> anyhow::Result<()> {
    let config = config_from(&[("CHUNKRELAY__UPLOAD__BLOCK_DIGITS", "0")]);
    let settings = Settings::from_config(&config.snapshot())?;

    assert!(build(&settings).await.is_err());
    Ok(())
}

#[tokio::test]
async fn memory_build_serves_health() -> anyhow::Result<()> {
    let settings = Settings::from_config(&config_from(&[]).snapshot())?;
    let app = build(&settings).await?;

    let res = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(res.status().as_u16(), 200);
    let bytes = res.into_body().collect().await?.to_bytes();
    assert_eq!(&bytes[..], b"ok");
    Ok(())
}
