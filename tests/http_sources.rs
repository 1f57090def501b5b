//! Source adapters against a local HTTP server.
//!
//! An `axum` router serves the GEMINI fixtures, a WAF index page and a few
//! broken documents on an ephemeral port. The last test runs the full job
//! pipeline over the WAF into a SQLite database.

use std::sync::Arc;
use std::time::Duration;

use axum::response::{Html, Redirect};
use axum::routing::get;
use axum::Router;
use spatial_harvest::config::SourceConfig;
use spatial_harvest::connector_doc::DocAdapter;
use spatial_harvest::connector_waf::WafAdapter;
use spatial_harvest::http::HttpFetcher;
use spatial_harvest::ingest::Harvester;
use spatial_harvest::models::{JobStatus, ReportStatus};
use spatial_harvest::probe::NoServiceProbe;
use spatial_harvest::progress::NoProgress;
use spatial_harvest::reconcile::{ImportSettings, ReconciliationEngine};
use spatial_harvest::sqlite_store::SqliteStore;
use spatial_harvest::traits::SourceAdapter;
use spatial_harvest::{db, migrate, report};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DATASET1: &str = include_str!("fixtures/gemini2.1/dataset1.xml");

const WAF_INDEX: &str = r#"<html><head><title>Index of /waf</title></head><body>
<a href="?C=N;O=D">Name</a>
<a href="/">Parent Directory</a>
<a href="dataset1.xml">dataset1.xml</a>
<a href="missing.xml">missing.xml</a>
<a href="not-gemini.xml">not-gemini.xml</a>
<a href="sub/nested.xml">nested</a>
<a href="mailto:metadata@example.org">contact</a>
</body></html>"#;

async fn serve() -> String {
    let app = Router::new()
        .route("/waf/", get(|| async { Html(WAF_INDEX) }))
        .route("/waf/dataset1.xml", get(|| async { DATASET1 }))
        .route(
            "/waf/not-gemini.xml",
            get(|| async { "<html><body>Not metadata</body></html>" }),
        )
        .route("/moved", get(|| async { Redirect::permanent("/waf/") }))
        .route(
            "/empty/",
            get(|| async { Html("<html><body><a href=\"/elsewhere/a.xml\">a</a></body></html>") }),
        )
        .route("/doc.xml", get(|| async { DATASET1 }))
        .route("/not-xml.txt", get(|| async { "plain <text" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn http() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5), "spatial-harvest-tests").unwrap()
}

fn source(url: String) -> SourceConfig {
    SourceConfig {
        url,
        owner: Some("snh".to_string()),
        active: true,
        validator_profiles: None,
        skip_responsible_party: None,
    }
}

#[tokio::test]
async fn doc_adapter_gathers_one_record_with_content() {
    let base = serve().await;
    let url = format!("{}/doc.xml", base);
    let adapter = DocAdapter::new("parks".to_string(), source(url.clone()), http());

    let gathered = adapter.gather().await.unwrap();
    assert!(gathered.errors.is_empty());
    assert_eq!(gathered.records.len(), 1);
    let record = &gathered.records[0];
    assert_eq!(record.guid, "test-dataset-1");
    assert_eq!(record.source_reference, url);
    assert!(record.content.as_deref().unwrap().contains("Country Parks (Scotland)"));
}

#[tokio::test]
async fn doc_adapter_reports_unreadable_documents() {
    let base = serve().await;

    let bad = DocAdapter::new(
        "bad".to_string(),
        source(format!("{}/not-xml.txt", base)),
        http(),
    );
    let err = bad.gather().await.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Error parsing the document. Is this a valid Gemini document?"));

    let missing = DocAdapter::new(
        "missing".to_string(),
        source(format!("{}/nowhere.xml", base)),
        http(),
    );
    let err = missing.gather().await.unwrap_err();
    assert!(err.to_string().starts_with("Unable to get document:"));
    assert!(err.to_string().contains("Status: 404"));
}

#[tokio::test]
async fn waf_adapter_follows_same_directory_links() {
    let base = serve().await;
    let adapter = WafAdapter::new("rivers".to_string(), source(format!("{}/waf/", base)), http());

    let gathered = adapter.gather().await.unwrap();
    assert_eq!(gathered.records.len(), 1);
    assert_eq!(gathered.records[0].guid, "test-dataset-1");
    assert_eq!(
        gathered.records[0].source_reference,
        format!("{}/waf/dataset1.xml", base)
    );

    assert_eq!(gathered.errors.len(), 2);
    assert!(gathered.errors[0].starts_with("Unable to get WAF link:"));
    assert!(gathered.errors[0].contains("missing.xml"));
    assert!(gathered.errors[1].ends_with(&format!("({}/waf/not-gemini.xml)", base)));
}

#[tokio::test]
async fn waf_links_resolve_against_redirected_index() {
    let base = serve().await;
    let adapter = WafAdapter::new("moved".to_string(), source(format!("{}/moved", base)), http());

    let gathered = adapter.gather().await.unwrap();
    assert_eq!(gathered.records.len(), 1);
    assert_eq!(
        gathered.records[0].source_reference,
        format!("{}/waf/dataset1.xml", base)
    );
}

#[tokio::test]
async fn waf_without_usable_links_is_a_gather_error() {
    let base = serve().await;
    let adapter = WafAdapter::new("empty".to_string(), source(format!("{}/empty/", base)), http());

    let err = adapter.gather().await.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Couldn't find any links to metadata files."));
}

#[tokio::test]
async fn waf_harvest_into_sqlite() {
    let base = serve().await;
    let tmp = TempDir::new().unwrap();
    let pool = db::open(&tmp.path().join("harvest.sqlite")).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let engine = ReconciliationEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(NoServiceProbe),
        ImportSettings {
            validator_profiles: vec!["iso19139".to_string(), "gemini2".to_string()],
            ..Default::default()
        },
    );
    let harvester = Harvester::new(Arc::new(engine), Arc::new(NoProgress));
    let adapter = WafAdapter::new("rivers".to_string(), source(format!("{}/waf/", base)), http());
    let cancel = CancellationToken::new();

    let first = harvester.run_job(&adapter, false, &cancel).await.unwrap();
    assert_eq!(first.status, JobStatus::Finished);
    assert_eq!(first.gathered, 1);
    assert_eq!(first.added, 1);
    assert_eq!(first.gather_errors, 2);

    let second = harvester.run_job(&adapter, false, &cancel).await.unwrap();
    assert_eq!(second.not_modified, 1);

    let job = report::job_report(store.as_ref(), &second.job_id).await.unwrap();
    assert_eq!(job.gather_errors.len(), 2);
    assert_eq!(job.items.len(), 1);
    assert_eq!(
        job.items[0].attempt.report_status,
        Some(ReportStatus::NotModified)
    );

    let history = report::guid_history(store.as_ref(), "test-dataset-1")
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|i| i.attempt.current).count(), 1);

    pool.close().await;
}
