//! Client and dataset operations against a mock API.

mod common;

use common::*;
use serde_json::json;
use visual_layer::{EntityType, IssueType, Query, SearchOperator, SemanticRelevance};
use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test(flavor = "multi_thread")]
async fn lists_datasets_with_selected_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api("/datasets")))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "d1", "display_name": "pets", "status": "READY", "n_images": 3, "secret_field": 1},
            {"id": "d2", "status": "INDEXING"}
        ])))
        .mount(&server)
        .await;

    let uri = server.uri();
    let datasets = tokio::task::spawn_blocking(move || client(&uri).list_datasets().unwrap())
        .await
        .unwrap();

    assert_eq!(datasets.len(), 2);
    assert_eq!(datasets[0].display_name.as_deref(), Some("pets"));
    assert_eq!(datasets[0].n_images, Some(3));
    assert_eq!(datasets[1].status.as_deref(), Some("INDEXING"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_error_is_actionable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api("/healthcheck")))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})))
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || client(&uri).healthcheck().unwrap_err().to_string())
        .await
        .unwrap();
    assert!(err.contains("authentication failed (HTTP 401)"), "{err}");
    assert!(err.contains("Invalid token"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_dataset_is_rejected_up_front() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api("/dataset/nope")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not Found"})))
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || client(&uri).dataset("nope").unwrap_err().to_string())
        .await
        .unwrap();
    assert!(err.contains("Dataset 'nope' does not exist"), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn creates_dataset_from_s3() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api("/dataset")))
        .and(body_string_contains("dataset_name=pets"))
        .and(body_string_contains("bucket_path=s3%3A%2F%2Fbucket%2Fimages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new-1"})))
        .mount(&server)
        .await;

    let uri = server.uri();
    let id = tokio::task::spawn_blocking(move || {
        client(&uri)
            .create_dataset_from_s3("s3://bucket/images", "pets", None)
            .unwrap()
            .id()
            .to_string()
    })
    .await
    .unwrap();
    assert_eq!(id, "new-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn creation_error_status_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api("/dataset")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "error", "message": "bucket not reachable"})),
        )
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        client(&uri)
            .create_dataset_from_s3("s3://bucket", "pets", Some("default"))
            .unwrap_err()
            .to_string()
    })
    .await
    .unwrap();
    assert!(err.contains("bucket not reachable"));
}

#[tokio::test(flavor = "multi_thread")]
async fn creates_dataset_from_archive_and_uploads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(api("/dataset")))
        .and(body_string_contains("uploaded_filename=images.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new-2"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api("/dataset/new-2/upload")))
        .and(body_string_contains("filename=\"images.zip\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("images.zip");
    std::fs::write(&archive, b"PK\x05\x06").unwrap();

    let uri = server.uri();
    let id = tokio::task::spawn_blocking(move || {
        client(&uri)
            .create_dataset_from_archive(&archive, "pets", None)
            .unwrap()
            .id()
            .to_string()
    })
    .await
    .unwrap();
    assert_eq!(id, "new-2");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_archive_is_an_argument_error() {
    let err = tokio::task::spawn_blocking(|| {
        client("http://127.0.0.1:9")
            .create_dataset_from_archive(std::path::Path::new("/no/such.zip"), "pets", None)
            .unwrap_err()
            .to_string()
    })
    .await
    .unwrap();
    assert!(err.contains("Zip file not found"));
}

#[tokio::test(flavor = "multi_thread")]
async fn export_table_drops_metadata_and_requires_ready() {
    let server = MockServer::start().await;
    mount_dataset(&server, "READY").await;
    Mock::given(method("GET"))
        .and(path(api(&format!("/dataset/{DATASET}/export"))))
        .and(query_param("export_format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_body(vec![
            item("m1", &["cat"]),
            item("m2", &["dog"]),
        ])))
        .mount(&server)
        .await;

    let uri = server.uri();
    let rows = tokio::task::spawn_blocking(move || dataset(&uri).export_table().unwrap())
        .await
        .unwrap();
    assert_eq!(rows.media_ids(), ["m1", "m2"]);
    assert_eq!(rows.records()[0].image_labels, "");
    assert_eq!(rows.records()[0].file_name.as_deref(), Some("m1.jpg"));
}

#[tokio::test(flavor = "multi_thread")]
async fn not_ready_dataset_exports_nothing() {
    let server = MockServer::start().await;
    mount_dataset(&server, "INDEXING").await;

    let uri = server.uri();
    let (table, export_err) = tokio::task::spawn_blocking(move || {
        let ds = dataset(&uri);
        (ds.export_table().unwrap(), ds.export().unwrap_err().to_string())
    })
    .await
    .unwrap();
    assert!(table.is_empty());
    assert!(export_err.contains("Current status: INDEXING"));
}

#[tokio::test(flavor = "multi_thread")]
async fn negative_label_search_subtracts_matches() {
    let server = MockServer::start().await;
    mount_dataset(&server, "READY").await;
    mount_features(&server, true).await;
    Mock::given(method("GET"))
        .and(path(api(&format!("/dataset/{DATASET}/export"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_body(vec![
            item("m1", &["cat"]),
            item("m2", &["dog"]),
            item("m3", &["bird"]),
        ])))
        .mount(&server)
        .await;
    let uri = mount_download(&server, "t1.json", export_body(vec![item("m1", &["cat"])])).await;
    Mock::given(method("GET"))
        .and(path(api(&format!("/dataset/{DATASET}/export_context_async"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t1", "status": "COMPLETED", "download_uri": uri
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let rows = tokio::task::spawn_blocking(move || {
        dataset(&uri)
            .search_by_labels(["cat"], EntityType::Images, SearchOperator::IsNot)
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(rows.media_ids(), ["m2", "m3"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_feature_skips_the_search() {
    let server = MockServer::start().await;
    mount_dataset(&server, "READY").await;
    mount_features(&server, false).await;

    let uri = server.uri();
    let (labels, semantic) = tokio::task::spawn_blocking(move || {
        let ds = dataset(&uri);
        (
            ds.search_by_labels(["cat"], EntityType::Images, SearchOperator::IsOneOf)
                .unwrap(),
            ds.search_by_semantic("a cat", EntityType::Images, SemanticRelevance::High)
                .unwrap(),
        )
    })
    .await
    .unwrap();
    assert!(labels.is_empty());
    assert!(semantic.is_empty());
    let submits = requests_to(&server, &api(&format!("/dataset/{DATASET}/export_context_async"))).await;
    assert!(submits.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_arguments_fail_immediately() {
    let server = MockServer::start().await;
    mount_dataset(&server, "READY").await;

    let uri = server.uri();
    let errors = tokio::task::spawn_blocking(move || {
        let ds = dataset(&uri);
        vec![
            ds.search_by_issues(&[], EntityType::Images, SearchOperator::Is, 0.8, 1.0)
                .unwrap_err()
                .to_string(),
            ds.search_by_issues(&[IssueType::Blur], EntityType::Images, SearchOperator::Is, 0.9, 0.1)
                .unwrap_err()
                .to_string(),
            ds.search_by_semantic("  ", EntityType::Images, SemanticRelevance::Medium)
                .unwrap_err()
                .to_string(),
            ds.search_by_visual_similarity(&["/no/such/image.jpg"], EntityType::Images, SearchOperator::IsOneOf, 0.0)
                .unwrap_err()
                .to_string(),
            ds.jobs()
                .submit(Vec::new(), EntityType::Images)
                .unwrap_err()
                .to_string(),
        ]
    })
    .await
    .unwrap();

    assert!(errors[0].contains("issue_type must be provided"));
    assert!(errors[1].contains("invalid confidence range"));
    assert!(errors[2].contains("non-empty string"));
    assert!(errors[3].contains("Image file not found"));
    assert!(errors[4].contains("at least one filter"));
}

#[tokio::test(flavor = "multi_thread")]
async fn issue_one_of_runs_one_job_per_type() {
    let server = MockServer::start().await;
    mount_dataset(&server, "READY").await;
    let uri = mount_download(
        &server,
        "t.json",
        export_body(vec![item("m1", &["cat"]), item("m2", &["dog"])]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(api(&format!("/dataset/{DATASET}/export_context_async"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t", "status": "COMPLETED", "download_uri": uri
        })))
        .expect(2)
        .mount(&server)
        .await;

    let uri = server.uri();
    let rows = tokio::task::spawn_blocking(move || {
        dataset(&uri)
            .search_by_issues(
                &[IssueType::Blur, IssueType::Dark],
                EntityType::Images,
                SearchOperator::IsOneOf,
                0.5,
                1.0,
            )
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(rows.media_ids(), ["m1", "m2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_query_returns_full_export() {
    let server = MockServer::start().await;
    mount_dataset(&server, "READY").await;
    Mock::given(method("GET"))
        .and(path(api(&format!("/dataset/{DATASET}/export"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_body(vec![item("m1", &[])])))
        .mount(&server)
        .await;

    let uri = server.uri();
    let count = tokio::task::spawn_blocking(move || {
        let ds = dataset(&uri);
        Query::new()
            .search_by_labels(["cat"], None)
            .reset()
            .count(&ds, EntityType::Images)
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(count, 1);
}
