//! Integration tests for the projects commands against a mock API.

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn logged_in_home(access: &str, expires_at_ms: u64) -> TempDir {
    let home = tempdir().unwrap();
    let session = json!({
        "access_token": access,
        "refresh_token": "R1",
        "token_expiry": expires_at_ms.to_string(),
    });
    fs::write(home.path().join("session.json"), session.to_string()).unwrap();
    fs::write(home.path().join("config.toml"), "[api]\nretries = 0\n").unwrap();
    home
}

fn read_session(home: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(home.join("session.json")).unwrap()).unwrap()
}

const FAR_FUTURE_MS: u64 = 4_102_444_800_000;

fn project(id: &str, name: &str, website: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "website_url": website,
        "allow_localhost": false,
        "project_token": format!("pt_{id}"),
        "created_at": "2024-05-01T10:00:00Z"
    })
}

#[tokio::test]
async fn test_projects_list() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [
                project("p1", "Marketing site", "https://example.com"),
                project("p2", "Docs", "https://docs.example.com"),
            ],
            "total": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marketing site"))
        .stdout(predicate::str::contains("https://docs.example.com"))
        .stdout(predicate::str::contains("2 project(s)"));
}

#[tokio::test]
async fn test_projects_list_json() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [project("p1", "Site", "https://example.com")],
            "total": 1
        })))
        .mount(&server)
        .await;

    let output = cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "list", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let parsed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["total"], 1);
    assert_eq!(parsed["projects"][0]["id"], "p1");
}

#[tokio::test]
async fn test_projects_list_empty() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"projects": [], "total": 0})))
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No projects found."));
}

#[tokio::test]
async fn test_projects_refreshes_expired_session() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", 1_000);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T2",
            "refresh_token": "R2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/projects/p1"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(project("p1", "Site", "https://example.com")))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "show", "p1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Name:            Site"))
        .stdout(predicate::str::contains("Project token:   pt_p1"));

    assert_eq!(read_session(home.path())["access_token"], "T2");
}

#[tokio::test]
async fn test_projects_create() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("POST"))
        .and(path("/api/v1/projects"))
        .and(body_json(json!({
            "name": "Shop",
            "website_url": "https://shop.example.com",
            "allow_localhost": true
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(project("p9", "Shop", "https://shop.example.com")))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args([
            "projects",
            "create",
            "--name",
            "Shop",
            "--website-url",
            "https://shop.example.com",
            "--allow-localhost",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created project p9"));
}

#[test]
fn test_projects_create_validates_url() {
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", "http://127.0.0.1:9")
        .args(["projects", "create", "--name", "Shop", "--website-url", "shop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("website_url: Please enter a valid http(s) URL"));
}

#[tokio::test]
async fn test_projects_update_sends_only_given_fields() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("PUT"))
        .and(path("/api/v1/projects/p1"))
        .and(body_json(json!({"name": "Renamed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(project("p1", "Renamed", "https://example.com")))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "update", "p1", "--name", "Renamed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated project p1"));
}

#[tokio::test]
async fn test_projects_delete() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("DELETE"))
        .and(path("/api/v1/projects/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Project deleted successfully"})))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "delete", "p1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Project deleted successfully"));
}

#[tokio::test]
async fn test_projects_not_found() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("GET"))
        .and(path("/api/v1/projects/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Project not found"})))
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "show", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("The requested resource was not found."));
}

#[tokio::test]
async fn test_projects_rejected_token_logs_out() {
    let server = MockServer::start().await;
    let home = logged_in_home("T1", FAR_FUTURE_MS);

    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .env("ZORI_API_BASE_URL", server.uri())
        .args(["projects", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Your session has expired"));

    assert!(read_session(home.path()).as_object().unwrap().is_empty());
}

#[test]
fn test_projects_require_login() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("zori")
        .env("ZORI_HOME", home.path())
        .args(["projects", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}
