use std::path::Path;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use folio_site::{
    config::AppConfig,
    server::{AppState, router},
};
use serde_json::Value;
use tempfile::{TempDir, tempdir};
use tower::ServiceExt;

fn build_site(temp: &Path, admin_password: Option<&str>) -> Router {
    let site = temp.join("public");
    let data = temp.join("data");
    std::fs::create_dir_all(site.join("docs")).expect("create site dir");
    std::fs::create_dir_all(&data).expect("create data dir");
    std::fs::write(site.join("index.html"), "<h1>home</h1>").expect("write index");
    std::fs::write(site.join("docs/index.html"), "<h1>docs</h1>").expect("write docs index");
    std::fs::write(site.join("app.js"), "console.log(1)").expect("write js");
    std::fs::write(site.join("server.py"), "print()").expect("write source");
    std::fs::write(data.join("projects.json"), "[1,2]").expect("write json");
    std::fs::write(data.join("photo.png"), [0u8; 8]).expect("write png");
    std::fs::write(data.join("notes.exe"), "MZ").expect("write exe");
    std::fs::write(temp.join("secret.txt"), "secret").expect("write secret");
    std::fs::create_dir_all(temp.join("data-private")).expect("create sibling");
    std::fs::write(temp.join("data-private/keys.json"), "{}").expect("write sibling");
    std::fs::write(
        temp.join("site.config.json"),
        "{\"siteName\":\"Folio Systems\",\"theme\":\"dark\"}",
    )
    .expect("write site config");

    let mut config = AppConfig::from_lookup(|_| None).expect("config");
    config.site_root = site;
    config.data_dir = data;
    config.leads_dir = temp.join("leads");
    config.site_config_file = temp.join("site.config.json");
    config.admin_password = admin_password.map(str::to_string);
    router(AppState::new(config).expect("state"))
}

fn setup() -> (TempDir, Router) {
    let temp = tempdir().expect("temp dir");
    let app = build_site(temp.path(), Some("hunter2"));
    (temp, app)
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("response")
}

async fn request(app: &Router, method: &str, uri: &str) -> Response {
    send(
        app,
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    )
    .await
}

async fn get(app: &Router, uri: &str) -> Response {
    request(app, "GET", uri).await
}

async fn status_of(app: &Router, uri: &str) -> StatusCode {
    get(app, uri).await.status()
}

async fn post_json(app: &Router, uri: &str, body: &str) -> Response {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
    )
    .await
}

async fn get_as_admin(app: &Router, uri: &str, password: &str) -> Response {
    let credentials = STANDARD.encode(format!("admin:{password}"));
    send(
        app,
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json body")
}

#[tokio::test]
async fn health_reports_site_name_from_config() {
    let (_temp, app) = setup();
    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["site"], "Folio Systems");
    assert_eq!(body["config_loaded"], true);
}

#[tokio::test]
async fn health_falls_back_to_service_name_without_config() {
    let (temp, app) = setup();
    std::fs::remove_file(temp.path().join("site.config.json")).expect("remove config");

    let body = body_json(get(&app, "/health").await).await;
    assert_eq!(body["site"], "folio-site");
    assert_eq!(body["config_loaded"], false);
    let config = body_json(get(&app, "/api/config").await).await;
    assert_eq!(config, serde_json::json!({}));
}

#[tokio::test]
async fn status_and_config_endpoints() {
    let (_temp, app) = setup();
    let status = body_json(get(&app, "/status").await).await;
    assert_eq!(status["backend"], "axum");
    assert_eq!(status["data_endpoint"], "secured");
    assert_eq!(status["leads"], 0);

    let config = body_json(get(&app, "/api/config").await).await;
    assert_eq!(config["theme"], "dark");
}

#[tokio::test]
async fn serves_index_and_directory_indexes() {
    let (_temp, app) = setup();
    assert_eq!(body_text(get(&app, "/").await).await, "<h1>home</h1>");
    assert_eq!(body_text(get(&app, "/docs/").await).await, "<h1>docs</h1>");

    let js = get(&app, "/app.js").await;
    assert_eq!(js.status(), StatusCode::OK);
    assert!(
        js.headers()[header::CONTENT_TYPE]
            .to_str()
            .expect("content type")
            .contains("javascript")
    );
}

#[tokio::test]
async fn static_route_blocks_encoded_traversal() {
    let (_temp, app) = setup();
    for uri in [
        "/%2e%2e/secret.txt",
        "/%2e%2e%2fsecret.txt",
        "/docs/%2E%2E/%2E%2E/secret.txt",
        "/..%2F..%2F..%2Fetc%2Fpasswd",
    ] {
        assert_eq!(status_of(&app, uri).await, StatusCode::FORBIDDEN, "{uri}");
    }
}

#[tokio::test]
async fn static_route_rejects_nul_and_unlisted_types() {
    let (_temp, app) = setup();
    let nul = status_of(&app, "/index%00.html").await;
    assert_eq!(nul, StatusCode::FORBIDDEN);
    let source = status_of(&app, "/server.py").await;
    assert_eq!(source, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let missing = status_of(&app, "/missing.css").await;
    assert_eq!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn data_route_applies_allow_list_and_containment() {
    let (_temp, app) = setup();

    let json = get(&app, "/data/projects.json").await;
    assert_eq!(json.status(), StatusCode::OK);
    assert_eq!(body_text(json).await, "[1,2]");

    let cases = [
        ("/data/photo.png", StatusCode::OK),
        ("/data/notes.exe", StatusCode::UNSUPPORTED_MEDIA_TYPE),
        ("/data/missing.json", StatusCode::NOT_FOUND),
        ("/data/..%2Fsecret.txt", StatusCode::FORBIDDEN),
        ("/data/..%2Fdata-private/keys.json", StatusCode::FORBIDDEN),
    ];
    for (uri, expected) in cases {
        assert_eq!(status_of(&app, uri).await, expected, "{uri}");
    }

    let rejected = body_json(get(&app, "/data/..%2Fsecret.txt").await).await;
    assert_eq!(rejected["ok"], false);
}

#[tokio::test]
async fn non_get_requests_to_static_files_are_refused() {
    let (_temp, app) = setup();
    let response = request(&app, "DELETE", "/index.html").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn head_requests_return_headers_without_a_body() {
    let (_temp, app) = setup();

    let health = request(&app, "HEAD", "/health").await;
    assert_eq!(health.status(), StatusCode::OK);
    assert!(body_text(health).await.is_empty());

    let script = request(&app, "HEAD", "/app.js").await;
    assert_eq!(script.status(), StatusCode::OK);
    assert!(script.headers().contains_key(header::ETAG));
    assert!(body_text(script).await.is_empty());

    let data = request(&app, "HEAD", "/data/projects.json").await;
    assert_eq!(data.status(), StatusCode::OK);
    assert!(body_text(data).await.is_empty());
}

#[tokio::test]
async fn lead_submission_is_stored_and_listed_for_admins() {
    let (temp, app) = setup();

    let saved = post_json(
        &app,
        "/lead",
        r#"{"name":" Ada ","email":"ada@example.com","plan":"pro","message":"hi, there"}"#,
    )
    .await;
    assert_eq!(saved.status(), StatusCode::OK);
    assert_eq!(body_json(saved).await["saved"], true);

    let grace = r#"{"name":"Grace","email":"grace@example.com"}"#;
    let legacy = post_json(&app, "/api/lead", grace).await;
    assert_eq!(legacy.status(), StatusCode::OK);

    let jsonl_path = temp.path().join("leads/leads.jsonl");
    let jsonl = std::fs::read_to_string(jsonl_path).expect("jsonl");
    assert_eq!(jsonl.lines().count(), 2);

    let listed = get_as_admin(&app, "/admin/leads", "hunter2").await;
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_json(listed).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["rows"][0]["name"], "Ada");
    assert_eq!(body["rows"][1]["email"], "grace@example.com");

    let export = get_as_admin(&app, "/admin/leads.csv", "hunter2").await;
    assert_eq!(export.status(), StatusCode::OK);
    assert!(
        export.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .expect("disposition")
            .contains("leads.csv")
    );
    let csv = body_text(export).await;
    assert!(csv.starts_with("ts,name,email,message"));
    assert!(csv.contains("\"hi, there\""));

    let status = body_json(get(&app, "/status").await).await;
    assert_eq!(status["leads"], 2);
}

#[tokio::test]
async fn stored_leads_are_not_reachable_through_file_routes() {
    let (_temp, app) = setup();
    post_json(&app, "/lead", r#"{"name":"Ada","email":"ada@example.com"}"#).await;

    for uri in ["/data/..%2Fleads%2Fleads.csv", "/%2e%2e/leads/leads.csv"] {
        assert_eq!(status_of(&app, uri).await, StatusCode::FORBIDDEN, "{uri}");
    }
}

#[tokio::test]
async fn invalid_leads_are_rejected() {
    let (_temp, app) = setup();
    for body in [
        r#"{"name":"","email":"ada@example.com"}"#,
        r#"{"name":"Ada","email":"nope"}"#,
        r#"{"name":"Ada"}"#,
        "not json",
        r#"{"name":42,"email":"ada@example.com"}"#,
    ] {
        let response = post_json(&app, "/lead", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body_json(response).await["ok"], false);
    }
}

#[tokio::test]
async fn admin_routes_require_credentials() {
    let (_temp, app) = setup();
    for uri in ["/api/leads", "/admin/leads", "/admin/leads.csv"] {
        let anonymous = get(&app, uri).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(
            anonymous.headers()[header::WWW_AUTHENTICATE],
            "Basic realm=\"Site Admin\""
        );
        let wrong = get_as_admin(&app, uri, "wrong").await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn admin_routes_stay_closed_without_a_password() {
    let temp = tempdir().expect("temp dir");
    let app = build_site(temp.path(), None);
    let response = get_as_admin(&app, "/admin/leads", "").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
