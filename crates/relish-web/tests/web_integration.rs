//! End-to-end requests against the app and explore routers.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use relish_runtime::{Manifest, Runtime, RuntimeConfig};
use relish_web::{build_app_router, build_explore_router, AppState, WebConfig};
use tempfile::TempDir;
use tower::ServiceExt;

const SITE: &str = r#"{
    "types": [
        { "name": "app/Page", "attributes": [ { "name": "title", "type": "String" } ] }
    ],
    "methods": [
        { "package": "app/web", "name": "index",
          "body": { "return": [ { "lit": "HTML" }, { "lit": "<html>home</html>" } ] } },
        { "package": "app/web/foo", "name": "bar",
          "params": [ { "name": "id", "type": "String" }, { "name": "kw", "type": "Map" } ],
          "body": { "return": [ { "lit": "HTML" },
              { "concat": [ { "lit": "<html>" }, { "arg": 0 }, { "lit": " x=" },
                            { "call": { "name": "get", "args": [ { "lit": "x" }, { "arg": 1 } ] } },
                            { "lit": "</html>" } ] } ] } },
        { "package": "app/web", "name": "add",
          "params": [ { "name": "a", "type": "Int" }, { "name": "b", "type": "Int" } ],
          "body": { "return": [ { "lit": "JSON" }, { "arg": 1 } ] } },
        { "package": "app/web", "name": "greet",
          "params": [ { "name": "name", "type": "String" } ],
          "body": { "return": [ { "lit": "HTML" },
              { "concat": [ { "lit": "<html>hi " }, { "arg": 0 }, { "lit": "</html>" } ] } ] } },
        { "package": "app/web", "name": "login",
          "body": { "return": [ { "lit": "REDIRECT" }, { "lit": 307 }, { "lit": "/login" } ] } },
        { "package": "app/web", "name": "broken", "returns": ["Int"],
          "body": { "lit": "not a number" } },
        { "package": "app/web", "name": "page",
          "body": { "return": [ { "lit": "JSON" },
              { "new": { "type": "app/Page", "attrs": { "title": { "lit": "Home" } } } } ] } },
        { "package": "app/web", "name": "guarded",
          "body": { "return": [ { "lit": "HEADERS\nX-Frame-Options: DENY" },
              { "lit": "JSON PRE" }, { "lit": "[]" } ] } },
        { "package": "app/web", "name": "inline",
          "body": { "return": [ { "lit": "TEMPLATE" }, { "lit": "<p>{{.title}}</p>" },
              { "new": { "type": "app/Page", "attrs": { "title": { "lit": "A & B" } } } } ] } },
        { "package": "app/web", "name": "hello",
          "body": { "return": [ { "lit": "views/hello.html" },
              { "new": { "type": "app/Page", "attrs": { "title": { "lit": "file" } } } } ] } },
        { "package": "app/web", "name": "shrug",
          "body": { "return": [ { "lit": "SHRUG" } ] } }
    ]
}"#;

struct Site {
    app: Router,
    state: AppState,
    _dir: TempDir,
}

fn site() -> Site {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("static/css")).unwrap();
    std::fs::write(dir.path().join("static/css/site.css"), "body{}").unwrap();
    std::fs::create_dir_all(dir.path().join("views")).unwrap();
    std::fs::write(dir.path().join("views/hello.html"), "<b>{{.title}}</b>").unwrap();
    std::fs::write(dir.path().join("secret.txt"), "hidden").unwrap();

    let mut builder = Runtime::builder(RuntimeConfig::in_memory());
    Manifest::from_json(SITE).unwrap().install(&mut builder).unwrap();
    let runtime: Arc<Runtime> = builder.build().unwrap();
    let state = AppState::new(runtime, WebConfig::new("app/web", dir.path()));
    Site {
        app: build_app_router(state.clone()),
        state,
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, header::HeaderMap, String) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn index_serves_root() {
    let s = site();
    let (status, headers, body) = get(&s.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    assert_eq!(body, "<html>home</html>");
}

#[tokio::test]
async fn sub_package_method_gets_positional_and_keywords() {
    let s = site();
    let (status, _, body) = get(&s.app, "/foo/bar/baz?x=1").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, "<html>baz x=1</html>");
}

#[tokio::test]
async fn positional_segments_are_coerced() {
    let s = site();
    let (status, _, body) = get(&s.app, "/add/2/3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "3");

    let (status, _, body) = get(&s.app, "/add/two/3").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("two"), "{body}");
}

#[tokio::test]
async fn form_body_binds_by_name() {
    let s = site();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/greet")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("name=Ada+L"))
        .unwrap();
    let (status, _, body) = send(&s.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<html>hi Ada L</html>");
}

#[tokio::test]
async fn redirect_directive() {
    let s = site();
    let (status, headers, _) = get(&s.app, "/login").await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(headers[header::LOCATION], "/login");
}

#[tokio::test]
async fn unrouted_path_is_not_found() {
    let s = site();
    let (status, _, _) = get(&s.app, "/nowhere/at/all").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn handler_failures_are_server_errors() {
    let s = site();
    let (status, _, _) = get(&s.app, "/broken").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (status, _, body) = get(&s.app, "/shrug").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("SHRUG"));
    assert!(s.state.runtime.threads().is_empty());
}

#[tokio::test]
async fn json_encodes_objects() {
    let s = site();
    let (status, headers, body) = get(&s.app, "/page").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/json");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["title"], "Home");
}

#[tokio::test]
async fn headers_directive_adds_headers() {
    let s = site();
    let (status, headers, body) = get(&s.app, "/guarded").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn templates_inline_and_from_file() {
    let s = site();
    let (_, _, body) = get(&s.app, "/inline").await;
    assert_eq!(body, "<p>A &amp; B</p>");
    let (status, _, body) = get(&s.app, "/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<b>file</b>");
}

#[tokio::test]
async fn static_files_and_escapes() {
    let s = site();
    let (status, headers, body) = get(&s.app, "/css/site.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/css");
    assert_eq!(body, "body{}");

    let (status, _, _) = get(&s.app, "/css/missing.css").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(&s.app, "/%2E%2E/secret.txt").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn explore_lists_methods_and_names() {
    let s = site();
    let explore = build_explore_router(s.state.clone());

    let (status, _, body) = get(&explore, "/methods").await;
    assert_eq!(status, StatusCode::OK);
    let methods: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(methods
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["package"] == "app/web/foo" && m["name"] == "bar"));

    let (status, _, body) = get(&explore, "/types").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("app/Page"));

    let (status, _, body) = get(&explore, "/names?prefix=zz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
}
