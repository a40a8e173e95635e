//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use kgrid_activator::{
    ActivationContext, EngineSpec, KoFunction, KoId, KoRecord, KoStatus, RegistryBuilder,
    RouteSpec,
};
use kgrid_server::{AppState, create_router};
use serde_json::{Value, json};
use tower::ServiceExt;

fn route(id: &str, function: &str) -> RouteSpec {
    RouteSpec {
        id: id.into(),
        ko: "hello-world".into(),
        method: "post".into(),
        engine: EngineSpec {
            name: "org.kgrid.javascript-activator".into(),
            artifact: "src/index.js".into(),
            function: function.into(),
        },
    }
}

fn context() -> ActivationContext {
    let welcome: Arc<dyn KoFunction> = Arc::new(|input: &Value| -> Result<Value, String> {
        let name = input
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "name is required".to_string())?;
        Ok(json!(format!("Welcome to Knowledge Grid, {name}")))
    });

    let mut builder = RegistryBuilder::new();
    builder
        .insert(route("hello-world/welcome", "welcome"), welcome)
        .unwrap();

    let mut ko = KoRecord::new(KoId::new("hello-world").unwrap(), "hello-world.zip");
    ko.set_status(KoStatus::Loaded);
    ko.set_status(KoStatus::Activated);
    builder.build(vec![ko])
}

fn app() -> Router {
    create_router(AppState::new(context()))
}

async fn send(request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn get(uri: &str) -> (StatusCode, Vec<u8>) {
    send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post(uri: &str, body: &str) -> (StatusCode, Value) {
    let (status, bytes) = send(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap(),
    )
    .await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn root_serves_welcome_text() {
    let (status, body) = get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("KGrid"));
}

#[tokio::test]
async fn lists_and_gets_kos() {
    let (status, body) = get("/kos").await;
    assert_eq!(status, StatusCode::OK);
    let kos: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(kos[0]["@id"], "hello-world");
    assert_eq!(kos[0]["status"], "activated");

    let (status, body) = get("/kos/hello-world").await;
    assert_eq!(status, StatusCode::OK);
    let ko: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ko["url"], "hello-world.zip");
}

#[tokio::test]
async fn unknown_ko_is_404() {
    let (status, body) = get("/kos/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["title"], "KO Not Found");
}

#[tokio::test]
async fn lists_and_gets_endpoints_with_slash_ids() {
    let (status, body) = get("/endpoints").await;
    assert_eq!(status, StatusCode::OK);
    let endpoints: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(endpoints[0]["@id"], "hello-world/welcome");

    let (status, body) = get("/endpoints/hello-world/welcome").await;
    assert_eq!(status, StatusCode::OK);
    let endpoint: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(endpoint["engine"]["function"], "welcome");
}

#[tokio::test]
async fn unknown_endpoint_is_404() {
    let (status, body) = get("/endpoints/hello-world/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["title"], "Endpoint Not Found");

    let (status, _) = post("/endpoints/hello-world/missing", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_invokes_function() {
    let (status, body) = post("/endpoints/hello-world/welcome", r#"{"name":"Ada"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "Welcome to Knowledge Grid, Ada");
    assert_eq!(body["info"]["inputs"]["name"], "Ada");
    assert_eq!(body["info"]["endpoint"]["@id"], "hello-world/welcome");
}

#[tokio::test]
async fn function_error_is_invalid_input() {
    let (status, body) = post("/endpoints/hello-world/welcome", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["title"], "Invalid Input Parameter");
    assert_eq!(body["detail"], "name is required");
}

#[tokio::test]
async fn malformed_body_is_invalid_input() {
    let (status, body) = post("/endpoints/hello-world/welcome", "{not json").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["title"], "Invalid Input Parameter");
}

#[tokio::test]
async fn empty_context_serves_empty_lists() {
    let app = create_router(AppState::new(ActivationContext::empty()));
    let resp = app
        .oneshot(Request::builder().uri("/kos").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!([]));
}
