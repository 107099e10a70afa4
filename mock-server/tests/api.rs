use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Inspection};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(body.to_string())
        .unwrap()
}

// --- echo ---

#[tokio::test]
async fn echo_returns_body_and_content_type() {
    let resp = app()
        .oneshot(request("POST", "/echo", "name=omer"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "text/plain");
    assert_eq!(body_bytes(resp).await, "name=omer");
}

#[tokio::test]
async fn echo_accepts_every_body_method() {
    for method in ["PUT", "PATCH", "DELETE"] {
        let resp = app().oneshot(request(method, "/echo", "x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{method}");
        assert_eq!(body_bytes(resp).await, "x");
    }
}

// --- anything ---

#[tokio::test]
async fn anything_reports_method_headers_and_length() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/anything?q=1")
                .header("X-Custom", "yes")
                .body("12345".to_string())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let seen: Inspection = body_json(resp).await;
    assert_eq!(seen.method, "PATCH");
    assert_eq!(seen.uri, "/anything?q=1");
    assert_eq!(seen.headers["x-custom"], "yes");
    assert_eq!(seen.body_length, 5);
}

// --- get ---

#[tokio::test]
async fn get_returns_two_lines() {
    let resp = app()
        .oneshot(Request::builder().uri("/get").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, "hello\nworld\n");
}

#[tokio::test]
async fn get_rejects_post() {
    let resp = app().oneshot(request("POST", "/get", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// --- status ---

#[tokio::test]
async fn status_echoes_code_with_body() {
    let resp = app()
        .oneshot(Request::builder().uri("/status/404").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(resp).await, "status 404");
}

#[tokio::test]
async fn status_out_of_range_is_400() {
    let resp = app()
        .oneshot(Request::builder().uri("/status/42").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- delay ---

#[tokio::test]
async fn delay_responds_after_sleeping() {
    let start = std::time::Instant::now();
    let resp = app()
        .oneshot(Request::builder().uri("/delay/50").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(start.elapsed() >= std::time::Duration::from_millis(50));
    assert_eq!(body_bytes(resp).await, "done");
}

// --- sequence ---

#[tokio::test]
async fn sequence_records_arrival_order() {
    let app = app();
    for n in [3, 1, 2] {
        let resp = app
            .clone()
            .oneshot(request("POST", &format!("/sequence/{n}"), ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    let resp = app
        .oneshot(Request::builder().uri("/sequence").body(String::new()).unwrap())
        .await
        .unwrap();
    let seen: Vec<u32> = body_json(resp).await;
    assert_eq!(seen, [3, 1, 2]);
}
