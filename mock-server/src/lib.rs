use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};

/// What `/anything` saw of a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Inspection {
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body_length: usize,
}

/// Arrival order of `/sequence/{n}` calls.
pub type Log = Arc<RwLock<Vec<u32>>>;

pub fn app() -> Router {
    let log: Log = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route("/echo", any(echo))
        .route("/anything", any(anything))
        .route("/get", get(hello))
        .route("/status/{code}", any(status))
        .route("/delay/{ms}", any(delay))
        .route("/sequence", get(sequence))
        .route("/sequence/{n}", post(record))
        .with_state(log)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Return the request body unchanged, with the request's content type.
async fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    ([(header::CONTENT_TYPE, content_type)], body)
}

async fn anything(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Inspection> {
    let headers = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    Json(Inspection {
        method: method.to_string(),
        uri: uri.to_string(),
        headers,
        body_length: body.len(),
    })
}

async fn hello() -> &'static str {
    "hello\nworld\n"
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

async fn delay(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn record(State(log): State<Log>, Path(n): Path<u32>) -> StatusCode {
    log.write().await.push(n);
    StatusCode::NO_CONTENT
}

async fn sequence(State(log): State<Log>) -> Json<Vec<u32>> {
    Json(log.read().await.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspection_serializes_to_json() {
        let inspection = Inspection {
            method: "POST".to_string(),
            uri: "/anything?x=1".to_string(),
            headers: BTreeMap::from([("host".to_string(), "localhost".to_string())]),
            body_length: 3,
        };
        let json = serde_json::to_value(&inspection).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["headers"]["host"], "localhost");
        assert_eq!(json["body_length"], 3);
    }

    #[test]
    fn inspection_roundtrips_through_json() {
        let json = r#"{"method":"GET","uri":"/","headers":{},"body_length":0}"#;
        let inspection: Inspection = serde_json::from_str(json).unwrap();
        assert_eq!(inspection.method, "GET");
        assert!(inspection.headers.is_empty());
    }
}
