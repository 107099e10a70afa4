//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives real requests
//! through `HttpClient` over loopback TCP. Events are collected by a
//! recording listener on the test thread, which pumps the dispatcher with
//! `wait`, the same way a host UI loop would.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use requests_core::{
    ConnectOptions, ErrorCode, FormData, HttpClient, HttpError, HttpRequest, HttpResponse, Listener,
    ReadyState, Stage, UploadProgress,
};

fn start_server() -> SocketAddr {
    let _ = env_logger::builder().is_test(true).try_init();

    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

#[derive(Debug)]
enum Seen {
    State(ReadyState),
    Progress(UploadProgress),
    Response(HttpResponse),
    Error(HttpError),
}

struct Recorder(Rc<RefCell<Vec<Seen>>>);

impl Listener for Recorder {
    fn on_response(&mut self, response: &HttpResponse) {
        self.0.borrow_mut().push(Seen::Response(response.clone()));
    }

    fn on_error(&mut self, error: &HttpError) {
        self.0.borrow_mut().push(Seen::Error(error.clone()));
    }

    fn on_file_upload_progress(&mut self, progress: &UploadProgress) {
        self.0.borrow_mut().push(Seen::Progress(progress.clone()));
    }

    fn on_ready_state_change(&mut self, state: ReadyState) {
        self.0.borrow_mut().push(Seen::State(state));
    }
}

/// Submit `request`, pump until it finishes, and return everything seen.
fn run(client: &HttpClient, request: HttpRequest) -> Vec<Seen> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = client.submit(request, Recorder(seen.clone()));
    assert!(client.wait(id, Duration::from_secs(10)), "request {id} did not finish");
    seen.take()
}

fn response(seen: &[Seen]) -> &HttpResponse {
    match seen.last() {
        Some(Seen::Response(response)) => response,
        other => panic!("expected a response last, got {other:?}"),
    }
}

fn error(seen: &[Seen]) -> &HttpError {
    match seen.last() {
        Some(Seen::Error(error)) => error,
        other => panic!("expected an error last, got {other:?}"),
    }
}

fn progress(seen: &[Seen]) -> Vec<&UploadProgress> {
    seen.iter()
        .filter_map(|s| match s {
            Seen::Progress(p) => Some(p),
            _ => None,
        })
        .collect()
}

fn terminal_count(seen: &[Seen]) -> usize {
    seen.iter()
        .filter(|s| matches!(s, Seen::Response(_) | Seen::Error(_)))
        .count()
}

#[test]
fn multipart_text_field_is_echoed() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let mut form = FormData::new();
    form.append_text("name", "omer");
    let boundary = form.boundary().to_string();
    let seen = run(&client, HttpRequest::post("/echo").payload(form));

    let response = response(&seen);
    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(
        response.header("content-type"),
        Some(format!("multipart/form-data; boundary={boundary}").as_str())
    );
    let expected = format!(
        "--{boundary}\n\
         Content-Disposition: form-data; name=\"name\"\n\
         Content-Type: text/plain; charset=UTF-8\n\
         \n\
         omer\n\
         --{boundary}--\n"
    );
    assert_eq!(response.text, expected);
    assert_eq!(terminal_count(&seen), 1);
    assert!(progress(&seen).is_empty());
}

#[test]
fn ready_states_precede_the_terminal_event() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}/")).unwrap();

    let seen = run(&client, HttpRequest::get("/get"));
    let states: Vec<_> = seen
        .iter()
        .filter_map(|s| match s {
            Seen::State(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        [
            ReadyState::Opened,
            ReadyState::HeadersReceived,
            ReadyState::Loading,
            ReadyState::Done
        ]
    );
    let response = response(&seen);
    assert_eq!(response.text, "hello\nworld\n");
    assert_eq!(response.url, format!("http://{addr}/get"));
}

#[test]
fn error_status_body_is_returned_as_response() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let seen = run(&client, HttpRequest::get("status/404"));
    let response = response(&seen);
    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
    assert_eq!(response.text, "status 404\n");
}

#[test]
fn json_payload_round_trips_through_echo() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let seen = run(
        &client,
        HttpRequest::put("/echo").json(serde_json::json!({"name": "omer", "tags": [1, 2]})),
    );
    let response = response(&seen);
    assert_eq!(response.header("content-type"), Some("application/json"));
    let body = response.json().unwrap();
    assert_eq!(body["name"], "omer");
    assert_eq!(body["tags"][1], 2);
}

#[test]
fn custom_headers_reach_the_server() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let seen = run(
        &client,
        HttpRequest::get("/anything?x=1").header("X-Custom", "yes"),
    );
    let inspection: mock_server::Inspection = response(&seen).deserialize().unwrap();
    assert_eq!(inspection.method, "GET");
    assert_eq!(inspection.uri, "/anything?x=1");
    assert_eq!(inspection.headers["x-custom"], "yes");
    assert_eq!(inspection.headers["connection"], "close");
    assert!(!inspection.headers.contains_key("content-type"));
    assert_eq!(inspection.body_length, 0);
}

#[test]
fn multi_file_upload_reports_ordered_progress() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.bin");
    std::fs::write(&first, vec![1u8; 9000]).unwrap();
    let second = dir.path().join("second.txt");
    std::fs::write(&second, b"tiny").unwrap();

    let mut form = FormData::new();
    form.append_file("first", &first)
        .append_text("note", "two files")
        .append_file("second", &second);
    let declared = form.content_length();

    let seen = run(&client, HttpRequest::post("/anything").payload(form));

    let updates = progress(&seen);
    let steps: Vec<_> = updates
        .iter()
        .map(|p| (p.file_number, p.uploaded, p.total, p.files_count))
        .collect();
    assert_eq!(
        steps,
        [(1, 4096, 9000, 2), (1, 8192, 9000, 2), (1, 9000, 9000, 2), (2, 4, 4, 2)]
    );
    assert!(updates.last().unwrap().is_last_file());
    let complete: Vec<_> = updates.iter().map(|p| p.is_file_complete()).collect();
    assert_eq!(complete, [false, false, true, true]);

    let inspection: mock_server::Inspection = response(&seen).deserialize().unwrap();
    assert_eq!(inspection.body_length as u64, declared);
    assert!(inspection.headers["content-type"].starts_with("multipart/form-data; boundary="));
    assert_eq!(inspection.headers["content-length"], declared.to_string());
}

#[test]
fn missing_upload_file_fails_while_sending() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let mut form = FormData::new();
    form.append_file("file", "/definitely/not/here.bin");
    let seen = run(&client, HttpRequest::post("/echo").payload(form));

    let error = error(&seen);
    assert_eq!((error.code, error.stage), (ErrorCode::FileDoesNotExist, Stage::Sending));
    assert!(progress(&seen).is_empty());
    assert_eq!(terminal_count(&seen), 1);
}

#[test]
fn upload_file_grown_after_append_fails_while_sending() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grows.bin");
    std::fs::write(&path, b"0123456789").unwrap();
    let mut form = FormData::new();
    form.append_file("file", &path);
    std::fs::write(&path, vec![7u8; 5000]).unwrap();

    let seen = run(&client, HttpRequest::post("/anything").payload(form));
    let error = error(&seen);
    assert_eq!((error.code, error.stage), (ErrorCode::Unknown, Stage::Sending));
    assert!(error.reason.contains("too many bytes"), "{}", error.reason);
    assert_eq!(terminal_count(&seen), 1);
}

#[test]
fn upload_file_shrunk_after_append_fails_while_sending() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shrinks.bin");
    std::fs::write(&path, vec![7u8; 10_000]).unwrap();
    let mut form = FormData::new();
    form.append_file("file", &path);
    std::fs::write(&path, b"0123456789").unwrap();

    let seen = run(&client, HttpRequest::post("/anything").payload(form));
    let error = error(&seen);
    assert_eq!((error.code, error.stage), (ErrorCode::Unknown, Stage::Sending));
    assert!(error.reason.contains("insufficient data written"), "{}", error.reason);
    assert_eq!(terminal_count(&seen), 1);

    // the client keeps working after an aborted upload
    let seen = run(&client, HttpRequest::get("/get"));
    assert_eq!(response(&seen).status, 200);
}

#[test]
fn tls_handshake_with_a_plain_http_server_is_a_certificate_error() {
    let addr = start_server();
    let client = HttpClient::new(&format!("https://{addr}")).unwrap();

    let seen = run(&client, HttpRequest::get("/get"));
    let error = error(&seen);
    assert_eq!(
        (error.code, error.stage),
        (ErrorCode::SslCertificateInvalid, Stage::Connecting)
    );
}

#[test]
fn refused_connection_is_reported() {
    let _ = env_logger::builder().is_test(true).try_init();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = HttpClient::new(&format!("http://127.0.0.1:{port}")).unwrap();

    let seen = run(&client, HttpRequest::get("/get"));
    let error = error(&seen);
    assert_eq!((error.code, error.stage), (ErrorCode::ConnectionRefused, Stage::Connecting));
}

#[test]
fn read_timeout_is_reported() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let request = HttpRequest::get("/delay/1000").options(ConnectOptions::new(2_000, 1));
    let seen = run(&client, request);
    let error = error(&seen);
    assert_eq!(error.code, ErrorCode::ConnectionTimedOut);
    assert!(matches!(error.stage, Stage::Receiving | Stage::Connecting));
}

#[test]
fn requests_of_one_client_run_in_submission_order() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    // the first request is the slowest; later ones must still wait for it
    let slow = client.submit_to(HttpRequest::get("/delay/100"), Vec::new());
    let ids: Vec<_> = (1..=5)
        .map(|n| client.submit_to(HttpRequest::post(format!("/sequence/{n}")), Vec::new()))
        .collect();
    assert!(client.wait(*ids.last().unwrap(), Duration::from_secs(10)));
    assert!(!client.is_pending(slow));

    let seen = run(&client, HttpRequest::get("/sequence"));
    let order: Vec<u32> = response(&seen).deserialize().unwrap();
    assert_eq!(order, [1, 2, 3, 4, 5]);
}

#[test]
fn dispatch_pending_delivers_without_blocking() {
    let addr = start_server();
    let client = HttpClient::new(&format!("http://{addr}")).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = client.submit(HttpRequest::get("/get"), Recorder(seen.clone()));
    // nothing is delivered until the owning thread pumps
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while client.is_pending(id) && std::time::Instant::now() < deadline {
        client.dispatch_pending();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!client.is_pending(id));
    assert_eq!(response(&seen.borrow()).status, 200);
}
