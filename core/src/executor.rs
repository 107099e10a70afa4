//! The per-request state machine.
//!
//! # Design
//! `execute` walks one request through validating, connecting, sending,
//! receiving and cleaning, strictly in that order. Each stage maps its raw
//! `Failure` through the classifier tagged with that stage, and the first
//! failure skips every remaining stage except cleanup. Cleanup runs once a
//! connection was opened, whatever happened before it; its own failure
//! replaces a success but never an earlier error.
//!
//! Non-terminal events (ready states, upload progress) go to `emit` as they
//! happen. The outcome is returned rather than emitted so the caller decides
//! how the terminal event is delivered.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};

use url::Url;

use crate::classifier::to_http_error;
use crate::config::{ClientConfig, ConnectOptions, Proxy};
use crate::dispatch::{Event, ReadyState, UploadProgress};
use crate::error::{Failure, HttpError, Stage};
use crate::form::FormData;
use crate::http::{join_url, Headers, HttpMethod, HttpRequest, HttpResponse, Payload};
use crate::transport::{drain_lines, Connection, Connector};

/// File content is streamed in blocks of this many bytes, with one progress
/// event per block.
pub const UPLOAD_BLOCK_SIZE: usize = 4096;

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug)]
enum Body {
    Empty,
    Text(String),
    Form(FormData),
}

impl Body {
    fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Text(text) => text.len() as u64,
            Body::Form(form) => form.content_length(),
        }
    }
}

/// A request that passed validation.
#[derive(Debug)]
struct Prepared {
    method: String,
    url: Url,
    body: Body,
    headers: Headers,
    options: ConnectOptions,
    proxy: Option<Proxy>,
}

fn at(stage: Stage) -> impl Fn(Failure) -> HttpError {
    move |failure| to_http_error(failure, stage)
}

/// Run `request` to completion against `connector`, with `config`
/// supplying the base URL and the options/proxy the request leaves unset.
pub fn execute(
    connector: &dyn Connector,
    config: &ClientConfig,
    request: HttpRequest,
    emit: &mut dyn FnMut(Event),
) -> Result<HttpResponse, HttpError> {
    let outcome = match validate(config, request) {
        Ok(prepared) => {
            log::debug!("validated {} {}", prepared.method, prepared.url);
            let mut connection = None;
            let outcome = exchange(connector, &prepared, &mut connection, emit);
            match (outcome, cleanup(connection)) {
                (Ok(_), Err(failure)) => Err(to_http_error(failure, Stage::Cleaning)),
                (Err(error), Err(failure)) => {
                    log::debug!("ignoring cleanup failure after error: {failure}");
                    Err(error)
                }
                (outcome, Ok(())) => outcome,
            }
        }
        Err(failure) => Err(to_http_error(failure, Stage::Validating)),
    };
    emit(Event::ReadyState(ReadyState::Done));
    outcome
}

fn validate(config: &ClientConfig, request: HttpRequest) -> Result<Prepared, Failure> {
    let HttpRequest {
        method,
        url,
        payload,
        headers,
        options,
        proxy,
    } = request;

    let url = Url::parse(&join_url(&config.base_url, &url))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(Failure::UnsupportedUrl(url.to_string()));
    }

    // an unknown method is reported while connecting, where it is applied
    let forbids_body = matches!(method.parse::<HttpMethod>(), Ok(m) if !m.permits_body());
    let body = match payload {
        None => Body::Empty,
        Some(_) if forbids_body => {
            log::warn!("ignoring payload of {method} {url}");
            Body::Empty
        }
        Some(Payload::Text(text)) => Body::Text(text),
        Some(Payload::Form(form)) => Body::Form(form),
        Some(Payload::Object(object)) => Body::Text(object.to_json()?),
    };

    Ok(Prepared {
        method,
        url,
        body,
        headers,
        options: options.unwrap_or(config.options),
        proxy: proxy.or_else(|| config.proxy.clone()),
    })
}

fn exchange(
    connector: &dyn Connector,
    prepared: &Prepared,
    slot: &mut Option<Box<dyn Connection>>,
    emit: &mut dyn FnMut(Event),
) -> Result<HttpResponse, HttpError> {
    let method = prepared.method.parse::<HttpMethod>().map_err(at(Stage::Connecting))?;
    let connection = slot.insert(
        connector
            .open(method, &prepared.url, prepared.proxy.as_ref())
            .map_err(at(Stage::Connecting))?,
    );
    connection.set_timeouts(&prepared.options);
    apply_headers(connection.as_mut(), method, &prepared.headers, &prepared.body);
    connection.set_fixed_length_streaming_mode(prepared.body.len());
    connection.connect().map_err(at(Stage::Connecting))?;
    log::debug!("connected to {}", prepared.url);
    emit(Event::ReadyState(ReadyState::Opened));

    send(connection.as_mut(), &prepared.body, emit).map_err(at(Stage::Sending))?;
    log::debug!("sent {} body bytes", prepared.body.len());

    receive(connection.as_mut(), &prepared.url, emit).map_err(at(Stage::Receiving))
}

fn apply_headers(connection: &mut dyn Connection, method: HttpMethod, headers: &Headers, body: &Body) {
    let mut headers = headers.clone();
    match body {
        Body::Form(form) => {
            headers.remove_ignore_case("Content-Type");
            headers.insert("Content-Type", form.content_type());
        }
        _ if method != HttpMethod::Get && !headers.contains_ignore_case("Content-Type") => {
            headers.insert("Content-Type", JSON_CONTENT_TYPE);
        }
        _ => {}
    }
    for (name, value) in headers.iter() {
        connection.set_request_property(name, value);
    }
}

fn send(connection: &mut dyn Connection, body: &Body, emit: &mut dyn FnMut(Event)) -> Result<(), Failure> {
    match body {
        Body::Empty => {}
        Body::Text(text) => {
            let out = connection.output_stream()?;
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        Body::Form(form) => send_form(connection.output_stream()?, form, emit)?,
    }
    connection.close_output()
}

fn send_form(out: &mut dyn Write, form: &FormData, emit: &mut dyn FnMut(Event)) -> Result<(), Failure> {
    let files_count = form.files_count();
    let mut file_number = 0;
    let mut block = vec![0u8; UPLOAD_BLOCK_SIZE];

    for part in form.parts() {
        write_flushed(out, part.pre_content().as_bytes())?;
        match part.path() {
            None => write_flushed(out, part.field().value.as_bytes())?,
            Some(path) => {
                file_number += 1;
                let mut file = File::open(path).map_err(|err| Failure::file(path, err))?;
                let mut progress = UploadProgress {
                    file: path.to_path_buf(),
                    uploaded: 0,
                    total: part.content_length(),
                    file_number,
                    files_count,
                };
                loop {
                    let n = read_block(&mut file, &mut block).map_err(|err| Failure::file(path, err))?;
                    if n == 0 {
                        break;
                    }
                    write_flushed(out, &block[..n])?;
                    progress.uploaded += n as u64;
                    log::trace!(
                        "{}: {}/{} bytes (file {file_number} of {files_count})",
                        path.display(),
                        progress.uploaded,
                        progress.total
                    );
                    emit(Event::UploadProgress(progress.clone()));
                }
                if progress.uploaded == 0 {
                    emit(Event::UploadProgress(progress));
                }
            }
        }
        write_flushed(out, part.post_content().as_bytes())?;
    }
    write_flushed(out, form.finish_line().as_bytes())?;
    Ok(())
}

fn write_flushed(out: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    out.write_all(bytes)?;
    out.flush()
}

fn read_block(file: &mut File, block: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(block) {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn receive(connection: &mut dyn Connection, url: &Url, emit: &mut dyn FnMut(Event)) -> Result<HttpResponse, Failure> {
    let head = connection.response_head()?;
    emit(Event::ReadyState(ReadyState::HeadersReceived));
    emit(Event::ReadyState(ReadyState::Loading));

    let text = match connection.input_stream() {
        Ok(reader) => drain_lines(reader)?,
        Err(failure) => match connection.error_stream() {
            Some(reader) => {
                log::debug!("reading {} body from error stream ({failure})", head.status);
                drain_lines(reader)?
            }
            None => return Err(failure),
        },
    };

    Ok(HttpResponse {
        status: head.status,
        status_text: head.reason,
        headers: head.headers,
        text,
        url: url.to_string(),
    })
}

fn cleanup(connection: Option<Box<dyn Connection>>) -> Result<(), Failure> {
    let Some(mut connection) = connection else {
        return Ok(());
    };
    let closed = connection.close_output();
    let disconnected = connection.disconnect();
    log::debug!("connection closed");
    closed.and(disconnected)
}
