//! One HTTP/1.1 request/response exchange over a blocking socket.
//!
//! # Design
//! `Connection` mirrors the staged lifecycle the executor drives: bind
//! method and URL (`Connector::open`), configure, `connect`, write the body
//! through a fixed-length sink, read the status, then drain either the
//! success or the error stream, and finally `disconnect`. A connection is
//! used for exactly one exchange and always sends `Connection: close`.
//!
//! The declared body length is enforced by the sink: writing past it, or
//! closing the sink short of it, is an error rather than a silent
//! truncation or a hang waiting for bytes that never come.
//!
//! Responses with status >= 400 refuse `input_stream` and expose their body
//! through `error_stream` only.

use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use url::{Host, Url};

use crate::config::{ConnectOptions, Proxy};
use crate::error::Failure;
use crate::http::{Headers, HttpMethod};
use crate::socks;

/// Opens connections. Shared with the worker thread.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        method: HttpMethod,
        url: &Url,
        proxy: Option<&Proxy>,
    ) -> Result<Box<dyn Connection>, Failure>;
}

/// A single, non-reusable request/response cycle.
pub trait Connection: Send {
    fn set_timeouts(&mut self, options: &ConnectOptions);

    fn set_request_property(&mut self, name: &str, value: &str);

    /// Declare the exact number of body bytes that will be written.
    fn set_fixed_length_streaming_mode(&mut self, length: u64);

    /// Perform the network handshake (TCP, proxy, TLS) and send the
    /// request head.
    fn connect(&mut self) -> Result<(), Failure>;

    fn output_stream(&mut self) -> Result<&mut dyn Write, Failure>;

    /// Finish the body. A no-op when no sink was opened or it is already
    /// closed.
    fn close_output(&mut self) -> Result<(), Failure>;

    fn response_head(&mut self) -> Result<ResponseHead, Failure>;

    /// Body of a successful response.
    fn input_stream(&mut self) -> Result<&mut dyn BufRead, Failure>;

    /// Body of an error response (status >= 400), if any.
    fn error_stream(&mut self) -> Option<&mut dyn BufRead>;

    fn disconnect(&mut self) -> Result<(), Failure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Default connector: plain TCP or rustls, optionally through SOCKS5.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(
        &self,
        method: HttpMethod,
        url: &Url,
        proxy: Option<&Proxy>,
    ) -> Result<Box<dyn Connection>, Failure> {
        Ok(Box::new(HttpConnection::open(method, url.clone(), proxy.cloned())?))
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

pub struct HttpConnection {
    method: HttpMethod,
    url: Url,
    proxy: Option<Proxy>,
    options: ConnectOptions,
    headers: Headers,
    fixed_length: Option<u64>,
    // second handle on the socket so teardown works whatever phase owns the stream
    socket: Option<TcpStream>,
    stream: Option<Stream>,
    sink: Option<FixedLengthWriter<Stream>>,
    head: Option<ResponseHead>,
    body: Option<BufReader<BodyReader<BufReader<Stream>>>>,
}

impl HttpConnection {
    /// Bind method and URL. No network activity happens here.
    pub fn open(method: HttpMethod, url: Url, proxy: Option<Proxy>) -> Result<Self, Failure> {
        if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
            return Err(Failure::UnsupportedUrl(url.to_string()));
        }
        Ok(Self {
            method,
            url,
            proxy,
            options: ConnectOptions::default(),
            headers: Headers::new(),
            fixed_length: None,
            socket: None,
            stream: None,
            sink: None,
            head: None,
            body: None,
        })
    }

    fn request_head(&self) -> io::Result<Vec<u8>> {
        let mut target = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }
        let mut head = format!("{} {target} HTTP/1.1\r\n", self.method);
        if !self.headers.contains_ignore_case("Host") {
            let host = self.url.host_str().unwrap_or_default();
            match self.url.port() {
                Some(port) => head.push_str(&format!("Host: {host}:{port}\r\n")),
                None => head.push_str(&format!("Host: {host}\r\n")),
            }
        }
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Connection") {
                continue;
            }
            if [name, value].iter().any(|s| s.contains(['\r', '\n'])) || name.is_empty() {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid header {name:?}"),
                ));
            }
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        match self.fixed_length {
            Some(len) if len > 0 || self.method.permits_body() => {
                head.push_str(&format!("Content-Length: {len}\r\n"));
            }
            _ => {}
        }
        head.push_str("Connection: close\r\n\r\n");
        Ok(head.into_bytes())
    }

    fn set_socket_timeouts(socket: &TcpStream, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        socket.set_read_timeout(read)?;
        socket.set_write_timeout(write)
    }
}

impl Connection for HttpConnection {
    fn set_timeouts(&mut self, options: &ConnectOptions) {
        self.options = *options;
    }

    fn set_request_property(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
    }

    fn set_fixed_length_streaming_mode(&mut self, length: u64) {
        self.fixed_length = Some(length);
    }

    fn connect(&mut self) -> Result<(), Failure> {
        let host = self
            .url
            .host()
            .ok_or_else(|| Failure::UnsupportedUrl(self.url.to_string()))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| Failure::UnsupportedUrl(self.url.to_string()))?;
        let connect_timeout = self.options.connect_timeout();

        let tcp = match &self.proxy {
            Some(proxy) => {
                log::debug!("connecting to {host}:{port} via socks5 {}:{}", proxy.host, proxy.port);
                let mut tcp = tcp_connect(&Host::Domain(proxy.host.as_str()), proxy.port, connect_timeout)?;
                Self::set_socket_timeouts(&tcp, connect_timeout, connect_timeout)?;
                socks::connect(&mut tcp, proxy, &host, port)?;
                tcp
            }
            None => {
                log::debug!("connecting to {host}:{port}");
                let tcp = tcp_connect(&host, port, connect_timeout)?;
                Self::set_socket_timeouts(&tcp, connect_timeout, connect_timeout)?;
                tcp
            }
        };
        tcp.set_nodelay(true)?;
        let socket = tcp.try_clone()?;

        let mut stream = if self.url.scheme() == "https" {
            Stream::Tls(Box::new(tls_handshake(tcp, &host)?))
        } else {
            Stream::Plain(tcp)
        };
        Self::set_socket_timeouts(&socket, self.options.read_timeout(), self.options.write_timeout())?;
        self.socket = Some(socket);

        stream.write_all(&self.request_head()?)?;
        stream.flush()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn output_stream(&mut self) -> Result<&mut dyn Write, Failure> {
        if self.sink.is_none() {
            let declared = self.fixed_length.ok_or_else(|| {
                io::Error::new(ErrorKind::InvalidInput, "request body length was not declared")
            })?;
            let stream = self.stream.take().ok_or_else(not_connected)?;
            self.sink = Some(FixedLengthWriter::new(stream, declared));
        }
        match self.sink.as_mut() {
            Some(sink) => Ok(sink as &mut dyn Write),
            None => Err(not_connected().into()),
        }
    }

    fn close_output(&mut self) -> Result<(), Failure> {
        if let Some(sink) = self.sink.take() {
            self.stream = Some(sink.finish()?);
        }
        Ok(())
    }

    fn response_head(&mut self) -> Result<ResponseHead, Failure> {
        if let Some(head) = &self.head {
            return Ok(head.clone());
        }
        self.close_output()?;
        let stream = self.stream.take().ok_or_else(not_connected)?;
        let mut reader = BufReader::new(stream);
        let head = read_head(&mut reader)?;
        log::debug!("response {} {} from {}", head.status, head.reason, self.url);
        let framing = Framing::for_response(self.method, &head);
        self.body = Some(BufReader::new(BodyReader::new(reader, framing)));
        self.head = Some(head.clone());
        Ok(head)
    }

    fn input_stream(&mut self) -> Result<&mut dyn BufRead, Failure> {
        let head = self.response_head()?;
        if head.status >= 400 {
            return Err(io::Error::other(format!("HTTP {} {}", head.status, head.reason)).into());
        }
        match self.body.as_mut() {
            Some(body) => Ok(body as &mut dyn BufRead),
            None => Err(not_connected().into()),
        }
    }

    fn error_stream(&mut self) -> Option<&mut dyn BufRead> {
        match &self.head {
            Some(head) if head.status >= 400 => self.body.as_mut().map(|b| b as &mut dyn BufRead),
            _ => None,
        }
    }

    fn disconnect(&mut self) -> Result<(), Failure> {
        self.sink = None;
        self.body = None;
        self.stream = None;
        if let Some(socket) = self.socket.take() {
            match socket.shutdown(Shutdown::Both) {
                Err(err) if err.kind() != ErrorKind::NotConnected => return Err(err.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

fn not_connected() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "connection is not established")
}

fn resolve(host: &Host<&str>, port: u16) -> io::Result<Vec<SocketAddr>> {
    match host {
        Host::Domain(domain) => Ok((*domain, port).to_socket_addrs()?.collect()),
        Host::Ipv4(ip) => Ok(vec![SocketAddr::new(IpAddr::V4(*ip), port)]),
        Host::Ipv6(ip) => Ok(vec![SocketAddr::new(IpAddr::V6(*ip), port)]),
    }
}

fn tcp_connect(host: &Host<&str>, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in resolve(host, port)? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                log::debug!("connect to {addr} failed: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(ErrorKind::AddrNotAvailable, format!("no addresses found for {host}"))
    }))
}

fn tls_config() -> Result<Arc<ClientConfig>, Failure> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    if let Some(config) = CONFIG.get() {
        return Ok(config.clone());
    }
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(Failure::Tls)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(CONFIG.get_or_init(|| Arc::new(config)).clone())
}

/// Complete the TLS handshake eagerly so certificate problems surface while
/// connecting instead of on the first body write.
fn tls_handshake(
    mut tcp: TcpStream,
    host: &Host<&str>,
) -> Result<StreamOwned<ClientConnection, TcpStream>, Failure> {
    let name = match host {
        Host::Domain(domain) => ServerName::try_from(domain.to_string())
            .map_err(|err| Failure::UnsupportedUrl(format!("{domain}: {err}")))?,
        Host::Ipv4(ip) => ServerName::from(IpAddr::V4(*ip)),
        Host::Ipv6(ip) => ServerName::from(IpAddr::V6(*ip)),
    };
    let mut conn = ClientConnection::new(tls_config()?, name).map_err(Failure::Tls)?;
    while conn.is_handshaking() {
        if let Err(err) = conn.complete_io(&mut tcp) {
            return Err(match err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) {
                Some(tls) => Failure::Tls(tls.clone()),
                None => Failure::Io(err),
            });
        }
    }
    Ok(StreamOwned::new(conn, tcp))
}

/// Enforces the declared request body length.
pub(crate) struct FixedLengthWriter<W> {
    inner: W,
    declared: u64,
    written: u64,
}

impl<W: Write> FixedLengthWriter<W> {
    pub(crate) fn new(inner: W, declared: u64) -> Self {
        Self {
            inner,
            declared,
            written: 0,
        }
    }

    /// Flush and hand back the stream, failing if fewer bytes than declared
    /// were written.
    pub(crate) fn finish(mut self) -> io::Result<W> {
        if self.written != self.declared {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "insufficient data written: declared {} bytes, wrote {}",
                    self.declared, self.written
                ),
            ));
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for FixedLengthWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.declared {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "too many bytes written: declared {} bytes, attempted {}",
                    self.declared,
                    self.written + buf.len() as u64
                ),
            ));
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(u64),
    Chunked { remaining: u64, done: bool },
    UntilClose,
}

impl Framing {
    fn for_response(method: HttpMethod, head: &ResponseHead) -> Self {
        if method == HttpMethod::Head || matches!(head.status, 100..=199 | 204 | 304) {
            return Framing::Empty;
        }
        if head
            .header("Transfer-Encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
        {
            return Framing::Chunked {
                remaining: 0,
                done: false,
            };
        }
        match head.header("Content-Length").and_then(|v| v.trim().parse().ok()) {
            Some(len) => Framing::Length(len),
            None => Framing::UntilClose,
        }
    }
}

/// Decodes the response body according to its framing.
struct BodyReader<R> {
    inner: R,
    framing: Framing,
}

impl<R: BufRead> BodyReader<R> {
    fn new(inner: R, framing: Framing) -> Self {
        Self { inner, framing }
    }
}

impl<R: BufRead> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match &mut self.framing {
            Framing::Empty => Ok(0),
            Framing::UntilClose => self.inner.read(buf),
            Framing::Length(remaining) => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let max = (*remaining).min(buf.len() as u64) as usize;
                let n = self.inner.read(&mut buf[..max])?;
                if n == 0 {
                    return Err(truncated_body());
                }
                *remaining -= n as u64;
                Ok(n)
            }
            Framing::Chunked { remaining, done } => {
                if *done {
                    return Ok(0);
                }
                if *remaining == 0 {
                    let size = read_chunk_size(&mut self.inner)?;
                    if size == 0 {
                        // trailers end with an empty line
                        while let Some(line) = read_line(&mut self.inner)? {
                            if line.is_empty() {
                                break;
                            }
                        }
                        *done = true;
                        return Ok(0);
                    }
                    *remaining = size;
                }
                let max = (*remaining).min(buf.len() as u64) as usize;
                let n = self.inner.read(&mut buf[..max])?;
                if n == 0 {
                    return Err(truncated_body());
                }
                *remaining -= n as u64;
                if *remaining == 0 {
                    read_line(&mut self.inner)?;
                }
                Ok(n)
            }
        }
    }
}

fn truncated_body() -> io::Error {
    io::Error::new(ErrorKind::UnexpectedEof, "connection closed before end of body")
}

fn read_chunk_size<R: BufRead>(reader: &mut R) -> io::Result<u64> {
    let line = read_line(reader)?.ok_or_else(truncated_body)?;
    let size = line.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| {
        io::Error::new(ErrorKind::InvalidData, format!("invalid chunk size {size:?}"))
    })
}

/// One line without its terminator, `None` at end of stream.
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    trim_line_ending(&mut buf);
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn trim_line_ending(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}

fn read_head<R: BufRead>(reader: &mut R) -> io::Result<ResponseHead> {
    loop {
        let line = read_line(reader)?.ok_or_else(|| {
            io::Error::new(ErrorKind::UnexpectedEof, "server closed connection without a response")
        })?;
        let mut head = parse_status_line(&line)?;
        while let Some(line) = read_line(reader)? {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                head.headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        // interim 1xx responses precede the real one
        if (100..200).contains(&head.status) && head.status != 101 {
            continue;
        }
        return Ok(head);
    }
}

fn parse_status_line(line: &str) -> io::Result<ResponseHead> {
    let invalid = || io::Error::new(ErrorKind::InvalidData, format!("invalid status line {line:?}"));
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(invalid());
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(invalid)?;
    let reason = parts.next().unwrap_or_default().trim().to_string();
    Ok(ResponseHead {
        status,
        reason,
        headers: Vec::new(),
    })
}

/// Drain `reader` line by line, appending `\n` after every line.
pub fn drain_lines(reader: &mut dyn BufRead) -> io::Result<String> {
    let mut text = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(text);
        }
        trim_line_ending(&mut line);
        text.push_str(&String::from_utf8_lossy(&line));
        text.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    fn body_of(raw: &str, framing: Framing) -> io::Result<String> {
        let mut reader = BodyReader::new(Cursor::new(raw.as_bytes().to_vec()), framing);
        let mut out = String::new();
        reader.read_to_string(&mut out)?;
        Ok(out)
    }

    #[test]
    fn parses_status_line_and_headers() {
        let raw = "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nX-A:  b \r\n\r\nbody";
        let mut reader = Cursor::new(raw.as_bytes());
        let head = read_head(&mut reader).unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(head.header("content-type"), Some("text/plain"));
        assert_eq!(head.header("X-A"), Some("b"));
    }

    #[test]
    fn skips_interim_continue_response() {
        let raw = "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n\r\n";
        let head = read_head(&mut Cursor::new(raw.as_bytes())).unwrap();
        assert_eq!(head.status, 200);
    }

    #[test]
    fn rejects_garbage_status_line() {
        let err = read_head(&mut Cursor::new(&b"SSH-2.0-OpenSSH\r\n"[..])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        let err = read_head(&mut Cursor::new(&b""[..])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn content_length_body_stops_at_length() {
        assert_eq!(body_of("hello world", Framing::Length(5)).unwrap(), "hello");
        let err = body_of("hel", Framing::Length(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn chunked_body_is_decoded() {
        let raw = "5\r\nhello\r\n7;ext=1\r\n, world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let framing = Framing::Chunked {
            remaining: 0,
            done: false,
        };
        assert_eq!(body_of(raw, framing).unwrap(), "hello, world");
    }

    #[test]
    fn framing_follows_method_and_status() {
        let head = |status, headers: &[(&str, &str)]| ResponseHead {
            status,
            reason: String::new(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        assert_eq!(
            Framing::for_response(HttpMethod::Head, &head(200, &[("Content-Length", "10")])),
            Framing::Empty
        );
        assert_eq!(Framing::for_response(HttpMethod::Get, &head(204, &[])), Framing::Empty);
        assert_eq!(
            Framing::for_response(HttpMethod::Get, &head(200, &[("content-length", "10")])),
            Framing::Length(10)
        );
        assert_eq!(
            Framing::for_response(HttpMethod::Get, &head(200, &[("Transfer-Encoding", "Chunked")])),
            Framing::Chunked {
                remaining: 0,
                done: false
            }
        );
        assert_eq!(Framing::for_response(HttpMethod::Get, &head(200, &[])), Framing::UntilClose);
    }

    #[test]
    fn drain_normalizes_line_endings() {
        let mut reader = Cursor::new(&b"a\r\nb\nc"[..]);
        assert_eq!(drain_lines(&mut reader).unwrap(), "a\nb\nc\n");
        let mut empty = Cursor::new(&b""[..]);
        assert_eq!(drain_lines(&mut empty).unwrap(), "");
    }

    #[test]
    fn fixed_length_writer_rejects_overflow_and_underflow() {
        let mut writer = FixedLengthWriter::new(Vec::new(), 4);
        writer.write_all(b"abc").unwrap();
        assert_eq!(writer.write(b"de").unwrap_err().kind(), ErrorKind::InvalidInput);
        assert!(writer.finish().is_err());

        let mut writer = FixedLengthWriter::new(Vec::new(), 3);
        writer.write_all(b"abc").unwrap();
        assert_eq!(writer.finish().unwrap(), b"abc");
    }

    #[test]
    fn request_head_declares_length_and_closes() {
        let url = Url::parse("http://example.com:8080/post?x=1").unwrap();
        let mut conn = HttpConnection::open(HttpMethod::Post, url, None).unwrap();
        conn.set_request_property("Content-Type", "application/json");
        conn.set_request_property("Content-Length", "999");
        conn.set_fixed_length_streaming_mode(2);
        let head = String::from_utf8(conn.request_head().unwrap()).unwrap();
        assert_eq!(
            head,
            "POST /post?x=1 HTTP/1.1\r\n\
             Host: example.com:8080\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 2\r\n\
             Connection: close\r\n\r\n"
        );
    }

    #[test]
    fn get_head_has_no_content_length() {
        let url = Url::parse("http://example.com/get").unwrap();
        let mut conn = HttpConnection::open(HttpMethod::Get, url, None).unwrap();
        conn.set_fixed_length_streaming_mode(0);
        let head = String::from_utf8(conn.request_head().unwrap()).unwrap();
        assert!(!head.contains("Content-Length"));
        assert!(head.starts_with("GET /get HTTP/1.1\r\nHost: example.com\r\n"));
    }

    #[test]
    fn header_injection_is_rejected() {
        let url = Url::parse("http://example.com/").unwrap();
        let mut conn = HttpConnection::open(HttpMethod::Get, url, None).unwrap();
        conn.set_request_property("X-Evil", "a\r\nInjected: yes");
        assert!(conn.request_head().is_err());
    }

    #[test]
    fn open_rejects_non_http_schemes() {
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert!(matches!(
            HttpConnection::open(HttpMethod::Get, url, None),
            Err(Failure::UnsupportedUrl(_))
        ));
    }

    /// Serves one canned response and returns everything the client sent.
    fn serve_once(response: &'static str) -> (Url, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            // read head, then exactly Content-Length body bytes
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                received.extend_from_slice(line.as_bytes());
                if let Some(v) = line.strip_prefix("Content-Length: ") {
                    content_length = v.trim().parse().unwrap();
                }
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            received.extend_from_slice(&body);
            socket.write_all(response.as_bytes()).unwrap();
            received
        });
        (Url::parse(&format!("http://{addr}/path")).unwrap(), handle)
    }

    #[test]
    fn full_exchange_over_loopback() {
        let (url, server) = serve_once("HTTP/1.1 201 Created\r\nContent-Length: 6\r\n\r\nmade\r\n");
        let mut conn = TcpConnector.open(HttpMethod::Put, &url, None).unwrap();
        conn.set_timeouts(&ConnectOptions::new(2000, 2000));
        conn.set_fixed_length_streaming_mode(4);
        conn.connect().unwrap();
        {
            let out = conn.output_stream().unwrap();
            out.write_all(b"da").unwrap();
            out.flush().unwrap();
            out.write_all(b"ta").unwrap();
            out.flush().unwrap();
        }
        conn.close_output().unwrap();
        let head = conn.response_head().unwrap();
        assert_eq!((head.status, head.reason.as_str()), (201, "Created"));
        let text = drain_lines(conn.input_stream().unwrap()).unwrap();
        assert_eq!(text, "made\n");
        conn.disconnect().unwrap();

        let sent = String::from_utf8(server.join().unwrap()).unwrap();
        assert!(sent.starts_with("PUT /path HTTP/1.1\r\n"));
        assert!(sent.ends_with("\r\n\r\ndata"));
    }

    #[test]
    fn error_status_body_is_only_on_error_stream() {
        let (url, server) = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\n\r\nmissing");
        let mut conn = TcpConnector.open(HttpMethod::Get, &url, None).unwrap();
        conn.set_timeouts(&ConnectOptions::new(2000, 2000));
        conn.set_fixed_length_streaming_mode(0);
        conn.connect().unwrap();
        assert_eq!(conn.response_head().unwrap().status, 404);
        assert!(conn.input_stream().is_err());
        let text = drain_lines(conn.error_stream().unwrap()).unwrap();
        assert_eq!(text, "missing\n");
        conn.disconnect().unwrap();
        server.join().unwrap();
    }
}
