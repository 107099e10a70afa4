//! Blocking SOCKS5 client handshake (RFC 1928, RFC 1929 auth).
//!
//! Reply codes are turned into `io::Error` kinds matching what a direct
//! connect would report, so a refused target behind a proxy classifies the
//! same way as a refused target without one.

use std::io::{self, ErrorKind, Read, Write};

use url::Host;

use crate::config::Proxy;

const VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NONE: u8 = 0x00;
const METHOD_USER: u8 = 0x02;

const CMD_TCP_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Run the proxy handshake on an already connected `stream` and ask the
/// proxy to open a TCP connection to `host:port`.
pub(crate) fn connect<S: Read + Write>(
    stream: &mut S,
    proxy: &Proxy,
    host: &Host<&str>,
    port: u16,
) -> io::Result<()> {
    login(stream, proxy)?;
    send_connect(stream, host, port)?;
    recv_reply(stream)
}

fn login<S: Read + Write>(stream: &mut S, proxy: &Proxy) -> io::Result<()> {
    let credentials = proxy.credentials();
    match credentials {
        Some(_) => stream.write_all(&[VERSION, 2, METHOD_NONE, METHOD_USER])?,
        None => stream.write_all(&[VERSION, 1, METHOD_NONE])?,
    }
    stream.flush()?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply)?;
    if reply[0] != VERSION {
        return Err(invalid_version(reply[0]));
    }
    match (reply[1], credentials) {
        (METHOD_NONE, _) => Ok(()),
        (METHOD_USER, Some((username, password))) => proceed_with_user(stream, username, password),
        _ => Err(io::Error::new(
            ErrorKind::PermissionDenied,
            "socks5: no acceptable auth method",
        )),
    }
}

fn proceed_with_user<S: Read + Write>(stream: &mut S, username: &str, password: &str) -> io::Result<()> {
    let (user, pass) = (username.as_bytes(), password.as_bytes());
    if user.len() > 255 || pass.len() > 255 {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "socks5: username or password too long",
        ));
    }
    let mut buf = Vec::with_capacity(3 + user.len() + pass.len());
    buf.push(AUTH_VERSION);
    buf.push(user.len() as u8);
    buf.extend_from_slice(user);
    buf.push(pass.len() as u8);
    buf.extend_from_slice(pass);
    stream.write_all(&buf)?;
    stream.flush()?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply)?;
    if reply[1] != 0x00 {
        return Err(io::Error::new(
            ErrorKind::PermissionDenied,
            "socks5: authentication rejected",
        ));
    }
    Ok(())
}

fn send_connect<S: Write>(stream: &mut S, host: &Host<&str>, port: u16) -> io::Result<()> {
    let mut buf = vec![VERSION, CMD_TCP_CONNECT, 0x00];
    match host {
        Host::Ipv4(ip) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        Host::Ipv6(ip) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
        Host::Domain(domain) => {
            let name = domain.as_bytes();
            if name.len() > 255 {
                return Err(io::Error::new(ErrorKind::InvalidInput, "socks5: domain too long"));
            }
            buf.push(ATYP_DOMAIN);
            buf.push(name.len() as u8);
            buf.extend_from_slice(name);
        }
    }
    buf.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&buf)?;
    stream.flush()
}

fn recv_reply<S: Read>(stream: &mut S) -> io::Result<()> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head)?;
    if head[0] != VERSION {
        return Err(invalid_version(head[0]));
    }
    // drain the bound address so the stream is positioned at tunnel data
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            len[0] as usize
        }
        other => {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("socks5: invalid address type {other}"),
            ))
        }
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest)?;

    match head[1] {
        0x00 => Ok(()),
        code => Err(reply_error(code)),
    }
}

fn reply_error(code: u8) -> io::Error {
    let (kind, message) = match code {
        0x01 => (ErrorKind::Other, "General SOCKS server failure"),
        0x02 => (ErrorKind::PermissionDenied, "Connection not allowed by ruleset"),
        0x03 => (ErrorKind::NetworkUnreachable, "Network unreachable"),
        0x04 => (ErrorKind::HostUnreachable, "Host unreachable"),
        0x05 => (ErrorKind::ConnectionRefused, "Connection refused"),
        0x06 => (ErrorKind::TimedOut, "TTL expired"),
        0x07 => (ErrorKind::Unsupported, "Command not supported"),
        0x08 => (ErrorKind::Unsupported, "Address type not supported"),
        0x09 => (ErrorKind::TimedOut, "Connection attempt timed out"),
        _ => (ErrorKind::Other, "unassigned reply code"),
    };
    io::Error::new(kind, format!("socks5: {message}"))
}

fn invalid_version(version: u8) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidData,
        format!("socks5: unexpected version {version}"),
    )
}
