use std::collections::BTreeMap;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult, DistributedError};

use super::control::ControlError;

const MAX_REQUEST_BYTES: usize = 1024 * 1024;
const READ_CHUNK_BYTES: usize = 1024;

pub(super) struct HttpRequest {
    pub(super) method: String,
    pub(super) path: String,
    pub(super) query: BTreeMap<String, String>,
    pub(super) body: Vec<u8>,
}

pub(super) async fn read_http_request<S>(socket: &mut S) -> Result<HttpRequest, ControlError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK_BYTES);
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    let header_end = loop {
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| ControlError::bad_request(format!("Failed to read request: {}", err)))?;
        if bytes == 0 {
            return Err(ControlError::bad_request("Empty request"));
        }
        let read_slice = chunk
            .get(..bytes)
            .ok_or_else(|| ControlError::bad_request("Invalid read length"))?;
        buffer.extend_from_slice(read_slice);
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(ControlError::new(413, "Request too large"));
        }
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
    };

    let header_bytes = buffer
        .get(..header_end)
        .ok_or_else(|| ControlError::bad_request("Malformed request headers"))?;
    let header_text = std::str::from_utf8(header_bytes)
        .map_err(|err| ControlError::bad_request(format!("Invalid request encoding: {}", err)))?;
    let mut lines = header_text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| ControlError::bad_request("Missing request line"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ControlError::bad_request("Missing HTTP method"))?;
    let target = parts
        .next()
        .ok_or_else(|| ControlError::bad_request("Missing request path"))?;

    let mut content_length = 0usize;
    for line in lines.filter(|line| !line.is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            return Err(ControlError::bad_request("Malformed header"));
        };
        if key.trim().eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse::<usize>()
                .map_err(|_err| ControlError::bad_request("Invalid Content-Length"))?;
        }
    }
    if content_length > MAX_REQUEST_BYTES {
        return Err(ControlError::new(413, "Request body too large"));
    }

    let body_start = header_end
        .checked_add(4)
        .ok_or_else(|| ControlError::bad_request("Malformed request headers"))?;
    let mut body = buffer.get(body_start..).unwrap_or_default().to_vec();
    while body.len() < content_length {
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| ControlError::bad_request(format!("Failed to read body: {}", err)))?;
        if bytes == 0 {
            break;
        }
        let read_slice = chunk
            .get(..bytes)
            .ok_or_else(|| ControlError::bad_request("Invalid read length"))?;
        body.extend_from_slice(read_slice);
    }
    body.truncate(content_length);

    let (path, query) = split_target(target);
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path: path.to_ascii_lowercase(),
        query,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Splits `/path?a=1&b=2`. Query values are taken verbatim.
fn split_target(target: &str) -> (&str, BTreeMap<String, String>) {
    let Some((path, raw_query)) = target.split_once('?') else {
        return (target, BTreeMap::new());
    };
    let query = raw_query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_ascii_lowercase(), value.to_owned()),
            None => (pair.to_ascii_lowercase(), String::new()),
        })
        .collect();
    (path, query)
}

const fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

pub(super) async fn write_json_response<S, T>(socket: &mut S, status: u16, value: &T) -> AppResult<()>
where
    S: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value).map_err(|err| {
        AppError::distributed(DistributedError::Serialize {
            context: "control response",
            source: err,
        })
    })?;
    write_response(socket, status, &body).await
}

pub(super) async fn write_error_response<S>(socket: &mut S, error: &ControlError) -> AppResult<()>
where
    S: AsyncWrite + Unpin,
{
    #[derive(Serialize)]
    struct ErrorResponse<'msg> {
        error: &'msg str,
    }
    write_json_response(
        socket,
        error.status,
        &ErrorResponse {
            error: &error.message,
        },
    )
    .await
}

async fn write_response<S>(socket: &mut S, status: u16, body: &[u8]) -> AppResult<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len()
    );
    socket.write_all(head.as_bytes()).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "write control response",
            source: err,
        })
    })?;
    socket.write_all(body).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "write control response body",
            source: err,
        })
    })?;
    socket.flush().await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "flush control response",
            source: err,
        })
    })
}
