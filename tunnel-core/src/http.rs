//! # Admission-Time HTTP Parsing (§4.3 step 1-2, §6.2)
//!
//! Peels exactly one HTTP request off the prefix of a freshly accepted
//! public socket, without consuming bytes that belong to the body. The
//! parsed header block is re-serialized canonically; the re-serialized
//! bytes become the first forwarded chunk, and any body bytes that arrived
//! in the same read are preserved for the caller's subsequent reads.

use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::CoreError;

/// Refuse to buffer more than this much of a request's header block before
/// giving up — bounds memory for a slow or hostile peer (mirrors the
/// `MAX_HEADER_BYTES` guard in the pack's httproxy reference).
const MAX_HEADER_BYTES: usize = 32 * 1024;
const MAX_HEADERS: usize = 64;

/// Result of peeling the first request off a public socket.
pub struct AdmittedRequest {
    /// The leading label of the `Host` header, lowercased — the routing
    /// key (§4.3 step 2).
    pub subdomain: String,
    /// Canonical re-serialization of the request line and headers,
    /// including the trailing blank line (§6.2). This is the first chunk
    /// forwarded to the agent.
    pub canonical_bytes: Vec<u8>,
}

/// Wraps an `AsyncRead` so that bytes read past the end of the HTTP header
/// block (i.e. the start of the request body, or pipelined data) are
/// replayed to subsequent reads before falling through to the inner
/// stream. This is how the parser avoids consuming body bytes it has no
/// business touching.
pub struct PushbackReader<S> {
    inner: S,
    leftover: Vec<u8>,
    leftover_pos: usize,
}

impl<S> PushbackReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            leftover: Vec::new(),
            leftover_pos: 0,
        }
    }

    fn push_back(&mut self, bytes: Vec<u8>) {
        self.leftover = bytes;
        self.leftover_pos = 0;
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PushbackReader<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.leftover_pos < self.leftover.len() {
            let remaining = &self.leftover[self.leftover_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            self.leftover_pos += n;
            if self.leftover_pos == self.leftover.len() {
                self.leftover.clear();
                self.leftover_pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Reads and parses the first HTTP request off `reader`, preserving any
/// trailing body/pipelined bytes on `reader` for the caller's own reads
/// (§4.3 step 1).
pub async fn admit_request<S: AsyncRead + Unpin>(
    reader: &mut PushbackReader<S>,
) -> Result<AdmittedRequest, CoreError> {
    let mut acc: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req
            .parse(&acc)
            .map_err(|e| CoreError::MalformedRequest(e.to_string()))?
        {
            httparse::Status::Complete(header_len) => {
                let host = find_host(req.headers)
                    .ok_or_else(|| CoreError::MalformedRequest("missing Host header".into()))?;
                let subdomain = first_label(&host);
                let canonical_bytes = canonicalize(&req, req.headers);

                let body_prefix = acc[header_len..].to_vec();
                reader.push_back(body_prefix);

                return Ok(AdmittedRequest {
                    subdomain,
                    canonical_bytes,
                });
            }
            httparse::Status::Partial => {
                if acc.len() >= MAX_HEADER_BYTES {
                    return Err(CoreError::MalformedRequest(
                        "request header block exceeded size limit".into(),
                    ));
                }
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    return Err(CoreError::MalformedRequest(
                        "connection closed before headers completed".into(),
                    ));
                }
                acc.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

fn find_host(headers: &[httparse::Header<'_>]) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(|v| v.trim().to_string())
}

/// The first dot-separated label of a `Host` header value, lowercased,
/// with any `:port` suffix stripped first (§4.3 step 2).
fn first_label(host: &str) -> String {
    let without_port = host.split(':').next().unwrap_or(host);
    without_port
        .split('.')
        .next()
        .unwrap_or(without_port)
        .to_ascii_lowercase()
}

/// Re-serializes the parsed request line and headers verbatim (§4.3
/// step 1, §6.2): `METHOD PATH HTTP/1.v\r\n` followed by each header and a
/// trailing blank line.
fn canonicalize(req: &httparse::Request<'_, '_>, headers: &[httparse::Header<'_>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    let method = req.method.unwrap_or("GET");
    let path = req.path.unwrap_or("/");
    let version = req.version.unwrap_or(1);
    out.extend_from_slice(format!("{method} {path} HTTP/1.{version}\r\n").as_bytes());
    for header in headers {
        if header.name.is_empty() {
            continue;
        }
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(header.value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn extracts_subdomain_from_host_header() {
        let raw = b"GET / HTTP/1.1\r\nHost: alpha.example\r\nConnection: close\r\n\r\n".to_vec();
        let mut reader = PushbackReader::new(Cursor::new(raw));
        let admitted = admit_request(&mut reader).await.unwrap();
        assert_eq!(admitted.subdomain, "alpha");
        assert!(admitted.canonical_bytes.starts_with(b"GET / HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn strips_port_from_host_before_taking_the_label() {
        let raw = b"GET / HTTP/1.1\r\nHost: alpha.example:8080\r\n\r\n".to_vec();
        let mut reader = PushbackReader::new(Cursor::new(raw));
        let admitted = admit_request(&mut reader).await.unwrap();
        assert_eq!(admitted.subdomain, "alpha");
    }

    #[tokio::test]
    async fn body_bytes_delivered_in_the_same_read_are_preserved() {
        let raw =
            b"POST / HTTP/1.1\r\nHost: alpha.example\r\nContent-Length: 2\r\n\r\nhi".to_vec();
        let mut reader = PushbackReader::new(Cursor::new(raw));
        let admitted = admit_request(&mut reader).await.unwrap();
        assert_eq!(admitted.subdomain, "alpha");
        assert!(!admitted.canonical_bytes.ends_with(b"hi"));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"hi");
    }

    #[tokio::test]
    async fn missing_host_header_is_rejected() {
        let raw = b"GET / HTTP/1.1\r\n\r\n".to_vec();
        let mut reader = PushbackReader::new(Cursor::new(raw));
        assert!(admit_request(&mut reader).await.is_err());
    }
}
