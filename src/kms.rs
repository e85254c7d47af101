use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use zeroize::Zeroizing;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result, Status};

/// Hint returned before the response headers have been parsed.
const DEFAULT_BYTES_NEEDED: usize = 1024;

/// How many body bytes to quote when the KMS answers with an error.
const ERROR_EXCERPT_LEN: usize = 160;

/// Which JSON field of the response body carries the key bytes, and which
/// base64 alphabet it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseField {
    /// AWS `Decrypt` → `Plaintext` (standard base64).
    AwsPlaintext,
    /// AWS `Encrypt` → `CiphertextBlob`.
    AwsCiphertextBlob,
    /// Azure wrap/unwrap → `value` (base64url, no padding).
    AzureValue,
    /// GCP `decrypt` → `plaintext`.
    GcpPlaintext,
    /// GCP `encrypt` → `ciphertext`.
    GcpCiphertext,
}

impl ResponseField {
    fn name(self) -> &'static str {
        match self {
            ResponseField::AwsPlaintext => "Plaintext",
            ResponseField::AwsCiphertextBlob => "CiphertextBlob",
            ResponseField::AzureValue => "value",
            ResponseField::GcpPlaintext => "plaintext",
            ResponseField::GcpCiphertext => "ciphertext",
        }
    }

    fn decode(self, raw: &str) -> Result<Vec<u8>> {
        let decoded = match self {
            ResponseField::AzureValue => URL_SAFE_NO_PAD.decode(raw),
            _ => STANDARD.decode(raw),
        };
        decoded.map_err(|_| {
            Error::kms(format!(
                "KMS response field \"{}\" is not valid base64",
                self.name()
            ))
        })
    }
}

/// One KMS exchange: request bytes out, HTTP/1.1 response bytes in.
///
/// The host owns the socket and the TLS session; it transmits `message()`
/// to `endpoint()` exactly once and streams the response into `feed()` until
/// `bytes_needed()` reaches zero.
pub struct KmsContext {
    endpoint: Endpoint,
    message: Vec<u8>,
    message_taken: bool,
    buf: Vec<u8>,
    body_start: Option<usize>,
    http_status: Option<u16>,
    content_length: Option<usize>,
    field: ResponseField,
    result: Option<Zeroizing<Vec<u8>>>,
    error: Option<Error>,
    done: bool,
}

impl KmsContext {
    pub(crate) fn new(endpoint: Endpoint, message: Vec<u8>, field: ResponseField) -> Self {
        KmsContext {
            endpoint,
            message,
            message_taken: false,
            buf: Vec::new(),
            body_start: None,
            http_status: None,
            content_length: None,
            field,
            result: None,
            error: None,
            done: false,
        }
    }

    /// Host-and-port the caller must connect to, with TLS.
    pub fn endpoint(&self) -> String {
        self.endpoint.connect_target()
    }

    /// The request bytes. One-shot: the first call drains the buffer and
    /// later calls return empty.
    pub fn message(&mut self) -> Vec<u8> {
        self.message_taken = true;
        std::mem::take(&mut self.message)
    }

    /// How many more response bytes the parser wants; zero means the
    /// exchange is complete. The hint is approximate until the headers have
    /// arrived.
    pub fn bytes_needed(&self) -> usize {
        if self.done || self.error.is_some() {
            return 0;
        }
        match (self.body_start, self.content_length) {
            (Some(start), Some(len)) => (start + len).saturating_sub(self.buf.len()),
            _ => DEFAULT_BYTES_NEEDED,
        }
    }

    /// Append response bytes and parse incrementally. On the final chunk the
    /// body is parsed and the key bytes extracted; malformed or error
    /// responses fail with a kms error.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.done {
            return self.record(Error::client("KMS response already complete"));
        }
        self.buf.extend_from_slice(chunk);
        if self.body_start.is_none() {
            if let Err(e) = self.try_parse_headers() {
                return self.record(e);
            }
        }
        if let (Some(start), Some(len)) = (self.body_start, self.content_length) {
            if self.buf.len() > start + len {
                return self.record(Error::kms("KMS response longer than Content-Length"));
            }
            if self.buf.len() == start + len {
                if let Err(e) = self.finish(start) {
                    return self.record(e);
                }
                self.done = true;
                log::trace!("kms exchange with {} complete", self.endpoint.host());
            }
        }
        Ok(())
    }

    /// Relay a transport failure observed by the host (connect error, TLS
    /// failure, timeout). The subcontext is finished from then on and
    /// `kms_done` will propagate the failure.
    pub fn fail(&mut self, message: &str) {
        if self.error.is_none() && !self.done {
            self.error = Some(Error::network(message.to_string()));
        }
    }

    pub fn status(&self) -> Status {
        match &self.error {
            Some(e) => Status::from(e.clone()),
            None => Status::ok(),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.done || self.error.is_some()
    }

    pub(crate) fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub(crate) fn take_result(&mut self) -> Option<Zeroizing<Vec<u8>>> {
        self.result.take()
    }

    fn record(&mut self, err: Error) -> Result<()> {
        if self.error.is_none() {
            self.error = Some(err.clone());
        }
        Err(err)
    }

    fn try_parse_headers(&mut self) -> Result<()> {
        let Some(end) = find_header_end(&self.buf) else {
            return Ok(());
        };
        let head = std::str::from_utf8(&self.buf[..end])
            .map_err(|_| Error::kms("KMS response headers are not UTF-8"))?;
        let mut lines = head.split("\r\n");
        let status_line = lines
            .next()
            .ok_or_else(|| Error::kms("empty KMS response"))?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        if !version.starts_with("HTTP/1.") {
            return Err(Error::kms("KMS response is not HTTP/1.x"));
        }
        let code: u16 = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| Error::kms("KMS response has no status code"))?;
        let mut content_length = None;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = Some(value.trim().parse::<usize>().map_err(|_| {
                        Error::kms("KMS response has invalid Content-Length")
                    })?);
                }
            }
        }
        let content_length = content_length
            .ok_or_else(|| Error::kms("KMS response missing Content-Length"))?;
        self.http_status = Some(code);
        self.content_length = Some(content_length);
        self.body_start = Some(end + 4);
        Ok(())
    }

    fn finish(&mut self, body_start: usize) -> Result<()> {
        let body = &self.buf[body_start..];
        let code = self.http_status.unwrap_or(0);
        if code >= 300 {
            let excerpt: String = String::from_utf8_lossy(body)
                .chars()
                .take(ERROR_EXCERPT_LEN)
                .collect();
            return Err(Error::kms(format!(
                "KMS responded with HTTP {code}: {excerpt}"
            )));
        }
        let parsed: serde_json::Value = serde_json::from_slice(body)
            .map_err(|_| Error::kms("KMS response body is not valid JSON"))?;
        let raw = parsed
            .get(self.field.name())
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::kms(format!(
                    "KMS response missing field \"{}\"",
                    self.field.name()
                ))
            })?;
        self.result = Some(Zeroizing::new(self.field.decode(raw)?));
        Ok(())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Render an HTTP/1.1 POST request. Shared by the provider builders; the
/// `Content-Length` header is appended automatically.
pub(crate) fn build_post(
    host: &str,
    path_and_query: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(format!("POST {path_and_query} HTTP/1.1\r\n").as_bytes());
    out.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}
