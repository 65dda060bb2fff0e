//! HTTP+JSON access to the analysis/storage service.

use allelescope_protocol::{
    AlleleUpdate, ChannelArrays, ErrorBody, RawDataResponse, SampleSummary, alleles_path,
    channel_path, raw_data_path, sample_path,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::sample::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Connection refused, timeout, broken body.
    Transport,
    /// Non-2xx response.
    Status(u16),
    Decode,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Status(code),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: RemoteErrorKind::Cancelled,
            message: "request abandoned".to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::Status(404)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RemoteErrorKind::Status(code) => write!(f, "HTTP {code}: {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// The remote collaborator. Implementations must be shareable with worker threads.
pub trait SampleStore: Send + Sync {
    fn fetch_summary(&self, sample_id: &str) -> Result<SampleSummary, RemoteError>;

    /// Bulk arrays for every channel. Services without this route answer 404.
    fn fetch_raw_data(&self, sample_id: &str) -> Result<RawDataResponse, RemoteError>;

    fn fetch_channel(
        &self,
        sample_id: &str,
        channel: ChannelId,
    ) -> Result<ChannelArrays, RemoteError>;

    /// Full replacement of the sample's calls.
    fn put_alleles(&self, update: &AlleleUpdate) -> Result<(), RemoteError>;
}

pub fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    Some(with_scheme.trim_end_matches('/').to_string())
}

fn encode_path_segment(segment: &str) -> String {
    let mut ret = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            ret.push(byte as char);
        } else {
            ret.push_str(&format!("%{byte:02X}"));
        }
    }
    ret
}

fn classify_http_error(status: reqwest::StatusCode, body: &str) -> RemoteError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail_text())
        .unwrap_or_else(|| body.trim().to_string());
    let message = if detail.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        detail
    };
    RemoteError::status(status.as_u16(), message)
}

fn send_error(e: reqwest::Error, url: &str) -> RemoteError {
    RemoteError::transport(format!("request to {url} failed: {e}"))
}

pub struct HttpSampleStore {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpSampleStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = normalize_base_url(base_url)
            .ok_or_else(|| RemoteError::transport("service base URL is empty"))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::transport(format!("could not build HTTP client: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn read_body(response: reqwest::blocking::Response, url: &str) -> Result<String, RemoteError> {
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| RemoteError::transport(format!("could not read body of {url}: {e}")))?;
        if !status.is_success() {
            return Err(classify_http_error(status, &body));
        }
        Ok(body)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let url = self.url(path);
        debug!(url = url.as_str(), "GET");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| send_error(e, &url))?;
        let body = Self::read_body(response, &url)?;
        serde_json::from_str(&body).map_err(|e| RemoteError {
            kind: RemoteErrorKind::Decode,
            message: format!("{url} returned invalid JSON: {e}"),
        })
    }
}

impl SampleStore for HttpSampleStore {
    fn fetch_summary(&self, sample_id: &str) -> Result<SampleSummary, RemoteError> {
        self.get_json(&sample_path(&encode_path_segment(sample_id)))
    }

    fn fetch_raw_data(&self, sample_id: &str) -> Result<RawDataResponse, RemoteError> {
        self.get_json(&raw_data_path(&encode_path_segment(sample_id)))
    }

    fn fetch_channel(
        &self,
        sample_id: &str,
        channel: ChannelId,
    ) -> Result<ChannelArrays, RemoteError> {
        self.get_json(&channel_path(
            &encode_path_segment(sample_id),
            &channel.key(),
        ))
    }

    fn put_alleles(&self, update: &AlleleUpdate) -> Result<(), RemoteError> {
        let url = self.url(&alleles_path(&encode_path_segment(&update.sample_id)));
        debug!(url = url.as_str(), markers = update.alleles.len(), "PUT");
        let response = self
            .client
            .put(&url)
            .json(update)
            .send()
            .map_err(|e| send_error(e, &url))?;
        Self::read_body(response, &url).map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    struct Exchange {
        request_line: String,
        body: String,
    }

    /// Serves one canned response per connection and reports what it received.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<Vec<Exchange>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut seen = vec![];
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buffer = vec![];
                let mut chunk = [0u8; 4096];
                let (head_end, content_length) = loop {
                    let read = stream.read(&mut chunk).unwrap();
                    buffer.extend_from_slice(&chunk[..read]);
                    let text = String::from_utf8_lossy(&buffer).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                let (name, value) = l.split_once(':')?;
                                name.eq_ignore_ascii_case("content-length")
                                    .then(|| value.trim().parse::<usize>().ok())?
                            })
                            .unwrap_or(0);
                        break (end + 4, length);
                    }
                    if read == 0 {
                        break (buffer.len(), 0);
                    }
                };
                while buffer.len() < head_end + content_length {
                    let read = stream.read(&mut chunk).unwrap();
                    if read == 0 {
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..read]);
                }
                let text = String::from_utf8_lossy(&buffer).to_string();
                seen.push(Exchange {
                    request_line: text.lines().next().unwrap_or_default().to_string(),
                    body: text[head_end.min(text.len())..].to_string(),
                });
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    fn store(base_url: &str) -> HttpSampleStore {
        HttpSampleStore::new(base_url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_fetch_summary_over_http() {
        let (url, server) = serve(vec![(200, r#"{"id":"s 1","metadata":{"sample_name":"A1"}}"#)]);
        let summary = store(&url).fetch_summary("s 1").unwrap();
        assert_eq!(summary.id, "s 1");
        assert_eq!(summary.metadata.sample_name.as_deref(), Some("A1"));
        let seen = server.join().unwrap();
        assert_eq!(seen[0].request_line, "GET /api/samples/s%201 HTTP/1.1");
    }

    #[test]
    fn test_error_detail_and_status_are_kept() {
        let (url, server) = serve(vec![(404, r#"{"detail":"Sample not found"}"#)]);
        let err = store(&url).fetch_raw_data("x").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message, "Sample not found");
        assert_eq!(err.to_string(), "HTTP 404: Sample not found");
        server.join().unwrap();
    }

    #[test]
    fn test_invalid_json_is_a_decode_error() {
        let (url, server) = serve(vec![(200, "not json")]);
        let err = store(&url).fetch_channel("x", ChannelId(2)).unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Decode);
        let seen = server.join().unwrap();
        assert!(seen[0].request_line.contains("/api/samples/x/channel/channel_2"));
    }

    #[test]
    fn test_put_alleles_sends_full_body() {
        let (url, server) = serve(vec![(200, "{}"), (503, "")]);
        let store = store(&url);
        let mut update = AlleleUpdate {
            sample_id: "s".to_string(),
            ..Default::default()
        };
        update.alleles.insert(
            "D3S1358".to_string(),
            serde_json::from_str(r#"{"allele1":"12","allele2":"14"}"#).unwrap(),
        );
        store.put_alleles(&update).unwrap();
        let err = store.put_alleles(&update).unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Status(503));
        let seen = server.join().unwrap();
        assert!(seen[0].request_line.starts_with("PUT /api/samples/s/alleles"));
        let sent: AlleleUpdate = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(sent, update);
    }

    #[test]
    fn test_unreachable_service_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = store(&format!("{addr}")).fetch_summary("s").unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Transport);
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url(" localhost:8888/ ").as_deref(),
            Some("http://localhost:8888")
        );
        assert_eq!(normalize_base_url("   "), None);
        assert_eq!(encode_path_segment("a/b c"), "a%2Fb%20c");
    }
}
