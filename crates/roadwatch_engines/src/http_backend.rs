#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use roadwatch_contracts::identity::BearerToken;
use roadwatch_contracts::media::{
    AckPayload, CameraSourceId, CameraSwitchAck, UploadAck, UploadSource,
};
use roadwatch_contracts::violation::{
    decode_archive, EvidenceRef, StatsPayload, StatsSnapshot, Violation, ViolationPayload,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::backend::{ConsoleBackend, FetchError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub timeout_ms: u32,
    pub user_agent: String,
    /// Upper bound on the rolling feed kept from each `/stats` answer.
    pub recent_violation_cap: usize,
}

impl HttpBackendConfig {
    pub fn mvp_v1() -> Self {
        Self {
            base_url: "http://127.0.0.1:8005".to_string(),
            timeout_ms: 10_000,
            user_agent: concat!("roadwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            recent_violation_cap: 10,
        }
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::mvp_v1();
        if let Ok(v) = env::var("ROADWATCH_BACKEND_URL") {
            let v = v.trim();
            if !v.is_empty() {
                cfg.base_url = v.to_string();
            }
        }
        if let Some(v) = env::var("ROADWATCH_BACKEND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| (100..=120_000).contains(v))
        {
            cfg.timeout_ms = v;
        }
        if let Some(v) = env::var("ROADWATCH_RECENT_CAP")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| (1..=100).contains(v))
        {
            cfg.recent_violation_cap = v;
        }
        cfg
    }
}

/// Client for the monitoring backend. JSON calls use a blocking `ureq` agent on tokio's
/// blocking pool; uploads stream the file through `reqwest` multipart.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: HttpBackendConfig,
    base: Url,
    agent: ureq::Agent,
    uploader: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, String> {
        if config.timeout_ms == 0 {
            return Err("timeout must be > 0".to_string());
        }
        if config.recent_violation_cap == 0 {
            return Err("recent_violation_cap must be > 0".to_string());
        }
        let base = Url::parse(config.base_url.trim())
            .map_err(|e| format!("invalid backend url '{}': {e}", config.base_url))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(format!("backend url must be http(s): {}", config.base_url));
        }
        let timeout = Duration::from_millis(u64::from(config.timeout_ms));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();
        let uploader = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| format!("upload client: {e}"))?;
        Ok(Self {
            config,
            base,
            agent,
            uploader,
        })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    /// `GET /health`; unauthenticated.
    pub async fn health(&self) -> Result<(), FetchError> {
        let agent = self.agent.clone();
        let url = self.endpoint(&["health"])?;
        run_blocking(move || {
            agent
                .get(url.as_str())
                .call()
                .map_err(fetch_error_from_ureq)?;
            Ok(())
        })
        .await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Transport {
                kind: "config_invalid",
                detail: "backend url cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ConsoleBackend for HttpBackend {
    async fn fetch_stats(&self, credential: &BearerToken) -> Result<StatsSnapshot, FetchError> {
        let agent = self.agent.clone();
        let url = self.endpoint(&["stats"])?;
        let auth = bearer_header(credential);
        let cap = self.config.recent_violation_cap;
        run_blocking(move || {
            let response = agent
                .get(url.as_str())
                .set("Authorization", &auth)
                .set("Accept", "application/json")
                .call()
                .map_err(fetch_error_from_ureq)?;
            let payload: StatsPayload = response
                .into_json()
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            match payload {
                StatsPayload::Failure { error } => Err(FetchError::Server(error)),
                StatsPayload::Counters(counters) => counters
                    .into_snapshot(cap)
                    .map_err(|e| FetchError::Decode(e.to_string())),
            }
        })
        .await
    }

    async fn fetch_violations(&self, credential: &BearerToken) -> Result<Vec<Violation>, FetchError> {
        let agent = self.agent.clone();
        let url = self.endpoint(&["violations"])?;
        let auth = bearer_header(credential);
        run_blocking(move || {
            let response = agent
                .get(url.as_str())
                .set("Authorization", &auth)
                .set("Accept", "application/json")
                .call()
                .map_err(fetch_error_from_ureq)?;
            let payloads: Vec<ViolationPayload> = response
                .into_json()
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            decode_archive(payloads).map_err(|e| FetchError::Decode(e.to_string()))
        })
        .await
    }

    async fn switch_camera(
        &self,
        credential: &BearerToken,
        source: &CameraSourceId,
    ) -> Result<CameraSwitchAck, FetchError> {
        let agent = self.agent.clone();
        let url = self.endpoint(&["switch_camera"])?;
        let auth = bearer_header(credential);
        let source = source.clone();
        run_blocking(move || {
            let response = agent
                .post(url.as_str())
                .set("Authorization", &auth)
                .set("Accept", "application/json")
                .send_json(serde_json::json!({ "source": source.as_str() }))
                .map_err(fetch_error_from_ureq)?;
            let ack: AckPayload = response
                .into_json()
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            ack.into_camera_ack(&source).map_err(FetchError::Server)
        })
        .await
    }

    async fn upload(
        &self,
        credential: &BearerToken,
        source: &UploadSource,
    ) -> Result<UploadAck, FetchError> {
        let url = self.endpoint(&["upload"])?;
        let io_error =
            |e: std::io::Error| FetchError::Io(format!("{}: {e}", source.path.display()));
        let file = tokio::fs::File::open(&source.path).await.map_err(io_error)?;
        let size_bytes = file.metadata().await.map_err(io_error)?.len();
        let mime = mime_guess::from_path(&source.path).first_or_octet_stream();
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(ReaderStream::new(file)),
            size_bytes,
        )
        .file_name(source.file_name.clone())
        .mime_str(mime.essence_str())
        .map_err(|e| FetchError::Decode(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        debug!(
            file_name = %source.file_name,
            size_bytes,
            mime = %mime,
            "submitting media upload"
        );
        let response = self
            .uploader
            .post(url)
            .bearer_auth(credential.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(fetch_error_from_reqwest)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        let ack: AckPayload = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        ack.into_upload_ack(source).map_err(FetchError::Server)
    }

    fn live_feed_url(&self) -> String {
        self.endpoint(&["video_feed"])
            .map(String::from)
            .unwrap_or_else(|_| format!("{}/video_feed", self.config.base_url))
    }

    fn evidence_url(&self, evidence: &EvidenceRef) -> String {
        self.endpoint(&["video", "violation", evidence.as_str()])
            .map(String::from)
            .unwrap_or_else(|_| {
                format!(
                    "{}/video/violation/{}",
                    self.config.base_url,
                    evidence.as_str()
                )
            })
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, FetchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FetchError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FetchError::Transport {
            kind: "worker",
            detail: e.to_string(),
        })?
}

fn bearer_header(credential: &BearerToken) -> String {
    format!("Bearer {}", credential.expose_secret())
}

fn fetch_error_from_ureq(err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => FetchError::Unauthorized,
        ureq::Error::Status(status, _) => FetchError::Status { status },
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            FetchError::Transport {
                kind: classify_transport_error_kind(&combined),
                detail: transport.to_string(),
            }
        }
    }
}

fn fetch_error_from_reqwest(err: reqwest::Error) -> FetchError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection"
    } else if err.is_body() || err.is_request() {
        "request"
    } else {
        classify_transport_error_kind(&err.to_string())
    };
    FetchError::Transport {
        kind,
        detail: err.to_string(),
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::new(HttpBackendConfig {
            base_url: base_url.to_string(),
            ..HttpBackendConfig::mvp_v1()
        })
        .unwrap()
    }

    #[test]
    fn at_http_01_endpoints_join_under_base_path() {
        let b = backend("http://10.0.0.5:8005/api/");
        assert_eq!(b.live_feed_url(), "http://10.0.0.5:8005/api/video_feed");
        let b = backend("http://10.0.0.5:8005");
        assert_eq!(b.live_feed_url(), "http://10.0.0.5:8005/video_feed");
    }

    #[test]
    fn at_http_02_evidence_url_escapes_filename() {
        let b = backend("http://127.0.0.1:8005");
        let evidence = EvidenceRef::new("SPEEDING_ID42_2024-01-01_12:00:00 x.mp4").unwrap();
        let url = b.evidence_url(&evidence);
        assert!(url.starts_with("http://127.0.0.1:8005/video/violation/SPEEDING_ID42_"));
        assert!(url.ends_with("%20x.mp4"));
    }

    #[test]
    fn at_http_03_rejects_non_http_base() {
        assert!(HttpBackend::new(HttpBackendConfig {
            base_url: "ftp://example.com".to_string(),
            ..HttpBackendConfig::mvp_v1()
        })
        .is_err());
        assert!(HttpBackend::new(HttpBackendConfig {
            timeout_ms: 0,
            ..HttpBackendConfig::mvp_v1()
        })
        .is_err());
    }

    #[test]
    fn at_http_04_transport_errors_are_classified() {
        assert_eq!(classify_transport_error_kind("Io timed out"), "timeout");
        assert_eq!(classify_transport_error_kind("ConnectionFailed refused"), "connection");
        assert_eq!(classify_transport_error_kind("Dns lookup"), "dns");
        assert_eq!(classify_transport_error_kind("weird"), "transport");
    }
}
