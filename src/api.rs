use crate::config::ApiConfig;
use crate::model::{
    format_timestamp, Camera, CameraId, CameraPage, RecordingInfo, Session, StreamResolution,
    StreamTarget, Timeline, Timestamp,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Failure kinds of a collaborator call; each view decides what to show.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no session token; log in first")]
    NotAuthenticated,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}{}", detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    Status {
        status: StatusCode,
        detail: Option<String>,
    },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Run `fut` unless `cancel` fires first; the dropped request is aborted.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        result = fut => result,
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    personal_access_token: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Serialize)]
struct SpeedRequest {
    speed: u32,
}

/// Reply to a play, pause or speed request: `{"status": ...}` or `{"success": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub success: Option<String>,
}

/// A recording stream ready to hand to a player.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStream {
    pub url: String,
    pub controls: Option<StreamTarget>,
}

/// Typed client for the camera REST API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|e| {
            tracing::warn!("failed to build HTTP client with timeout: {}", e);
            Client::new()
        });

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_session(&self, session: &Session) -> Self {
        Self {
            token: Some(session.token.clone()),
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::NotAuthenticated)?;
        Ok(self.client.get(self.url(path)).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.detail);
            return Err(ApiError::Status { status, detail });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Exchange a personal access token for a session token. Unlike other
    /// calls, an error reply that is not JSON fails as [`ApiError::Decode`].
    pub async fn login(&self, personal_access_token: &str) -> Result<Session, ApiError> {
        let response = self
            .client
            .post(self.url("/accounts/login"))
            .json(&LoginRequest { personal_access_token })
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let error: ErrorBody = serde_json::from_slice(&body)?;
            return Err(ApiError::Status {
                status,
                detail: error.detail,
            });
        }

        let body: LoginResponse = serde_json::from_slice(&body)?;
        match body.token {
            Some(token) if !token.is_empty() => Ok(Session { token }),
            _ => Err(ApiError::MissingField("token")),
        }
    }

    pub async fn cameras(&self) -> Result<CameraPage, ApiError> {
        Self::send(self.get("/cameras/")?).await
    }

    pub async fn camera(&self, id: CameraId) -> Result<Camera, ApiError> {
        Self::send(self.get(&format!("/camera/{id}"))?).await
    }

    pub async fn recording_info(&self, id: CameraId) -> Result<RecordingInfo, ApiError> {
        Self::send(self.get(&format!("/camera/{id}/recording/info"))?).await
    }

    pub async fn timeline(
        &self,
        id: CameraId,
        start: &Timestamp,
        end: &Timestamp,
    ) -> Result<Timeline, ApiError> {
        let request = self
            .get(&format!("/camera/{id}/recording/timeline/"))?
            .query(&[("start", format_timestamp(start)), ("end", format_timestamp(end))]);
        Self::send(request).await
    }

    pub async fn recording_stream(
        &self,
        id: CameraId,
        start: &Timestamp,
        end: &Timestamp,
    ) -> Result<StreamResolution, ApiError> {
        let request = self
            .get(&format!("/camera/{id}/recording/stream"))?
            .query(&[("start", format_timestamp(start)), ("end", format_timestamp(end))]);
        Self::send(request).await
    }

    /// Resolve a playable manifest URL; an absent or empty `url` is an error.
    pub async fn resolve_stream(
        &self,
        id: CameraId,
        start: &Timestamp,
        end: &Timestamp,
    ) -> Result<ResolvedStream, ApiError> {
        let resolution = self.recording_stream(id, start, end).await?;
        if let Some(format) = resolution.format.as_deref().filter(|f| !f.eq_ignore_ascii_case("hls")) {
            tracing::warn!("camera {} recording stream is `{}`, not hls", id, format);
        }
        if let Some(info) = &resolution.stream_info {
            tracing::debug!("camera {} stream info at {}", id, info);
        }

        let url = match resolution.url {
            Some(url) if !url.trim().is_empty() => url,
            _ => return Err(ApiError::MissingField("url")),
        };
        let controls = resolution.stream_controls.and_then(|c| {
            let target = c.target();
            if target.is_none() {
                tracing::warn!("unrecognised stream controls base url {}", c.base_url);
            }
            target
        });
        Ok(ResolvedStream { url, controls })
    }

    fn control_path(target: &StreamTarget, action: &str) -> String {
        format!("/recording/{}/{}/{}", target.domain, target.stream_id, action)
    }

    pub async fn play_recording(&self, target: &StreamTarget) -> Result<ControlAck, ApiError> {
        Self::send(self.get(&Self::control_path(target, "play"))?).await
    }

    pub async fn pause_recording(&self, target: &StreamTarget) -> Result<ControlAck, ApiError> {
        Self::send(self.get(&Self::control_path(target, "pause"))?).await
    }

    /// The speed travels as a JSON body on a GET, which is what the API reads.
    pub async fn set_recording_speed(&self, target: &StreamTarget, speed: u32) -> Result<ControlAck, ApiError> {
        let request = self
            .get(&Self::control_path(target, "speed"))?
            .json(&SpeedRequest { speed });
        Self::send(request).await
    }

    pub async fn control_recording(
        &self,
        target: &StreamTarget,
        control: RecordingControl,
    ) -> Result<ControlAck, ApiError> {
        match control {
            RecordingControl::Play => self.play_recording(target).await,
            RecordingControl::Pause => self.pause_recording(target).await,
            RecordingControl::Speed(speed) => self.set_recording_speed(target, speed).await,
        }
    }
}

/// Server-side control of a recording stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingControl {
    Play,
    Pause,
    Speed(u32),
}

impl fmt::Display for RecordingControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingControl::Play => f.write_str("play"),
            RecordingControl::Pause => f.write_str("pause"),
            RecordingControl::Speed(speed) => write!(f, "speed {speed}x"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::parse_timestamp;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url: server.uri(),
            timeout_secs: None,
        })
    }

    pub(crate) fn camera_json(id: u64, streams: serde_json::Value) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("Camera {id}"),
            "owner": {"email": "owner@example.com", "first_name": "Jo", "last_name": "Doe"},
            "streams": streams,
        })
    }

    #[tokio::test]
    async fn test_login_returns_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/accounts/login"))
            .and(body_json(json!({"personal_access_token": "abc123"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "xyz"})))
            .expect(1)
            .mount(&server)
            .await;

        let session = client_for(&server).login("abc123").await.unwrap();
        assert_eq!(session.token, "xyz");
    }

    #[tokio::test]
    async fn test_login_failure_carries_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/accounts/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "bad token"})))
            .mount(&server)
            .await;

        let err = client_for(&server).login("nope").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status, .. } if status == StatusCode::UNAUTHORIZED));
        assert_eq!(err.detail(), Some("bad token"));
    }

    #[tokio::test]
    async fn test_login_non_json_error_is_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/accounts/login"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).login("t").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(err.detail(), None);
    }

    #[tokio::test]
    async fn test_protected_call_requires_session() {
        let server = MockServer::start().await;
        let err = client_for(&server).camera(1).await.unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_camera_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/camera/42"))
            .and(header("Authorization", "Bearer xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(camera_json(42, json!([]))))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "xyz".into() });
        let camera = api.camera(42).await.unwrap();
        assert_eq!(camera.name, "Camera 42");
        assert!(camera.streams.is_empty());
    }

    #[tokio::test]
    async fn test_timeline_query_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/camera/3/recording/timeline/"))
            .and(query_param("start", "2024-01-01T00:00:00Z"))
            .and(query_param("end", "2024-01-01T23:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "segments": [{"start": "2024-01-01T01:00:00Z", "end": "2024-01-01T01:10:00Z"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let start = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let end = parse_timestamp("2024-01-01T23:00:00Z").unwrap();
        let timeline = api.timeline(3, &start, &end).await.unwrap();
        assert_eq!(timeline.segments.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_url_is_missing_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/camera/3/recording/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": ""})))
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let ts = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let err = api.resolve_stream(3, &ts, &ts).await.unwrap_err();
        assert!(matches!(err, ApiError::MissingField("url")));
    }

    #[tokio::test]
    async fn test_resolve_stream_keeps_controls() {
        let server = MockServer::start().await;
        let base = "https://e1-eu2.example.com/recording/streams/770baf82/";
        Mock::given(method("GET"))
            .and(path("/api/camera/3/recording/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "format": "hls",
                "url": format!("{base}hls/playlist.m3u8"),
                "stream_info": "https://api.example.com/v1/recording/stream/e1-eu2.example.com/770baf82/",
                "stream_controls": {
                    "base_url": base,
                    "play": format!("{base}play/"),
                    "pause": format!("{base}pause/"),
                    "speed": format!("{base}speed/"),
                },
            })))
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let ts = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let stream = api.resolve_stream(3, &ts, &ts).await.unwrap();
        assert_eq!(stream.url, format!("{base}hls/playlist.m3u8"));
        assert_eq!(
            stream.controls,
            Some(StreamTarget {
                domain: "e1-eu2.example.com".into(),
                stream_id: "770baf82".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_recording_controls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/recording/e1.example.com/abc/play"))
            .and(header("Authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "playing"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/recording/e1.example.com/abc/pause"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "paused"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/recording/e1.example.com/abc/speed"))
            .and(body_json(json!({"speed": 4})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": "true"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let target = StreamTarget {
            domain: "e1.example.com".into(),
            stream_id: "abc".into(),
        };
        assert_eq!(api.play_recording(&target).await.unwrap().status.as_deref(), Some("playing"));
        assert_eq!(api.pause_recording(&target).await.unwrap().status.as_deref(), Some("paused"));
        let ack = api.control_recording(&target, RecordingControl::Speed(4)).await.unwrap();
        assert_eq!(ack.success.as_deref(), Some("true"));

        let anonymous = client_for(&server);
        assert!(matches!(anonymous.play_recording(&target).await, Err(ApiError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_control_failure_carries_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/recording/e1.example.com/abc/speed"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "Invalid speed value"})))
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let target = StreamTarget {
            domain: "e1.example.com".into(),
            stream_id: "abc".into(),
        };
        let err = api.set_recording_speed(&target, 0).await.unwrap_err();
        assert_eq!(err.detail(), Some("Invalid speed value"));
    }

    #[tokio::test]
    async fn test_cancellable_aborts_slow_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/camera/9"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(camera_json(9, json!([])))
                    .set_delay(std::time::Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = cancellable(&cancel, api.camera(9)).await.unwrap_err();
        assert!(matches!(err, ApiError::Cancelled));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/camera/3/recording/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\": 1}"))
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let err = api.recording_info(3).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
