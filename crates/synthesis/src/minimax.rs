//! MiniMax t2a_v2 backend.

use std::time::Duration;

use async_trait::async_trait;
use dubsync_segment::AudioClip;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{decode_audio_payload, decode_wav, Result, ServiceError, SpeechBackend, SynthesisRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.minimax.chat/v1";
pub const DEFAULT_MODEL: &str = "speech-2.5-hd-preview";

/// Speed range accepted by the API.
const API_SPEED_RANGE: (f64, f64) = (0.5, 2.0);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiniMaxConfig {
    pub base_url: String,
    pub model: String,
    pub group_id: String,
    /// Output sample rate requested from the service.
    pub sample_rate: u32,
    pub bitrate: u32,
    pub volume: f64,
    pub pitch: i32,
    pub timeout_secs: u64,
}

impl Default for MiniMaxConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            group_id: String::new(),
            sample_rate: 32000,
            bitrate: 128000,
            volume: 1.0,
            pitch: 0,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize)]
struct T2aRequest<'a> {
    model: &'a str,
    text: &'a str,
    stream: bool,
    voice_setting: VoiceSetting<'a>,
    audio_setting: AudioSetting,
    language_boost: &'a str,
}

#[derive(Debug, Serialize)]
struct VoiceSetting<'a> {
    voice_id: &'a str,
    speed: f64,
    vol: f64,
    pitch: i32,
}

#[derive(Debug, Serialize)]
struct AudioSetting {
    sample_rate: u32,
    bitrate: u32,
    format: &'static str,
    channel: u8,
}

#[derive(Debug, Deserialize)]
struct T2aResponse {
    #[serde(default)]
    data: Option<T2aData>,
    #[serde(default)]
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Deserialize)]
struct T2aData {
    #[serde(default)]
    audio: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BaseResp {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

/// API status codes where another credential or a later retry may succeed:
/// unknown error, timeout, rate limit, auth failure, insufficient balance, usage limit.
fn is_transient_status(code: i64) -> bool {
    matches!(code, 1000 | 1001 | 1002 | 1004 | 1008 | 1039)
}

fn classify_http(status: StatusCode) -> ServiceError {
    let message = format!("http {status}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ServiceError::transient(message)
    } else {
        ServiceError::exhausted(message)
    }
}

fn classify_transport(error: &reqwest::Error) -> ServiceError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ServiceError::transient(error.to_string())
    } else {
        ServiceError::exhausted(error.to_string())
    }
}

/// Client for one MiniMax API key.
pub struct MiniMaxBackend {
    client: reqwest::Client,
    config: MiniMaxConfig,
    api_key: String,
    label: String,
}

impl MiniMaxBackend {
    pub fn new(config: MiniMaxConfig, api_key: impl Into<String>, label: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ServiceError::exhausted(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
            label: label.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/t2a_v2?GroupId={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.group_id
        )
    }
}

#[async_trait]
impl SpeechBackend for MiniMaxBackend {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioClip> {
        let body = T2aRequest {
            model: &self.config.model,
            text: &request.text,
            stream: false,
            voice_setting: VoiceSetting {
                voice_id: &request.voice,
                speed: request.rate.clamp(API_SPEED_RANGE.0, API_SPEED_RANGE.1),
                vol: self.config.volume,
                pitch: self.config.pitch,
            },
            audio_setting: AudioSetting {
                sample_rate: self.config.sample_rate,
                bitrate: self.config.bitrate,
                format: "wav",
                channel: 1,
            },
            language_boost: "auto",
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        if !resp.status().is_success() {
            return Err(classify_http(resp.status()));
        }

        let parsed = resp
            .json::<T2aResponse>()
            .await
            .map_err(|e| ServiceError::exhausted(format!("invalid response: {e}")))?;

        if let Some(base) = &parsed.base_resp {
            if base.status_code != 0 {
                let message = format!("status {}: {}", base.status_code, base.status_msg);
                return Err(if is_transient_status(base.status_code) {
                    ServiceError::transient(message)
                } else {
                    ServiceError::exhausted(message)
                });
            }
        }

        let payload = parsed
            .data
            .and_then(|d| d.audio)
            .ok_or_else(|| ServiceError::exhausted("response has no audio"))?;
        let clip = decode_wav(&decode_audio_payload(&payload)?)?;

        tracing::debug!(
            backend = %self.label,
            rate = request.rate,
            duration = clip.duration_secs(),
            "minimax_synthesized"
        );
        Ok(clip)
    }

    fn name(&self) -> &str {
        &self.label
    }
}
