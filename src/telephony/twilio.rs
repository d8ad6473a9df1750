//! Twilio REST client implementing [`TelephonyGateway`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    CallMetadata, CallRequest, PlacedCall, QualityMetrics, RecordingRef, TelephonyError,
    TelephonyGateway,
};
use crate::config::{TelephonyConfig, TelephonyCredentials};

const API_VERSION: &str = "2010-04-01";

/// Voice gateway backed by the Twilio REST and Voice Insights APIs.
pub struct TwilioGateway {
    client: Client,
    creds: TelephonyCredentials,
    api_base: String,
    insights_base: String,
    /// Public origin the provider calls back into.
    callback_base: String,
}

impl TwilioGateway {
    pub fn new(
        creds: TelephonyCredentials,
        cfg: &TelephonyConfig,
        callback_base: &str,
    ) -> Result<Self, TelephonyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| TelephonyError::ProviderUnreachable(e.to_string()))?;

        Ok(Self {
            client,
            creds,
            api_base: cfg.api_base_url.trim_end_matches('/').to_string(),
            insights_base: cfg.insights_base_url.trim_end_matches('/').to_string(),
            callback_base: callback_base.trim_end_matches('/').to_string(),
        })
    }

    fn account_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/Accounts/{}/{}",
            self.api_base, API_VERSION, self.creds.account_sid, suffix
        )
    }

    fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.callback_base, path)
    }

    /// URL the provider fetches the compiled script from.
    fn script_url(&self, req: &CallRequest) -> Result<String, TelephonyError> {
        let dtmf = serde_json::to_string(&req.dtmf)
            .map_err(|e| TelephonyError::Decode(e.to_string()))?;
        let mut url = Url::parse(&self.callback_url("/telephony/script"))
            .map_err(|e| TelephonyError::Decode(format!("invalid callback base: {e}")))?;
        url.query_pairs_mut()
            .append_pair("dtmf", &dtmf)
            .append_pair("record", if req.recording_enabled { "true" } else { "false" });
        Ok(url.into())
    }

    async fn get(&self, url: &str) -> Result<Response, TelephonyError> {
        self.client
            .get(url)
            .basic_auth(&self.creds.account_sid, Some(&self.creds.auth_token))
            .send()
            .await
            .map_err(unreachable_err)
    }
}

#[derive(Deserialize)]
struct CallResource {
    sid: String,
    status: String,
    from: Option<String>,
    to: Option<String>,
    direction: Option<String>,
    duration: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    price: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct InsightsSummary {
    quality: Option<InsightsQuality>,
}

#[derive(Deserialize)]
struct InsightsQuality {
    mos: Option<f64>,
    jitter_avg: Option<f64>,
    packet_loss_avg: Option<f64>,
    latency_avg: Option<f64>,
}

#[derive(Deserialize)]
struct RecordingList {
    #[serde(default)]
    recordings: Vec<RecordingResource>,
}

#[derive(Deserialize)]
struct RecordingResource {
    sid: String,
    uri: Option<String>,
    duration: Option<String>,
    date_created: Option<String>,
}

#[async_trait]
impl TelephonyGateway for TwilioGateway {
    async fn place_call(&self, req: &CallRequest) -> Result<PlacedCall, TelephonyError> {
        let script_url = self.script_url(req)?;
        let timeout = req.timeout_secs.to_string();
        let status_cb = self.callback_url("/telephony/status");
        let recording_cb = self.callback_url("/telephony/recording");

        let form = [
            ("To", req.destination.as_str()),
            ("From", self.creds.from_number.as_str()),
            ("Url", script_url.as_str()),
            ("Record", if req.recording_enabled { "true" } else { "false" }),
            ("RecordingStatusCallback", recording_cb.as_str()),
            ("StatusCallback", status_cb.as_str()),
            ("Timeout", timeout.as_str()),
        ];

        debug!(to = %req.destination, tones = req.dtmf.len(), "placing call");
        let resp = self
            .client
            .post(self.account_url("Calls.json"))
            .basic_auth(&self.creds.account_sid, Some(&self.creds.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(unreachable_err)?;

        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }

        let call: CallResource = resp
            .json()
            .await
            .map_err(|e| TelephonyError::Decode(e.to_string()))?;
        info!(call_id = %call.sid, status = %call.status, "provider accepted call");
        Ok(PlacedCall {
            call_id: call.sid,
            status: call.status,
        })
    }

    async fn fetch_call_metadata(&self, call_id: &str) -> Result<CallMetadata, TelephonyError> {
        let resp = self
            .get(&self.account_url(&format!("Calls/{call_id}.json")))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(TelephonyError::NotFound(call_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }

        let call: CallResource = resp
            .json()
            .await
            .map_err(|e| TelephonyError::Decode(e.to_string()))?;
        Ok(CallMetadata {
            call_id: call.sid,
            status: call.status,
            from: call.from,
            to: call.to,
            direction: call.direction,
            duration_secs: call.duration.and_then(|d| d.parse().ok()),
            start_time: call.start_time,
            end_time: call.end_time,
            price: call.price,
        })
    }

    async fn fetch_quality_metrics(
        &self,
        call_id: &str,
    ) -> Result<Option<QualityMetrics>, TelephonyError> {
        let resp = self
            .get(&format!("{}/v1/Voice/{call_id}", self.insights_base))
            .await?;
        // Insights answers 404 until the call summary has been computed.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }

        let summary: InsightsSummary = resp
            .json()
            .await
            .map_err(|e| TelephonyError::Decode(e.to_string()))?;

        let Some(quality) = summary.quality else {
            return Ok(None);
        };
        let Some(mos) = quality.mos else {
            return Ok(None);
        };
        Ok(Some(QualityMetrics {
            mos,
            jitter_ms: quality.jitter_avg.unwrap_or(0.0),
            packet_loss_pct: quality.packet_loss_avg.unwrap_or(0.0),
            latency_ms: quality.latency_avg.unwrap_or(0.0),
        }))
    }

    async fn fetch_recordings(&self, call_id: &str) -> Result<Vec<RecordingRef>, TelephonyError> {
        let resp = self
            .get(&self.account_url(&format!("Calls/{call_id}/Recordings.json")))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(TelephonyError::NotFound(call_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }

        let list: RecordingList = resp
            .json()
            .await
            .map_err(|e| TelephonyError::Decode(e.to_string()))?;

        Ok(list
            .recordings
            .into_iter()
            .map(|r| {
                let url = match r.uri {
                    Some(uri) => format!("{}{}", self.api_base, uri.trim_end_matches(".json")),
                    None => self.account_url(&format!("Recordings/{}", r.sid)),
                };
                RecordingRef {
                    recording_id: r.sid,
                    url,
                    duration_secs: r.duration.and_then(|d| d.parse().ok()),
                    created_at: r.date_created,
                }
            })
            .collect())
    }
}

fn unreachable_err(e: reqwest::Error) -> TelephonyError {
    TelephonyError::ProviderUnreachable(e.to_string())
}

async fn rejected(resp: Response) -> TelephonyError {
    let status = resp.status().as_u16();
    let message = match resp.json::<ErrorBody>().await {
        Ok(ErrorBody { message: Some(m) }) => m,
        _ => "provider API call failed".to_string(),
    };
    warn!(status, %message, "provider rejected request");
    TelephonyError::ProviderRejected { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> TwilioGateway {
        let cfg = TelephonyConfig {
            api_base_url: server.uri(),
            insights_base_url: server.uri(),
            ..TelephonyConfig::default()
        };
        let creds = TelephonyCredentials {
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
            from_number: "+15550000000".into(),
        };
        TwilioGateway::new(creds, &cfg, "https://ivr.example.com").unwrap()
    }

    fn request() -> CallRequest {
        CallRequest {
            destination: "+15551234567".into(),
            dtmf: vec!["1".into(), "4".into()],
            timeout_secs: 30,
            recording_enabled: true,
        }
    }

    #[tokio::test]
    async fn test_place_call_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC1/Calls.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=%2B15551234567"))
            .and(body_string_contains("StatusCallback=https%3A%2F%2Fivr.example.com%2Ftelephony%2Fstatus"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({ "sid": "CA123", "status": "queued" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let placed = gateway(&server).place_call(&request()).await.unwrap();
        assert_eq!(placed.call_id, "CA123");
        assert_eq!(placed.status, "queued");
    }

    #[tokio::test]
    async fn test_place_call_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC1/Calls.json"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "message": "invalid To number" })),
            )
            .mount(&server)
            .await;

        let err = gateway(&server).place_call(&request()).await.unwrap_err();
        match err {
            TelephonyError::ProviderRejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid To number");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_place_call_unreachable() {
        let cfg = TelephonyConfig {
            api_base_url: "http://127.0.0.1:9".into(),
            request_timeout_secs: 2,
            ..TelephonyConfig::default()
        };
        let creds = TelephonyCredentials {
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
            from_number: "+15550000000".into(),
        };
        let gw = TwilioGateway::new(creds, &cfg, "https://ivr.example.com").unwrap();
        let err = gw.place_call(&request()).await.unwrap_err();
        assert!(matches!(err, TelephonyError::ProviderUnreachable(_)));
    }

    #[test]
    fn test_script_url_carries_dtmf() {
        let cfg = TelephonyConfig::default();
        let creds = TelephonyCredentials {
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
            from_number: "+1".into(),
        };
        let gw = TwilioGateway::new(creds, &cfg, "https://ivr.example.com/").unwrap();
        let url = gw.script_url(&request()).unwrap();
        assert_eq!(
            url,
            "https://ivr.example.com/telephony/script?dtmf=%5B%221%22%2C%224%22%5D&record=true"
        );
    }

    #[tokio::test]
    async fn test_quality_metrics_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/Voice/CA123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "quality": { "mos": 4.2, "jitter_avg": 3.5, "packet_loss_avg": 0.1, "latency_avg": 80.0 }
            })))
            .mount(&server)
            .await;

        let q = gateway(&server)
            .fetch_quality_metrics("CA123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q.mos, 4.2);
        assert_eq!(q.latency_ms, 80.0);
    }

    #[tokio::test]
    async fn test_quality_metrics_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/Voice/CA404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/Voice/CAempty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let gw = gateway(&server);
        assert!(gw.fetch_quality_metrics("CA404").await.unwrap().is_none());
        assert!(gw.fetch_quality_metrics("CAempty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_call_metadata_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2010-04-01/Accounts/AC1/Calls/CAnope.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .fetch_call_metadata("CAnope")
            .await
            .unwrap_err();
        assert!(matches!(err, TelephonyError::NotFound(id) if id == "CAnope"));
    }

    #[tokio::test]
    async fn test_call_metadata_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2010-04-01/Accounts/AC1/Calls/CA123.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sid": "CA123", "status": "completed", "to": "+15551234567",
                "from": "+15550000000", "duration": "42", "direction": "outbound-api"
            })))
            .mount(&server)
            .await;

        let meta = gateway(&server).fetch_call_metadata("CA123").await.unwrap();
        assert_eq!(meta.status, "completed");
        assert_eq!(meta.duration_secs, Some(42));
        assert_eq!(meta.to.as_deref(), Some("+15551234567"));
    }

    #[tokio::test]
    async fn test_recordings_listed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2010-04-01/Accounts/AC1/Calls/CA123/Recordings.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "recordings": [{
                    "sid": "RE1",
                    "uri": "/2010-04-01/Accounts/AC1/Recordings/RE1.json",
                    "duration": "40",
                    "date_created": "Mon, 05 Oct 2026 10:00:00 +0000"
                }]
            })))
            .mount(&server)
            .await;

        let recs = gateway(&server).fetch_recordings("CA123").await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].recording_id, "RE1");
        assert_eq!(
            recs[0].url,
            format!("{}/2010-04-01/Accounts/AC1/Recordings/RE1", server.uri())
        );
        assert_eq!(recs[0].duration_secs, Some(40));
    }
}
