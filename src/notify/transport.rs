//! HTTP-backed transports for each notification channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::debug;

use super::{ChatTransport, EmailMessage, EmailTransport, NotifyError, SmsTransport};
use crate::config::{ChatConfig, EmailConfig, SmsConfig};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Result<Client, NotifyError> {
    Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(|e| NotifyError::Transport(e.to_string()))
}

async fn check(resp: Result<Response, reqwest::Error>) -> Result<(), NotifyError> {
    let resp = resp.map_err(|e| NotifyError::Transport(e.to_string()))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(NotifyError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Delivers mail through an HTTP mail relay (JSON body, basic auth).
pub struct HttpEmailTransport {
    client: Client,
    api_url: String,
    username: String,
    password: String,
    from_address: String,
}

impl HttpEmailTransport {
    /// `Ok(None)` when the relay is not configured.
    pub fn from_config(cfg: &EmailConfig) -> Result<Option<Self>, NotifyError> {
        let (Some(api_url), Some(username), Some(password)) =
            (&cfg.api_url, &cfg.username, &cfg.password)
        else {
            return Ok(None);
        };
        if !cfg.is_configured() {
            return Ok(None);
        }
        Ok(Some(Self {
            client: http_client()?,
            api_url: api_url.clone(),
            username: username.clone(),
            password: password.clone(),
            from_address: cfg
                .from_address
                .clone()
                .unwrap_or_else(|| "noreply@ivrtesting.com".to_string()),
        }))
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send_email(&self, to: &str, message: &EmailMessage) -> Result<(), NotifyError> {
        debug!(%to, subject = %message.subject, "sending email");
        let body = json!({
            "from": self.from_address,
            "to": to,
            "subject": message.subject,
            "text": message.text,
            "html": message.html,
        });
        check(
            self.client
                .post(&self.api_url)
                .basic_auth(&self.username, Some(&self.password))
                .json(&body)
                .send()
                .await,
        )
        .await
    }
}

/// SMS through the Twilio Messages API.
pub struct TwilioSmsTransport {
    client: Client,
    messages_url: String,
    account_id: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSmsTransport {
    pub fn from_config(cfg: &SmsConfig) -> Result<Option<Self>, NotifyError> {
        let (Some(account_id), Some(auth_token)) = (&cfg.account_id, &cfg.auth_token) else {
            return Ok(None);
        };
        if !cfg.is_configured() {
            return Ok(None);
        }
        Ok(Some(Self {
            client: http_client()?,
            messages_url: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                cfg.api_base_url.trim_end_matches('/'),
                account_id
            ),
            account_id: account_id.clone(),
            auth_token: auth_token.clone(),
            from_number: cfg.from_number.clone().unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl SmsTransport for TwilioSmsTransport {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        debug!(%to, "sending sms");
        let form = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];
        check(
            self.client
                .post(&self.messages_url)
                .basic_auth(&self.account_id, Some(&self.auth_token))
                .form(&form)
                .send()
                .await,
        )
        .await
    }
}

/// Incoming-webhook chat poster. Adds the channel envelope to every payload.
pub struct WebhookChatTransport {
    client: Client,
    webhook_url: String,
    channel: String,
    username: String,
    icon_emoji: String,
}

impl WebhookChatTransport {
    pub fn from_config(cfg: &ChatConfig) -> Result<Option<Self>, NotifyError> {
        let Some(webhook_url) = cfg.webhook_url.as_deref().filter(|u| !u.trim().is_empty())
        else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: http_client()?,
            webhook_url: webhook_url.to_string(),
            channel: cfg.channel.clone(),
            username: cfg.username.clone(),
            icon_emoji: cfg.icon_emoji.clone(),
        }))
    }
}

#[async_trait]
impl ChatTransport for WebhookChatTransport {
    async fn post(&self, payload: &Value) -> Result<(), NotifyError> {
        let mut body = payload.clone();
        if let Value::Object(map) = &mut body {
            map.insert("channel".into(), Value::String(self.channel.clone()));
            map.insert("username".into(), Value::String(self.username.clone()));
            map.insert("icon_emoji".into(), Value::String(self.icon_emoji.clone()));
        }
        debug!(channel = %self.channel, "posting chat message");
        check(self.client.post(&self.webhook_url).json(&body).send().await).await
    }
}
