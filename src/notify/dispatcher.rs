//! Concurrent fan-out of one event to every enabled recipient.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::transport::{HttpEmailTransport, TwilioSmsTransport, WebhookChatTransport};
use super::{
    render, Channel, ChatTransport, EmailTransport, NotificationEvent, NotificationPreference,
    NotifyError, SmsTransport,
};
use crate::config::NotifyConfig;

/// What happened to one dispatch. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    email: Option<Arc<dyn EmailTransport>>,
    sms: Option<Arc<dyn SmsTransport>>,
    chat: Option<Arc<dyn ChatTransport>>,
}

impl Dispatcher {
    pub fn new(
        email: Option<Arc<dyn EmailTransport>>,
        sms: Option<Arc<dyn SmsTransport>>,
        chat: Option<Arc<dyn ChatTransport>>,
    ) -> Self {
        Self { email, sms, chat }
    }

    /// Build transports for whichever channels are configured.
    pub fn from_config(cfg: &NotifyConfig) -> Result<Self, NotifyError> {
        let email = HttpEmailTransport::from_config(&cfg.email)?
            .map(|t| Arc::new(t) as Arc<dyn EmailTransport>);
        let sms = TwilioSmsTransport::from_config(&cfg.sms)?
            .map(|t| Arc::new(t) as Arc<dyn SmsTransport>);
        let chat = WebhookChatTransport::from_config(&cfg.chat)?
            .map(|t| Arc::new(t) as Arc<dyn ChatTransport>);

        info!(
            email = email.is_some(),
            sms = sms.is_some(),
            chat = chat.is_some(),
            "notification channels"
        );
        Ok(Self::new(email, sms, chat))
    }

    pub fn configured(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email.is_some(),
            Channel::Sms => self.sms.is_some(),
            Channel::Chat => self.chat.is_some(),
        }
    }

    /// Send `event` on every channel that is configured here and enabled in
    /// `prefs`. Sends run concurrently; one failing (or panicking) send never
    /// stops the others and nothing is propagated to the caller.
    pub async fn dispatch(
        &self,
        event: &NotificationEvent,
        prefs: &NotificationPreference,
    ) -> DispatchSummary {
        let mut set: JoinSet<(Channel, Result<(), NotifyError>)> = JoinSet::new();

        if let (true, Some(transport), Some(message)) =
            (prefs.email_enabled, &self.email, render::email(event))
        {
            for to in &prefs.email_addresses {
                let t = Arc::clone(transport);
                let (to, message) = (to.clone(), message.clone());
                set.spawn(async move { (Channel::Email, t.send_email(&to, &message).await) });
            }
        }

        if let (true, Some(transport), Some(body)) =
            (prefs.sms_enabled, &self.sms, render::sms(event))
        {
            for to in &prefs.phone_numbers {
                let t = Arc::clone(transport);
                let (to, body) = (to.clone(), body.clone());
                set.spawn(async move { (Channel::Sms, t.send_sms(&to, &body).await) });
            }
        }

        if let (true, Some(transport), Some(payload)) =
            (prefs.chat_enabled, &self.chat, render::chat(event))
        {
            let t = Arc::clone(transport);
            set.spawn(async move { (Channel::Chat, t.post(&payload).await) });
        }

        let mut summary = DispatchSummary {
            attempted: set.len(),
            ..DispatchSummary::default()
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((channel, Ok(()))) => {
                    debug!(%channel, "notification delivered");
                    summary.delivered += 1;
                }
                Ok((channel, Err(e))) => {
                    warn!(%channel, error = %e, "notification send failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "notification task aborted");
                    summary.failed += 1;
                }
            }
        }

        info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            failed = summary.failed,
            "notification dispatch finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::notify::EmailMessage;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailTransport for Recorder {
        async fn send_email(&self, to: &str, _m: &EmailMessage) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl SmsTransport for Recorder {
        async fn send_sms(&self, to: &str, _body: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    struct BrokenChat;

    #[async_trait]
    impl ChatTransport for BrokenChat {
        async fn post(&self, _payload: &serde_json::Value) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected {
                status: 500,
                body: "down".into(),
            })
        }
    }

    struct PanickingSms;

    #[async_trait]
    impl SmsTransport for PanickingSms {
        async fn send_sms(&self, _to: &str, _body: &str) -> Result<(), NotifyError> {
            panic!("boom");
        }
    }

    fn failed_run() -> NotificationEvent {
        NotificationEvent::TestResult {
            test_name: "Balance inquiry".into(),
            passed: false,
            duration_ms: 42000,
            timestamp: Utc::now(),
            run_id: 1,
        }
    }

    #[tokio::test]
    async fn test_failing_chat_does_not_block_email() {
        let email = Arc::new(Recorder::default());
        let d = Dispatcher::new(Some(email.clone()), None, Some(Arc::new(BrokenChat)));
        let prefs = NotificationPreference {
            chat_enabled: true,
            email_addresses: vec!["a@example.com".into(), "b@example.com".into()],
            ..NotificationPreference::default()
        };

        let summary = d.dispatch(&failed_run(), &prefs).await;
        assert_eq!(
            summary,
            DispatchSummary {
                attempted: 3,
                delivered: 2,
                failed: 1
            }
        );
        let mut sent = email.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn test_disabled_and_unconfigured_channels_are_skipped() {
        let sms = Arc::new(Recorder::default());
        let d = Dispatcher::new(None, Some(sms.clone()), None);
        let prefs = NotificationPreference {
            // email enabled by default but no transport
            email_addresses: vec!["a@example.com".into()],
            phone_numbers: vec!["+15551234567".into()],
            ..NotificationPreference::default()
        };

        let summary = d.dispatch(&failed_run(), &prefs).await;
        assert_eq!(summary.attempted, 0);
        assert!(sms.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_send_is_contained() {
        let email = Arc::new(Recorder::default());
        let d = Dispatcher::new(Some(email.clone()), Some(Arc::new(PanickingSms)), None);
        let prefs = NotificationPreference {
            sms_enabled: true,
            email_addresses: vec!["a@example.com".into()],
            phone_numbers: vec!["+15551234567".into()],
            ..NotificationPreference::default()
        };

        let summary = d.dispatch(&failed_run(), &prefs).await;
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_campaign_goes_to_chat_only() {
        let email = Arc::new(Recorder::default());
        let d = Dispatcher::new(Some(email.clone()), None, Some(Arc::new(BrokenChat)));
        let prefs = NotificationPreference {
            chat_enabled: true,
            email_addresses: vec!["a@example.com".into()],
            ..NotificationPreference::default()
        };
        let ev = NotificationEvent::CampaignCompletion {
            campaign_name: "Nightly".into(),
            total: 2,
            passed: 2,
            failed: 0,
            duration_ms: 1000,
            timestamp: Utc::now(),
        };

        let summary = d.dispatch(&ev, &prefs).await;
        assert_eq!(summary.attempted, 1);
        assert!(email.sent.lock().unwrap().is_empty());
    }
}
