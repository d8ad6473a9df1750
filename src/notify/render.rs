//! Per-channel message rendering.
//!
//! Each renderer returns `None` when the event kind is not delivered over
//! that channel: campaign completions are chat-only, simple messages never
//! go to chat.

use serde_json::{json, Value};

use super::{EmailMessage, NotificationEvent, Severity};

const FOOTER: &str = "IVR Automation Testing Platform";
const SMS_ALERT_MESSAGE_MAX: usize = 100;

const GREEN: &str = "#28a745";
const YELLOW: &str = "#ffc107";
const ORANGE: &str = "#fd7e14";
const RED: &str = "#dc3545";

fn severity_color(s: Severity) -> &'static str {
    match s {
        Severity::Low => GREEN,
        Severity::Medium => YELLOW,
        Severity::High => ORANGE,
        Severity::Critical => RED,
    }
}

fn severity_emoji(s: Severity) -> &'static str {
    match s {
        Severity::Low => "ℹ️",
        Severity::Medium => "⚠️",
        Severity::High => "🚨",
        Severity::Critical => "🔥",
    }
}

fn verdict(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Cut to `max` characters, appending "..." when anything was dropped.
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn html_page(title: &str, heading_color: &str, heading: &str, inner: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
<html>\n\
<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
<body style=\"font-family: Arial, sans-serif; line-height: 1.6; color: #333;\">\n\
<div style=\"max-width: 600px; margin: 0 auto; padding: 20px;\">\n\
<h1 style=\"color: {heading_color};\">{heading}</h1>\n\
{inner}\n\
<hr style=\"margin: 30px 0;\">\n\
<p style=\"font-size: 0.9em; color: #666;\">This is an automated notification from the {FOOTER}.</p>\n\
</div>\n\
</body>\n\
</html>"
    )
}

pub fn email(event: &NotificationEvent) -> Option<EmailMessage> {
    match event {
        NotificationEvent::TestResult {
            test_name,
            passed,
            duration_ms,
            timestamp,
            ..
        } => {
            let v = verdict(*passed);
            let ts = timestamp.to_rfc3339();
            let closing = if *passed {
                "✅ The test completed successfully."
            } else {
                "❌ The test failed. Please review the test configuration and logs."
            };
            let text = format!(
                "IVR Test Result Notification\n\
                 ============================\n\n\
                 Test Name: {test_name}\n\
                 Status: {v}\n\
                 Duration: {duration_ms}ms\n\
                 Timestamp: {ts}\n\n\
                 {closing}\n\n\
                 For more details, visit the {FOOTER} dashboard."
            );
            let color = if *passed { GREEN } else { RED };
            let inner = format!(
                "<div style=\"background-color: #f8f9fa; padding: 15px; border-radius: 5px;\">\n\
                 <h2>{name}</h2>\n\
                 <p><strong>Status:</strong> <span style=\"color: {color};\">{v}</span></p>\n\
                 <p><strong>Duration:</strong> {duration_ms}ms</p>\n\
                 <p><strong>Timestamp:</strong> {ts}</p>\n\
                 </div>\n\
                 <p>{closing}</p>",
                name = html_escape(test_name),
            );
            Some(EmailMessage {
                subject: format!("IVR Test {v}: {test_name}"),
                text,
                html: Some(html_page("IVR Test Result", color, &format!("IVR Test {v}"), &inner)),
            })
        }
        NotificationEvent::Alert {
            alert_type,
            severity,
            message,
            timestamp,
        } => {
            let label = severity.label();
            let ts = timestamp.to_rfc3339();
            let color = severity_color(*severity);
            let text = format!(
                "IVR System Alert\n\
                 ================\n\n\
                 Alert Type: {alert_type}\n\
                 Severity: {label}\n\
                 Message: {message}\n\
                 Timestamp: {ts}\n\n\
                 Please investigate this alert in the {FOOTER}."
            );
            let inner = format!(
                "<div style=\"background-color: #f8f9fa; padding: 15px; border-left: 4px solid {color};\">\n\
                 <h2>{kind}</h2>\n\
                 <p><strong>Severity:</strong> <span style=\"color: {color};\">{label}</span></p>\n\
                 <p><strong>Message:</strong> {msg}</p>\n\
                 <p><strong>Timestamp:</strong> {ts}</p>\n\
                 </div>",
                kind = html_escape(alert_type),
                msg = html_escape(message),
            );
            Some(EmailMessage {
                subject: format!("[{label}] IVR Alert: {alert_type}"),
                text,
                html: Some(html_page("IVR System Alert", color, "IVR System Alert", &inner)),
            })
        }
        NotificationEvent::Simple { kind, message } => Some(EmailMessage {
            subject: format!("IVR Notification: {kind}"),
            text: message.clone(),
            html: None,
        }),
        NotificationEvent::CampaignCompletion { .. } => None,
    }
}

pub fn sms(event: &NotificationEvent) -> Option<String> {
    match event {
        NotificationEvent::TestResult {
            test_name,
            passed,
            duration_ms,
            ..
        } => {
            let emoji = if *passed { "✅" } else { "❌" };
            Some(format!(
                "{emoji} IVR Test {}: {test_name}\nDuration: {duration_ms}ms\nView details in dashboard",
                verdict(*passed)
            ))
        }
        NotificationEvent::Alert {
            alert_type,
            severity,
            message,
            ..
        } => Some(format!(
            "{} [{}] IVR Alert: {alert_type}\nMessage: {}\nCheck dashboard for details",
            severity_emoji(*severity),
            severity.label(),
            truncate(message, SMS_ALERT_MESSAGE_MAX)
        )),
        NotificationEvent::Simple { message, .. } => Some(message.clone()),
        NotificationEvent::CampaignCompletion { .. } => None,
    }
}

fn field(title: &str, value: impl Into<String>, short: bool) -> Value {
    json!({ "title": title, "value": value.into(), "short": short })
}

/// Chat webhook body, without the channel/username envelope the transport adds.
pub fn chat(event: &NotificationEvent) -> Option<Value> {
    let (text, color, fields, ts) = match event {
        NotificationEvent::TestResult {
            test_name,
            passed,
            duration_ms,
            timestamp,
            ..
        } => {
            let emoji = if *passed { "✅" } else { "❌" };
            let v = verdict(*passed);
            (
                format!("IVR Test {v}: {test_name}"),
                if *passed { GREEN } else { RED },
                vec![
                    field("Test Name", test_name.as_str(), true),
                    field("Status", format!("{emoji} {v}"), true),
                    field("Duration", format!("{duration_ms}ms"), true),
                    field("Timestamp", timestamp.to_rfc3339(), true),
                ],
                timestamp.timestamp(),
            )
        }
        NotificationEvent::Alert {
            alert_type,
            severity,
            message,
            timestamp,
        } => {
            let emoji = severity_emoji(*severity);
            let label = severity.label();
            (
                format!("{emoji} [{label}] IVR Alert: {alert_type}"),
                severity_color(*severity),
                vec![
                    field("Alert Type", alert_type.as_str(), true),
                    field("Severity", format!("{emoji} {label}"), true),
                    field("Message", message.as_str(), false),
                    field("Timestamp", timestamp.to_rfc3339(), true),
                ],
                timestamp.timestamp(),
            )
        }
        NotificationEvent::CampaignCompletion {
            campaign_name,
            total,
            passed,
            failed,
            duration_ms,
            timestamp,
        } => {
            let (status, emoji, color) = if *failed == 0 {
                ("SUCCESS", "✅", GREEN)
            } else if passed > failed {
                ("PARTIAL SUCCESS", "⚠️", YELLOW)
            } else {
                ("FAILURE", "❌", RED)
            };
            let rate = if *total > 0 {
                format!("{:.1}", f64::from(*passed) / f64::from(*total) * 100.0)
            } else {
                "0".to_string()
            };
            (
                format!("{emoji} Campaign Completed: {campaign_name}"),
                color,
                vec![
                    field("Campaign Name", campaign_name.as_str(), true),
                    field("Status", format!("{emoji} {status}"), true),
                    field("Tests Executed", total.to_string(), true),
                    field("Success Rate", format!("{rate}%"), true),
                    field("Passed", passed.to_string(), true),
                    field("Failed", failed.to_string(), true),
                    field("Duration", format!("{}s", (*duration_ms as f64 / 1000.0).round()), true),
                    field("Completed At", timestamp.to_rfc3339(), true),
                ],
                timestamp.timestamp(),
            )
        }
        NotificationEvent::Simple { .. } => return None,
    };

    Some(json!({
        "text": text,
        "attachments": [{
            "color": color,
            "fields": fields,
            "footer": FOOTER,
            "ts": ts,
        }],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn result(passed: bool) -> NotificationEvent {
        NotificationEvent::TestResult {
            test_name: "Balance inquiry".into(),
            passed,
            duration_ms: 42000,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            run_id: 7,
        }
    }

    fn alert(message: &str) -> NotificationEvent {
        NotificationEvent::Alert {
            alert_type: "Carrier outage".into(),
            severity: Severity::High,
            message: message.into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_email_test_result() {
        let m = email(&result(false)).unwrap();
        assert_eq!(m.subject, "IVR Test FAILED: Balance inquiry");
        assert!(m.text.contains("Status: FAILED"));
        assert!(m.text.contains("Duration: 42000ms"));
        assert!(m.html.unwrap().contains(RED));
    }

    #[test]
    fn test_email_alert_subject_and_escaping() {
        let m = email(&alert("<script>")).unwrap();
        assert_eq!(m.subject, "[HIGH] IVR Alert: Carrier outage");
        let html = m.html.unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_sms_alert_truncates_message() {
        let long = "x".repeat(150);
        let body = sms(&alert(&long)).unwrap();
        assert!(body.contains(&format!("Message: {}...", "x".repeat(100))));
        assert!(!body.contains(&"x".repeat(101)));

        let short = sms(&alert("link down")).unwrap();
        assert!(short.contains("Message: link down\n"));
    }

    #[test]
    fn test_sms_test_result() {
        let body = sms(&result(true)).unwrap();
        assert_eq!(
            body,
            "✅ IVR Test PASSED: Balance inquiry\nDuration: 42000ms\nView details in dashboard"
        );
    }

    #[test]
    fn test_campaign_is_chat_only() {
        let ev = NotificationEvent::CampaignCompletion {
            campaign_name: "Nightly".into(),
            total: 4,
            passed: 3,
            failed: 1,
            duration_ms: 61_400,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        assert!(email(&ev).is_none());
        assert!(sms(&ev).is_none());

        let body = chat(&ev).unwrap();
        assert_eq!(body["text"], "⚠️ Campaign Completed: Nightly");
        let fields = body["attachments"][0]["fields"].as_array().unwrap();
        let rate = fields.iter().find(|f| f["title"] == "Success Rate").unwrap();
        assert_eq!(rate["value"], "75.0%");
        let dur = fields.iter().find(|f| f["title"] == "Duration").unwrap();
        assert_eq!(dur["value"], "61s");
    }

    #[test]
    fn test_simple_skips_chat() {
        let ev = NotificationEvent::Simple {
            kind: "alert".into(),
            message: "hello".into(),
        };
        assert!(chat(&ev).is_none());
        assert_eq!(email(&ev).unwrap().subject, "IVR Notification: alert");
        assert_eq!(sms(&ev).unwrap(), "hello");
    }

    #[test]
    fn test_chat_test_result_fields() {
        let body = chat(&result(true)).unwrap();
        assert_eq!(body["attachments"][0]["color"], GREEN);
        assert_eq!(body["attachments"][0]["footer"], FOOTER);
        assert_eq!(body["attachments"][0]["fields"][1]["value"], "✅ PASSED");
    }
}
