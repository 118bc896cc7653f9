use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub account: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(alert_type: AlertType, account: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            account: account.map(str::to_string),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(AlertType::SystemAlert, None, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    PositionOpened,
    TakeProfit,
    StopLoss,
    PositionClosed,
    SwapConfirmed,
    SwapFailed,
    /// Exit that sold less than the balance; the remainder stays open
    PartialFill,
    /// Confirmed swap with an unreported amount; the ledger needs a manual fix
    FillUnreconciled,
    SystemAlert,
}

/// Human-facing delivery of lifecycle alerts. Delivery failures are logged
/// by the implementation and never surface to the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert);
}

/// In-process fan-out of alerts to any number of subscribers
#[derive(Debug, Clone)]
pub struct AlertBus {
    tx: broadcast::Sender<Alert>,
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertBus {
    #[instrument]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        debug!("AlertBus initialized with capacity: 1000");
        Self { tx }
    }

    pub fn publish(&self, alert: Alert) {
        match self.tx.send(alert) {
            Ok(subscriber_count) => debug!(subscriber_count, "Published alert"),
            // no subscribers is normal when nothing listens
            Err(broadcast::error::SendError(alert)) => {
                debug!(alert_type = ?alert.alert_type, "Alert dropped, no subscribers")
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for AlertBus {
    async fn notify(&self, alert: Alert) {
        match alert.alert_type {
            AlertType::SystemAlert
            | AlertType::SwapFailed
            | AlertType::StopLoss
            | AlertType::PartialFill
            | AlertType::FillUnreconciled => warn!(
                alert_type = ?alert.alert_type,
                account = ?alert.account,
                message = %alert.message,
                "Alert"
            ),
            _ => info!(
                alert_type = ?alert.alert_type,
                account = ?alert.account,
                message = %alert.message,
                "Alert"
            ),
        }
        self.publish(alert);
    }
}

/// WeChat Work group robot
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building webhook client")?;
        Ok(Self { client, url })
    }

    pub fn payload(alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "msgtype": "text",
            "text": {
                "content": format!(
                    "{}\n{}",
                    alert.message,
                    alert.timestamp.format("%Y-%m-%d %H:%M:%S")
                )
            }
        })
    }

    async fn send(&self, url: &str, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(&Self::payload(alert))
            .send()
            .await
            .context("posting webhook")?;
        if !response.status().is_success() {
            bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: Alert) {
        let Some(url) = self.url.as_deref() else {
            warn!(message = %alert.message, "No webhook URL configured, alert not sent");
            return;
        };
        match self.send(url, &alert).await {
            Ok(()) => info!(alert_type = ?alert.alert_type, "📨 Webhook alert sent"),
            Err(e) => warn!(error = %format!("{:#}", e), "Failed to deliver webhook alert"),
        }
    }
}

/// Fans one alert out to several notifiers in order
pub struct NotifierSet {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for NotifierSet {
    async fn notify(&self, alert: Alert) {
        for notifier in &self.notifiers {
            notifier.notify(alert.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = AlertBus::new();
        let mut rx = bus.subscribe();
        bus.notify(Alert::new(AlertType::PositionOpened, Some("account_1"), "opened WIF"))
            .await;

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.alert_type, AlertType::PositionOpened);
        assert_eq!(alert.account.as_deref(), Some("account_1"));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = AlertBus::new();
        bus.notify(Alert::system("nobody listens")).await;
    }

    #[test]
    fn webhook_payload_appends_timestamp() {
        let mut alert = Alert::system("cycle failed");
        alert.timestamp = DateTime::parse_from_rfc3339("2025-04-21T08:35:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = WebhookNotifier::payload(&alert);
        assert_eq!(payload["msgtype"], "text");
        assert_eq!(payload["text"]["content"], "cycle failed\n2025-04-21 08:35:00");
    }

    #[tokio::test]
    async fn missing_webhook_url_is_not_an_error() {
        let notifier = WebhookNotifier::new(None).unwrap();
        notifier.notify(Alert::system("dropped")).await;
    }

    #[tokio::test]
    async fn set_fans_out() {
        let first = AlertBus::new();
        let second = AlertBus::new();
        let mut rx1 = first.subscribe();
        let mut rx2 = second.subscribe();
        let set = NotifierSet::new(vec![Box::new(first), Box::new(second)]);
        set.notify(Alert::system("both")).await;
        assert_eq!(rx1.recv().await.unwrap().message, "both");
        assert_eq!(rx2.recv().await.unwrap().message, "both");
    }
}
