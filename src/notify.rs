//! Notification transports and fan-out
//!
//! Delivery is fire-and-forget relative to the scan pipeline: the dispatcher
//! runs behind a broadcast channel, time-boxes every send, and swallows
//! individual channel failures. The only trace a failed delivery leaves is
//! `notification_sent = false` on the alert.
//!
//! The set of channel kinds is open: anything implementing
//! `NotificationTransport` can be registered under a channel id at runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::alerts::Alert;
use crate::config::{ChannelConfig, Discord, Webhook};
use crate::detector::Severity;
use crate::registry::MonitoringTarget;

/// Delivers one alert over one channel
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, alert: &Alert, target: &MonitoringTarget) -> anyhow::Result<()>;
}

/// Open registry of transports, keyed by channel id
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Arc<dyn NotificationTransport>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the config file's channel table.
    pub fn from_config(channels: &HashMap<String, ChannelConfig>) -> Self {
        let mut transports: HashMap<String, Arc<dyn NotificationTransport>> = HashMap::new();

        for (id, config) in channels {
            let transport: Arc<dyn NotificationTransport> = match config {
                ChannelConfig::Webhook(webhook) => Arc::new(WebhookTransport::new(webhook.clone())),
                ChannelConfig::Discord(discord) => Arc::new(DiscordTransport::new(discord.clone())),
            };
            transports.insert(id.clone(), transport);
        }

        Self {
            transports: RwLock::new(transports),
        }
    }

    /// Register (or replace) a transport under a channel id.
    pub async fn register(&self, channel_id: impl Into<String>, transport: Arc<dyn NotificationTransport>) {
        self.transports
            .write()
            .await
            .insert(channel_id.into(), transport);
    }

    pub async fn get(&self, channel_id: &str) -> Option<Arc<dyn NotificationTransport>> {
        self.transports.read().await.get(channel_id).cloned()
    }
}

/// Fan one alert out to all of the target's channels.
///
/// Each send is bounded by `send_timeout`. Returns true when at least one
/// channel accepted the alert; failures are logged and swallowed.
#[instrument(skip_all, fields(alert_type = %alert.alert_type, target = %target.display_name()))]
pub async fn dispatch_alert(
    registry: &TransportRegistry,
    alert: &Alert,
    target: &MonitoringTarget,
    send_timeout: Duration,
) -> bool {
    let sends = target.notify_channels.iter().map(|channel_id| async move {
        let Some(transport) = registry.get(channel_id).await else {
            warn!("no transport registered for channel '{channel_id}'");
            return false;
        };

        match tokio::time::timeout(send_timeout, transport.send(alert, target)).await {
            Ok(Ok(())) => {
                debug!("delivered alert via '{channel_id}'");
                true
            }
            Ok(Err(e)) => {
                warn!("delivery via '{channel_id}' failed: {e:#}");
                false
            }
            Err(_) => {
                warn!("delivery via '{channel_id}' timed out after {send_timeout:?}");
                false
            }
        }
    });

    join_all(sends).await.into_iter().any(|sent| sent)
}

/// Plain JSON webhook transport
pub struct WebhookTransport {
    client: reqwest::Client,
    config: Webhook,
}

impl WebhookTransport {
    pub fn new(config: Webhook) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, alert: &Alert, target: &MonitoringTarget) -> anyhow::Result<()> {
        let payload = json!({
            "alert_type": alert.alert_type,
            "severity": alert.severity,
            "title": alert.title,
            "message": alert.description,
            "target": target.display_name(),
            "url": target.url,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("webhook returned status {}", response.status());
        }

        Ok(())
    }
}

// ============================================================================
// Discord transport
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            content: None,
            embeds: Vec::new(),
        }
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Discord webhook transport with severity-colored embeds
pub struct DiscordTransport {
    client: reqwest::Client,
    config: Discord,
}

impl DiscordTransport {
    pub fn new(config: Discord) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn severity_color(severity: Severity) -> u32 {
        match severity {
            Severity::Low => 5793266,       // Light blue
            Severity::Medium => 16776960,   // Yellow
            Severity::High => 15158332,     // Red
            Severity::Critical => 10038562, // Dark red
        }
    }

    fn build_alert_embed(&self, alert: &Alert, target: &MonitoringTarget) -> Embed {
        Embed {
            title: Some(alert.title.clone()),
            description: Some(alert.description.clone()),
            color: Some(Self::severity_color(alert.severity)),
            fields: vec![
                EmbedField {
                    name: "Severity".to_string(),
                    value: alert.severity.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Type".to_string(),
                    value: alert.alert_type.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Site".to_string(),
                    value: target.url.clone(),
                    inline: false,
                },
            ],
            footer: Some(EmbedFooter {
                text: format!("Target: {}", target.display_name()),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }
}

#[async_trait]
impl NotificationTransport for DiscordTransport {
    async fn send(&self, alert: &Alert, target: &MonitoringTarget) -> anyhow::Result<()> {
        let embed = self.build_alert_embed(alert, target);

        let mut builder = MessageBuilder::new().add_embed(embed);
        if let Some(user_id) = &self.config.user_id {
            builder = builder.content(format!(
                "🚨 ({} ~ {}) <@{user_id}>",
                target.display_name(),
                alert.alert_type
            ));
        }

        let response = self
            .client
            .post(&self.config.url)
            .json(&builder.build())
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Discord webhook returned status {}", response.status());
        }

        Ok(())
    }
}
