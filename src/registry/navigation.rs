use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::persistence::now_millis;
use super::StreamRegistry;
use crate::error::{ProctorError, Result};

/// Page lifecycle notifications forwarded by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageEvent {
    BeforeUnload,
    VisibilityHidden,
    VisibilityVisible,
}

/// A programmatic navigation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "url", rename_all = "snake_case")]
pub enum NavigationIntent {
    Assign(String),
    Replace(String),
}

impl NavigationIntent {
    pub fn url(&self) -> &str {
        match self {
            NavigationIntent::Assign(url) | NavigationIntent::Replace(url) => url,
        }
    }
}

/// Performs the actual navigation once the guard has prepared for it.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, intent: NavigationIntent) -> Result<()>;
}

/// Navigator that hands intents to whoever owns the receiving end.
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<NavigationIntent>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NavigationIntent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Navigator for ChannelNavigator {
    async fn navigate(&self, intent: NavigationIntent) -> Result<()> {
        self.tx
            .send(intent)
            .map_err(|e| ProctorError::internal(format!("Navigation receiver closed: {}", e)))
    }
}

/// Keeps the camera alive across navigations: before the page goes away a
/// hidden sink holds the stream and the registry state is written out.
pub struct NavigationGuard {
    registry: Arc<StreamRegistry>,
    navigator: Arc<dyn Navigator>,
}

impl NavigationGuard {
    pub fn new(registry: Arc<StreamRegistry>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            registry,
            navigator,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn on_page_event(&self, event: PageEvent) {
        match event {
            PageEvent::BeforeUnload => {
                if self.preserve_stream() {
                    tracing::info!("Page unloading, preserving camera stream");
                }
            }
            PageEvent::VisibilityHidden => {
                if self.preserve_stream() {
                    tracing::debug!("Page hidden, ensured camera stream persistence");
                }
            }
            PageEvent::VisibilityVisible => {
                let restored = self.registry.restore();
                tracing::debug!(restored, "Page visible, checked camera stream");
            }
        }
    }

    /// Runs the keepalive preparation and then navigates.
    pub async fn navigate(&self, intent: NavigationIntent) -> Result<()> {
        self.prepare_for_navigation();
        tracing::info!(url = %intent.url(), "Navigating");
        self.navigator.navigate(intent).await
    }

    /// Returns true if there was an active stream to prepare.
    pub fn prepare_for_navigation(&self) -> bool {
        if !self.preserve_stream() {
            return false;
        }
        if let Err(e) = self.registry.persistence().record_navigation(now_millis()) {
            tracing::warn!(error = %e, "Failed to record navigation time");
        }
        true
    }

    fn preserve_stream(&self) -> bool {
        if !self.registry.is_active() || self.registry.stream().is_none() {
            return false;
        }
        self.registry.ensure_hidden_sink();
        if let Err(e) = self.registry.persist() {
            tracing::warn!(error = %e, "Failed to save camera state");
        }
        true
    }
}
