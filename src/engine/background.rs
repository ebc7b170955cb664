//! Cross-context keep-alive and state broadcast
//!
//! Messages travel over a host-provided channel (a service worker, another
//! tab, a companion process). Message kinds form a closed tagged variant so
//! dispatch is exhaustive; when no channel is attached every operation is a
//! no-op and the engine behaves identically.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::engine::lifecycle::Visibility;

/// Closed set of cross-context message kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundMessage {
    /// Liveness probe from the background collaborator
    KeepAlive,
    /// Reply confirming the engine context is alive
    KeepAliveConfirmation,
    /// This context's visibility changed (published)
    VisibilityChange { visible: bool },
    /// Another context's visibility changed (consumed)
    VisibilityUpdate { visible: bool },
    /// This engine's running state changed (published)
    AudioState { running: bool },
    /// Another engine's running state changed (consumed)
    AudioStateUpdate { running: bool },
}

/// What the engine should do with a consumed message
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundReaction {
    /// Send this reply back over the channel
    Reply(BackgroundMessage),
    /// Treat the page as having this visibility
    ApplyVisibility(Visibility),
    /// Informational only
    None,
}

/// Publishes engine state over an optional channel and interprets incoming
/// broadcasts. Absence of the channel degrades every publish to a no-op.
pub struct BackgroundCoordinator {
    tx: Option<UnboundedSender<BackgroundMessage>>,
}

impl BackgroundCoordinator {
    /// Coordinator with no channel attached; all publishes are no-ops
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn new(tx: UnboundedSender<BackgroundMessage>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    fn publish(&self, message: BackgroundMessage) {
        if let Some(tx) = &self.tx {
            // A closed channel is equivalent to no channel
            let _ = tx.send(message);
        }
    }

    pub fn publish_audio_state(&self, running: bool) {
        self.publish(BackgroundMessage::AudioState { running });
    }

    pub fn publish_visibility(&self, visibility: Visibility) {
        self.publish(BackgroundMessage::VisibilityChange {
            visible: visibility == Visibility::Visible,
        });
    }

    /// Exhaustively interprets an incoming message. Replies are also sent
    /// over the channel when one is attached.
    pub fn handle_incoming(&self, message: &BackgroundMessage) -> BackgroundReaction {
        match message {
            BackgroundMessage::KeepAlive => {
                let reply = BackgroundMessage::KeepAliveConfirmation;
                self.publish(reply.clone());
                BackgroundReaction::Reply(reply)
            }
            BackgroundMessage::VisibilityUpdate { visible } => {
                BackgroundReaction::ApplyVisibility(if *visible {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                })
            }
            BackgroundMessage::KeepAliveConfirmation
            | BackgroundMessage::VisibilityChange { .. }
            | BackgroundMessage::AudioState { .. }
            | BackgroundMessage::AudioStateUpdate { .. } => BackgroundReaction::None,
        }
    }
}
