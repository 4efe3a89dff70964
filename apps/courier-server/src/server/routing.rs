use courier_protocol::{encode_outbound_frame, OutboundFrame};
use tokio::sync::mpsc;

use super::{
    core::SLOW_CONSUMER_CLOSE_CODE,
    registry::{ConnectionRegistry, Presence},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PruneReason {
    SlowConsumer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Delivered,
    Offline,
    Pruned(PruneReason),
    Unencodable,
}

impl DeliveryOutcome {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Offline => "offline",
            Self::Pruned(PruneReason::SlowConsumer) => "slow_consumer",
            Self::Pruned(PruneReason::Closed) => "closed",
            Self::Unencodable => "serialize_error",
        }
    }
}

/// Best-effort live delivery of persisted messages.
///
/// Hand-off to a recipient is a non-blocking enqueue. A recipient whose queue
/// is full or closed is unregistered instead of stalling the caller.
#[derive(Clone)]
pub(crate) struct MessageRouter {
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub(crate) fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub(crate) fn route(&self, frame: &OutboundFrame) -> DeliveryOutcome {
        let Presence::Online(recipient) = self.registry.lookup(frame.receiver_id) else {
            return DeliveryOutcome::Offline;
        };
        let payload = match encode_outbound_frame(frame) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(event = "chat.route", outcome = "serialize_error", message_id = frame.id, %error);
                return DeliveryOutcome::Unencodable;
            }
        };

        match recipient.outbound.try_send(payload) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.registry
                    .unregister(frame.receiver_id, recipient.connection_id);
                recipient.close(SLOW_CONSUMER_CLOSE_CODE, "slow_consumer");
                tracing::warn!(
                    event = "chat.route",
                    outcome = "slow_consumer",
                    receiver_id = %frame.receiver_id,
                    connection_id = %recipient.connection_id,
                );
                DeliveryOutcome::Pruned(PruneReason::SlowConsumer)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.registry
                    .unregister(frame.receiver_id, recipient.connection_id);
                tracing::info!(
                    event = "chat.route",
                    outcome = "closed",
                    receiver_id = %frame.receiver_id,
                    connection_id = %recipient.connection_id,
                );
                DeliveryOutcome::Pruned(PruneReason::Closed)
            }
        }
    }
}
