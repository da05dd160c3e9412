//! # Command Dispatcher
//!
//! Unicasts a control verb to one pump.
//!
//! Commands are never queued: an absent pump is an immediate failure. A
//! failed write is reported to the caller but leaves the registry entry in
//! place; the liveness loop owns eviction of that connection.

use std::sync::Arc;

use fuelnet_core::{CommandVerb, PumpId};
use tracing::{info, warn};

use crate::error::{LinkError, LinkResult};
use crate::protocol::Record;
use crate::registry::Registry;

pub struct CommandDispatcher {
    registry: Arc<Registry<PumpId>>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<Registry<PumpId>>) -> Self {
        CommandDispatcher { registry }
    }

    /// Sends `verb` to `pump_id`.
    ///
    /// ## Errors
    /// - [`LinkError::NotConnected`] if the pump has no live entry
    /// - [`LinkError::WriteFailed`] if the single write attempt fails
    pub async fn send_command(
        &self,
        pump_id: PumpId,
        verb: CommandVerb,
        reason: &str,
    ) -> LinkResult<()> {
        let conn = self
            .registry
            .get(&pump_id)
            .await
            .ok_or(LinkError::NotConnected(pump_id))?;

        let record = Record::command(pump_id, verb, reason);
        match conn.send(&record).await {
            Ok(()) => {
                info!(pump_id = %pump_id, verb = %verb, reason, "Command sent");
                Ok(())
            }
            Err(e) => {
                warn!(pump_id = %pump_id, verb = %verb, %e, "Command write failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandPayload;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_absent_pump_fails_immediately() {
        let registry = Arc::new(Registry::new());
        let dispatcher = CommandDispatcher::new(registry.clone());

        let result = dispatcher
            .send_command(PumpId::new(9), CommandVerb::Pause, "test")
            .await;
        assert!(matches!(result, Err(LinkError::NotConnected(id)) if id == PumpId::new(9)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_command_reaches_pump() {
        let registry = Arc::new(Registry::new());
        let (client, server) = duplex(1024);
        registry
            .register(PumpId::new(1), None, server)
            .await;

        let dispatcher = CommandDispatcher::new(registry);
        dispatcher
            .send_command(PumpId::new(1), CommandVerb::EmergencyStop, "spill")
            .await
            .unwrap();

        let mut lines = BufReader::new(client).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        match Record::from_line(&line).unwrap() {
            Record::Command(CommandPayload { pump_id, verb, reason, .. }) => {
                assert_eq!(pump_id, PumpId::new(1));
                assert_eq!(verb, CommandVerb::EmergencyStop);
                assert_eq!(reason, "spill");
            }
            other => panic!("Expected command, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_write_failure_does_not_evict() {
        let registry = Arc::new(Registry::new());
        let (client, server) = duplex(1024);
        registry
            .register(PumpId::new(2), None, server)
            .await;
        drop(client);

        let dispatcher = CommandDispatcher::new(registry.clone());
        let result = dispatcher
            .send_command(PumpId::new(2), CommandVerb::Resume, "")
            .await;

        assert!(matches!(result, Err(LinkError::WriteFailed(_))));
        assert!(registry.contains(&PumpId::new(2)).await);
    }
}
