//! Identity reporter: publishes the configured machine name once.

use async_trait::async_trait;

use crate::bus::{Bus, Publisher};
use crate::error::ProviderError;
use crate::provider::{run_detection, stopped_is_ok, Lifecycle, Provider};

pub const KEY: &str = "machine";

#[derive(Debug)]
pub struct MachineProvider {
    lifecycle: Lifecycle,
    publisher: Publisher,
    machine: String,
}

impl MachineProvider {
    pub fn new(machine: impl Into<String>, bus: &Bus) -> Self {
        let lifecycle = Lifecycle::new("machine");
        let publisher = lifecycle.publisher(bus);
        Self {
            lifecycle,
            publisher,
            machine: machine.into(),
        }
    }
}

#[async_trait]
impl Provider for MachineProvider {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn prefixes(&self, _args: &[String]) -> Vec<String> {
        vec![KEY.to_string()]
    }

    async fn main(&self, _args: &[String]) -> Result<(), ProviderError> {
        run_detection(&self.lifecycle, |stop| async move {
            stopped_is_ok(
                self.publisher
                    .publish(KEY, &self.machine)
                    .await
                    .map_err(ProviderError::from),
            )?;
            stop.cancelled().await;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.lifecycle.stop();
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ProviderError> {
        Err(ProviderError::read_only(key))
    }

    async fn set(&self, key: &str, _value: &str) -> Result<(), ProviderError> {
        Err(ProviderError::read_only(key))
    }
}
