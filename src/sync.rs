//! Startup gate for the scan loop.
//!
//! Telemetry topics are rooted at the portal id, which the bus only hands out
//! after the gateway has connected and registered. The synchronizer walks
//! `WaitBus -> WaitPortalId -> Running` and never goes back.

use crate::state::GatewayState;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    WaitBus,
    WaitPortalId,
    Running,
}

#[derive(Error, Debug, PartialEq)]
pub enum StartupError {
    #[error("no portal id assigned after {attempts} polls, is dbus-mqtt-devices running?")]
    Timeout { attempts: u32 },
    #[error("gateway state channel closed before startup completed")]
    Closed,
}

pub struct StartupSynchronizer {
    status: watch::Receiver<GatewayState>,
    state: StartupState,
    poll_interval: Duration,
    portal_attempts: u32,
}

impl StartupSynchronizer {
    pub fn new(
        status: watch::Receiver<GatewayState>,
        poll_interval: Duration,
        portal_attempts: u32,
    ) -> Self {
        Self {
            status,
            state: StartupState::WaitBus,
            poll_interval,
            portal_attempts,
        }
    }

    pub fn state(&self) -> StartupState {
        self.state
    }

    /// Block until the bus is connected and a portal id has been assigned.
    ///
    /// Returns the portal id. The bus wait is unbounded; the portal id wait
    /// gives up on the last of `portal_attempts` polls.
    pub async fn wait_ready(&mut self) -> Result<String, StartupError> {
        if self.state == StartupState::WaitBus {
            self.wait_for_bus().await?;
            self.state = StartupState::WaitPortalId;
        }

        let portal_id = self.wait_for_portal_id().await?;
        self.state = StartupState::Running;
        info!(portal_id = %portal_id, "Gateway ready");
        Ok(portal_id)
    }

    async fn wait_for_bus(&mut self) -> Result<(), StartupError> {
        while !self.status.borrow_and_update().bus_connected {
            info!("Waiting for MQTT connection");
            self.wait_one_interval(|s| s.bus_connected).await?;
        }
        Ok(())
    }

    async fn wait_for_portal_id(&mut self) -> Result<String, StartupError> {
        for attempt in 1..=self.portal_attempts {
            if let Some(portal_id) = self.status.borrow_and_update().portal_id.clone() {
                return Ok(portal_id);
            }
            if attempt == self.portal_attempts {
                break;
            }
            info!(remaining = self.portal_attempts - attempt, "Waiting for portal id");
            self.wait_one_interval(|s| s.portal_id.is_some()).await?;
        }

        let err = StartupError::Timeout {
            attempts: self.portal_attempts,
        };
        error!("{err}");
        Err(err)
    }

    /// Sleep for one poll interval, waking early once `ready` holds.
    async fn wait_one_interval(
        &mut self,
        ready: impl Fn(&GatewayState) -> bool,
    ) -> Result<(), StartupError> {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            match timeout_at(deadline, self.status.changed()).await {
                Ok(Ok(())) if ready(&*self.status.borrow()) => return Ok(()),
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(StartupError::Closed),
                Err(_elapsed) => return Ok(()),
            }
        }
    }
}
