/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::runner
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Serial event loop: initialise the agent, register on the
    bus and feed inbound traffic to the lifecycle until the
    bus closes or shutdown is requested.

  Security / Safety Notes:
    Malformed inbound messages are logged and dropped; they
    never terminate the loop.

  Dependencies:
    tokio for select and signal handling.

  Operational Scope:
    One runner per agent process.

  Revision History:
    2026-10-16 COD  Added serial runner.
  ------------------------------------------------------------
  SSE Principles Observed:
    - One event applied at a time
    - Log digest sealed on every exit path
============================================================*/

use std::future::Future;
use std::sync::Arc;

use crate::agent::UpdateAgent;
use crate::bus::{message_kind, BusAdapter, BusEvent, Inbound, StartConfig};
use crate::config::AgentConfig;
use crate::diagnostics::StatusReporter;
use crate::error::Result;
use crate::lifecycle::{Lifecycle, LifecycleSettings};
use crate::logger::Logger;
use crate::version_store::VersionStore;

pub struct Runner<A> {
    lifecycle: Lifecycle<A>,
    bus: Arc<dyn BusAdapter>,
    logger: Arc<Logger>,
    start: StartConfig,
}

impl<A: UpdateAgent> Runner<A> {
    pub fn new(
        agent: A,
        bus: Arc<dyn BusAdapter>,
        store: VersionStore,
        logger: Arc<Logger>,
        config: &AgentConfig,
    ) -> Self {
        let reporter = StatusReporter::new(bus.clone(), config.node_type.clone(), logger.clone());
        let lifecycle = Lifecycle::new(
            agent,
            store,
            reporter,
            logger.clone(),
            LifecycleSettings::from(config),
        );
        Self {
            lifecycle,
            bus,
            logger,
            start: StartConfig::from(config),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle<A> {
        &self.lifecycle
    }

    /// Run until the bus closes or Ctrl-C is received.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until the bus closes or `shutdown` completes. Messages already
    /// queued are handled before a ready `shutdown` is honoured.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.lifecycle.agent_mut().init().await?;
        let node_type = self.lifecycle.node_type().to_string();
        let mut inbound = self.bus.start(&node_type, &self.start).await?;
        self.logger.info(
            "AGENT-START",
            format!("{node_type} registered on {}", self.start.url),
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                message = inbound.recv() => match message {
                    Some(message) => self.dispatch(message).await,
                    None => {
                        self.logger.info("AGENT-STOP", "bus closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    self.logger.info("AGENT-STOP", "shutdown requested");
                    break;
                }
            }
        }

        self.logger.finalize()
    }

    async fn dispatch(&mut self, inbound: Inbound) {
        let raw = match inbound {
            Inbound::Presence(connected) => {
                self.lifecycle.presence(connected);
                return;
            }
            Inbound::Message(raw) => raw,
        };

        let kind = message_kind(&raw).unwrap_or_default();
        if self.lifecycle.agent_mut().on_message(&kind, &raw) {
            self.logger
                .debug("DISPATCH", format!("{kind} handled by agent"));
            return;
        }

        match BusEvent::parse(&raw) {
            Ok(event) => {
                if let Err(err) = self.lifecycle.handle(event).await {
                    self.logger
                        .error("DISPATCH", format!("{kind}: {err}"));
                }
            }
            Err(err) => {
                self.logger
                    .warn("DISPATCH", format!("dropping malformed message: {err}"));
            }
        }
    }
}
