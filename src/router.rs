// Message router: one decoded text payload in, one outcome out
//
// Command messages go to the dispatcher, config messages to the
// configuration store. Accepted config updates are pushed to every
// subscribed controller. Nothing here ever fails the connection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ConfigRejected, ConfigurationProvider, Reconfigure};
use crate::dispatcher::CommandDispatcher;
use crate::messages::{Channel, KEEPALIVE, MessageFormatError, parse_inbound};

/// What happened to a routed message
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Keepalive,
    CommandAccepted(String),
    UnknownCommand(String),
    ConfigApplied(String),
    ConfigRejected(ConfigRejected),
    Rejected(MessageFormatError),
}

pub struct Router {
    dispatcher: CommandDispatcher,
    config: Arc<dyn ConfigurationProvider>,
    subscribers: Vec<Arc<dyn Reconfigure>>,
}

impl Router {
    pub fn new(dispatcher: CommandDispatcher, config: Arc<dyn ConfigurationProvider>) -> Self {
        Self {
            dispatcher,
            config,
            subscribers: Vec::new(),
        }
    }

    /// Receive every accepted configuration snapshot
    pub fn subscribe(&mut self, subscriber: Arc<dyn Reconfigure>) {
        self.subscribers.push(subscriber);
    }

    pub fn route(&self, payload: &str) -> RouteOutcome {
        if payload == KEEPALIVE {
            return RouteOutcome::Keepalive;
        }

        let message = match parse_inbound(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(payload = %payload, "Rejected message: {}", e);
                return RouteOutcome::Rejected(e);
            }
        };

        match message.channel {
            Channel::Command => {
                let value = match message.command_value() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Rejected message: {}", e);
                        return RouteOutcome::Rejected(e);
                    }
                };

                if self.dispatcher.dispatch(&message.key, value) {
                    debug!(command = %message.key, value = ?value, "Command accepted");
                    RouteOutcome::CommandAccepted(message.key)
                } else {
                    warn!(command = %message.key, "Unknown command");
                    RouteOutcome::UnknownCommand(message.key)
                }
            }
            Channel::Config => {
                let value = message.value.as_deref().unwrap_or_default();
                match self.config.on_update(&message.key, value) {
                    Ok(snapshot) => {
                        for subscriber in &self.subscribers {
                            subscriber.reconfigure(&snapshot);
                        }
                        snapshot.log_effective();
                        RouteOutcome::ConfigApplied(message.key)
                    }
                    Err(e) => {
                        info!("Configuration update rejected, keeping previous: {}", e);
                        RouteOutcome::ConfigRejected(e)
                    }
                }
            }
        }
    }
}
