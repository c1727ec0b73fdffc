//! Channels: typed, instantaneous publish-subscribe.
//!
//! A `Listener` waits on one channel for signals of a given topic (or any
//! topic). A `Signal` wakes every matching listener that is deployed at the
//! moment it deploys, highest priority first, with ties broken by a fresh
//! random draw per broadcast. It then succeeds immediately.

use super::ActionKind;
use crate::common::{ActionId, ChannelId, Priority, Value};
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};
use rand::Rng;
use tracing::trace;

/// The listeners currently subscribed to one channel, in subscription order.
#[derive(Debug, Default)]
pub(crate) struct Channel {
    listeners: Vec<ActionId>,
}

impl Simulator {
    /// Opens a new channel.
    pub fn channel(&mut self) -> ChannelId {
        self.channels.insert(Channel::default())
    }

    /// A listener for `topic` on `channel`; `None` matches every topic.
    pub fn listener(
        &mut self,
        channel: ChannelId,
        topic: Option<&str>,
        priority: Priority,
    ) -> SimResult<ActionId> {
        if !self.channels.contains_key(channel) {
            return Err(SimError::UnknownChannel(channel));
        }
        Ok(self.insert_action(ActionKind::Listener {
            channel,
            topic: topic.map(str::to_string),
            priority,
        }))
    }

    /// A signal of `topic` carrying `payload`, broadcast when it deploys.
    pub fn signal(&mut self, channel: ChannelId, topic: &str, payload: Value) -> SimResult<ActionId> {
        if !self.channels.contains_key(channel) {
            return Err(SimError::UnknownChannel(channel));
        }
        Ok(self.insert_action(ActionKind::Signal {
            channel,
            topic: topic.to_string(),
            payload,
            woken: 0,
        }))
    }

    /// Deploys a free-standing signal and returns how many listeners it woke.
    pub fn broadcast(&mut self, channel: ChannelId, topic: &str, payload: Value) -> SimResult<usize> {
        let signal = self.signal(channel, topic, payload)?;
        self.start(signal)?;
        let woken = match &self.node(signal)?.kind {
            ActionKind::Signal { woken, .. } => *woken,
            _ => 0,
        };
        self.release(signal)?;
        Ok(woken)
    }

    /// Number of listeners currently deployed on `channel`.
    pub fn listener_count(&self, channel: ChannelId) -> usize {
        self.channels.get(channel).map_or(0, |c| c.listeners.len())
    }

    pub(crate) fn subscribe(&mut self, listener: ActionId) -> SimResult<()> {
        let channel = match &self.node(listener)?.kind {
            ActionKind::Listener { channel, .. } => *channel,
            _ => return Err(SimError::UnknownAction(listener)),
        };
        self.channels
            .get_mut(channel)
            .ok_or(SimError::UnknownChannel(channel))?
            .listeners
            .push(listener);
        Ok(())
    }

    pub(crate) fn unsubscribe(&mut self, listener: ActionId) {
        let channel = match self.actions.get(listener).map(|n| &n.kind) {
            Some(ActionKind::Listener { channel, .. }) => *channel,
            _ => return,
        };
        if let Some(channel) = self.channels.get_mut(channel) {
            channel.listeners.retain(|l| *l != listener);
        }
    }

    /// Drops every subscription. Channels themselves stay valid across runs.
    pub(crate) fn clear_channels(&mut self) {
        for (_, channel) in self.channels.iter_mut() {
            channel.listeners.clear();
        }
    }

    pub(crate) fn emit_signal(&mut self, signal: ActionId) -> SimResult<()> {
        let (channel, topic, payload) = match &self.node(signal)?.kind {
            ActionKind::Signal { channel, topic, payload, .. } => {
                (*channel, topic.clone(), payload.clone())
            }
            _ => return Err(SimError::UnknownAction(signal)),
        };
        let subscribed = self
            .channels
            .get(channel)
            .ok_or(SimError::UnknownChannel(channel))?
            .listeners
            .clone();

        let mut matching: Vec<(Priority, u64, ActionId)> = Vec::new();
        for listener in subscribed {
            let priority = match self.actions.get(listener).map(|n| &n.kind) {
                Some(ActionKind::Listener { topic: wanted, priority, .. })
                    if wanted.as_deref().map_or(true, |w| w == topic) =>
                {
                    *priority
                }
                _ => continue,
            };
            let draw: u64 = self.rng.gen();
            matching.push((priority, draw, listener));
        }
        matching.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut woken = 0;
        for (_, _, listener) in matching {
            if self.is_active(listener) {
                self.resolve(listener, true, payload.clone())?;
                woken += 1;
            }
        }
        trace!("signal {} woke {} listeners", topic, woken);
        if let ActionKind::Signal { woken: slot, .. } = &mut self.node_mut(signal)?.kind {
            *slot = woken;
        }
        if self.is_active(signal) {
            self.resolve(signal, true, payload)?;
        }
        Ok(())
    }
}
