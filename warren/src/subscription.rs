use std::sync::{Arc, Weak};

use anyhow::Result;
use log::debug;

use crate::channel::SharedChannel;
use crate::client_error;
use crate::error::ErrorKind;
use crate::model::ConsumerTag;

/// Lifecycle of a subscription. The consumer strategy is created and gets its sink before the
/// `Basic.Consume` is sent; a `Subscription` exists only once the broker accepted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Cancelled,
}

/// An active consumer registration.
///
/// It refers to the channel weakly, the channel is owned by the queue handles. Dropping a
/// subscription doesn't cancel it, that needs an explicit [`Subscription::cancel`].
#[derive(Debug)]
pub struct Subscription {
    consumer_tag: ConsumerTag,
    channel: Weak<SharedChannel>,
    state: SubscriptionState,
}

impl Subscription {
    pub(crate) fn new(consumer_tag: ConsumerTag, channel: &Arc<SharedChannel>) -> Self {
        Self {
            consumer_tag,
            channel: Arc::downgrade(channel),
            state: SubscriptionState::Subscribed,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Subscribed
    }

    /// Sends `Basic.Cancel` for the consumer. Deliveries already handed to the sink are still
    /// processed to completion.
    pub fn cancel(&mut self) -> Result<()> {
        if self.state == SubscriptionState::Cancelled {
            return client_error!(
                ErrorKind::InvalidState,
                format!("subscription {} is already cancelled", self.consumer_tag)
            );
        }

        let channel = match self.channel.upgrade() {
            Some(channel) => channel,
            None => return client_error!(ErrorKind::Channel, "channel of the subscription is closed"),
        };

        channel.basic_cancel(&self.consumer_tag)?;
        self.state = SubscriptionState::Cancelled;

        debug!("Subscription {} is cancelled", self.consumer_tag);

        Ok(())
    }
}
