use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::warn;

use crate::channel::SharedChannel;
use crate::client_error;
use crate::error::ErrorKind;
use crate::model::DeliveryTag;

/// Accepts or rejects one delivery.
///
/// A handle is built for every delivery and it is bound to its delivery tag. At most one of
/// [`MessageAck::ack`] and [`MessageAck::nack`] reaches the broker; the second attempt fails with
/// [`ErrorKind::InvalidState`]. Clones share that state, so a clone can be kept by the application
/// to acknowledge the message later.
///
/// If the broker command fails the decision is not used up, it can be made again.
///
/// If the consumer was started with `no_ack` the broker already considers the message as
/// acknowledged and both methods do nothing.
#[derive(Clone)]
pub struct MessageAck {
    inner: Arc<AckState>,
}

struct AckState {
    delivery_tag: DeliveryTag,
    channel: Arc<SharedChannel>,
    no_ack: bool,
    settled: AtomicBool,
}

impl fmt::Debug for MessageAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageAck")
            .field("delivery_tag", &self.inner.delivery_tag)
            .field("no_ack", &self.inner.no_ack)
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl MessageAck {
    pub(crate) fn new(delivery_tag: DeliveryTag, channel: Arc<SharedChannel>, no_ack: bool) -> Self {
        Self {
            inner: Arc::new(AckState {
                delivery_tag,
                channel,
                no_ack,
                settled: AtomicBool::new(false),
            }),
        }
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.inner.delivery_tag
    }

    /// True if the delivery was acked or nacked through this handle or one of its clones.
    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }

    /// Sends `Basic.Ack` for the delivery.
    pub fn ack(&self) -> Result<()> {
        if self.inner.no_ack {
            return Ok(());
        }

        self.settle("ack")?;
        self.inner
            .channel
            .basic_ack(self.inner.delivery_tag, false)
            .inspect_err(|_| self.unsettle())
    }

    /// Sends `Basic.Nack` for the delivery. With `requeue` the broker delivers the message again,
    /// otherwise it is dropped or dead-lettered.
    pub fn nack(&self, requeue: bool) -> Result<()> {
        if self.inner.no_ack {
            return Ok(());
        }

        self.settle("nack")?;
        self.inner
            .channel
            .basic_nack(self.inner.delivery_tag, false, requeue)
            .inspect_err(|_| self.unsettle())
    }

    /// Rejects the delivery without requeue after a failed handler, unless the handler already
    /// decided about it.
    pub(crate) fn reject_unsettled(&self) -> Result<()> {
        if self.inner.no_ack || self.is_settled() {
            return Ok(());
        }

        match self.nack(false) {
            Err(e) if crate::error::error_kind(&e) == Some(ErrorKind::InvalidState) => Ok(()),
            other => other,
        }
    }

    fn settle(&self, operation: &str) -> Result<()> {
        let first = self
            .inner
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if !first {
            warn!(
                "Delivery {} is already acknowledged, {operation} is not sent",
                self.inner.delivery_tag
            );

            return client_error!(
                ErrorKind::InvalidState,
                format!("delivery {} is already acknowledged", self.inner.delivery_tag)
            );
        }

        Ok(())
    }

    fn unsettle(&self) {
        self.inner.settled.store(false, Ordering::Release);
    }
}
