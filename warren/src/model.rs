/// Broker assigned identifier of a delivered message.
pub type DeliveryTag = u64;
/// Identifier of a consumer registration in the broker.
pub type ConsumerTag = String;
/// AMQP reply code.
pub type ReplyCode = u16;

/// Reply codes in channel scope the broker may answer with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// The mandatory message cannot be routed to queues.
    NoRoute = 312,
    /// The client tried to access a resource it didn't have access.
    AccessRefused = 403,
    /// Queue or entity cannot be found.
    NotFound = 404,
    /// The client cannot access a resource because another client is working on what.
    ResourceLocked = 405,
    /// The work on resource is refused mostly because of validation errors.
    PreconditionFailed = 406,
}

impl From<ChannelError> for ReplyCode {
    fn from(value: ChannelError) -> Self {
        value as ReplyCode
    }
}

/// Delete the queue only if it doesn't have consumers.
#[derive(Clone, Copy, Debug, Default)]
pub struct IfUnused(pub bool);
/// Delete the queue only if it doesn't have messages.
#[derive(Clone, Copy, Debug, Default)]
pub struct IfEmpty(pub bool);
