//! Consumer, acknowledgement and request/reply layer over an AMQP channel.
//!
//! A [`Queue`] handle subscribes message handlers through a [`ConsumerStrategy`]. Every delivery
//! reaches the handler as a [`MessageEnvelope`] together with a [`MessageAck`] which accepts or
//! rejects it exactly once. [`Queue::respond`] turns the handler into the responding side of a
//! request/reply exchange, [`RpcClient`] is the requesting side.
//!
//! The broker connection itself is behind the [`BrokerChannel`] trait; [`memory::MemoryBroker`]
//! is an in-process implementation.

mod dev;
pub use dev::setup_logger;

mod error;
pub use error::{error_kind, ClientError, ErrorKind};

mod ack;
pub use ack::MessageAck;

mod channel;
pub use channel::{BasicConsumer, BrokerChannel, QueueDeclareOk, SharedChannel};

mod config;
pub use config::{load_config, parse_config, Config};

mod consumer;
pub use consumer::{ConsumerOptions, ConsumerStrategy};

pub mod memory;

mod message;
pub use message::{Delivery, Fault, MessageEnvelope, MessageProperties, Response, FAULT_HEADER};

mod model;
pub use model::{ChannelError, ConsumerTag, DeliveryTag, IfEmpty, IfUnused, ReplyCode};

mod queue;
pub use queue::{Queue, QueueOptions};

mod rpc;
pub use rpc::{PendingReply, RpcClient};

pub mod serializer;
pub use serializer::{JsonSerializer, Serializer};

mod sink;
pub use sink::{DecodingSink, MessageSink, ReceiveSink, RpcResponder};

mod subscription;
pub use subscription::{Subscription, SubscriptionState};
