mod consume;
mod helper;
mod queue;
mod respond;
mod rpc;
