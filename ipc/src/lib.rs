//! In-process async IPC fabric.
//!
//! A connection is an ordered stream of frames from one [`Endpoint`] to one
//! [`Listener`]. Requests carry a method code and four inline argument words;
//! bulk payloads travel as separate data phases on the same connection, in
//! order, exactly like the request/reply pairs the broker was designed
//! against. Every send and every reply wait is a suspension point.
//!
//! One connection carries one conversation at a time. Callers that need
//! parallel conversations with the same peer hold several connections and
//! arbitrate them through an [`ExchangePool`].

mod exchange;
mod frame;

pub use exchange::{Connect, Exchange, ExchangePool};
pub use frame::{channel, Call, Endpoint, Listener, PendingReply, ReadRequest, Reply};
