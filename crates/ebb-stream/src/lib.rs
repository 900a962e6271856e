//! ebb-stream — producer/consumer streams with explicit demand.
//!
//! A consumer ([`InputStream`]) never receives more items than it asked
//! for through its [`OutputRequest`]. Producers ([`OutputStream`]) keep
//! their state behind a lock that is only taken on their [`EventLoop`]; all
//! control traffic from consumers is queued there, so credit accounting is
//! serial without the consumer having to know which thread the producer
//! runs on.
//!
//! Building blocks:
//!
//! - [`PushStream`]: fed by hand, buffers until demand arrives.
//! - [`IterStream`]: emits an iterator.
//! - [`MapStream`]: transforms items, forwarding credit upstream.
//! - [`CollectStream`]: gathers a stream into a [`Future`](ebb_future::Future).

pub mod collect;
pub mod credit;
mod error;
pub mod event_loop;
pub mod iter;
pub mod map;
pub mod protocol;
pub mod push;

pub use collect::CollectStream;
pub use credit::Credit;
pub use error::StreamError;
pub use event_loop::{EventLoop, EventLoopGroup, HopExt};
pub use iter::IterStream;
pub use map::MapStream;
pub use protocol::{
    attach, ConnectionContext, ConnectionEvent, Demand, Downstream, InputStream, OutputRequest,
    OutputStream, Producer,
};
pub use push::PushStream;
