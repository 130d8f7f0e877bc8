//! Transport module - isolated execution contexts for the decode worker.
//!
//! A worker is reached only through a [`WorkerPort`]: serialized envelopes
//! go in, [`WorkerEvent`]s come out. The default [`ThreadSpawner`] runs
//! each worker on its own OS thread.

mod port;
mod thread;

pub use port::{WorkerEndpoint, WorkerEvent, WorkerPort, WorkerSpawner};
pub use thread::ThreadSpawner;
