//! Control socket of the estimator, and client of the control socket of
//! the queueing subsystem. Both speak the same line protocol, see
//! [`protocol`].

mod client;
pub mod protocol;
mod server;

pub use self::{
    client::ControlSocketCounters,
    protocol::{Request, Status, handler_name},
    server::ControlServer,
};
