//! Everything that crosses the process boundary: the viewer push message and
//! the REST request/response bodies.

pub mod message;
pub mod types;
