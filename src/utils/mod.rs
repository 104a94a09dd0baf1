//! Utility modules

pub mod context;
pub mod error;
pub mod resp;

pub use context::Context;
pub use error::{
    ClientError, ContextError, MultiError, PartialError, Result, TopologyError, NO_SUCH_MASTER,
};
pub use resp::{RespDecoder, RespEncoder, RespValue};
