//! Request/response model and the generic network interface.

mod transport;
mod types;

pub use transport::{HttpTransport, Transport};
pub use types::{Headers, Request, RequestMode, Response, ResponseSnapshot, ResponseSource};
