//! Sigil Sender - socket transport for active probing
//!
//! [`DefaultServiceSender`] implements [`sigil_common::ServiceSender`] over
//! tokio sockets: plain TCP, UDP (forced by a `U:` port prefix) and TLS via
//! native-tls with certificate and hostname checks disabled.

pub mod exchange;
pub mod options;
pub mod sender;

pub use options::SenderOptions;
pub use sender::DefaultServiceSender;
