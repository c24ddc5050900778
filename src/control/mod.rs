//! Administrative control surface
//!
//! Decodes the fixed-size payloads a privileged caller sends and hands each
//! command to the registry that owns it. Transport and authentication are
//! the caller's concern.

pub mod command;
pub mod dispatcher;

pub use command::AdminCommand;
pub use dispatcher::Dispatcher;
