pub mod config;
pub mod dispatcher;
pub mod messages;
pub mod motor;
pub mod pid;
pub mod router;
pub mod runtime;
mod sync;
pub mod ws;
