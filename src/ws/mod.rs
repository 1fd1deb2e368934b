// WebSocket transport built directly on std TCP sockets
//
// - sha1, base64: digest and encoding for the accept key
// - handshake: HTTP upgrade request/response
// - frame: unfragmented text frame codec
// - server: accept loop and session handling

pub mod base64;
pub mod frame;
pub mod handshake;
pub mod server;
pub mod sha1;

pub use frame::{Frame, ProtocolError};
pub use handshake::HandshakeError;
pub use server::WsServer;
