// HTTP/1.1 upgrade handshake (RFC 6455 section 4)

use std::io::{self, Read, Write};

use super::base64;
use super::sha1::sha1;

pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const KEY_HEADER: &str = "Sec-WebSocket-Key";
pub const ACCEPT_HEADER: &str = "Sec-WebSocket-Accept";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 1024;
/// Upper bound on the request head before the peer is dropped
pub const MAX_REQUEST_BYTES: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed before the request head was complete")]
    ConnectionClosed,

    #[error("Missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("Request head exceeds size limit")]
    RequestTooLarge,

    #[error("Handshake response only partially written")]
    ShortWrite,

    #[error("Upgrade refused: {0}")]
    Refused(String),
}

/// `base64(sha1(key + GUID))`
pub fn compute_accept_key(key: &str) -> String {
    let mut input = String::with_capacity(key.len() + WEBSOCKET_GUID.len());
    input.push_str(key);
    input.push_str(WEBSOCKET_GUID);
    base64::encode(&sha1(input.as_bytes()))
}

/// Value of the first header line starting with `name:` (case-sensitive)
pub fn extract_header(head: &str, name: &str) -> Option<String> {
    head.split('\n').find_map(|line| {
        let value = line.strip_prefix(name)?.strip_prefix(':')?;
        Some(value.trim_start_matches(' ').trim_end_matches('\r').to_string())
    })
}

/// Read until the blank line ending an HTTP head
pub fn read_head<R: Read>(reader: &mut R) -> Result<String, HandshakeError> {
    let mut head = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    while !head.windows(HEADER_TERMINATOR.len()).any(|w| w == HEADER_TERMINATOR) {
        if head.len() >= MAX_REQUEST_BYTES {
            return Err(HandshakeError::RequestTooLarge);
        }
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Err(HandshakeError::ConnectionClosed),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        head.extend_from_slice(&chunk[..n]);
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

pub fn switching_protocols_response(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         {ACCEPT_HEADER}: {accept_key}\r\n\r\n"
    )
}

fn write_head<W: Write>(writer: &mut W, head: &str) -> Result<(), HandshakeError> {
    writer.write_all(head.as_bytes()).map_err(|e| match e.kind() {
        io::ErrorKind::WriteZero => HandshakeError::ShortWrite,
        _ => HandshakeError::Io(e),
    })?;
    writer.flush()?;
    Ok(())
}

/// Server side: read the upgrade request and answer with 101
pub fn accept<S: Read + Write>(stream: &mut S) -> Result<(), HandshakeError> {
    let head = read_head(stream)?;
    let key = extract_header(&head, KEY_HEADER)
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    write_head(stream, &switching_protocols_response(&compute_accept_key(&key)))
}

/// Client side: send the upgrade request and verify the accept key
pub fn connect<S: Read + Write>(stream: &mut S, host: &str, key: &str) -> Result<(), HandshakeError> {
    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         {KEY_HEADER}: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    write_head(stream, &request)?;

    let head = read_head(stream)?;
    let status = head.lines().next().unwrap_or_default();
    if !status.starts_with("HTTP/1.1 101") {
        return Err(HandshakeError::Refused(status.to_string()));
    }
    match extract_header(&head, ACCEPT_HEADER) {
        Some(accept) if accept == compute_accept_key(key) => Ok(()),
        _ => Err(HandshakeError::Refused("bad accept key".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex: reads from `input`, collects writes in `output`
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const REQUEST: &str = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_rfc6455_accept_key() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_extract_header() {
        assert_eq!(
            extract_header(REQUEST, KEY_HEADER).as_deref(),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
        assert_eq!(extract_header(REQUEST, "Host").as_deref(), Some("server.example.com"));
        // Matching is on the literal, case-sensitive prefix
        assert_eq!(extract_header(REQUEST, "sec-websocket-key"), None);
    }

    #[test]
    fn test_accept_writes_switching_protocols() {
        let mut stream = Duplex::new(REQUEST.as_bytes());
        accept(&mut stream).unwrap();

        let response = String::from_utf8(stream.output).unwrap();
        assert_eq!(response, switching_protocols_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_missing_key_aborts_without_response() {
        let mut stream = Duplex::new(b"GET / HTTP/1.1\r\nHost: car\r\n\r\n");
        assert!(matches!(accept(&mut stream), Err(HandshakeError::MissingKey)));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn test_truncated_and_oversized_requests() {
        let mut stream = Duplex::new(b"GET / HTTP/1.1\r\nHost: car\r\n");
        assert!(matches!(accept(&mut stream), Err(HandshakeError::ConnectionClosed)));

        let endless = vec![b'a'; MAX_REQUEST_BYTES + READ_CHUNK];
        let mut stream = Duplex::new(&endless);
        assert!(matches!(accept(&mut stream), Err(HandshakeError::RequestTooLarge)));
    }

    #[test]
    fn test_client_verifies_accept_key() {
        let response = switching_protocols_response(&compute_accept_key("abc"));
        let mut stream = Duplex::new(response.as_bytes());
        connect(&mut stream, "car:8080", "abc").unwrap();
        let request = String::from_utf8(stream.output).unwrap();
        assert_eq!(extract_header(&request, KEY_HEADER).as_deref(), Some("abc"));

        let mut stream = Duplex::new(response.as_bytes());
        assert!(matches!(
            connect(&mut stream, "car:8080", "other"),
            Err(HandshakeError::Refused(_))
        ));
    }
}
