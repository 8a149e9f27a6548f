use std::path::Path;

use ipcwire_transport::UnixDomainSocket;
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::Result;

/// Accepts [`Connection`]s on a Unix domain socket.
pub struct Listener {
    socket: UnixDomainSocket,
    config: ConnectionConfig,
}

impl Listener {
    /// Bind to a socket path (mode `0600`).
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            socket: UnixDomainSocket::bind(path)?,
            config: ConnectionConfig::default(),
        })
    }

    /// Bind with explicit socket file permissions.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        Ok(Self {
            socket: UnixDomainSocket::bind_with_mode(path, mode)?,
            config: ConnectionConfig::default(),
        })
    }

    /// Limits applied to every accepted connection.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Block until a peer connects.
    pub fn accept(&self) -> Result<Connection> {
        let stream = self.socket.accept()?;
        debug!(path = %self.socket.path().display(), "accepted connection");
        Connection::from_stream_with_config(stream, self.config.clone())
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use super::*;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/ipcw-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("listener.sock")
    }

    #[test]
    fn accept_and_exchange() {
        let sock_path = make_sock_path("accept");
        let listener = Listener::bind(&sock_path).expect("listener should bind");

        let server = thread::spawn(move || {
            let mut conn = listener.accept().expect("listener should accept");
            let request: String = conn.recv().expect("request should arrive");
            conn.send(&request.to_uppercase())
                .expect("reply should send");
        });

        let mut client = Connection::connect(&sock_path).expect("client should connect");
        client.send("hello").expect("request should send");
        let reply: String = client.recv().expect("reply should arrive");
        assert_eq!(reply, "HELLO");

        server.join().expect("server thread should finish");
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn accepted_connections_use_listener_limits() {
        let sock_path = make_sock_path("limits");
        let mut config = ConnectionConfig::default();
        config.decoder.max_length = 2;
        let listener = Listener::bind(&sock_path)
            .expect("listener should bind")
            .with_config(config);

        let server = thread::spawn(move || {
            let mut conn = listener.accept().expect("listener should accept");
            let err = conn
                .recv::<Vec<u8>>()
                .expect_err("three elements exceed the limit");
            assert!(matches!(
                err,
                crate::ConnectionError::Decode(ipcwire_codec::DecodeError::SizeLimitExceeded {
                    length: 3,
                    limit: 2
                })
            ));
        });

        let mut client = Connection::connect(&sock_path).expect("client should connect");
        client.send(&vec![1u8, 2, 3]).expect("send should succeed");

        server.join().expect("server thread should finish");
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
