//! Shared helpers for the end-to-end tests: in-process servers on
//! ephemeral ports and a tiny RESP client.

use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use emberdb::config::Config;
use emberdb::resp::{RespError, RespValue};
use emberdb::server::Server;

pub fn primary_config() -> Config {
    Config {
        dir: String::new(),
        dbfilename: "dump.rdb".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        replicaof: None,
    }
}

pub fn replica_config(primary: SocketAddr) -> Config {
    Config {
        replicaof: Some((primary.ip().to_string(), primary.port())),
        ..primary_config()
    }
}

/// Binds and runs a server, returning its address and a shutdown handle.
pub async fn spawn_server(config: Config) -> (SocketAddr, broadcast::Sender<()>) {
    let server = Server::bind(config).await.expect("bind test server");
    let addr = server.local_addr().expect("server address");
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, shutdown)
}

/// A minimal RESP client over a raw socket.
pub struct TestClient {
    stream: TcpStream,
    buffer: BytesMut,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        TestClient {
            stream: TcpStream::connect(addr).await.expect("connect to server"),
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Sends a command as an array of bulk strings and reads one reply.
    pub async fn request(&mut self, parts: &[&str]) -> RespValue {
        self.send(parts).await;
        self.read_frame().await
    }

    pub async fn send(&mut self, parts: &[&str]) {
        let frame = RespValue::Array(
            parts
                .iter()
                .map(|part| RespValue::BulkString(part.to_string()))
                .collect(),
        );

        self.stream
            .write_all(&frame.encode())
            .await
            .expect("write request");
        self.stream.flush().await.expect("flush request");
    }

    pub async fn read_frame(&mut self) -> RespValue {
        loop {
            match RespValue::decode(&self.buffer) {
                Ok((value, consumed)) => {
                    self.buffer.advance(consumed);
                    return value;
                }
                Err(RespError::Incomplete) => {
                    let read = self
                        .stream
                        .read_buf(&mut self.buffer)
                        .await
                        .expect("read reply");
                    assert!(read > 0, "server closed the connection");
                }
                Err(error) => panic!("undecodable reply: {}", error),
            }
        }
    }
}

pub fn simple(s: &str) -> RespValue {
    RespValue::SimpleString(s.to_string())
}

pub fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(s.to_string())
}
