//! Raw-socket SCPI transport.
//!
//! Most LAN instruments expose a socket server that accepts newline-terminated
//! SCPI commands and answers queries with a single newline-terminated line
//! (Tektronix MSO/AFG: port 4000; many others: 5025). No VISA runtime needed.

use super::{InstrumentLink, InstrumentRole, LinkConnector};
use crate::error::{ConnectError, LinkError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Link over a plain TCP socket.
///
/// A query that times out leaves its late reply in flight, which would be
/// read as the answer to the next query. The link therefore marks itself
/// desynchronised on a timeout and reopens the socket before the next
/// command.
pub struct TcpLink {
    peer: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    connect_timeout: Duration,
    query_timeout: Duration,
    line_terminator: String,
    desynced: bool,
}

impl TcpLink {
    /// Wraps an already connected stream.
    pub fn new(
        stream: TcpStream,
        peer: String,
        connect_timeout: Duration,
        query_timeout: Duration,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer,
            reader: BufReader::new(read_half),
            writer: write_half,
            connect_timeout,
            query_timeout,
            line_terminator: "\n".to_string(),
            desynced: false,
        }
    }

    fn query_timeout_ms(&self) -> u64 {
        u64::try_from(self.query_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Replaces the socket after a timed-out query so stale replies are lost
    /// with the old connection.
    async fn resync(&mut self) -> Result<(), LinkError> {
        if !self.desynced {
            return Ok(());
        }
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.peer))
            .await
            .map_err(|_| LinkError::Closed)??;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        self.reader = BufReader::new(read_half);
        self.writer = write_half;
        self.desynced = false;
        warn!("[{}] socket reopened after a timed-out query", self.peer);
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<(), LinkError> {
        self.resync().await?;
        let line = format!("{}{}", command, self.line_terminator);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl InstrumentLink for TcpLink {
    async fn write(&mut self, command: &str) -> Result<(), LinkError> {
        self.send(command).await?;
        debug!("[{}] sent: {}", self.peer, command);
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, LinkError> {
        self.send(command).await?;

        let mut response = String::new();
        let read = match timeout(self.query_timeout, self.reader.read_line(&mut response)).await
        {
            Ok(read) => read?,
            Err(_) => {
                self.desynced = true;
                return Err(LinkError::Timeout {
                    command: command.to_string(),
                    timeout_ms: self.query_timeout_ms(),
                });
            }
        };
        if read == 0 {
            return Err(LinkError::Closed);
        }

        let response = response.trim().to_string();
        debug!("[{}] query '{}' -> '{}'", self.peer, command, response);
        Ok(response)
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

/// Opens [`TcpLink`]s on a fixed port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Socket server port on the instruments.
    pub port: u16,
    /// Bound on connection establishment.
    pub connect_timeout: Duration,
    /// Bound on each query response.
    pub query_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector for `port`.
    pub fn new(port: u16, connect_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
            query_timeout,
        }
    }
}

#[async_trait]
impl LinkConnector for TcpConnector {
    async fn connect(
        &self,
        role: InstrumentRole,
        address: &str,
    ) -> Result<Box<dyn InstrumentLink>, ConnectError> {
        let peer = format!("{}:{}", address, self.port);
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectError::new(
                    role,
                    address,
                    e.to_string(),
                    e.raw_os_error().map(i64::from),
                ))
            }
            Err(_) => {
                return Err(ConnectError::new(
                    role,
                    address,
                    format!(
                        "timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ),
                    None,
                ))
            }
        };
        // Instruments expect each command in its own segment.
        stream
            .set_nodelay(true)
            .map_err(|e| ConnectError::new(role, address, e.to_string(), None))?;

        debug!("{} socket open at {}", role, peer);
        Ok(Box::new(TcpLink::new(
            stream,
            peer,
            self.connect_timeout,
            self.query_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal instrument: answers `*IDN?` and echoes other queries' names.
    async fn spawn_fake_instrument() -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut received = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if line == "*IDN?" {
                    write_half.write_all(b"FAKE,AFG,0,1.0\n").await.unwrap();
                } else if line.ends_with('?') {
                    write_half.write_all(b"0\n").await.unwrap();
                }
                received.push(line);
            }
            received
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_write_and_query_round_trip() {
        let (port, server) = spawn_fake_instrument().await;
        let connector =
            TcpConnector::new(port, Duration::from_secs(1), Duration::from_secs(1));

        let mut link = connector
            .connect(InstrumentRole::Generator, "127.0.0.1")
            .await
            .unwrap();
        assert_eq!(link.identify().await.unwrap(), "FAKE,AFG,0,1.0");
        link.write(":output1:state off").await.unwrap();
        assert_eq!(link.query(":acquire:state?").await.unwrap(), "0");
        assert!(link.describe().starts_with("tcp://127.0.0.1:"));
        drop(link);

        let received = server.await.unwrap();
        assert_eq!(received, vec!["*IDN?", ":output1:state off", ":acquire:state?"]);
    }

    #[tokio::test]
    async fn test_query_times_out_on_silent_instrument() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let connector =
            TcpConnector::new(port, Duration::from_secs(1), Duration::from_millis(50));
        let mut link = connector
            .connect(InstrumentRole::Digitizer, "127.0.0.1")
            .await
            .unwrap();
        let err = link.query(":acquire:state?").await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { timeout_ms: 50, .. }));
    }

    #[tokio::test]
    async fn test_late_reply_is_not_read_by_next_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut sessions = Vec::new();
            for index in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                sessions.push(tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(_line)) = lines.next_line().await {
                        if index == 0 {
                            // Busy instrument: answers after the caller gave up.
                            tokio::time::sleep(Duration::from_millis(150)).await;
                            let _ = write_half.write_all(b"1\n").await;
                        } else {
                            write_half.write_all(b"0\n").await.unwrap();
                        }
                    }
                }));
            }
            sessions.len()
        });

        let connector =
            TcpConnector::new(port, Duration::from_secs(1), Duration::from_millis(50));
        let mut link = connector
            .connect(InstrumentRole::Digitizer, "127.0.0.1")
            .await
            .unwrap();

        let first = link.query(":acquire:state?").await.unwrap_err();
        assert!(matches!(first, LinkError::Timeout { timeout_ms: 50, .. }));

        // Let the late "1" reach the old socket before asking again.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(link.query(":acquire:state?").await.unwrap(), "0");
        assert_eq!(link.query(":acquire:state?").await.unwrap(), "0");

        drop(link);
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_query_timeout_reports_saturated_millis() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = listener.local_addr().unwrap().to_string();
        let stream = TcpStream::connect(&peer).await.unwrap();
        let link = TcpLink::new(stream, peer, Duration::from_secs(1), Duration::MAX);
        assert_eq!(link.query_timeout_ms(), u64::MAX);
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        // Bind then drop to find a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector =
            TcpConnector::new(port, Duration::from_secs(1), Duration::from_secs(1));
        let err = connector
            .connect(InstrumentRole::Digitizer, "127.0.0.1")
            .await
            .err()
            .unwrap();
        assert_eq!(err.role, InstrumentRole::Digitizer);
        assert_eq!(err.address, "127.0.0.1");
    }
}
