pub mod wire;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use tickd_api::{IngestError, NodeClient, StartFrom, TickRecord, TickSubscription};

use crate::wire::{NodeFrame, SubscribeFrame};

const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

/// TCP client for the node's newline-delimited JSON tick stream.
///
/// One `subscribe` call is one connection: request on the first line,
/// ack, then tick frames until the socket drops. Flow control is the
/// socket's own — the client simply stops reading when its consumer is
/// busy.
pub struct TcpNodeClient {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpNodeClient {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self { connect_timeout, read_timeout, max_frame_bytes: DEFAULT_MAX_FRAME_BYTES }
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

impl NodeClient for TcpNodeClient {
    #[allow(clippy::type_complexity)]
    fn subscribe(
        &self,
        node: &str,
        start: StartFrom,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TickSubscription>, IngestError>> + Send + '_>>
    {
        let node = node.to_string();
        let connect_timeout = self.connect_timeout;
        let read_timeout = self.read_timeout;
        let max_frame_bytes = self.max_frame_bytes;
        Box::pin(async move {
            let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&node))
                .await
                .map_err(|_| IngestError::io(format!("connect to {node}: timed out")))?
                .map_err(|e| IngestError::io(format!("connect to {node}: {e}")))?;
            stream.set_nodelay(true)?;
            let (read_half, mut write_half) = stream.into_split();

            let mut request = serde_json::to_vec(&SubscribeFrame::new(start))
                .map_err(|e| IngestError::protocol(format!("encode subscribe: {e}")))?;
            request.push(b'\n');
            write_half
                .write_all(&request)
                .await
                .map_err(|e| IngestError::io(format!("send subscribe to {node}: {e}")))?;

            let mut sub = TcpSubscription {
                reader: BufReader::new(read_half),
                _write: write_half,
                line: String::new(),
                head_tick: 0,
                read_timeout,
                max_frame_bytes,
            };

            match sub.read_frame().await? {
                Some(NodeFrame::Ack(ack)) => {
                    tracing::debug!(node = %node, head_tick = ack.head_tick, "subscription acknowledged");
                    sub.head_tick = ack.head_tick;
                    Ok(Box::new(sub) as Box<dyn TickSubscription>)
                }
                Some(NodeFrame::Error(e)) if e.fatal => {
                    Err(IngestError::protocol(format!("{node}: {}", e.message)))
                }
                Some(NodeFrame::Error(e)) => Err(IngestError::io(format!("{node}: {}", e.message))),
                Some(NodeFrame::Tick(_)) => {
                    Err(IngestError::protocol(format!("{node}: tick frame before ack")))
                }
                None => Err(IngestError::io(format!("{node}: closed during handshake"))),
            }
        })
    }
}

struct TcpSubscription {
    reader: BufReader<OwnedReadHalf>,
    /// Held so the connection stays open.
    _write: OwnedWriteHalf,
    line: String,
    /// Upstream head at subscribe time; ticks below it are catch-up.
    head_tick: u64,
    read_timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpSubscription {
    async fn read_frame(&mut self) -> Result<Option<NodeFrame>, IngestError> {
        loop {
            self.line.clear();
            let n = tokio::time::timeout(self.read_timeout, self.reader.read_line(&mut self.line))
                .await
                .map_err(|_| IngestError::io("stream silent past the read timeout"))??;
            if n == 0 {
                return Ok(None);
            }
            if self.line.len() > self.max_frame_bytes {
                return Err(IngestError::protocol(format!(
                    "frame too long: {} bytes (max {})",
                    self.line.len(),
                    self.max_frame_bytes
                )));
            }
            let trimmed = self.line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(trimmed)?));
        }
    }
}

impl TickSubscription for TcpSubscription {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<TickRecord>, IngestError>> + Send + '_>> {
        Box::pin(async move {
            match self.read_frame().await? {
                Some(NodeFrame::Tick(mut rec)) => {
                    rec.is_catch_up = rec.tick < self.head_tick;
                    Ok(Some(rec))
                }
                Some(NodeFrame::Ack(_)) => Err(IngestError::protocol("unexpected ack mid-stream")),
                Some(NodeFrame::Error(e)) if e.fatal => {
                    Err(IngestError::protocol(format!("node error: {}", e.message)))
                }
                Some(NodeFrame::Error(e)) => Err(IngestError::io(format!("node error: {}", e.message))),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crate::wire::{AckBody, ErrorBody};

    /// One-shot fake node: accepts a connection, parses the subscribe
    /// request, plays the scripted frames, closes.
    async fn start_node(frames: Vec<NodeFrame>) -> (String, JoinHandle<SubscribeFrame>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request: SubscribeFrame =
                serde_json::from_str(String::from_utf8_lossy(&buf[..n]).trim_end()).unwrap();
            for frame in frames {
                let mut line = serde_json::to_vec(&frame).unwrap();
                line.push(b'\n');
                socket.write_all(&line).await.unwrap();
            }
            request
        });
        (addr, handle)
    }

    fn client() -> TcpNodeClient {
        TcpNodeClient::new(Duration::from_secs(1), Duration::from_secs(1))
    }

    fn tick(tick: u64) -> NodeFrame {
        NodeFrame::Tick(TickRecord {
            tick,
            epoch: 0,
            ts_ms: 0,
            transactions: Vec::new(),
            events: Vec::new(),
            is_catch_up: false,
        })
    }

    #[tokio::test]
    async fn handshake_marks_catchup_against_head() {
        let (addr, node) =
            start_node(vec![NodeFrame::Ack(AckBody { head_tick: 10 }), tick(8), tick(9), tick(10)])
                .await;

        let client = client();
        let mut sub = client.subscribe(&addr, StartFrom::Tick(8)).await.unwrap();

        assert!(sub.next().await.unwrap().unwrap().is_catch_up);
        assert!(sub.next().await.unwrap().unwrap().is_catch_up);
        assert!(!sub.next().await.unwrap().unwrap().is_catch_up);
        // Clean close after the script.
        assert!(sub.next().await.unwrap().is_none());

        let request = node.await.unwrap();
        assert_eq!(request.subscribe.from_tick, Some(8));
    }

    #[tokio::test]
    async fn latest_omits_from_tick() {
        let (addr, node) = start_node(vec![NodeFrame::Ack(AckBody { head_tick: 5 })]).await;

        let client = client();
        let _sub = client.subscribe(&addr, StartFrom::Latest).await.unwrap();

        let request = node.await.unwrap();
        assert_eq!(request.subscribe.from_tick, None);
    }

    #[tokio::test]
    async fn fatal_error_frame_rejects_as_protocol() {
        let (addr, _node) = start_node(vec![NodeFrame::Error(ErrorBody {
            message: "unsupported protocol version".into(),
            fatal: true,
        })])
        .await;

        let err = match client().subscribe(&addr, StartFrom::Latest).await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.kind(), tickd_api::ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn transient_error_frame_mid_stream_is_io() {
        let (addr, _node) = start_node(vec![
            NodeFrame::Ack(AckBody { head_tick: 0 }),
            NodeFrame::Error(ErrorBody { message: "resyncing".into(), fatal: false }),
        ])
        .await;

        let mut sub = client().subscribe(&addr, StartFrom::Latest).await.unwrap();
        let err = sub.next().await.unwrap_err();
        assert_eq!(err.kind(), tickd_api::ErrorKind::Io);
    }

    #[tokio::test]
    async fn refused_connection_is_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = match client().subscribe(&addr, StartFrom::Latest).await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.kind(), tickd_api::ErrorKind::Io);
    }

    #[tokio::test]
    async fn garbage_frame_is_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"{\"ack\":{\"head_tick\":1}}\nnot json\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut sub = client().subscribe(&addr, StartFrom::Latest).await.unwrap();
        let err = sub.next().await.unwrap_err();
        assert_eq!(err.kind(), tickd_api::ErrorKind::Protocol);
    }
}
