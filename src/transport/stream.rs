//! Stream transport: length-prefixed, `bincode`-framed [`Frame`]s over any
//! `AsyncRead`/`AsyncWrite` byte stream. Covers the case where the two ends
//! live in different processes, possibly on different machines: a u32
//! little-endian length prefix followed by the encoded payload, with a
//! write timeout and an oversize-message guard.

use super::{Frame, PeerIdentity, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 256;

/// A transport backed by a split async byte stream (TCP or Unix domain
/// socket). The write half is owned here; the read half is driven by a
/// background task that forwards decoded frames into an `mpsc` channel.
pub struct StreamTransport {
    peer: PeerIdentity,
    writer: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
    reader_task: JoinHandle<()>,
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let bytes = bincode::serialize(&frame)?;
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame too large: {} bytes", bytes.len()),
            )));
        }
        let len = bytes.len() as u32;

        let mut writer = self.writer.lock().await;
        let write_fut = async {
            writer.write_all(&len.to_le_bytes()).await?;
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        match timeout(WRITE_TIMEOUT, write_fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn peer(&self) -> PeerIdentity {
        self.peer.clone()
    }

    /// Abort the reader task and shut down the write half. Idempotent:
    /// shutting down an already-dead socket just returns the write error,
    /// which we discard, rather than failing the caller.
    async fn shutdown(&self) {
        self.reader_task.abort();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Read one length-prefixed frame off a reader half. Returns `Ok(None)` on a
/// clean EOF (peer closed the stream).
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Frame>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("incoming frame too large: {len} bytes"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let frame = bincode::deserialize(&payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(frame))
}

fn spawn_reader<R>(mut reader: R, sender: mpsc::Sender<Frame>, peer: PeerIdentity) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(%peer, "stream transport closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "stream transport read failed");
                    break;
                }
            }
        }
    })
}

fn tune_tcp(stream: &TcpStream) {
    let sock_ref = SockRef::from(stream);
    let _ = stream.set_nodelay(true);
    let _ = sock_ref.set_keepalive(true);
    let _ = sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(30)));
}

fn from_tcp(stream: TcpStream, peer: PeerIdentity) -> (StreamTransport, mpsc::Receiver<Frame>) {
    tune_tcp(&stream);
    let (read_half, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let reader_task = spawn_reader(read_half, tx, peer.clone());
    (
        StreamTransport {
            peer,
            writer: Mutex::new(Box::new(write_half)),
            reader_task,
        },
        rx,
    )
}

fn from_unix(stream: UnixStream, peer: PeerIdentity) -> (StreamTransport, mpsc::Receiver<Frame>) {
    let (read_half, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let reader_task = spawn_reader(read_half, tx, peer.clone());
    (
        StreamTransport {
            peer,
            writer: Mutex::new(Box::new(write_half)),
            reader_task,
        },
        rx,
    )
}

/// Connect to a TCP peer.
pub async fn connect_tcp(
    addr: SocketAddr,
    peer: PeerIdentity,
) -> Result<(StreamTransport, mpsc::Receiver<Frame>), TransportError> {
    let stream = TcpStream::connect(addr).await?;
    Ok(from_tcp(stream, peer))
}

/// Accept loop for TCP: each accepted connection is handed to `on_connection`
/// with its own transport and receiver rather than being folded into a
/// shared connection map, since each one goes on to negotiate its own
/// independent connection.
pub async fn serve_tcp<F>(listener: TcpListener, peer_label: impl Fn(SocketAddr) -> PeerIdentity, mut on_connection: F)
where
    F: FnMut(StreamTransport, mpsc::Receiver<Frame>) + Send,
{
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let (transport, rx) = from_tcp(stream, peer_label(addr));
                on_connection(transport, rx);
            }
            Err(e) => {
                warn!(error = %e, "tcp accept failed");
                break;
            }
        }
    }
}

/// Connect to a Unix domain socket peer.
pub async fn connect_unix(
    path: impl AsRef<Path>,
    peer: PeerIdentity,
) -> Result<(StreamTransport, mpsc::Receiver<Frame>), TransportError> {
    let stream = UnixStream::connect(path).await?;
    Ok(from_unix(stream, peer))
}

pub async fn serve_unix<F>(listener: UnixListener, peer_label: PeerIdentity, mut on_connection: F)
where
    F: FnMut(StreamTransport, mpsc::Receiver<Frame>) + Send,
{
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let (transport, rx) = from_unix(stream, peer_label.clone());
                on_connection(transport, rx);
            }
            Err(e) => {
                warn!(error = %e, "unix accept failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BridgeDisconnect, Envelope};

    #[tokio::test]
    async fn round_trips_a_frame_over_a_tcp_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            from_tcp(stream, PeerIdentity::new(peer_addr.to_string()))
        });

        let (client, _client_rx) = connect_tcp(addr, PeerIdentity::new("server")).await.unwrap();
        let (_server_transport, mut server_rx) = server.await.unwrap();

        let envelope = Envelope::BridgeDisconnect(BridgeDisconnect {
            tab_id: "t1".into(),
            channel: "room".into(),
        });
        client.send(Frame::new(envelope)).await.unwrap();

        let received = server_rx.recv().await.unwrap();
        assert!(matches!(received.envelope, Envelope::BridgeDisconnect(_)));
    }
}
