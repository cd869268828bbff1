use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::FrameCodec;
use crate::transport::{ChannelSink, Frame};

/// Frames buffered between the connection handle and its socket tasks.
const CHANNEL_CAPACITY: usize = 256;

/// A framed TCP connection carrying [`Frame`]s.
///
/// The socket is split into a writer task fed through a [`ChannelSink`]
/// and a reader task that publishes inbound frames to [`recv`].
///
/// [`recv`]: TcpTransport::recv
#[derive(Debug)]
pub struct TcpTransport {
    sink: Arc<ChannelSink>,
    rx: mpsc::Receiver<Frame>,
    peer: SocketAddr,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, max_frame_size: usize) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (mut net_writer, mut net_reader) =
            Framed::new(stream, FrameCodec::new(max_frame_size)).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(CHANNEL_CAPACITY);

        // Writer task: stops after a close frame or the first write error.
        tokio::spawn(async move {
            while let Some(frame) = network_rx.recv().await {
                let closing = frame.is_close();
                if let Err(e) = net_writer.send(frame).await {
                    warn!(%peer, error = %e, "network write error");
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = net_writer.close().await {
                debug!(%peer, error = %e, "socket shutdown failed");
            }
        });

        // Reader task: stops on codec errors, EOF, or a close frame.
        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(frame) => {
                        let closing = frame.is_close();
                        if network_tx.send(frame).await.is_err() {
                            // user_rx was dropped, stop reading
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "network read error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            sink: Arc::new(ChannelSink::new(user_tx)),
            rx: user_rx,
            peer,
        })
    }

    pub async fn connect(addr: impl ToSocketAddrs, max_frame_size: usize) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, max_frame_size)
    }

    /// Shared outbound half; hand this to the pipeline.
    pub fn sink(&self) -> Arc<ChannelSink> {
        self.sink.clone()
    }

    /// Next inbound frame, or `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn into_parts(self) -> (Arc<ChannelSink>, mpsc::Receiver<Frame>) {
        (self.sink, self.rx)
    }
}
