//! Per-modality TCP broadcast channels
//!
//! Every channel accepts any number of subscribers on its own port and writes
//! each packet to all of them. Packets are never acknowledged or retried.
//! Each subscriber drains a bounded queue from its own task, so a slow
//! subscriber loses its oldest packets instead of stalling the producer.

use crate::error::BridgeError;
use bytes::Bytes;
use k2bridge_core::Modality;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination for the packets of one modality.
pub trait PacketSink: Send + Sync {
    /// Fan `packet` out to current subscribers. Never blocks and never fails.
    fn broadcast(&self, packet: Bytes);
}

pub struct BroadcastChannel {
    modality: Modality,
    local_addr: SocketAddr,
    sender: Arc<RwLock<Option<broadcast::Sender<Bytes>>>>,
    subscribers: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastChannel {
    /// Bind `address` and start accepting subscribers.
    ///
    /// `capacity` is the number of packets a subscriber may fall behind
    /// before it loses the oldest ones.
    pub async fn listen(modality: Modality, address: &str, capacity: usize) -> Result<Self, BridgeError> {
        let bind_error = |source| BridgeError::Bind {
            modality,
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (sender, _) = broadcast::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let subscribers = Arc::new(AtomicUsize::new(0));

        let accept_task = tokio::spawn(accept_loop(
            modality,
            listener,
            sender.clone(),
            Arc::clone(&subscribers),
            shutdown_rx,
        ));

        info!("{} channel listening on {}", modality, local_addr);

        Ok(Self {
            modality,
            local_addr,
            sender: Arc::new(RwLock::new(Some(sender))),
            subscribers,
            shutdown,
            accept_task: parking_lot::Mutex::new(Some(accept_task)),
        })
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribers currently connected.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Stop accepting, disconnect every subscriber and discard further packets.
    pub fn close(&self) {
        if self.sender.write().take().is_none() {
            return;
        }
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        info!("{} channel closed", self.modality);
    }
}

impl PacketSink for BroadcastChannel {
    fn broadcast(&self, packet: Bytes) {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return;
        };
        let bytes = packet.len() as u64;
        // Err only means nobody is subscribed
        if sender.send(packet).is_ok() {
            metrics::counter!("k2bridge_bytes_sent_total", "channel" => self.modality.name()).increment(bytes);
        }
    }
}

impl Drop for BroadcastChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    modality: Modality,
    listener: TcpListener,
    sender: broadcast::Sender<Bytes>,
    subscribers: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let count = subscribers.fetch_add(1, Ordering::Relaxed) + 1;
                    metrics::counter!("k2bridge_subscribers_connected_total", "channel" => modality.name()).increment(1);
                    info!("{} subscriber connected from {} ({} total)", modality, peer, count);
                    tokio::spawn(serve_subscriber(
                        modality,
                        stream,
                        peer,
                        sender.subscribe(),
                        Arc::clone(&subscribers),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!("{} channel failed to accept subscriber: {}", modality, e);
                }
            }
        }
    }
}

async fn serve_subscriber(
    modality: Modality,
    mut stream: TcpStream,
    peer: SocketAddr,
    mut packets: broadcast::Receiver<Bytes>,
    subscribers: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            packet = packets.recv() => match packet {
                Ok(packet) => {
                    // a subscriber that stopped reading must not outlive close()
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        written = stream.write_all(&packet) => {
                            if let Err(e) = written {
                                debug!("{} subscriber {} write failed: {}", modality, peer, e);
                                break;
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("k2bridge_packets_lagged_total", "channel" => modality.name()).increment(skipped);
                    debug!("{} subscriber {} lagged, {} packets skipped", modality, peer, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    let _ = stream.shutdown().await;
    let remaining = subscribers.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    metrics::counter!("k2bridge_subscribers_disconnected_total", "channel" => modality.name()).increment(1);
    info!("{} subscriber {} disconnected ({} remaining)", modality, peer, remaining);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn wait_for_subscribers(channel: &BroadcastChannel, count: usize) {
        for _ in 0..200 {
            if channel.subscriber_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} subscribers, found {}", count, channel.subscriber_count());
    }

    #[tokio::test]
    async fn test_packets_reach_every_subscriber() {
        let channel = BroadcastChannel::listen(Modality::Body, "127.0.0.1:0", 16).await.unwrap();
        let mut a = TcpStream::connect(channel.local_addr()).await.unwrap();
        let mut b = TcpStream::connect(channel.local_addr()).await.unwrap();
        wait_for_subscribers(&channel, 2).await;

        channel.broadcast(Bytes::from_static(b"{\"Time\":1}\n"));

        for stream in [&mut a, &mut b] {
            let mut buf = [0u8; 11];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"{\"Time\":1}\n");
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let channel = BroadcastChannel::listen(Modality::Audio, "127.0.0.1:0", 16).await.unwrap();
        let gone = TcpStream::connect(channel.local_addr()).await.unwrap();
        let mut stay = TcpStream::connect(channel.local_addr()).await.unwrap();
        wait_for_subscribers(&channel, 2).await;

        drop(gone);
        // the failed write is only noticed once the peer reset arrives
        for _ in 0..200 {
            channel.broadcast(Bytes::from_static(&[7, 7, 7, 7]));
            tokio::time::sleep(Duration::from_millis(5)).await;
            if channel.subscriber_count() == 1 {
                break;
            }
        }
        assert_eq!(channel.subscriber_count(), 1);

        let mut buf = [0u8; 4];
        stay.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [7, 7, 7, 7]);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_silent() {
        let channel = BroadcastChannel::listen(Modality::Color, "127.0.0.1:0", 4).await.unwrap();
        channel.broadcast(Bytes::from_static(b"frame"));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_disconnects_subscribers() {
        let channel = BroadcastChannel::listen(Modality::Face, "127.0.0.1:0", 4).await.unwrap();
        let mut client = TcpStream::connect(channel.local_addr()).await.unwrap();
        wait_for_subscribers(&channel, 1).await;

        channel.close();
        assert!(channel.is_closed());
        channel.broadcast(Bytes::from_static(b"late"));

        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut buf)).await;
        assert!(matches!(read, Ok(Ok(0))));
    }

    #[tokio::test]
    async fn test_close_reaches_subscriber_blocked_on_write() {
        let channel = BroadcastChannel::listen(Modality::Color, "127.0.0.1:0", 4).await.unwrap();
        let _idle = TcpStream::connect(channel.local_addr()).await.unwrap();
        wait_for_subscribers(&channel, 1).await;

        // far more than the socket buffers hold, so the write cannot finish
        channel.broadcast(Bytes::from(vec![0u8; 64 * 1024 * 1024]));
        tokio::time::sleep(Duration::from_millis(100)).await;

        channel.close();
        wait_for_subscribers(&channel, 0).await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = BroadcastChannel::listen(Modality::Depth, "127.0.0.1:0", 4).await.unwrap();
        let address = first.local_addr().to_string();
        let second = BroadcastChannel::listen(Modality::Infrared, &address, 4).await;
        assert!(matches!(second, Err(BridgeError::Bind { modality: Modality::Infrared, .. })));
    }
}
