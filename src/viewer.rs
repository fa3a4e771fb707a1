//! Downstream viewer connections.
//!
//! Broadcast servers and the status reporter share the same shape: a listener
//! whose accepted WebSockets become [`ViewerSession`]s, and a tick loop that
//! renders one message and pushes it to every session in a [`ViewerSet`].
//! Handshakes run on their own tasks and hand finished sessions to the tick
//! loop over a channel, so a slow client never delays a tick.

use futures::future::join_all;
use futures::stream::SplitSink;
use futures::{Sink, SinkExt, StreamExt};
use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{RelayError, Result};

/// Upper bound on a viewer's WebSocket handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept`, e.g. when out of file descriptors
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Write half of an accepted viewer WebSocket
pub type ViewerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Bind a TCP listener, mapping failure to the fatal [`RelayError::Bind`].
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await.map_err(|source| RelayError::Bind { addr, source })?;
    debug!(%addr, "Listener bound");
    Ok(listener)
}

/// One connected viewer.
///
/// Holds only the write half and the peer address. The read half is drained
/// by a background task that flags the session closed when the viewer goes
/// away; the task is aborted when the session is dropped.
pub struct ViewerSession<S = ViewerSink> {
    peer: SocketAddr,
    sink: S,
    closed: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl<S> ViewerSession<S> {
    /// Session without a reader; closes only when a send fails.
    pub fn new(peer: SocketAddr, sink: S) -> Self {
        Self { peer, sink, closed: CancellationToken::new(), reader: None }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True once the viewer has sent a close frame or dropped the connection.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl<S> ViewerSession<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    /// Send one message; a send slower than `timeout` is a failure.
    pub async fn send(&mut self, message: Message, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.sink.send(message)).await {
            Err(_) => Err(RelayError::viewer_send(self.peer, format!("send timed out after {timeout:?}"))),
            Ok(Err(e)) => Err(RelayError::viewer_send(self.peer, e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    pub async fn close(&mut self, timeout: Duration) {
        if let Ok(Err(e)) = tokio::time::timeout(timeout, self.sink.close()).await {
            trace!(peer = %self.peer, error = %e, "Close failed");
        }
    }
}

impl<S> Drop for ViewerSession<S> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// The sessions subscribed to one server.
pub struct ViewerSet<S = ViewerSink> {
    sessions: Vec<ViewerSession<S>>,
    send_timeout: Duration,
}

impl<S> ViewerSet<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    pub fn new(send_timeout: Duration) -> Self {
        Self { sessions: Vec::new(), send_timeout }
    }

    pub fn add(&mut self, session: ViewerSession<S>) {
        self.sessions.push(session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Push `message` to every live session concurrently.
    ///
    /// Sessions whose send fails or times out are removed; the rest are
    /// unaffected. Returns the number of successful sends.
    pub async fn broadcast(&mut self, message: Message) -> usize {
        self.sessions.retain(|session| {
            if session.is_closed() {
                info!(peer = %session.peer, "Viewer disconnected");
            }
            !session.is_closed()
        });

        let timeout = self.send_timeout;
        let outcomes =
            join_all(self.sessions.iter_mut().map(|session| session.send(message.clone(), timeout))).await;

        let mut outcomes = outcomes.into_iter();
        self.sessions.retain(|_| match outcomes.next() {
            Some(Err(error)) => {
                warn!(%error, "Dropping viewer");
                false
            }
            _ => true,
        });
        self.sessions.len()
    }

    /// Close every session and empty the set.
    pub async fn close_all(&mut self) {
        let timeout = self.send_timeout;
        join_all(self.sessions.iter_mut().map(|session| session.close(timeout))).await;
        self.sessions.clear();
    }
}

/// Accept viewers on `listener` until cancelled.
///
/// Every connection is upgraded on its own task; completed sessions arrive on
/// the returned channel. The channel closes when the acceptor stops.
pub fn accept_viewers(
    listener: TcpListener,
    server: String,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<ViewerSession> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    trace!(server = %server, %peer, "TCP connection accepted");
                    tokio::spawn(handshake(stream, peer, server.clone(), tx.clone(), cancel.clone()));
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "Accept failed");
                    if !pause_after_accept_error(&cancel).await {
                        break;
                    }
                }
            }
        }
        debug!(server = %server, "Acceptor stopped");
    });

    rx
}

/// Back off after an accept error. Returns `false` if cancelled meanwhile.
async fn pause_after_accept_error(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_PAUSE) => true,
    }
}

async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    server: String,
    sessions: mpsc::UnboundedSender<ViewerSession>,
    cancel: CancellationToken,
) {
    let upgraded = tokio::select! {
        _ = cancel.cancelled() => return,
        upgraded = tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_async(stream)) => upgraded,
    };

    let socket = match upgraded {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            debug!(server = %server, %peer, error = %e, "Viewer handshake failed");
            return;
        }
        Err(_) => {
            debug!(server = %server, %peer, "Viewer handshake timed out");
            return;
        }
    };

    let (sink, mut inbound) = socket.split();
    let closed = CancellationToken::new();
    let reader = tokio::spawn({
        let closed = closed.clone();
        async move {
            while let Some(Ok(message)) = inbound.next().await {
                if message.is_close() {
                    break;
                }
            }
            closed.cancel();
        }
    });

    info!(server = %server, %peer, "Viewer connected");
    let session = ViewerSession { peer, sink, closed, reader: Some(reader) };
    let _ = sessions.send(session);
}

/// Drive a tick loop: accept sessions, and on every tick push one rendered
/// message to all of them.
///
/// Ticks with no subscribers skip rendering. Render failures skip the tick.
/// On cancellation every session is closed before returning.
pub(crate) async fn serve<F>(
    listener: TcpListener,
    server: String,
    tick: Duration,
    send_timeout: Duration,
    cancel: CancellationToken,
    mut render: F,
) where
    F: FnMut() -> Result<Message>,
{
    let mut incoming = accept_viewers(listener, server.clone(), cancel.clone());
    let mut viewers = ViewerSet::new(send_timeout);
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(session) = incoming.recv() => {
                viewers.add(session);
                debug!(server = %server, viewers = viewers.len(), "Viewer subscribed");
            }
            _ = ticker.tick() => {
                if viewers.is_empty() {
                    continue;
                }
                match render() {
                    Ok(message) => {
                        viewers.broadcast(message).await;
                    }
                    Err(error) => warn!(server = %server, %error, "Skipping tick"),
                }
            }
        }
    }

    viewers.close_all().await;
    info!(server = %server, "Server stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn failing_viewer_is_removed_alone() {
        let (good_tx, mut good_rx) = fmpsc::channel::<Message>(4);
        let (bad_tx, bad_rx) = fmpsc::channel::<Message>(4);
        drop(bad_rx);

        let mut set = ViewerSet::new(Duration::from_secs(1));
        set.add(ViewerSession::new(peer(1), good_tx));
        set.add(ViewerSession::new(peer(2), bad_tx));

        assert_eq!(set.broadcast(Message::text("one")).await, 1);
        assert_eq!(set.len(), 1);
        assert_eq!(good_rx.next().await, Some(Message::text("one")));

        assert_eq!(set.broadcast(Message::text("two")).await, 1);
        assert_eq!(good_rx.next().await, Some(Message::text("two")));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_viewer_does_not_hold_back_others() {
        let (fast_tx, mut fast_rx) = fmpsc::channel::<Message>(8);
        // Nobody reads: the first send fills the buffer, the second never flushes.
        let (slow_tx, _slow_rx) = fmpsc::channel::<Message>(1);

        let mut set = ViewerSet::new(Duration::from_millis(500));
        set.add(ViewerSession::new(peer(1), slow_tx));
        set.add(ViewerSession::new(peer(2), fast_tx));

        assert_eq!(set.broadcast(Message::text("a")).await, 2);

        let started = tokio::time::Instant::now();
        assert_eq!(set.broadcast(Message::text("b")).await, 1);
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        assert_eq!(fast_rx.next().await, Some(Message::text("a")));
        assert_eq!(fast_rx.next().await, Some(Message::text("b")));
        assert_eq!(set.len(), 1);
        assert_eq!(set.sessions[0].peer(), peer(2));
    }

    #[tokio::test]
    async fn close_all_empties_the_set() {
        let (tx, mut rx) = fmpsc::channel::<Message>(1);
        let mut set = ViewerSet::new(Duration::from_secs(1));
        set.add(ViewerSession::new(peer(1), tx));

        set.close_all().await;
        assert!(set.is_empty());
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_errors_back_off_until_cancelled() {
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        assert!(pause_after_accept_error(&cancel).await);
        assert_eq!(started.elapsed(), ACCEPT_ERROR_PAUSE);

        cancel.cancel();
        let started = tokio::time::Instant::now();
        assert!(!pause_after_accept_error(&cancel).await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn bind_conflict_is_a_bind_error() {
        let taken = bind(peer(0)).await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert!(matches!(err, RelayError::Bind { addr: a, .. } if a == addr));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn accepted_viewer_receives_ticks_and_is_closed_on_cancel() {
        let _ = tracing_subscriber::fmt::try_init();
        let listener = bind(peer(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let mut count = 0u32;
        let server = tokio::spawn(serve(
            listener,
            "test".to_string(),
            Duration::from_millis(10),
            Duration::from_secs(1),
            cancel.clone(),
            move || {
                count += 1;
                Ok(Message::text(count.to_string()))
            },
        ));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        assert!(first.is_text());

        cancel.cancel();
        server.await.unwrap();

        loop {
            match ws.next().await {
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => continue,
                _ => break,
            }
        }
    }
}
