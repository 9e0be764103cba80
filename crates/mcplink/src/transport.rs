//! Transport traits and adapters.
//!
//! A [`Transport`] establishes a channel and hands out exactly one
//! [`TransportStream`]: a `Stream` of decoded envelopes and a `Sink` for
//! outbound ones. Sessions are written against the stream only, so the
//! byte-stream and HTTP bindings are interchangeable.

use std::{
    io,
    pin::Pin,
    process::Stdio,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tokio_util::codec::Framed;

use crate::{
    codec::JsonRpcCodec,
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// A bidirectional stream of envelopes.
///
/// Items are `Err(MalformedMessage)` for frames that failed to decode (the
/// stream continues) and any other `Err` for channel failures (the stream is
/// finished).
pub trait TransportStream:
    Stream<Item = Result<JSONRPCMessage>> + Sink<JSONRPCMessage, Error = Error> + Send + Unpin
{
}

impl<T> TransportStream for T where
    T: Stream<Item = Result<JSONRPCMessage>> + Sink<JSONRPCMessage, Error = Error> + Send + Unpin
{
}

/// Something that can be turned into a [`TransportStream`].
#[async_trait]
pub trait Transport: Send {
    /// Establish the underlying channel.
    async fn connect(&mut self) -> Result<()>;

    /// Consume the transport and return its message stream.
    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>>;

    /// Human-readable description of the peer, for logs.
    fn remote_addr(&self) -> String {
        "unknown".to_string()
    }
}

/// Joins a separate reader and writer into one duplex byte stream.
pub struct GenericDuplex<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> GenericDuplex<R, W> {
    /// Reads go to `reader`, writes to `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: AsyncRead + Unpin, W: Unpin> AsyncRead for GenericDuplex<R, W> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin> AsyncWrite for GenericDuplex<R, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

/// Line-framed envelope stream over any duplex byte stream.
///
/// After the first channel failure every operation fails with
/// [`Error::ChannelClosed`].
pub struct FramedStream<T> {
    inner: Framed<T, JsonRpcCodec>,
    closed: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> FramedStream<T> {
    /// Frame `io` with [`JsonRpcCodec`].
    pub fn new(io: T) -> Self {
        Self {
            inner: Framed::new(io, JsonRpcCodec::new()),
            closed: false,
        }
    }

    fn fail<V>(&mut self, error: Error) -> Poll<Result<V>> {
        self.closed = true;
        Poll::Ready(Err(match error {
            Error::Io { message } => Error::Transport(message),
            other => other,
        }))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Stream for FramedStream<T> {
    type Item = Result<JSONRPCMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(item)),
            Poll::Ready(Some(Err(e))) => self.fail(e).map(Some),
            Poll::Ready(None) => {
                self.closed = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Sink<JSONRPCMessage> for FramedStream<T> {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.closed {
            return Poll::Ready(Err(Error::ChannelClosed));
        }
        match Pin::new(&mut self.inner).poll_ready(cx) {
            Poll::Ready(Err(e)) => self.fail(e),
            other => other,
        }
    }

    fn start_send(mut self: Pin<&mut Self>, item: JSONRPCMessage) -> Result<()> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        Pin::new(&mut self.inner).start_send(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.closed {
            return Poll::Ready(Err(Error::ChannelClosed));
        }
        match Pin::new(&mut self.inner).poll_flush(cx) {
            Poll::Ready(Err(e)) => self.fail(e),
            other => other,
        }
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        let result = Pin::new(&mut self.inner).poll_close(cx);
        if result.is_ready() {
            self.closed = true;
        }
        result
    }
}

/// Transport over an already-open reader/writer pair.
pub struct StreamTransport<T> {
    io: T,
}

impl<T> StreamTransport<T> {
    /// Wrap `io`; it is framed as soon as the session attaches.
    pub fn new(io: T) -> Self {
        Self { io }
    }
}

#[async_trait]
impl<T> Transport for StreamTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        Ok(Box::new(FramedStream::new(self.io)))
    }

    fn remote_addr(&self) -> String {
        "stream".to_string()
    }
}

/// Transport over this process's own stdin and stdout.
///
/// Nothing else may write to stdout while this transport is in use.
pub struct StdioTransport;

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let io = GenericDuplex::new(tokio::io::stdin(), tokio::io::stdout());
        Ok(Box::new(FramedStream::new(io)))
    }

    fn remote_addr(&self) -> String {
        "stdio".to_string()
    }
}

/// Transport to a spawned child process speaking the protocol on its stdio.
///
/// The child is spawned by [`Transport::connect`] and killed when the returned
/// stream is dropped. Its stderr is forwarded to `tracing` line by line.
pub struct ProcessTransport {
    command: Option<Command>,
    child: Option<Child>,
    label: String,
}

impl ProcessTransport {
    /// Spawn `command` on [`connect`](Transport::connect).
    pub fn new(command: Command) -> Self {
        let label = format!("{:?}", command.as_std().get_program());
        Self {
            command: Some(command),
            child: None,
            label,
        }
    }

    /// Process id of the spawned child, once connected.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut command = self
            .command
            .take()
            .ok_or_else(|| Error::Transport("process already spawned".to_string()))?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn {}: {e}", self.label)))?;
        tracing::info!("Spawned {} (pid {:?})", self.label, child.id());

        if let Some(stderr) = child.stderr.take() {
            let label = self.label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "mcplink::child", "{}: {}", label, line);
                }
            });
        }

        self.child = Some(child);
        Ok(())
    }

    fn framed(mut self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| Error::Transport("process not spawned".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout unavailable".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin unavailable".to_string()))?;
        Ok(Box::new(ProcessStream {
            inner: FramedStream::new(GenericDuplex::new(stdout, stdin)),
            _child: child,
        }))
    }

    fn remote_addr(&self) -> String {
        match self.pid() {
            Some(pid) => format!("{} (pid {pid})", self.label),
            None => self.label.clone(),
        }
    }
}

/// Envelope stream that owns the child process on the other end.
struct ProcessStream {
    inner: FramedStream<GenericDuplex<ChildStdout, ChildStdin>>,
    /// Held only so the child lives (and is killed) with the stream.
    _child: Child,
}

impl Stream for ProcessStream {
    type Item = Result<JSONRPCMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Sink<JSONRPCMessage> for ProcessStream {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: JSONRPCMessage) -> Result<()> {
        Pin::new(&mut self.inner).start_send(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_stream_transport_exchange() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = Box::new(StreamTransport::new(a)).framed().unwrap();
        let mut right = Box::new(StreamTransport::new(b)).framed().unwrap();

        let msg = JSONRPCMessage::notification("notifications/message", Some(json!({"level": "info", "data": "hi"})));
        left.send(msg.clone()).await.unwrap();
        assert_eq!(right.next().await.unwrap().unwrap(), msg);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_close() {
        let (mut raw, b) = tokio::io::duplex(4096);
        let mut stream = Box::new(StreamTransport::new(b)).framed().unwrap();

        raw.write_all(b"not json\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n")
            .await
            .unwrap();
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(Error::MalformedMessage { .. })
        ));
        assert_eq!(stream.next().await.unwrap().unwrap().method(), Some("ping"));

        drop(raw);
        assert!(stream.next().await.is_none());
        assert!(matches!(
            stream.send(JSONRPCMessage::notification("x", None)).await,
            Err(Error::ChannelClosed)
        ));
    }
}
