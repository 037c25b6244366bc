use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::error::{ParseError, Result as TwitchResult, TwitchError};
use super::irc_parser::{
    CMD_CAP, CMD_PING, CMD_RECONNECT, IRC_ACK, IRC_NAK, IrcMessage, RPL_WELCOME,
    format_capability_request, format_chat, format_join, format_nick, format_part, format_pass,
    format_pong,
};

/// Twitch drops bots that send more than ~20 lines per 30s.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(2);
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Twitch PINGs roughly every five minutes, so a quieter socket is dead.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(6 * 60);

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub rate_limit: Duration,
    pub queue_capacity: usize,
    /// Bounds both the TCP connect and the wait for the server's reply to
    /// PASS/NICK.
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Cheap clonable handle to the single IRC connection.
///
/// Outbound chat goes through a bounded FIFO drained by one rate limiter task
/// per live connection. The queue and the rejoin list outlive reconnects, so
/// lines and joins issued while disconnected are delivered once the driver
/// reconnects.
#[derive(Clone)]
pub struct IrcTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    server_addr: String,
    rate_limit: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
    connected: AtomicBool,
    rejoin_list: Mutex<HashSet<String>>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: Mutex<mpsc::Receiver<String>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    rate_limiter: Mutex<Option<RateLimiterHandle>>,
}

struct RateLimiterHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl fmt::Debug for IrcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrcTransport")
            .field("server_addr", &self.inner.server_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl IrcTransport {
    pub fn new(server_addr: impl Into<String>, options: TransportOptions) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(options.queue_capacity.max(1));
        Self {
            inner: Arc::new(TransportInner {
                server_addr: server_addr.into(),
                rate_limit: options.rate_limit,
                connect_timeout: options.connect_timeout,
                read_timeout: options.read_timeout,
                connected: AtomicBool::new(false),
                rejoin_list: Mutex::new(HashSet::new()),
                outbound_tx,
                outbound_rx: Mutex::new(outbound_rx),
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                rate_limiter: Mutex::new(None),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Opens the socket and authenticates. The token is sent verbatim, so it
    /// must carry the `oauth:` prefix.
    pub async fn connect(&self, nick: &str, token: &str) -> TwitchResult<()> {
        if nick.is_empty() || token.is_empty() {
            return Err(TwitchError::MissingCredentials);
        }
        if self.is_connected() {
            return Ok(());
        }
        if let Err(e) = self.disconnect().await {
            tracing::debug!(error = %e, "[IRC] Ignoring error while clearing stale connection");
        }

        tracing::info!(
            server = %self.inner.server_addr,
            nick,
            "[IRC] Connecting to chat server"
        );
        let connect_timeout = self.inner.connect_timeout;
        let connecting = TcpStream::connect(&self.inner.server_addr);
        let stream = match timeout(connect_timeout, connecting).await {
            Ok(stream) => stream?,
            Err(_) => {
                tracing::error!(
                    server = %self.inner.server_addr,
                    timeout = ?connect_timeout,
                    "[IRC] TCP connect timed out"
                );
                return Err(TwitchError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    self.inner.server_addr, connect_timeout
                )));
            }
        };
        let (reader, writer) = stream.into_split();
        *self.inner.writer.lock().await = Some(writer);
        *self.inner.reader.lock().await = Some(BufReader::new(reader));

        self.send_raw(&format_pass(token)).await?;
        self.send_raw(&format_nick(nick)).await?;
        self.start_rate_limiter().await;

        let reply = match timeout(connect_timeout, self.read()).await {
            Ok(reply) => reply,
            Err(_) => Err(TwitchError::Timeout(format!(
                "no reply within {:?}",
                connect_timeout
            ))),
        };
        match reply {
            Ok(message) if message.is_auth_failure_notice() => {
                tracing::error!(notice = %message.message, "[IRC] Authentication rejected");
                let _ = self.disconnect().await;
                Err(TwitchError::TwitchAuth(message.message))
            }
            Ok(message) => {
                tracing::info!(
                    command = %message.command,
                    connected = self.is_connected(),
                    "[IRC] Server responded to authentication"
                );
                Ok(())
            }
            Err(e) => {
                let _ = self.disconnect().await;
                Err(TwitchError::TwitchAuth(format!(
                    "No valid response after authentication: {}",
                    e
                )))
            }
        }
    }

    /// Safe to call repeatedly.
    pub async fn disconnect(&self) -> TwitchResult<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.stop_rate_limiter().await;

        // A pending read() holds the reader; it sees EOF once the socket closes.
        if let Ok(mut reader) = self.inner.reader.try_lock() {
            reader.take();
        }

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            tracing::info!(server = %self.inner.server_addr, "[IRC] Closing connection");
            writer.shutdown().await?;
        }
        Ok(())
    }

    pub async fn join(&self, channel: &str) -> TwitchResult<()> {
        let channel = normalize_channel(channel);
        self.inner.rejoin_list.lock().await.insert(channel.clone());
        self.enqueue(&channel, format_join(&channel))
    }

    pub async fn part(&self, channel: &str) -> TwitchResult<()> {
        let channel = normalize_channel(channel);
        self.inner.rejoin_list.lock().await.remove(&channel);
        self.enqueue(&channel, format_part(&channel))
    }

    /// Queues a chat line. Never waits on the network; when the queue is full
    /// the new line is dropped.
    pub fn chat(&self, channel: &str, text: &str) -> TwitchResult<()> {
        let channel = normalize_channel(channel);
        self.enqueue(&channel, format_chat(&channel, text))
    }

    /// Reads and parses one line. Keepalives and the welcome numeric are
    /// answered here before the message is returned. A socket failure leaves
    /// the transport disconnected; reconnecting is up to the caller.
    pub async fn read(&self) -> TwitchResult<IrcMessage> {
        let mut buf = Vec::new();
        let read_result = {
            let mut reader_guard = self.inner.reader.lock().await;
            let Some(reader) = reader_guard.as_mut() else {
                return Err(TwitchError::NotConnected);
            };
            timeout(self.inner.read_timeout, reader.read_until(b'\n', &mut buf)).await
        };

        let read_result = match read_result {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    server = %self.inner.server_addr,
                    timeout = ?self.inner.read_timeout,
                    "[IRC] No server activity, dropping connection"
                );
                self.teardown_after_failure().await;
                return Err(TwitchError::Timeout(format!(
                    "no server activity for {:?}",
                    self.inner.read_timeout
                )));
            }
        };

        match read_result {
            Ok(0) => {
                tracing::warn!(server = %self.inner.server_addr, "[IRC] Connection closed by server (EOF)");
                self.teardown_after_failure().await;
                return Err(TwitchError::ConnectionClosed);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "[IRC] Error reading from chat");
                self.teardown_after_failure().await;
                return Err(TwitchError::Io(e));
            }
        }

        let line = String::from_utf8(buf).map_err(|e| {
            ParseError::InvalidUtf8(String::from_utf8_lossy(e.as_bytes()).into_owned())
        })?;
        let message = IrcMessage::parse(&line)?;
        self.respond_default_commands(&message).await;
        Ok(message)
    }

    async fn respond_default_commands(&self, message: &IrcMessage) {
        match message.command.as_str() {
            CMD_PING => {
                tracing::debug!("[IRC] Received server PING, responding with PONG");
                if let Err(e) = self.send_raw(&format_pong(&message.message)).await {
                    tracing::warn!(error = %e, "[IRC] Failed to send PONG");
                }
            }
            RPL_WELCOME => self.handle_welcome().await,
            CMD_RECONNECT => {
                tracing::info!("[IRC] Server requested RECONNECT, dropping connection");
                self.teardown_after_failure().await;
            }
            CMD_CAP => match message.args.get(1).map(String::as_str) {
                Some(IRC_ACK) => {
                    tracing::debug!(capabilities = %message.message, "[IRC] Capability ACK")
                }
                Some(IRC_NAK) => {
                    tracing::warn!(capabilities = %message.message, "[IRC] Capability NAK")
                }
                _ => {}
            },
            _ => {}
        }
    }

    async fn handle_welcome(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        tracing::info!("[IRC] Authenticated successfully (RPL_WELCOME)");

        if let Err(e) = self.send_raw(&format_capability_request()).await {
            tracing::warn!(error = %e, "[IRC] Failed to request capabilities");
        }

        let channels: Vec<String> = self.inner.rejoin_list.lock().await.iter().cloned().collect();
        for channel in channels {
            if let Err(e) = self.send_raw(&format_join(&channel)).await {
                tracing::warn!(channel.name = %channel, error = %e, "[IRC] Failed to rejoin channel");
            }
        }
    }

    async fn teardown_after_failure(&self) {
        if let Err(e) = self.disconnect().await {
            tracing::debug!(error = %e, "[IRC] Error while closing failed connection");
        }
    }

    /// Writes immediately, bypassing the outbound queue.
    async fn send_raw(&self, line: &str) -> TwitchResult<()> {
        self.inner.write_line(line).await
    }

    fn enqueue(&self, channel: &str, line: String) -> TwitchResult<()> {
        match self.inner.outbound_tx.try_send(line) {
            Ok(()) => Ok(()),
            // The transport owns the receiver, so a send can only fail on a full queue.
            Err(e) => {
                let line = e.into_inner();
                tracing::warn!(
                    channel.name = %channel,
                    dropped = %line,
                    "[IRC] Outbound queue full, dropping newest line"
                );
                Err(TwitchError::OutboundQueueFull(channel.to_string()))
            }
        }
    }

    async fn start_rate_limiter(&self) {
        self.stop_rate_limiter().await;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_rate_limiter(Arc::clone(&self.inner), shutdown_rx));
        *self.inner.rate_limiter.lock().await = Some(RateLimiterHandle { shutdown_tx, task });
    }

    async fn stop_rate_limiter(&self) {
        let handle = self.inner.rate_limiter.lock().await.take();
        if let Some(RateLimiterHandle { shutdown_tx, task }) = handle {
            let _ = shutdown_tx.send(());
            if let Err(e) = task.await {
                tracing::error!(error = ?e, "[IRC] Rate limiter task panicked or was cancelled");
            }
        }
    }
}

impl TransportInner {
    async fn write_line(&self, line: &str) -> TwitchResult<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(TwitchError::NotConnected)?;
        let sanitized = line.replace(['\r', '\n'], " ");
        tracing::trace!(line = %sanitized, "[IRC] >>");
        writer
            .write_all(format!("{}\r\n", sanitized).as_bytes())
            .await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn run_rate_limiter(inner: Arc<TransportInner>, mut shutdown_rx: oneshot::Receiver<()>) {
    let mut queue = tokio::select! {
        biased;
        _ = &mut shutdown_rx => return,
        queue = inner.outbound_rx.lock() => queue,
    };
    tracing::debug!(interval = ?inner.rate_limit, "[IRC] Rate limiter started");

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            line = queue.recv() => line,
        };
        let Some(line) = line else {
            break;
        };

        if let Err(e) = inner.write_line(&line).await {
            tracing::warn!(error = %e, dropped = %line, "[IRC] Rate limiter failed to write, stopping");
            inner.connected.store(false, Ordering::SeqCst);
            break;
        }

        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = sleep(inner.rate_limit) => {}
        }
    }
    tracing::debug!("[IRC] Rate limiter stopped");
}

fn normalize_channel(channel: &str) -> String {
    channel.trim_start_matches('#').to_lowercase()
}

#[cfg(test)]
impl IrcTransport {
    pub(crate) fn set_connected_for_test(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn drain_queue_for_test(&self) -> Vec<String> {
        let mut queue = self
            .inner
            .outbound_rx
            .try_lock()
            .expect("rate limiter should not own the queue in this test");
        let mut lines = Vec::new();
        while let Ok(line) = queue.try_recv() {
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::{Instant, timeout};

    const WELCOME: &[u8] = b":tmi.twitch.tv 001 gdb :Welcome, GLHF!\r\n";

    type ServerSide = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

    async fn next_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for client line")
            .expect("server read failed");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    async fn wait_for_line(reader: &mut BufReader<OwnedReadHalf>, wanted: &str) -> Vec<String> {
        let mut seen = Vec::new();
        loop {
            let line = next_line(reader).await;
            let done = line == wanted;
            seen.push(line);
            if done {
                return seen;
            }
        }
    }

    /// Every line the client writes until `window` elapses.
    async fn lines_within(reader: &mut BufReader<OwnedReadHalf>, window: Duration) -> Vec<String> {
        let deadline = Instant::now() + window;
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            match tokio::time::timeout_at(deadline, reader.read_line(&mut line)).await {
                Ok(Ok(n)) if n > 0 => lines.push(line.trim_end_matches(['\r', '\n']).to_string()),
                _ => return lines,
            }
        }
    }

    /// On the next accept, consumes PASS/NICK and answers with `reply`. The
    /// listener is handed back so a test can accept a second connection.
    fn accept_client(
        listener: TcpListener,
        reply: &'static [u8],
    ) -> JoinHandle<(ServerSide, String, String, TcpListener)> {
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut reader = BufReader::new(reader);
            let pass = next_line(&mut reader).await;
            let nick = next_line(&mut reader).await;
            writer.write_all(reply).await.unwrap();
            ((reader, writer), pass, nick, listener)
        })
    }

    async fn fake_server(
        reply: &'static [u8],
    ) -> (String, JoinHandle<(ServerSide, String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = accept_client(listener, reply);
        let handle = tokio::spawn(async move {
            let (server_side, pass, nick, _) = accepted.await.unwrap();
            (server_side, pass, nick)
        });
        (addr, handle)
    }

    fn fast_options() -> TransportOptions {
        TransportOptions {
            rate_limit: Duration::from_millis(100),
            queue_capacity: 16,
            ..TransportOptions::default()
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_missing_credentials() {
        let transport = IrcTransport::new("127.0.0.1:1", TransportOptions::default());
        assert!(matches!(
            transport.connect("", "oauth:token").await,
            Err(TwitchError::MissingCredentials)
        ));
        assert!(matches!(
            transport.connect("gdb", "").await,
            Err(TwitchError::MissingCredentials)
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_authenticates_and_requests_capabilities() {
        let (addr, server) = fake_server(WELCOME).await;
        let transport = IrcTransport::new(addr, fast_options());

        transport.connect("gdb", "oauth:secret").await.unwrap();
        assert!(transport.is_connected());

        let ((mut reader, _writer), pass, nick) = server.await.unwrap();
        assert_eq!(pass, "PASS oauth:secret");
        assert_eq!(nick, "NICK gdb");
        assert_eq!(
            next_line(&mut reader).await,
            "CAP REQ :twitch.tv/tags twitch.tv/commands"
        );

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_welcome_after_reconnect_replays_joined_channels() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Long enough that nothing queued could reach the second server in time.
        let transport = IrcTransport::new(
            addr,
            TransportOptions {
                rate_limit: Duration::from_secs(30),
                ..TransportOptions::default()
            },
        );

        let first = accept_client(listener, WELCOME);
        transport.connect("gdb", "oauth:secret").await.unwrap();
        let ((mut first_reader, first_writer), _, _, listener) = first.await.unwrap();
        transport.join("Alpha").await.unwrap();
        wait_for_line(&mut first_reader, "JOIN #alpha").await;

        drop(first_reader);
        drop(first_writer);
        assert!(transport.read().await.is_err());
        assert!(!transport.is_connected());

        let second = accept_client(listener, WELCOME);
        transport.connect("gdb", "oauth:secret").await.unwrap();
        let ((mut second_reader, _second_writer), _, _, _) = second.await.unwrap();

        assert_eq!(
            lines_within(&mut second_reader, Duration::from_millis(500)).await,
            vec!["CAP REQ :twitch.tv/tags twitch.tv/commands", "JOIN #alpha"]
        );
    }

    #[tokio::test]
    async fn test_silent_server_fails_connect_within_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let transport = IrcTransport::new(
            addr,
            TransportOptions {
                connect_timeout: Duration::from_millis(200),
                ..fast_options()
            },
        );
        let result = timeout(
            Duration::from_secs(3),
            transport.connect("gdb", "oauth:secret"),
        )
        .await
        .expect("connect should give up on a silent server");
        assert!(matches!(result, Err(TwitchError::TwitchAuth(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_quiet_connection_times_out_and_disconnects() {
        let (addr, server) = fake_server(WELCOME).await;
        let transport = IrcTransport::new(
            addr,
            TransportOptions {
                read_timeout: Duration::from_millis(300),
                ..fast_options()
            },
        );
        transport.connect("gdb", "oauth:secret").await.unwrap();
        let (_server_side, _, _) = server.await.unwrap();

        let result = timeout(Duration::from_secs(3), transport.read())
            .await
            .expect("read should give up on a silent server");
        assert!(matches!(result, Err(TwitchError::Timeout(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_ping_is_answered_before_returning() {
        let (addr, server) = fake_server(WELCOME).await;
        let transport = IrcTransport::new(addr, fast_options());
        transport.connect("gdb", "oauth:secret").await.unwrap();
        let ((mut reader, mut writer), _, _) = server.await.unwrap();

        writer.write_all(b"PING :tmi.twitch.tv\r\n").await.unwrap();
        let message = transport.read().await.unwrap();
        assert_eq!(message.command, CMD_PING);

        let seen = wait_for_line(&mut reader, "PONG :tmi.twitch.tv").await;
        assert_eq!(seen.last().map(String::as_str), Some("PONG :tmi.twitch.tv"));
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_lines_in_fifo_order() {
        let (addr, server) = fake_server(WELCOME).await;
        let transport = IrcTransport::new(addr, fast_options());
        transport.connect("gdb", "oauth:secret").await.unwrap();
        let ((mut reader, _writer), _, _) = server.await.unwrap();

        for n in 1..=3 {
            transport.chat("room", &format!("line {}", n)).unwrap();
        }

        let mut arrivals = Vec::new();
        while arrivals.len() < 3 {
            let line = next_line(&mut reader).await;
            if line.starts_with("PRIVMSG") {
                arrivals.push((line, Instant::now()));
            }
        }

        let lines: Vec<&str> = arrivals.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(
            lines,
            vec![
                "PRIVMSG #room :line 1",
                "PRIVMSG #room :line 2",
                "PRIVMSG #room :line 3"
            ]
        );
        for pair in arrivals.windows(2) {
            let gap = pair[1].1.duration_since(pair[0].1);
            assert!(gap >= Duration::from_millis(80), "lines sent {:?} apart", gap);
        }
    }

    #[tokio::test]
    async fn test_read_failure_marks_disconnected() {
        let (addr, server) = fake_server(WELCOME).await;
        let transport = IrcTransport::new(addr, fast_options());
        transport.connect("gdb", "oauth:secret").await.unwrap();
        assert!(transport.is_connected());

        let (server_side, _, _) = server.await.unwrap();
        drop(server_side);

        let err = transport.read().await.unwrap_err();
        assert!(matches!(
            err,
            TwitchError::ConnectionClosed | TwitchError::Io(_)
        ));
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.read().await,
            Err(TwitchError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_notice_fails_connect() {
        let (addr, _server) =
            fake_server(b":tmi.twitch.tv NOTICE * :Login authentication failed\r\n").await;
        let transport = IrcTransport::new(addr, fast_options());
        let result = transport.connect("gdb", "oauth:bad").await;
        assert!(matches!(result, Err(TwitchError::TwitchAuth(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_line_is_parse_error_and_keeps_connection() {
        let (addr, server) = fake_server(WELCOME).await;
        let transport = IrcTransport::new(addr, fast_options());
        transport.connect("gdb", "oauth:secret").await.unwrap();
        let ((_reader, mut writer), _, _) = server.await.unwrap();

        writer.write_all(b":header\r\n").await.unwrap();
        assert!(matches!(
            transport.read().await,
            Err(TwitchError::Parse(_))
        ));
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_parse_error_and_keeps_connection() {
        let (addr, server) = fake_server(WELCOME).await;
        let transport = IrcTransport::new(addr, fast_options());
        transport.connect("gdb", "oauth:secret").await.unwrap();
        let ((_reader, mut writer), _, _) = server.await.unwrap();

        writer
            .write_all(b":a!a@a PRIVMSG #c :bad \xff\xfe bytes\r\n:a!a@a PRIVMSG #c :fine\r\n")
            .await
            .unwrap();
        assert!(matches!(
            transport.read().await,
            Err(TwitchError::Parse(ParseError::InvalidUtf8(_)))
        ));
        assert!(transport.is_connected());

        let next = transport.read().await.unwrap();
        assert_eq!(next.message, "fine");
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_line() {
        let transport = IrcTransport::new(
            "127.0.0.1:1",
            TransportOptions {
                rate_limit: Duration::from_millis(10),
                queue_capacity: 2,
                ..TransportOptions::default()
            },
        );
        transport.chat("room", "first").unwrap();
        transport.chat("room", "second").unwrap();
        assert!(matches!(
            transport.chat("room", "third"),
            Err(TwitchError::OutboundQueueFull(_))
        ));

        assert_eq!(
            transport.drain_queue_for_test(),
            vec!["PRIVMSG #room :first", "PRIVMSG #room :second"]
        );
    }

    #[tokio::test]
    async fn test_join_and_part_queue_while_disconnected() {
        let transport = IrcTransport::new("127.0.0.1:1", TransportOptions::default());
        transport.join("#Room").await.unwrap();
        transport.part("room").await.unwrap();
        assert_eq!(
            transport.drain_queue_for_test(),
            vec!["JOIN #room", "PART #room"]
        );
        assert!(transport.inner.rejoin_list.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = IrcTransport::new("127.0.0.1:1", TransportOptions::default());
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }
}
