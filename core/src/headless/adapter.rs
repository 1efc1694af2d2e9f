use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::buffer::OutputBuffer;
use super::HeadlessOptions;
use crate::error::TunnelError;
use crate::frame::parse_frame;
use crate::prompt::{ErrorResponsePolicy, PromptRegistry, PromptWait};
use crate::protocol::{HeadlessMessage, HeadlessServerMessage, SessionInfo, StructuredMessage, TunnelMessage};
use crate::sink::LoggerSink;
use crate::tunnel::{deliver_user_input, UserInputHandler};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DESTROY_POLL: Duration = Duration::from_millis(10);
const CLOSE_GRACE: Duration = Duration::from_millis(100);
/// Unclaimed prompt registrations kept per adapter; the oldest is released past this.
const ANNOUNCED_LIMIT: usize = 256;

/// Connection phase as seen from outside the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterPhase {
    Disconnected,
    Connecting,
    Connected,
    /// `destroy()` is flushing what is left before closing.
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Disconnected,
    Connecting,
    Connected,
}

/// Wraps a local sink and streams everything it sees to a remote viewer.
///
/// Output is sequence-numbered at enqueue time, kept in a byte-bounded history and
/// replayed in full after every (re)connect. The remote side can answer prompts and
/// push user input back.
#[derive(Clone)]
pub struct HeadlessAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    url: String,
    local: Arc<dyn LoggerSink>,
    options: HeadlessOptions,
    runtime: Handle,
    control: ControlFrames,
    state: Mutex<AdapterState>,
    wake: Arc<Notify>,
    prompts: PromptRegistry,
    // Waits registered when a prompt_request was streamed, until a handler claims them.
    announced: Mutex<VecDeque<PromptWait>>,
    user_input: Mutex<Option<UserInputHandler>>,
}

struct ControlFrames {
    session_info: String,
    replay_start: String,
    replay_end: String,
}

struct AdapterState {
    link: Link,
    destroyed: bool,
    close_requested: bool,
    buffer: OutputBuffer,
    next_seq: u64,
    last_attempt: Option<Instant>,
    generation: u64,
    connection_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

impl AdapterState {
    /// The sender for `generation` is still current and allowed to run.
    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.link == Link::Connected && !self.close_requested
    }
}

impl HeadlessAdapter {
    /// Build the adapter and start the first connection attempt. Must be called from
    /// within a tokio runtime.
    pub fn new(
        url: impl Into<String>,
        session_info: SessionInfo,
        local: Arc<dyn LoggerSink>,
        options: HeadlessOptions,
    ) -> Result<Self, TunnelError> {
        let url = url.into();
        let runtime = Handle::try_current().map_err(|e| TunnelError::Connect {
            endpoint: url.clone(),
            reason: e.to_string(),
        })?;
        let control = ControlFrames {
            session_info: serde_json::to_string(&HeadlessMessage::SessionInfo(session_info))?,
            replay_start: serde_json::to_string(&HeadlessMessage::ReplayStart)?,
            replay_end: serde_json::to_string(&HeadlessMessage::ReplayEnd)?,
        };

        let inner = Arc::new(AdapterInner {
            url,
            local,
            runtime,
            control,
            state: Mutex::new(AdapterState {
                link: Link::Disconnected,
                destroyed: false,
                close_requested: false,
                buffer: OutputBuffer::new(options.max_buffer_bytes),
                next_seq: 1,
                last_attempt: None,
                generation: 0,
                connection_task: None,
                reader_task: None,
            }),
            options,
            wake: Arc::new(Notify::new()),
            prompts: PromptRegistry::new("headless", ErrorResponsePolicy::Detach),
            announced: Mutex::new(VecDeque::new()),
            user_input: Mutex::new(None),
        });

        {
            let mut st = inner.state.lock();
            inner.try_connect(&mut st);
        }
        Ok(Self { inner })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn phase(&self) -> AdapterPhase {
        let st = self.inner.state.lock();
        match (st.link, st.destroyed) {
            (Link::Disconnected, _) => AdapterPhase::Disconnected,
            (_, true) => AdapterPhase::Draining,
            (Link::Connecting, false) => AdapterPhase::Connecting,
            (Link::Connected, false) => AdapterPhase::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().link == Link::Connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Bytes of `output` frames waiting in the live queue.
    pub fn buffered_output_bytes(&self) -> usize {
        self.inner.state.lock().buffer.buffered_output_bytes()
    }

    /// Bytes of `output` frames retained for replay.
    pub fn history_output_bytes(&self) -> usize {
        self.inner.state.lock().buffer.history_output_bytes()
    }

    /// The sequence number the next `output` frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.inner.state.lock().next_seq
    }

    pub fn pending_prompts(&self) -> usize {
        self.inner.prompts.pending_count()
    }

    /// Register interest in the remote answer to `request_id`.
    ///
    /// A `prompt_request` that already went out through this adapter was registered when
    /// it was streamed; that registration is handed over here, together with any answer
    /// that arrived in the meantime. An error response from the viewer does not settle
    /// the wait; only a value, the owner's cancel, or adapter shutdown does.
    pub fn wait_for_prompt_response(&self, request_id: &str) -> Result<PromptWait, TunnelError> {
        if self.is_destroyed() {
            return Err(TunnelError::Destroyed);
        }
        if let Some(wait) = self.inner.claim_announced(request_id) {
            return Ok(wait);
        }
        self.inner.prompts.wait_for(request_id)
    }

    /// Stream the request and return the wait registered for it.
    pub fn send_prompt_request(&self, request: StructuredMessage) -> Result<PromptWait, TunnelError> {
        let request_id = request
            .request_id()
            .ok_or_else(|| TunnelError::InvalidPromptRequest("missing requestId".to_string()))?
            .to_string();
        if self.is_destroyed() {
            return Err(TunnelError::Destroyed);
        }
        if self.inner.prompts.is_pending(&request_id) {
            return Err(TunnelError::DuplicateRequest(request_id));
        }
        self.send_structured(request);
        self.wait_for_prompt_response(&request_id)
    }

    pub fn set_user_input_handler(&self, handler: Option<UserInputHandler>) {
        *self.inner.user_input.lock() = handler;
    }

    /// Reject pending prompts, give an in-flight connect up to half of `timeout`, flush
    /// the queue over an open connection for what remains, then close.
    pub async fn destroy(&self, timeout: Duration) {
        let started = Instant::now();
        {
            let mut st = self.inner.state.lock();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
        }
        let rejected = self.inner.prompts.reject_all(TunnelError::Destroyed);
        self.inner.announced.lock().clear();
        tracing::debug!(target: "nestlog.headless", url = %self.inner.url, rejected, "headless adapter draining");

        let connect_deadline = started + timeout / 2;
        while self.inner.state.lock().link == Link::Connecting && Instant::now() < connect_deadline {
            tokio::time::sleep(DESTROY_POLL).await;
        }

        let flush_deadline = started + timeout;
        loop {
            {
                let st = self.inner.state.lock();
                if st.link != Link::Connected || st.buffer.is_queue_empty() {
                    break;
                }
            }
            if Instant::now() >= flush_deadline {
                tracing::debug!(
                    target: "nestlog.headless",
                    unsent = self.inner.state.lock().buffer.queue_len(),
                    "headless flush timed out"
                );
                break;
            }
            self.inner.wake.notify_one();
            tokio::time::sleep(DESTROY_POLL).await;
        }

        let (connection, reader) = self.inner.request_close();
        if let Some(task) = connection {
            let abort = task.abort_handle();
            let grace = flush_deadline
                .saturating_duration_since(Instant::now())
                .max(CLOSE_GRACE);
            if tokio::time::timeout(grace, task).await.is_err() {
                abort.abort();
            }
        }
        if let Some(task) = reader {
            task.abort();
        }
    }

    /// Non-suspending variant of [`HeadlessAdapter::destroy`]: nothing is flushed.
    pub fn destroy_sync(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
        }
        self.inner.prompts.reject_all(TunnelError::Destroyed);
        self.inner.announced.lock().clear();
        let (connection, reader) = self.inner.request_close();
        for task in connection.into_iter().chain(reader) {
            task.abort();
        }
    }

    fn enqueue(&self, message: TunnelMessage) {
        let mut st = self.inner.state.lock();
        if st.destroyed {
            return;
        }
        let seq = st.next_seq;
        st.next_seq += 1;
        let payload = match serde_json::to_string(&HeadlessMessage::Output { seq, message }) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(target: "nestlog.headless", seq, error = %e, "failed to encode output frame");
                return;
            }
        };
        let evicted = st.buffer.push_output(payload, seq);
        if evicted > 0 {
            tracing::trace!(
                target: "nestlog.headless",
                evicted,
                history_bytes = st.buffer.history_output_bytes(),
                "history over budget; dropped oldest output"
            );
        }

        match st.link {
            Link::Connected => {
                drop(st);
                self.inner.wake.notify_one();
            }
            Link::Disconnected => self.inner.try_connect(&mut st),
            Link::Connecting => {}
        }
    }
}

impl AdapterInner {
    /// Register a streamed prompt before it can reach the viewer, so an immediate
    /// answer is never taken for an unknown id.
    fn announce_prompt(&self, message: &StructuredMessage) {
        let Some(request_id) = message.request_id() else {
            return;
        };
        if self.state.lock().destroyed {
            return;
        }
        match self.prompts.wait_for(request_id) {
            Ok(wait) => {
                let mut announced = self.announced.lock();
                if announced.len() >= ANNOUNCED_LIMIT {
                    if let Some(oldest) = announced.pop_front() {
                        tracing::debug!(
                            target: "nestlog.headless",
                            request_id = oldest.request_id(),
                            "releasing unclaimed prompt registration"
                        );
                    }
                }
                announced.push_back(wait);
            }
            Err(e) => {
                tracing::trace!(target: "nestlog.headless", request_id, error = %e, "prompt already registered");
            }
        }
    }

    fn claim_announced(&self, request_id: &str) -> Option<PromptWait> {
        let mut announced = self.announced.lock();
        let pos = announced.iter().position(|w| w.request_id() == request_id)?;
        announced.remove(pos)
    }

    /// Start a connection attempt unless one ran less than `reconnect_interval` ago.
    fn try_connect(self: &Arc<Self>, st: &mut AdapterState) {
        if st.destroyed || st.link != Link::Disconnected {
            return;
        }
        let now = Instant::now();
        if let Some(last) = st.last_attempt {
            if now.duration_since(last) < self.options.reconnect_interval {
                return;
            }
        }
        st.last_attempt = Some(now);
        st.link = Link::Connecting;
        tracing::debug!(target: "nestlog.headless", url = %self.url, "connecting to remote viewer");
        st.connection_task = Some(self.runtime.spawn(run_connection(
            Arc::downgrade(self),
            self.wake.clone(),
            self.url.clone(),
            self.options.connect_timeout,
        )));
    }

    fn connect_failed(&self, reason: &str) {
        let mut st = self.state.lock();
        if st.link == Link::Connecting {
            st.link = Link::Disconnected;
        }
        tracing::debug!(target: "nestlog.headless", url = %self.url, reason, "remote viewer connect failed");
    }

    /// Transition to connected and rebuild the queue with the replay handshake.
    /// Returns the new connection generation, or `None` if a close was requested meanwhile.
    fn on_open(&self) -> Option<u64> {
        let mut st = self.state.lock();
        if st.close_requested {
            st.link = Link::Disconnected;
            return None;
        }
        st.link = Link::Connected;
        st.generation += 1;
        st.buffer.begin_replay(
            self.control.session_info.clone(),
            self.control.replay_start.clone(),
            self.control.replay_end.clone(),
        );
        tracing::debug!(
            target: "nestlog.headless",
            url = %self.url,
            replayed = st.buffer.history_len(),
            "remote viewer connected"
        );
        Some(st.generation)
    }

    fn on_disconnect(&self, generation: u64, reason: &str) {
        {
            let mut st = self.state.lock();
            if st.generation != generation || st.link != Link::Connected {
                return;
            }
            st.link = Link::Disconnected;
        }
        self.wake.notify_one();
        tracing::debug!(target: "nestlog.headless", url = %self.url, reason, "remote viewer disconnected");
    }

    fn request_close(&self) -> (Option<JoinHandle<()>>, Option<JoinHandle<()>>) {
        let tasks = {
            let mut st = self.state.lock();
            st.close_requested = true;
            st.link = Link::Disconnected;
            (st.connection_task.take(), st.reader_task.take())
        };
        self.wake.notify_one();
        tasks
    }

    fn handle_incoming(&self, text: &str) {
        let Some(message) = parse_frame::<HeadlessServerMessage>(text) else {
            return;
        };
        match message {
            HeadlessServerMessage::PromptResponse(response) => {
                self.prompts.settle(response);
            }
            HeadlessServerMessage::UserInput { content } => {
                let handler = self.user_input.lock().clone();
                deliver_user_input(handler, content);
            }
        }
    }
}

async fn run_connection(
    inner: Weak<AdapterInner>,
    wake: Arc<Notify>,
    url: String,
    connect_timeout: Duration,
) {
    // A peer that accepts TCP but never answers the upgrade must not pin us in Connecting.
    let connected = tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await;
    let Some(adapter) = inner.upgrade() else {
        return;
    };
    let ws = match connected {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            adapter.connect_failed(&e.to_string());
            return;
        }
        Err(_) => {
            adapter.connect_failed(&format!("no handshake within {}ms", connect_timeout.as_millis()));
            return;
        }
    };
    let (mut sink, stream) = ws.split();

    let Some(generation) = adapter.on_open() else {
        drop(adapter);
        let _ = sink.close().await;
        return;
    };
    let reader = adapter
        .runtime
        .spawn(read_loop(inner.clone(), stream, generation));
    if let Some(stale) = adapter.state.lock().reader_task.replace(reader) {
        stale.abort();
    }
    drop(adapter);

    drain_loop(&inner, &wake, &mut sink, generation).await;
    let _ = sink.close().await;
}

/// Single sender per connection: one frame per turn, yielding in between.
async fn drain_loop<S>(inner: &Weak<AdapterInner>, wake: &Notify, sink: &mut S, generation: u64)
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    loop {
        let next = {
            let Some(adapter) = inner.upgrade() else {
                return;
            };
            let st = adapter.state.lock();
            if !st.is_live(generation) {
                return;
            }
            let next = st.buffer.front().map(|(id, payload)| (id, payload.to_string()));
            next
        };

        // `notify_one` leaves a permit behind, so a wake issued between the check
        // above and this await is not lost.
        let Some((id, payload)) = next else {
            wake.notified().await;
            continue;
        };

        if let Err(e) = sink.send(Message::Text(payload)).await {
            if let Some(adapter) = inner.upgrade() {
                adapter.on_disconnect(generation, &e.to_string());
            }
            return;
        }
        if let Some(adapter) = inner.upgrade() {
            adapter.state.lock().buffer.complete(id);
        }
        tokio::task::yield_now().await;
    }
}

async fn read_loop(inner: Weak<AdapterInner>, mut stream: SplitStream<WsStream>, generation: u64) {
    let mut reason = String::from("closed by peer");
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                reason = e.to_string();
                break;
            }
        };
        let Some(adapter) = inner.upgrade() else {
            return;
        };
        adapter.handle_incoming(&text);
    }
    if let Some(adapter) = inner.upgrade() {
        adapter.on_disconnect(generation, &reason);
    }
}

impl Drop for AdapterInner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        for task in st.connection_task.take().into_iter().chain(st.reader_task.take()) {
            task.abort();
        }
    }
}

impl LoggerSink for HeadlessAdapter {
    fn log(&self, args: &[String]) {
        self.inner.local.log(args);
        self.enqueue(TunnelMessage::Log {
            args: args.to_vec(),
        });
    }

    fn error(&self, args: &[String]) {
        self.inner.local.error(args);
        self.enqueue(TunnelMessage::Error {
            args: args.to_vec(),
        });
    }

    fn warn(&self, args: &[String]) {
        self.inner.local.warn(args);
        self.enqueue(TunnelMessage::Warn {
            args: args.to_vec(),
        });
    }

    fn debug(&self, args: &[String]) {
        self.inner.local.debug(args);
        self.enqueue(TunnelMessage::Debug {
            args: args.to_vec(),
        });
    }

    fn write_stdout(&self, data: &str) {
        self.inner.local.write_stdout(data);
        self.enqueue(TunnelMessage::Stdout {
            data: data.to_string(),
        });
    }

    fn write_stderr(&self, data: &str) {
        self.inner.local.write_stderr(data);
        self.enqueue(TunnelMessage::Stderr {
            data: data.to_string(),
        });
    }

    fn send_structured(&self, message: StructuredMessage) {
        if message.is_prompt_request() {
            self.inner.announce_prompt(&message);
        }
        self.inner.local.send_structured(message.clone());
        self.enqueue(TunnelMessage::Structured { message });
    }
}
