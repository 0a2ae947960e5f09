//! Duplex bridge between a launched process and a remote connection.
//!
//! Two copy directions run as separate tasks:
//! - outbound: process output → remote, in chunks of at most 1 KiB
//! - inbound: remote messages → process input, verbatim
//!
//! The first direction to stop calls the shared idempotent teardown, which
//! cancels the remote read and kills the process on the blocking pool
//! (ending the blocking PTY read). The remote is closed from this side once
//! outbound stops.

use super::pty::{ProcessControl, ProcessHandle};
use lmi_core::{FrameSink, FrameSource};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum bytes read from the process per outbound frame.
pub const CHUNK_SIZE: usize = 1024;

/// Chunks buffered between the blocking reader and the outbound task.
const OUTPUT_QUEUE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Bridging,
    Closing,
    Closed,
}

/// Why a bridge left `Bridging`. The first cause observed wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Process output reached end-of-stream.
    ProcessExited,
    ProcessReadFailed(String),
    ProcessWriteFailed(String),
    /// The peer sent a close frame or the stream ended.
    RemoteClosed,
    RemoteReadFailed(String),
    RemoteWriteFailed(String),
}

/// Summary of a finished bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOutcome {
    pub reason: CloseReason,
    /// Bytes copied process → remote.
    pub bytes_out: u64,
    /// Bytes copied remote → process.
    pub bytes_in: u64,
    pub exit_code: Option<u32>,
}

/// Notified after every successful transfer in either direction.
pub trait ActivityObserver: Send + Sync {
    fn record_activity(&self);
}

/// Resources shared by both directions of one bridge.
struct BridgeShared {
    state: watch::Sender<BridgeState>,
    cancel: CancellationToken,
    control: Arc<Mutex<Option<Box<dyn ProcessControl>>>>,
    reason: Mutex<Option<CloseReason>>,
    kill: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeShared {
    /// Enter `Closing`, cancel the remote read and start killing the process.
    /// Only the first call has any effect.
    ///
    /// A kill may block (portable-pty sleeps between signals), so it runs on
    /// the blocking pool. `run` joins it before reaping the process.
    fn teardown(&self, reason: CloseReason) {
        {
            let mut slot = lock(&self.reason);
            if slot.is_some() {
                return;
            }
            debug!(reason = ?reason, "bridge closing");
            *slot = Some(reason);
        }
        self.state.send_replace(BridgeState::Closing);
        self.cancel.cancel();
        let control = self.control.clone();
        let kill = tokio::task::spawn_blocking(move || {
            if let Some(control) = lock(&control).as_mut() {
                if let Err(e) = control.kill() {
                    warn!(error = %e, "failed to kill bridged process");
                }
            }
        });
        *lock(&self.kill) = Some(kill);
    }

    fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One bridge instance; owns its process for the lifetime of one connection.
pub struct Bridge {
    process: ProcessHandle,
    observer: Option<Arc<dyn ActivityObserver>>,
    state: watch::Sender<BridgeState>,
}

impl Bridge {
    pub fn new(process: ProcessHandle) -> Self {
        Self {
            process,
            observer: None,
            state: watch::Sender::new(BridgeState::Connecting),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ActivityObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Watch the bridge's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Relay bytes until either side stops, then release everything.
    pub async fn run<S, K>(self, source: S, sink: K) -> BridgeOutcome
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let Bridge {
            process,
            observer,
            state,
        } = self;
        let ProcessHandle {
            output,
            input,
            control,
        } = process;

        let shared = Arc::new(BridgeShared {
            state,
            cancel: CancellationToken::new(),
            control: Arc::new(Mutex::new(Some(control))),
            reason: Mutex::new(None),
            kill: Mutex::new(None),
        });
        shared.state.send_replace(BridgeState::Bridging);
        debug!("bridge started");

        let (chunk_tx, chunk_rx) = mpsc::channel(OUTPUT_QUEUE);
        // Detached: ends on its own once the process is gone.
        tokio::task::spawn_blocking(move || pump_output(output, chunk_tx));

        let outbound = tokio::spawn(outbound_loop(
            shared.clone(),
            chunk_rx,
            sink,
            observer.clone(),
        ));
        let inbound = tokio::spawn(inbound_loop(shared.clone(), source, input, observer));

        let (bytes_out, bytes_in) = tokio::join!(outbound, inbound);
        let bytes_out = bytes_out.unwrap_or_else(|e| {
            shared.teardown(CloseReason::RemoteWriteFailed(format!("outbound task: {e}")));
            0
        });
        let bytes_in = bytes_in.unwrap_or_else(|e| {
            shared.teardown(CloseReason::ProcessWriteFailed(format!("inbound task: {e}")));
            0
        });

        let kill = lock(&shared.kill).take();
        if let Some(kill) = kill {
            if let Err(e) = kill.await {
                warn!(error = %e, "kill task failed");
            }
        }

        let control = lock(&shared.control).take();
        let exit_code = match control {
            Some(mut control) => tokio::task::spawn_blocking(move || control.wait())
                .await
                .ok()
                .and_then(|r| r.ok())
                .flatten(),
            None => None,
        };

        let reason = lock(&shared.reason)
            .clone()
            .unwrap_or(CloseReason::ProcessExited);
        shared.state.send_replace(BridgeState::Closed);
        debug!(reason = ?reason, bytes_out, bytes_in, "bridge closed");

        BridgeOutcome {
            reason,
            bytes_out,
            bytes_in,
            exit_code,
        }
    }
}

/// Blocking: read process output in bounded chunks until EOF or error.
fn pump_output(mut output: Box<dyn Read + Send>, tx: mpsc::Sender<std::io::Result<Vec<u8>>>) {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        match output.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

async fn outbound_loop<K: FrameSink>(
    shared: Arc<BridgeShared>,
    mut chunks: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    mut sink: K,
    observer: Option<Arc<dyn ActivityObserver>>,
) -> u64 {
    let mut sent = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = chunks.recv() => next,
        };
        match next {
            None => {
                shared.teardown(CloseReason::ProcessExited);
                break;
            }
            Some(Err(e)) => {
                shared.teardown(CloseReason::ProcessReadFailed(e.to_string()));
                break;
            }
            Some(Ok(data)) => {
                if shared.is_closing() {
                    break;
                }
                let n = data.len() as u64;
                if let Err(e) = sink.send(data).await {
                    shared.teardown(CloseReason::RemoteWriteFailed(e.to_string()));
                    break;
                }
                sent += n;
                if let Some(obs) = &observer {
                    obs.record_activity();
                }
            }
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "remote close failed");
    }
    sent
}

async fn inbound_loop<S: FrameSource>(
    shared: Arc<BridgeShared>,
    mut source: S,
    mut input: Box<dyn Write + Send>,
    observer: Option<Arc<dyn ActivityObserver>>,
) -> u64 {
    let mut received = 0u64;
    loop {
        let message = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            message = source.recv() => message,
        };
        let data = match message {
            Ok(Some(data)) => data,
            Ok(None) => {
                shared.teardown(CloseReason::RemoteClosed);
                break;
            }
            Err(e) => {
                shared.teardown(CloseReason::RemoteReadFailed(e.to_string()));
                break;
            }
        };
        if data.is_empty() {
            continue;
        }
        let n = data.len() as u64;

        let write = tokio::task::spawn_blocking(move || {
            let result = input.write_all(&data).and_then(|_| input.flush());
            (input, result)
        });
        let written = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            written = write => written,
        };
        match written {
            Ok((returned, Ok(()))) => {
                input = returned;
                received += n;
                if let Some(obs) = &observer {
                    obs.record_activity();
                }
            }
            Ok((_, Err(e))) => {
                shared.teardown(CloseReason::ProcessWriteFailed(e.to_string()));
                break;
            }
            Err(e) => {
                shared.teardown(CloseReason::ProcessWriteFailed(e.to_string()));
                break;
            }
        }
    }
    received
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lmi_core::transport::BoxFuture;
    use lmi_core::{LmiError, LmiResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Output fed through a std channel; ends when the process is "killed".
    pub(crate) struct FakeOutput(std::sync::mpsc::Receiver<Vec<u8>>, Vec<u8>);

    impl Read for FakeOutput {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.1.is_empty() {
                match self.0.recv() {
                    Ok(data) => self.1 = data,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.1.len());
            buf[..n].copy_from_slice(&self.1[..n]);
            self.1.drain(..n);
            Ok(n)
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct SharedInput(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedInput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            lock(&self.0).extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) struct FakeControl {
        /// Dropping the sender ends the fake output stream.
        feed: Arc<Mutex<Option<std::sync::mpsc::Sender<Vec<u8>>>>>,
        killed: Arc<AtomicBool>,
        kill_delay: Duration,
    }

    impl ProcessControl for FakeControl {
        fn kill(&mut self) -> LmiResult<()> {
            std::thread::sleep(self.kill_delay);
            self.killed.store(true, Ordering::SeqCst);
            lock(&self.feed).take();
            Ok(())
        }
        fn wait(&mut self) -> LmiResult<Option<u32>> {
            Ok(Some(0))
        }
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }
    }

    /// Test-side view of a fake process.
    pub(crate) struct FakeProcess {
        pub feed: Arc<Mutex<Option<std::sync::mpsc::Sender<Vec<u8>>>>>,
        pub input: SharedInput,
        pub killed: Arc<AtomicBool>,
    }

    impl FakeProcess {
        pub fn emit(&self, data: &[u8]) {
            if let Some(tx) = lock(&self.feed).as_ref() {
                let _ = tx.send(data.to_vec());
            }
        }

        /// Simulate the process exiting on its own.
        pub fn exit(&self) {
            lock(&self.feed).take();
        }
    }

    pub(crate) fn fake_process() -> (ProcessHandle, FakeProcess) {
        fake_process_with_kill_delay(Duration::ZERO)
    }

    /// A fake whose kill blocks the calling thread for `kill_delay`.
    pub(crate) fn fake_process_with_kill_delay(
        kill_delay: Duration,
    ) -> (ProcessHandle, FakeProcess) {
        let (tx, rx) = std::sync::mpsc::channel();
        let feed = Arc::new(Mutex::new(Some(tx)));
        let input = SharedInput::default();
        let killed = Arc::new(AtomicBool::new(false));
        let handle = ProcessHandle {
            output: Box::new(FakeOutput(rx, Vec::new())),
            input: Box::new(input.clone()),
            control: Box::new(FakeControl {
                feed: feed.clone(),
                killed: killed.clone(),
                kill_delay,
            }),
        };
        (
            handle,
            FakeProcess {
                feed,
                input,
                killed,
            },
        )
    }

    struct ChannelSource(mpsc::UnboundedReceiver<LmiResult<Vec<u8>>>);

    impl FrameSource for ChannelSource {
        fn recv(&mut self) -> BoxFuture<'_, LmiResult<Option<Vec<u8>>>> {
            Box::pin(async move {
                match self.0.recv().await {
                    Some(Ok(data)) => Ok(Some(data)),
                    Some(Err(e)) => Err(e),
                    None => Ok(None),
                }
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<AtomicBool>,
        writes_after_close: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FrameSink for RecordingSink {
        fn send(&mut self, data: Vec<u8>) -> BoxFuture<'_, LmiResult<()>> {
            Box::pin(async move {
                if self.closed.load(Ordering::SeqCst) {
                    self.writes_after_close.fetch_add(1, Ordering::SeqCst);
                }
                if self.fail {
                    return Err(LmiError::Stream("broken pipe".into()));
                }
                lock(&self.frames).push(data);
                Ok(())
            })
        }
        fn send_text(&mut self, text: String) -> BoxFuture<'_, LmiResult<()>> {
            self.send(text.into_bytes())
        }
        fn close(&mut self) -> BoxFuture<'_, LmiResult<()>> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct CountingObserver(AtomicUsize);

    impl ActivityObserver for CountingObserver {
        fn record_activity(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn relays_both_directions_until_remote_closes() {
        let (handle, process) = fake_process();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink::default();
        let observer = Arc::new(CountingObserver::default());

        let bridge = Bridge::new(handle).with_observer(observer.clone());
        let mut states = bridge.subscribe();
        assert_eq!(*states.borrow(), BridgeState::Connecting);
        let task = tokio::spawn(bridge.run(ChannelSource(remote_rx), sink.clone()));

        process.emit(b"$ ");
        remote_tx.send(Ok(b"ls\n".to_vec())).unwrap();

        let frames = sink.frames.clone();
        wait_for(|| !lock(&frames).is_empty()).await;
        let input = process.input.0.clone();
        wait_for(|| lock(&input).as_slice() == b"ls\n").await;
        assert_eq!(*states.borrow_and_update(), BridgeState::Bridging);

        drop(remote_tx);
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.reason, CloseReason::RemoteClosed);
        assert_eq!(outcome.bytes_out, 2);
        assert_eq!(outcome.bytes_in, 3);
        assert_eq!(lock(&sink.frames).concat(), b"$ ");
        assert!(process.killed.load(Ordering::SeqCst));
        assert!(sink.closed.load(Ordering::SeqCst));
        assert_eq!(observer.0.load(Ordering::SeqCst), 2);
        assert_eq!(*states.borrow(), BridgeState::Closed);
    }

    #[tokio::test]
    async fn process_exit_closes_connection_without_remote_input() {
        let (handle, process) = fake_process();
        // Keep the sender alive: the remote never speaks, so inbound must be
        // cancelled rather than left blocked.
        let (_remote_tx, remote_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink::default();

        let task = tokio::spawn(Bridge::new(handle).run(ChannelSource(remote_rx), sink.clone()));
        process.emit(b"bye\r\n");
        process.exit();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.reason, CloseReason::ProcessExited);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(lock(&sink.frames).concat(), b"bye\r\n");
        assert!(sink.closed.load(Ordering::SeqCst));
        assert_eq!(sink.writes_after_close.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn output_is_chunked_and_ordered() {
        let (handle, process) = fake_process();
        let (_remote_tx, remote_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink::default();

        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        process.emit(&payload);
        process.exit();

        let outcome = Bridge::new(handle)
            .run(ChannelSource(remote_rx), sink.clone())
            .await;
        assert_eq!(outcome.bytes_out, 5000);
        let frames = lock(&sink.frames).clone();
        assert!(frames.iter().all(|f| !f.is_empty() && f.len() <= CHUNK_SIZE));
        assert_eq!(frames.concat(), payload);
    }

    #[tokio::test]
    async fn remote_write_failure_kills_process() {
        let (handle, process) = fake_process();
        let (_remote_tx, remote_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };

        let task = tokio::spawn(Bridge::new(handle).run(ChannelSource(remote_rx), sink));
        process.emit(b"output");

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome.reason, CloseReason::RemoteWriteFailed(_)));
        assert!(process.killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn remote_read_error_is_terminal() {
        let (handle, process) = fake_process();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink::default();

        let task = tokio::spawn(Bridge::new(handle).run(ChannelSource(remote_rx), sink.clone()));
        remote_tx
            .send(Err(LmiError::Stream("connection reset".into())))
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome.reason, CloseReason::RemoteReadFailed(_)));
        assert!(process.killed.load(Ordering::SeqCst));
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn slow_kill_does_not_stall_the_runtime() {
        let (handle, process) = fake_process_with_kill_delay(Duration::from_millis(300));
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink::default();

        let task = tokio::spawn(Bridge::new(handle).run(ChannelSource(remote_rx), sink));
        // Single-threaded runtime: a kill on the worker would hold up every tick.
        let ticker = tokio::spawn(async {
            let mut longest = Duration::ZERO;
            for _ in 0..40 {
                let start = std::time::Instant::now();
                tokio::time::sleep(Duration::from_millis(10)).await;
                longest = longest.max(start.elapsed());
            }
            longest
        });
        drop(remote_tx);

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.reason, CloseReason::RemoteClosed);
        assert!(process.killed.load(Ordering::SeqCst));

        let longest = ticker.await.unwrap();
        assert!(longest < Duration::from_millis(150), "runtime stalled for {longest:?}");
    }
}
