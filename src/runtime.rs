//! Tokio driver for a [`ScannerService`].
//!
//! Channels are independent producers feeding one command queue; a single
//! consumer task owns the service, so buffer mutation never races. Events are
//! stamped with their arrival time when sent, not when dequeued, so queueing
//! delay never distorts inter-key gaps. Between commands the task sleeps until
//! the service's next timer deadline and ticks it.

use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capture::{HostEvent, InputHost};
use crate::dedup::DetectionResult;
use crate::diagnostics::ScannerSnapshot;
use crate::error::{Result, ScanError};
use crate::listeners::{ListenerId, ScanListener};
use crate::service::ScannerService;

/// Commands that can be queued before backpressure kicks in.
const QUEUE_CAPACITY: usize = 256;

enum Command {
    Event(HostEvent, Instant),
    Start,
    Stop,
    Inject(String, Instant),
    InjectKey(char, Instant),
    ForceFinalize,
    Subscribe(ScanListener, oneshot::Sender<ListenerId>),
    Unsubscribe(ListenerId, oneshot::Sender<bool>),
    Snapshot(oneshot::Sender<ScannerSnapshot>),
}

/// Cloneable handle to a running scanner task.
#[derive(Clone)]
pub struct ScannerHandle {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

/// Move `service` onto its own task and return a handle to it.
///
/// Must be called from within a tokio runtime.
pub fn spawn<H>(service: ScannerService<H>) -> (ScannerHandle, JoinHandle<()>)
where
    H: InputHost + Send + 'static,
{
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(service, rx, cancel.clone()));
    (ScannerHandle { tx, cancel }, task)
}

async fn run<H: InputHost>(
    mut service: ScannerService<H>,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    debug!("Scanner task started");
    loop {
        let deadline = service.next_deadline();
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => apply(&mut service, cmd),
                None => break,
            },
            _ = sleep_until(deadline) => service.tick(Instant::now()),
        }
    }
    service.stop_listening();
    info!("Scanner task stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending::<()>().await,
    }
}

fn apply<H: InputHost>(service: &mut ScannerService<H>, cmd: Command) {
    match cmd {
        Command::Event(event, at) => service.handle_event(&event, at),
        Command::Start => service.start_listening(Instant::now()),
        Command::Stop => service.stop_listening(),
        Command::Inject(value, at) => service.inject(&value, at),
        Command::InjectKey(ch, at) => service.inject_key(ch, at),
        Command::ForceFinalize => service.force_finalize(Instant::now()),
        Command::Subscribe(listener, reply) => {
            let _ = reply.send(service.add_shared_listener(listener));
        }
        Command::Unsubscribe(id, reply) => {
            let _ = reply.send(service.remove_scan_listener(id));
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(service.snapshot());
        }
    }
}

impl ScannerHandle {
    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| ScanError::Closed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| ScanError::Closed)
    }

    /// Queue a raw host event, stamped now.
    pub async fn send_event(&self, event: HostEvent) -> Result<()> {
        self.send(Command::Event(event, Instant::now())).await
    }

    /// Queue a raw host event from synchronous code. Fails when the queue is
    /// full rather than blocking the caller.
    pub fn try_send_event(&self, event: HostEvent) -> Result<()> {
        self.tx
            .try_send(Command::Event(event, Instant::now()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ScanError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ScanError::Closed,
            })
    }

    /// Queue a raw host event from a blocking thread (serial reader).
    pub fn blocking_send_event(&self, event: HostEvent) -> Result<()> {
        self.tx
            .blocking_send(Command::Event(event, Instant::now()))
            .map_err(|_| ScanError::Closed)
    }

    pub async fn start_listening(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    pub async fn stop_listening(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn inject(&self, value: &str) -> Result<()> {
        self.send(Command::Inject(value.to_string(), Instant::now()))
            .await
    }

    pub async fn inject_key(&self, ch: char) -> Result<()> {
        self.send(Command::InjectKey(ch, Instant::now())).await
    }

    pub async fn force_finalize(&self) -> Result<()> {
        self.send(Command::ForceFinalize).await
    }

    pub async fn add_scan_listener<F>(&self, callback: F) -> Result<ListenerId>
    where
        F: Fn(&DetectionResult) + Send + Sync + 'static,
    {
        let listener: ScanListener = std::sync::Arc::new(callback);
        self.request(|reply| Command::Subscribe(listener, reply))
            .await
    }

    pub async fn remove_scan_listener(&self, id: ListenerId) -> Result<bool> {
        self.request(|reply| Command::Unsubscribe(id, reply)).await
    }

    pub async fn snapshot(&self) -> Result<ScannerSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Stop the task. Capture is torn down before it exits.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Token cancelled when this scanner shuts down, for helper tasks.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FocusTarget, KeyEvent, NullHost};
    use crate::config::ScannerConfig;
    use std::time::Duration;

    async fn spawn_default() -> (
        ScannerHandle,
        JoinHandle<()>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (handle, task) = spawn(ScannerService::new(ScannerConfig::default(), NullHost));
        let (tx, rx) = mpsc::unbounded_channel();
        handle
            .add_scan_listener(move |r| {
                let _ = tx.send(r.value.clone());
            })
            .await
            .unwrap();
        (handle, task, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_inject_reaches_listener() {
        let (handle, _task, mut rx) = spawn_default().await;
        handle.inject("4006381333931").await.unwrap();
        assert_eq!(next(&mut rx).await.as_deref(), Some("4006381333931"));

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.last_scan.as_deref(), Some("4006381333931"));
        assert!(!snap.is_active);
    }

    #[tokio::test]
    async fn test_key_events_through_queue() {
        let (handle, _task, mut rx) = spawn_default().await;
        handle.start_listening().await.unwrap();
        for ch in "4006381333931".chars() {
            handle
                .send_event(HostEvent::KeyDown(KeyEvent::char(ch, FocusTarget::None)))
                .await
                .unwrap();
        }
        assert_eq!(next(&mut rx).await.as_deref(), Some("4006381333931"));
        assert!(handle.snapshot().await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_idle_timer_fires_inside_task() {
        let (handle, _task, mut rx) = spawn_default().await;
        for ch in "96385074".chars() {
            handle.inject_key(ch).await.unwrap();
        }
        // Finalized only once the 500ms idle deadline passes.
        assert_eq!(next(&mut rx).await.as_deref(), Some("96385074"));
    }

    #[tokio::test]
    async fn test_remove_listener_over_handle() {
        let (handle, _task, mut rx) = spawn_default().await;
        let id = handle.add_scan_listener(|_| {}).await.unwrap();
        assert!(handle.remove_scan_listener(id).await.unwrap());
        assert!(!handle.remove_scan_listener(id).await.unwrap());
        handle.inject("96385074").await.unwrap();
        assert_eq!(next(&mut rx).await.as_deref(), Some("96385074"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (handle, task, _rx) = spawn_default().await;
        handle.shutdown();
        task.await.unwrap();
        assert!(matches!(
            handle.inject("4006381333931").await,
            Err(ScanError::Closed)
        ));
        assert!(handle.is_closed());
    }
}
