//! Player notifications delivered to the embedding layer.

use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{trace, warn};
use serde::Serialize;

/// Status code carried by every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Ok,
    Fail,
    OutOfMemory,
    NoAudioDevice,
    IoError,
    ConnectionNotFound,
    InvalidArgument,
    Unsupported,
}

/// Event kinds raised by players and mixer sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaEvent {
    /// Playback reached the end of the content. Payload: media time in ms.
    EndOfMedia,
    /// A duration became known. Payload: duration in ms.
    DurationUpdated,
    /// The player wants content. Payload: declared length in bytes.
    DataRequest,
    /// All resources of a player were released.
    DestroyFinished,
    /// Payload: media time in ms at the moment of stopping.
    StopFinished,
    PauseFinished,
    /// Payload: the media time actually reached.
    SetMediaTimeFinished,
}

/// A single event addressed to one player of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub app_id: i32,
    pub player_id: i64,
    pub event: MediaEvent,
    pub status: Status,
    pub payload: i64,
}

impl Notification {
    pub fn new(app_id: i32, player_id: i64, event: MediaEvent, payload: i64) -> Self {
        Self {
            app_id,
            player_id,
            event,
            status: Status::Ok,
            payload,
        }
    }
}

/// Callback receiving notifications.
pub type EventListener = Arc<dyn Fn(Notification) + Send + Sync>;

/// Cloneable dispatcher around an optional listener.
///
/// Notifications are always dispatched with no engine lock held, so a
/// listener may call back into the manager. [`EventSink::post`] is meant for
/// the audio callback: it only queues, and a dispatcher thread shared by all
/// clones delivers the queue in order.
#[derive(Clone, Default)]
pub struct EventSink {
    listener: Option<EventListener>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl EventSink {
    pub fn new(listener: Option<EventListener>) -> Self {
        let dispatcher = listener
            .clone()
            .map(|listener| Arc::new(Dispatcher::spawn(listener)));
        Self {
            listener,
            dispatcher,
        }
    }

    /// Deliver on the calling thread.
    pub fn emit(&self, notification: Notification) {
        trace_notification("event", &notification);
        if let Some(listener) = &self.listener {
            listener(notification);
        }
    }

    pub fn emit_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.emit(notification);
        }
    }

    /// Queue for the dispatcher thread. The listener never runs on the
    /// calling thread.
    pub fn post(&self, notification: Notification) {
        trace_notification("queued event", &notification);
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.send(notification);
        }
    }
}

fn trace_notification(what: &str, notification: &Notification) {
    trace!(
        "{} {:?} app={} player={} payload={}",
        what,
        notification.event,
        notification.app_id,
        notification.player_id,
        notification.payload
    );
}

/// Thread draining queued notifications into the listener. Stopped and
/// joined when the last sink clone goes away.
struct Dispatcher {
    sender: Mutex<Option<mpsc::Sender<Notification>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    fn spawn(listener: EventListener) -> Self {
        let (sender, receiver) = mpsc::channel::<Notification>();
        let spawned = thread::Builder::new()
            .name("mmaudio-events".into())
            .spawn(move || {
                for notification in receiver {
                    listener(notification);
                }
            });
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("event dispatcher not started: {}", err);
                None
            }
        };
        Self {
            sender: Mutex::new(handle.as_ref().map(|_| sender)),
            handle: Mutex::new(handle),
        }
    }

    fn send(&self, notification: Notification) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(notification);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.sender.lock().unwrap().take();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            // The listener itself may drop the last sink.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Listener that stores every notification it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener feeding this recorder.
    pub fn listener(&self) -> EventListener {
        let received = self.received.clone();
        Arc::new(move |notification| received.lock().unwrap().push(notification))
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    /// Number of recorded events of the given kind for one player.
    pub fn count(&self, player_id: i64, event: MediaEvent) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.player_id == player_id && n.event == event)
            .count()
    }

    /// Wait until at least `expected` events of the kind were recorded for
    /// the player. Returns the last count seen.
    pub fn wait_for(
        &self,
        player_id: i64,
        event: MediaEvent,
        expected: usize,
        timeout: Duration,
    ) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.count(player_id, event);
            if seen >= expected || Instant::now() >= deadline {
                return seen;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_counts_per_player() {
        let recorder = Recorder::new();
        let sink = EventSink::new(Some(recorder.listener()));
        sink.emit(Notification::new(1, 7, MediaEvent::EndOfMedia, 100));
        sink.emit(Notification::new(1, 8, MediaEvent::EndOfMedia, 100));
        sink.emit(Notification::new(1, 7, MediaEvent::DestroyFinished, 0));

        assert_eq!(recorder.count(7, MediaEvent::EndOfMedia), 1);
        assert_eq!(recorder.count(7, MediaEvent::DestroyFinished), 1);
        assert_eq!(recorder.snapshot().len(), 3);
    }

    #[test]
    fn sink_without_listener_is_silent() {
        EventSink::default().emit(Notification::new(1, 1, MediaEvent::DataRequest, 0));
        EventSink::default().post(Notification::new(1, 1, MediaEvent::EndOfMedia, 0));
    }

    #[test]
    fn posted_events_arrive_in_order_off_the_caller_thread() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener: EventListener = {
            let seen = seen.clone();
            Arc::new(move |n: Notification| {
                seen.lock().unwrap().push((n.payload, thread::current().id()))
            })
        };
        let sink = EventSink::new(Some(listener));
        for payload in 0..5 {
            sink.post(Notification::new(1, 3, MediaEvent::EndOfMedia, payload));
        }
        // Dropping the last clone drains the queue and joins the thread.
        drop(sink);

        let seen = seen.lock().unwrap();
        let payloads: Vec<i64> = seen.iter().map(|(payload, _)| *payload).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, id)| *id != thread::current().id()));
    }

    #[test]
    fn listener_may_drop_the_last_sink() {
        let slot: Arc<Mutex<Option<EventSink>>> = Arc::new(Mutex::new(None));
        let recorder = Recorder::new();
        let listener: EventListener = {
            let slot = slot.clone();
            let record = recorder.listener();
            Arc::new(move |n: Notification| {
                let last = slot.lock().unwrap().take();
                drop(last);
                record(n);
            })
        };
        let sink = EventSink::new(Some(listener));
        let poster = sink.clone();
        *slot.lock().unwrap() = Some(sink);
        poster.post(Notification::new(1, 4, MediaEvent::EndOfMedia, 0));
        drop(poster);

        assert_eq!(
            recorder.wait_for(4, MediaEvent::EndOfMedia, 1, Duration::from_secs(2)),
            1
        );
        assert!(slot.lock().unwrap().is_none());
    }
}
