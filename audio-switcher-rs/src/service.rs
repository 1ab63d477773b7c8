//! The audio service context object.
//!
//! Owns the listener subscription and a single dispatcher thread. OS
//! callbacks post signals onto the dispatcher's channel; the dispatcher
//! runs the reconciler, applies user selections and fans signals out to
//! watchers one message at a time, so nothing touching the persisted store
//! ever interleaves.

use crate::audio::{
    AudioDevice, AudioError, AudioSystem, DefaultDeviceAccessor, DeviceEnumerator, DeviceEvent,
    DeviceId, Direction, EventPoster, ListenerSubscription, ReconcileOutcome, Reconciler,
};
use crate::store::{PersistedSelection, SelectionStore};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Service options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Reconcile both directions once as soon as the dispatcher starts,
    /// instead of waiting for the first change signal.
    #[serde(default)]
    pub reconcile_on_start: bool,
}

type Reply<T> = SyncSender<Result<T, AudioError>>;

enum Command {
    Signal(DeviceEvent),
    Select {
        direction: Direction,
        id: DeviceId,
        reply: Reply<()>,
    },
    Reconcile {
        direction: Direction,
        reply: Reply<ReconcileOutcome>,
    },
    Selection {
        direction: Direction,
        reply: Reply<PersistedSelection>,
    },
    Watch(Sender<DeviceEvent>),
    Shutdown,
}

/// Running audio service. Construct once at startup and share by reference.
///
/// Stopping (explicitly or by drop) unregisters all listeners before the
/// dispatcher is shut down and joined.
pub struct AudioService {
    system: Arc<dyn AudioSystem>,
    commands: Sender<Command>,
    subscription: Option<ListenerSubscription>,
    dispatcher: Option<JoinHandle<()>>,
}

impl AudioService {
    /// Spawn the dispatcher and subscribe to all three change topics.
    ///
    /// A subscription failure is fatal: the dispatcher is stopped again and
    /// the error returned.
    pub fn start(
        system: Arc<dyn AudioSystem>,
        store: Box<dyn SelectionStore>,
        config: ServiceConfig,
    ) -> Result<Self, AudioError> {
        let (commands, inbox) = mpsc::channel();

        let dispatcher = Dispatcher {
            system: system.clone(),
            store,
            reconciler: Reconciler::new(),
            watchers: Vec::new(),
        };
        let handle = thread::Builder::new()
            .name("audio-switcher-dispatch".to_string())
            .spawn(move || dispatcher.run(inbox, config))
            .map_err(AudioError::DispatcherFailed)?;

        let poster = commands.clone();
        let post: EventPoster = Arc::new(move |event| {
            let _ = poster.send(Command::Signal(event));
        });

        let subscription = match ListenerSubscription::subscribe(system.clone(), post) {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "Audio service cannot start without change listeners");
                let _ = commands.send(Command::Shutdown);
                let _ = handle.join();
                return Err(e);
            }
        };

        info!("Audio service started");
        Ok(Self {
            system,
            commands,
            subscription: Some(subscription),
            dispatcher: Some(handle),
        })
    }

    /// Fresh device snapshot for the presentation layer.
    pub fn list_devices(&self) -> Vec<AudioDevice> {
        DeviceEnumerator::new(self.system.as_ref()).list_devices()
    }

    /// Live system default for a direction.
    pub fn current_default(&self, direction: Direction) -> Result<Option<DeviceId>, AudioError> {
        DefaultDeviceAccessor::new(self.system.as_ref()).get_default(direction)
    }

    /// User selection: set the default and persist it as the new target.
    /// On failure nothing is persisted.
    pub fn select_device(&self, id: DeviceId, direction: Direction) -> Result<(), AudioError> {
        self.request(|reply| Command::Select {
            direction,
            id,
            reply,
        })
    }

    /// Persisted target and correction count for a direction.
    pub fn selection(&self, direction: Direction) -> Result<PersistedSelection, AudioError> {
        self.request(|reply| Command::Selection { direction, reply })
    }

    /// Run one reconciliation pass now, outside any change signal.
    pub fn reconcile(&self, direction: Direction) -> Result<ReconcileOutcome, AudioError> {
        self.request(|reply| Command::Reconcile { direction, reply })
    }

    /// Subscribe to the signal fan-out. Each signal arrives after the
    /// reconciler has handled it.
    pub fn events(&self) -> Result<Receiver<DeviceEvent>, AudioError> {
        let (tx, rx) = mpsc::channel();
        self.commands
            .send(Command::Watch(tx))
            .map_err(|_| AudioError::ServiceStopped)?;
        Ok(rx)
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Unregister listeners, then stop and join the dispatcher.
    pub fn stop(mut self) -> Result<(), AudioError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), AudioError> {
        let mut result = Ok(());

        // Listeners go first so no callback can post into a dead channel.
        if let Some(mut subscription) = self.subscription.take() {
            result = subscription.unsubscribe();
        }

        if let Some(handle) = self.dispatcher.take() {
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                error!("Dispatcher thread panicked");
            }
            info!("Audio service stopped");
        }

        result
    }

    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, AudioError> {
        let (reply, response) = mpsc::sync_channel(1);
        self.commands
            .send(command(reply))
            .map_err(|_| AudioError::ServiceStopped)?;
        response.recv().map_err(|_| AudioError::ServiceStopped)?
    }
}

impl Drop for AudioService {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Audio service teardown incomplete");
        }
    }
}

/// State owned by the dispatcher thread.
struct Dispatcher {
    system: Arc<dyn AudioSystem>,
    store: Box<dyn SelectionStore>,
    reconciler: Reconciler,
    watchers: Vec<Sender<DeviceEvent>>,
}

impl Dispatcher {
    fn run(mut self, inbox: Receiver<Command>, config: ServiceConfig) {
        if config.reconcile_on_start {
            for direction in Direction::ALL {
                self.log_reconcile(direction);
            }
        }

        while let Ok(command) = inbox.recv() {
            match command {
                Command::Signal(event) => self.handle_signal(event),
                Command::Select {
                    direction,
                    id,
                    reply,
                } => {
                    let result = self.reconciler.select_device(
                        direction,
                        id,
                        self.system.as_ref(),
                        self.store.as_mut(),
                    );
                    let _ = reply.send(result);
                }
                Command::Reconcile { direction, reply } => {
                    let _ = reply.send(self.reconcile(direction));
                }
                Command::Selection { direction, reply } => {
                    let _ = reply.send(self.store.load(direction).map_err(AudioError::from));
                }
                Command::Watch(watcher) => self.watchers.push(watcher),
                Command::Shutdown => break,
            }
        }

        debug!("Dispatcher exiting");
    }

    fn handle_signal(&mut self, event: DeviceEvent) {
        debug!(event = event.name(), "Change signal");

        for &direction in event.affected_directions() {
            self.log_reconcile(direction);
        }

        self.watchers.retain(|watcher| watcher.send(event).is_ok());
    }

    fn reconcile(&mut self, direction: Direction) -> Result<ReconcileOutcome, AudioError> {
        self.reconciler
            .on_signal(direction, self.system.as_ref(), self.store.as_mut())
    }

    fn log_reconcile(&mut self, direction: Direction) {
        if let Err(e) = self.reconcile(direction) {
            warn!(%direction, error = %e, "Reconciliation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MockAudioSystem, PropertyTopic};
    use crate::store::MemoryStore;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn system() -> Arc<MockAudioSystem> {
        let system = MockAudioSystem::new()
            .with_device(1, "Built-in Microphone", 2, 0)
            .with_device(7, "Studio Monitors", 0, 2)
            .with_device(42, "Bluetooth Headphones", 0, 2);
        system.set_system_default(Direction::Input, Some(1));
        system.set_system_default(Direction::Output, Some(7));
        Arc::new(system)
    }

    #[test]
    fn test_start_and_stop_manage_listeners() {
        let system = system();
        let service =
            AudioService::start(system.clone(), Box::new(MemoryStore::new()), ServiceConfig::default())
                .unwrap();
        assert_eq!(system.active_listeners(), 3);
        assert!(service.is_running());

        service.stop().unwrap();
        assert_eq!(system.active_listeners(), 0);
    }

    #[test]
    fn test_drop_unregisters_listeners() {
        let system = system();
        {
            let _service = AudioService::start(
                system.clone(),
                Box::new(MemoryStore::new()),
                ServiceConfig::default(),
            )
            .unwrap();
        }
        assert_eq!(system.active_listeners(), 0);
    }

    #[test]
    fn test_subscription_failure_is_fatal() {
        let system = system();
        system.fail_listener(PropertyTopic::DefaultInput);

        let result = AudioService::start(
            system.clone(),
            Box::new(MemoryStore::new()),
            ServiceConfig::default(),
        );
        assert!(matches!(result, Err(AudioError::SubscriptionFailed(_))));
        assert_eq!(system.active_listeners(), 0);
    }

    #[test]
    fn test_signal_is_reconciled_before_fan_out() {
        let system = system();
        let store = MemoryStore::with_selections(
            PersistedSelection::default(),
            PersistedSelection::from_slots(7, 0),
        );
        let service =
            AudioService::start(system.clone(), Box::new(store.clone()), ServiceConfig::default())
                .unwrap();
        let events = service.events().unwrap();

        system.override_default(Direction::Output, 42);

        let event = events.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(event, DeviceEvent::OutputDefaultChanged);
        assert_eq!(system.system_default(Direction::Output), Some(DeviceId(7)));
        assert_eq!(store.get(Direction::Output).correction_count, 1);
    }

    #[test]
    fn test_closed_watchers_are_pruned() {
        let mut dispatcher = Dispatcher {
            system: system(),
            store: Box::new(MemoryStore::new()),
            reconciler: Reconciler::new(),
            watchers: Vec::new(),
        };
        let (kept_tx, kept) = mpsc::channel();
        let (dropped_tx, dropped) = mpsc::channel();
        dispatcher.watchers.push(kept_tx);
        dispatcher.watchers.push(dropped_tx);
        drop(dropped);

        dispatcher.handle_signal(DeviceEvent::DevicesChanged);
        assert_eq!(dispatcher.watchers.len(), 1);

        dispatcher.handle_signal(DeviceEvent::InputDefaultChanged);
        assert_eq!(kept.try_recv().unwrap(), DeviceEvent::DevicesChanged);
        assert_eq!(kept.try_recv().unwrap(), DeviceEvent::InputDefaultChanged);
    }

    #[test]
    fn test_remaining_watchers_keep_receiving() {
        let system = system();
        let service =
            AudioService::start(system.clone(), Box::new(MemoryStore::new()), ServiceConfig::default())
                .unwrap();
        let kept = service.events().unwrap();
        drop(service.events().unwrap());

        system.fire(PropertyTopic::Devices);
        system.fire(PropertyTopic::DefaultOutput);

        assert_eq!(kept.recv_timeout(TIMEOUT).unwrap(), DeviceEvent::DevicesChanged);
        assert_eq!(
            kept.recv_timeout(TIMEOUT).unwrap(),
            DeviceEvent::OutputDefaultChanged
        );
    }

    #[test]
    fn test_reconcile_on_start() {
        let system = system();
        system.set_system_default(Direction::Output, Some(42));
        let store = MemoryStore::with_selections(
            PersistedSelection::default(),
            PersistedSelection::from_slots(7, 0),
        );

        let service = AudioService::start(
            system.clone(),
            Box::new(store.clone()),
            ServiceConfig {
                reconcile_on_start: true,
            },
        )
        .unwrap();

        // Requests queue behind the startup pass.
        let selection = service.selection(Direction::Output).unwrap();
        assert_eq!(selection.correction_count, 1);
        assert_eq!(system.system_default(Direction::Output), Some(DeviceId(7)));
    }

    #[test]
    fn test_requests_fail_after_dispatcher_is_gone() {
        let system = system();
        let mut service =
            AudioService::start(system, Box::new(MemoryStore::new()), ServiceConfig::default())
                .unwrap();
        service.shutdown().unwrap();

        assert!(!service.is_running());
        assert!(matches!(
            service.selection(Direction::Input),
            Err(AudioError::ServiceStopped)
        ));
    }
}
