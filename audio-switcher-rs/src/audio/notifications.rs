//! Hardware change listener subscription.
//!
//! Registers one callback per [`PropertyTopic`]. The callbacks only post a
//! [`DeviceEvent`]; all real work happens wherever the posted events are
//! drained.

use super::device::{AudioError, DeviceEvent};
use super::system::{AudioSystem, ListenerCallback, PropertyTopic};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Sink the listener callbacks post into. Must not block.
pub type EventPoster = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

fn topic_event(topic: PropertyTopic) -> DeviceEvent {
    match topic {
        PropertyTopic::Devices => DeviceEvent::DevicesChanged,
        PropertyTopic::DefaultInput => DeviceEvent::InputDefaultChanged,
        PropertyTopic::DefaultOutput => DeviceEvent::OutputDefaultChanged,
    }
}

/// All three listeners, registered together and removed together.
///
/// Dropping the subscription unregisters anything still registered.
pub struct ListenerSubscription {
    system: Arc<dyn AudioSystem>,
    active: bool,
}

impl ListenerSubscription {
    /// Register listeners for all three topics.
    ///
    /// If any registration fails, the ones already made are removed again
    /// before the error is returned, so either all three are active or none.
    pub fn subscribe(system: Arc<dyn AudioSystem>, post: EventPoster) -> Result<Self, AudioError> {
        let mut registered = Vec::with_capacity(PropertyTopic::ALL.len());

        for topic in PropertyTopic::ALL {
            let event = topic_event(topic);
            let post = post.clone();
            let callback: ListenerCallback = Arc::new(move || post(event));

            if let Err(e) = system.add_listener(topic, callback) {
                error!(topic = topic.name(), error = %e, "Listener registration failed");
                for done in registered {
                    if let Err(e) = system.remove_listener(done) {
                        warn!(topic = done.name(), error = %e, "Rollback of listener failed");
                    }
                }
                return Err(match e {
                    AudioError::AlreadySubscribed(_) | AudioError::SubscriptionFailed(_) => e,
                    other => AudioError::SubscriptionFailed(other.to_string()),
                });
            }
            registered.push(topic);
        }

        debug!("Change listeners registered");
        Ok(Self {
            system,
            active: true,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remove all three listeners. Every topic is attempted even if one
    /// removal fails; the first failure is returned.
    pub fn unsubscribe(&mut self) -> Result<(), AudioError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let mut first_error = None;
        for topic in PropertyTopic::ALL {
            if let Err(e) = self.system.remove_listener(topic) {
                warn!(topic = topic.name(), error = %e, "Listener removal failed");
                first_error.get_or_insert(e);
            }
        }

        debug!("Change listeners removed");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ListenerSubscription {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioSystem;
    use parking_lot::Mutex;

    fn recorder() -> (EventPoster, Arc<Mutex<Vec<DeviceEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |event| sink.lock().push(event)), seen)
    }

    #[test]
    fn test_subscribe_registers_all_three() {
        let system = Arc::new(MockAudioSystem::new());
        let (post, seen) = recorder();

        let _subscription = ListenerSubscription::subscribe(system.clone(), post).unwrap();
        assert_eq!(system.active_listeners(), 3);

        system.fire(PropertyTopic::Devices);
        system.fire(PropertyTopic::DefaultOutput);
        system.fire(PropertyTopic::DefaultInput);
        assert_eq!(
            *seen.lock(),
            vec![
                DeviceEvent::DevicesChanged,
                DeviceEvent::OutputDefaultChanged,
                DeviceEvent::InputDefaultChanged,
            ]
        );
    }

    #[test]
    fn test_unsubscribe_removes_all_three() {
        let system = Arc::new(MockAudioSystem::new());
        let (post, seen) = recorder();

        let mut subscription = ListenerSubscription::subscribe(system.clone(), post).unwrap();
        subscription.unsubscribe().unwrap();

        assert!(!subscription.is_active());
        assert_eq!(system.active_listeners(), 0);
        assert!(!system.fire(PropertyTopic::Devices));
        assert!(seen.lock().is_empty());

        // A second call is a no-op.
        subscription.unsubscribe().unwrap();
    }

    #[test]
    fn test_unsubscribe_continues_past_a_failed_removal() {
        let system = Arc::new(MockAudioSystem::new());
        let (post, _) = recorder();
        let mut subscription = ListenerSubscription::subscribe(system.clone(), post).unwrap();
        system.fail_remove_listener(PropertyTopic::DefaultInput);

        let err = subscription.unsubscribe().unwrap_err();
        assert!(matches!(err, AudioError::SubscriptionFailed(_)));

        // Only the failing topic is left behind.
        assert_eq!(system.active_listeners(), 1);
        assert!(!system.fire(PropertyTopic::Devices));
        assert!(!system.fire(PropertyTopic::DefaultOutput));
        assert!(!subscription.is_active());
    }

    #[test]
    fn test_drop_unregisters() {
        let system = Arc::new(MockAudioSystem::new());
        let (post, _) = recorder();

        {
            let _subscription = ListenerSubscription::subscribe(system.clone(), post).unwrap();
            assert_eq!(system.active_listeners(), 3);
        }
        assert_eq!(system.active_listeners(), 0);
    }

    #[test]
    fn test_partial_failure_rolls_back() {
        let system = Arc::new(MockAudioSystem::new());
        system.fail_listener(PropertyTopic::DefaultOutput);
        let (post, _) = recorder();

        let err = ListenerSubscription::subscribe(system.clone(), post).err().unwrap();
        assert!(matches!(err, AudioError::SubscriptionFailed(_)));
        assert_eq!(system.active_listeners(), 0);
    }

    #[test]
    fn test_second_subscription_does_not_double_register() {
        let system = Arc::new(MockAudioSystem::new());
        let (post, seen) = recorder();

        let _first = ListenerSubscription::subscribe(system.clone(), post.clone()).unwrap();
        let err = ListenerSubscription::subscribe(system.clone(), post).err().unwrap();
        assert!(matches!(err, AudioError::AlreadySubscribed(_)));

        // The first subscription is still fully in place.
        assert_eq!(system.active_listeners(), 3);
        assert_eq!(system.total_registrations(), 3);
        system.fire(PropertyTopic::Devices);
        assert_eq!(seen.lock().len(), 1);
    }
}
