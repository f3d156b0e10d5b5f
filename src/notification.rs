use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use serde::Serialize;

use crate::{decision::DecisionSource, Attributes};

/// Event sent to decision listeners after every flag decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNotification {
    pub flag_key: String,
    pub user_id: String,
    pub attributes: Attributes,
    pub rule_key: Option<String>,
    pub variation_key: Option<String>,
    pub enabled: bool,
    pub decision_source: Option<DecisionSource>,
    pub reasons: Vec<String>,
}

/// Receives [`DecisionNotification`]s.
///
/// Implemented for any `Fn(&DecisionNotification)` closure.
///
/// # Examples
/// ```
/// # use optimizely::NotificationCenter;
/// let center = NotificationCenter::new();
/// center.add_decision_listener(|notification: &optimizely::DecisionNotification| {
///     println!("{} -> {:?}", notification.flag_key, notification.variation_key);
/// });
/// ```
pub trait DecisionListener: Send + Sync {
    fn on_decision(&self, notification: &DecisionNotification);
}

impl<T: Fn(&DecisionNotification) + Send + Sync> DecisionListener for T {
    fn on_decision(&self, notification: &DecisionNotification) {
        self(notification);
    }
}

/// Handle returned by [`NotificationCenter::add_decision_listener`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// List of decision listeners owned by a [`Client`](crate::Client).
#[derive(Default)]
pub struct NotificationCenter {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn DecisionListener>)>>,
    next_id: AtomicU64,
}

impl NotificationCenter {
    pub fn new() -> NotificationCenter {
        NotificationCenter::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<dyn DecisionListener>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_decision_listener(&self, listener: impl DecisionListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, Arc::new(listener)));
        id
    }

    /// Return `false` if the listener was already removed.
    pub fn remove_decision_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn clear_decision_listeners(&self) {
        self.listeners().clear();
    }

    /// Call every listener in registration order.
    pub fn send_decision(&self, notification: &DecisionNotification) {
        // Listeners may add or remove listeners, so they are called without holding the lock.
        let listeners: Vec<Arc<dyn DecisionListener>> = self
            .listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        log::trace!(target: "optimizely",
                    flag_key = notification.flag_key.as_str(),
                    listeners = listeners.len();
                    "sending decision notification");
        for listener in listeners {
            listener.on_decision(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{DecisionNotification, NotificationCenter};

    fn notification(flag_key: &str) -> DecisionNotification {
        DecisionNotification {
            flag_key: flag_key.to_owned(),
            user_id: "user".to_owned(),
            attributes: Default::default(),
            rule_key: None,
            variation_key: None,
            enabled: false,
            decision_source: None,
            reasons: Vec::new(),
        }
    }

    #[test]
    fn listeners_are_called_in_order() {
        let center = NotificationCenter::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let calls = calls.clone();
            center.add_decision_listener(move |notification: &DecisionNotification| {
                calls
                    .lock()
                    .unwrap()
                    .push(format!("{name}:{}", notification.flag_key));
            });
        }

        center.send_decision(&notification("flag"));
        assert_eq!(*calls.lock().unwrap(), vec!["first:flag", "second:flag"]);
    }

    #[test]
    fn removed_listeners_are_not_called() {
        let center = NotificationCenter::new();
        let calls = Arc::new(Mutex::new(0));

        let id = {
            let calls = calls.clone();
            center.add_decision_listener(move |_: &DecisionNotification| {
                *calls.lock().unwrap() += 1;
            })
        };
        center.send_decision(&notification("flag"));
        assert!(center.remove_decision_listener(id));
        assert!(!center.remove_decision_listener(id));
        center.send_decision(&notification("flag"));

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn listener_may_register_listeners() {
        let center = Arc::new(NotificationCenter::new());
        {
            let inner = Arc::downgrade(&center);
            center.add_decision_listener(move |_: &DecisionNotification| {
                if let Some(center) = inner.upgrade() {
                    center.add_decision_listener(|_: &DecisionNotification| {});
                }
            });
        }

        center.send_decision(&notification("flag"));
        center.clear_decision_listeners();
        center.send_decision(&notification("flag"));
    }
}
