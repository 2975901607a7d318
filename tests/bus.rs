//! EventBus tests: handle-based removal, snapshot-on-emit, and the
//! channel-identity cross-talk guard.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use livelist::{
    should_ignore_callback, ChannelId, EventBus, EventKind, ItemEvent,
};

use common::{task, Task};

fn event(kind: EventKind, t: Task, channel: Option<ChannelId>) -> ItemEvent<Task> {
    ItemEvent {
        kind,
        item: Arc::new(parking_lot::RwLock::new(t)),
        previous: None,
        channel,
    }
}

fn make_log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

// ============================================================================
// Registration and removal
// ============================================================================

#[test]
fn emit_reaches_only_listeners_of_the_same_kind() {
    let bus: EventBus<Task> = EventBus::new();
    let log = make_log();

    {
        let log = Arc::clone(&log);
        bus.add_channel_callback(EventKind::Create, move |ev| {
            log.lock().push(format!("create:{}", ev.item.read().id));
        });
    }
    {
        let log = Arc::clone(&log);
        bus.add_channel_callback(EventKind::Delete, move |ev| {
            log.lock().push(format!("delete:{}", ev.item.read().id));
        });
    }

    bus.emit(&event(EventKind::Create, task("1", 1, "a"), None));

    assert_eq!(*log.lock(), vec!["create:1"]);
}

#[test]
fn remove_by_handle() {
    let bus: EventBus<Task> = EventBus::new();
    let log = make_log();

    let handle = {
        let log = Arc::clone(&log);
        bus.add_channel_callback(EventKind::Create, move |_| log.lock().push("hit".into()))
    };
    assert_eq!(bus.size(EventKind::Create), 1);

    bus.remove_channel_callback(handle);
    // Repeated removal is safe.
    bus.remove_channel_callback(handle);
    bus.emit(&event(EventKind::Create, task("1", 1, "a"), None));

    assert!(log.lock().is_empty());
    assert_eq!(bus.size(EventKind::Create), 0);
}

#[test]
fn listener_added_during_emit_waits_for_the_next_round() {
    let bus: Arc<EventBus<Task>> = Arc::new(EventBus::new());
    let log = make_log();

    {
        let bus = Arc::clone(&bus);
        let log = Arc::clone(&log);
        let outer_log = Arc::clone(&log);
        bus.clone().add_channel_callback(EventKind::Create, move |_| {
            outer_log.lock().push("outer".into());
            let inner_log = Arc::clone(&log);
            bus.add_channel_callback(EventKind::Create, move |_| {
                inner_log.lock().push("inner".into());
            });
        });
    }

    bus.emit(&event(EventKind::Create, task("1", 1, "a"), None));
    assert_eq!(*log.lock(), vec!["outer"]);

    bus.emit(&event(EventKind::Create, task("2", 1, "a"), None));
    assert_eq!(log.lock().iter().filter(|s| *s == "inner").count(), 1);
}

// ============================================================================
// Cross-talk guard
// ============================================================================

#[test]
fn should_ignore_callback_truth_table() {
    let a = ChannelId(1);
    let b = ChannelId(2);

    // Event names a different channel: ignore.
    assert!(should_ignore_callback(Some(a), Some(b)));
    // Event names our own channel: handle.
    assert!(!should_ignore_callback(Some(a), Some(a)));
    // Event names no channel: handle (broadcast).
    assert!(!should_ignore_callback(Some(a), None));
    assert!(!should_ignore_callback(None, None));
    // We have no channel but the event is channel-scoped: ignore.
    assert!(should_ignore_callback(None, Some(b)));
}
