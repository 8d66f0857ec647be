use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use runloop::Dispatcher;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_fire_on_dispatch_thread_is_synchronous() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    let signal = dispatcher.create_user_signal(move |event| {
        assert!(event.payload.is_none());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    signal.fire().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0, "disabled signals do not fire");

    signal.enable().unwrap();
    signal.fire().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    signal.disable().unwrap();
    signal.fire().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_payload_crosses_threads_and_is_released() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let tracker = Arc::new(());

    let sink = received.clone();
    let signal = dispatcher.create_user_signal(move |event| {
        let (text, _) = event.payload::<(String, Arc<()>)>().unwrap();
        sink.lock().unwrap().push(text.clone());
    });
    signal.enable().unwrap();

    let remote = signal.clone();
    let payload_tracker = tracker.clone();
    thread::spawn(move || {
        remote
            .fire_with(("hello".to_owned(), payload_tracker))
            .unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(Arc::strong_count(&tracker), 2, "payload waits in the queue");
    assert!(received.lock().unwrap().is_empty());

    dispatcher.dispatch_next_event().unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["hello".to_owned()]);
    assert_eq!(Arc::strong_count(&tracker), 1);
}

#[test]
fn test_wrong_payload_type_reads_as_none() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let seen = Arc::new(Mutex::new(None));

    let sink = seen.clone();
    let signal = dispatcher.create_user_signal(move |event| {
        let number = event.payload::<u32>().copied();
        let text = event.payload::<&str>().is_some();
        *sink.lock().unwrap() = Some((number, text));
    });
    signal.enable().unwrap();
    signal.fire_with(7u32).unwrap();

    assert_eq!(*seen.lock().unwrap(), Some((Some(7), false)));
}

#[test]
fn test_firing_queued_before_disable_is_dropped() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    let signal = dispatcher.create_user_signal(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    signal.enable().unwrap();

    let remote = signal.clone();
    thread::spawn(move || remote.fire().unwrap()).join().unwrap();
    signal.disable().unwrap();

    dispatcher.dispatch_next_event().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_handler_can_be_replaced() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let sink = log.clone();
    let signal = dispatcher.create_user_signal(move |_| sink.lock().unwrap().push("old"));
    signal.enable().unwrap();
    signal.fire().unwrap();

    let sink = log.clone();
    signal
        .set_handler(move |_| sink.lock().unwrap().push("new"))
        .unwrap();
    signal.fire().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["old", "new"]);
}
