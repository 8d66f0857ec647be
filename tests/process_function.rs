use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use runloop::{Dispatcher, WaitTimeout};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_spinning_function_forces_zero_wait() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();

    let timer = dispatcher.create_timer_after(Duration::from_secs(1), Duration::ZERO, |_| {});
    timer.enable().unwrap();

    let function = dispatcher.create_process_function(|_| {});
    function.set_spinning(true).unwrap();
    function.enable().unwrap();

    dispatcher.dispatch_next_event().unwrap();
    assert_eq!(
        dispatcher.last_wait_timeout().unwrap(),
        Some(WaitTimeout::Bounded(Duration::ZERO))
    );

    function.set_spinning(false).unwrap();
    assert!(matches!(
        dispatcher.next_wait_timeout().unwrap(),
        WaitTimeout::Bounded(wait) if wait > Duration::from_millis(500)
    ));
}

#[test]
fn test_spinning_counts_only_while_enabled() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();

    let function = dispatcher.create_process_function(|_| {});
    function.set_spinning(true).unwrap();
    assert_eq!(dispatcher.next_wait_timeout().unwrap(), WaitTimeout::Indefinite);

    function.enable().unwrap();
    function.set_spinning(true).unwrap();
    assert_eq!(
        dispatcher.next_wait_timeout().unwrap(),
        WaitTimeout::Bounded(Duration::ZERO)
    );

    function.disable().unwrap();
    assert_eq!(dispatcher.next_wait_timeout().unwrap(), WaitTimeout::Indefinite);
}

#[test]
fn test_functions_run_after_timers_once_per_iteration() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let sink = log.clone();
    let timer = dispatcher.create_timer_after(Duration::from_millis(1), Duration::ZERO, move |_| {
        sink.lock().unwrap().push("timer".to_owned())
    });
    timer.enable().unwrap();

    let functions: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|name| {
            let sink = log.clone();
            let function = dispatcher.create_process_function(move |event| {
                sink.lock().unwrap().push(format!("{name}@{}", event.iteration))
            });
            function.enable().unwrap();
            function
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    dispatcher.wake().unwrap();
    dispatcher.dispatch_next_event().unwrap();

    assert_eq!(dispatcher.iteration().unwrap(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["timer", "first@1", "second@1"]);
    assert_eq!(dispatcher.active_process_functions().unwrap(), functions.len());
}

#[test]
fn test_function_disabling_itself_and_an_earlier_one() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let record = |name: &'static str| {
        let sink = calls.clone();
        move |_: &runloop::ProcessEvent| sink.lock().unwrap().push(name)
    };

    let first = dispatcher.create_process_function(record("first"));
    let third = dispatcher.create_process_function(record("third"));
    let fourth = dispatcher.create_process_function(record("fourth"));

    let earlier = first.clone();
    let itself = Arc::new(Mutex::new(None::<runloop::ProcessFunction>));
    let slot = itself.clone();
    let sink = calls.clone();
    let second = dispatcher.create_process_function(move |_| {
        sink.lock().unwrap().push("second");
        earlier.disable().unwrap();
        let last_handle = slot.lock().unwrap().take();
        drop(last_handle);
    });
    *itself.lock().unwrap() = Some(second.clone());

    for function in [&first, &second, &third, &fourth] {
        function.enable().unwrap();
    }
    drop(second);

    dispatcher.wake().unwrap();
    dispatcher.dispatch_next_event().unwrap();

    let mut seen = calls.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["first", "fourth", "second", "third"]);
    assert_eq!(dispatcher.active_process_functions().unwrap(), 2);
    assert!(!first.is_enabled());
}
