use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use runloop::{Dispatcher, EventMask, IoEvent};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(res, 0, "pipe() failed");
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    let buf = [1u8; 1];
    let wrote = unsafe { libc::write(fd, buf.as_ptr() as *const _, 1) };
    assert_eq!(wrote, 1);
}

fn close(fds: &[RawFd]) {
    for &fd in fds {
        unsafe {
            libc::close(fd);
        }
    }
}

fn recorder() -> (Arc<Mutex<Vec<IoEvent>>>, impl Fn(&IoEvent) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (events, move |event: &IoEvent| sink.lock().unwrap().push(*event))
}

#[test]
fn test_only_the_ready_watcher_fires() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let (first_read, first_write) = pipe();
    let (second_read, second_write) = pipe();

    let (first_events, first_handler) = recorder();
    let (second_events, second_handler) = recorder();
    let first = dispatcher.create_io_watcher(first_read, EventMask::READ, first_handler);
    let second = dispatcher.create_io_watcher(second_read, EventMask::READ, second_handler);
    first.enable().unwrap();
    second.enable().unwrap();

    write_byte(first_write);
    dispatcher.dispatch_next_event().unwrap();

    let fired = first_events.lock().unwrap().clone();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].fd, first_read);
    assert!(fired[0].events.contains(EventMask::READ));
    assert!(!fired[0].events.contains(EventMask::ERROR));
    assert!(!fired[0].events.contains(EventMask::HANG_UP));
    assert!(second_events.lock().unwrap().is_empty());

    drop(first);
    drop(second);
    close(&[first_read, first_write, second_read, second_write]);
}

#[test]
fn test_active_set_tracks_enabled_watchers() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let (read, write) = pipe();

    let watchers: Vec<_> = (0..6)
        .map(|_| dispatcher.create_io_watcher(read, EventMask::READ, |_| {}))
        .collect();
    assert_eq!(dispatcher.active_io_watchers().unwrap(), 0);

    for watcher in &watchers {
        watcher.enable().unwrap();
        watcher.enable().unwrap();
    }
    assert_eq!(dispatcher.active_io_watchers().unwrap(), 6);

    watchers[1].disable().unwrap();
    watchers[4].disable().unwrap();
    watchers[4].disable().unwrap();
    assert_eq!(dispatcher.active_io_watchers().unwrap(), 4);

    dispatcher.wake().unwrap();
    dispatcher.dispatch_next_event().unwrap();

    watchers[1].enable().unwrap();
    drop(watchers);
    assert_eq!(dispatcher.active_io_watchers().unwrap(), 0);

    close(&[read, write]);
}

#[test]
fn test_disabling_a_later_watcher_mid_dispatch_suppresses_it() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let (first_read, first_write) = pipe();
    let (second_read, second_write) = pipe();

    let (second_events, second_handler) = recorder();
    let second = dispatcher.create_io_watcher(second_read, EventMask::READ, second_handler);

    let victim = second.clone();
    let first = dispatcher.create_io_watcher(first_read, EventMask::READ, move |_| {
        victim.disable().unwrap();
    });

    first.enable().unwrap();
    second.enable().unwrap();
    write_byte(first_write);
    write_byte(second_write);

    dispatcher.dispatch_next_event().unwrap();

    assert!(second_events.lock().unwrap().is_empty());
    assert!(!second.is_enabled());
    assert_eq!(dispatcher.active_io_watchers().unwrap(), 1);

    first.disable().unwrap();
    close(&[first_read, first_write, second_read, second_write]);
}

#[test]
fn test_disabling_an_earlier_watcher_mid_dispatch_skips_nobody() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let pipes: Vec<(RawFd, RawFd)> = (0..4).map(|_| pipe()).collect();

    let (events, handler) = recorder();
    let handler = Arc::new(handler);
    let watchers: Vec<_> = pipes
        .iter()
        .map(|&(read, _)| {
            let handler = handler.clone();
            dispatcher.create_io_watcher(read, EventMask::READ, move |event| handler(event))
        })
        .collect();

    let earlier = watchers[0].clone();
    let (_, trigger_handler) = recorder();
    let trigger_read = pipes[2].0;
    watchers[2]
        .set_handler(move |event| {
            trigger_handler(event);
            earlier.disable().unwrap();
        })
        .unwrap();

    for watcher in &watchers {
        watcher.enable().unwrap();
    }
    for &(_, write) in &pipes {
        write_byte(write);
    }

    dispatcher.dispatch_next_event().unwrap();

    let mut fired: Vec<RawFd> = events.lock().unwrap().iter().map(|event| event.fd).collect();
    fired.sort();
    let mut expected: Vec<RawFd> = pipes
        .iter()
        .map(|&(read, _)| read)
        .filter(|&read| read != trigger_read)
        .collect();
    expected.sort();
    assert_eq!(fired, expected, "each ready watcher fires exactly once");
    assert_eq!(dispatcher.active_io_watchers().unwrap(), 3);

    for watcher in &watchers {
        watcher.disable().unwrap();
    }
    for &(read, write) in &pipes {
        close(&[read, write]);
    }
}

#[test]
fn test_hang_up_is_reported_without_being_requested() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let (read, write) = pipe();

    let (events, handler) = recorder();
    let watcher = dispatcher.create_io_watcher(read, EventMask::READ, handler);
    watcher.enable().unwrap();

    close(&[write]);
    dispatcher.dispatch_next_event().unwrap();

    let fired = events.lock().unwrap().clone();
    assert_eq!(fired.len(), 1);
    assert!(fired[0].events.contains(EventMask::HANG_UP));

    watcher.disable().unwrap();
    close(&[read]);
}

#[test]
fn test_event_mask_change_applies_to_enabled_watcher() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let (read, write) = pipe();

    let (events, handler) = recorder();
    let watcher = dispatcher.create_io_watcher(read, EventMask::NONE, handler);
    watcher.enable().unwrap();
    write_byte(write);

    dispatcher.wake().unwrap();
    dispatcher.dispatch_next_event().unwrap();
    assert!(events.lock().unwrap().is_empty());

    watcher.set_event_mask(EventMask::READ).unwrap();
    dispatcher.dispatch_next_event().unwrap();
    assert_eq!(events.lock().unwrap().len(), 1);

    drop(watcher);
    close(&[read, write]);
}

#[test]
fn test_retargeted_watcher_follows_new_descriptor() {
    init_logging();
    let dispatcher = Dispatcher::new().unwrap();
    let (old_read, old_write) = pipe();
    let (new_read, new_write) = pipe();

    let (events, handler) = recorder();
    let watcher = dispatcher.create_io_watcher(old_read, EventMask::READ, handler);
    watcher.enable().unwrap();
    watcher.set_fd(new_read).unwrap();

    write_byte(new_write);
    dispatcher.dispatch_next_event().unwrap();

    let fired = events.lock().unwrap().clone();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].fd, new_read);

    drop(watcher);
    close(&[old_read, old_write, new_read, new_write]);
}
