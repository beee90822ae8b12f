use std::cell::RefCell;
use std::rc::Rc;
use std::task::Poll;

use ferry_bridge::{
    Boundary, BoundaryConfig, ClosureId, ClosureKind, GuestFnIndex, HostValue, PumpStats,
};
use pretty_assertions::assert_eq;

type Log = Rc<RefCell<Vec<String>>>;

/// A boundary whose callbacks append `"<ctx>:<arg>"` to a shared log.
fn logging_boundary() -> (Boundary, GuestFnIndex, Log) {
    let mut b = Boundary::new(BoundaryConfig::default()).unwrap();
    let log: Log = Rc::default();
    let body = {
        let log = Rc::clone(&log);
        b.register_callback(move |_, ctx, args| {
            let arg = args.first().map(ToString::to_string).unwrap_or_default();
            log.borrow_mut().push(format!("{ctx}:{arg}"));
            Ok(HostValue::Undefined)
        })
    };
    (b, body, log)
}

fn closure(b: &mut Boundary, body: GuestFnIndex, ctx: u32) -> ClosureId {
    b.create_closure(body, ctx, GuestFnIndex::NULL, ClosureKind::Shared)
        .unwrap()
}

#[test]
fn continuations_run_as_microtasks_in_registration_order() {
    let (mut b, body, log) = logging_boundary();
    let (handle, resolver) = b.new_deferred();
    let first = closure(&mut b, body, 1);
    let second = closure(&mut b, body, 2);
    let on_err = closure(&mut b, body, 99);
    b.then(handle, first, Some(on_err)).unwrap();
    b.then(handle, second, None).unwrap();

    assert_eq!(b.pump(0), PumpStats::default());
    assert!(resolver.resolve("ready"));
    assert!(log.borrow().is_empty());

    let stats = b.pump(0);
    assert_eq!(stats.microtasks, 2);
    assert_eq!(*log.borrow(), vec!["1:\"ready\"", "2:\"ready\""]);
}

#[test]
fn rejection_runs_error_continuations_only() {
    let (mut b, body, log) = logging_boundary();
    let (handle, resolver) = b.new_deferred();
    let ok = closure(&mut b, body, 1);
    let err = closure(&mut b, body, 2);
    b.then(handle, ok, Some(err)).unwrap();
    b.then(handle, ok, None).unwrap();

    resolver.reject(HostValue::error("AbortError", "closed"));
    b.pump(0);
    assert_eq!(*log.borrow(), vec!["2:AbortError: closed"]);

    assert_eq!(b.poll_deferred(handle).unwrap(), Poll::Ready(Err(ferry_bridge::Failure)));
    assert!(b.take_pending_error().unwrap().is_some());
}

#[test]
fn then_on_settled_deferred_queues_immediately() {
    let (mut b, body, log) = logging_boundary();
    let (handle, resolver) = b.new_deferred();
    resolver.resolve(7u32);
    let c = closure(&mut b, body, 5);
    b.then(handle, c, None).unwrap();
    assert_eq!(b.pending_tasks(), 1);
    b.pump(0);
    assert_eq!(*log.borrow(), vec!["5:7"]);
}

#[test]
fn microtasks_drain_between_timers() {
    let (mut b, body, log) = logging_boundary();
    let micro = closure(&mut b, body, 3);
    let queue_micro = b.register_callback(move |b, ctx, _| {
        b.queue_microtask(micro);
        b.call("log", &[HostValue::from(ctx)])
            .map_err(|err| HostValue::error("Error", err.to_string()))
    });
    {
        let log = Rc::clone(&log);
        b.register_op("log", move |_, args| {
            log.borrow_mut().push(format!("timer {}", args[0]));
            Ok(HostValue::Undefined)
        });
    }
    let t1 = b
        .create_closure(queue_micro, 1, GuestFnIndex::NULL, ClosureKind::Shared)
        .unwrap();
    let t2 = b
        .create_closure(queue_micro, 2, GuestFnIndex::NULL, ClosureKind::Shared)
        .unwrap();
    b.set_timeout(t2, 20, 0);
    b.set_timeout(t1, 10, 0);

    let stats = b.pump(25);
    assert_eq!(stats.timers, 2);
    assert_eq!(stats.microtasks, 2);
    assert_eq!(
        *log.borrow(),
        vec!["timer 1", "3:", "timer 2", "3:"]
    );
}

#[test]
fn timers_scheduled_during_pump_wait_for_the_next_one() {
    let (mut b, body, log) = logging_boundary();
    let leaf = closure(&mut b, body, 8);
    let rescheduler = b.register_callback(move |b, _, _| {
        b.set_timeout(leaf, 0, 0);
        Ok(HostValue::Undefined)
    });
    let root = b
        .create_closure(rescheduler, 0, GuestFnIndex::NULL, ClosureKind::Shared)
        .unwrap();
    b.set_timeout(root, 0, 0);

    assert_eq!(b.pump(0).timers, 1);
    assert!(log.borrow().is_empty());
    assert_eq!(b.pump(0).timers, 1);
    assert_eq!(*log.borrow(), vec!["8:"]);
}

#[test]
fn animation_frames_can_be_cancelled() {
    let (mut b, body, log) = logging_boundary();
    let a = closure(&mut b, body, 1);
    let c = closure(&mut b, body, 2);
    let ta = b.request_animation_frame(a);
    b.request_animation_frame(c);
    assert!(b.cancel(ta));

    let stats = b.run_animation_frames(100.0);
    assert_eq!(stats.frames, 1);
    assert_eq!(*log.borrow(), vec!["2:100"]);
    assert!(!b.cancel(ta));
}
