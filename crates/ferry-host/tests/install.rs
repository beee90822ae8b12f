use std::cell::RefCell;
use std::rc::Rc;
use std::task::Poll;

use ferry_bridge::{
    Boundary, BoundaryConfig, BridgeError, ClosureKind, Failure, GuestFnIndex, Handle, HostValue,
};
use ferry_host::{
    abort_error, install, MemoryFileServices, OpenedFile, SavedFile, OP_OPENED_FILE_DATA,
    OP_OPENED_FILE_NAME, OP_OPEN_FILE_DIALOG, OP_SAVE_FILE,
};
use pretty_assertions::assert_eq;

fn setup() -> (Boundary, Rc<MemoryFileServices>) {
    let mut b = Boundary::new(BoundaryConfig::default()).unwrap();
    let services = Rc::new(MemoryFileServices::new());
    install(&mut b, Rc::clone(&services));
    (b, services)
}

fn open_dialog(b: &mut Boundary, accept: &str) -> Handle {
    let (ptr, len) = b.pass_string(accept).unwrap();
    let accept = b.string_new(ptr, len).unwrap();
    let deferred = b.invoke(OP_OPEN_FILE_DIALOG, &[accept]).unwrap().unwrap();
    b.drop_ref(accept).unwrap();
    deferred
}

#[test]
fn picked_file_reaches_the_compute_side() {
    let (mut b, services) = setup();
    let deferred = open_dialog(&mut b, ".ptcop");
    assert_eq!(b.poll_deferred(deferred).unwrap(), Poll::Pending);
    assert_eq!(services.pending_accepts(), vec![".ptcop"]);

    services
        .complete_next(OpenedFile {
            name: "tune.ptcop".into(),
            data: b"PTCOLLAGE".to_vec(),
        })
        .unwrap();
    let Poll::Ready(Ok(file)) = b.poll_deferred(deferred).unwrap() else {
        panic!("dialog should have resolved");
    };

    let name = b.invoke(OP_OPENED_FILE_NAME, &[file]).unwrap().unwrap();
    assert_eq!(b.expect_string(name).unwrap(), "tune.ptcop");

    let data = b.invoke(OP_OPENED_FILE_DATA, &[file]).unwrap().unwrap();
    let bytes = b.take_handle(data).unwrap();
    let (ptr, len) = b.pass_bytes(bytes.as_bytes().unwrap()).unwrap();
    assert_eq!(b.bytes_view(ptr, len).unwrap(), b"PTCOLLAGE");
}

#[test]
fn cancelled_dialog_rejects_with_abort_error() {
    let (mut b, services) = setup();
    let deferred = open_dialog(&mut b, ".mid");
    services.cancel_next().unwrap();

    assert_eq!(b.poll_deferred(deferred).unwrap(), Poll::Ready(Err(Failure)));
    let err = b.clear_pending_error();
    assert_eq!(b.take_handle(err).unwrap(), abort_error());
}

#[test]
fn continuation_fires_when_file_arrives() {
    let (mut b, services) = setup();
    let names = Rc::new(RefCell::new(Vec::new()));
    let on_file = {
        let names = Rc::clone(&names);
        b.register_callback(move |b, _, args| {
            let name = b
                .call(OP_OPENED_FILE_NAME, args)
                .map_err(|err| HostValue::error("Error", err.to_string()))?;
            names.borrow_mut().push(name);
            Ok(HostValue::Undefined)
        })
    };
    let closure = b
        .create_closure(on_file, 0, GuestFnIndex::NULL, ClosureKind::Exclusive)
        .unwrap();

    let deferred = open_dialog(&mut b, "*");
    b.then(deferred, closure, None).unwrap();
    services
        .complete_next(OpenedFile {
            name: "a.wav".into(),
            data: Vec::new(),
        })
        .unwrap();
    assert_eq!(b.pump(0).microtasks, 1);
    assert_eq!(*names.borrow(), vec![HostValue::from("a.wav")]);
}

#[test]
fn save_file_records_bytes() {
    let (mut b, services) = setup();
    let result = b
        .call(
            OP_SAVE_FILE,
            &[HostValue::from(vec![0u8, 1, 2]), HostValue::from("dump.bin")],
        )
        .unwrap();
    assert_eq!(result, HostValue::Undefined);
    assert_eq!(
        services.saved(),
        vec![SavedFile {
            filename: "dump.bin".into(),
            data: vec![0, 1, 2]
        }]
    );
}

#[test]
fn wrong_argument_types_throw_type_errors() {
    let (mut b, _) = setup();
    let number = b.number_new(4.0);
    assert_eq!(b.invoke(OP_SAVE_FILE, &[number, number]).unwrap(), Err(Failure));
    let err = b.take_pending_error().unwrap().unwrap();
    assert!(matches!(err, HostValue::Error(ref e) if e.name == "TypeError"));

    let err = b.call(OP_OPENED_FILE_NAME, &[HostValue::from("not a file")]);
    assert!(matches!(
        err,
        Err(BridgeError::Host(HostValue::Error(ref e))) if e.name == "TypeError"
    ));
    assert_eq!(b.query_pending_error(), Handle::NONE);
}
