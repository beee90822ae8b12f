//! File services the compute module reaches through the boundary: a file-open dialog that
//! produces `(name, bytes)` asynchronously, and save-as for a byte buffer.
//!
//! The services sit behind [`FileServices`] so the same compute-side code runs against the
//! browser ([`WebFileServices`], wasm32 only) or an in-memory stand-in ([`MemoryFileServices`]).
//! [`install`] exposes a service as named host operations on a [`Boundary`].

#![forbid(unsafe_code)]

mod error;
mod memory;
#[cfg(target_arch = "wasm32")]
mod web;

use std::rc::Rc;

use ferry_bridge::{args, Boundary, HostValue, Resolver};

pub use error::{HostServiceError, Result};
pub use memory::{MemoryFileServices, SavedFile};
#[cfg(target_arch = "wasm32")]
pub use web::{exit_fullscreen, install_web, request_fullscreen, WebFileServices};

pub const OP_OPEN_FILE_DIALOG: &str = "open_file_dialog";
pub const OP_SAVE_FILE: &str = "save_file";
pub const OP_OPENED_FILE_NAME: &str = "opened_file_name";
pub const OP_OPENED_FILE_DATA: &str = "opened_file_data";

/// A file picked by the user. Handed to the compute side as a host object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub name: String,
    pub data: Vec<u8>,
}

pub trait FileServices {
    /// Ask the user for a file matching `accept` (an `<input accept>` filter such as `".ptcop"`).
    ///
    /// `resolver` is settled later with an [`OpenedFile`] host object, or rejected with an
    /// `AbortError` if the dialog is dismissed.
    fn open_file_dialog(&self, accept: &str, resolver: Resolver) -> Result<()>;

    /// Hand `data` to the user as a download named `filename`.
    fn save_file(&self, data: &[u8], filename: &str) -> Result<()>;
}

/// The rejection reason for a dismissed dialog.
pub fn abort_error() -> HostValue {
    HostValue::error("AbortError", "file selection was cancelled")
}

/// Register the file operations on `boundary`:
///
/// - `open_file_dialog(accept: string) -> deferred<OpenedFile>`
/// - `save_file(data: bytes, filename: string)`
/// - `opened_file_name(file: OpenedFile) -> string`
/// - `opened_file_data(file: OpenedFile) -> bytes`
///
/// Arguments of the wrong type throw a `TypeError` through the trampoline.
pub fn install<S: FileServices + 'static>(boundary: &mut Boundary, services: Rc<S>) {
    {
        let services = Rc::clone(&services);
        boundary.register_op(OP_OPEN_FILE_DIALOG, move |b, call_args| {
            let accept = args::string(call_args, 0)?;
            let (handle, resolver) = b.new_deferred();
            let deferred = b
                .take_handle(handle)
                .map_err(|err| HostValue::from(HostServiceError::from(err)))?;
            services.open_file_dialog(accept, resolver)?;
            Ok(deferred)
        });
    }
    boundary.register_op(OP_SAVE_FILE, move |_, call_args| {
        let data = args::bytes(call_args, 0)?;
        let filename = args::string(call_args, 1)?;
        services.save_file(data, filename)?;
        Ok(HostValue::Undefined)
    });
    boundary.register_op(OP_OPENED_FILE_NAME, |_, call_args| {
        let file = args::object::<OpenedFile>(call_args, 0)?;
        Ok(HostValue::String(file.name.clone()))
    });
    boundary.register_op(OP_OPENED_FILE_DATA, |_, call_args| {
        let file = args::object::<OpenedFile>(call_args, 0)?;
        Ok(HostValue::Bytes(file.data.clone()))
    });
    tracing::debug!("file services installed");
}
