//! Browser implementation backed by DOM elements.

use std::rc::Rc;

use ferry_bridge::{Boundary, HostValue, Resolver};
use js_sys::{Array, Uint8Array};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{Blob, Document, File, HtmlAnchorElement, HtmlInputElement, Url};

use crate::{abort_error, install, FileServices, HostServiceError, OpenedFile, Result};

impl From<JsValue> for HostServiceError {
    fn from(value: JsValue) -> Self {
        HostServiceError::Js(format!("{value:?}"))
    }
}

fn document() -> Result<Document> {
    web_sys::window()
        .and_then(|window| window.document())
        .ok_or(HostServiceError::Unavailable("document"))
}

fn create<T: JsCast>(document: &Document, tag: &'static str) -> Result<T> {
    document
        .create_element(tag)?
        .dyn_into::<T>()
        .map_err(|_| HostServiceError::Unavailable(tag))
}

/// Picks files with a detached `<input type=file>` and saves through an object-URL download.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebFileServices;

impl FileServices for WebFileServices {
    fn open_file_dialog(&self, accept: &str, resolver: Resolver) -> Result<()> {
        let input: HtmlInputElement = create(&document()?, "input")?;
        input.set_type("file");
        input.set_accept(accept);

        let on_change = {
            let input = input.clone();
            let resolver = resolver.clone();
            Closure::once_into_js(move || match input.files().and_then(|files| files.get(0)) {
                Some(file) => spawn_local(read_file(file, resolver)),
                None => {
                    resolver.reject(abort_error());
                }
            })
        };
        input.set_onchange(Some(on_change.unchecked_ref()));

        let on_cancel = Closure::once_into_js(move || {
            resolver.reject(abort_error());
        });
        input.add_event_listener_with_callback("cancel", on_cancel.unchecked_ref())?;

        input.click();
        Ok(())
    }

    fn save_file(&self, data: &[u8], filename: &str) -> Result<()> {
        let document = document()?;
        let parts = Array::of1(&Uint8Array::from(data));
        let blob = Blob::new_with_u8_array_sequence(&parts)?;
        let url = Url::create_object_url_with_blob(&blob)?;

        let anchor: HtmlAnchorElement = create(&document, "a")?;
        anchor.set_href(&url);
        anchor.set_download(filename);
        anchor.click();
        Url::revoke_object_url(&url)?;
        tracing::debug!(filename, len = data.len(), "download started");
        Ok(())
    }
}

async fn read_file(file: File, resolver: Resolver) {
    match JsFuture::from(file.array_buffer()).await {
        Ok(buffer) => {
            let data = Uint8Array::new(&buffer).to_vec();
            tracing::debug!(name = %file.name(), len = data.len(), "file picked");
            resolver.resolve(HostValue::object(OpenedFile {
                name: file.name(),
                data,
            }));
        }
        Err(err) => {
            resolver.reject(HostValue::error("NotReadableError", format!("{err:?}")));
        }
    }
}

pub fn request_fullscreen() -> Result<()> {
    let element = document()?
        .document_element()
        .ok_or(HostServiceError::Unavailable("document element"))?;
    element.request_fullscreen()?;
    Ok(())
}

pub fn exit_fullscreen() -> Result<()> {
    document()?.exit_fullscreen();
    Ok(())
}

/// [`install`] with [`WebFileServices`], plus `request_fullscreen` and `exit_fullscreen`
/// operations.
pub fn install_web(boundary: &mut Boundary) {
    install(boundary, Rc::new(WebFileServices));
    boundary.register_op("request_fullscreen", |_, _| {
        request_fullscreen()?;
        Ok(HostValue::Undefined)
    });
    boundary.register_op("exit_fullscreen", |_, _| {
        exit_fullscreen()?;
        Ok(HostValue::Undefined)
    });
}
