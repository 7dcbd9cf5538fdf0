//! Web worker entry point for flatscan jobs.
//!
//! This crate compiles to a standalone WASM module that runs inside a
//! `Worker`. Once instantiated it posts `{"ready": true}`, then answers
//! each request by running the job on a long-lived
//! [`flatscan_core::Engine`] and posting the encoded result back.
//!
//! Image bytes travel as `ArrayBuffer`s in the transfer list in both
//! directions, so the pixels move between threads rather than being
//! copied. Headers travel as small JSON strings.
//!
//! Running jobs here keeps the browser's main thread free for the crop
//! overlay and slider interaction.

use std::cell::RefCell;

use flatscan_core::{Engine, JobRequest, JobResponse, Ready, ScanError};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

thread_local! {
    /// One engine for the worker's lifetime, so its ledger spans every
    /// job and a leak shows up as a growing live count.
    static ENGINE: RefCell<Engine> = RefCell::new(Engine::new());
}

/// Message protocol: the main thread sends a JS object with:
/// - `requestJson`: `String` containing a JSON-serialized `JobRequest`
/// - `imageBytes`: `ArrayBuffer` with the source image file bytes
///   (transferred)
///
/// On completion the worker responds with a JS object containing:
/// - `responseJson`: `String` containing a JSON-serialized `JobResponse`
/// - `imageBytes`: `ArrayBuffer` with the encoded output (transferred),
///   present only for `JobResponse::Done`
///
/// Before any request is handled the worker posts `{ready: true}`.
///
/// # Worker entry point
///
/// Called automatically when the WASM module is instantiated in the
/// worker context.
#[wasm_bindgen(start)]
pub fn worker_main() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();

    let global: web_sys::DedicatedWorkerGlobalScope = js_sys::global().dyn_into()?;

    let onmessage =
        Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
            handle_message(&event);
        });
    global.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget(); // lives for the worker lifetime

    let ready = js_sys::Object::new();
    js_sys::Reflect::set(
        &ready,
        &JsValue::from_str("ready"),
        &JsValue::from_bool(Ready::MESSAGE.ready),
    )?;
    global.post_message(&ready)
}

/// Handle one request from the main thread.
fn handle_message(event: &web_sys::MessageEvent) {
    let data = event.data();
    let (request, bytes) = match read_request(&data) {
        Ok(parsed) => parsed,
        Err(message) => {
            web_sys::console::error_1(&JsValue::from_str(&message));
            // Without a parsed request the generation is unknown; 0 is
            // never issued by a client, so the reply is ignored as stale.
            post(
                &JobResponse::Failed {
                    generation: 0,
                    error: ScanError::InvalidConfig(message),
                },
                None,
            );
            return;
        }
    };

    let outcome = ENGINE.with(|engine| {
        let engine = engine.borrow();
        let result = request.job.run(&engine, &bytes);
        let live = engine.live_buffers();
        if live != 0 {
            web_sys::console::warn_1(&JsValue::from_str(&format!(
                "{live} buffers still live after {} job",
                request.job.name()
            )));
        }
        result
    });
    drop(bytes);

    match outcome {
        Ok(encoded) => {
            let (bytes, meta) = encoded.into_parts();
            post(
                &JobResponse::Done {
                    generation: request.generation,
                    meta,
                },
                Some(bytes),
            );
        }
        Err(error) => post(
            &JobResponse::Failed {
                generation: request.generation,
                error,
            },
            None,
        ),
    }
}

/// Extract the request header and image bytes from a message.
fn read_request(data: &JsValue) -> Result<(JobRequest, Vec<u8>), String> {
    let json = js_sys::Reflect::get(data, &JsValue::from_str("requestJson"))
        .ok()
        .and_then(|v| v.as_string())
        .ok_or("missing requestJson field")?;
    let request: JobRequest =
        serde_json::from_str(&json).map_err(|e| format!("failed to parse request: {e}"))?;
    let buffer = js_sys::Reflect::get(data, &JsValue::from_str("imageBytes"))
        .map_err(|_| "missing imageBytes field".to_owned())?;
    if !buffer.is_instance_of::<js_sys::ArrayBuffer>() {
        return Err("imageBytes is not an ArrayBuffer".to_owned());
    }
    let bytes = js_sys::Uint8Array::new(&buffer).to_vec();
    Ok((request, bytes))
}

/// Post a response header, transferring `bytes` when present.
fn post(response: &JobResponse, bytes: Option<Vec<u8>>) {
    let json = match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            web_sys::console::error_1(&JsValue::from_str(&format!(
                "failed to serialize response: {e}"
            )));
            return;
        }
    };
    let message = js_sys::Object::new();
    let _ = js_sys::Reflect::set(
        &message,
        &JsValue::from_str("responseJson"),
        &JsValue::from_str(&json),
    );
    let transfer = js_sys::Array::new();
    if let Some(bytes) = bytes {
        let array = js_sys::Uint8Array::from(bytes.as_slice());
        let buffer = array.buffer();
        let _ = js_sys::Reflect::set(&message, &JsValue::from_str("imageBytes"), &buffer);
        transfer.push(&buffer);
    }
    if let Ok(global) = js_sys::global().dyn_into::<web_sys::DedicatedWorkerGlobalScope>() {
        if let Err(e) = global.post_message_with_transfer(&message, &transfer) {
            web_sys::console::error_2(&JsValue::from_str("failed to postMessage:"), &e);
        }
    }
}
