//! Web worker communication for off-main-thread scanning.
//!
//! [`ScanWorker`] wraps a `web_sys::Worker` running the
//! `flatscan-worker` WASM module. It sends a [`JobRequest`] header plus
//! the image bytes via `postMessage` and receives a
//! [`JobResponse`](flatscan_core::JobResponse) header plus the encoded
//! bytes back.
//!
//! The worker is created from embedded JS + WASM blobs, so no extra
//! static files need to be served.
//!
//! One message listener lives as long as each spawned worker and feeds
//! a [`Router`], which hands each reply to the waiting
//! [`run`](ScanWorker::run) call by generation token. Only the newest
//! request's result is handed back; older ones resolve as superseded.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use flatscan_core::{Encoded, Job, JobRequest, ScanError};
use gloo_timers::callback::Timeout;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::routing::{self, Outcome, Router, WorkerMessage};

/// How long a single job may run before the worker is killed.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for [`ScanWorker::wait_ready`].
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// A request waiting for its reply.
struct PendingReply {
    resolve: js_sys::Function,
    slot: Rc<RefCell<Option<Outcome>>>,
}

impl PendingReply {
    /// Store `outcome` (if any) and wake the waiting call.
    fn settle(self, outcome: Option<Outcome>) {
        *self.slot.borrow_mut() = outcome;
        let _ = self.resolve.call0(&JsValue::NULL);
    }
}

/// State shared between the client and the message listener.
#[derive(Default)]
struct Shared {
    router: RefCell<Router<PendingReply>>,
    ready_resolve: RefCell<Option<js_sys::Function>>,
}

impl Shared {
    /// Resolve every waiting request with no result.
    fn abandon_all(&self) {
        let abandoned = self.router.borrow_mut().restart();
        for reply in abandoned {
            reply.settle(None);
        }
    }
}

/// One spawned worker plus the listeners bound to it.
struct Spawned {
    worker: web_sys::Worker,
    ready: js_sys::Promise,
    _onmessage: Closure<dyn FnMut(web_sys::MessageEvent)>,
    _onerror: Closure<dyn FnMut(web_sys::ErrorEvent)>,
}

/// A scan worker that runs [`Job`]s in a dedicated web worker.
///
/// Create one at app startup and reuse it for every job. Call
/// [`cancel`](Self::cancel) to terminate an in-progress run; this kills
/// the worker and spawns a fresh one.
pub struct ScanWorker {
    /// The embedded JS glue for the worker.
    worker_js: &'static str,
    /// The embedded WASM binary for the worker.
    worker_wasm: &'static [u8],
    shared: Rc<Shared>,
    /// The current worker instance. Replaced on cancel and timeout.
    inner: RefCell<Spawned>,
}

impl ScanWorker {
    /// Create a scan worker from embedded JS and WASM blobs.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::LibraryNotReady`] if the worker cannot be
    /// created (e.g. in a non-browser environment).
    pub fn new(worker_js: &'static str, worker_wasm: &'static [u8]) -> Result<Self, ScanError> {
        let shared = Rc::new(Shared::default());
        let spawned = spawn(worker_js, worker_wasm, &shared)?;
        Ok(Self {
            worker_js,
            worker_wasm,
            shared,
            inner: RefCell::new(spawned),
        })
    }

    /// Whether the current worker has posted its readiness message.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.router.borrow().is_ready()
    }

    /// Wait until the worker is ready, at most `timeout`.
    ///
    /// Races the worker's one-shot readiness promise against a timer;
    /// there is no polling.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::LibraryNotReady`] if the timer wins.
    #[allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ScanError> {
        if self.is_ready() {
            return Ok(());
        }
        let ready = self.inner.borrow().ready.clone();
        let (timer, _guard) = timer_promise(timeout, JsValue::FALSE)?;
        let race = js_sys::Promise::race(&js_sys::Array::of2(&ready, &timer));
        let won = wasm_bindgen_futures::JsFuture::from(race)
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if won && self.is_ready() {
            Ok(())
        } else {
            Err(ScanError::LibraryNotReady)
        }
    }

    /// Run `job` over `image_bytes` in the worker.
    ///
    /// Every call supersedes the previous ones. Returns `Ok(None)` when
    /// a newer call (or [`cancel`](Self::cancel)) superseded this one
    /// before its reply arrived; the stale result is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::LibraryNotReady`] if the worker has not
    /// posted its readiness message yet.
    /// Returns [`ScanError::ResourceTimeout`] if no reply arrives within
    /// [`RUN_TIMEOUT`]; the worker is terminated and respawned.
    /// Otherwise returns whatever error the job produced in the worker.
    #[allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed
    pub async fn run(&self, image_bytes: &[u8], job: Job) -> Result<Option<Encoded>, ScanError> {
        let slot = Rc::new(RefCell::new(None::<Outcome>));
        let (reply, resolve, _reject) = new_promise()?;
        let request = self.shared.router.borrow_mut().begin(
            job,
            PendingReply {
                resolve,
                slot: Rc::clone(&slot),
            },
        )?;
        let generation = request.generation;

        let posted = post_request(&self.inner.borrow().worker, &request, image_bytes);
        if let Err(e) = posted {
            self.shared.router.borrow_mut().forget(generation);
            return Err(e);
        }

        let (timer, _guard) = timer_promise(RUN_TIMEOUT, JsValue::FALSE)?;
        let race = js_sys::Promise::race(&js_sys::Array::of2(&reply, &timer));
        let answered = wasm_bindgen_futures::JsFuture::from(race)
            .await
            .map(|v| v.as_bool() != Some(false))
            .unwrap_or(true);

        if !answered {
            let (error, abandoned) = self
                .shared
                .router
                .borrow_mut()
                .time_out(generation, RUN_TIMEOUT);
            for reply in abandoned {
                reply.settle(None);
            }
            web_sys::console::warn_1(&JsValue::from_str(&format!(
                "worker job {generation} timed out, restarting worker"
            )));
            self.respawn();
            return Err(error);
        }

        let outcome = slot.borrow_mut().take();
        self.shared.router.borrow().settle(generation, outcome)
    }

    /// Run `job`, or hand `image_bytes` back unchanged when the worker
    /// never becomes ready within `ready_timeout`.
    ///
    /// The pass-through is logged at `warn` level.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), except that
    /// [`ScanError::LibraryNotReady`] is replaced by the pass-through.
    /// The pass-through itself fails if the input format cannot be
    /// returned as an output format.
    #[allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed
    pub async fn run_or_passthrough(
        &self,
        image_bytes: &[u8],
        job: Job,
        ready_timeout: Duration,
    ) -> Result<Option<Encoded>, ScanError> {
        match self.wait_ready(ready_timeout).await {
            Ok(()) => self.run(image_bytes, job).await,
            Err(ScanError::LibraryNotReady) => {
                tracing::warn!(job = job.name(), "skipping job");
                web_sys::console::warn_1(&JsValue::from_str(
                    "flatscan worker not ready, returning input unchanged",
                ));
                routing::passthrough(image_bytes).map(Some)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel any in-progress run by terminating the worker and creating
    /// a fresh one.
    ///
    /// Pending [`run`](Self::run) calls resolve as superseded.
    pub fn cancel(&self) {
        let abandoned = self.shared.router.borrow_mut().cancel();
        for reply in abandoned {
            reply.settle(None);
        }
        self.respawn();
    }

    /// Terminate the current worker and start a fresh one. The router
    /// must already have been restarted.
    fn respawn(&self) {
        self.inner.borrow().worker.terminate();
        match spawn(self.worker_js, self.worker_wasm, &self.shared) {
            Ok(spawned) => *self.inner.borrow_mut() = spawned,
            Err(e) => web_sys::console::error_1(&JsValue::from_str(&format!(
                "failed to respawn worker: {e}"
            ))),
        }
    }
}

impl Drop for ScanWorker {
    fn drop(&mut self) {
        self.inner.borrow().worker.terminate();
        self.shared.abandon_all();
    }
}

/// Create a worker and bind the readiness and reply listeners to it.
fn spawn(
    worker_js: &str,
    worker_wasm: &[u8],
    shared: &Rc<Shared>,
) -> Result<Spawned, ScanError> {
    let worker = create_worker(worker_js, worker_wasm).map_err(|e| {
        web_sys::console::error_2(&JsValue::from_str("failed to create worker:"), &e);
        ScanError::LibraryNotReady
    })?;

    let (ready, ready_resolve, _reject) = new_promise()?;
    *shared.ready_resolve.borrow_mut() = Some(ready_resolve);

    let state = Rc::clone(shared);
    let onmessage =
        Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
            dispatch(&state, &event.data());
        });

    let state = Rc::clone(shared);
    let onerror =
        Closure::<dyn FnMut(web_sys::ErrorEvent)>::new(move |event: web_sys::ErrorEvent| {
            let message = event.message();
            web_sys::console::error_1(&JsValue::from_str(&format!("worker error: {message}")));
            let failed = state.router.borrow_mut().fail_all(&format!("worker error: {message}"));
            for (reply, outcome) in failed {
                reply.settle(Some(outcome));
            }
        });

    worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));

    Ok(Spawned {
        worker,
        ready,
        _onmessage: onmessage,
        _onerror: onerror,
    })
}

/// Route one message from the worker.
fn dispatch(shared: &Shared, data: &JsValue) {
    let field = |name: &str| js_sys::Reflect::get(data, &JsValue::from_str(name)).ok();
    let ready = field("ready").and_then(|v| v.as_bool()).unwrap_or(false);
    let response_json = field("responseJson").and_then(|v| v.as_string());
    let bytes = field("imageBytes")
        .filter(|v| v.is_instance_of::<js_sys::ArrayBuffer>())
        .map(|buffer| js_sys::Uint8Array::new(&buffer).to_vec());

    match WorkerMessage::decode(ready, response_json.as_deref(), bytes) {
        Ok(WorkerMessage::Ready) => {
            shared.router.borrow_mut().mark_ready();
            if let Some(resolve) = shared.ready_resolve.borrow_mut().take() {
                let _ = resolve.call1(&JsValue::NULL, &JsValue::TRUE);
            }
        }
        Ok(WorkerMessage::Reply { response, bytes }) => {
            let delivered = shared.router.borrow_mut().deliver(response, bytes);
            if let Some((reply, outcome)) = delivered {
                reply.settle(Some(outcome));
            }
        }
        Err(message) => web_sys::console::error_1(&JsValue::from_str(&message)),
    }
}

/// Post `{ requestJson, imageBytes }` to `worker`, transferring the
/// image buffer.
fn post_request(
    worker: &web_sys::Worker,
    request: &JobRequest,
    image_bytes: &[u8],
) -> Result<(), ScanError> {
    let request_json = serde_json::to_string(request)
        .map_err(|e| ScanError::InvalidConfig(format!("failed to serialize request: {e}")))?;

    let message = js_sys::Object::new();
    let buffer = js_sys::Uint8Array::from(image_bytes).buffer();
    js_sys::Reflect::set(
        &message,
        &JsValue::from_str("requestJson"),
        &JsValue::from_str(&request_json),
    )
    .map_err(|_| ScanError::InvalidConfig("failed to set requestJson".into()))?;
    js_sys::Reflect::set(&message, &JsValue::from_str("imageBytes"), &buffer)
        .map_err(|_| ScanError::InvalidConfig("failed to set imageBytes".into()))?;

    let transfer = js_sys::Array::of1(&buffer);
    worker
        .post_message_with_transfer(&message, &transfer)
        .map_err(|_| ScanError::InvalidConfig("failed to postMessage".into()))
}

/// Create a web worker from embedded JS glue and WASM binary.
///
/// 1. Creates a Blob URL for the WASM binary
/// 2. Wraps the JS glue in a self-initializing script that loads the
///    WASM from the Blob URL
/// 3. Creates a Blob URL for the wrapper script
/// 4. Creates a Worker from the wrapper Blob URL
fn create_worker(worker_js: &str, worker_wasm: &[u8]) -> Result<web_sys::Worker, JsValue> {
    let wasm_array = js_sys::Uint8Array::from(worker_wasm);
    let wasm_blob_parts = js_sys::Array::of1(&wasm_array.buffer());
    let wasm_blob_opts = web_sys::BlobPropertyBag::new();
    wasm_blob_opts.set_type("application/wasm");
    let wasm_blob = web_sys::Blob::new_with_buffer_source_sequence_and_options(
        &wasm_blob_parts,
        &wasm_blob_opts,
    )?;
    let wasm_url = web_sys::Url::create_object_url_with_blob(&wasm_blob)?;

    let wrapper_js = format!(
        r#"// Worker wrapper: loads embedded wasm_bindgen glue and WASM blob.
{worker_js}

wasm_bindgen("{wasm_url}")
    .catch(function(e) {{ console.error("Worker WASM init failed:", e); }});
"#
    );

    let js_blob_parts = js_sys::Array::of1(&JsValue::from_str(&wrapper_js));
    let js_blob_opts = web_sys::BlobPropertyBag::new();
    js_blob_opts.set_type("application/javascript");
    let js_blob = web_sys::Blob::new_with_str_sequence_and_options(&js_blob_parts, &js_blob_opts)?;
    let js_url = web_sys::Url::create_object_url_with_blob(&js_blob)?;

    let worker = web_sys::Worker::new(&js_url)?;

    // The WASM URL stays alive: the worker's async init may still be
    // fetching it.
    web_sys::Url::revoke_object_url(&js_url).ok();

    Ok(worker)
}

/// Create a JS Promise along with its resolve and reject functions.
fn new_promise() -> Result<(js_sys::Promise, js_sys::Function, js_sys::Function), ScanError> {
    let resolve = Rc::new(RefCell::new(None::<js_sys::Function>));
    let reject = Rc::new(RefCell::new(None::<js_sys::Function>));
    let resolve_clone = Rc::clone(&resolve);
    let reject_clone = Rc::clone(&reject);

    let promise = js_sys::Promise::new(&mut move |res, rej| {
        *resolve_clone.borrow_mut() = Some(res);
        *reject_clone.borrow_mut() = Some(rej);
    });

    let resolve_fn = resolve.borrow_mut().take();
    let reject_fn = reject.borrow_mut().take();
    match (resolve_fn, reject_fn) {
        (Some(resolve), Some(reject)) => Ok((promise, resolve, reject)),
        _ => Err(ScanError::InvalidConfig("promise executor did not run".into())),
    }
}

/// A promise that resolves with `value` after `after`.
///
/// The returned [`Timeout`] cancels the timer when dropped.
fn timer_promise(after: Duration, value: JsValue) -> Result<(js_sys::Promise, Timeout), ScanError> {
    let (promise, resolve, _reject) = new_promise()?;
    let millis = u32::try_from(after.as_millis()).unwrap_or(u32::MAX);
    let timeout = Timeout::new(millis, move || {
        let _ = resolve.call1(&JsValue::NULL, &value);
    });
    Ok((promise, timeout))
}
