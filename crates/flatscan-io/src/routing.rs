//! Reply routing for the scan worker, independent of the browser.
//!
//! [`Router`] owns the readiness flag, the generation tracker and the
//! table of requests waiting for a reply. [`ScanWorker`](crate::ScanWorker)
//! keeps one behind a `RefCell`, feeds it every event the worker
//! produces, and settles whichever waiters the router hands back. The
//! waiter type is generic so the bookkeeping can be exercised without
//! JS promises.

use std::collections::HashMap;
use std::time::Duration;

use flatscan_core::{
    Encoded, Generation, Job, JobRequest, JobResponse, RequestTracker, ScanError, codec,
};

/// What a waiting request eventually receives.
pub type Outcome = Result<Encoded, ScanError>;

/// A message posted by the worker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// The worker finished initialising.
    Ready,
    /// The answer to one request.
    Reply {
        /// Decoded `responseJson` header.
        response: JobResponse,
        /// The transferred `imageBytes`, if any.
        bytes: Option<Vec<u8>>,
    },
}

impl WorkerMessage {
    /// Decode a message from its `ready` flag, `responseJson` header and
    /// `imageBytes` payload.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the message is neither
    /// a readiness message nor a well-formed reply.
    pub fn decode(
        ready: bool,
        response_json: Option<&str>,
        bytes: Option<Vec<u8>>,
    ) -> Result<Self, String> {
        if ready {
            return Ok(Self::Ready);
        }
        let json = response_json.ok_or("worker message without responseJson")?;
        let response = serde_json::from_str::<JobResponse>(json)
            .map_err(|e| format!("failed to deserialize worker response: {e}"))?;
        Ok(Self::Reply { response, bytes })
    }
}

/// Request bookkeeping for one worker client.
#[derive(Debug)]
pub struct Router<W> {
    ready: bool,
    tracker: RequestTracker,
    pending: HashMap<u64, W>,
}

impl<W> Default for Router<W> {
    fn default() -> Self {
        Self {
            ready: false,
            tracker: RequestTracker::new(),
            pending: HashMap::new(),
        }
    }
}

impl<W> Router<W> {
    /// A router for a worker that has not reported ready yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the current worker has reported ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Requests still waiting for a reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Record the readiness message. Returns `true` only for the first
    /// one since the worker was (re)started.
    pub const fn mark_ready(&mut self) -> bool {
        let first = !self.ready;
        self.ready = true;
        first
    }

    /// Start a request for `job`, superseding every earlier one, and
    /// park `waiter` until its reply arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::LibraryNotReady`] before the worker has
    /// reported ready; nothing is registered in that case.
    pub fn begin(&mut self, job: Job, waiter: W) -> Result<JobRequest, ScanError> {
        if !self.ready {
            return Err(ScanError::LibraryNotReady);
        }
        let generation = self.tracker.next().0;
        self.pending.insert(generation, waiter);
        Ok(JobRequest { generation, job })
    }

    /// Drop the waiter for `generation`, e.g. when posting failed.
    pub fn forget(&mut self, generation: u64) -> Option<W> {
        self.pending.remove(&generation)
    }

    /// Hand a reply to the request waiting for it.
    ///
    /// Returns `None` when nobody waits for that generation any more
    /// (timed out, cancelled or restarted); the reply is dropped.
    pub fn deliver(&mut self, response: JobResponse, bytes: Option<Vec<u8>>) -> Option<(W, Outcome)> {
        let generation = response.generation();
        let Some(waiter) = self.pending.remove(&generation) else {
            tracing::debug!(generation, "dropping reply nobody waits for");
            return None;
        };
        let outcome = match response {
            JobResponse::Done { meta, .. } => bytes.map_or_else(
                || Err(ScanError::Encode("worker reply missing imageBytes".into())),
                |bytes| Ok(Encoded::from_parts(bytes, meta)),
            ),
            JobResponse::Failed { error, .. } => Err(error),
        };
        Some((waiter, outcome))
    }

    /// The run for `generation` got no reply within `after`.
    ///
    /// The worker is about to be terminated, so readiness is cleared and
    /// every other waiter is abandoned along with it. Returns the error
    /// for the timed-out run and the abandoned waiters.
    pub fn time_out(&mut self, generation: u64, after: Duration) -> (ScanError, Vec<W>) {
        self.pending.remove(&generation);
        tracing::warn!(generation, seconds = after.as_secs(), "worker job timed out");
        let abandoned = self.restart();
        (
            ScanError::ResourceTimeout {
                seconds: after.as_secs(),
            },
            abandoned,
        )
    }

    /// The worker was replaced: clear readiness and abandon every waiter.
    pub fn restart(&mut self) -> Vec<W> {
        self.ready = false;
        self.pending.drain().map(|(_, waiter)| waiter).collect()
    }

    /// Supersede everything in flight, then [`restart`](Self::restart).
    pub fn cancel(&mut self) -> Vec<W> {
        self.tracker.invalidate();
        self.restart()
    }

    /// The worker reported an error: fail every waiter with `message`.
    pub fn fail_all(&mut self, message: &str) -> Vec<(W, Outcome)> {
        self.pending
            .drain()
            .map(|(_, waiter)| (waiter, Err(ScanError::Encode(message.to_owned()))))
            .collect()
    }

    /// The result a run for `generation` returns to its caller, given
    /// what its waiter received (`None` when abandoned).
    ///
    /// Anything but the newest request resolves as superseded.
    ///
    /// # Errors
    ///
    /// Returns the job's error when the newest request failed.
    pub fn settle(&self, generation: u64, outcome: Option<Outcome>) -> Result<Option<Encoded>, ScanError> {
        if !self.tracker.is_current(Generation(generation)) {
            tracing::debug!(generation, "dropping stale worker result");
            return Ok(None);
        }
        outcome.transpose()
    }
}

/// The input handed back unchanged when no worker is available.
///
/// # Errors
///
/// Returns a codec error if the bytes are not in a format that can be
/// returned as output.
pub fn passthrough(image_bytes: &[u8]) -> Result<Encoded, ScanError> {
    tracing::warn!(
        input_bytes = image_bytes.len(),
        "worker not ready, returning input unchanged"
    );
    codec::wrap_undecoded(image_bytes.to_vec())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use flatscan_core::{
        Dimensions, EncodedMeta, EnhancementParameters, OutputFormat, OutputSettings, RgbImage,
    };

    use super::*;

    fn job() -> Job {
        Job::Enhance {
            params: EnhancementParameters::AUTO,
            output: OutputSettings::default(),
        }
    }

    fn ready() -> Router<&'static str> {
        let mut router = Router::new();
        router.mark_ready();
        router
    }

    fn done(generation: u64) -> JobResponse {
        JobResponse::Done {
            generation,
            meta: EncodedMeta {
                format: OutputFormat::Jpeg,
                dimensions: Dimensions::new(2, 3),
                byte_size: 4,
            },
        }
    }

    #[test]
    fn requests_wait_for_readiness() {
        let mut router = Router::new();
        assert!(matches!(router.begin(job(), "a"), Err(ScanError::LibraryNotReady)));
        assert_eq!(router.pending(), 0);
        assert!(router.mark_ready());
        assert!(!router.mark_ready());
        assert!(router.begin(job(), "a").is_ok());
    }

    #[test]
    fn replies_reach_their_own_waiter() {
        let mut router = ready();
        let first = router.begin(job(), "first").unwrap().generation;
        let second = router.begin(job(), "second").unwrap().generation;
        assert_ne!(first, second);

        let (waiter, outcome) = router.deliver(done(second), Some(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(waiter, "second");
        let encoded = router.settle(second, Some(outcome)).unwrap().unwrap();
        assert_eq!(encoded.bytes, vec![1, 2, 3, 4]);
        assert_eq!(encoded.dimensions, Dimensions::new(2, 3));

        let (waiter, outcome) = router.deliver(done(first), Some(vec![9])).unwrap();
        assert_eq!(waiter, "first");
        assert!(router.settle(first, Some(outcome)).unwrap().is_none());
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn unknown_generations_are_dropped() {
        let mut router = ready();
        router.begin(job(), "a").unwrap();
        assert!(router.deliver(done(99), Some(vec![1])).is_none());
        assert_eq!(router.pending(), 1);
    }

    #[test]
    fn done_without_bytes_is_an_error() {
        let mut router = ready();
        let generation = router.begin(job(), "a").unwrap().generation;
        let (_, outcome) = router.deliver(done(generation), None).unwrap();
        assert!(matches!(
            router.settle(generation, Some(outcome)),
            Err(ScanError::Encode(_))
        ));
    }

    #[test]
    fn job_errors_reach_the_newest_caller() {
        let mut router = ready();
        let generation = router.begin(job(), "a").unwrap().generation;
        let failed = JobResponse::Failed {
            generation,
            error: ScanError::DegenerateTransform("blank output".into()),
        };
        let (_, outcome) = router.deliver(failed, None).unwrap();
        assert!(matches!(
            router.settle(generation, Some(outcome)),
            Err(ScanError::DegenerateTransform(_))
        ));
    }

    #[test]
    fn timeout_abandons_everything_and_needs_a_new_ready() {
        let mut router = ready();
        let slow = router.begin(job(), "slow").unwrap().generation;
        router.begin(job(), "other").unwrap();

        let (error, abandoned) = router.time_out(slow, Duration::from_secs(30));
        assert!(matches!(error, ScanError::ResourceTimeout { seconds: 30 }));
        assert_eq!(abandoned, vec!["other"]);
        assert_eq!(router.pending(), 0);
        assert!(!router.is_ready());

        // A late reply from the killed worker goes nowhere.
        assert!(router.deliver(done(slow), Some(vec![1])).is_none());
        assert!(matches!(router.begin(job(), "next"), Err(ScanError::LibraryNotReady)));
        assert!(router.mark_ready());
    }

    #[test]
    fn cancel_supersedes_in_flight_results() {
        let mut router = ready();
        let generation = router.begin(job(), "a").unwrap().generation;
        assert_eq!(router.cancel(), vec!["a"]);
        assert!(router.settle(generation, None).unwrap().is_none());
        let late = Encoded::new(vec![1], OutputFormat::Png, Dimensions::new(1, 1));
        assert!(router.settle(generation, Some(Ok(late))).unwrap().is_none());
    }

    #[test]
    fn worker_error_fails_every_waiter() {
        let mut router = ready();
        router.begin(job(), "a").unwrap();
        router.begin(job(), "b").unwrap();
        let failed = router.fail_all("worker error: boom");
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|(_, o)| matches!(o, Err(ScanError::Encode(m)) if m.contains("boom"))));
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn messages_decode_from_their_parts() {
        assert!(matches!(WorkerMessage::decode(true, None, None), Ok(WorkerMessage::Ready)));
        let json = serde_json::to_string(&done(7)).unwrap();
        let message = WorkerMessage::decode(false, Some(&json), Some(vec![0])).unwrap();
        assert!(matches!(
            message,
            WorkerMessage::Reply { ref response, bytes: Some(_) } if response.generation() == 7
        ));
        assert!(WorkerMessage::decode(false, None, None).is_err());
        assert!(WorkerMessage::decode(false, Some("{\"status\":\"nope\"}"), None).is_err());
    }

    #[test]
    fn passthrough_returns_input_bytes() {
        let img = RgbImage::new(5, 3);
        let png = flatscan_core::codec::encode(
            &img,
            &OutputSettings {
                format: OutputFormat::Png,
                ..OutputSettings::default()
            },
        )
        .unwrap()
        .bytes;
        let encoded = passthrough(&png).unwrap();
        assert_eq!(encoded.bytes, png);
        assert_eq!(encoded.format, OutputFormat::Png);
        assert_eq!(encoded.dimensions, Dimensions::new(5, 3));
        assert!(passthrough(b"not an image").is_err());
    }
}
