use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::analysis::calibration::Calibration;
use crate::analysis::notice::NoticeKind;
use crate::analysis::request::{AnalysisOutcome, AnalysisRequest};
use crate::config::Configuration;
use crate::engine::message::{is_marker_not_found, EngineJob, RawAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Idle,
    /// The queue head has been handed to the engine.
    Head,
    /// A job was sent but its request was cleared; its reply is discarded.
    Abandoned,
}

/// What the caller must do after the coordinator handled an engine error.
#[derive(Debug, Default)]
pub struct ErrorStep {
    pub dispatch: Option<EngineJob>,
    pub notice: Option<NoticeKind>,
}

/// Bounded FIFO in front of the single-job engine.
///
/// Never talks to the engine itself: every operation returns the job that has
/// to be dispatched next, if any, so at most one job is ever outstanding.
pub struct RequestCoordinator {
    queue: VecDeque<AnalysisRequest>,
    capacity: usize,
    max_attempts: u32,
    calibration: Calibration,
    ready: bool,
    in_flight: InFlight,
}

impl RequestCoordinator {
    pub fn new(capacity: usize, max_attempts: u32, calibration: Calibration) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            max_attempts,
            calibration,
            ready: false,
            in_flight: InFlight::Idle,
        }
    }

    pub fn from_configuration(configuration: &Configuration) -> Self {
        Self::new(
            configuration.max_queue_size,
            configuration.max_attempts,
            configuration.calibration(),
        )
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight != InFlight::Idle
    }

    /// Queues a request, or fails it right away when the queue is full.
    pub fn submit(&mut self, request: AnalysisRequest) -> Option<EngineJob> {
        if self.queue.len() >= self.capacity {
            warn!(
                "Analysis queue full ({} pending), rejecting {} request {}",
                self.queue.len(),
                request.origin,
                request.id
            );
            request.resolve(AnalysisOutcome::failed());
            return None;
        }
        debug!(
            "Queued {} request {} ({:?}), depth {}",
            request.origin,
            request.id,
            request.kind,
            self.queue.len() + 1
        );
        self.queue.push_back(request);
        if self.ready && self.queue.len() == 1 {
            return self.dispatch_head();
        }
        None
    }

    pub fn on_channel_ready(&mut self) -> Option<EngineJob> {
        self.ready = true;
        self.dispatch_head()
    }

    /// The engine went away. Pending requests, including one that was in
    /// flight, wait for the next channel to become ready.
    pub fn on_channel_lost(&mut self) {
        self.ready = false;
        self.in_flight = InFlight::Idle;
    }

    pub fn on_engine_result(&mut self, raw: RawAnalysis) -> Option<EngineJob> {
        match self.in_flight {
            InFlight::Idle => {
                warn!("Ignoring engine result with no request in flight");
                return None;
            }
            InFlight::Abandoned => {
                debug!("Discarding result for a cleared request");
                self.in_flight = InFlight::Idle;
                return self.dispatch_head();
            }
            InFlight::Head => {}
        }
        self.in_flight = InFlight::Idle;
        if let Some(request) = self.queue.pop_front() {
            let area_cm2 = self.calibration.square_cm(raw.area, raw.px_per_cell);
            info!(
                "Request {} measured {:.4} cm² ({} contour points)",
                request.id, area_cm2, raw.contour_count
            );
            request.resolve(AnalysisOutcome {
                area_cm2,
                contour: raw.contour,
                contour_count: raw.contour_count,
                marker_found: raw.marker_found,
            });
        }
        self.dispatch_head()
    }

    pub fn on_engine_error(&mut self, message: &str) -> ErrorStep {
        match self.in_flight {
            InFlight::Idle => {
                warn!(
                    "Ignoring engine error with no request in flight: {}",
                    message
                );
                return ErrorStep::default();
            }
            InFlight::Abandoned => {
                self.in_flight = InFlight::Idle;
                return ErrorStep {
                    dispatch: self.dispatch_head(),
                    notice: None,
                };
            }
            InFlight::Head => {}
        }
        self.in_flight = InFlight::Idle;

        let Some(head) = self.queue.front_mut() else {
            return ErrorStep::default();
        };
        if is_marker_not_found(message) {
            warn!("Request {}: calibration marker not found", head.id);
            return self.fail_head(NoticeKind::MarkerNotFound);
        }

        head.attempts += 1;
        if head.attempts < self.max_attempts {
            warn!(
                "Request {} failed attempt {}/{}: {}",
                head.id, head.attempts, self.max_attempts, message
            );
            return ErrorStep {
                dispatch: self.dispatch_head(),
                notice: None,
            };
        }
        warn!(
            "Request {} gave up after {} attempts: {}",
            head.id, head.attempts, message
        );
        self.fail_head(NoticeKind::ProcessingFailed)
    }

    /// Drops every queued request without resolving it. Teardown only.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        if self.in_flight == InFlight::Head {
            self.in_flight = InFlight::Abandoned;
        }
        dropped
    }

    fn fail_head(&mut self, notice: NoticeKind) -> ErrorStep {
        if let Some(request) = self.queue.pop_front() {
            request.resolve(AnalysisOutcome::failed());
        }
        ErrorStep {
            dispatch: self.dispatch_head(),
            notice: Some(notice),
        }
    }

    fn dispatch_head(&mut self) -> Option<EngineJob> {
        if !self.ready || self.in_flight != InFlight::Idle {
            return None;
        }
        let head = self.queue.front()?;
        debug!(
            "Dispatching request {} (attempt {})",
            head.id,
            head.attempts + 1
        );
        self.in_flight = InFlight::Head;
        Some(EngineJob::new(
            head.payload.clone(),
            self.calibration.cell_size_px,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::payload::ImagePayload;
    use crate::analysis::request::{AnalysisKind, RequestOrigin};
    use crate::common::Point;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn request(tag: &str) -> (AnalysisRequest, oneshot::Receiver<AnalysisOutcome>) {
        let (responder, outcome) = oneshot::channel();
        let payload = ImagePayload::new(tag.to_string(), 640, 480);
        (
            AnalysisRequest::new(
                payload,
                AnalysisKind::Area,
                RequestOrigin::Capture,
                responder,
            ),
            outcome,
        )
    }

    fn raw(area: f64, px_per_cell: f64) -> RawAnalysis {
        RawAnalysis {
            area,
            px_per_cell,
            contour: vec![
                Point::new(0.0, 0.0),
                Point::new(5.0, 0.0),
                Point::new(0.0, 5.0),
            ],
            contour_count: 3,
            marker_found: true,
        }
    }

    fn coordinator() -> RequestCoordinator {
        RequestCoordinator::new(3, 5, Calibration::default())
    }

    fn tag(job: &EngineJob) -> &str {
        &job.payload.base64
    }

    #[test]
    fn queued_before_ready_dispatches_on_ready() {
        let mut coordinator = coordinator();
        let (first, _first_rx) = request("a");
        assert!(coordinator.submit(first).is_none());

        let job = coordinator.on_channel_ready().unwrap();
        assert_eq!(tag(&job), "a");
        assert_eq!(job.px_per_cell, 30);
        assert!(coordinator.is_in_flight());
    }

    #[test]
    fn submit_when_idle_and_ready_dispatches_immediately() {
        let mut coordinator = coordinator();
        assert!(coordinator.on_channel_ready().is_none());
        let (first, _rx) = request("a");
        assert_eq!(tag(&coordinator.submit(first).unwrap()), "a");

        let (second, _rx2) = request("b");
        assert!(coordinator.submit(second).is_none());
    }

    #[test]
    fn result_resolves_head_with_physical_area_and_dispatches_next() {
        let mut coordinator = coordinator();
        coordinator.on_channel_ready();
        let (first, mut first_rx) = request("a");
        let (second, _second_rx) = request("b");
        coordinator.submit(first);
        coordinator.submit(second);

        let next = coordinator.on_engine_result(raw(900.0, 30.0)).unwrap();
        assert_eq!(tag(&next), "b");

        let outcome = first_rx.try_recv().unwrap();
        assert!((outcome.area_cm2 - 0.25).abs() < 1e-12);
        assert_eq!(outcome.contour.len(), 3);
        assert_eq!(outcome.contour_count, 3);
        assert!(outcome.marker_found);
        assert_eq!(coordinator.len(), 1);
    }

    #[test]
    fn overflow_is_rejected_immediately() {
        let mut coordinator = coordinator();
        let mut receivers = Vec::new();
        for name in ["a", "b", "c"] {
            let (req, rx) = request(name);
            coordinator.submit(req);
            receivers.push(rx);
        }
        let (overflow, mut overflow_rx) = request("d");
        assert!(coordinator.submit(overflow).is_none());

        assert!(overflow_rx.try_recv().unwrap().is_failure());
        for rx in receivers.iter_mut() {
            assert!(rx.try_recv().is_err(), "queued requests stay pending");
        }
        assert_eq!(coordinator.len(), 3);
    }

    #[test]
    fn overflow_while_busy_is_never_dispatched() {
        let mut coordinator = coordinator();
        coordinator.on_channel_ready();
        let mut receivers = Vec::new();
        for name in ["a", "b", "c"] {
            let (req, rx) = request(name);
            coordinator.submit(req);
            receivers.push(rx);
        }
        let (overflow, mut overflow_rx) = request("d");
        coordinator.submit(overflow);
        assert!(overflow_rx.try_recv().unwrap().is_failure());

        let mut dispatched = Vec::new();
        while let Some(job) = coordinator.on_engine_result(raw(100.0, 10.0)) {
            dispatched.push(tag(&job).to_string());
        }
        assert_eq!(dispatched, vec!["b", "c"]);
    }

    #[test]
    fn transient_errors_retry_in_place_up_to_limit() {
        let mut coordinator = coordinator();
        coordinator.on_channel_ready();
        let (first, mut first_rx) = request("a");
        let (second, _second_rx) = request("b");
        let mut dispatches = vec![tag(&coordinator.submit(first).unwrap()).to_string()];
        coordinator.submit(second);

        for _ in 0..4 {
            let step = coordinator.on_engine_error("cv exception");
            assert!(step.notice.is_none());
            dispatches.push(tag(&step.dispatch.unwrap()).to_string());
            assert!(first_rx.try_recv().is_err());
        }
        assert_eq!(dispatches, vec!["a"; 5]);

        let step = coordinator.on_engine_error("cv exception");
        assert_eq!(step.notice, Some(NoticeKind::ProcessingFailed));
        assert_eq!(tag(&step.dispatch.unwrap()), "b");
        assert!(first_rx.try_recv().unwrap().is_failure());
    }

    #[test]
    fn marker_not_found_fails_after_single_dispatch() {
        let mut coordinator = coordinator();
        coordinator.on_channel_ready();
        let (first, mut first_rx) = request("a");
        coordinator.submit(first);

        let step = coordinator.on_engine_error("Marker not found");
        assert_eq!(step.notice, Some(NoticeKind::MarkerNotFound));
        assert!(step.dispatch.is_none());

        let outcome = first_rx.try_recv().unwrap();
        assert!(outcome.is_failure());
        assert!(!outcome.marker_found);
        assert!(outcome.contour.is_empty());
        assert!(coordinator.is_empty());
        assert!(!coordinator.is_in_flight());
    }

    #[test]
    fn at_most_one_request_in_flight() {
        let mut coordinator = coordinator();
        let mut jobs = 0;
        for name in ["a", "b", "c"] {
            let (req, _rx) = request(name);
            jobs += coordinator.submit(req).into_iter().count();
        }
        jobs += coordinator.on_channel_ready().into_iter().count();
        jobs += coordinator.on_channel_ready().into_iter().count();
        assert_eq!(jobs, 1);
    }

    #[test]
    fn stray_replies_are_ignored() {
        let mut coordinator = coordinator();
        let (first, mut first_rx) = request("a");
        coordinator.submit(first);

        assert!(coordinator.on_engine_result(raw(900.0, 30.0)).is_none());
        assert!(coordinator.on_engine_error("boom").dispatch.is_none());
        assert!(first_rx.try_recv().is_err());
        assert_eq!(coordinator.len(), 1);
    }

    #[test]
    fn lost_channel_keeps_queue_and_redispatches_head() {
        let mut coordinator = coordinator();
        coordinator.on_channel_ready();
        let (first, mut first_rx) = request("a");
        coordinator.submit(first);
        coordinator.on_engine_error("glitch");
        assert!(coordinator.is_in_flight());

        coordinator.on_channel_lost();
        assert!(!coordinator.is_ready());
        assert!(!coordinator.is_in_flight());
        assert!(first_rx.try_recv().is_err());

        let job = coordinator.on_channel_ready().unwrap();
        assert_eq!(tag(&job), "a");
    }

    #[test]
    fn clear_while_in_flight_discards_late_reply() {
        let mut coordinator = coordinator();
        coordinator.on_channel_ready();
        let (first, first_rx) = request("a");
        coordinator.submit(first);
        assert_eq!(coordinator.clear(), 1);
        drop(first_rx);

        let (second, mut second_rx) = request("b");
        assert!(
            coordinator.submit(second).is_none(),
            "engine still holds the abandoned job"
        );

        let next = coordinator.on_engine_result(raw(900.0, 30.0)).unwrap();
        assert_eq!(tag(&next), "b");
        assert!(second_rx.try_recv().is_err());

        coordinator.on_engine_result(raw(900.0, 30.0));
        assert!((second_rx.try_recv().unwrap().area_cm2 - 0.25).abs() < 1e-12);
    }

    #[test]
    fn payload_is_shared_between_retries() {
        let mut coordinator = coordinator();
        coordinator.on_channel_ready();
        let (first, _rx) = request("a");
        let job = coordinator.submit(first).unwrap();
        let retry = coordinator.on_engine_error("glitch").dispatch.unwrap();
        assert!(Arc::ptr_eq(&job.payload, &retry.payload));
    }
}
