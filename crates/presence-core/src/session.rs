//! Sampling loop: frame source → recognizer → diff engine → notification sink.
//!
//! Strictly sequential. The stop flag is checked once per tick.

use chrono::NaiveDateTime;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::engine::PresenceDiffEngine;
use crate::store::{DailyRecordStore, IdentityStore};
use crate::types::{Detection, Label, PresenceDelta, Snapshot};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame source: {0}")]
    Source(String),
    #[error("recognizer: {0}")]
    Recognizer(String),
    #[error("notification sink: {0}")]
    Sink(String),
}

/// Supplies frames until the stream ends (`Ok(None)`).
pub trait FrameSource {
    type Frame;

    fn next_frame(&mut self) -> Result<Option<Self::Frame>, SessionError>;
}

/// Face detection and identification for one frame type.
pub trait Recognizer<F> {
    /// Cheap detection pass: how many faces are in the frame.
    fn count_faces(&mut self, frame: &F) -> Result<usize, SessionError>;

    /// Full recognition. Unmatched faces come back as [`Label::Unknown`].
    fn recognize(&mut self, frame: &F) -> Result<Vec<Detection>, SessionError>;
}

/// Receives non-empty deltas. Failures are logged and never stop the session.
pub trait NotificationSink {
    fn notify(&mut self, delta: &PresenceDelta) -> Result<(), SessionError>;
}

/// Decides whether a frame is worth a full recognition pass.
pub trait ChangeDetector {
    fn should_recognize(&mut self, face_count: usize) -> bool;

    /// Called once recognition of a frame with `face_count` faces succeeded.
    fn recognized(&mut self, _face_count: usize) {}
}

pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

impl<F: Fn() -> NaiveDateTime> Clock for F {
    fn now(&self) -> NaiveDateTime {
        self()
    }
}

/// Recognize only when the detected face count differs from the previous frame.
///
/// Lossy: one person leaving while another arrives in the same frame keeps
/// the count unchanged and goes unnoticed.
#[derive(Debug, Default)]
pub struct FaceCountChange {
    last: Option<usize>,
}

impl ChangeDetector for FaceCountChange {
    fn should_recognize(&mut self, face_count: usize) -> bool {
        self.last != Some(face_count)
    }

    /// Only a successful pass moves the baseline; a failed one is retried next frame.
    fn recognized(&mut self, face_count: usize) {
        self.last = Some(face_count);
    }
}

/// Recognize every frame.
#[derive(Debug, Default)]
pub struct EveryFrame;

impl ChangeDetector for EveryFrame {
    fn should_recognize(&mut self, _face_count: usize) -> bool {
        true
    }
}

/// Sink that writes deltas to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&mut self, delta: &PresenceDelta) -> Result<(), SessionError> {
        tracing::info!(
            at = %delta.at,
            entered = ?delta.entered,
            exited = ?delta.exited,
            anomalies = delta.anomalies.len(),
            "presence changed"
        );
        Ok(())
    }
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    EndOfStream,
    /// Frame or recognition failed; nothing was diffed.
    Skipped,
    /// Change detector saw nothing worth recognizing.
    Unchanged,
    Observed(PresenceDelta),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub recognitions: u64,
    pub skipped: u64,
    pub entered: u64,
    pub exited: u64,
    pub anomalies: u64,
}

pub struct PresenceSession<Src, R, S>
where
    Src: FrameSource,
{
    source: Src,
    recognizer: R,
    engine: PresenceDiffEngine<S>,
    change: Box<dyn ChangeDetector + Send>,
    sink: Box<dyn NotificationSink + Send>,
    clock: Box<dyn Clock + Send>,
    summary: SessionSummary,
}

impl<Src, R, S> PresenceSession<Src, R, S>
where
    Src: FrameSource,
    R: Recognizer<Src::Frame>,
    S: IdentityStore + DailyRecordStore,
{
    pub fn new(source: Src, recognizer: R, store: S) -> Self {
        Self {
            source,
            recognizer,
            engine: PresenceDiffEngine::new(store),
            change: Box::new(FaceCountChange::default()),
            sink: Box::new(LogSink),
            clock: Box::new(SystemClock),
            summary: SessionSummary::default(),
        }
    }

    pub fn with_change_detector(mut self, change: impl ChangeDetector + Send + 'static) -> Self {
        self.change = Box::new(change);
        self
    }

    pub fn with_sink(mut self, sink: impl NotificationSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn engine(&self) -> &PresenceDiffEngine<S> {
        &self.engine
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Process one frame.
    pub fn tick(&mut self) -> TickOutcome {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::EndOfStream,
            Err(err) => {
                tracing::warn!(error = %err, "frame unavailable; skipping tick");
                self.summary.skipped += 1;
                return TickOutcome::Skipped;
            }
        };
        self.summary.frames += 1;

        let face_count = match self.recognizer.count_faces(&frame) {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "face detection failed; skipping tick");
                self.summary.skipped += 1;
                return TickOutcome::Skipped;
            }
        };

        if !self.change.should_recognize(face_count) {
            return TickOutcome::Unchanged;
        }

        let detections = match self.recognizer.recognize(&frame) {
            Ok(d) => d,
            Err(err) => {
                tracing::warn!(error = %err, "recognition failed; skipping tick");
                self.summary.skipped += 1;
                return TickOutcome::Skipped;
            }
        };
        self.summary.recognitions += 1;
        self.change.recognized(face_count);

        let unknown = detections
            .iter()
            .filter(|d| d.label == Label::Unknown)
            .count();
        let snapshot = Snapshot::from_detections(&detections);
        tracing::debug!(faces = face_count, known = snapshot.len(), unknown, "recognized frame");

        let delta = self.engine.observe(snapshot, self.clock.now());
        self.summary.entered += delta.entered.len() as u64;
        self.summary.exited += delta.exited.len() as u64;
        self.summary.anomalies += delta.anomalies.len() as u64;

        if !delta.is_empty() {
            if let Err(err) = self.sink.notify(&delta) {
                tracing::warn!(error = %err, "notification sink failed");
            }
        }

        TickOutcome::Observed(delta)
    }

    /// Run until the source ends or `stop` is raised.
    pub fn run(&mut self, stop: &AtomicBool) -> SessionSummary {
        tracing::info!("presence session started");
        loop {
            if stop.load(Ordering::Relaxed) {
                tracing::info!("stop requested");
                break;
            }
            if let TickOutcome::EndOfStream = self.tick() {
                tracing::info!("end of stream");
                break;
            }
        }
        tracing::info!(
            frames = self.summary.frames,
            recognitions = self.summary.recognitions,
            entered = self.summary.entered,
            exited = self.summary.exited,
            anomalies = self.summary.anomalies,
            "presence session finished"
        );
        self.summary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::AnomalyKind;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Arc, Mutex};

    /// Each frame is the list of labels visible in it; `None` is an unknown face.
    type TestFrame = Vec<Option<&'static str>>;

    struct Script {
        frames: VecDeque<Result<TestFrame, SessionError>>,
    }

    impl Script {
        fn new(frames: Vec<TestFrame>) -> Self {
            Self { frames: frames.into_iter().map(Ok).collect() }
        }
    }

    impl FrameSource for Script {
        type Frame = TestFrame;

        fn next_frame(&mut self) -> Result<Option<TestFrame>, SessionError> {
            self.frames.pop_front().transpose()
        }
    }

    #[derive(Default)]
    struct Labels {
        calls: Arc<Mutex<u32>>,
    }

    impl Recognizer<TestFrame> for Labels {
        fn count_faces(&mut self, frame: &TestFrame) -> Result<usize, SessionError> {
            Ok(frame.len())
        }

        fn recognize(&mut self, frame: &TestFrame) -> Result<Vec<Detection>, SessionError> {
            *self.calls.lock().unwrap() += 1;
            Ok(frame
                .iter()
                .map(|l| Detection { label: l.map(String::from).into(), bbox: None })
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<PresenceDelta>>>);

    impl NotificationSink for Collect {
        fn notify(&mut self, delta: &PresenceDelta) -> Result<(), SessionError> {
            self.0.lock().unwrap().push(delta.clone());
            Ok(())
        }
    }

    struct Failing;

    impl NotificationSink for Failing {
        fn notify(&mut self, _delta: &PresenceDelta) -> Result<(), SessionError> {
            Err(SessionError::Sink("display closed".into()))
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    /// Clock that advances one minute per reading, starting at 09:00.
    fn ticking_clock() -> impl Clock + Send {
        let minute = Arc::new(AtomicU32::new(0));
        move || {
            let m = minute.fetch_add(1, Ordering::SeqCst);
            day().and_hms_opt(9, m, 0).unwrap()
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.register("Alice", "E1").unwrap();
        store.register("Bob", "E2").unwrap();
        store
    }

    #[test]
    fn test_run_to_end_of_stream() {
        let store = store();
        let sink = Collect::default();
        let frames = vec![
            vec![Some("Alice")],
            vec![Some("Alice"), Some("Bob")],
            vec![Some("Bob")],
            vec![],
        ];
        let mut session = PresenceSession::new(Script::new(frames), Labels::default(), &store)
            .with_sink(sink.clone())
            .with_clock(ticking_clock());

        let summary = session.run(&AtomicBool::new(false));
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.recognitions, 4);
        assert_eq!((summary.entered, summary.exited), (2, 2));

        let deltas = sink.0.lock().unwrap();
        assert_eq!(deltas.len(), 4);

        let records = store.find_all(day()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.entry_time.is_some() && r.exit_time.is_some()));
    }

    #[test]
    fn test_count_gate_skips_same_count() {
        let store = store();
        let labels = Labels::default();
        let calls = labels.calls.clone();
        // Alice swaps for Bob with the same face count: not detected.
        let frames = vec![vec![Some("Alice")], vec![Some("Alice")], vec![Some("Bob")]];
        let mut session = PresenceSession::new(Script::new(frames), labels, &store)
            .with_clock(ticking_clock());

        session.run(&AtomicBool::new(false));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(store.find_record(day(), "Bob").unwrap().is_none());
        assert_eq!(session.engine().previous().iter().collect::<Vec<_>>(), vec!["Alice"]);
    }

    #[test]
    fn test_every_frame_catches_substitution() {
        let store = store();
        let frames = vec![vec![Some("Alice")], vec![Some("Bob")]];
        let mut session = PresenceSession::new(Script::new(frames), Labels::default(), &store)
            .with_change_detector(EveryFrame)
            .with_clock(ticking_clock());

        let summary = session.run(&AtomicBool::new(false));
        assert_eq!(summary.recognitions, 2);
        let alice = store.find_record(day(), "Alice").unwrap().unwrap();
        assert!(alice.exit_time.is_some());
        assert!(store.find_record(day(), "Bob").unwrap().is_some());
    }

    #[test]
    fn test_unknown_faces_excluded() {
        let store = store();
        let sink = Collect::default();
        let frames = vec![vec![None, Some("Alice"), Some("unknown")], vec![None]];
        let mut session = PresenceSession::new(Script::new(frames), Labels::default(), &store)
            .with_sink(sink.clone())
            .with_clock(ticking_clock());

        session.run(&AtomicBool::new(false));
        for delta in sink.0.lock().unwrap().iter() {
            assert!(!delta.entered.contains("Unknown"));
            assert!(!delta.exited.contains("Unknown"));
            assert!(!delta.entered.contains("unknown"));
        }
        let names: Vec<_> = store.find_all(day()).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Alice".to_string()]);
    }

    #[test]
    fn test_sink_failure_does_not_abort() {
        let store = store();
        let frames = vec![vec![Some("Alice")], vec![]];
        let mut session = PresenceSession::new(Script::new(frames), Labels::default(), &store)
            .with_sink(Failing)
            .with_clock(ticking_clock());

        let summary = session.run(&AtomicBool::new(false));
        assert_eq!(summary.frames, 2);
        let alice = store.find_record(day(), "Alice").unwrap().unwrap();
        assert!(alice.exit_time.is_some());
    }

    #[test]
    fn test_source_error_skips_tick() {
        let store = store();
        let mut script = Script::new(vec![vec![Some("Alice")]]);
        script.frames.push_front(Err(SessionError::Source("usb reset".into())));
        let mut session = PresenceSession::new(script, Labels::default(), &store)
            .with_clock(ticking_clock());

        assert!(matches!(session.tick(), TickOutcome::Skipped));
        assert!(matches!(session.tick(), TickOutcome::Observed(_)));
        assert!(matches!(session.tick(), TickOutcome::EndOfStream));
        assert_eq!(session.summary().skipped, 1);
    }

    #[test]
    fn test_stop_flag_checked_before_tick() {
        let store = store();
        let mut session =
            PresenceSession::new(Script::new(vec![vec![Some("Alice")]]), Labels::default(), &store);
        let summary = session.run(&AtomicBool::new(true));
        assert_eq!(summary.frames, 0);
        assert!(store.partitions().unwrap().is_empty());
    }

    #[test]
    fn test_anomalies_reach_sink() {
        let store = store();
        let sink = Collect::default();
        // Mallory is recognized but was never registered.
        let frames = vec![vec![Some("Mallory")], vec![]];
        let mut session = PresenceSession::new(Script::new(frames), Labels::default(), &store)
            .with_sink(sink.clone())
            .with_clock(ticking_clock());

        let summary = session.run(&AtomicBool::new(false));
        assert_eq!(summary.anomalies, 2);
        let deltas = sink.0.lock().unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].anomalies[0].kind, AnomalyKind::Unregistered);
        assert_eq!(deltas[1].anomalies[0].kind, AnomalyKind::ExitWithoutEntry);
        assert!(store.find_all(day()).unwrap().is_empty());
    }

    #[test]
    fn test_face_count_change() {
        let mut gate = FaceCountChange::default();
        assert!(gate.should_recognize(0));
        gate.recognized(0);
        assert!(!gate.should_recognize(0));
        assert!(gate.should_recognize(2));
        gate.recognized(2);
        assert!(!gate.should_recognize(2));
        assert!(gate.should_recognize(1));
    }

    #[test]
    fn test_face_count_change_waits_for_success() {
        let mut gate = FaceCountChange::default();
        assert!(gate.should_recognize(1));
        // No `recognized` call: the pass failed, so the same count fires again.
        assert!(gate.should_recognize(1));
    }

    /// Fails the first `failures` recognition calls, then labels normally.
    struct Flaky {
        failures: u32,
        inner: Labels,
    }

    impl Recognizer<TestFrame> for Flaky {
        fn count_faces(&mut self, frame: &TestFrame) -> Result<usize, SessionError> {
            self.inner.count_faces(frame)
        }

        fn recognize(&mut self, frame: &TestFrame) -> Result<Vec<Detection>, SessionError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(SessionError::Recognizer("model timeout".into()));
            }
            self.inner.recognize(frame)
        }
    }

    #[test]
    fn test_recognizer_failure_retried_on_same_count() {
        let store = store();
        let frames = vec![vec![Some("Alice")]; 5];
        let recognizer = Flaky { failures: 1, inner: Labels::default() };
        let mut session = PresenceSession::new(Script::new(frames), recognizer, &store)
            .with_clock(ticking_clock());

        let summary = session.run(&AtomicBool::new(false));
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.recognitions, 1);
        assert_eq!(summary.entered, 1);
        let alice = store.find_record(day(), "Alice").unwrap().unwrap();
        assert_eq!(alice.entry_time, Some(day().and_hms_opt(9, 0, 0).unwrap().time()));
    }
}
