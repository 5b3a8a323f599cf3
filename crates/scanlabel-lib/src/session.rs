//! Labeling session: one frame cursor over a scan log, one record store, and
//! the request flags a front end raises between ticks.

use crate::config::SessionConfig;
use crate::features::FeatureExtractor;
use crate::io::FrameSource;
use crate::scan::{is_valid_label, Extraction, FeatureRow, Point, Rect, Segment};
use crate::store::{RecordKind, RecordStore, StoreError};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Minimum spacing between two accepted save requests.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(100);

pub const SUPPORTED_HZ: [usize; 2] = [360, 720];

#[derive(Debug, Default, Clone, Copy)]
struct Requests {
    clean: bool,
    load: bool,
    refresh: bool,
    save: bool,
}

/// Transient labeling switches, reset by a clean.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct Toggles {
    pub auto_label: bool,
    pub selection: Option<Rect>,
    pub nearest: bool,
    pub enter_save: bool,
}

/// Frame-rate gate for auto play and replay.
#[derive(Debug, Clone)]
pub struct Playback {
    pub fps: u32,
    pub auto_play: bool,
    pub replay: bool,
    last_advance: Option<Instant>,
}

impl Playback {
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            auto_play: false,
            replay: false,
            last_advance: None,
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }

    /// Advance `frame` when a playback period has elapsed. Returns true when
    /// the frame changed.
    fn poll(&mut self, now: Instant, frame: &mut usize, frame_count: usize) -> bool {
        if !self.auto_play || frame_count == 0 {
            return false;
        }
        let due = self
            .last_advance
            .map_or(true, |t| now.saturating_duration_since(t) > self.interval());
        if !due {
            return false;
        }
        self.last_advance = Some(now);
        if *frame + 1 < frame_count {
            *frame += 1;
            true
        } else if self.replay && *frame != 0 {
            *frame = 0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub frame: usize,
    pub frame_count: usize,
    pub hz: usize,
    pub segments: usize,
    pub labels: Vec<i32>,
    pub written_max_frame: Option<usize>,
    pub frames_written: usize,
    pub last_saved_frame: Option<usize>,
    pub toggles: Toggles,
}

pub struct LabelingSession<S, E> {
    config: SessionConfig,
    config_path: Option<PathBuf>,
    source: S,
    extractor: E,
    store: RecordStore,
    frame: usize,
    extraction: Extraction,
    labels: Vec<i32>,
    requests: Requests,
    playback: Playback,
    toggles: Toggles,
    last_save_request: Option<Instant>,
    last_saved_frame: Option<usize>,
}

impl<S: FrameSource, E: FeatureExtractor> LabelingSession<S, E> {
    /// Open the record store for the frames `source` already exposes.
    ///
    /// The store keeps at least `written_max_frame + 1` slots, and extends
    /// further if its size files hold later records, so records written at
    /// another HZ stay addressable.
    pub fn open(
        config: SessionConfig,
        config_path: Option<PathBuf>,
        source: S,
        extractor: E,
    ) -> Result<Self> {
        let kept = config.written_max_frame.map_or(0, |f| f + 1);
        let max_frame = source.frame_count().max(kept);
        let store = RecordStore::open(config.store_paths(), max_frame)
            .context("opening record store")?;
        let playback = Playback::new(config.fps);
        let last_saved_frame = config.last_saved_frame;
        Ok(Self {
            config,
            config_path,
            source,
            extractor,
            store,
            frame: 0,
            extraction: Extraction::default(),
            labels: Vec::new(),
            requests: Requests {
                refresh: true,
                ..Requests::default()
            },
            playback,
            toggles: Toggles::default(),
            last_save_request: None,
            last_saved_frame,
        })
    }

    pub fn request_clean(&mut self) {
        self.requests.clean = true;
    }

    pub fn request_load(&mut self) {
        self.requests.load = true;
    }

    pub fn request_refresh(&mut self) {
        self.requests.refresh = true;
    }

    /// Ask for the current labels to be saved on the next tick. Requests
    /// closer than [`SAVE_DEBOUNCE`] to the last accepted one are dropped.
    pub fn request_save(&mut self, now: Instant) -> bool {
        if let Some(prev) = self.last_save_request {
            if now.saturating_duration_since(prev) <= SAVE_DEBOUNCE {
                debug!("save request ignored (debounce)");
                return false;
            }
        }
        self.last_save_request = Some(now);
        self.requests.save = true;
        true
    }

    /// Enter-key save, honoured only while the enter toggle is on.
    pub fn enter_pressed(&mut self, now: Instant) -> bool {
        self.toggles.enter_save && self.request_save(now)
    }

    /// Evaluate pending requests: playback, clean, load, refresh, auto-label, save.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        let frame_count = self.source.frame_count();
        if self.playback.poll(now, &mut self.frame, frame_count) {
            self.requests.refresh = true;
        }
        if std::mem::take(&mut self.requests.clean) {
            self.clean()?;
            self.requests.refresh = true;
        }
        if std::mem::take(&mut self.requests.load) {
            self.load()?;
            self.requests.refresh = true;
        }
        let refreshed = std::mem::take(&mut self.requests.refresh);
        if refreshed {
            self.refresh()?;
        }
        if refreshed && self.toggles.auto_label && self.auto_label() {
            self.requests.save = true;
        }
        if std::mem::take(&mut self.requests.save) {
            self.save()?;
        }
        Ok(())
    }

    fn clean(&mut self) -> Result<()> {
        self.store.clean().context("cleaning record store")?;
        for path in [&self.config.feature_export, &self.config.label_export] {
            if path.exists() {
                File::create(path).with_context(|| format!("truncating {}", path.display()))?;
            }
        }
        self.frame = 0;
        self.labels.clear();
        self.extraction = Extraction::default();
        self.last_saved_frame = None;
        self.toggles = Toggles::default();
        info!("session cleaned");
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        self.clean()?;
        let raw = self.config.raw_data.clone();
        let frames = self
            .source
            .open(&raw, self.config.hz)
            .with_context(|| format!("loading {}", raw.display()))?;
        self.store.resize(frames).context("resizing record store")?;
        info!("loaded {} ({frames} frames)", raw.display());
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        if self.frame >= self.source.frame_count() {
            self.extraction = Extraction::default();
            self.labels.clear();
            return Ok(());
        }
        let points = self.source.read_frame(self.frame)?;
        self.extraction = self.extractor.extract(&points);
        self.labels = vec![0; self.extraction.segment_count()];
        if self.frame >= self.store.max_frame() {
            return Ok(());
        }
        match self.store.get_checked(self.frame, self.labels.len()) {
            Ok(Some(stored)) => self.labels = stored,
            Ok(None) => {}
            Err(err @ StoreError::SizeMismatch { .. }) => {
                warn!("{err}; discarding stored labels");
            }
            Err(err) => return Err(err).context("reading stored labels"),
        }
        debug!(
            "frame {}: {} segments, {} labeled",
            self.frame,
            self.labels.len(),
            self.labels.iter().filter(|&&l| l != 0).count()
        );
        Ok(())
    }

    fn auto_label(&mut self) -> bool {
        let mut applied = false;
        if let Some(rect) = self.toggles.selection {
            self.mark_in_rect(rect);
            applied = true;
        }
        if self.toggles.nearest {
            if let Some(i) = self.nearest_segment() {
                self.labels[i] = 1;
                applied = true;
            }
        }
        applied && !self.labels.is_empty()
    }

    fn save(&mut self) -> Result<()> {
        match self
            .store
            .put(self.frame, &self.extraction.features, &self.labels)
        {
            Ok(()) => {
                self.last_saved_frame = Some(self.frame);
                Ok(())
            }
            Err(err) if err.is_recoverable() => {
                warn!("save skipped: {err}");
                Ok(())
            }
            Err(err) => Err(err).context("saving labels"),
        }
    }

    pub fn set_frame(&mut self, frame: usize) -> Result<()> {
        let count = self.source.frame_count();
        if frame >= count {
            bail!("frame {frame} out of range ({count} frames)");
        }
        self.frame = frame;
        self.requests.refresh = true;
        Ok(())
    }

    pub fn step_forward(&mut self) {
        if self.frame + 1 < self.source.frame_count() {
            self.frame += 1;
            self.requests.refresh = true;
        }
    }

    pub fn step_back(&mut self) {
        if self.frame > 0 {
            self.frame -= 1;
            self.requests.refresh = true;
        }
    }

    /// Switch samples per frame. Existing records are kept; frames whose
    /// segment count no longer matches are discarded when visited.
    pub fn set_hz(&mut self, hz: usize) -> Result<usize> {
        if !SUPPORTED_HZ.contains(&hz) {
            bail!("unsupported HZ {hz}, expected one of {SUPPORTED_HZ:?}");
        }
        let frames = self.source.set_hz(hz);
        self.store.grow(frames).context("growing record store")?;
        self.config.hz = hz;
        self.frame = 0;
        self.requests.refresh = true;
        info!("switched to {hz} Hz ({frames} frames)");
        Ok(frames)
    }

    /// Flip the label of every segment owning a point within `mouse_area` of
    /// `at` on both axes. Returns the toggled segment indices.
    pub fn toggle_at(&mut self, at: Point) -> Vec<usize> {
        let area = self.config.mouse_area;
        let hit = |p: &Point| (p[0] - at[0]).abs() < area && (p[1] - at[1]).abs() < area;
        let toggled: Vec<usize> = self
            .extraction
            .segments
            .iter()
            .enumerate()
            .filter(|(_, seg)| seg.points.iter().any(hit))
            .map(|(i, _)| i)
            .collect();
        for &i in &toggled {
            self.labels[i] = if self.labels[i] == 1 { 0 } else { 1 };
        }
        toggled
    }

    /// Label 1 every segment with a point strictly inside `rect`.
    pub fn mark_in_rect(&mut self, rect: Rect) -> usize {
        let mut marked = 0;
        for (i, seg) in self.extraction.segments.iter().enumerate() {
            if seg.points.iter().any(|p| rect.contains(*p)) {
                self.labels[i] = 1;
                marked += 1;
            }
        }
        marked
    }

    /// Index of the segment whose centroid is closest to the sensor.
    pub fn nearest_segment(&self) -> Option<usize> {
        self.extraction
            .segments
            .iter()
            .map(|seg| {
                let c = seg.centroid();
                (c[0] * c[0] + c[1] * c[1]).sqrt()
            })
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    pub fn set_labels(&mut self, labels: Vec<i32>) -> Result<()> {
        if labels.len() != self.labels.len() {
            bail!(
                "frame {} has {} segments, got {} labels",
                self.frame,
                self.labels.len(),
                labels.len()
            );
        }
        if let Some((i, v)) = labels.iter().enumerate().find(|(_, v)| !is_valid_label(**v)) {
            bail!("segment {i}: label {v} is not 0 or 1");
        }
        self.labels = labels;
        Ok(())
    }

    pub fn set_label(&mut self, segment: usize, value: i32) -> Result<()> {
        if !is_valid_label(value) {
            bail!("segment {segment}: label {value} is not 0 or 1");
        }
        let count = self.labels.len();
        let slot = self
            .labels
            .get_mut(segment)
            .with_context(|| format!("segment {segment} out of range ({count} segments)"))?;
        *slot = value;
        Ok(())
    }

    /// Write the feature and label text exports. Returns the line counts.
    pub fn export(&mut self) -> Result<(usize, usize)> {
        let features = self
            .store
            .export_to_path(RecordKind::Features, &self.config.feature_export)
            .context("exporting features")?;
        let labels = self
            .store
            .export_to_path(RecordKind::Labels, &self.config.label_export)
            .context("exporting labels")?;
        Ok((features, labels))
    }

    /// Persist counters and settings. The store's spill files go with it.
    pub fn close(mut self) -> Result<SessionConfig> {
        self.sync_config();
        if let Some(path) = &self.config_path {
            self.config.save(path)?;
            info!("session state written to {}", path.display());
        }
        Ok(self.config)
    }

    fn sync_config(&mut self) {
        self.config.fps = self.playback.fps;
        self.config.last_saved_frame = self.last_saved_frame;
        self.config.written_max_frame = self.store.written_max_frame();
        self.config.frames_written = self.store.frames_written();
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            frame: self.frame,
            frame_count: self.source.frame_count(),
            hz: self.source.hz(),
            segments: self.extraction.segment_count(),
            labels: self.labels.clone(),
            written_max_frame: self.store.written_max_frame(),
            frames_written: self.store.frames_written(),
            last_saved_frame: self.last_saved_frame,
            toggles: self.toggles,
        }
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn frame_count(&self) -> usize {
        self.source.frame_count()
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn segments(&self) -> &[Segment] {
        &self.extraction.segments
    }

    pub fn features(&self) -> &[FeatureRow] {
        &self.extraction.features
    }

    pub fn last_saved_frame(&self) -> Option<usize> {
        self.last_saved_frame
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    pub fn toggles(&self) -> &Toggles {
        &self.toggles
    }

    pub fn toggles_mut(&mut self) -> &mut Toggles {
        &mut self.toggles
    }

    pub fn playback_mut(&mut self) -> &mut Playback {
        &mut self.playback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SegmentFeatures;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Frames held in memory. Every frame carries its own layout.
    struct MemorySource {
        samples: Vec<Point>,
        hz: usize,
    }

    impl MemorySource {
        fn new(frames: Vec<Vec<Point>>) -> Self {
            let hz = frames.first().map_or(1, Vec::len);
            Self {
                samples: frames.into_iter().flatten().collect(),
                hz,
            }
        }
    }

    impl FrameSource for MemorySource {
        fn open(&mut self, _raw: &Path, hz: usize) -> Result<usize> {
            self.hz = hz;
            Ok(self.frame_count())
        }

        fn frame_count(&self) -> usize {
            self.samples.len() / self.hz
        }

        fn hz(&self) -> usize {
            self.hz
        }

        fn set_hz(&mut self, hz: usize) -> usize {
            self.hz = hz;
            self.frame_count()
        }

        fn read_frame(&mut self, frame: usize) -> Result<Vec<Point>> {
            let start = frame * self.hz;
            Ok(self.samples[start..start + self.hz].to_vec())
        }
    }

    /// Frame with `n` well separated two-point segments, the k-th at distance k+1.
    fn frame(n: usize, width: usize) -> Vec<Point> {
        let mut pts: Vec<Point> = (0..n)
            .flat_map(|k| {
                let x = k as f64 + 1.0;
                [[x, 0.5], [x + 0.01, 0.5]]
            })
            .collect();
        pts.resize(width, [0.0, 0.0]);
        pts
    }

    fn session(frames: Vec<Vec<Point>>) -> (TempDir, LabelingSession<MemorySource, SegmentFeatures>) {
        let dir = tempdir().unwrap();
        let config = SessionConfig::default_in(dir.path());
        let s = LabelingSession::open(
            config,
            Some(dir.path().join("scanlabel.toml")),
            MemorySource::new(frames),
            SegmentFeatures::default(),
        )
        .unwrap();
        (dir, s)
    }

    #[test]
    fn refresh_then_save_roundtrips_labels() {
        let (_dir, mut s) = session(vec![frame(3, 8), frame(2, 8)]);
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        assert_eq!(s.labels(), &[0, 0, 0]);

        s.set_labels(vec![1, 0, 1]).unwrap();
        assert!(s.request_save(t0));
        s.tick(t0).unwrap();
        assert_eq!(s.last_saved_frame(), Some(0));

        s.step_forward();
        s.tick(t0).unwrap();
        assert_eq!(s.labels(), &[0, 0]);
        s.step_back();
        s.tick(t0).unwrap();
        assert_eq!(s.labels(), &[1, 0, 1]);
        assert_eq!(s.store().frames_written(), 1);
    }

    #[test]
    fn non_binary_labels_are_rejected() {
        let (_dir, mut s) = session(vec![frame(2, 8)]);
        s.tick(Instant::now()).unwrap();
        assert!(s.set_labels(vec![1, 2]).is_err());
        assert!(s.set_labels(vec![-1, 0]).is_err());
        assert!(s.set_label(0, 7).is_err());
        assert_eq!(s.labels(), &[0, 0]);
        s.set_label(1, 1).unwrap();
        assert_eq!(s.labels(), &[0, 1]);
    }

    #[test]
    fn save_requests_are_debounced() {
        let (_dir, mut s) = session(vec![frame(1, 4)]);
        let t0 = Instant::now();
        assert!(s.request_save(t0));
        assert!(!s.request_save(t0 + Duration::from_millis(50)));
        assert!(s.request_save(t0 + Duration::from_millis(150)));
    }

    #[test]
    fn enter_save_needs_toggle() {
        let (_dir, mut s) = session(vec![frame(1, 4)]);
        let t0 = Instant::now();
        assert!(!s.enter_pressed(t0));
        s.toggles_mut().enter_save = true;
        assert!(s.enter_pressed(t0));
    }

    #[test]
    fn stale_labels_are_discarded_on_segment_change() {
        let (_dir, mut s) = session(vec![frame(2, 8)]);
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        s.set_labels(vec![1, 1]).unwrap();
        s.request_save(t0);
        s.tick(t0).unwrap();

        s.store_mut().clean().unwrap();
        s.store_mut().put(0, &[[0.0; 10]; 3], &[1, 1, 1]).unwrap();
        s.request_refresh();
        s.tick(t0).unwrap();
        assert_eq!(s.labels(), &[0, 0]);
    }

    #[test]
    fn auto_label_rect_and_nearest() {
        let (_dir, mut s) = session(vec![frame(3, 8), frame(3, 8)]);
        let t0 = Instant::now();
        s.toggles_mut().auto_label = true;
        s.toggles_mut().selection = Some(Rect::from_corners([2.5, 0.0], [3.5, 1.0]));
        s.tick(t0).unwrap();
        assert_eq!(s.labels(), &[0, 0, 1]);
        assert_eq!(s.store().frames_written(), 1);

        s.toggles_mut().selection = None;
        s.toggles_mut().nearest = true;
        s.step_forward();
        s.tick(t0).unwrap();
        assert_eq!(s.labels(), &[1, 0, 0]);
        assert_eq!(s.store().frames_written(), 2);
    }

    #[test]
    fn toggle_flips_segment_under_cursor() {
        let (_dir, mut s) = session(vec![frame(2, 8)]);
        s.tick(Instant::now()).unwrap();
        assert_eq!(s.toggle_at([2.02, 0.52]), vec![1]);
        assert_eq!(s.labels(), &[0, 1]);
        s.toggle_at([2.0, 0.5]);
        assert_eq!(s.labels(), &[0, 0]);
        assert!(s.toggle_at([9.0, 9.0]).is_empty());
    }

    #[test]
    fn nearest_segment_by_centroid() {
        let (_dir, mut s) = session(vec![frame(3, 8)]);
        s.tick(Instant::now()).unwrap();
        assert_eq!(s.nearest_segment(), Some(0));
    }

    #[test]
    fn clean_resets_session_and_exports() {
        let (dir, mut s) = session(vec![frame(2, 8), frame(2, 8)]);
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        s.set_labels(vec![1, 0]).unwrap();
        s.request_save(t0);
        s.toggles_mut().nearest = true;
        s.tick(t0).unwrap();
        s.export().unwrap();
        assert!(std::fs::metadata(dir.path().join("label_data.txt")).unwrap().len() > 0);

        s.set_frame(1).unwrap();
        s.request_clean();
        s.tick(t0).unwrap();
        assert_eq!(s.frame(), 0);
        assert_eq!(s.labels(), &[0, 0]);
        assert_eq!(s.last_saved_frame(), None);
        assert_eq!(s.toggles(), &Toggles::default());
        assert_eq!(s.store().frames_written(), 0);
        assert_eq!(std::fs::metadata(dir.path().join("label_data.txt")).unwrap().len(), 0);
    }

    #[test]
    fn load_resizes_store() {
        let (_dir, mut s) = session(vec![frame(1, 4), frame(1, 4)]);
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        s.request_save(t0);
        s.tick(t0).unwrap();
        s.config_mut().hz = 2;
        s.request_load();
        s.tick(t0).unwrap();
        assert_eq!(s.frame_count(), 4);
        assert_eq!(s.store().max_frame(), 4);
        assert_eq!(s.store().frames_written(), 0);
    }

    #[test]
    fn hz_switch_keeps_records_and_rejects_odd_rates() {
        let frames: Vec<Vec<Point>> = (0..4).map(|_| frame(2, 360)).collect();
        let (_dir, mut s) = session(frames);
        let t0 = Instant::now();
        s.set_frame(3).unwrap();
        s.tick(t0).unwrap();
        s.request_save(t0);
        s.tick(t0).unwrap();

        assert!(s.set_hz(500).is_err());
        assert_eq!(s.set_hz(720).unwrap(), 2);
        assert_eq!(s.frame(), 0);
        assert_eq!(s.store().max_frame(), 4);
        assert!(s.store().is_written(3));
        assert_eq!(s.set_hz(360).unwrap(), 4);
    }

    #[test]
    fn playback_advances_at_fps_and_replays() {
        let (_dir, mut s) = session(vec![frame(1, 4); 3]);
        let t0 = Instant::now();
        s.playback_mut().fps = 10;
        s.playback_mut().auto_play = true;
        s.playback_mut().replay = true;
        s.tick(t0).unwrap();
        assert_eq!(s.frame(), 1);
        s.tick(t0 + Duration::from_millis(50)).unwrap();
        assert_eq!(s.frame(), 1);
        s.tick(t0 + Duration::from_millis(200)).unwrap();
        assert_eq!(s.frame(), 2);
        s.tick(t0 + Duration::from_millis(400)).unwrap();
        assert_eq!(s.frame(), 0);
    }

    #[test]
    fn close_persists_counters() {
        let (dir, mut s) = session(vec![frame(1, 4), frame(1, 4)]);
        let t0 = Instant::now();
        s.set_frame(1).unwrap();
        s.tick(t0).unwrap();
        s.request_save(t0);
        s.tick(t0).unwrap();
        let config = s.close().unwrap();
        assert_eq!(config.written_max_frame, Some(1));
        assert_eq!(config.frames_written, 1);

        let reloaded = SessionConfig::load(&dir.path().join("scanlabel.toml")).unwrap();
        assert_eq!(reloaded.last_saved_frame, Some(1));
    }
}
