use crate::scan::Point;
use anyhow::{Context, Result};
use log::{debug, info};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Bytes per cached sample: two little-endian f64.
const SAMPLE_BYTES: u64 = 16;
/// Samples inspected when guessing whether a log holds (theta, r) pairs.
const POLAR_WINDOW: usize = 360;

/// Frame-addressable access to a scan recording.
pub trait FrameSource {
    /// Discover the frames in `raw` at `hz` samples per frame; returns the frame count.
    fn open(&mut self, raw: &Path, hz: usize) -> Result<usize>;
    fn frame_count(&self) -> usize;
    fn hz(&self) -> usize;
    /// Change samples per frame; returns the new frame count.
    fn set_hz(&mut self, hz: usize) -> usize;
    /// The `hz` points of `frame`, in Cartesian coordinates.
    fn read_frame(&mut self, frame: usize) -> Result<Vec<Point>>;
}

/// Parse one `x y` (or `theta r`) line. Blank and `#` lines yield `None`.
pub fn parse_sample_line(line: &str) -> Result<Option<Point>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut fields = trimmed.split_whitespace();
    let mut next = |name: &str| -> Result<f64> {
        fields
            .next()
            .with_context(|| format!("missing {name} column"))?
            .parse::<f64>()
            .with_context(|| format!("{name} is not f64"))
    };
    let a = next("first")?;
    let b = next("second")?;
    Ok(Some([a, b]))
}

/// True when the leading samples step their first column by 0.5 or 1 degree,
/// i.e. the log stores polar `(theta_deg, r)` pairs.
pub fn looks_polar(samples: &[Point]) -> bool {
    let head = &samples[..samples.len().min(POLAR_WINDOW)];
    if head.len() < 2 {
        return false;
    }
    head.windows(2).all(|w| {
        let step = (w[1][0] * 10.0).round() as i64 - (w[0][0] * 10.0).round() as i64;
        step == 5 || step == 10
    })
}

pub fn polar_to_xy(sample: Point) -> Point {
    let theta = PI * sample[0] / 180.0;
    let r = sample[1];
    [r * theta.cos(), r * theta.sin()]
}

/// Text scan log transcoded once into a seekable binary cache.
#[derive(Debug)]
pub struct RawScanLog {
    cache_path: PathBuf,
    cache: Option<File>,
    samples: usize,
    hz: usize,
    polar: bool,
}

impl RawScanLog {
    pub fn new(cache_path: impl Into<PathBuf>, hz: usize) -> Self {
        Self {
            cache_path: cache_path.into(),
            cache: None,
            samples: 0,
            hz,
            polar: false,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn is_polar(&self) -> bool {
        self.polar
    }

    fn transcode(&mut self, raw: &Path) -> Result<()> {
        let input = File::open(raw).with_context(|| format!("opening {}", raw.display()))?;
        let output = File::create(&self.cache_path)
            .with_context(|| format!("creating {}", self.cache_path.display()))?;
        let mut writer = BufWriter::new(output);
        let mut head = Vec::with_capacity(POLAR_WINDOW);
        let mut samples = 0;
        for (idx, line) in BufReader::new(input).lines().enumerate() {
            let line = line.with_context(|| format!("reading {}", raw.display()))?;
            let Some(sample) = parse_sample_line(&line)
                .with_context(|| format!("{} line {}", raw.display(), idx + 1))?
            else {
                continue;
            };
            if head.len() < POLAR_WINDOW {
                head.push(sample);
            }
            writer
                .write_all(&sample[0].to_le_bytes())
                .and_then(|_| writer.write_all(&sample[1].to_le_bytes()))
                .with_context(|| format!("writing {}", self.cache_path.display()))?;
            samples += 1;
        }
        writer
            .flush()
            .with_context(|| format!("writing {}", self.cache_path.display()))?;
        self.samples = samples;
        self.polar = looks_polar(&head);
        Ok(())
    }
}

impl FrameSource for RawScanLog {
    fn open(&mut self, raw: &Path, hz: usize) -> Result<usize> {
        self.cache = None;
        self.hz = hz.max(1);
        self.transcode(raw)?;
        let cache = File::open(&self.cache_path)
            .with_context(|| format!("opening {}", self.cache_path.display()))?;
        self.cache = Some(cache);
        info!(
            "ingested {} samples from {} ({} frames at {} Hz, {})",
            self.samples,
            raw.display(),
            self.frame_count(),
            self.hz,
            if self.polar { "polar" } else { "cartesian" }
        );
        Ok(self.frame_count())
    }

    fn frame_count(&self) -> usize {
        self.samples / self.hz.max(1)
    }

    fn hz(&self) -> usize {
        self.hz
    }

    fn set_hz(&mut self, hz: usize) -> usize {
        self.hz = hz.max(1);
        self.frame_count()
    }

    fn read_frame(&mut self, frame: usize) -> Result<Vec<Point>> {
        if frame >= self.frame_count() {
            anyhow::bail!(
                "frame {} out of range ({} frames at {} Hz)",
                frame,
                self.frame_count(),
                self.hz
            );
        }
        let cache = self
            .cache
            .as_mut()
            .context("no scan log loaded")?;
        let mut buf = vec![0u8; self.hz * SAMPLE_BYTES as usize];
        cache.seek(SeekFrom::Start(frame as u64 * self.hz as u64 * SAMPLE_BYTES))?;
        cache
            .read_exact(&mut buf)
            .with_context(|| format!("reading frame {frame} from {}", self.cache_path.display()))?;
        debug!("read frame {frame} ({} samples)", self.hz);
        let points = buf
            .chunks_exact(SAMPLE_BYTES as usize)
            .map(|c| {
                let a = f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                let b = f64::from_le_bytes([c[8], c[9], c[10], c[11], c[12], c[13], c[14], c[15]]);
                if self.polar {
                    polar_to_xy([a, b])
                } else {
                    [a, b]
                }
            })
            .collect();
        Ok(points)
    }
}
