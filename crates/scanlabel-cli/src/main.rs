use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use scanlabel_lib::{
    config::CONFIG_FILE, scan::Rect, session::SUPPORTED_HZ, FrameSource, LabelingSession,
    RawScanLog, SegmentFeatures, SessionConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

type Session = LabelingSession<RawScanLog, SegmentFeatures>;

#[derive(Parser)]
#[command(name = "scanlabel", version, about = "Label segments of 2-D laser scans")]
struct Cli {
    /// Directory holding the record store and default paths
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Session config file (defaults to <root>/scanlabel.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a raw scan log, clearing every stored record
    Ingest {
        #[arg(long)]
        raw: PathBuf,
        #[arg(long)]
        hz: Option<usize>,
    },
    /// Session counters and the labels of one frame
    Status {
        #[arg(long, default_value_t = 0)]
        frame: usize,
    },
    /// Segments and features of one frame
    Show {
        #[arg(long)]
        frame: usize,
    },
    /// Edit and save the labels of one frame
    Label {
        #[arg(long)]
        frame: usize,
        /// Full label vector, one value per segment
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        labels: Option<Vec<i32>>,
        /// Single assignment SEGMENT=VALUE, may repeat
        #[arg(long = "set", value_parser = parse_assignment)]
        assignments: Vec<(usize, i32)>,
        /// Label the segment nearest the sensor
        #[arg(long)]
        nearest: bool,
        /// Label segments inside X0,Y0,X1,Y1
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        rect: Option<Vec<f64>>,
        /// Toggle segments under X,Y
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        toggle: Option<Vec<f64>>,
    },
    /// Drop every stored record and truncate the exports
    Clean,
    /// Write the feature and label text exports
    Export,
    /// Switch samples per frame (360 or 720)
    Hz { value: usize },
}

fn parse_assignment(s: &str) -> Result<(usize, i32), String> {
    let (segment, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SEGMENT=VALUE, got {s}"))?;
    let segment = segment
        .trim()
        .parse()
        .map_err(|e| format!("bad segment {segment}: {e}"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value {value}: {e}"))?;
    Ok((segment, value))
}

#[derive(Serialize)]
struct SegmentView {
    index: usize,
    label: i32,
    points: usize,
    centroid: [f64; 2],
    features: [f64; 10],
}

#[derive(Serialize)]
struct ExportSummary {
    feature_lines: usize,
    label_lines: usize,
    feature_path: PathBuf,
    label_path: PathBuf,
}

fn open_session(cli: &Cli) -> Result<Session> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(CONFIG_FILE));
    let config = SessionConfig::load_or_create(&config_path, &cli.root)?;
    let mut scans = RawScanLog::new(config.raw_cache.clone(), config.hz);
    if config.raw_data.exists() {
        scans.open(&config.raw_data, config.hz)?;
    } else {
        info!("no scan log at {}", config.raw_data.display());
    }
    LabelingSession::open(config, Some(config_path), scans, SegmentFeatures::default())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn goto(session: &mut Session, frame: usize) -> Result<()> {
    session.set_frame(frame)?;
    session.tick(Instant::now())
}

fn cmd_ingest(cli: &Cli, raw: PathBuf, hz: Option<usize>) -> Result<()> {
    if !raw.exists() {
        bail!("scan log {} not found", raw.display());
    }
    let mut session = open_session(cli)?;
    session.config_mut().raw_data = raw;
    if let Some(hz) = hz {
        if !SUPPORTED_HZ.contains(&hz) {
            bail!("unsupported HZ {hz}, expected one of {SUPPORTED_HZ:?}");
        }
        session.config_mut().hz = hz;
    }
    session.request_load();
    session.tick(Instant::now())?;
    print_json(&session.status())?;
    session.close()?;
    Ok(())
}

fn cmd_status(cli: &Cli, frame: usize) -> Result<()> {
    let mut session = open_session(cli)?;
    if session.frame_count() > 0 {
        goto(&mut session, frame)?;
    }
    print_json(&session.status())?;
    session.close()?;
    Ok(())
}

fn cmd_show(cli: &Cli, frame: usize) -> Result<()> {
    let mut session = open_session(cli)?;
    goto(&mut session, frame)?;
    let views: Vec<SegmentView> = session
        .segments()
        .iter()
        .zip(session.features())
        .zip(session.labels())
        .enumerate()
        .map(|(index, ((seg, row), &label))| SegmentView {
            index,
            label,
            points: seg.len(),
            centroid: seg.centroid(),
            features: *row,
        })
        .collect();
    print_json(&views)?;
    session.close()?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_label(
    cli: &Cli,
    frame: usize,
    labels: Option<Vec<i32>>,
    assignments: Vec<(usize, i32)>,
    nearest: bool,
    rect: Option<Vec<f64>>,
    toggle: Option<Vec<f64>>,
) -> Result<()> {
    let mut session = open_session(cli)?;
    goto(&mut session, frame)?;
    if session.labels().is_empty() {
        bail!("frame {frame} has no segments to label");
    }
    if let Some(labels) = labels {
        session.set_labels(labels)?;
    }
    for (segment, value) in assignments {
        session.set_label(segment, value)?;
    }
    if nearest {
        let i = session
            .nearest_segment()
            .with_context(|| format!("frame {frame} has no segments"))?;
        session.set_label(i, 1)?;
    }
    if let Some(r) = rect {
        if r.len() != 4 {
            bail!("--rect takes X0,Y0,X1,Y1");
        }
        session.mark_in_rect(Rect::from_corners([r[0], r[1]], [r[2], r[3]]));
    }
    if let Some(p) = toggle {
        if p.len() != 2 {
            bail!("--toggle takes X,Y");
        }
        session.toggle_at([p[0], p[1]]);
    }
    session.request_save(Instant::now());
    session.tick(Instant::now())?;
    print_json(&session.status())?;
    session.close()?;
    Ok(())
}

fn cmd_clean(cli: &Cli) -> Result<()> {
    let mut session = open_session(cli)?;
    session.request_clean();
    session.tick(Instant::now())?;
    print_json(&session.status())?;
    session.close()?;
    Ok(())
}

fn cmd_export(cli: &Cli) -> Result<()> {
    let mut session = open_session(cli)?;
    let (feature_lines, label_lines) = session.export()?;
    let summary = ExportSummary {
        feature_lines,
        label_lines,
        feature_path: session.config().feature_export.clone(),
        label_path: session.config().label_export.clone(),
    };
    print_json(&summary)?;
    session.close()?;
    Ok(())
}

fn cmd_hz(cli: &Cli, value: usize) -> Result<()> {
    let mut session = open_session(cli)?;
    session.set_hz(value)?;
    session.tick(Instant::now())?;
    print_json(&session.status())?;
    session.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Ingest { raw, hz } => cmd_ingest(&cli, raw.clone(), *hz)?,
        Commands::Status { frame } => cmd_status(&cli, *frame)?,
        Commands::Show { frame } => cmd_show(&cli, *frame)?,
        Commands::Label {
            frame,
            labels,
            assignments,
            nearest,
            rect,
            toggle,
        } => cmd_label(
            &cli,
            *frame,
            labels.clone(),
            assignments.clone(),
            *nearest,
            rect.clone(),
            toggle.clone(),
        )?,
        Commands::Clean => cmd_clean(&cli)?,
        Commands::Export => cmd_export(&cli)?,
        Commands::Hz { value } => cmd_hz(&cli, *value)?,
    }
    Ok(())
}
