//! Runs expert aggregation over one sequence stored as MOT text files.

use anyhow::{bail, Context};
use clap::Parser;
use metatrack::expert::{track_all, Expert, ReplayExpert};
use metatrack::feedback::OfflineTracker;
use metatrack::mot::{
    format_trajectory, group_detections, read_detections, read_ground_truth, read_trajectory,
};
use metatrack::{ClearMotScorer, Config, MetaTracker, ReplayFeedback, SeqInfo, Trajectory};
use serde_derive::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "metatrack")]
#[command(about = "Aggregate tracking experts with delayed feedback", long_about = None)]
struct Args {
    /// JSON configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Expert result file, one per configured expert, in config order
    #[arg(short, long = "expert", required = true)]
    experts: Vec<PathBuf>,

    /// Ground truth, used as feedback when `offline.use_gt` is set
    #[arg(long)]
    gt: Option<PathBuf>,

    /// Detections handed to the experts and the offline tracker
    #[arg(long)]
    det: Option<PathBuf>,

    /// Offline tracker output replayed as feedback
    #[arg(long)]
    feedback: Option<PathBuf>,

    /// Directory holding the frame images
    #[arg(long, default_value = "img1")]
    img_dir: PathBuf,

    #[arg(long, default_value = "MOT17")]
    dataset: String,

    #[arg(long, default_value = "sequence")]
    seq_name: String,

    /// Overrides the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Reconciled tracks, stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Per-frame weights, losses and selection as JSON lines
    #[arg(long)]
    weights: Option<PathBuf>,
}

#[derive(Serialize)]
struct FrameLog<'a> {
    frame: u32,
    selected_expert: usize,
    weights: &'a [f64],
    losses: Option<&'a [f64]>,
}

fn load_trajectory(path: &Path) -> anyhow::Result<Trajectory> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_trajectory(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = Config::from_json_file(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    if args.experts.len() != config.n_experts() {
        bail!(
            "config names {} experts but {} result files were given",
            config.n_experts(),
            args.experts.len()
        );
    }

    let mut experts: Vec<Box<dyn Expert>> = Vec::with_capacity(args.experts.len());
    let mut n_frames = 0u32;
    for (name, path) in config.experts.iter().zip(&args.experts) {
        let expert = ReplayExpert::new(name.clone(), load_trajectory(path)?);
        n_frames = n_frames.max(expert.last_frame());
        experts.push(Box::new(expert));
    }

    let mut seq_info = SeqInfo::new(&args.dataset, &args.seq_name);

    let gt = match &args.gt {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            read_ground_truth(BufReader::new(file), &seq_info)
                .with_context(|| format!("reading {}", path.display()))?
        }
        None if config.offline.use_gt => bail!("offline.use_gt is set but no --gt was given"),
        None => Trajectory::new(),
    };
    n_frames = n_frames.max(gt.frames().map_or(0, |r| *r.end()));

    let dets = match &args.det {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            read_detections(BufReader::new(file))?
        }
        None => Vec::new(),
    };
    n_frames = n_frames.max(dets.last().map_or(0, |d| d.frame));

    let offline: Option<Box<dyn OfflineTracker>> = match (&args.feedback, config.offline.use_gt) {
        (_, true) => None,
        (Some(path), false) => Some(Box::new(ReplayFeedback::new(load_trajectory(path)?))),
        (None, false) => bail!("offline.use_gt is not set, --feedback is required"),
    };

    let mut tracker = MetaTracker::new(config, Box::new(ClearMotScorer::default()), offline)?;
    info!(name = tracker.name(), frames = n_frames, "starting sequence");

    seq_info.seq_length = Some(n_frames as usize);
    for expert in experts.iter_mut() {
        expert.initialize(&seq_info);
    }
    tracker.initialize(seq_info);

    let dets_by_frame = group_detections(&dets, n_frames as usize);
    let gts_by_frame = gt.by_frame();

    let mut weights_log = match &args.weights {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let mut output = Trajectory::new();
    for frame in 1..=n_frames {
        let img_path = args.img_dir.join(format!("{:06}.jpg", frame));
        let frame_dets = &dets_by_frame[frame as usize - 1];
        let frame_gts = gts_by_frame.get(&frame).map(Vec::as_slice).unwrap_or(&[]);

        let results = track_all(&mut experts, &img_path, frame_dets)?;
        let out = tracker
            .track(&img_path, frame_dets, frame_gts, &results)
            .with_context(|| format!("tracking frame {}", frame))?;

        output.push_frame(frame, &out.boxes);

        if let Some(log) = weights_log.as_mut() {
            let record = FrameLog {
                frame,
                selected_expert: out.selected_expert,
                weights: out.weights.as_slice().unwrap_or(&[]),
                losses: out.losses.as_ref().and_then(|l| l.as_slice()),
            };
            serde_json::to_writer(&mut *log, &record)?;
            writeln!(log)?;
        }
    }

    let text = format_trajectory(&output);
    match &args.output {
        Some(path) => std::fs::write(path, text)?,
        None => print!("{}", text),
    }

    info!(weights = ?tracker.weights().as_slice(), "sequence finished");

    Ok(())
}
