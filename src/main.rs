use anyhow::Context;
use clap::{Args, ColorChoice, CommandFactory, FromArgMatches, Parser, Subcommand};
use colored::Colorize;
use scene_fusion::builder::{self, BatchLayout, LabelMap, validate_threshold};
use scene_fusion::captions::{self, DEFAULT_SPLITS};
use scene_fusion::config::SgConfig;
use scene_fusion::export::{GraphProjection, RenderFormat, render, to_dot, to_merged_dot};
use scene_fusion::fusion::{StepAnnotation, fuse};
use scene_fusion::geometry::BoxScale;
use scene_fusion::io::{fused_output_path, graph_output_path, load_graph, save_graph};
use scene_fusion::provenance::isolate_step_triples;
use scene_fusion::schema::{LabelIndex, SceneGraph, format_score, to_pretty_json};
use serde_json::json;
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sgfusion",
    about = "Scene graph construction, STEP fusion and graph export",
    arg_required_else_help = true
)]
struct Cli {
    /// Disable color
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (default: $SGFUSION_CONFIG or the user config dir)
    #[arg(long, value_name = "path", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build scene graphs from raw scene parser detections
    Build(BuildArgs),
    /// Attach STEP action detections to a scene graph
    Fuse(FuseArgs),
    /// Render a scene graph with Graphviz
    Render(RenderArgs),
    /// List the STEP-contributed triples of a document
    Triples(TriplesArgs),
    /// Validate scene graph documents
    Validate(ValidateArgs),
    /// Turn split annotations into caption id files
    Captions(CaptionsArgs),
    /// Print the JSON Schema of the scene graph document
    Schema,
}

#[derive(Args, Clone)]
struct BuildArgs {
    /// `<split>_prepross.json` files listing the image ids
    #[arg(long = "ids", value_name = "path", required = true, num_args = 1..)]
    ids: Vec<PathBuf>,

    /// Directory of per-image detector output
    #[arg(long, value_name = "dir")]
    detections_dir: PathBuf,

    /// Directory receiving `<id>.causal_tde.json` documents
    #[arg(long, value_name = "dir")]
    out_dir: PathBuf,

    /// Dataset label map JSON
    #[arg(long, value_name = "path")]
    labelmap: PathBuf,

    /// Keep only objects whose class is listed in this file
    #[arg(long, value_name = "path")]
    visual_labels: Option<PathBuf>,

    /// Minimum object score (exclusive)
    #[arg(long, value_name = "score")]
    min_obj_score: Option<f64>,

    /// Minimum relation score (exclusive)
    #[arg(long, value_name = "score")]
    min_rel_score: Option<f64>,

    /// Prefix object classes with their cleaned-up attributes
    #[arg(long)]
    attributes: bool,
}

#[derive(Args, Clone)]
struct FuseArgs {
    /// Base scene graph document
    base: PathBuf,

    /// STEP detector annotation JSON
    step: PathBuf,

    /// Output path (default: `<stem>_step-fusion_gt.json` next to the base)
    #[arg(short, long, value_name = "path")]
    output: Option<PathBuf>,

    /// Minimum IoU for a node to anchor a detection
    #[arg(long, value_name = "iou")]
    min_iou: Option<f64>,

    /// STEP boxes are normalized to a frame of this size
    #[arg(long, value_name = "WxH")]
    normalized: Option<FrameSize>,

    /// Copy detector scores into the new edges
    #[arg(long)]
    carry_scores: bool,

    /// Print the fusion report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct RenderArgs {
    /// Scene graph document
    doc: PathBuf,

    /// Output path (default: `<stem>_graph.<ext>`; DOT goes to stdout)
    #[arg(short, long, value_name = "path")]
    output: Option<PathBuf>,

    /// Output format: dot, pdf or svg
    #[arg(long, value_name = "format")]
    format: Option<RenderFormat>,

    /// Graphviz executable
    #[arg(long, value_name = "program")]
    dot_program: Option<String>,

    /// Draw one edge per node pair, joining parallel labels with ` / `
    #[arg(long)]
    merge_parallel: bool,
}

#[derive(Args, Clone)]
struct TriplesArgs {
    /// Fused scene graph document
    doc: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct ValidateArgs {
    /// Documents to check
    #[arg(required = true, num_args = 1..)]
    docs: Vec<PathBuf>,
}

#[derive(Args, Clone)]
struct CaptionsArgs {
    /// Directory holding `<split>_annots.json`
    #[arg(long, value_name = "dir")]
    dir: PathBuf,

    /// Comma-separated splits
    #[arg(long, value_name = "list", value_delimiter = ',')]
    splits: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameSize {
    width: f64,
    height: f64,
}

impl FromStr for FrameSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite() && *n > 0.0)
                .ok_or_else(|| format!("invalid frame dimension '{}'", v))
        };
        Ok(FrameSize {
            width: parse(w)?,
            height: parse(h)?,
        })
    }
}

fn heading(text: &str, color: bool) -> String {
    if color {
        text.bold().cyan().to_string()
    } else {
        text.to_string()
    }
}

fn fail(err: anyhow::Error) -> i32 {
    eprintln!("Error: {:#}", err);
    1
}

fn usage(msg: impl std::fmt::Display) -> i32 {
    eprintln!("Error: {}", msg);
    2
}

fn print_json(value: &impl serde::Serialize) -> Result<(), i32> {
    match to_pretty_json(value) {
        Ok(s) => {
            println!("{}", s);
            Ok(())
        }
        Err(e) => Err(fail(e.into())),
    }
}

fn run_build(args: BuildArgs, config: &SgConfig, color: bool) -> Result<(), i32> {
    let mut options = config.build.to_build_options();
    if let Some(v) = args.min_obj_score {
        options.min_obj_score = v;
    }
    if let Some(v) = args.min_rel_score {
        options.min_rel_score = v;
    }
    options.postprocess_attributes |= args.attributes;
    for (name, value) in [
        ("min_obj_score", options.min_obj_score),
        ("min_rel_score", options.min_rel_score),
    ] {
        validate_threshold(name, value).map_err(usage)?;
    }

    let prepared = (|| -> anyhow::Result<(Vec<String>, LabelMap)> {
        let ids = builder::collect_image_ids(&args.ids).context("reading image ids")?;
        let labels = LabelMap::load(&args.labelmap)
            .with_context(|| format!("loading label map {}", args.labelmap.display()))?;
        if let Some(path) = &args.visual_labels {
            options.visual_labels = Some(
                builder::load_visual_labels(path)
                    .with_context(|| format!("loading visual labels {}", path.display()))?,
            );
        }
        Ok((ids, labels))
    })();
    let (ids, labels) = prepared.map_err(fail)?;

    let layout = BatchLayout {
        detections_dir: args.detections_dir,
        out_dir: args.out_dir,
    };
    let summary = builder::build_batch(&ids, &layout, &labels, &options);

    println!("{}", heading("Build:", color));
    println!("  built = {}", summary.built);
    println!("  existing = {}", summary.existing);
    println!("  failed = {}", summary.failed.len());
    for failure in &summary.failed {
        println!("    {}: {}", failure.id, failure.error);
    }

    if summary.failed.is_empty() { Ok(()) } else { Err(1) }
}

fn run_fuse(args: FuseArgs, config: &SgConfig, color: bool) -> Result<(), i32> {
    let mut fusion = config.fusion.to_fusion_config();
    if let Some(v) = args.min_iou {
        fusion.min_iou = v;
    }
    if let Some(frame) = args.normalized {
        fusion.box_scale = BoxScale::Normalized {
            width: frame.width,
            height: frame.height,
        };
    }
    fusion.carry_scores |= args.carry_scores;
    validate_threshold("min_iou", fusion.min_iou).map_err(usage)?;

    let output = args.output.unwrap_or_else(|| fused_output_path(&args.base));
    let result = (|| -> anyhow::Result<_> {
        let base = load_graph(&args.base)
            .with_context(|| format!("loading base document {}", args.base.display()))?;
        let annotation = StepAnnotation::load(&args.step)
            .with_context(|| format!("loading STEP annotation {}", args.step.display()))?;
        let report = fuse(&base, &annotation, &fusion).with_context(|| {
            format!("fusing {} into {}", args.step.display(), args.base.display())
        })?;
        save_graph(&output, &report.graph)
            .with_context(|| format!("writing {}", output.display()))?;
        Ok(report)
    })();
    let report = result.map_err(fail)?;

    if args.json {
        return print_json(&json!({
            "output": output,
            "attached": report.attached,
            "skipped": report.skipped,
        }));
    }

    println!("{} {}", heading("Fused:", color), output.display());
    println!("  attached = {}", report.attached.len());
    for a in &report.attached {
        println!(
            "    {} '{}' -> node {} (IoU {})",
            a.detection,
            a.label,
            a.node,
            format_score(a.iou)
        );
    }
    println!("  skipped = {}", report.skipped.len());
    for s in &report.skipped {
        println!("    {} {}", s.detection, s.to_error());
    }
    Ok(())
}

fn run_render(args: RenderArgs, config: &SgConfig, color: bool) -> Result<(), i32> {
    let format = args.format.unwrap_or(config.render.format);
    let program = args.dot_program.unwrap_or_else(|| config.render.dot_program.clone());

    let projection = load_graph(&args.doc)
        .with_context(|| format!("loading {}", args.doc.display()))
        .and_then(|doc| Ok(GraphProjection::from_graph(&doc)?))
        .map_err(fail)?;
    let dot = if args.merge_parallel {
        to_merged_dot(&projection)
    } else {
        to_dot(&projection)
    };

    if format == RenderFormat::Dot && args.output.is_none() {
        print!("{}", dot);
        return Ok(());
    }

    let output = args
        .output
        .unwrap_or_else(|| graph_output_path(&args.doc, format.extension()));
    render(&dot, &output, format, &program)
        .with_context(|| format!("rendering {}", args.doc.display()))
        .map_err(fail)?;

    println!("{} {}", heading("Rendered:", color), output.display());
    println!("  nodes = {}", projection.vertex_count());
    println!("  edges = {}", projection.edge_count());
    if args.merge_parallel {
        println!("  merged = {}", projection.merged_edge_labels().count());
    }
    let isolated = projection.isolated();
    if !isolated.is_empty() {
        let ids: Vec<String> = isolated.iter().map(u32::to_string).collect();
        println!("  isolated = {}", ids.join(", "));
    }
    Ok(())
}

fn run_triples(args: TriplesArgs, color: bool) -> Result<(), i32> {
    let doc = load_graph(&args.doc)
        .with_context(|| format!("loading {}", args.doc.display()))
        .map_err(fail)?;
    let labels = LabelIndex::from_graph(&doc);
    let triples = isolate_step_triples(&doc, &labels);

    if args.json {
        return print_json(&triples);
    }

    println!("{}", heading("Triples:", color));
    for (triple, score) in &triples {
        match score {
            Some(s) => println!("  {} = {}", triple, format_score(*s)),
            None => println!("  {}", triple),
        }
    }
    Ok(())
}

fn run_validate(args: ValidateArgs, color: bool) -> Result<(), i32> {
    let mut failed = 0;
    for path in &args.docs {
        match load_graph(path) {
            Ok(doc) => {
                let status = if color {
                    "ok".green().to_string()
                } else {
                    "ok".to_string()
                };
                println!(
                    "{} {} ({} nodes, {} edges)",
                    status,
                    path.display(),
                    doc.nodes.len(),
                    doc.edges.len()
                );
            }
            Err(e) => {
                failed += 1;
                let status = if color {
                    "invalid".red().to_string()
                } else {
                    "invalid".to_string()
                };
                println!("{} {}: {}", status, path.display(), e);
            }
        }
    }
    if failed == 0 { Ok(()) } else { Err(1) }
}

fn run_captions(args: CaptionsArgs, color: bool) -> Result<(), i32> {
    let splits = args
        .splits
        .unwrap_or_else(|| DEFAULT_SPLITS.iter().map(|s| s.to_string()).collect());
    println!("{}", heading("Captions:", color));
    for split in &splits {
        let written = captions::save_ids_file(&args.dir, split)
            .with_context(|| format!("processing split {}", split))
            .map_err(fail)?;
        println!("  {} = {}", split, written.display());
    }
    Ok(())
}

fn run_schema() -> Result<(), i32> {
    print_json(&schemars::schema_for!(SceneGraph))
}

fn load_config(explicit: Option<&Path>) -> Result<SgConfig, i32> {
    SgConfig::load(explicit)
        .context("loading configuration")
        .map_err(|e| usage(format!("{:#}", e)))
}

fn detect_color_choice() -> ColorChoice {
    // Scan args before clap so help/errors honor `--no-color`.
    let mut args = std::env::args_os();
    args.next();
    let mut flag = false;
    for arg in args {
        if arg == "--" {
            break;
        }
        if arg == "--no-color" {
            flag = true;
            break;
        }
    }
    if flag || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn init_tracing(verbose: u8, color: bool) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(color && std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

fn dispatch(command: Commands, config_path: Option<&Path>, color: bool) -> Result<(), i32> {
    match command {
        Commands::Build(args) => run_build(args, &load_config(config_path)?, color),
        Commands::Fuse(args) => run_fuse(args, &load_config(config_path)?, color),
        Commands::Render(args) => run_render(args, &load_config(config_path)?, color),
        Commands::Triples(args) => run_triples(args, color),
        Commands::Validate(args) => run_validate(args, color),
        Commands::Captions(args) => run_captions(args, color),
        Commands::Schema => run_schema(),
    }
}

fn main() {
    let color = detect_color_choice();
    let matches = Cli::command().color(color).get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let want_color = !matches!(color, ColorChoice::Never);
    init_tracing(cli.verbose, want_color);

    let Some(command) = cli.command else {
        return;
    };
    let stdout_color = want_color && stdout().is_terminal();
    if let Err(code) = dispatch(command, cli.config.as_deref(), stdout_color) {
        std::process::exit(code);
    }
}
