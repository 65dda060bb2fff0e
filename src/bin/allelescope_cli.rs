use allelescope::{
    about,
    config::ViewerConfig,
    notice::Notice,
    remote::HttpSampleStore,
    render_trace::export_trace_svg_to_path,
    sample::{AlleleSlot, AlleleStatus, ChannelId, QualitySummary, SampleInfo, SampleModel},
    session::SampleSession,
    size_standard::CalibrationStatus,
    view_state::ViewOp,
};
use anyhow::{Context, Result, anyhow, bail};
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;
use std::{env, fs};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct MarkerRow {
    name: String,
    channel: u8,
    bp_range: (f64, f64),
    repeat_unit: u32,
    color: String,
}

#[derive(Serialize)]
struct LadderRow {
    name: String,
    aliases: Vec<String>,
    dye: Option<String>,
    sizes: Vec<f64>,
}

#[derive(Serialize)]
struct ChannelRow {
    channel: ChannelId,
    color: String,
    data_available: bool,
    raw_points: usize,
    analyzed_points: usize,
    peaks: usize,
}

#[derive(Serialize)]
struct AlleleRow {
    marker: String,
    alleles: String,
    status: AlleleStatus,
}

#[derive(Serialize)]
struct SampleReport<'a> {
    info: &'a SampleInfo,
    quality: QualitySummary,
    size_standard: Option<String>,
    calibration_status: CalibrationStatus,
    r_squared: Option<f64>,
    channels: Vec<ChannelRow>,
    alleles: Vec<AlleleRow>,
    notices: &'a [Notice],
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  allelescope_cli --version\n  \
  allelescope_cli [--config PATH] [--server URL] markers\n  \
  allelescope_cli [--config PATH] [--server URL] ladders\n  \
  allelescope_cli [--config PATH] [--server URL] summary SAMPLE_ID\n  \
  allelescope_cli [--config PATH] [--server URL] layers SAMPLE_ID ['<view-ops-json>']\n  \
  allelescope_cli [--config PATH] [--server URL] render-svg SAMPLE_ID OUTPUT.svg ['<view-ops-json>']\n  \
  allelescope_cli [--config PATH] [--server URL] set-alleles SAMPLE_ID MARKER=A1[,A2] ...\n\n  \
  Tip: pass @file.json instead of inline JSON"
    );
}

fn load_json_arg(value: &str) -> Result<String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).with_context(|| format!("Could not read JSON file '{path}'"))
    } else {
        Ok(value.to_string())
    }
}

fn parse_view_ops(arg: Option<&String>) -> Result<Vec<ViewOp>> {
    match arg {
        None => Ok(vec![]),
        Some(value) => {
            let text = load_json_arg(value)?;
            serde_json::from_str(&text).context("Could not parse view operations JSON")
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

struct GlobalArgs {
    config_path: Option<String>,
    server: Option<String>,
    cmd_idx: usize,
}

fn parse_global_args(args: &[String]) -> Result<GlobalArgs> {
    let mut ret = GlobalArgs {
        config_path: None,
        server: None,
        cmd_idx: 1,
    };
    while let Some(flag) = args.get(ret.cmd_idx) {
        let slot = match flag.as_str() {
            "--config" => &mut ret.config_path,
            "--server" => &mut ret.server,
            _ => break,
        };
        let value = args
            .get(ret.cmd_idx + 1)
            .ok_or_else(|| anyhow!("Missing value for {flag}"))?;
        *slot = Some(value.clone());
        ret.cmd_idx += 2;
    }
    Ok(ret)
}

fn load_config(globals: &GlobalArgs) -> Result<ViewerConfig> {
    let mut config = match &globals.config_path {
        Some(path) => ViewerConfig::load_from_path(path)?,
        None => ViewerConfig::default(),
    }
    .apply_env_overrides();
    if let Some(server) = &globals.server {
        config.base_url = server.clone();
        config = config.normalized();
    }
    Ok(config)
}

fn open_session(config: &ViewerConfig) -> Result<SampleSession> {
    let store = HttpSampleStore::new(&config.base_url, config.request_timeout())?;
    Ok(SampleSession::new(
        Arc::new(store),
        Arc::new(config.marker_catalog()?),
        Arc::new(config.size_ladders()?),
        config.signal_toggle_mode,
        config.default_peak_threshold,
    ))
}

fn load(
    session: &mut SampleSession,
    config: &ViewerConfig,
    sample_id: &str,
) -> Result<Arc<SampleModel>> {
    session.request_load(sample_id);
    session
        .wait_for_load(config.request_timeout() * 4)
        .with_context(|| format!("Could not load sample '{sample_id}' from {}", config.base_url))
}

fn sample_report<'a>(model: &'a SampleModel, notices: &'a [Notice]) -> SampleReport<'a> {
    SampleReport {
        info: model.info(),
        quality: model.quality(),
        size_standard: model
            .size_standard()
            .and_then(|s| s.name().map(str::to_string)),
        calibration_status: model.calibration_status(),
        r_squared: model.resolver().r_squared(),
        channels: model
            .channels()
            .map(|c| ChannelRow {
                channel: c.id,
                color: c.color.clone(),
                data_available: c.data_available,
                raw_points: c.raw_signal().map_or(0, <[f64]>::len),
                analyzed_points: c.analyzed_signal().map_or(0, <[f64]>::len),
                peaks: c.peaks.len(),
            })
            .collect(),
        alleles: model
            .alleles()
            .values()
            .map(|call| AlleleRow {
                marker: call.marker().to_string(),
                alleles: call.label(),
                status: call.status(),
            })
            .collect(),
        notices,
    }
}

fn parse_allele_assignment(arg: &str) -> Result<(String, String, String)> {
    let (marker, values) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected MARKER=A1[,A2], got '{arg}'"))?;
    let marker = marker.trim();
    if marker.is_empty() {
        bail!("Missing marker name in '{arg}'");
    }
    let (first, second) = values.split_once(',').unwrap_or((values, ""));
    Ok((
        marker.to_string(),
        first.trim().to_string(),
        second.trim().to_string(),
    ))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        bail!("Missing command");
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let globals = parse_global_args(&args)?;
    let cmd_idx = globals.cmd_idx;
    let Some(command) = args.get(cmd_idx) else {
        usage();
        bail!("Missing command");
    };
    let config = load_config(&globals)?;
    let sample_arg = || {
        args.get(cmd_idx + 1).ok_or_else(|| {
            usage();
            anyhow!("Missing SAMPLE_ID for {command}")
        })
    };

    match command.as_str() {
        "markers" => {
            let catalog = config.marker_catalog()?;
            let rows = catalog
                .iter()
                .map(|m| MarkerRow {
                    name: m.name().to_string(),
                    channel: m.channel().0,
                    bp_range: m.bp_range(),
                    repeat_unit: m.repeat_unit(),
                    color: m.color().to_string(),
                })
                .collect::<Vec<_>>();
            print_json(&rows)
        }
        "ladders" => {
            let ladders = config.size_ladders()?;
            let rows = ladders
                .iter()
                .map(|l| LadderRow {
                    name: l.name().to_string(),
                    aliases: l.aliases().to_vec(),
                    dye: l.dye().map(str::to_string),
                    sizes: l.sizes().to_vec(),
                })
                .collect::<Vec<_>>();
            print_json(&rows)
        }
        "summary" => {
            let sample_id = sample_arg()?;
            let mut session = open_session(&config)?;
            let model = load(&mut session, &config, sample_id)?;
            print_json(&sample_report(&model, session.notices().active()))
        }
        "layers" => {
            let sample_id = sample_arg()?;
            let ops = parse_view_ops(args.get(cmd_idx + 2))?;
            let mut session = open_session(&config)?;
            load(&mut session, &config, sample_id)?;
            for op in ops {
                session.apply_view(op)?;
            }
            print_json(session.layers())
        }
        "render-svg" => {
            let sample_id = sample_arg()?;
            let Some(output) = args.get(cmd_idx + 2) else {
                usage();
                bail!("Missing OUTPUT.svg for render-svg");
            };
            let ops = parse_view_ops(args.get(cmd_idx + 3))?;
            let mut session = open_session(&config)?;
            let model = load(&mut session, &config, sample_id)?;
            for op in ops {
                session.apply_view(op)?;
            }
            let title = format!("{} ({})", model.info().sample_name, model.id());
            export_trace_svg_to_path(session.layers(), &title, output)?;
            println!("Wrote trace SVG for '{sample_id}' to '{output}'");
            Ok(())
        }
        "set-alleles" => {
            let sample_id = sample_arg()?;
            let assignments = args[cmd_idx + 2..]
                .iter()
                .map(|a| parse_allele_assignment(a))
                .collect::<Result<Vec<_>>>()?;
            if assignments.is_empty() {
                usage();
                bail!("set-alleles needs at least one MARKER=A1[,A2]");
            }
            let mut session = open_session(&config)?;
            load(&mut session, &config, sample_id)?;
            let editor = session
                .editor_mut()
                .ok_or_else(|| anyhow!("Sample '{sample_id}' has no allele editor"))?;
            editor.begin_edit()?;
            for (marker, first, second) in &assignments {
                editor.try_set_allele(marker, AlleleSlot::First, first)?;
                editor.try_set_allele(marker, AlleleSlot::Second, second)?;
            }
            let diff = editor.diff();
            session.request_save()?;
            if let Err(e) = session.wait_for_save(config.request_timeout() * 2) {
                let notices = session
                    .notices()
                    .active()
                    .iter()
                    .map(|n| n.message.as_str())
                    .join("; ");
                bail!("{e}: {notices}");
            }
            print_json(&diff)
        }
        other => {
            usage();
            bail!("Unknown command '{other}'")
        }
    }
}
