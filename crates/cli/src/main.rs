use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{loss, Module, VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use diffnas_common::{
    CandidateConfig, ChoiceRouteConfig, GumbelConfig, MutableOpConfig, OpRelaxation,
};
use diffnas_core::{
    Candidate, ModuleFactory, ModuleRegistry, MutableModule, OpMutable, Pointwise, RouteMutable,
};
use diffnas_train::{ArchOptimConfig, ArchParams, TempDecay, TemperatureSchedule};

#[derive(Parser, Debug)]
#[command(name = "diffnas", about = "Toy differentiable architecture search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Learn which candidate of one mutable op reproduces a target transform.
    SearchOp(SearchOpArgs),
    /// Learn which input edges of a Gumbel choice route sum to a target.
    SearchRoute(SearchRouteArgs),
}

// ── Search-op ──────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct SearchOpArgs {
    /// Mutable-op config; a default candidate set is written here if missing.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Candidate name whose output is the regression target.
    #[arg(long, default_value = "double")]
    target: String,
    /// Sample one candidate per step (straight-through) instead of the weighted sum.
    #[arg(long)]
    one_hot: bool,
    #[arg(long, default_value_t = 300)]
    steps: usize,
    #[arg(long, default_value_t = 0.05)]
    lr: f64,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value_t = 16)]
    dim: usize,
    #[arg(long, default_value_t = 50)]
    log_every: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Write the learned architecture parameters (safetensors).
    #[arg(long)]
    save_arch: Option<PathBuf>,
}

// ── Search-route ───────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct SearchRouteArgs {
    /// Choice-route config; defaults to a hard Gumbel route keeping 2 edges.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of input edges.
    #[arg(long, default_value_t = 4)]
    edges: usize,
    /// Edges whose inputs sum to the target (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "e1,e3")]
    target: Vec<String>,
    #[arg(long, default_value_t = 400)]
    steps: usize,
    #[arg(long, default_value_t = 0.05)]
    lr: f64,
    #[arg(long, default_value_t = 5.0)]
    tau_max: f64,
    #[arg(long, default_value_t = 0.1)]
    tau_min: f64,
    #[arg(long, default_value = "exponential", value_parser = ["linear", "exponential", "cosine"])]
    tau_decay: String,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value_t = 16)]
    dim: usize,
    #[arg(long, default_value_t = 50)]
    log_every: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long)]
    save_arch: Option<PathBuf>,
}

fn main() -> Result<()> {
    // stdout carries the JSON result; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::SearchOp(args) => cmd_search_op(args),
        Command::SearchRoute(args) => cmd_search_route(args),
    }
}

// ── Command implementations ────────────────────────────────────────────────────

fn default_op_config() -> MutableOpConfig {
    let scale = |name: &str, factor: f64| {
        let mut c = CandidateConfig::of_type(name, "scale");
        c.op.insert("factor".into(), factor.into());
        c
    };
    let mut config = MutableOpConfig::new(vec![
        CandidateConfig::of_type("identity", "identity"),
        CandidateConfig::of_type("zero", "zero"),
        CandidateConfig::of_type("relu", "relu"),
        CandidateConfig::of_type("silu", "silu"),
        scale("double", 2.0),
        scale("negate", -1.0),
    ]);
    config.alias = Some("op".into());
    config
}

fn cmd_search_op(args: SearchOpArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) if path.exists() => MutableOpConfig::load(path)?,
        Some(path) => {
            let default = default_op_config();
            default.save(path)?;
            eprintln!("Created default op config at {}", path.display());
            default
        }
        None => default_op_config(),
    };
    if args.one_hot {
        config.relaxation = OpRelaxation::OneHot;
    }
    if config.alias.is_none() {
        config.alias = Some("op".into());
    }

    let device = Device::Cpu;
    let registry = ModuleRegistry::default();
    let target_config = config
        .resolved_candidates()
        .into_iter()
        .find(|c| c.name == args.target)
        .with_context(|| format!("target `{}` is not a candidate", args.target))?;

    // Candidates and target share weights so a parametric target is reachable.
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let target = registry.build(&target_config.op, vb.pp(&target_config.name))?;
    let mut op = OpMutable::new(&config, &registry, vb)?;

    let mut arch = ArchParams::new(
        ArchOptimConfig {
            lr: args.lr,
            weight_decay: 0.0,
            ..Default::default()
        },
        device.clone(),
    );
    arch.register_mutable(&op)?;

    tracing::info!(
        candidates = op.num_candidates(),
        relaxation = ?config.relaxation,
        target = %args.target,
        "Searching mutable op"
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let pb = progress_bar(args.steps, "steps")?;
    for _ in 0..args.steps {
        let x = uniform(&mut rng, args.batch_size, args.dim, &device)?;
        let y = target.forward(&x)?;
        let out = op.forward(&x, Some(arch.param_for(&op)?))?;
        let m = arch.step(&loss::mse(&out, &y)?)?;
        if args.log_every > 0 && m.step % args.log_every == 0 {
            tracing::info!(step = m.step, loss = m.loss, grad_norm = m.grad_norm, "search-op");
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let snapshot = arch.snapshot()?;
    let choices = op.choices();
    let chosen = arch.sample_and_fix(&mut op)?;

    let x = uniform(&mut rng, args.batch_size, args.dim, &device)?;
    let fixed_loss = loss::mse(&op.forward(&x, None)?, &target.forward(&x)?)?.to_scalar::<f32>()?;

    if let Some(path) = &args.save_arch {
        arch.save(path)?;
    }

    let probs: serde_json::Map<String, serde_json::Value> = choices
        .iter()
        .zip(&snapshot[0].probs)
        .map(|(name, p)| (name.clone(), json!(p)))
        .collect();
    let result = json!({
        "alias": op.alias(),
        "target": args.target,
        "chosen": chosen,
        "probs": probs,
        "fixed_loss": fixed_loss,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_search_route(args: SearchRouteArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ChoiceRouteConfig::load(path)?,
        None => ChoiceRouteConfig {
            alias: Some("route".into()),
            with_arch_param: true,
            gumbel: Some(GumbelConfig {
                tau: args.tau_max,
                seed: Some(args.seed),
                ..Default::default()
            }),
            ..Default::default()
        },
    };
    if !config.with_arch_param {
        tracing::warn!("with_arch_param is off in the config; enabling it for the search");
        config.with_arch_param = true;
    }
    if config.alias.is_none() {
        config.alias = Some("route".into());
    }
    if args.edges == 0 {
        bail!("--edges must be at least 1");
    }

    let device = Device::Cpu;
    let edges: Vec<(String, Candidate)> = (0..args.edges)
        .map(|i| {
            let edge: Candidate = Box::new(Pointwise::Identity);
            (format!("e{i}"), edge)
        })
        .collect();
    let mut route = RouteMutable::new(edges, &config)?;

    let names = route.choices();
    let target_idx = args
        .target
        .iter()
        .map(|t| {
            names
                .iter()
                .position(|n| n == t)
                .with_context(|| format!("target edge `{t}` is not one of {names:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if target_idx.is_empty() {
        bail!("--target needs at least one edge");
    }

    let schedule = TemperatureSchedule::new(
        args.tau_max,
        args.tau_min,
        args.steps,
        TempDecay::from_str(&args.tau_decay),
    )?;

    let mut arch = ArchParams::new(
        ArchOptimConfig {
            lr: args.lr,
            weight_decay: 0.0,
            ..Default::default()
        },
        device.clone(),
    );
    arch.register_mutable(&route)?;

    tracing::info!(
        edges = args.edges,
        num_chosen = config.num_chosen,
        gumbel = config.gumbel.is_some(),
        target = ?args.target,
        "Searching choice route"
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let pb = progress_bar(args.steps, "steps")?;
    for step in 0..args.steps {
        let tau = match route.as_gumbel_mut() {
            Some(gumbel) => Some(schedule.apply(step, gumbel)?),
            None => None,
        };
        let inputs = (0..args.edges)
            .map(|_| uniform(&mut rng, args.batch_size, args.dim, &device))
            .collect::<Result<Vec<_>>>()?;
        let y = sum_of(&inputs, &target_idx)?;
        let out = route.forward(&inputs, Some(arch.param_for(&route)?))?;
        let m = arch.step(&loss::mse(&out, &y)?)?;
        if args.log_every > 0 && m.step % args.log_every == 0 {
            tracing::info!(step = m.step, loss = m.loss, tau = ?tau, "search-route");
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let snapshot = arch.snapshot()?;
    let chosen = arch.sample_and_fix(&mut route)?;

    // Fixed routes still take one input per original edge.
    let inputs = (0..args.edges)
        .map(|_| uniform(&mut rng, args.batch_size, args.dim, &device))
        .collect::<Result<Vec<_>>>()?;
    let fixed_loss = loss::mse(&route.forward(&inputs, None)?, &sum_of(&inputs, &target_idx)?)?
        .to_scalar::<f32>()?;

    if let Some(path) = &args.save_arch {
        arch.save(path)?;
    }

    let result = json!({
        "alias": route.alias(),
        "target": args.target,
        "chosen": chosen,
        "logits": snapshot[0].logits,
        "fixed_loss": fixed_loss,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

// ── Helpers ────────────────────────────────────────────────────────────────────

fn progress_bar(len: usize, unit: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!("[{{elapsed_precise}}] {{bar:40}} {{pos}}/{{len}} {unit}"))?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

/// `(rows, cols)` tensor of `U(-1, 1)` samples drawn from `rng`.
fn uniform(rng: &mut StdRng, rows: usize, cols: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = (0..rows * cols).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Ok(Tensor::from_vec(data, (rows, cols), device)?)
}

fn sum_of(inputs: &[Tensor], idx: &[usize]) -> Result<Tensor> {
    let mut acc = inputs[idx[0]].clone();
    for &i in &idx[1..] {
        acc = (acc + &inputs[i])?;
    }
    Ok(acc)
}
