#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use luna_annot::time_tokens::TimeContext;
use luna_annot::WriteOptions;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default time context for CLI-driven tabular reads: no known recording
/// start clock or end, 30s epochs (the PSG convention spec.md assumes
/// throughout).
fn default_time_context() -> TimeContext {
    TimeContext {
        start_clock: None,
        epoch_len_sec: 30.0,
        epoch_inc_sec: 30.0,
        recording_end: None,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "luna",
    about = "Luna PSG analytic substrate CLI",
    long_about = "Luna reference CLI.\n\nConvert annotation files, extract epoch features, build a training corpus, train/predict with POPS, and refine posteriors.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply an alias remap table to an annotation set loaded from a tabular file.
    AnnotAlias {
        /// Input tabular annotation file.
        #[arg(long)]
        input: PathBuf,
        /// Alias table (`canonical original` lines).
        #[arg(long)]
        alias_table: PathBuf,
        /// Output tabular annotation file.
        #[arg(long)]
        out: PathBuf,
    },

    /// Round-trip a tabular annotation file (parse then rewrite), for
    /// validating a file or normalizing its formatting.
    AnnotNormalize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },

    /// Parse a feature specification file and print the resulting column layout.
    FeaturesDescribe {
        /// Feature spec file (one `block kind sig=... key=value...` line per block).
        #[arg(long)]
        spec: PathBuf,
    },

    /// Train a POPS model from a binary feature corpus.
    PopsTrain {
        /// Path to the binary feature corpus.
        #[arg(long)]
        corpus: PathBuf,
        /// Output model path.
        #[arg(long, default_value = "model.lgb")]
        out: PathBuf,
        /// Number of boosting iterations.
        #[arg(long, default_value_t = 100)]
        iterations: usize,
        /// Learning rate.
        #[arg(long, default_value_t = 0.05)]
        learning_rate: f64,
        /// Use the 3-class (W/R/NR) collapse instead of 5-class.
        #[arg(long, default_value_t = false)]
        three_class: bool,
        /// Drop leading/trailing wake epochs beyond this many epochs from
        /// each individual's first/last non-wake epoch before training.
        /// Omit to disable (the default: train on every row).
        #[arg(long)]
        trim_wake_margin: Option<usize>,
        /// Stage code treated as wake for --trim-wake-margin.
        #[arg(long, default_value_t = 0)]
        wake_label: i32,
    },

    /// Refine posteriors with the SOAP SVD + discriminant pipeline, using a
    /// feature corpus as the discriminant's input space.
    SoapRefine {
        /// Path to the binary feature corpus supplying the SVD feature space.
        #[arg(long)]
        corpus: PathBuf,
        /// CSV of posteriors to refine (no header, one row per epoch).
        #[arg(long)]
        posteriors: PathBuf,
        /// Output CSV of refined posteriors.
        #[arg(long)]
        out: PathBuf,
        /// Number of SVD components to compact the feature matrix to.
        #[arg(long, default_value_t = 8)]
        n_components: usize,
        /// Confidence above which an epoch is left as the base model scored it.
        #[arg(long, default_value_t = 0.8)]
        confidence_threshold: f64,
    },

    /// Predict posteriors for a single feature matrix (CSV of rows) with a saved model.
    PopsPredict {
        /// Path to a saved POPS model.
        #[arg(long)]
        model: PathBuf,
        /// CSV file of feature rows (no header, no label column).
        #[arg(long)]
        features: PathBuf,
        /// Output CSV of posteriors.
        #[arg(long)]
        out: PathBuf,
        /// Use the 3-class (W/R/NR) collapse instead of 5-class.
        #[arg(long, default_value_t = false)]
        three_class: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::AnnotAlias {
            input,
            alias_table,
            out,
        } => annot_alias(&input, &alias_table, &out),
        Cmd::AnnotNormalize { input, out } => annot_normalize(&input, &out),
        Cmd::FeaturesDescribe { spec } => features_describe(&spec),
        Cmd::PopsTrain {
            corpus,
            out,
            iterations,
            learning_rate,
            three_class,
            trim_wake_margin,
            wake_label,
        } => pops_train(
            &corpus,
            &out,
            iterations,
            learning_rate,
            three_class,
            trim_wake_margin,
            wake_label,
        ),
        Cmd::SoapRefine {
            corpus,
            posteriors,
            out,
            n_components,
            confidence_threshold,
        } => soap_refine(&corpus, &posteriors, &out, n_components, confidence_threshold),
        Cmd::PopsPredict {
            model,
            features,
            out,
            three_class,
        } => pops_predict(&model, &features, &out, three_class),
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

fn annot_alias(input: &Path, alias_table: &Path, out: &Path) -> Result<()> {
    info!(input=%input.display(), out=%out.display(), "applying alias table");
    let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let table_text = fs::read_to_string(alias_table)
        .with_context(|| format!("reading {}", alias_table.display()))?;

    let mut set = luna_annot::read_tabular(&text, &default_time_context())
        .context("parsing tabular annotation file")?;

    let present: Vec<String> = set.names().map(ToString::to_string).collect();
    luna_annot::alias::apply_alias_table(&mut set, &table_text, &present)
        .context("applying alias table")?;

    ensure_parent_dir(out)?;
    let rendered = luna_annot::write_tabular(&set, &WriteOptions::default());
    fs::write(out, rendered).with_context(|| format!("writing {}", out.display()))?;

    println!("Aliased {} → {}", input.display(), out.display());
    Ok(())
}

fn annot_normalize(input: &Path, out: &Path) -> Result<()> {
    info!(input=%input.display(), out=%out.display(), "normalizing annotation file");
    let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let set = luna_annot::read_tabular(&text, &default_time_context())
        .context("parsing tabular annotation file")?;

    ensure_parent_dir(out)?;
    let rendered = luna_annot::write_tabular(&set, &WriteOptions::default());
    fs::write(out, rendered).with_context(|| format!("writing {}", out.display()))?;

    println!("Normalized {} → {}", input.display(), out.display());
    Ok(())
}

fn features_describe(spec: &Path) -> Result<()> {
    let text = fs::read_to_string(spec).with_context(|| format!("reading {}", spec.display()))?;
    let lines = luna_features::spec::parse_spec(&text).context("parsing feature spec")?;

    println!("{} spec lines:", lines.len());
    for line in &lines {
        let channel = line.channel.as_deref().unwrap_or(".");
        println!(
            "  block={} kind={:?} channel={} args={:?}",
            line.block, line.kind, channel, line.args
        );
    }
    Ok(())
}

fn pops_train(
    corpus_path: &Path,
    out: &Path,
    iterations: usize,
    learning_rate: f64,
    three_class: bool,
    trim_wake_margin: Option<usize>,
    wake_label: i32,
) -> Result<()> {
    use luna_pops::{build_dataset, trim_wake_epochs, ClassModel, PopsModel, TrainConfig};

    info!(corpus=%corpus_path.display(), out=%out.display(), "training POPS model");
    let mut file = fs::File::open(corpus_path)
        .with_context(|| format!("opening {}", corpus_path.display()))?;
    let corpus = luna_corpus::load_corpus(&mut file).context("loading binary corpus")?;

    let class_model = if three_class {
        ClassModel::ThreeClass
    } else {
        ClassModel::FiveClass
    };

    let (features, stage) = if let Some(margin) = trim_wake_margin {
        let blocks: Vec<(usize, usize)> = corpus.blocks.iter().map(|b| (b.start, b.end)).collect();
        let (f, s) = trim_wake_epochs(&corpus.features, &corpus.stage, &blocks, wake_label, margin);
        info!(kept = f.len(), total = corpus.features.len(), "trimmed wake epochs");
        (f, s)
    } else {
        (corpus.features, corpus.stage)
    };

    let dataset = build_dataset(&features, &stage, None).context("building lightgbm dataset")?;

    let config = TrainConfig {
        n_iterations: iterations,
        learning_rate,
        num_leaves: 31,
        class_model: match class_model {
            ClassModel::FiveClass => luna_pops::model::ClassModelSerde::FiveClass,
            ClassModel::ThreeClass => luna_pops::model::ClassModelSerde::ThreeClass,
        },
    };

    let model = PopsModel::train(dataset, &config, |iter, loss| {
        info!(iter, loss, "training progress");
    })
    .context("training POPS model")?;

    ensure_parent_dir(out)?;
    model.save(out).context("saving POPS model")?;

    println!("Trained POPS model ({class_model:?}) → {}", out.display());
    Ok(())
}

fn soap_refine(
    corpus_path: &Path,
    posteriors_path: &Path,
    out: &Path,
    n_components: usize,
    confidence_threshold: f64,
) -> Result<()> {
    use luna_refine::{refine_from_features, SoapConfig};
    use nalgebra::DMatrix;

    info!(corpus=%corpus_path.display(), posteriors=%posteriors_path.display(), "running SOAP refinement");
    let mut file = fs::File::open(corpus_path)
        .with_context(|| format!("opening {}", corpus_path.display()))?;
    let corpus = luna_corpus::load_corpus(&mut file).context("loading binary corpus")?;

    let csv = fs::read_to_string(posteriors_path)
        .with_context(|| format!("reading {}", posteriors_path.display()))?;
    let mut posteriors: Vec<Vec<f64>> = csv
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            line.split(',')
                .map(|f| f.trim().parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .with_context(|| format!("parsing posterior row: {line}"))
        })
        .collect::<Result<_>>()?;

    let nrows = corpus.features.len();
    let ncols = corpus.feature_names.len();
    let mut features = DMatrix::zeros(nrows, ncols);
    for (r, row) in corpus.features.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            features[(r, c)] = *v;
        }
    }
    let blocks: Vec<(usize, usize)> = corpus.blocks.iter().map(|b| (b.start, b.end)).collect();

    let config = SoapConfig {
        n_components,
        confidence_threshold,
        ..Default::default()
    };
    let improved = refine_from_features(&mut posteriors, &features, &blocks, &config)
        .context("running SOAP refinement")?;

    ensure_parent_dir(out)?;
    let mut s = String::new();
    for row in &posteriors {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        s.push_str(&cells.join(","));
        s.push('\n');
    }
    fs::write(out, s).with_context(|| format!("writing {}", out.display()))?;

    println!(
        "Refined {} epochs ({improved} improved) → {}",
        posteriors.len(),
        out.display()
    );
    Ok(())
}

fn pops_predict(model_path: &Path, features: &Path, out: &Path, three_class: bool) -> Result<()> {
    use luna_pops::{ClassModel, PopsModel};

    info!(model=%model_path.display(), features=%features.display(), "predicting");
    let class_model = if three_class {
        ClassModel::ThreeClass
    } else {
        ClassModel::FiveClass
    };
    let model = PopsModel::load(model_path, class_model).context("loading POPS model")?;

    let csv = fs::read_to_string(features).with_context(|| format!("reading {}", features.display()))?;
    let rows: Vec<Vec<f64>> = csv
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            line.split(',')
                .map(|f| f.trim().parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .with_context(|| format!("parsing feature row: {line}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let posteriors = model.predict(&rows).context("POPS prediction")?;

    ensure_parent_dir(out)?;
    let mut s = String::new();
    for row in &posteriors {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        s.push_str(&cells.join(","));
        s.push('\n');
    }
    fs::write(out, s).with_context(|| format!("writing {}", out.display()))?;

    println!("Predicted {} epochs → {}", posteriors.len(), out.display());
    Ok(())
}
