use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use streamskip::driver::{self, DriverConfig, TrainingMethod};
use streamskip::export::export_vectors;
use streamskip::{real, Format, Numerics, SkipGram, TrainingOptions, VectorFormat};

#[derive(Parser)]
#[command(about = "Streaming skip-gram with negative sampling", long_about = None)]
struct Options {
    /// Training text, one sentence per line ("-" reads stdin)
    #[arg(value_name = "TRAIN")]
    train_file: PathBuf,

    /// Write the trained model to FILE ("-" writes stdout)
    #[arg(value_name = "MODEL")]
    model_file: PathBuf,

    /// Training method
    #[arg(short = 't', long, value_enum, default_value_t = TrainingMethod::Incremental)]
    training_method: TrainingMethod,

    /// Dimensionality of word embeddings
    #[arg(short = 'd', long, default_value_t = 100)]
    dimensionality: usize,

    /// Window size
    #[arg(short = 'w', long, default_value_t = 5)]
    window_size: usize,

    /// Number of negative samples
    #[arg(short = 'n', long, default_value_t = 5)]
    negative_sample_num: usize,

    /// Distortion parameter
    #[arg(short = 'a', long, default_value_t = 0.75)]
    alpha: real,

    /// Subsampling threshold
    #[arg(short = 's', long, default_value_t = 1e-3)]
    subsampling_threshold: real,

    /// Unigram table size used for negative sampling
    #[arg(short = 'u', long, default_value_t = 100_000_000)]
    unigram_table_size: usize,

    /// Maximum vocabulary size
    #[arg(short = 'm', long = "max-vocabulary-size", default_value_t = 1_000_000)]
    max_vocab_size: usize,

    /// Initial learning rate of AdaGrad
    #[arg(short = 'e', long, default_value_t = 0.1)]
    eta: real,

    /// Mini-batch size
    #[arg(short = 'b', long, default_value_t = 10000)]
    mini_batch_size: usize,

    /// Iteration number in batch learning
    #[arg(short = 'i', long = "iteration-number", default_value_t = 5)]
    iterations: usize,

    /// Number of threads
    #[arg(short = 'T', long = "thread-num", default_value_t = 10)]
    threads: usize,

    /// Read and write models in the binary format
    #[arg(short = 'B', long = "binary-mode")]
    binary: bool,

    /// Start from the model in FILE ("-" reads stdin); its hyperparameters
    /// override the ones given here
    #[arg(short = 'I', long, value_name = "FILE")]
    initial_model: Option<PathBuf>,

    /// Random seed (default: current Unix time)
    #[arg(short = 'r', long = "random-seed")]
    seed: Option<u64>,

    /// Use the exact logistic function and square root
    #[arg(long)]
    exact: bool,

    /// Do not show progress messages
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Also write the learned input vectors to FILE
    #[arg(long, value_name = "FILE")]
    export_vectors: Option<PathBuf>,

    /// Layout of --export-vectors
    #[arg(long, value_enum, default_value_t = VectorFormat::Text)]
    export_format: VectorFormat,
}

impl Options {
    fn training_options(&self) -> TrainingOptions {
        TrainingOptions {
            vec_size: self.dimensionality,
            window_size: self.window_size,
            neg_sample_num: self.negative_sample_num,
            alpha: self.alpha,
            subsampling_threshold: self.subsampling_threshold,
            eta: self.eta,
            unigram_table_size: self.unigram_table_size,
            max_vocab_size: self.max_vocab_size,
        }
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            method: self.training_method,
            iterations: self.iterations,
            threads: self.threads,
            mini_batch_size: self.mini_batch_size,
            numerics: if self.exact {
                Numerics::EXACT
            } else {
                Numerics::default()
            },
        }
    }

    fn format(&self) -> Format {
        if self.binary {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn progress_bar(quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}] {spinner} {human_pos} sentences ({per_sec})",
    )?);
    pb.enable_steady_tick(Duration::from_secs(1));
    Ok(pb)
}

fn save_model(model: &SkipGram, path: &Path, format: Format) -> Result<()> {
    if is_stdio(path) {
        let mut out = BufWriter::new(io::stdout().lock());
        match format {
            Format::Binary => model.write_binary(&mut out)?,
            Format::Text => model.write_text(&mut out)?,
        }
        out.flush().context("error writing model to stdout")?;
    } else {
        model
            .save(path, format)
            .with_context(|| format!("failed to save model to {path:?}"))?;
    }
    Ok(())
}

fn load_model(path: &Path, format: Format) -> Result<SkipGram> {
    if !is_stdio(path) {
        return SkipGram::load(path, format)
            .with_context(|| format!("failed to load initial model {path:?}"));
    }
    read_model(&mut io::stdin().lock(), format).context("failed to load initial model from stdin")
}

fn read_model<R: BufRead + ?Sized>(r: &mut R, format: Format) -> streamskip::Result<SkipGram> {
    match format {
        Format::Binary => SkipGram::read_binary(r),
        Format::Text => SkipGram::read_text(r),
    }
}

fn run(options: Options) -> Result<()> {
    let seed = match options.seed {
        Some(seed) => seed,
        None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs(),
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let config = options.driver_config();
    config.validate()?;

    info!(seed, "initializing model");
    let mut model = match &options.initial_model {
        Some(path) => {
            if is_stdio(path) && is_stdio(&options.train_file) {
                bail!("the initial model and the training text cannot both come from stdin");
            }
            load_model(path, options.format())?
        }
        None => SkipGram::new(options.training_options(), &mut rng)?,
    };

    let progress = progress_bar(options.quiet)?;
    if is_stdio(&options.train_file) {
        let input = io::stdin().lock();
        match config.method {
            TrainingMethod::Incremental => {
                driver::train_incremental(&mut model, input, config.numerics, &progress, &mut rng)?;
            }
            TrainingMethod::MiniBatch => {
                driver::train_mini_batch(&mut model, input, &config, &progress, &mut rng)?;
            }
            TrainingMethod::Batch => bail!("batch training needs a training file, not stdin"),
        }
    } else {
        let path = &options.train_file;
        let input = BufReader::new(
            File::open(path).with_context(|| format!("failed to open training file {path:?}"))?,
        );
        driver::train(&mut model, input, &config, &progress, &mut rng)
            .with_context(|| format!("error training on {path:?}"))?;
    }
    progress.finish_and_clear();

    save_model(&model, &options.model_file, options.format())?;
    if let Some(path) = &options.export_vectors {
        let mut out = BufWriter::new(
            File::create(path).with_context(|| format!("error creating {path:?}"))?,
        );
        export_vectors(&model, &mut out, options.export_format)
            .with_context(|| format!("error writing vectors to {path:?}"))?;
        out.flush()?;
    }
    info!(vocab_size = model.vocab().len(), "done");
    Ok(())
}

fn main() {
    let options = Options::parse();

    let default_level = if options.quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
