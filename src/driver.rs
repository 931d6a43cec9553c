//! Feeding a stream of sentences to a model.
//!
//! Input is one sentence per line, tokens separated by single spaces. There
//! are three ways to train:
//!
//! * incremental: one thread; each sentence updates the statistics and is
//!   trained on right away.
//! * mini-batch: statistics are updated as sentences arrive; every
//!   `mini_batch_size` sentences, worker threads train on the batch.
//! * batch: one pass collects the statistics, then `iterations` passes train
//!   on mini-batches with the statistics frozen.

use std::io::{BufRead, Seek, SeekFrom};
use std::thread;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::{Error, Numerics, Result, SkipGram};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TrainingMethod {
    #[default]
    Incremental,
    MiniBatch,
    Batch,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub method: TrainingMethod,
    /// Passes over the input in batch training.
    pub iterations: usize,
    pub threads: usize,
    pub mini_batch_size: usize,
    pub numerics: Numerics,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            method: TrainingMethod::Incremental,
            iterations: 5,
            threads: 10,
            mini_batch_size: 10000,
            numerics: Numerics::default(),
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::InvalidOptions("threads must be positive".to_string()));
        }
        if self.mini_batch_size == 0 {
            return Err(Error::InvalidOptions(
                "mini_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    /// Sentences trained on, counting every pass.
    pub sentences: u64,
    pub elapsed: Duration,
}

impl TrainingReport {
    fn finish(sentences: u64, start: Instant, method: TrainingMethod) -> Self {
        let report = TrainingReport {
            sentences,
            elapsed: start.elapsed(),
        };
        info!(
            ?method,
            sentences,
            seconds = report.elapsed.as_secs_f64(),
            sentences_per_sec = report.sentences_per_sec(),
            "training done"
        );
        report
    }

    pub fn sentences_per_sec(&self) -> f64 {
        self.sentences as f64 / self.elapsed.as_secs_f64().max(1e-9)
    }
}

/// Split a line into tokens at runs of ASCII whitespace (spaces and tabs).
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_ascii_whitespace().collect()
}

fn owned_tokens(line: &str) -> Vec<String> {
    tokenize(line).into_iter().map(String::from).collect()
}

/// Train on `sentences` with `threads` workers sharing `model`. Worker `i`
/// takes the contiguous slice `i*n/threads .. (i+1)*n/threads`, with its own
/// gradient buffer and a random generator seeded from `rng`. Returns after
/// every worker has finished.
pub fn async_sgd<S, R>(
    model: &SkipGram,
    sentences: &[Vec<S>],
    threads: usize,
    numerics: Numerics,
    rng: &mut R,
) where
    S: AsRef<str> + Sync,
    R: Rng + ?Sized,
{
    let threads = threads.max(1);
    let n = sentences.len();
    let seeds: Vec<u64> = (0..threads).map(|_| rng.gen()).collect();
    thread::scope(|s| {
        for (i, seed) in seeds.into_iter().enumerate() {
            let slice = &sentences[i * n / threads..(i + 1) * n / threads];
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut grad = vec![0.0; model.vec_size()];
                for sentence in slice {
                    model.train_sentence(sentence, numerics, &mut grad, &mut rng);
                }
            });
        }
    });
}

pub fn train_incremental<I, R>(
    model: &mut SkipGram,
    input: I,
    numerics: Numerics,
    progress: &ProgressBar,
    rng: &mut R,
) -> Result<TrainingReport>
where
    I: BufRead,
    R: Rng + ?Sized,
{
    info!("training incremental SGNS");
    let start = Instant::now();
    let mut grad = vec![0.0; model.vec_size()];
    let mut sentences = 0;
    for line in input.lines() {
        let line = line?;
        model.train(&tokenize(&line), true, numerics, &mut grad, rng);
        sentences += 1;
        progress.inc(1);
    }
    Ok(TrainingReport::finish(sentences, start, TrainingMethod::Incremental))
}

pub fn train_mini_batch<I, R>(
    model: &mut SkipGram,
    input: I,
    config: &DriverConfig,
    progress: &ProgressBar,
    rng: &mut R,
) -> Result<TrainingReport>
where
    I: BufRead,
    R: Rng + ?Sized,
{
    config.validate()?;
    info!(threads = config.threads, "training mini-batch SGNS");
    let start = Instant::now();
    let mut sentences = 0;
    let mut batch: Vec<Vec<String>> = Vec::with_capacity(config.mini_batch_size);
    for line in input.lines() {
        let tokens = owned_tokens(&line?);
        model.update_statistics(&tokens, rng);
        batch.push(tokens);
        if batch.len() == config.mini_batch_size {
            sentences += flush(model, &mut batch, config, progress, rng);
        }
    }
    sentences += flush(model, &mut batch, config, progress, rng);
    Ok(TrainingReport::finish(sentences, start, TrainingMethod::MiniBatch))
}

/// Train on the batch and empty it. Returns the number of sentences trained.
fn flush<R: Rng + ?Sized>(
    model: &SkipGram,
    batch: &mut Vec<Vec<String>>,
    config: &DriverConfig,
    progress: &ProgressBar,
    rng: &mut R,
) -> u64 {
    if batch.is_empty() {
        return 0;
    }
    async_sgd(model, batch, config.threads, config.numerics, rng);
    let n = batch.len() as u64;
    progress.inc(n);
    batch.clear();
    n
}

/// Needs a seekable input: it is read once for statistics and then once per
/// iteration.
pub fn train_batch<I, R>(
    model: &mut SkipGram,
    mut input: I,
    config: &DriverConfig,
    progress: &ProgressBar,
    rng: &mut R,
) -> Result<TrainingReport>
where
    I: BufRead + Seek,
    R: Rng + ?Sized,
{
    config.validate()?;
    info!("precomputing unigram table");
    for line in (&mut input).lines() {
        model.update_statistics(&tokenize(&line?), rng);
    }
    model.rebuild_unigram_table(rng);
    info!(
        vocab_size = model.vocab().len(),
        total_count = model.total_count(),
        "statistics pass done"
    );

    info!(
        threads = config.threads,
        iterations = config.iterations,
        "training batch SGNS"
    );
    let start = Instant::now();
    let mut sentences = 0;
    let mut batch: Vec<Vec<String>> = Vec::with_capacity(config.mini_batch_size);
    for iteration in 0..config.iterations {
        input.seek(SeekFrom::Start(0))?;
        for line in (&mut input).lines() {
            batch.push(owned_tokens(&line?));
            if batch.len() == config.mini_batch_size {
                sentences += flush(model, &mut batch, config, progress, rng);
            }
        }
        sentences += flush(model, &mut batch, config, progress, rng);
        info!(iteration = iteration + 1, sentences, "finished pass");
    }
    Ok(TrainingReport::finish(sentences, start, TrainingMethod::Batch))
}

/// Dispatch on `config.method`. Batch training needs a seekable input; the
/// other methods accept any `BufRead`.
pub fn train<I, R>(
    model: &mut SkipGram,
    input: I,
    config: &DriverConfig,
    progress: &ProgressBar,
    rng: &mut R,
) -> Result<TrainingReport>
where
    I: BufRead + Seek,
    R: Rng + ?Sized,
{
    match config.method {
        TrainingMethod::Incremental => {
            train_incremental(model, input, config.numerics, progress, rng)
        }
        TrainingMethod::MiniBatch => train_mini_batch(model, input, config, progress, rng),
        TrainingMethod::Batch => train_batch(model, input, config, progress, rng),
    }
}
