use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::matrix::{Parameter, Real};
use crate::reduce;
use crate::sigmoid::{inv_sqrt, Numerics, SigmoidTable};
use crate::unigram_table::UnigramTable;
use crate::vocab::{is_valid_word, Vocab};
use crate::{count, real, Error, Result};

/// Starting value of every squared-gradient sum, so the first AdaGrad step
/// never divides by zero.
pub(crate) const INITIAL_SQUARED_GRAD: real = 1.0e-8;

/// Hyperparameters. Fixed once a model is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    /// Dimensionality of word embeddings.
    pub vec_size: usize,
    /// Maximum distance between a target word and a context word.
    pub window_size: usize,
    /// Negative samples drawn per (target, context) pair.
    pub neg_sample_num: usize,
    /// Distortion exponent applied to counts in the negative-sampling
    /// distribution.
    pub alpha: real,
    /// Frequent words are randomly skipped as context; smaller values skip
    /// more.
    pub subsampling_threshold: real,
    /// Initial AdaGrad learning rate.
    pub eta: real,
    pub unigram_table_size: usize,
    /// The vocabulary is reduced whenever it reaches this size.
    pub max_vocab_size: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            vec_size: 100,
            window_size: 5,
            neg_sample_num: 5,
            alpha: 0.75,
            subsampling_threshold: 1e-3,
            eta: 0.1,
            unigram_table_size: 100_000_000,
            max_vocab_size: 1_000_000,
        }
    }
}

impl TrainingOptions {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::InvalidOptions(msg.to_string()));
        if self.vec_size == 0 {
            return fail("vec_size must be positive");
        }
        if self.window_size == 0 {
            return fail("window_size must be positive");
        }
        if self.neg_sample_num == 0 {
            return fail("neg_sample_num must be positive");
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return fail("alpha must be in (0, 1]");
        }
        if !(self.subsampling_threshold > 0.0) {
            return fail("subsampling_threshold must be positive");
        }
        if !(self.eta > 0.0) {
            return fail("eta must be positive");
        }
        if self.unigram_table_size == 0 {
            return fail("unigram_table_size must be positive");
        }
        if self.max_vocab_size < 2 {
            return fail("max_vocab_size must be at least 2");
        }
        if self.max_vocab_size > i32::MAX as usize / 2 || self.vec_size > i32::MAX as usize {
            return fail("model dimensions do not fit the checkpoint format");
        }
        Ok(())
    }

    /// Slots in the vocabulary hash table: twice the vocabulary limit keeps
    /// probe chains short.
    pub fn vocab_table_size(&self) -> usize {
        self.max_vocab_size * 2
    }
}

/// Skip-gram model with negative sampling, trained one sentence at a time.
///
/// Index `i` means the same word in the vocabulary, `counts`, the unigram
/// table and every row `i` of the four parameter matrices.
///
/// Statistics updates (`update_word`, `update_statistics`, `train` with
/// `incremental`) take `&mut self` and run on one thread.
/// [`SkipGram::train_sentence`] takes `&self`: any number of threads may run
/// it at once on a shared model. They race on parameter rows without
/// locking, which can lose updates but never corrupts memory.
pub struct SkipGram {
    pub(crate) options: TrainingOptions,
    pub(crate) vocab: Vocab,
    /// Learned input (target) and output (context) vectors.
    pub(crate) vec: Parameter,
    /// AdaGrad sums of squared gradients, parallel to `vec`.
    pub(crate) squared_grad: Parameter,
    pub(crate) total_count: count,
    /// Always `max_vocab_size` long; entries past the vocabulary are 0.
    pub(crate) counts: Vec<count>,
    pub(crate) unigram_table: UnigramTable,
    pub(crate) sigmoid: SigmoidTable,
}

impl SkipGram {
    pub fn new<R: Rng + ?Sized>(options: TrainingOptions, rng: &mut R) -> Result<Self> {
        options.validate()?;
        let rows = options.max_vocab_size;
        let model = SkipGram {
            options,
            vocab: Vocab::new(options.vocab_table_size()),
            vec: Parameter::new(rows, options.vec_size, 0.0),
            squared_grad: Parameter::new(rows, options.vec_size, INITIAL_SQUARED_GRAD),
            total_count: 0,
            counts: vec![0; rows],
            unigram_table: UnigramTable::new(options.unigram_table_size),
            sigmoid: SigmoidTable::new(),
        };
        for w in 0..rows {
            model.init_vectors(w, rng);
        }
        Ok(model)
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.options
    }

    pub fn vec_size(&self) -> usize {
        self.options.vec_size
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Counts of the words currently in the vocabulary, by index.
    pub fn counts(&self) -> &[count] {
        &self.counts[..self.vocab.len()]
    }

    pub fn total_count(&self) -> count {
        self.total_count
    }

    pub fn parameters(&self) -> &Parameter {
        &self.vec
    }

    pub fn accumulators(&self) -> &Parameter {
        &self.squared_grad
    }

    pub fn unigram_table(&self) -> &UnigramTable {
        &self.unigram_table
    }

    /// Fresh random embeddings for row `w`.
    fn init_vectors<R: Rng + ?Sized>(&self, w: usize, rng: &mut R) {
        let max = 0.5 / self.options.vec_size as real;
        self.vec.input.fill_row_with(w, || rng.gen_range(-max..max));
        self.vec.output.fill_row_with(w, || rng.gen_range(-max..max));
    }

    fn reset_row<R: Rng + ?Sized>(&self, w: usize, rng: &mut R) {
        self.init_vectors(w, rng);
        self.squared_grad.input.fill_row_with(w, || INITIAL_SQUARED_GRAD);
        self.squared_grad.output.fill_row_with(w, || INITIAL_SQUARED_GRAD);
    }

    /// Count one occurrence of every word in `sentence`.
    pub fn update_statistics<S, R>(&mut self, sentence: &[S], rng: &mut R)
    where
        S: AsRef<str>,
        R: Rng + ?Sized,
    {
        for word in sentence {
            self.update_word(word.as_ref(), rng);
        }
    }

    /// Count one occurrence of `word`, adding it to the vocabulary if
    /// needed. When the vocabulary fills up it is reduced, and the unigram
    /// table is rebuilt exactly.
    ///
    /// Words that fail [`is_valid_word`] are ignored; training then treats
    /// them as unknown.
    pub fn update_word<R: Rng + ?Sized>(&mut self, word: &str, rng: &mut R) {
        if !is_valid_word(word) {
            return;
        }
        let index = self.vocab.add(word);
        self.total_count += 1;
        self.counts[index] += 1;

        let alpha = self.options.alpha as f64;
        let c = self.counts[index] as f64;
        let weight = c.powf(alpha) - (c - 1.0).powf(alpha);
        self.unigram_table.update(index, weight as real, rng);

        if self.vocab.len() >= self.options.max_vocab_size {
            self.reduce_vocab(rng);
            self.rebuild_unigram_table(rng);
        }
    }

    /// Misra-Gries reduction: evict every word seen only once, charge one
    /// occurrence to each survivor, and relabel all parallel structures.
    ///
    /// Runs right after a new word (count 1) fills the vocabulary, so at
    /// least that word is evicted.
    fn reduce_vocab<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let live = self.vocab.len();
        let (compaction, total) = reduce::misra_gries(&mut self.counts, live);
        self.total_count = total;
        self.vocab.compact(&compaction);
        self.vec.compact(&compaction);
        self.squared_grad.compact(&compaction);
        for w in compaction.kept()..self.options.max_vocab_size {
            self.reset_row(w, rng);
        }
        debug!(
            before = live,
            after = compaction.kept(),
            total_count = total,
            "reduced vocabulary"
        );
    }

    /// Rebuild the unigram table exactly from the current counts.
    pub fn rebuild_unigram_table<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let live = self.vocab.len();
        self.unigram_table
            .build(&self.counts[..live], self.options.alpha, rng);
        debug!(
            vocab_size = live,
            table_size = self.unigram_table.len(),
            "rebuilt unigram table"
        );
    }

    /// Train on one sentence. With `incremental`, first counts every word
    /// of the sentence (see [`SkipGram::update_statistics`]).
    pub fn train<S, R>(
        &mut self,
        sentence: &[S],
        incremental: bool,
        numerics: Numerics,
        grad: &mut [real],
        rng: &mut R,
    ) where
        S: AsRef<str>,
        R: Rng + ?Sized,
    {
        if incremental {
            self.update_statistics(sentence, rng);
        }
        self.train_sentence(sentence, numerics, grad, rng);
    }

    /// Run SGD over every (target, context) pair of `sentence` without
    /// touching vocabulary statistics. Unknown words are skipped.
    ///
    /// `grad` is scratch space of length `vec_size`.
    ///
    /// Panics if a pair survives subsampling while the unigram table is
    /// still empty.
    pub fn train_sentence<S, R>(
        &self,
        sentence: &[S],
        numerics: Numerics,
        grad: &mut [real],
        rng: &mut R,
    ) where
        S: AsRef<str>,
        R: Rng + ?Sized,
    {
        let n = sentence.len();
        let mut neg_samples = vec![0; self.options.neg_sample_num];
        for target in 0..n {
            let Some(t) = self.vocab.encode(sentence[target].as_ref()) else {
                continue;
            };

            // Offsets run over -radius..radius: one more word on the left
            // than on the right.
            let radius = rng.gen_range(1..=self.options.window_size) as isize;
            for offset in -radius..radius {
                let pos = target as isize + offset;
                if offset == 0 || pos < 0 {
                    continue;
                }
                let pos = pos as usize;
                if pos >= n {
                    break;
                }
                let Some(c) = self.vocab.encode(sentence[pos].as_ref()) else {
                    continue;
                };
                if !self.keep_context(c, rng) {
                    continue;
                }

                for s in neg_samples.iter_mut() {
                    *s = self.unigram_table.sample(rng);
                }
                self.sgd(t, c, &neg_samples, numerics, grad);
            }
        }
    }

    /// Subsampling: frequent context words are kept with probability
    /// `sqrt(threshold * total_count / count)`. Words with no count are
    /// always kept.
    fn keep_context<R: Rng + ?Sized>(&self, c: usize, rng: &mut R) -> bool {
        let cn = self.counts[c];
        if cn == 0 {
            return true;
        }
        let threshold = self.options.subsampling_threshold * self.total_count as real;
        let p = (threshold / cn as real).sqrt();
        p >= rng.gen::<real>()
    }

    /// One SGD step with AdaGrad for target `t`, context `c` and
    /// `neg_samples`. `grad` is scratch space of length `vec_size`; on
    /// return it holds the gradient that was applied to the input vector of
    /// `t`.
    ///
    /// Output vectors are updated as soon as each sample is processed; the
    /// input vector of `t` is updated once, at the end.
    pub fn sgd(
        &self,
        t: usize,
        c: usize,
        neg_samples: &[usize],
        numerics: Numerics,
        grad: &mut [real],
    ) {
        assert_eq!(grad.len(), self.options.vec_size);
        let input = self.vec.input.row(t);
        grad.fill(0.0);

        self.sgd_output(input, c, 1.0, numerics, grad);
        for &v in neg_samples {
            self.sgd_output(input, v, 0.0, numerics, grad);
        }

        let eta = self.options.eta;
        let acc = self.squared_grad.input.row(t);
        for ((x, a), &g) in input.iter().zip(acc).zip(grad.iter()) {
            a.add(g * g);
            x.add(-eta * g * inv_sqrt(a.get(), numerics.inv_sqrt));
        }
    }

    /// Update output vector `o` towards `label` and add its contribution to
    /// the input gradient.
    fn sgd_output(
        &self,
        input: &[Real],
        o: usize,
        label: real,
        numerics: Numerics,
        grad: &mut [real],
    ) {
        let output = self.vec.output.row(o);
        let acc = self.squared_grad.output.row(o);

        let f = row_dot(input, output);
        // d(loss)/d(f) for the log-sigmoid loss
        let g = self.sigmoid.sigmoid(f, numerics.sigmoid) - label;

        for (e, y) in grad.iter_mut().zip(output) {
            *e += g * y.get();
        }
        let eta = self.options.eta;
        for ((x, a), y) in input.iter().zip(acc).zip(output) {
            let x = x.get();
            a.add(g * g * x * x);
            y.add(-eta * g * x * inv_sqrt(a.get(), numerics.inv_sqrt));
        }
    }
}

impl fmt::Debug for SkipGram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipGram")
            .field("options", &self.options)
            .field("vocab_size", &self.vocab.len())
            .field("total_count", &self.total_count)
            .field("unigram_table_len", &self.unigram_table.len())
            .finish_non_exhaustive()
    }
}

fn row_dot(a: &[Real], b: &[Real]) -> real {
    a.iter().zip(b).map(|(a, b)| a.get() * b.get()).sum()
}
