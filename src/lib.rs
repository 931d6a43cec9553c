//! Streaming skip-gram with negative sampling.
//!
//! A [`SkipGram`] learns word embeddings from a stream of tokenized
//! sentences while keeping its vocabulary bounded. The vocabulary, the word
//! counts, the negative-sampling table and the parameter matrices all share
//! one dense index space; vocabulary reduction relabels all of them at once.

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

#[allow(non_camel_case_types)]
pub type count = u64;

mod error;
pub use error::{Error, Result};

mod random;
pub use random::stochastic_round;

pub mod matrix;
pub use matrix::{DenseMatrix, Parameter, Real};

pub mod vocab;
pub use vocab::Vocab;

pub mod unigram_table;
pub use unigram_table::UnigramTable;

pub mod sigmoid;
pub use sigmoid::{InvSqrtKind, Numerics, SigmoidKind, SigmoidTable};

pub mod reduce;
pub use reduce::Compaction;

mod skipgram;
pub use skipgram::{SkipGram, TrainingOptions};

pub mod checkpoint;
pub use checkpoint::Format;

pub mod driver;

pub mod export;
pub use export::VectorFormat;

mod vectors;
pub use vectors::{dot, norm, normalize, Vectors};
