//! Exporting learned input vectors for use outside the trainer.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::{count, real, Result, SkipGram, TrainingOptions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum VectorFormat {
    /// word2vec text layout: `"{words} {dim}"`, then one line per word.
    #[default]
    Text,
    /// word2vec binary layout: the same header, then each word, a space and
    /// `dim` native-endian `f32`s.
    Binary,
    /// A serialized [`Model`].
    Bincode,
}

/// The live part of a trained model: one entry per vocabulary word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub options: TrainingOptions,
    pub vocab: Vec<String>,
    pub counts: Vec<count>,
    /// `embeddings[k * size..(k+1) * size]` is the input vector for word `k`.
    pub embeddings: Vec<real>,
}

impl Model {
    pub fn size(&self) -> usize {
        self.options.vec_size
    }
}

impl From<&SkipGram> for Model {
    fn from(sg: &SkipGram) -> Self {
        let n = sg.vocab().len();
        Model {
            options: *sg.options(),
            vocab: sg.vocab().all().into_iter().map(String::from).collect(),
            counts: sg.counts().to_vec(),
            embeddings: (0..n)
                .flat_map(|i| sg.parameters().input.row_values(i))
                .collect(),
        }
    }
}

pub fn export_vectors<W: Write + ?Sized>(
    sg: &SkipGram,
    w: &mut W,
    format: VectorFormat,
) -> Result<()> {
    if format == VectorFormat::Bincode {
        bincode::serialize_into(w, &Model::from(sg))?;
        return Ok(());
    }

    let input = &sg.parameters().input;
    writeln!(w, "{} {}", sg.vocab().len(), sg.vec_size())?;
    for (i, word) in sg.vocab().all().into_iter().enumerate() {
        write!(w, "{word} ")?;
        let row = input.row_values(i);
        if format == VectorFormat::Binary {
            w.write_all(bytemuck::cast_slice::<real, u8>(&row))?;
        } else {
            for f in row {
                write!(w, "{f} ")?;
            }
        }
        writeln!(w)?;
    }
    Ok(())
}
