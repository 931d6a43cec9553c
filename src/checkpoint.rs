//! Saving and loading complete training state.
//!
//! Two formats are supported. The binary format is a sequence of native
//! byte-order fields:
//!
//! ```text
//! max_vocab_size:i32 vec_size:i32 window_size:i32 neg_sample_num:i32
//! alpha:f32 subsampling_threshold:f32 eta:f32 unigram_table_size:i32
//! vocabulary (see `Vocab::write_to`)
//! input, output, input accumulators, output accumulators
//!     (each rows:i32 cols:i32 then row-major f32 data)
//! total_count:u64 counts:[u64; max_vocab_size]
//! ```
//!
//! The text format is one tab-separated header line
//!
//! ```text
//! vocab_size max_vocab_size vec_size window_size neg_sample_num alpha
//!     subsampling_threshold eta unigram_table_size
//! ```
//!
//! followed by one line per word, in index order, with five tab-separated
//! fields: the word, its count, and its input vector, output vector, input
//! accumulators and output accumulators, each as space-separated numbers.
//!
//! Loading always rebuilds the unigram table exactly from the counts.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::matrix::{DenseMatrix, Parameter};
use crate::unigram_table::UnigramTable;
use crate::vocab::{is_valid_word, Vocab};
use crate::{count, real, Error, Result, SigmoidTable, SkipGram, TrainingOptions};

/// Seed for the unigram-table rebuild done by every load, so that loading
/// the same file twice gives the same model.
const LOAD_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Binary,
    Text,
}

pub(crate) fn truncated(err: io::Error, what: &str) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::malformed(format!("truncated {what}"))
    } else {
        Error::Io(err)
    }
}

fn read_array<R: Read + ?Sized, const N: usize>(r: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0; N];
    r.read_exact(&mut buf).map_err(|err| truncated(err, what))?;
    Ok(buf)
}

pub(crate) fn read_i32<R: Read + ?Sized>(r: &mut R, what: &str) -> Result<i32> {
    Ok(i32::from_ne_bytes(read_array(r, what)?))
}

pub(crate) fn read_u32<R: Read + ?Sized>(r: &mut R, what: &str) -> Result<u32> {
    Ok(u32::from_ne_bytes(read_array(r, what)?))
}

pub(crate) fn read_u64<R: Read + ?Sized>(r: &mut R, what: &str) -> Result<u64> {
    Ok(u64::from_ne_bytes(read_array(r, what)?))
}

fn read_f32<R: Read + ?Sized>(r: &mut R, what: &str) -> Result<f32> {
    Ok(f32::from_ne_bytes(read_array(r, what)?))
}

pub(crate) fn write_i32<W: Write + ?Sized>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

pub(crate) fn write_u32<W: Write + ?Sized>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

pub(crate) fn write_u64<W: Write + ?Sized>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

fn write_f32<W: Write + ?Sized>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

fn read_dimension<R: Read + ?Sized>(r: &mut R, what: &str) -> Result<usize> {
    let v = read_i32(r, what)?;
    if v <= 0 {
        return Err(Error::malformed(format!("{what} must be positive, got {v}")));
    }
    Ok(v as usize)
}

fn read_matrix<R: Read + ?Sized>(
    r: &mut R,
    options: &TrainingOptions,
    what: &str,
) -> Result<DenseMatrix> {
    DenseMatrix::read_from(r, options.max_vocab_size, options.vec_size).map_err(|err| match err {
        Error::Malformed { context } => Error::malformed(format!("{what} {context}")),
        err => err,
    })
}

fn checked_options(options: TrainingOptions) -> Result<TrainingOptions> {
    options
        .validate()
        .map_err(|err| Error::malformed(err.to_string()))?;
    Ok(options)
}

fn parse_field<T: FromStr>(s: &str, what: &str) -> Result<T> {
    s.parse()
        .map_err(|_| Error::malformed(format!("invalid {what}: {s:?}")))
}

fn parse_row(s: &str, len: usize, what: &str) -> Result<Vec<real>> {
    let row = s
        .split(' ')
        .map(|x| parse_field::<real>(x, what))
        .collect::<Result<Vec<real>>>()?;
    if row.len() != len {
        return Err(Error::malformed(format!(
            "{what} has {} elements, expected {len}",
            row.len()
        )));
    }
    Ok(row)
}

fn write_row<W: Write + ?Sized>(w: &mut W, m: &DenseMatrix, i: usize) -> io::Result<()> {
    for (j, e) in m.row(i).iter().enumerate() {
        if j == 0 {
            write!(w, "\t{}", e.get())?;
        } else {
            write!(w, " {}", e.get())?;
        }
    }
    Ok(())
}

impl SkipGram {
    pub fn save(&self, path: &Path, format: Format) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        match format {
            Format::Binary => self.write_binary(&mut w)?,
            Format::Text => self.write_text(&mut w)?,
        }
        w.flush()?;
        debug!(path = %path.display(), ?format, "saved model");
        Ok(())
    }

    pub fn load(path: &Path, format: Format) -> Result<SkipGram> {
        let mut r = BufReader::new(File::open(path)?);
        let model = match format {
            Format::Binary => SkipGram::read_binary(&mut r)?,
            Format::Text => SkipGram::read_text(&mut r)?,
        };
        debug!(
            path = %path.display(),
            ?format,
            vocab_size = model.vocab.len(),
            "loaded model"
        );
        Ok(model)
    }

    pub fn write_binary<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let o = &self.options;
        write_i32(w, o.max_vocab_size as i32)?;
        write_i32(w, o.vec_size as i32)?;
        write_i32(w, o.window_size as i32)?;
        write_i32(w, o.neg_sample_num as i32)?;
        write_f32(w, o.alpha)?;
        write_f32(w, o.subsampling_threshold)?;
        write_f32(w, o.eta)?;
        write_i32(w, o.unigram_table_size as i32)?;

        self.vocab.write_to(w)?;
        self.vec.input.write_to(w)?;
        self.vec.output.write_to(w)?;
        self.squared_grad.input.write_to(w)?;
        self.squared_grad.output.write_to(w)?;

        write_u64(w, self.total_count)?;
        w.write_all(bytemuck::cast_slice::<count, u8>(&self.counts))?;
        Ok(())
    }

    pub fn read_binary<R: Read + ?Sized>(r: &mut R) -> Result<SkipGram> {
        let max_vocab_size = read_dimension(r, "max_vocab_size")?;
        let vec_size = read_dimension(r, "vec_size")?;
        let window_size = read_dimension(r, "window_size")?;
        let neg_sample_num = read_dimension(r, "neg_sample_num")?;
        let alpha = read_f32(r, "alpha")?;
        let subsampling_threshold = read_f32(r, "subsampling_threshold")?;
        let eta = read_f32(r, "eta")?;
        let unigram_table_size = read_dimension(r, "unigram_table_size")?;
        let options = checked_options(TrainingOptions {
            vec_size,
            window_size,
            neg_sample_num,
            alpha,
            subsampling_threshold,
            eta,
            unigram_table_size,
            max_vocab_size,
        })?;

        let vocab = Vocab::read_from(r)?;
        if vocab.len() >= max_vocab_size {
            return Err(Error::malformed(format!(
                "{} words do not fit max_vocab_size {max_vocab_size}",
                vocab.len()
            )));
        }
        if vocab.table_size() < max_vocab_size {
            return Err(Error::malformed(format!(
                "vocabulary table size {} is smaller than max_vocab_size {max_vocab_size}",
                vocab.table_size()
            )));
        }

        let vec = Parameter {
            input: read_matrix(r, &options, "input")?,
            output: read_matrix(r, &options, "output")?,
        };
        let squared_grad = Parameter {
            input: read_matrix(r, &options, "input accumulator")?,
            output: read_matrix(r, &options, "output accumulator")?,
        };

        let total_count = read_u64(r, "total count")?;
        let mut counts: Vec<count> = vec![0; max_vocab_size];
        r.read_exact(bytemuck::cast_slice_mut::<count, u8>(&mut counts))
            .map_err(|err| truncated(err, "counts"))?;
        let live_total: count = counts[..vocab.len()].iter().sum();
        if live_total != total_count {
            warn!(total_count, live_total, "stored total count disagrees with word counts");
        }

        let mut model = SkipGram {
            options,
            vocab,
            vec,
            squared_grad,
            total_count,
            counts,
            unigram_table: UnigramTable::new(unigram_table_size),
            sigmoid: SigmoidTable::new(),
        };
        model.rebuild_unigram_table(&mut StdRng::seed_from_u64(LOAD_SEED));
        Ok(model)
    }

    pub fn write_text<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let o = &self.options;
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.vocab.len(),
            o.max_vocab_size,
            o.vec_size,
            o.window_size,
            o.neg_sample_num,
            o.alpha,
            o.subsampling_threshold,
            o.eta,
            o.unigram_table_size
        )?;
        for (index, word) in self.vocab.all().into_iter().enumerate() {
            if !is_valid_word(word) {
                return Err(Error::malformed(format!("cannot store word {word:?}")));
            }
            write!(w, "{word}\t{}", self.counts[index])?;
            write_row(w, &self.vec.input, index)?;
            write_row(w, &self.vec.output, index)?;
            write_row(w, &self.squared_grad.input, index)?;
            write_row(w, &self.squared_grad.output, index)?;
            writeln!(w)?;
        }
        Ok(())
    }

    /// Rows past the stored vocabulary get fresh random vectors.
    pub fn read_text<R: BufRead + ?Sized>(r: &mut R) -> Result<SkipGram> {
        let mut lines = r.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::malformed("empty checkpoint"))??;
        let fields: Vec<&str> = header.split('\t').collect();
        if fields.len() != 9 {
            return Err(Error::malformed(format!(
                "header has {} fields, expected 9",
                fields.len()
            )));
        }
        let vocab_size: usize = parse_field(fields[0], "vocab_size")?;
        let options = checked_options(TrainingOptions {
            max_vocab_size: parse_field(fields[1], "max_vocab_size")?,
            vec_size: parse_field(fields[2], "vec_size")?,
            window_size: parse_field(fields[3], "window_size")?,
            neg_sample_num: parse_field(fields[4], "neg_sample_num")?,
            alpha: parse_field(fields[5], "alpha")?,
            subsampling_threshold: parse_field(fields[6], "subsampling_threshold")?,
            eta: parse_field(fields[7], "eta")?,
            unigram_table_size: parse_field(fields[8], "unigram_table_size")?,
        })?;

        let mut rng = StdRng::seed_from_u64(LOAD_SEED);
        let mut model = SkipGram::new(options, &mut rng)?;
        let dim = options.vec_size;
        for (line_num, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let line_num = line_num + 2;
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 6 {
                return Err(Error::malformed(format!(
                    "line {line_num} has {} fields, expected 6",
                    fields.len()
                )));
            }
            let word = fields[0];
            if !is_valid_word(word) {
                return Err(Error::malformed(format!("invalid word on line {line_num}")));
            }
            let cn: count = parse_field(fields[1], "count")?;
            if model.vocab.len() + 1 >= options.max_vocab_size {
                return Err(Error::malformed(format!(
                    "more words than max_vocab_size {} allows",
                    options.max_vocab_size
                )));
            }
            let index = model.vocab.add(word);
            if index + 1 != model.vocab.len() {
                return Err(Error::malformed(format!(
                    "duplicate word {word:?} on line {line_num}"
                )));
            }
            model.counts[index] = cn;
            model.total_count += cn;
            model.vec.input.set_row(index, &parse_row(fields[2], dim, "input vector")?);
            model.vec.output.set_row(index, &parse_row(fields[3], dim, "output vector")?);
            model
                .squared_grad
                .input
                .set_row(index, &parse_row(fields[4], dim, "input accumulator")?);
            model
                .squared_grad
                .output
                .set_row(index, &parse_row(fields[5], dim, "output accumulator")?);
        }
        if model.vocab.len() != vocab_size {
            return Err(Error::malformed(format!(
                "header says {vocab_size} words, found {}",
                model.vocab.len()
            )));
        }

        model.rebuild_unigram_table(&mut rng);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::skipgram::INITIAL_SQUARED_GRAD;
    use crate::Numerics;

    fn trained_model() -> SkipGram {
        let mut rng = StdRng::seed_from_u64(0);
        let options = TrainingOptions {
            vec_size: 3,
            max_vocab_size: 20,
            unigram_table_size: 10,
            subsampling_threshold: 1.0,
            ..TrainingOptions::default()
        };
        let mut sg = SkipGram::new(options, &mut rng).unwrap();
        let text: Vec<&str> = "A B C C D B DE D".split(' ').collect();
        sg.update_statistics(&text, &mut rng);
        let mut grad = vec![0.0; 3];
        sg.train_sentence(&text, Numerics::default(), &mut grad, &mut rng);
        sg
    }

    fn assert_same_state(a: &SkipGram, b: &SkipGram) {
        assert_eq!(a.options(), b.options());
        assert_eq!(a.vocab().all(), b.vocab().all());
        assert_eq!(a.counts(), b.counts());
        assert_eq!(a.total_count(), b.total_count());
        for i in 0..a.vocab().len() {
            assert_eq!(a.parameters().input.row_values(i), b.parameters().input.row_values(i));
            assert_eq!(a.parameters().output.row_values(i), b.parameters().output.row_values(i));
            assert_eq!(
                a.accumulators().input.row_values(i),
                b.accumulators().input.row_values(i)
            );
            assert_eq!(
                a.accumulators().output.row_values(i),
                b.accumulators().output.row_values(i)
            );
        }
    }

    #[test]
    fn binary_round_trip_in_memory() {
        let sg = trained_model();
        let mut bytes = vec![];
        sg.write_binary(&mut bytes).unwrap();
        let loaded = SkipGram::read_binary(&mut Cursor::new(bytes)).unwrap();
        assert_same_state(&sg, &loaded);
        assert_eq!(loaded.vocab(), sg.vocab());
        assert!(!loaded.unigram_table().is_empty());
    }

    #[test]
    fn text_round_trip_in_memory() {
        let sg = trained_model();
        let mut bytes = vec![];
        sg.write_text(&mut bytes).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("5\t20\t3\t5\t5\t0.75\t1\t0.1\t10\n"), "{text}");
        assert_eq!(text.lines().count(), 6);

        let loaded = SkipGram::read_text(&mut Cursor::new(bytes)).unwrap();
        assert_same_state(&sg, &loaded);
    }

    #[test]
    fn text_header_with_wrong_field_count_is_malformed() {
        let err = SkipGram::read_text(&mut Cursor::new("1\t2\t3\n")).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn text_entry_with_short_vector_is_malformed() {
        let input = "1\t20\t2\t5\t5\t0.75\t0.001\t0.1\t10\nA\t3\t0.1\t0.1 0.2\t1 1\t1 1\n";
        let err = SkipGram::read_text(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn text_entry_count_must_match_header() {
        let input = "2\t20\t1\t5\t5\t0.75\t0.001\t0.1\t10\nA\t3\t0.1\t0.2\t1\t1\n";
        let err = SkipGram::read_text(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn truncated_binary_is_malformed() {
        let sg = trained_model();
        let mut bytes = vec![];
        sg.write_binary(&mut bytes).unwrap();
        for len in [0, 3, 20, 40, bytes.len() - 1] {
            let err = SkipGram::read_binary(&mut Cursor::new(&bytes[..len])).unwrap_err();
            assert!(matches!(err, Error::Malformed { .. }), "len {len}: {err}");
        }
    }

    #[test]
    fn corrupt_matrix_shape_is_malformed() {
        let sg = trained_model();
        let mut bytes = vec![];
        sg.write_binary(&mut bytes).unwrap();
        let mut vocab_bytes = Vec::<u8>::new();
        sg.vocab().write_to(&mut vocab_bytes).unwrap();
        let first_matrix = 8 * 4 + vocab_bytes.len();
        assert_eq!(bytes[first_matrix..][..4], 20i32.to_ne_bytes());

        for (rows, cols) in [(i32::MAX, i32::MAX), (20, 4), (-1, 3)] {
            let mut corrupt = bytes.clone();
            corrupt[first_matrix..][..4].copy_from_slice(&rows.to_ne_bytes());
            corrupt[first_matrix + 4..][..4].copy_from_slice(&cols.to_ne_bytes());
            let err = SkipGram::read_binary(&mut Cursor::new(corrupt)).unwrap_err();
            assert!(matches!(err, Error::Malformed { .. }), "{rows}x{cols}: {err}");
        }
    }

    #[test]
    fn words_from_tab_separated_lines_survive_a_text_round_trip() {
        let mut rng = StdRng::seed_from_u64(0);
        let options = TrainingOptions {
            vec_size: 2,
            max_vocab_size: 10,
            unigram_table_size: 10,
            ..TrainingOptions::default()
        };
        let mut sg = SkipGram::new(options, &mut rng).unwrap();
        sg.update_statistics(&crate::driver::tokenize("a\tb c"), &mut rng);
        assert_eq!(sg.vocab().all(), vec!["a", "b", "c"]);

        let mut bytes = vec![];
        sg.write_text(&mut bytes).unwrap();
        let loaded = SkipGram::read_text(&mut Cursor::new(bytes)).unwrap();
        assert_same_state(&sg, &loaded);
    }

    #[test]
    fn unstorable_word_is_not_written() {
        let mut sg = trained_model();
        sg.vocab.add("tab\there");
        let err = sg.write_text(&mut Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
        let err = sg.write_binary(&mut Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SkipGram::load(&dir.path().join("nope.bin"), Format::Binary).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
    }

    #[test]
    fn text_load_reinitializes_rows_past_the_vocabulary() {
        let sg = trained_model();
        let mut bytes = vec![];
        sg.write_text(&mut bytes).unwrap();
        let loaded = SkipGram::read_text(&mut Cursor::new(bytes)).unwrap();
        let last = loaded.options().max_vocab_size - 1;
        assert_eq!(
            loaded.accumulators().output.row_values(last),
            vec![INITIAL_SQUARED_GRAD; 3]
        );
    }
}
