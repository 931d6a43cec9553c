//! Nearest-neighbour queries over exported word vectors.

use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Index;
use std::path::Path;

use ordered_float::OrderedFloat;

use crate::checkpoint::truncated;
use crate::export::{Model, VectorFormat};
use crate::{real, Error, Result};

pub fn norm(v: &[real]) -> real {
    dot(v, v).sqrt()
}

/// Scale `v` to unit length. A zero vector is left alone.
pub fn normalize(v: &mut [real]) {
    let len = norm(v);
    if len > 0.0 {
        v.iter_mut().for_each(|e| *e /= len);
    }
}

pub fn dot(a: &[real], b: &[real]) -> real {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A read-only table of unit-length word vectors. Since every row is
/// normalized, `dot` between two rows is their cosine similarity.
#[derive(Debug)]
pub struct Vectors {
    dim: usize,
    words: Vec<String>,
    /// Row `k` is `data[k * dim..(k + 1) * dim]`.
    data: Vec<real>,
}

impl Index<usize> for Vectors {
    type Output = [real];

    fn index(&self, k: usize) -> &[real] {
        &self.data[k * self.dim..][..self.dim]
    }
}

fn header_field(field: Option<&str>, what: &str) -> Result<usize> {
    field
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::malformed(format!("invalid {what} in vector file header")))
}

/// Reads the word that starts the next entry: everything up to a space,
/// minus the newline left over from the previous entry.
fn read_word<R: BufRead + ?Sized>(r: &mut R, k: usize, expected: usize) -> Result<String> {
    let mut word = vec![];
    if r.read_until(b' ', &mut word)? == 0 {
        return Err(Error::malformed(format!("expected {expected} words, found {k}")));
    }
    if word.pop() != Some(b' ') {
        return Err(Error::malformed(format!("entry {k} has no vector")));
    }
    word.retain(|&c| c != b'\n');
    String::from_utf8(word).map_err(|_| Error::malformed(format!("word {k} is not valid UTF-8")))
}

impl Vectors {
    fn new(dim: usize, words: Vec<String>, mut data: Vec<real>) -> Self {
        if dim > 0 {
            data.chunks_exact_mut(dim).for_each(normalize);
        }
        Vectors { dim, words, data }
    }

    /// The input vectors of a model exported as bincode.
    pub fn from_model(model: Model) -> Result<Self> {
        let dim = model.size();
        if model.embeddings.len() != model.vocab.len() * dim {
            return Err(Error::malformed(format!(
                "model has {} values for {} words of size {dim}",
                model.embeddings.len(),
                model.vocab.len()
            )));
        }
        Ok(Vectors::new(dim, model.vocab, model.embeddings))
    }

    pub fn load(path: &Path, format: VectorFormat) -> Result<Self> {
        Vectors::read_from(&mut BufReader::new(File::open(path)?), format)
    }

    /// Reads any layout written by [`crate::export::export_vectors`].
    pub fn read_from<R: BufRead + ?Sized>(r: &mut R, format: VectorFormat) -> Result<Self> {
        if format == VectorFormat::Bincode {
            let model: Model = bincode::deserialize_from(r)?;
            return Vectors::from_model(model);
        }

        let mut header = String::new();
        r.read_line(&mut header)?;
        let mut fields = header.split_whitespace();
        let num_words = header_field(fields.next(), "word count")?;
        let dim = header_field(fields.next(), "vector size")?;

        // Rows are appended as they are read, so a bogus word count in the
        // header fails on missing data instead of on allocation.
        let mut words = vec![];
        let mut data = vec![];
        let mut line = String::new();
        for k in 0..num_words {
            words.push(read_word(r, k, num_words)?);
            let start = data.len();
            data.resize(start + dim, 0.0);
            let row = &mut data[start..];
            if format == VectorFormat::Binary {
                r.read_exact(bytemuck::cast_slice_mut::<real, u8>(row))
                    .map_err(|err| truncated(err, "vector"))?;
            } else {
                line.clear();
                r.read_line(&mut line)?;
                let mut values = line.split_whitespace();
                for e in row.iter_mut() {
                    *e = values
                        .next()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| Error::malformed(format!("bad vector for word {k}")))?;
                }
                if values.next().is_some() {
                    return Err(Error::malformed(format!("vector for word {k} is too long")));
                }
            }
        }
        Ok(Vectors::new(dim, words, data))
    }

    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Dimensionality of every vector.
    pub fn size(&self) -> usize {
        self.dim
    }

    /// Exact, case-sensitive match.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.words.iter().position(|w| w == word)
    }

    /// Panics if `k` is out of range.
    pub fn word(&self, k: usize) -> &str {
        &self.words[k]
    }

    /// The `n` words most similar to `query`, best first, skipping the
    /// indices in `exclude`. `query` should be normalized.
    pub fn nearest(&self, query: &[real], n: usize, exclude: &[usize]) -> Vec<(&str, real)> {
        let mut best: Vec<(&str, real)> = (0..self.num_words())
            .filter(|k| !exclude.contains(k))
            .map(|k| (self.word(k), dot(query, &self[k])))
            .collect();
        best.sort_by_key(|&(_, sim)| Reverse(OrderedFloat(sim)));
        best.truncate(n);
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::TrainingOptions;

    fn binary_file(words: &[(&str, [real; 2])]) -> Vec<u8> {
        let mut bytes = format!("{} 2\n", words.len()).into_bytes();
        for (word, v) in words {
            bytes.extend_from_slice(word.as_bytes());
            bytes.push(b' ');
            bytes.extend_from_slice(bytemuck::cast_slice::<real, u8>(v));
            bytes.push(b'\n');
        }
        bytes
    }

    fn read_binary(bytes: Vec<u8>) -> Result<Vectors> {
        Vectors::read_from(&mut Cursor::new(bytes), VectorFormat::Binary)
    }

    #[test]
    fn load_normalizes_rows() {
        let v = read_binary(binary_file(&[("east", [3.0, 4.0]), ("north", [0.0, 2.0])])).unwrap();
        assert_eq!(v.num_words(), 2);
        assert_eq!(v.size(), 2);
        assert_eq!(v.word(1), "north");
        assert_eq!(v.lookup_word("east"), Some(0));
        assert_eq!(v.lookup_word("west"), None);
        assert!((v[0][0] - 0.6).abs() < 1e-6);
        assert!((v[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(&v[1], &[0.0, 1.0]);
    }

    #[test]
    fn text_layout() {
        let text = "2 2\nred 0.5 0 \ngreen 0 -2 \n";
        let v = Vectors::read_from(&mut Cursor::new(text), VectorFormat::Text).unwrap();
        assert_eq!(v.word(0), "red");
        assert_eq!(&v[0], &[1.0, 0.0]);
        assert_eq!(&v[1], &[0.0, -1.0]);

        let short = "1 3\nred 0.5 0\n";
        let err = Vectors::read_from(&mut Cursor::new(short), VectorFormat::Text).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn bincode_model() {
        let model = Model {
            options: TrainingOptions {
                vec_size: 2,
                ..TrainingOptions::default()
            },
            vocab: vec!["up".into(), "down".into()],
            counts: vec![3, 1],
            embeddings: vec![0.0, 5.0, 0.0, -1.0],
        };
        let bytes = bincode::serialize(&model).unwrap();
        let v = Vectors::read_from(&mut Cursor::new(bytes), VectorFormat::Bincode).unwrap();
        assert_eq!(v.lookup_word("down"), Some(1));
        assert_eq!(&v[0], &[0.0, 1.0]);

        let broken = Model {
            embeddings: vec![1.0; 3],
            ..model
        };
        let err = Vectors::from_model(broken).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn nearest_ranks_by_cosine() {
        let v = read_binary(binary_file(&[
            ("a", [1.0, 0.0]),
            ("b", [1.0, 1.0]),
            ("c", [-1.0, 0.0]),
            ("d", [0.9, 0.1]),
        ]))
        .unwrap();
        let best = v.nearest(&v[0], 2, &[0]);
        let words: Vec<&str> = best.iter().map(|&(w, _)| w).collect();
        assert_eq!(words, vec!["d", "b"]);
        assert!(best[0].1 > best[1].1);
    }

    #[test]
    fn short_file_is_malformed() {
        let mut bytes = binary_file(&[("a", [1.0, 0.0])]);
        bytes.truncate(bytes.len() - 3);
        let err = read_binary(bytes).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");

        let err = read_binary(b"two 2\n".to_vec()).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");

        // The header promises far more words than the file holds.
        let mut bytes = b"4000000000".to_vec();
        bytes.extend_from_slice(&binary_file(&[("a", [1.0, 0.0])])[1..]);
        let err = read_binary(bytes).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn helpers() {
        assert_eq!(norm(&[3.0, 4.0]), 5.0);
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
        let mut z = [0.0, 0.0];
        normalize(&mut z);
        assert_eq!(z, [0.0, 0.0]);
    }
}
