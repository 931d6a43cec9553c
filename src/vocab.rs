//! Open-addressing symbol table mapping words to dense indices.

use std::io::{Read, Write};

use crate::checkpoint::{read_u32, read_u64, truncated, write_u32, write_u64};
use crate::reduce::Compaction;
use crate::{Error, Result};

/// 32-bit FNV-1a over the UTF-8 bytes of a word.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Whether `word` can be a vocabulary entry. Checkpoints separate words
/// with spaces and fields with tabs and newlines, so a word must be
/// non-empty and free of ASCII whitespace.
pub fn is_valid_word(word: &str) -> bool {
    !word.is_empty() && !word.bytes().any(|b| b.is_ascii_whitespace())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    word: String,
    index: usize,
}

/// Fixed-capacity hash table with linear probing. Words receive the indices
/// `0, 1, 2, ...` in insertion order; there are never gaps. Individual words
/// are never removed; [`Vocab::compact`] rebuilds the whole table instead.
///
/// The table must have spare slots: `add` panics when it has to probe every
/// slot without finding the word or an empty slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocab {
    size: usize,
    table: Vec<Option<Slot>>,
}

impl Vocab {
    pub fn new(table_size: usize) -> Self {
        assert!(table_size > 0, "vocabulary table needs at least one slot");
        Vocab {
            size: 0,
            table: vec![None; table_size],
        }
    }

    /// Number of words, which is also the next index to be assigned.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    pub fn clear(&mut self) {
        self.size = 0;
        self.table.fill(None);
    }

    fn home_slot(&self, word: &str) -> usize {
        fnv1a(word.as_bytes()) as usize % self.table.len()
    }

    /// Returns the index of `word`, assigning the next free index if it is new.
    pub fn add(&mut self, word: &str) -> usize {
        let n = self.table.len();
        let mut pos = self.home_slot(word);
        for _ in 0..n {
            match &self.table[pos] {
                Some(slot) if slot.word == word => return slot.index,
                Some(_) => pos = (pos + 1) % n,
                None => {
                    let index = self.size;
                    self.table[pos] = Some(Slot {
                        word: word.to_string(),
                        index,
                    });
                    self.size += 1;
                    return index;
                }
            }
        }
        panic!("vocabulary table is full ({n} slots); it must be larger than the vocabulary");
    }

    /// Returns the index of `word`, or `None` if it was never added.
    pub fn encode(&self, word: &str) -> Option<usize> {
        let n = self.table.len();
        let mut pos = self.home_slot(word);
        for _ in 0..n {
            match &self.table[pos] {
                Some(slot) if slot.word == word => return Some(slot.index),
                Some(_) => pos = (pos + 1) % n,
                None => return None,
            }
        }
        None
    }

    /// All words, ordered by index.
    pub fn all(&self) -> Vec<&str> {
        let mut words = vec![""; self.size];
        for slot in self.table.iter().flatten() {
            words[slot.index] = &slot.word;
        }
        words
    }

    /// Rebuild the table keeping only the survivors of `compaction`. Each
    /// survivor is re-added in ascending old-index order, so it lands on
    /// exactly `compaction.new_index(old)`.
    pub fn compact(&mut self, compaction: &Compaction) {
        let words: Vec<String> = self.all().into_iter().map(String::from).collect();
        self.clear();
        for (old, new) in compaction.survivors() {
            let index = self.add(&words[old]);
            debug_assert_eq!(index, new);
        }
    }

    /// Writes `table_size:u32`, then the words joined by single spaces as a
    /// NUL-terminated blob prefixed with its length (NUL included) as `u64`.
    ///
    /// Fails if a word is not [valid](is_valid_word), since it could not be
    /// read back at the same index.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let table_size = u32::try_from(self.table.len())
            .map_err(|_| Error::malformed("vocabulary table too large to serialize"))?;
        let words = self.all();
        if let Some(word) = words.iter().find(|w| !is_valid_word(w)) {
            return Err(Error::malformed(format!("cannot store word {word:?}")));
        }
        write_u32(w, table_size)?;
        let mut blob = words.join(" ").into_bytes();
        blob.push(0);
        write_u64(w, blob.len() as u64)?;
        w.write_all(&blob)?;
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let table_size = read_u32(r, "vocabulary table size")? as usize;
        if table_size == 0 {
            return Err(Error::malformed("vocabulary table size is 0"));
        }
        let blob_len = read_u64(r, "vocabulary length")?;

        let mut blob = vec![];
        r.take(blob_len)
            .read_to_end(&mut blob)
            .map_err(|err| truncated(err, "vocabulary"))?;
        if blob.len() as u64 != blob_len {
            return Err(Error::malformed("truncated vocabulary"));
        }
        if blob.last() == Some(&0) {
            blob.pop();
        }
        let blob = String::from_utf8(blob)
            .map_err(|_| Error::malformed("vocabulary is not valid UTF-8"))?;

        let mut vocab = Vocab::new(table_size);
        if blob.is_empty() {
            return Ok(vocab);
        }
        for word in blob.split(' ') {
            if word.is_empty() {
                return Err(Error::malformed("empty word in vocabulary"));
            }
            if vocab.len() + 1 >= table_size {
                return Err(Error::malformed(
                    "vocabulary does not fit in its own table size",
                ));
            }
            if vocab.add(word) + 1 != vocab.len() {
                return Err(Error::malformed(format!("duplicate word {word:?}")));
            }
        }
        Ok(vocab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0x811c9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn add_assigns_sequential_indices() {
        let mut vocab = Vocab::new(100);
        assert_eq!(vocab.add("A"), 0);
        assert_eq!(vocab.add("BB"), 1);
        assert_eq!(vocab.add("CCC"), 2);
        assert_eq!(vocab.add("A"), 0);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.all(), vec!["A", "BB", "CCC"]);
    }

    #[test]
    fn distinct_words_get_distinct_indices() {
        // A tiny table forces long probe chains and wraparound.
        let mut vocab = Vocab::new(11);
        let words = ["the", "a", "of", "to", "in", "and", "is", "it", "that", "was"];
        for w in words {
            vocab.add(w);
        }
        let mut seen: Vec<usize> = words.iter().map(|w| vocab.encode(w).unwrap()).collect();
        seen.sort();
        assert_eq!(seen, (0..words.len()).collect::<Vec<_>>());
        assert_eq!(vocab.encode("absent"), None);
        for (i, w) in words.iter().enumerate() {
            assert_eq!(vocab.encode(w), Some(i));
        }
    }

    #[test]
    fn encode_unknown_in_full_table_terminates() {
        let mut vocab = Vocab::new(3);
        vocab.add("x");
        vocab.add("y");
        vocab.add("z");
        assert_eq!(vocab.encode("w"), None);
    }

    #[test]
    #[should_panic(expected = "vocabulary table is full")]
    fn add_to_full_table_panics() {
        let mut vocab = Vocab::new(2);
        vocab.add("x");
        vocab.add("y");
        vocab.add("z");
    }

    #[test]
    fn compact_relabels_in_order() {
        let mut vocab = Vocab::new(100);
        for w in ["A", "B", "C", "D", "E"] {
            vocab.add(w);
        }
        vocab.compact(&Compaction::keep_where(5, |i| i != 1 && i != 4));
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.encode("A"), Some(0));
        assert_eq!(vocab.encode("B"), None);
        assert_eq!(vocab.encode("C"), Some(1));
        assert_eq!(vocab.encode("D"), Some(2));
        assert_eq!(vocab.encode("E"), None);
        assert_eq!(vocab.add("F"), 3);
    }

    #[test]
    fn binary_round_trip() {
        let mut vocab = Vocab::new(64);
        for w in ["rust", "café", "x", "y"] {
            vocab.add(w);
        }
        let mut bytes = vec![];
        vocab.write_to(&mut bytes).unwrap();
        // table size + blob length + "rust café x y" (café is 5 bytes) + NUL
        assert_eq!(bytes.len(), 4 + 8 + 14 + 1);
        let loaded = Vocab::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded, vocab);
    }

    #[test]
    fn empty_vocabulary_round_trip() {
        let vocab = Vocab::new(8);
        let mut bytes = vec![];
        vocab.write_to(&mut bytes).unwrap();
        let loaded = Vocab::read_from(&mut Cursor::new(bytes)).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.table_size(), 8);
    }

    #[test]
    fn valid_words() {
        assert!(is_valid_word("café"));
        assert!(is_valid_word("a-b"));
        assert!(!is_valid_word(""));
        assert!(!is_valid_word("a b"));
        assert!(!is_valid_word("a\tb"));
        assert!(!is_valid_word("a\n"));
    }

    #[test]
    fn words_that_cannot_be_read_back_are_not_written() {
        for bad in ["", "two words", "tab\there"] {
            let mut vocab = Vocab::new(16);
            vocab.add("a");
            vocab.add(bad);
            vocab.add("b");
            let err = vocab.write_to(&mut Vec::<u8>::new()).unwrap_err();
            assert!(matches!(err, Error::Malformed { .. }), "{bad:?}: {err}");
        }
    }

    #[test]
    fn blob_with_empty_word_is_malformed() {
        let mut bytes = vec![];
        write_u32(&mut bytes, 16).unwrap();
        let blob = b"a  b\0";
        write_u64(&mut bytes, blob.len() as u64).unwrap();
        bytes.extend_from_slice(blob);
        let err = Vocab::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[test]
    fn duplicate_word_is_malformed() {
        let mut bytes = vec![];
        write_u32(&mut bytes, 16).unwrap();
        let blob = b"a b a\0";
        write_u64(&mut bytes, blob.len() as u64).unwrap();
        bytes.extend_from_slice(blob);
        let err = Vocab::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }
}
