use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use streamskip::{normalize, VectorFormat, Vectors};

/// number of closest words that will be shown
const N: usize = 40;

#[derive(Parser)]
#[command(about = "Show the words closest to a word or sentence", long_about = None)]
struct Options {
    /// Word vectors written by streamskip --export-vectors
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// Layout of FILE, as given to --export-format
    #[arg(short, long, value_enum, default_value_t = VectorFormat::Binary)]
    format: VectorFormat,
}

fn run(options: Options) -> Result<()> {
    let vectors = Vectors::load(&options.file_name, options.format)
        .with_context(|| format!("failed to load vectors from {:?}", options.file_name))?;

    let mut line = String::new();
    'outer: loop {
        print!("Enter word or sentence (EXIT to break): ");
        let _ = io::stdout().flush();

        line.clear();
        if io::stdin().read_line(&mut line).context("error reading stdin")? == 0 {
            break;
        }
        let line = line.trim();
        if line == "EXIT" {
            break;
        }

        let mut bi: Vec<usize> = vec![];
        for word in line.split_ascii_whitespace() {
            println!();
            match vectors.lookup_word(word) {
                None => {
                    println!("Word: {word}  Position in vocabulary: None");
                    println!("Out of dictionary word!");
                    continue 'outer;
                }
                Some(i) => {
                    println!("Word: {word}  Position in vocabulary: {i}");
                    bi.push(i);
                }
            }
        }
        if bi.is_empty() {
            continue;
        }

        println!();
        println!("                                              Word       Cosine distance");
        println!("------------------------------------------------------------------------");

        let mut vec = vec![0.0; vectors.size()];
        for &i in &bi {
            for (v, r) in vec.iter_mut().zip(vectors[i].iter().copied()) {
                *v += r;
            }
        }
        normalize(&mut vec);

        for (word, dist) in vectors.nearest(&vec, N, &bi) {
            println!("{:50}\t\t{}", word, dist);
        }
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
