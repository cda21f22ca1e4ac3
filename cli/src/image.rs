//! Loading a core image.
//!
//! A core image is a text file of lines like
//!
//! ```text
//! 001000: 201040 000001   ; MOVEI 1,1
//! 001001: 254200001001
//! ```
//!
//! Each line gives a physical address and the word to store there,
//! both in octal.  The word may be written as one number or as two
//! half words.  Anything after `;` is a comment.  A line `start:
//! ADDR` sets the starting PC.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::*;

#[derive(Debug, PartialEq, Eq)]
pub enum ImageError {
    MissingColon { line: usize },
    BadNumber { line: usize, text: String },
    TooLarge { line: usize, text: String },
    TooManyFields { line: usize },
}

impl Display for ImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ImageError::MissingColon { line } => {
                write!(f, "line {line}: expected 'address: word'")
            }
            ImageError::BadNumber { line, text } => {
                write!(f, "line {line}: '{text}' is not an octal number")
            }
            ImageError::TooLarge { line, text } => {
                write!(f, "line {line}: {text} does not fit")
            }
            ImageError::TooManyFields { line } => {
                write!(f, "line {line}: a word has at most two halves")
            }
        }
    }
}

impl Error for ImageError {}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CoreImage {
    pub words: Vec<(PhysicalAddress, Word)>,
    pub start: Option<VirtualAddress>,
}

fn octal(line: usize, text: &str) -> Result<u64, ImageError> {
    u64::from_str_radix(text, 8).map_err(|_| ImageError::BadNumber {
        line,
        text: text.to_string(),
    })
}

fn half(line: usize, text: &str) -> Result<u32, ImageError> {
    let n = octal(line, text)?;
    if n > u64::from(HALF_MASK) {
        return Err(ImageError::TooLarge {
            line,
            text: text.to_string(),
        });
    }
    Ok(n as u32)
}

fn word(line: usize, fields: &[&str]) -> Result<Word, ImageError> {
    match fields {
        [whole] => {
            let n = octal(line, whole)?;
            Word::try_from(n).map_err(|_| ImageError::TooLarge {
                line,
                text: whole.to_string(),
            })
        }
        [lh, rh] => Ok(Word::from_halves(half(line, lh)?, half(line, rh)?)),
        _ => Err(ImageError::TooManyFields { line }),
    }
}

pub fn parse(text: &str) -> Result<CoreImage, ImageError> {
    let mut image = CoreImage::default();
    for (n, raw) in text.lines().enumerate() {
        let line = n + 1;
        let content = raw.split(';').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let (left, right) = content
            .split_once(':')
            .ok_or(ImageError::MissingColon { line })?;
        let fields: Vec<&str> = right.split_whitespace().collect();
        let left = left.trim();
        if left.eq_ignore_ascii_case("start") {
            let pc = word(line, &fields)?;
            image.start = Some(VirtualAddress::from_word(pc));
            continue;
        }
        let address = octal(line, left)?;
        let address = u32::try_from(address).map_err(|_| ImageError::TooLarge {
            line,
            text: left.to_string(),
        })?;
        image
            .words
            .push((PhysicalAddress::new(address), word(line, &fields)?));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_halves_and_comments() {
        let image = parse(
            "; a tiny program\n\
             1000: 201040 000001 ; MOVEI 1,1\n\
             \n\
             1001: 254200001001\n\
             start: 1000\n",
        )
        .expect("image should parse");
        assert_eq!(
            image.words,
            vec![
                (PhysicalAddress::new(0o1000), Word::from_halves(0o201_040, 1)),
                (PhysicalAddress::new(0o1001), Word::new(0o254_200_001_001)),
            ]
        );
        assert_eq!(image.start, Some(VirtualAddress::new(0, 0o1000)));
    }

    #[test]
    fn bad_lines_are_reported_with_their_number() {
        assert_eq!(
            parse("1000: 1\n1001 2\n"),
            Err(ImageError::MissingColon { line: 2 })
        );
        assert_eq!(
            parse("1000: 9\n"),
            Err(ImageError::BadNumber {
                line: 1,
                text: "9".to_string()
            })
        );
        assert_eq!(
            parse("1000: 1000000 0\n"),
            Err(ImageError::TooLarge {
                line: 1,
                text: "1000000".to_string()
            })
        );
        assert_eq!(
            parse("1000: 1 2 3\n"),
            Err(ImageError::TooManyFields { line: 1 })
        );
    }
}
