//! `wordexp` restricted to plain word-splitting.
//!
//! Anything that would need a shell (globs, quoting, substitution,
//! redirection, grouping) is refused up front. What is left is split by the
//! native command-line parser, which for this alphabet means: runs of
//! spaces and tabs separate words, and every other character is literal.

use bitflags::bitflags;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Result, StraddleError};

#[cfg(windows)]
mod windows;

/// Characters that make a command line need a real shell.
pub const FORBIDDEN: [char; 15] = [
    '*', '?', '[', ']', '{', '}', '(', ')', '|', '&', ';', '<', '>', '\'', '"',
];

pub const WRDE_SUCCESS: i32 = 0;
pub const WRDE_NOSPACE: i32 = 1;
pub const WRDE_BADCHAR: i32 = 2;
pub const WRDE_BADVAL: i32 = 3;
pub const WRDE_CMDSUB: i32 = 4;
pub const WRDE_SYNTAX: i32 = 5;

/// Longest command line the native parser is handed.
pub const MAX_COMMAND_LINE: usize = 32_767;

bitflags! {
    /// `wordexp` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SplitFlags: i32 {
        /// Keep `offs` empty slots ahead of the words.
        const DO_OFFS  = 0x0001;
        /// Add to the words already in the vector.
        const APPEND   = 0x0002;
        /// Accepted; nothing is ever substituted.
        const NO_CMD   = 0x0004;
        /// Release the vector's previous contents first.
        const REUSE    = 0x0008;
        /// Accepted; errors are logged, not printed.
        const SHOW_ERR = 0x0010;
        /// Accepted; no variables are expanded.
        const UNDEF    = 0x0020;
    }
}

/// Owned words plus the number of reserved leading slots.
///
/// `WordVector::default()` is the zero-initialized vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordVector {
    words: Vec<String>,
    offs: usize,
}

impl WordVector {
    pub fn new() -> Self { Self::default() }

    /// A vector that reserves `offs` empty slots when split with
    /// [`SplitFlags::DO_OFFS`].
    pub fn with_offs(offs: usize) -> Self {
        Self { words: Vec::new(), offs }
    }

    /// `we_wordc`: words only, reserved slots excluded.
    pub fn len(&self) -> usize { self.words.len() }
    pub fn is_empty(&self) -> bool { self.words.is_empty() }
    pub fn offs(&self) -> usize { self.offs }
    pub fn words(&self) -> &[String] { &self.words }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    /// `we_wordv`: `offs` empty slots, then the words.
    pub fn argv(&self) -> Vec<Option<&str>> {
        std::iter::repeat_n(None, self.offs).chain(self.iter().map(Some)).collect()
    }

    pub fn into_words(self) -> Vec<String> {
        self.words
    }

    /// `wordfree`: drops every word and the backing storage and leaves the
    /// vector zeroed, reserved slots included. Calling it on an empty or
    /// already released vector does nothing.
    pub fn release(&mut self) {
        *self = Self::default();
    }
}

impl<'a> IntoIterator for &'a WordVector {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;
    fn into_iter(self) -> Self::IntoIter { self.words.iter() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub max_input_len: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { max_input_len: MAX_COMMAND_LINE }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WordSplitter {
    cfg: SplitConfig,
}

impl WordSplitter {
    pub fn new() -> Self { Self::with_config(SplitConfig::default()) }
    pub fn with_config(cfg: SplitConfig) -> Self { Self { cfg } }
    pub fn config(&self) -> SplitConfig { self.cfg }

    fn validate(&self, input: &str) -> Result<()> {
        if input.len() > self.cfg.max_input_len {
            return Err(StraddleError::invalid_input(format_args!(
                "command line of {} bytes exceeds {}",
                input.len(),
                self.cfg.max_input_len
            ))
            .os_code(WRDE_NOSPACE));
        }
        if let Some((at, c)) = input.char_indices().find(|(_, c)| *c == '\0' || FORBIDDEN.contains(c)) {
            return Err(StraddleError::invalid_input(format_args!("forbidden character {c:?} at byte {at}"))
                .os_code(WRDE_BADCHAR));
        }
        Ok(())
    }

    /// `wordexp(input, &v, 0)`.
    pub fn split(&self, input: &str) -> Result<WordVector> {
        let mut v = WordVector::default();
        self.split_into(input, &mut v, SplitFlags::empty())?;
        Ok(v)
    }

    /// `wordexp(input, v, flags)`. On error `v` is left as it was.
    pub fn split_into(&self, input: &str, v: &mut WordVector, flags: SplitFlags) -> Result<()> {
        self.validate(input)?;
        let words = native_split(input)?;
        debug!("split {input:?} into {} words", words.len());

        if flags.contains(SplitFlags::REUSE) {
            // `offs` is the caller's input for this call, not old contents
            v.words = Vec::new();
        }
        if !flags.contains(SplitFlags::APPEND) {
            v.words.clear();
            if !flags.contains(SplitFlags::DO_OFFS) {
                v.offs = 0;
            }
        }
        v.words.extend(words);
        Ok(())
    }
}

/// The native parser's rules for the permitted alphabet.
pub fn tokenize(input: &str) -> Vec<String> {
    input
        .split([' ', '\t'])
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

fn native_split(input: &str) -> Result<Vec<String>> {
    // leading blanks would make the native parser report an empty program
    // name, and an empty line makes it report the current executable
    let input = input.trim_start_matches([' ', '\t']);
    if input.trim_end_matches([' ', '\t']).is_empty() {
        return Ok(Vec::new());
    }
    #[cfg(windows)]
    {
        windows::command_line_to_argv(input)
    }
    #[cfg(not(windows))]
    {
        Ok(tokenize(input))
    }
}

/// `wordexp` with default settings.
pub fn split_words(input: &str) -> Result<WordVector> {
    WordSplitter::new().split(input)
}
