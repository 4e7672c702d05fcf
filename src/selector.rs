// Numbered selection over a list of labels. Parsing is kept separate from
// prompting so the rules can be tested without a terminal; `Selector`
// wires the two together and owns the reprompt loop.

use std::collections::BTreeSet;
use std::io::Write;

use anyhow::Result;
use dialoguer::Input;

use crate::error::Error;

/// Result of parsing one line of single-choice input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SingleChoice {
    /// Zero-based index of the chosen label.
    Selected(usize),
    /// Empty input: the user backed out.
    NoSelection,
    /// Out of range or not a number; ask again.
    Invalid,
}

/// Parse a 1-based choice among `count` labels.
pub fn parse_single(input: &str, count: usize) -> SingleChoice {
    let input = input.trim();
    if input.is_empty() {
        return SingleChoice::NoSelection;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => SingleChoice::Selected(n - 1),
        _ => SingleChoice::Invalid,
    }
}

/// Parse input such as `1,3,5-7` into a zero-based ascending set.
///
/// Indices outside `1..=count` are dropped silently and a reversed range
/// (`7-5`) expands to nothing. Any non-numeric token fails the whole line.
pub fn parse_multi(input: &str, count: usize) -> Result<BTreeSet<usize>, Error> {
    let input = input.trim();
    let mut picked = BTreeSet::new();
    if input.is_empty() {
        return Ok(picked);
    }

    for token in input.split(',') {
        let token = token.trim();
        let (start, end) = match token.split_once('-') {
            Some((a, b)) => (parse_index(a)?, parse_index(b)?),
            None => {
                let n = parse_index(token)?;
                (n, n)
            }
        };
        // clamp first so a typo like 1-99999999 stays cheap
        let (lo, hi) = (start.max(1), end.min(count as u64));
        picked.extend((lo..=hi).map(|n| n as usize - 1));
    }
    Ok(picked)
}

fn parse_index(raw: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Selection(format!("'{}' is not a number", raw.trim())))
}

/// Source of one line of user input.
pub trait Prompt {
    fn read_line(&mut self, prompt: &str) -> Result<String>;
}

/// Prompt backed by `dialoguer`, accepting empty answers.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        let line: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?;
        Ok(line)
    }
}

/// Prints numbered labels and asks until the answer parses.
pub struct Selector<P, W> {
    prompt: P,
    out: W,
}

impl<P: Prompt, W: Write> Selector<P, W> {
    pub fn new(prompt: P, out: W) -> Self {
        Self { prompt, out }
    }

    fn list<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<()> {
        for (i, label) in labels.iter().enumerate() {
            writeln!(self.out, "  [{}] {}", i + 1, label.as_ref())?;
        }
        Ok(())
    }

    /// Ask for one label. `None` means the user entered nothing.
    pub fn choose_one<S: AsRef<str>>(&mut self, labels: &[S], prompt: &str) -> Result<Option<usize>> {
        if labels.is_empty() {
            return Ok(None);
        }
        self.list(labels)?;
        let prompt = format!("{prompt} (1-{})", labels.len());
        loop {
            let line = self.prompt.read_line(&prompt)?;
            match parse_single(&line, labels.len()) {
                SingleChoice::Selected(i) => return Ok(Some(i)),
                SingleChoice::NoSelection => return Ok(None),
                SingleChoice::Invalid => writeln!(self.out, "Invalid input. Try again.")?,
            }
        }
    }

    /// Ask for any number of labels. An empty set means cancel.
    pub fn choose_many<S: AsRef<str>>(&mut self, labels: &[S], prompt: &str) -> Result<BTreeSet<usize>> {
        if labels.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.list(labels)?;
        let prompt = format!("{prompt} (e.g. 1,3,5-7)");
        loop {
            let line = self.prompt.read_line(&prompt)?;
            match parse_multi(&line, labels.len()) {
                Ok(set) => return Ok(set),
                Err(e) => {
                    tracing::debug!("rejected selection {line:?}: {e}");
                    writeln!(self.out, "Invalid input. Try again.")?;
                }
            }
        }
    }
}
