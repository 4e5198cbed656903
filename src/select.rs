//! Choosing which finalists go on to the throughput test.

use std::io::{self, BufRead, Write};

use crate::error::SelectionError;

/// A finalist as presented for selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalist {
    pub id: String,
    pub location: String,
    pub summary: String,
}

pub trait Selector {
    /// Returns the ids to throughput-test, in order.
    fn select(&mut self, finalists: &[Finalist]) -> Result<Vec<String>, SelectionError>;
}

/// Takes the first `count` finalists.
#[derive(Debug, Clone, Copy)]
pub struct AutoSelector {
    pub count: usize,
}

impl Selector for AutoSelector {
    fn select(&mut self, finalists: &[Finalist]) -> Result<Vec<String>, SelectionError> {
        Ok(finalists.iter().take(self.count).map(|f| f.id.clone()).collect())
    }
}

/// Selects nothing; throughput testing is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSelection;

impl Selector for NoSelection {
    fn select(&mut self, _finalists: &[Finalist]) -> Result<Vec<String>, SelectionError> {
        Ok(Vec::new())
    }
}

/// Parses `all`, an empty line, or 1-based indices separated by commas or
/// whitespace. Returns 0-based indices without duplicates.
pub fn parse_selection(input: &str, len: usize) -> Result<Vec<usize>, SelectionError> {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("all") {
        return Ok((0..len).collect());
    }
    let mut picked = Vec::new();
    for token in input.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        let index: usize =
            token.parse().map_err(|_| SelectionError::InvalidToken { token: token.to_string() })?;
        if index == 0 || index > len {
            return Err(SelectionError::OutOfRange { index, len });
        }
        if !picked.contains(&(index - 1)) {
            picked.push(index - 1);
        }
    }
    Ok(picked)
}

/// Prompts on a line-oriented terminal until the input parses.
pub struct InteractiveSelector<R, W> {
    input: R,
    output: W,
}

impl InteractiveSelector<io::StdinLock<'static>, io::Stderr> {
    /// Reads stdin and prompts on stderr, leaving stdout to the report.
    pub fn stdio() -> Self {
        Self { input: io::stdin().lock(), output: io::stderr() }
    }
}

impl<R: BufRead, W: Write> InteractiveSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Selector for InteractiveSelector<R, W> {
    fn select(&mut self, finalists: &[Finalist]) -> Result<Vec<String>, SelectionError> {
        if finalists.is_empty() {
            return Ok(Vec::new());
        }
        writeln!(self.output)?;
        for (i, f) in finalists.iter().enumerate() {
            writeln!(
                self.output,
                "  [{:>2}] {:<10} {:<24} {}",
                i + 1,
                f.id,
                f.location,
                f.summary
            )?;
        }
        loop {
            write!(self.output, "select servers to speed test (e.g. 1,3) [all]: ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // EOF: nothing chosen.
                return Ok(Vec::new());
            }
            match parse_selection(&line, finalists.len()) {
                Ok(indices) => {
                    return Ok(indices.into_iter().map(|i| finalists[i].id.clone()).collect())
                }
                Err(e) => writeln!(self.output, "  {e}")?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalists(n: usize) -> Vec<Finalist> {
        (1..=n)
            .map(|i| Finalist {
                id: format!("s{i}"),
                location: "Loc".into(),
                summary: String::new(),
            })
            .collect()
    }

    #[test]
    fn parse_all_and_empty() {
        assert_eq!(parse_selection("all\n", 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_selection("  ", 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn parse_list_dedupes_and_keeps_order() {
        assert_eq!(parse_selection("3, 1 3", 3).unwrap(), vec![2, 0]);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            parse_selection("0", 3),
            Err(SelectionError::OutOfRange { index: 0, len: 3 })
        ));
        assert!(matches!(
            parse_selection("4", 3),
            Err(SelectionError::OutOfRange { index: 4, .. })
        ));
        assert!(matches!(parse_selection("1,x", 3), Err(SelectionError::InvalidToken { .. })));
    }

    #[test]
    fn interactive_reprompts_after_error() {
        let input = io::Cursor::new(b"9\n2\n".to_vec());
        let mut output = Vec::new();
        let ids = InteractiveSelector::new(input, &mut output).select(&finalists(3)).unwrap();
        assert_eq!(ids, vec!["s2".to_string()]);
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("out of range"));
        assert_eq!(shown.matches("select servers").count(), 2);
    }

    #[test]
    fn interactive_eof_selects_nothing() {
        let mut output = Vec::new();
        let ids = InteractiveSelector::new(io::Cursor::new(Vec::new()), &mut output)
            .select(&finalists(2))
            .unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn auto_takes_prefix() {
        let ids = AutoSelector { count: 2 }.select(&finalists(5)).unwrap();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
        assert!(NoSelection.select(&finalists(5)).unwrap().is_empty());
    }
}
