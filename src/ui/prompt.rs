// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Terminal prompts.

use anyhow::Result;
use std::io::{self, BufRead, Write};

/// Parse a yes/no answer. Anything but an explicit yes is a no.
pub fn parse_confirm(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Parse a 1-based list choice into an index. Empty input cancels.
pub fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    match answer.trim().parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(n - 1),
        _ => None,
    }
}

fn read_answer<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> Result<String> {
    write!(output, "{} ", question)?;
    output.flush()?;
    let mut line = String::new();
    // Keep the blocking terminal read off the async worker.
    tokio::task::block_in_place(|| input.read_line(&mut line))?;
    Ok(line)
}

/// Ask a y/N question on `input`. End of input is a no.
pub fn confirm_from<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> bool {
    match read_answer(input, output, &format!("{} [y/N]", question)) {
        Ok(answer) => parse_confirm(&answer),
        Err(_) => false,
    }
}

/// Ask for a row number until the answer is valid, empty, or input ends.
pub fn pick_from<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    count: usize,
) -> Result<Option<usize>> {
    loop {
        let question = format!("Pick a device [1-{}, empty to cancel]:", count);
        let answer = read_answer(input, output, &question)?;
        if answer.trim().is_empty() {
            return Ok(None);
        }
        match parse_choice(&answer, count) {
            Some(index) => return Ok(Some(index)),
            None => writeln!(output, "Not a valid choice: {}", answer.trim())?,
        }
    }
}

/// Ask a y/N question on the terminal.
pub fn confirm(question: &str) -> bool {
    confirm_from(&mut io::stdin().lock(), &mut io::stdout(), question)
}

/// Ask for a device row on the terminal.
pub fn pick(count: usize) -> Result<Option<usize>> {
    pick_from(&mut io::stdin().lock(), &mut io::stdout(), count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confirm() {
        assert!(parse_confirm("y\n"));
        assert!(parse_confirm(" YES "));
        assert!(!parse_confirm(""));
        assert!(!parse_confirm("n"));
        assert!(!parse_confirm("maybe"));
    }

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("1\n", 3), Some(0));
        assert_eq!(parse_choice("3", 3), Some(2));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("x", 3), None);
        assert_eq!(parse_choice("1", 0), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pick_retries_until_valid() {
        let mut input = io::Cursor::new("9\nx\n2\n");
        let mut output = Vec::new();

        assert_eq!(pick_from(&mut input, &mut output, 3).unwrap(), Some(1));
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("Not a valid choice: 9"));
        assert!(shown.contains("Not a valid choice: x"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pick_cancels_on_empty_or_eof() {
        let mut output = Vec::new();
        assert_eq!(
            pick_from(&mut io::Cursor::new("\n"), &mut output, 3).unwrap(),
            None
        );
        assert_eq!(
            pick_from(&mut io::Cursor::new(""), &mut output, 3).unwrap(),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_from_input() {
        let mut output = Vec::new();
        assert!(confirm_from(&mut io::Cursor::new("yes\n"), &mut output, "Turn on?"));
        assert!(!confirm_from(&mut io::Cursor::new(""), &mut output, "Turn on?"));
        assert!(String::from_utf8(output).unwrap().starts_with("Turn on? [y/N] "));
    }
}
