//! Interactive query menu.

use std::str::FromStr;

use chrono::NaiveDate;
use console::{style, Term};

use wikicounts::models::Selection;
use wikicounts::query::QueryService;

use super::commands::{print_written, QUERY_FAILED_MESSAGE};
use super::icons::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    TopN,
    ByLanguage,
    ByDate,
    Quit,
}

impl FromStr for Choice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::TopN),
            "2" => Ok(Self::ByLanguage),
            "3" => Ok(Self::ByDate),
            "0" | "4" | "q" | "quit" => Ok(Self::Quit),
            other => Err(format!("'{}' is not a menu option", other)),
        }
    }
}

fn parse_n(s: &str) -> Result<u32, String> {
    match s.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("'{}' is not a positive integer", s.trim())),
    }
}

/// Prompt until the answer parses.
fn prompt<T>(term: &Term, question: &str, parse: impl Fn(&str) -> Result<T, String>) -> std::io::Result<T> {
    loop {
        term.write_str(&format!("{} ", style(question).bold()))?;
        let answer = term.read_line()?;
        match parse(&answer) {
            Ok(value) => return Ok(value),
            Err(e) => term.write_line(&format!("{} {}", warn(), e))?,
        }
    }
}

/// Loop over the query actions until the user quits.
pub async fn cmd_menu(service: &QueryService) -> anyhow::Result<()> {
    let term = Term::stdout();
    loop {
        term.write_line("")?;
        term.write_line(&format!("{}", style("Please choose one of the following:").bold()))?;
        term.write_line("  1. Top N pages by language")?;
        term.write_line("  2. Total views by language")?;
        term.write_line("  3. Total views by date")?;
        term.write_line("  4. Quit (or 0)")?;

        let choice = prompt(&term, "Choice:", Choice::from_str)?;
        let result = match choice {
            Choice::Quit => return Ok(()),
            Choice::TopN => {
                let n = prompt(&term, "N:", parse_n)?;
                let language = prompt(&term, "Language code (or 'all'):", Selection::<String>::from_str)?;
                service.top_n(n, &language).await
            }
            Choice::ByLanguage => {
                let language = prompt(&term, "Language code (or 'all'):", Selection::<String>::from_str)?;
                service.total_by_language(&language).await
            }
            Choice::ByDate => {
                let date = prompt(&term, "Date YYYY-MM-DD (or 'all'):", Selection::<NaiveDate>::from_str)?;
                service.total_by_date(&date).await
            }
        };

        match result {
            Ok(path) => print_written(&path),
            Err(_) => term.write_line(&format!("{} {}", error(), QUERY_FAILED_MESSAGE))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_choices_parse() {
        assert_eq!("1".parse::<Choice>().unwrap(), Choice::TopN);
        assert_eq!(" 3 ".parse::<Choice>().unwrap(), Choice::ByDate);
        assert_eq!("q".parse::<Choice>().unwrap(), Choice::Quit);
        assert_eq!("0".parse::<Choice>().unwrap(), Choice::Quit);
        assert_eq!("4".parse::<Choice>().unwrap(), Choice::Quit);
        assert!("7".parse::<Choice>().is_err());
    }

    #[test]
    fn n_must_be_positive() {
        assert_eq!(parse_n("10"), Ok(10));
        assert!(parse_n("0").is_err());
        assert!(parse_n("-1").is_err());
        assert!(parse_n("ten").is_err());
    }
}
