//! SLURM hostlist expressions (`cn[02-04,07]`).
//!
//! Expansion follows the scheduler's rules: bracket groups hold comma
//! separated numbers or ranges, the left-hand number of a range sets the
//! zero-padding width, and several bracket groups in one token combine as a
//! cartesian product. [`compress`] produces the canonical compact form back.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostlistError {
    #[error("Unbalanced brackets in hostlist '{0}'")]
    Unbalanced(String),
    #[error("Invalid range '{range}' in hostlist '{hostlist}'")]
    InvalidRange { hostlist: String, range: String },
}

#[derive(Debug)]
struct NumberRange {
    start: u64,
    end: u64,
    width: usize,
}

#[derive(Debug)]
enum Segment {
    Literal(String),
    Ranges(Vec<NumberRange>),
}

/// Expand a hostlist expression into an ordered list of host names.
///
/// Empty input and the scheduler's "(null)" placeholder yield no hosts.
pub fn expand(hostlist: &str) -> Result<Vec<String>, HostlistError> {
    let hostlist = hostlist.trim();
    if hostlist.is_empty() || hostlist == "(null)" || hostlist == "None assigned" {
        return Ok(Vec::new());
    }

    let mut hosts = Vec::new();
    for token in split_top_level(hostlist)? {
        if token.is_empty() {
            continue;
        }
        let segments = parse_segments(token, hostlist)?;
        hosts.extend(expand_segments(&segments));
    }
    Ok(hosts)
}

/// Split on commas that are not inside brackets.
fn split_top_level(hostlist: &str) -> Result<Vec<&str>, HostlistError> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in hostlist.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| HostlistError::Unbalanced(hostlist.to_string()))?;
            }
            ',' if depth == 0 => {
                tokens.push(hostlist[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(HostlistError::Unbalanced(hostlist.to_string()));
    }
    tokens.push(hostlist[start..].trim());
    Ok(tokens)
}

fn parse_segments(token: &str, hostlist: &str) -> Result<Vec<Segment>, HostlistError> {
    let mut segments = Vec::new();
    let mut rest = token;

    while let Some(open) = rest.find('[') {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let close = rest[open..]
            .find(']')
            .map(|c| open + c)
            .ok_or_else(|| HostlistError::Unbalanced(hostlist.to_string()))?;
        let ranges = rest[open + 1..close]
            .split(',')
            .map(|r| parse_range(r.trim(), hostlist))
            .collect::<Result<Vec<_>, _>>()?;
        segments.push(Segment::Ranges(ranges));
        rest = &rest[close + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

fn parse_range(range: &str, hostlist: &str) -> Result<NumberRange, HostlistError> {
    let invalid = || HostlistError::InvalidRange {
        hostlist: hostlist.to_string(),
        range: range.to_string(),
    };
    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let (lhs, rhs) = range.split_once('-').unwrap_or((range, range));
    if !is_number(lhs) || !is_number(rhs) {
        return Err(invalid());
    }

    let start = lhs.parse::<u64>().map_err(|_| invalid())?;
    let end = rhs.parse::<u64>().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }

    Ok(NumberRange {
        start,
        end,
        width: lhs.len(),
    })
}

fn expand_segments(segments: &[Segment]) -> Vec<String> {
    let mut names = vec![String::new()];

    for segment in segments {
        match segment {
            Segment::Literal(text) => {
                for name in &mut names {
                    name.push_str(text);
                }
            }
            Segment::Ranges(ranges) => {
                let mut next = Vec::new();
                for name in &names {
                    for range in ranges {
                        for n in range.start..=range.end {
                            next.push(format!("{}{:0width$}", name, n, width = range.width));
                        }
                    }
                }
                names = next;
            }
        }
    }

    names
}

/// Split a host name into its prefix and trailing digits.
fn split_numeric_suffix(host: &str) -> Option<(&str, &str)> {
    let digits_start = host
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some((&host[..digits_start], &host[digits_start..]))
}

/// Whether two digit strings can share a bracket group.
fn same_width(a: &str, b: &str) -> bool {
    let natural = |s: &str| !s.starts_with('0') || s == "0";
    a.len() == b.len() || (natural(a) && natural(b))
}

/// A run of consecutive numbers sharing a prefix: (first digits, last digits, last value).
type Run<'a> = (&'a str, &'a str, u64);

struct Group<'a> {
    prefix: &'a str,
    runs: Vec<Run<'a>>,
}

impl<'a> Group<'a> {
    fn render(&self) -> String {
        if let [(first, last, _)] = self.runs.as_slice() {
            if first == last {
                return format!("{}{}", self.prefix, first);
            }
        }
        let ranges: Vec<String> = self
            .runs
            .iter()
            .map(|(first, last, _)| {
                if first == last {
                    first.to_string()
                } else {
                    format!("{}-{}", first, last)
                }
            })
            .collect();
        format!("{}[{}]", self.prefix, ranges.join(","))
    }

    /// Try to append a host number; false if it belongs in a new group.
    fn push(&mut self, prefix: &str, digits: &'a str, value: u64) -> bool {
        if self.prefix != prefix {
            return false;
        }
        let Some(run) = self.runs.last_mut() else {
            return false;
        };
        if !same_width(run.0, digits) {
            return false;
        }
        if value == run.2 + 1 {
            run.1 = digits;
            run.2 = value;
        } else {
            self.runs.push((digits, digits, value));
        }
        true
    }
}

/// Compress an ordered list of hosts into a hostlist expression.
///
/// Only hosts that are adjacent in the input are grouped, so the expansion
/// of the result preserves the input order.
pub fn compress(hosts: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<Group> = None;

    for host in hosts {
        let numbered = split_numeric_suffix(host)
            .and_then(|(prefix, digits)| digits.parse::<u64>().ok().map(|v| (prefix, digits, v)));

        let Some((prefix, digits, value)) = numbered else {
            if let Some(group) = current.take() {
                parts.push(group.render());
            }
            parts.push(host.clone());
            continue;
        };

        if current
            .as_mut()
            .is_some_and(|group| group.push(prefix, digits, value))
        {
            continue;
        }

        if let Some(group) = current.take() {
            parts.push(group.render());
        }
        current = Some(Group {
            prefix,
            runs: vec![(digits, digits, value)],
        });
    }
    if let Some(group) = current.take() {
        parts.push(group.render());
    }

    parts.join(",")
}
