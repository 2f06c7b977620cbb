use std::time::Instant;

use nom::bytes::complete::{tag, take_till, take_while};
use nom::character::complete::char;
use nom::combinator::opt;
use nom::number::complete::double;
use nom::sequence::{delimited, preceded};
use nom::IResult;

use super::plan_json::{ParseError, PlanNode};

/// One parsed line of a MySQL `EXPLAIN FORMAT=TREE` plan: its indentation
/// depth (in raw leading spaces, not normalized to a level count -- sibling
/// lines at the same depth are allowed to differ in indent style across
/// MySQL versions) and the node it describes.
struct Line {
    indent: usize,
    node: PlanNode,
}

fn indent(input: &str) -> IResult<&str, usize> {
    let (rest, spaces) = take_while(|c| c == ' ')(input)?;
    Ok((rest, spaces.len()))
}

fn arrow(input: &str) -> IResult<&str, ()> {
    let (rest, _) = tag("-> ")(input)?;
    Ok((rest, ()))
}

fn cost_rows(input: &str) -> IResult<&str, (f64, f64)> {
    let (rest, _) = tag("(cost=")(input)?;
    let (rest, cost) = double(rest)?;
    let (rest, _) = tag(" rows=")(rest)?;
    let (rest, rows) = double(rest)?;
    let (rest, _) = char(')')(rest)?;
    Ok((rest, (cost, rows)))
}

fn annotation(input: &str) -> IResult<&str, (f64, f64)> {
    delimited(take_till(|c| c == '('), cost_rows, take_till(|_| false))(input)
}

/// Parses one line of `EXPLAIN FORMAT=TREE` output, e.g.
/// `"    -> Nested loop inner join  (cost=12.3 rows=4)"`. A line with no
/// `-> ` marker (continuation text, blank lines) is not a node and yields `None`.
fn parse_line(raw: &str) -> Option<Line> {
    let (after_indent, depth) = indent(raw).ok()?;
    let (rest, _) = preceded(opt(char('*')), arrow)(after_indent).ok()?;

    let (cost, rows) = annotation(rest).unwrap_or((rest, (0.0, 0.0))).1;
    let op = rest.split('(').next().unwrap_or(rest).trim().to_string();

    Some(Line { indent: depth, node: PlanNode { op, cost, rows, width: 0.0, children: vec![] } })
}

/// Reconstructs the plan tree from a flat, indentation-ordered list of lines.
/// A line is the child of the nearest preceding line with strictly smaller
/// indent; siblings share the same indent. Mirrors a standard outline parser,
/// driven by an explicit stack rather than recursion so depth is bounded only
/// by available memory, not call-stack size.
fn build_tree(lines: Vec<Line>) -> Option<PlanNode> {
    let mut stack: Vec<(usize, PlanNode)> = Vec::new();

    for line in lines {
        while let Some((top_indent, _)) = stack.last() {
            if *top_indent < line.indent {
                break;
            }
            let (_, finished) = stack.pop().unwrap();
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(finished),
                None => {
                    stack.push((line.indent, finished));
                    break;
                }
            }
        }
        stack.push((line.indent, line.node));
    }

    while stack.len() > 1 {
        let (_, finished) = stack.pop().unwrap();
        stack.last_mut().unwrap().1.children.push(finished);
    }

    stack.pop().map(|(_, node)| node)
}

/// Parses a MySQL `EXPLAIN FORMAT=TREE` text plan into the same `PlanNode`
/// shape `plan_json::parse` produces, so the rest of the extractor is
/// format-agnostic. Returns `Err(Malformed)` if no line carries a `-> `
/// marker, or `Err(Timeout)` if `deadline` passes before every line has been
/// read (checked once per line, since a multi-megabyte plan is exactly the
/// case `parse_timeout` exists to bound).
pub fn parse(plan_text: &str, deadline: Instant) -> Result<PlanNode, ParseError> {
    let mut lines = Vec::new();
    for raw in plan_text.lines() {
        if Instant::now() > deadline {
            return Err(ParseError::Timeout);
        }
        if let Some(line) = parse_line(raw) {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return Err(ParseError::Malformed);
    }
    build_tree(lines).ok_or(ParseError::Malformed)
}
