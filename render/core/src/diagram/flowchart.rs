//! Built-in diagram engine
//!
//! Validates a mermaid-compatible subset and renders it as plain SVG:
//!
//! - `graph` / `flowchart`: node and edge statements, drawn as a layered
//!   top-down (or left-right) graph
//! - `sequenceDiagram`: participants and messages, drawn as lifelines
//! - `pie`: `"label" : value` entries, drawn as proportional bars
//! - other recognized headers: any non-empty body, drawn as a summary card
//!
//! Errors carry the 1-based line of the offending statement.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::classifier::DIAGRAM_KEYWORDS;
use crate::error::DiagramError;
use crate::markup::sanitize::escape_html;

use super::DiagramEngine;

const NODE_WIDTH: u32 = 140;
const NODE_HEIGHT: u32 = 40;
const LAYER_GAP: u32 = 60;
const SIBLING_GAP: u32 = 30;
const MARGIN: u32 = 20;

/// Statements that carry styling or grouping, not graph structure
const FLOWCHART_DIRECTIVES: [&str; 8] = [
    "subgraph",
    "direction",
    "end",
    "classdef",
    "class",
    "style",
    "linkstyle",
    "click",
];

/// Sequence statements other than messages
const SEQUENCE_DIRECTIVES: [&str; 15] = [
    "participant",
    "actor",
    "note",
    "loop",
    "alt",
    "else",
    "opt",
    "par",
    "and",
    "end",
    "autonumber",
    "activate",
    "deactivate",
    "title",
    "rect",
];

// ============================================================================
// Parsed model
// ============================================================================

/// Flow direction of a flowchart
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// Top to bottom (`TD` / `TB`)
    #[default]
    TopDown,
    /// Bottom to top
    BottomUp,
    /// Left to right
    LeftRight,
    /// Right to left
    RightLeft,
}

#[derive(Clone, Debug, PartialEq)]
enum Diagram {
    Flowchart(Flowchart),
    Sequence(Vec<Message>),
    Pie(Vec<(String, f64)>),
    Other { kind: String, statements: usize },
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Flowchart {
    direction: Direction,
    /// Node ids in order of first appearance
    order: Vec<String>,
    labels: HashMap<String, String>,
    edges: Vec<Edge>,
}

impl Flowchart {
    fn add_node(&mut self, id: &str, label: Option<String>) {
        if !self.labels.contains_key(id) {
            self.order.push(id.to_string());
            self.labels.insert(id.to_string(), id.to_string());
        }
        if let Some(label) = label {
            self.labels.insert(id.to_string(), label);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Edge {
    from: String,
    to: String,
    label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Message {
    from: String,
    to: String,
    text: Option<String>,
}

// ============================================================================
// Engine
// ============================================================================

/// The built-in engine
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicDiagramEngine;

impl DiagramEngine for BasicDiagramEngine {
    fn name(&self) -> &str {
        "basic"
    }

    fn parse(&self, source: &str) -> Result<(), DiagramError> {
        parse_diagram(source).map(|_| ())
    }

    fn render(&self, source: &str) -> Result<String, DiagramError> {
        let diagram = parse_diagram(source)?;
        Ok(match diagram {
            Diagram::Flowchart(chart) => render_flowchart(&chart),
            Diagram::Sequence(messages) => render_sequence(&messages),
            Diagram::Pie(entries) => render_pie(&entries),
            Diagram::Other { kind, statements } => render_summary(&kind, statements),
        })
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_diagram(source: &str) -> Result<Diagram, DiagramError> {
    let mut lines = source
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, strip_comment(line).trim()))
        .filter(|(_, line)| !line.is_empty());

    let Some((header_line, header)) = lines.next() else {
        return Err(DiagramError::UnknownDiagram("empty diagram".to_string()));
    };
    let body: Vec<(usize, &str)> = lines.collect();
    if body.is_empty() {
        return Err(DiagramError::Invalid {
            line: header_line,
            message: "diagram has no content".to_string(),
        });
    }

    let mut words = header.split(|c: char| c.is_whitespace() || c == ':');
    let kind = words.next().unwrap_or("").to_ascii_lowercase();
    match kind.as_str() {
        "graph" | "flowchart" => {
            let direction = words.next().map_or(Direction::TopDown, parse_direction);
            parse_flowchart(direction, &body).map(Diagram::Flowchart)
        }
        "sequencediagram" => parse_sequence_body(&body).map(Diagram::Sequence),
        "pie" => parse_pie_body(&body).map(Diagram::Pie),
        "statediagram-v2" => Ok(Diagram::Other {
            kind: "statediagram".to_string(),
            statements: body.len(),
        }),
        other if DIAGRAM_KEYWORDS.contains(&other) => Ok(Diagram::Other {
            kind: other.to_string(),
            statements: body.len(),
        }),
        _ => Err(DiagramError::UnknownDiagram(header.to_string())),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("%%") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_direction(token: &str) -> Direction {
    match token.to_ascii_lowercase().as_str() {
        "bt" => Direction::BottomUp,
        "lr" => Direction::LeftRight,
        "rl" => Direction::RightLeft,
        _ => Direction::TopDown,
    }
}

fn parse_flowchart(direction: Direction, body: &[(usize, &str)]) -> Result<Flowchart, DiagramError> {
    let mut chart = Flowchart {
        direction,
        ..Default::default()
    };

    for &(line, text) in body {
        for statement in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let keyword = statement
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_ascii_lowercase();
            if FLOWCHART_DIRECTIVES.contains(&keyword.as_str()) {
                continue;
            }
            parse_flowchart_statement(&mut chart, statement)
                .map_err(|message| DiagramError::Invalid { line, message })?;
        }
    }

    if chart.order.is_empty() {
        return Err(DiagramError::Invalid {
            line: body.first().map_or(1, |(line, _)| *line),
            message: "flowchart has no nodes".to_string(),
        });
    }
    Ok(chart)
}

/// Parse `A --> B --> C`, `A -->|label| B` or a lone `A[Label]`
fn parse_flowchart_statement(chart: &mut Flowchart, statement: &str) -> Result<(), String> {
    let Some((start, end)) = find_arrow(statement) else {
        let (id, label) =
            parse_node_spec(statement).ok_or_else(|| format!("expected a node or edge: {statement}"))?;
        chart.add_node(&id, label);
        return Ok(());
    };

    let left = statement[..start].trim();
    let (from, from_label) =
        parse_node_spec(left).ok_or_else(|| "edge is missing a source node".to_string())?;
    chart.add_node(&from, from_label);

    let mut previous = from;
    let mut rest = &statement[end..];
    loop {
        let (label, remainder) = split_label(rest);
        let (target, next) = match find_arrow(remainder) {
            Some((s, e)) => (&remainder[..s], Some(&remainder[e..])),
            None => (remainder, None),
        };
        let (to, to_label) = parse_node_spec(target)
            .ok_or_else(|| "edge is missing a target node".to_string())?;
        chart.add_node(&to, to_label);
        chart.edges.push(Edge {
            from: previous,
            to: to.clone(),
            label: label.map(normalize_ws),
        });
        previous = to;
        match next {
            Some(next) => rest = next,
            None => return Ok(()),
        }
    }
}

fn parse_sequence_body(body: &[(usize, &str)]) -> Result<Vec<Message>, DiagramError> {
    let mut messages = Vec::new();
    for &(line, text) in body {
        let keyword = text
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if SEQUENCE_DIRECTIVES.contains(&keyword.as_str()) {
            continue;
        }
        let message = parse_message(text).ok_or_else(|| DiagramError::Invalid {
            line,
            message: "expected a message like `A->>B: text`".to_string(),
        })?;
        messages.push(message);
    }
    Ok(messages)
}

fn parse_message(line: &str) -> Option<Message> {
    let (start, end) = find_arrow(line)?;
    let left = line[..start].trim();
    let right = line[end..].trim();
    let (to, text) = match right.find(':') {
        Some(idx) => (right[..idx].trim(), Some(right[idx + 1..].trim())),
        None => (right, None),
    };
    if left.is_empty() || to.is_empty() {
        return None;
    }
    Some(Message {
        from: normalize_ws(left),
        to: normalize_ws(to),
        text: text.filter(|t| !t.is_empty()).map(normalize_ws),
    })
}

fn parse_pie_body(body: &[(usize, &str)]) -> Result<Vec<(String, f64)>, DiagramError> {
    let mut entries = Vec::new();
    for &(line, text) in body {
        let lower = text.to_ascii_lowercase();
        if lower.starts_with("title") || lower == "showdata" {
            continue;
        }
        let entry = text.split_once(':').and_then(|(label, value)| {
            let label = label.trim().trim_matches(['"', '\'']);
            let value: f64 = value.trim().parse().ok()?;
            (!label.is_empty() && value.is_finite() && value >= 0.0)
                .then(|| (normalize_ws(label), value))
        });
        match entry {
            Some(entry) => entries.push(entry),
            None => {
                return Err(DiagramError::Invalid {
                    line,
                    message: "expected a pie entry like `\"Label\" : 42`".to_string(),
                })
            }
        }
    }
    Ok(entries)
}

/// Node id with an optional bracketed label: `A`, `A[Label]`, `B(Round)`, `C{Choice}`
fn parse_node_spec(text: &str) -> Option<(String, Option<String>)> {
    let text = text.trim();
    let open = text.find(['[', '(', '{']);
    let (id, label) = match open {
        Some(idx) => {
            let closing = match text.as_bytes()[idx] {
                b'(' => ')',
                b'{' => '}',
                _ => ']',
            };
            let inner = &text[idx + 1..];
            let end = inner.rfind(closing)?;
            let label = inner[..end].trim_matches(['[', '(', '{', ']', ')', '}', '"']);
            (text[..idx].trim(), Some(normalize_ws(label)))
        }
        None => (text, None),
    };

    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    valid.then(|| (id.to_string(), label))
}

/// `|label| rest` → (Some(label), rest)
fn split_label(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim();
    if let Some(stripped) = trimmed.strip_prefix('|') {
        if let Some(end) = stripped.find('|') {
            return (Some(&stripped[..end]), stripped[end + 1..].trim());
        }
    }
    (None, trimmed)
}

/// Byte range of the first arrow (two or more arrow characters) outside brackets
fn find_arrow(line: &str) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut chars = line.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            c if depth == 0 && is_arrow_char(c) => {
                let mut end = idx + c.len_utf8();
                let mut run = 1;
                while let Some(&(next_idx, next)) = chars.peek() {
                    if !is_arrow_char(next) {
                        break;
                    }
                    end = next_idx + next.len_utf8();
                    run += 1;
                    chars.next();
                }
                if run >= 2 {
                    return Some((idx, end));
                }
            }
            _ => {}
        }
    }
    None
}

fn is_arrow_char(c: char) -> bool {
    matches!(c, '-' | '.' | '=' | '<' | '>')
}

fn normalize_ws(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Rendering
// ============================================================================

fn svg_open(out: &mut String, width: u32, height: u32) {
    let _ = write!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" class=\"diagram-svg\" \
         viewBox=\"0 0 {width} {height}\" width=\"{width}\" height=\"{height}\">"
    );
    out.push_str(
        "<defs><marker id=\"arrow\" viewBox=\"0 0 10 10\" refX=\"10\" refY=\"5\" \
         markerWidth=\"6\" markerHeight=\"6\" orient=\"auto-start-reverse\">\
         <path d=\"M 0 0 L 10 5 L 0 10 z\"/></marker></defs>",
    );
}

/// Longest-path layering; cycles are cut at `node count` layers
fn assign_layers(chart: &Flowchart) -> HashMap<&str, usize> {
    let mut layers: HashMap<&str, usize> = chart.order.iter().map(|id| (id.as_str(), 0)).collect();
    let cap = chart.order.len().saturating_sub(1);
    for _ in 0..chart.order.len() {
        let mut changed = false;
        for edge in &chart.edges {
            let from = layers.get(edge.from.as_str()).copied().unwrap_or(0);
            let to = layers.entry(edge.to.as_str()).or_insert(0);
            let candidate = (from + 1).min(cap);
            if candidate > *to {
                *to = candidate;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    layers
}

fn render_flowchart(chart: &Flowchart) -> String {
    let layers = assign_layers(chart);
    let depth = layers.values().copied().max().unwrap_or(0) + 1;

    let mut slots: Vec<Vec<&str>> = vec![Vec::new(); depth];
    for id in &chart.order {
        let layer = layers.get(id.as_str()).copied().unwrap_or(0);
        slots[layer].push(id.as_str());
    }
    let breadth = slots.iter().map(Vec::len).max().unwrap_or(1) as u32;

    let horizontal = matches!(chart.direction, Direction::LeftRight | Direction::RightLeft);
    let reversed = matches!(chart.direction, Direction::BottomUp | Direction::RightLeft);

    let mut positions: HashMap<&str, (u32, u32)> = HashMap::new();
    for (layer, ids) in slots.iter().enumerate() {
        let layer = if reversed { depth - 1 - layer } else { layer };
        let layer = layer as u32;
        for (index, id) in ids.iter().enumerate() {
            let index = index as u32;
            let (x, y) = if horizontal {
                (
                    MARGIN + layer * (NODE_WIDTH + LAYER_GAP),
                    MARGIN + index * (NODE_HEIGHT + SIBLING_GAP),
                )
            } else {
                (
                    MARGIN + index * (NODE_WIDTH + SIBLING_GAP),
                    MARGIN + layer * (NODE_HEIGHT + LAYER_GAP),
                )
            };
            positions.insert(*id, (x, y));
        }
    }

    let depth = depth as u32;
    let (width, height) = if horizontal {
        (
            2 * MARGIN + depth * NODE_WIDTH + (depth - 1) * LAYER_GAP,
            2 * MARGIN + breadth * NODE_HEIGHT + (breadth - 1) * SIBLING_GAP,
        )
    } else {
        (
            2 * MARGIN + breadth * NODE_WIDTH + (breadth - 1) * SIBLING_GAP,
            2 * MARGIN + depth * NODE_HEIGHT + (depth - 1) * LAYER_GAP,
        )
    };

    let mut out = String::new();
    svg_open(&mut out, width, height);

    out.push_str("<g class=\"edges\">");
    for edge in &chart.edges {
        let (Some(&(fx, fy)), Some(&(tx, ty))) = (
            positions.get(edge.from.as_str()),
            positions.get(edge.to.as_str()),
        ) else {
            continue;
        };
        let (x1, y1, x2, y2) = if horizontal {
            let (fx, tx) = if tx >= fx { (fx + NODE_WIDTH, tx) } else { (fx, tx + NODE_WIDTH) };
            (fx, fy + NODE_HEIGHT / 2, tx, ty + NODE_HEIGHT / 2)
        } else {
            let (fy, ty) = if ty >= fy { (fy + NODE_HEIGHT, ty) } else { (fy, ty + NODE_HEIGHT) };
            (fx + NODE_WIDTH / 2, fy, tx + NODE_WIDTH / 2, ty)
        };
        let _ = write!(
            out,
            "<line x1=\"{x1}\" y1=\"{y1}\" x2=\"{x2}\" y2=\"{y2}\" marker-end=\"url(#arrow)\"/>"
        );
        if let Some(label) = &edge.label {
            let _ = write!(
                out,
                "<text class=\"edge-label\" x=\"{}\" y=\"{}\">{}</text>",
                (x1 + x2) / 2,
                (y1 + y2) / 2,
                escape_html(label)
            );
        }
    }
    out.push_str("</g><g class=\"nodes\">");

    for id in &chart.order {
        let Some(&(x, y)) = positions.get(id.as_str()) else {
            continue;
        };
        let label = chart.labels.get(id).map_or(id.as_str(), String::as_str);
        let _ = write!(
            out,
            "<g class=\"node\" data-id=\"{}\"><rect x=\"{x}\" y=\"{y}\" width=\"{NODE_WIDTH}\" \
             height=\"{NODE_HEIGHT}\" rx=\"6\"/><text x=\"{}\" y=\"{}\" text-anchor=\"middle\">{}</text></g>",
            escape_html(id),
            x + NODE_WIDTH / 2,
            y + NODE_HEIGHT / 2 + 5,
            escape_html(label)
        );
    }
    out.push_str("</g></svg>");
    out
}

fn render_sequence(messages: &[Message]) -> String {
    let mut participants: Vec<&str> = Vec::new();
    for message in messages {
        for name in [message.from.as_str(), message.to.as_str()] {
            if !participants.contains(&name) {
                participants.push(name);
            }
        }
    }

    let column = |name: &str| -> u32 {
        let index = participants.iter().position(|p| *p == name).unwrap_or(0) as u32;
        MARGIN + index * (NODE_WIDTH + SIBLING_GAP) + NODE_WIDTH / 2
    };
    let count = participants.len().max(1) as u32;
    let width = 2 * MARGIN + count * NODE_WIDTH + (count - 1) * SIBLING_GAP;
    let height = 2 * MARGIN + NODE_HEIGHT + (messages.len() as u32 + 1) * LAYER_GAP;

    let mut out = String::new();
    svg_open(&mut out, width, height);
    for name in &participants {
        let cx = column(*name);
        let _ = write!(
            out,
            "<g class=\"participant\"><rect x=\"{}\" y=\"{MARGIN}\" width=\"{NODE_WIDTH}\" \
             height=\"{NODE_HEIGHT}\" rx=\"4\"/><text x=\"{cx}\" y=\"{}\" text-anchor=\"middle\">{}</text>\
             <line class=\"lifeline\" x1=\"{cx}\" y1=\"{}\" x2=\"{cx}\" y2=\"{}\"/></g>",
            cx - NODE_WIDTH / 2,
            MARGIN + NODE_HEIGHT / 2 + 5,
            escape_html(name),
            MARGIN + NODE_HEIGHT,
            height - MARGIN
        );
    }
    for (row, message) in messages.iter().enumerate() {
        let y = MARGIN + NODE_HEIGHT + (row as u32 + 1) * LAYER_GAP;
        let (x1, x2) = (column(message.from.as_str()), column(message.to.as_str()));
        let _ = write!(
            out,
            "<line class=\"message\" x1=\"{x1}\" y1=\"{y}\" x2=\"{x2}\" y2=\"{y}\" marker-end=\"url(#arrow)\"/>"
        );
        if let Some(text) = &message.text {
            let _ = write!(
                out,
                "<text x=\"{}\" y=\"{}\" text-anchor=\"middle\">{}</text>",
                (x1 + x2) / 2,
                y - 6,
                escape_html(text)
            );
        }
    }
    out.push_str("</svg>");
    out
}

fn render_pie(entries: &[(String, f64)]) -> String {
    const BAR_MAX: f64 = 300.0;
    let total: f64 = entries.iter().map(|(_, v)| v).sum();
    let height = 2 * MARGIN + entries.len() as u32 * (NODE_HEIGHT / 2 + 10);
    let width = 2 * MARGIN + NODE_WIDTH + BAR_MAX as u32 + 60;

    let mut out = String::new();
    svg_open(&mut out, width, height);
    for (row, (label, value)) in entries.iter().enumerate() {
        let y = MARGIN + row as u32 * (NODE_HEIGHT / 2 + 10);
        let share = if total > 0.0 { value / total } else { 0.0 };
        let _ = write!(
            out,
            "<g class=\"slice\"><text x=\"{MARGIN}\" y=\"{}\">{}</text>\
             <rect x=\"{}\" y=\"{y}\" width=\"{:.1}\" height=\"{}\"/>\
             <text x=\"{}\" y=\"{}\">{:.1}%</text></g>",
            y + 15,
            escape_html(label),
            MARGIN + NODE_WIDTH,
            share * BAR_MAX,
            NODE_HEIGHT / 2,
            MARGIN + NODE_WIDTH + BAR_MAX as u32 + 8,
            y + 15,
            share * 100.0
        );
    }
    out.push_str("</svg>");
    out
}

fn render_summary(kind: &str, statements: usize) -> String {
    let width = 2 * MARGIN + 2 * NODE_WIDTH;
    let height = 2 * MARGIN + NODE_HEIGHT;
    let mut out = String::new();
    svg_open(&mut out, width, height);
    let _ = write!(
        out,
        "<g class=\"summary\"><rect x=\"{MARGIN}\" y=\"{MARGIN}\" width=\"{}\" height=\"{NODE_HEIGHT}\" rx=\"6\"/>\
         <text x=\"{}\" y=\"{}\" text-anchor=\"middle\">{} ({} statements)</text></g></svg>",
        2 * NODE_WIDTH,
        width / 2,
        MARGIN + NODE_HEIGHT / 2 + 5,
        escape_html(kind),
        statements
    );
    out
}
