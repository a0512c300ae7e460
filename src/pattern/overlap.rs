// src/pattern/overlap.rs

//! Whether two path patterns can select a common path.
//!
//! Globs, literal paths and output templates are reduced to token sequences
//! (one per `{a,b}` alternative). Two patterns overlap when some path is
//! accepted by both, decided by walking the product of the two sequences.
//! Character classes are treated as "any one character", and `**/` may also
//! match nothing, so the answer errs towards reporting an overlap.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    /// `?` or `[...]`: one character other than `/`.
    One,
    /// `*`: any run of characters without `/`.
    Star,
    /// `**`: anything, separators included.
    Any,
}

impl Token {
    fn repeats(self) -> bool {
        matches!(self, Token::Star | Token::Any)
    }

    /// Some character is accepted by both tokens.
    fn shares_char_with(self, other: Token) -> bool {
        match (self, other) {
            (Token::Char(a), Token::Char(b)) => a == b,
            (Token::Char(c), t) | (t, Token::Char(c)) => c != '/' || t == Token::Any,
            _ => true,
        }
    }
}

/// Wildcard pushed for a template placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wildcard {
    /// Stays within one path component.
    Segment,
    /// May span several components.
    Path,
}

/// The set of paths a pattern can select, in a form that can be intersected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    alternatives: Vec<Vec<Token>>,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            alternatives: vec![Vec::new()],
        }
    }
}

impl Shape {
    /// No path at all.
    pub fn empty() -> Self {
        Self {
            alternatives: Vec::new(),
        }
    }

    /// Exactly one path.
    pub fn literal(path: &str) -> Self {
        let mut shape = Self::default();
        shape.push_literal(path);
        shape
    }

    /// A glob with shell semantics (`*` stays inside a component).
    pub fn glob(pattern: &str) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        let mut pos = 0;
        Self {
            alternatives: parse_sequence(&chars, &mut pos, false),
        }
    }

    pub fn push_literal(&mut self, text: &str) {
        for alt in &mut self.alternatives {
            alt.extend(text.chars().map(Token::Char));
        }
    }

    pub fn push_wildcard(&mut self, wildcard: Wildcard) {
        let token = match wildcard {
            Wildcard::Segment => Token::Star,
            Wildcard::Path => Token::Any,
        };
        for alt in &mut self.alternatives {
            alt.push(token);
        }
    }

    pub fn overlaps(&self, other: &Shape) -> bool {
        self.alternatives
            .iter()
            .any(|a| other.alternatives.iter().any(|b| sequences_overlap(a, b)))
    }
}

fn parse_sequence(chars: &[char], pos: &mut usize, nested: bool) -> Vec<Vec<Token>> {
    let mut seqs: Vec<Vec<Token>> = vec![Vec::new()];
    let push = |seqs: &mut Vec<Vec<Token>>, token: Token| {
        for s in seqs.iter_mut() {
            s.push(token);
        }
    };

    while let Some(&c) = chars.get(*pos) {
        match c {
            ',' | '}' if nested => break,
            '{' => {
                *pos += 1;
                let mut options = Vec::new();
                loop {
                    options.extend(parse_sequence(chars, pos, true));
                    match chars.get(*pos) {
                        Some(',') => *pos += 1,
                        Some('}') => {
                            *pos += 1;
                            break;
                        }
                        _ => break,
                    }
                }
                seqs = seqs
                    .iter()
                    .flat_map(|s| {
                        options
                            .iter()
                            .map(move |o| s.iter().chain(o.iter()).copied().collect::<Vec<_>>())
                    })
                    .collect();
            }
            '*' if chars.get(*pos + 1) == Some(&'*') => {
                *pos += 2;
                if chars.get(*pos) == Some(&'/') {
                    *pos += 1;
                }
                push(&mut seqs, Token::Any);
            }
            '*' => {
                *pos += 1;
                push(&mut seqs, Token::Star);
            }
            '?' => {
                *pos += 1;
                push(&mut seqs, Token::One);
            }
            '[' => {
                let mut end = *pos + 1;
                if matches!(chars.get(end), Some('!') | Some('^')) {
                    end += 1;
                }
                if chars.get(end) == Some(&']') {
                    end += 1;
                }
                while chars.get(end).is_some_and(|c| *c != ']') {
                    end += 1;
                }
                *pos = end + 1;
                push(&mut seqs, Token::One);
            }
            '\\' => {
                if let Some(&escaped) = chars.get(*pos + 1) {
                    push(&mut seqs, Token::Char(escaped));
                }
                *pos += 2;
            }
            other => {
                *pos += 1;
                push(&mut seqs, Token::Char(other));
            }
        }
    }

    seqs
}

/// Reachability over pairs of positions: `(i, j)` means some prefix is
/// accepted by `a[..i]` and `b[..j]`.
fn sequences_overlap(a: &[Token], b: &[Token]) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![(0usize, 0usize)];

    while let Some((i, j)) = stack.pop() {
        if !seen.insert((i, j)) {
            continue;
        }
        if i == a.len() && j == b.len() {
            return true;
        }
        let ta = a.get(i).copied();
        let tb = b.get(j).copied();

        // A repeating token may also match nothing.
        if ta.is_some_and(Token::repeats) {
            stack.push((i + 1, j));
        }
        if tb.is_some_and(Token::repeats) {
            stack.push((i, j + 1));
        }
        if let (Some(x), Some(y)) = (ta, tb) {
            if x.shares_char_with(y) {
                let next = (
                    if x.repeats() { i } else { i + 1 },
                    if y.repeats() { j } else { j + 1 },
                );
                if next != (i, j) {
                    stack.push(next);
                }
            }
        }
    }

    false
}
