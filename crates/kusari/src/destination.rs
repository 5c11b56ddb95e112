use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{error::ConstructionError, util::path::sanitize_file_name, Target};

/// Where successful payloads end up. Selected once per sequencer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Destination {
    /// Payloads are handed over as bytes.
    #[default]
    Memory,
    /// Payloads are written to the path rendered from this template.
    ///
    /// Recognized placeholders are `{index}` (zero-padded position in the
    /// sequence) and `{name}` (last path segment of the target url). At
    /// least one of them must appear.
    Persist(String),
}

impl Destination {
    pub fn persist(template: impl Into<String>) -> Self {
        Self::Persist(template.into())
    }

    /// Resolve the destination of every target, in order.
    pub(crate) fn plan(&self, targets: &[Target]) -> Result<Vec<FetchDestination>, ConstructionError> {
        let template = match self {
            Destination::Memory => return Ok(vec![FetchDestination::Memory; targets.len()]),
            Destination::Persist(template) => PathTemplate::parse(template)?,
        };

        let width = index_width(targets.len());
        let mut seen: HashMap<PathBuf, usize> = HashMap::with_capacity(targets.len());
        let mut planned = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            let path = template.render(index, width, target);
            if let Some(first) = seen.insert(path.clone(), index) {
                return Err(ConstructionError::DuplicateDestination {
                    first,
                    second: index,
                    path,
                });
            }
            planned.push(FetchDestination::File(path));
        }
        Ok(planned)
    }
}

/// Destination of a single fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchDestination {
    Memory,
    File(PathBuf),
}

impl FetchDestination {
    pub fn path(&self) -> Option<&Path> {
        match self {
            FetchDestination::Memory => None,
            FetchDestination::File(path) => Some(path),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Part {
    Literal(String),
    Index,
    Name,
}

#[derive(Debug)]
struct PathTemplate {
    parts: Vec<Part>,
}

impl PathTemplate {
    fn parse(template: &str) -> Result<Self, ConstructionError> {
        let invalid = |reason: &str| ConstructionError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut placeholder = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(invalid("unclosed `{`")),
                            Some(c) => placeholder.push(c),
                        }
                    }
                    let part = match placeholder.as_str() {
                        "index" => Part::Index,
                        "name" => Part::Name,
                        other => return Err(invalid(&format!("unknown placeholder `{{{other}}}`"))),
                    };
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(part);
                }
                '}' => return Err(invalid("unmatched `}`")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        if !parts.iter().any(|p| matches!(p, Part::Index | Part::Name)) {
            return Err(invalid("expected `{index}` or `{name}`"));
        }
        if let Some(Part::Literal(last)) = parts.last() {
            if last.ends_with(['/', '\\']) {
                return Err(invalid("template must name a file, not a directory"));
            }
        }

        Ok(Self { parts })
    }

    fn render(&self, index: usize, width: usize, target: &Target) -> PathBuf {
        let mut rendered = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(literal) => rendered.push_str(literal),
                Part::Index => rendered.push_str(&format!("{index:0width$}")),
                Part::Name => {
                    let name = target.file_name().unwrap_or("item");
                    rendered.push_str(&sanitize_file_name(name));
                }
            }
        }
        PathBuf::from(rendered)
    }
}

fn index_width(len: usize) -> usize {
    let digits = len.saturating_sub(1).to_string().len();
    digits.max(3)
}
