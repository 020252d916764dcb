//! `Row`, `Cell` and `Candidate` — spec §3, §9 ("Cell as a tagged variant").

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::table::LiteralDatatype;

/// A KG entity candidate attached to an `NECell`, threaded through every
/// pipeline stage from Lookup to Decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub types: Vec<TypeRef>,
    pub description: Option<String>,
    /// True iff normalized(`name`) equals normalized(cell text) under
    /// case-folding (spec §3 invariant).
    pub r#match: bool,
    /// Feature name -> value, every value in `[0, 1]` (spec §3 invariant).
    pub features: HashMap<String, f64>,
    /// ρ — first-pass score.
    pub score: Option<f64>,
    /// ρ′ — revised score.
    pub score_prime: Option<f64>,
    /// Margin to rank-2 at the current stage (0 if `< 2` candidates).
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRef {
    pub id: String,
    pub name: String,
}

impl Candidate {
    /// Sort key used at every stage that has assigned a score: descending
    /// score, ties broken by lexicographic `id` ascending (spec §3).
    pub fn score_desc_id_asc(a: &Candidate, b: &Candidate, by_prime: bool) -> Ordering {
        let sa = if by_prime { a.score_prime } else { a.score }.unwrap_or(0.0);
        let sb = if by_prime { b.score_prime } else { b.score }.unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(Ordering::Equal).then_with(|| a.id.cmp(&b.id))
    }

    pub fn feature(&self, name: &str) -> f64 {
        self.features.get(name).copied().unwrap_or(0.0)
    }

    pub fn set_feature(&mut self, name: &str, value: f64) {
        self.features.insert(name.to_string(), value.clamp(0.0, 1.0));
    }
}

/// Sort `candidates` in place by `(score desc, id asc)` using whichever score
/// is currently populated (ρ if `score_prime` is absent, else ρ′).
pub fn sort_candidates(candidates: &mut [Candidate], by_prime: bool) {
    candidates.sort_by(|a, b| Candidate::score_desc_id_asc(a, b, by_prime));
}

/// Recompute `delta` (margin between rank 1 and rank 2) for an
/// already-sorted candidate list.
pub fn recompute_delta(candidates: &mut [Candidate], by_prime: bool) {
    let top = if by_prime { candidates.first().and_then(|c| c.score_prime) } else {
        candidates.first().and_then(|c| c.score)
    };
    let second = if by_prime {
        candidates.get(1).and_then(|c| c.score_prime)
    } else {
        candidates.get(1).and_then(|c| c.score)
    };
    let delta = match (top, second) {
        (Some(t), Some(s)) => t - s,
        _ => 0.0,
    };
    if let Some(first) = candidates.first_mut() {
        first.delta = delta;
    }
}

/// A tagged cell variant (spec §9): stages pattern-match on the tag and treat
/// anything they don't recognize as `NoTag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Cell {
    #[serde(rename = "NE")]
    Ne(NeCell),
    #[serde(rename = "LIT")]
    Lit(LitCell),
    #[serde(rename = "NOTAG")]
    NoTag(NoTagCell),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeCell {
    pub text: String,
    pub column_index: usize,
    pub is_subject: bool,
    pub provided_id: Option<String>,
    pub candidates: Vec<Candidate>,
    /// Lowercased, whitespace-normalized shadow used only for matching
    /// (spec §4.2 step 4).
    pub normalized_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LitCell {
    pub text: String,
    pub column_index: usize,
    pub datatype: LiteralDatatype,
    pub normalized_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoTagCell {
    pub text: String,
    pub column_index: usize,
}

impl Cell {
    pub fn column_index(&self) -> usize {
        match self {
            Cell::Ne(c) => c.column_index,
            Cell::Lit(c) => c.column_index,
            Cell::NoTag(c) => c.column_index,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Cell::Ne(c) => &c.text,
            Cell::Lit(c) => &c.text,
            Cell::NoTag(c) => &c.text,
        }
    }

    pub fn as_ne(&self) -> Option<&NeCell> {
        match self {
            Cell::Ne(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_ne_mut(&mut self) -> Option<&mut NeCell> {
        match self {
            Cell::Ne(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_lit(&self) -> Option<&LitCell> {
        match self {
            Cell::Lit(c) => Some(c),
            _ => None,
        }
    }
}

/// An ordered sequence of cells of fixed arity equal to `|header|` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub id_row: i64,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(id_row: i64) -> Self {
        Self { id_row, cells: Vec::new() }
    }

    pub fn ne_cells(&self) -> impl Iterator<Item = &NeCell> {
        self.cells.iter().filter_map(|c| c.as_ne())
    }

    pub fn ne_cells_mut(&mut self) -> impl Iterator<Item = &mut NeCell> {
        self.cells.iter_mut().filter_map(|c| c.as_ne_mut())
    }

    pub fn lit_cells(&self) -> impl Iterator<Item = &LitCell> {
        self.cells.iter().filter_map(|c| c.as_lit())
    }

    pub fn subject_cell(&self) -> Option<&NeCell> {
        self.ne_cells().find(|c| c.is_subject)
    }

    pub fn cell_at(&self, column_index: usize) -> Option<&Cell> {
        self.cells.iter().find(|c| c.column_index() == column_index)
    }
}
