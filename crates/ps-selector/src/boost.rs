//! Boost frame expansion.
//!
//! Every frame receives a boosted copy `<vector>_<frame>` of each vector in
//! the shared vector list. Root frames boost the lab-frame vectors; nested
//! frames boost their parent's copies, and their boost vector expression is
//! rewritten to read the parent-frame copies. Frames are expanded pre-order
//! so a parent's copies exist before any child reads them.

use ps_core::{Error, Result};
use serde::Serialize;

use crate::expr::{ExprSymbols, rename_identifiers};
use crate::registry::BoostFrame;

/// One vector copy made when entering a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorCopy {
    /// Vector in the parent frame (lab frame for roots).
    pub source: String,
    /// Boosted copy.
    pub target: String,
}

/// Expanded boost frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameTransform {
    pub frame: String,
    pub parent: Option<String>,
    pub depth: usize,
    /// Local holding the boost four-vector.
    pub boost_symbol: String,
    /// Boost expression rewritten into the parent frame.
    pub boost_expression: String,
    /// Copies in shared-vector-list order; each is boosted by
    /// `-boost_symbol.BoostVector()`.
    pub copies: Vec<VectorCopy>,
}

/// Suffix added to vectors boosted into `frame`.
pub fn frame_suffix(frame: &str) -> String {
    format!("_{frame}")
}

/// Whether `ident` has the shape of a four-vector local.
fn is_four_vector_local(ident: &str) -> bool {
    ident.starts_with("loc") && (ident.ends_with("P4") || ident.ends_with("P4_Measured"))
}

/// Expand `frames` over the shared `vectors` list, pre-order.
pub fn expand_frames(frames: &[BoostFrame], vectors: &[String]) -> Result<Vec<FrameTransform>> {
    let mut out = Vec::new();
    for frame in frames {
        expand_node(frame, None, 0, vectors, &mut out)?;
    }
    tracing::debug!(frames = out.len(), vectors = vectors.len(), "boost frames expanded");
    Ok(out)
}

fn expand_node(
    frame: &BoostFrame,
    parent: Option<&str>,
    depth: usize,
    vectors: &[String],
    out: &mut Vec<FrameTransform>,
) -> Result<()> {
    let context = format!("boost frame '{}'", frame.name);
    let symbols = ExprSymbols::scan(&frame.boost_vector)?;
    if symbols.identifiers.is_empty() {
        return Err(Error::UndefinedReference { symbol: frame.boost_vector.clone(), context });
    }
    if let Some(unknown) = symbols
        .identifiers
        .iter()
        .find(|id| is_four_vector_local(id) && !vectors.contains(*id))
    {
        return Err(Error::UndefinedReference { symbol: unknown.clone(), context });
    }

    let parent_suffix = parent.map(frame_suffix).unwrap_or_default();
    let boost_expression = rename_identifiers(&frame.boost_vector, |id| {
        vectors.iter().any(|v| v == id).then(|| format!("{id}{parent_suffix}"))
    })?;
    let suffix = frame_suffix(&frame.name);
    let copies = vectors
        .iter()
        .map(|v| VectorCopy { source: format!("{v}{parent_suffix}"), target: format!("{v}{suffix}") })
        .collect();

    out.push(FrameTransform {
        frame: frame.name.clone(),
        parent: parent.map(str::to_string),
        depth,
        boost_symbol: format!("locBoostP4{suffix}"),
        boost_expression,
        copies,
    });

    for child in &frame.children {
        expand_node(child, Some(&frame.name), depth + 1, vectors, out)?;
    }
    Ok(())
}
