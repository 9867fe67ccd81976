//! Structural strategy
//!
//! Parses each snapshot into its own [`Context`], finds the operation whose
//! location names the target, strips every location below it and replaces
//! oversized attribute values before printing.

use log::debug;

use crate::mlir::ir::{Context, Location, OpId, OpKind};
use crate::mlir::parser::Module;
use crate::mlir::printer::print_operation;
use crate::provenance::{Strategy, Target};
use crate::utils::Result;

/// Attribute values printed longer than this are replaced
pub const TRUNCATION_THRESHOLD: usize = 300;

/// String attribute standing in for a value of `chars` characters
pub fn placeholder(chars: usize) -> String {
    format!("\"... [TRUNCATED {} chars] ...\"", chars)
}

/// Exact, parser-backed extraction; renderings compare byte for byte
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralStrategy;

impl Strategy for StructuralStrategy {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn extract(&self, source: &str, target: &Target) -> Result<Option<String>> {
        let mut context = Context::new();
        context.allow_unregistered_dialects = true;
        let mut module = Module::parse(source, context)?;
        let root = module.operation();

        let Some(found) = find_best_match(module.context(), root, target)? else {
            return Ok(None);
        };
        sanitize(module.context_mut(), found)?;
        print_operation(module.context(), found).map(Some)
    }

    fn same(&self, previous: &str, current: &str) -> bool {
        previous == current
    }
}

/// The operation whose location names `target`. A later non-container
/// match replaces an earlier one, so the most specific op wins over the
/// module or function that encloses it.
pub fn find_best_match(context: &Context, root: OpId, target: &Target) -> Result<Option<OpId>> {
    let mut best = None;
    for id in context.walk(root)? {
        let op = context.op(id)?;
        if !target.matches(op.location.printed()) {
            continue;
        }
        if best.is_none() || op.kind() == OpKind::Leaf {
            best = Some(id);
        }
    }
    Ok(best)
}

/// Strip locations and truncate large attributes of `root` and everything
/// nested in it
pub fn sanitize(context: &mut Context, root: OpId) -> Result<()> {
    for location in context.locations_mut(root)? {
        *location = Location::Unknown;
    }

    for id in context.walk(root)? {
        let op = context.op_mut(id)?;
        // unit attributes have no payload to shorten
        let oversized: Vec<(String, usize)> = op
            .attributes
            .iter()
            .filter_map(|attr| attr.value.as_ref().map(|value| (attr.name.clone(), value.chars().count())))
            .filter(|(_, chars)| *chars > TRUNCATION_THRESHOLD)
            .collect();

        for (name, chars) in oversized {
            debug!("Truncating attribute '{}' of {} ({} chars)", name, op.name, chars);
            op.set_attribute(&name, placeholder(chars))?;
        }
    }
    Ok(())
}
