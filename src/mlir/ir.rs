//! Arena-scoped MLIR operation tree
//!
//! Every parse owns a fresh [`Context`]. Operations, blocks and regions live
//! in the context's arenas and are addressed by typed ids stamped with the
//! owning context, so a handle can never be resolved against another parse.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::utils::{Error, Result};

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of one parsing context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

/// Handle to an operation inside a [`Context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId {
    context: ContextId,
    index: usize,
}

/// Handle to a block inside a [`Context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    context: ContextId,
    index: usize,
}

/// Handle to a region inside a [`Context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId {
    context: ContextId,
    index: usize,
}

// ==================== Op Classification ====================

/// Operations that wrap other operations rather than compute anything.
pub const CONTAINER_OPS: &[&str] = &[
    "builtin.module",
    "module",
    "func.func",
    "util.func",
    "stream.executable",
    "stream.executable.export",
    "hal.executable",
    "hal.executable.variant",
];

/// Dialects the parser knows without `allow_unregistered_dialects`.
pub const REGISTERED_DIALECTS: &[&str] = &[
    "builtin",
    "func",
    "arith",
    "math",
    "scf",
    "cf",
    "tensor",
    "linalg",
    "memref",
    "vector",
    "affine",
    "bufferization",
    "llvm",
    "gpu",
    "tosa",
    "ml_program",
    "index",
    "complex",
    "shape",
    "sparse_tensor",
    "transform",
];

/// Coarse kind of an operation, used to rank location matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Module, function or executable wrapper
    Container,
    /// Anything that is not a wrapper
    Leaf,
}

impl OpKind {
    pub fn classify(name: &str) -> Self {
        if CONTAINER_OPS.contains(&name) {
            OpKind::Container
        } else {
            OpKind::Leaf
        }
    }
}

// ==================== Locations ====================

/// Source location annotation of an operation or block argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// `loc(unknown)`, or a location that was stripped; prints as nothing
    Unknown,
    /// Printed `loc(...)` text, with location aliases expanded after parsing
    Known(String),
}

impl Location {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Location::Unknown)
    }

    /// Printed form, empty for unknown locations
    pub fn printed(&self) -> &str {
        match self {
            Location::Unknown => "",
            Location::Known(text) => text,
        }
    }
}

// ==================== Attributes ====================

/// A named attribute; `value` is `None` for unit attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAttribute {
    pub name: String,
    pub value: Option<String>,
}

impl NamedAttribute {
    /// Printed form of the attribute value
    pub fn printed(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

// ==================== Operations ====================

/// One fragment of a custom-syntax operation body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    /// Verbatim text
    Text(String),
    /// Inline literal attribute (index into `Operation::attributes`)
    Attribute(usize),
    /// `{name = value, ...}` dictionary (indices into `Operation::attributes`)
    AttrDict(Vec<usize>),
    /// Nested region (index into `Operation::regions`)
    Region(usize),
    /// Location inside the body (index into `Operation::inner_locations`)
    Location(usize),
    /// Line break after a trailing `=`; the body goes on, indented two
    /// levels deeper than the op
    Continuation,
}

/// How an operation was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syntax {
    /// `"dialect.op"(%a) [^bb1] <{props}> ({...}) {attrs} : type`
    Generic {
        successors: Vec<String>,
        properties: Option<Vec<usize>>,
        dictionary: Option<Vec<usize>>,
        signature: Option<String>,
    },
    /// `dialect.op <body>`
    Custom { body: Vec<Piece> },
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub results: Vec<String>,
    pub operands: Vec<String>,
    pub attributes: Vec<NamedAttribute>,
    pub regions: Vec<RegionId>,
    pub location: Location,
    /// Locations written inside the body, e.g. on function arguments
    pub inner_locations: Vec<Location>,
    pub syntax: Syntax,
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        OpKind::classify(&self.name)
    }

    /// Replace the value of an existing attribute
    pub fn set_attribute(&mut self, name: &str, value: String) -> Result<()> {
        let attr = self
            .attributes
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::UnknownAttribute { name: name.to_string() })?;
        match attr.value {
            None => Err(Error::ImmutableAttribute { name: name.to_string() }),
            Some(_) => {
                attr.value = Some(value);
                Ok(())
            }
        }
    }
}

/// Dialect prefix of an op name; undotted names belong to `builtin`
pub fn dialect_of(name: &str) -> &str {
    match name.split_once('.') {
        Some((dialect, _)) => dialect,
        None => "builtin",
    }
}

#[derive(Debug, Clone)]
pub struct BlockArgument {
    pub name: String,
    pub ty: String,
    pub location: Location,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    /// `^bb0`; `None` for an implicit entry block
    pub label: Option<String>,
    pub arguments: Vec<BlockArgument>,
    pub operations: Vec<OpId>,
}

#[derive(Debug, Clone, Default)]
pub struct Region {
    pub blocks: Vec<BlockId>,
}

// ==================== Context ====================

/// Owner of one parse's operations, blocks and regions
#[derive(Debug)]
pub struct Context {
    id: ContextId,
    /// Accept operations of dialects outside [`REGISTERED_DIALECTS`]
    pub allow_unregistered_dialects: bool,
    operations: Vec<Operation>,
    blocks: Vec<Block>,
    regions: Vec<Region>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            allow_unregistered_dialects: false,
            operations: Vec::new(),
            blocks: Vec::new(),
            regions: Vec::new(),
        }
    }

    pub fn is_registered(&self, dialect: &str) -> bool {
        self.allow_unregistered_dialects || REGISTERED_DIALECTS.contains(&dialect)
    }

    fn check(&self, context: ContextId) -> Result<()> {
        if context == self.id {
            Ok(())
        } else {
            Err(Error::ForeignHandle)
        }
    }

    pub(crate) fn add_operation(&mut self, op: Operation) -> OpId {
        self.operations.push(op);
        OpId { context: self.id, index: self.operations.len() - 1 }
    }

    pub(crate) fn add_block(&mut self, block: Block) -> BlockId {
        self.blocks.push(block);
        BlockId { context: self.id, index: self.blocks.len() - 1 }
    }

    pub(crate) fn add_region(&mut self, region: Region) -> RegionId {
        self.regions.push(region);
        RegionId { context: self.id, index: self.regions.len() - 1 }
    }

    pub fn op(&self, id: OpId) -> Result<&Operation> {
        self.check(id.context)?;
        self.operations.get(id.index).ok_or(Error::ForeignHandle)
    }

    pub fn op_mut(&mut self, id: OpId) -> Result<&mut Operation> {
        self.check(id.context)?;
        self.operations.get_mut(id.index).ok_or(Error::ForeignHandle)
    }

    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.check(id.context)?;
        self.blocks.get(id.index).ok_or(Error::ForeignHandle)
    }

    pub fn region(&self, id: RegionId) -> Result<&Region> {
        self.check(id.context)?;
        self.regions.get(id.index).ok_or(Error::ForeignHandle)
    }

    /// Blocks directly nested in `op`, in region order
    pub fn blocks_of(&self, op: OpId) -> Result<Vec<BlockId>> {
        let mut blocks = Vec::new();
        for region in &self.op(op)?.regions {
            blocks.extend(self.region(*region)?.blocks.iter().copied());
        }
        Ok(blocks)
    }

    /// `root` and every operation nested under it, in pre-order
    pub fn walk(&self, root: OpId) -> Result<Vec<OpId>> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            let mut children = Vec::new();
            for block in self.blocks_of(id)? {
                children.extend(self.block(block)?.operations.iter().copied());
            }
            stack.extend(children.into_iter().rev());
        }
        Ok(order)
    }

    /// Every location slot of every op below `root`, block arguments included
    pub(crate) fn locations_mut(&mut self, root: OpId) -> Result<Vec<&mut Location>> {
        let ops = self.walk(root)?;
        let mut block_indices = HashSet::new();
        for op in &ops {
            block_indices.extend(self.blocks_of(*op)?.into_iter().map(|b| b.index));
        }
        let op_indices: HashSet<usize> = ops.iter().map(|op| op.index).collect();

        let mut slots = Vec::new();
        for (index, op) in self.operations.iter_mut().enumerate() {
            if op_indices.contains(&index) {
                slots.push(&mut op.location);
                slots.extend(op.inner_locations.iter_mut());
            }
        }
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if block_indices.contains(&index) {
                slots.extend(block.arguments.iter_mut().map(|arg| &mut arg.location));
            }
        }
        Ok(slots)
    }

    /// All location slots in the context
    pub(crate) fn all_locations_mut(&mut self) -> impl Iterator<Item = &mut Location> {
        let ops = self
            .operations
            .iter_mut()
            .flat_map(|op| std::iter::once(&mut op.location).chain(op.inner_locations.iter_mut()));
        let args = self
            .blocks
            .iter_mut()
            .flat_map(|b| b.arguments.iter_mut().map(|arg| &mut arg.location));
        ops.chain(args)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
