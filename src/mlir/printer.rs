//! IR Printer - render a parsed operation back to MLIR text
//!
//! Output is deterministic for a given tree: custom bodies are reproduced
//! from their pieces, generic operations are rebuilt from their parts, and
//! nested regions are re-indented two spaces per level.

use crate::mlir::ir::*;
use crate::utils::Result;

/// Pretty printer over one [`Context`]
pub struct IRPrinter<'c> {
    context: &'c Context,
    output: String,
    indent: usize,
}

impl<'c> IRPrinter<'c> {
    pub fn new(context: &'c Context) -> Self {
        Self { context, output: String::new(), indent: 0 }
    }

    /// Print an operation and everything nested in it
    pub fn print_operation(&mut self, id: OpId) -> Result<String> {
        self.output.clear();
        self.indent = 0;
        self.print_op(id)?;
        Ok(std::mem::take(&mut self.output))
    }

    fn print_op(&mut self, id: OpId) -> Result<()> {
        let op = self.context.op(id)?;
        if !op.results.is_empty() {
            self.output.push_str(&op.results.join(", "));
            self.output.push_str(" = ");
        }
        match &op.syntax {
            Syntax::Generic { successors, properties, dictionary, signature } => {
                self.output.push('"');
                self.output.push_str(&op.name);
                self.output.push_str("\"(");
                self.output.push_str(&op.operands.join(", "));
                self.output.push(')');
                if !successors.is_empty() {
                    self.output.push_str(" [");
                    self.output.push_str(&successors.join(", "));
                    self.output.push(']');
                }
                if let Some(entries) = properties {
                    self.output.push_str(" <");
                    self.print_dictionary(op, entries);
                    self.output.push('>');
                }
                if !op.regions.is_empty() {
                    self.output.push_str(" (");
                    for (i, region) in op.regions.iter().enumerate() {
                        if i > 0 {
                            self.output.push_str(", ");
                        }
                        self.print_region(*region)?;
                    }
                    self.output.push(')');
                }
                if let Some(entries) = dictionary {
                    self.output.push(' ');
                    self.print_dictionary(op, entries);
                }
                if let Some(signature) = signature {
                    self.output.push_str(" : ");
                    self.output.push_str(signature);
                }
            }
            Syntax::Custom { body } => {
                self.output.push_str(&op.name);
                for piece in body {
                    match piece {
                        Piece::Text(text) => self.output.push_str(text),
                        Piece::Attribute(i) => {
                            if let Some(attr) = op.attributes.get(*i) {
                                self.output.push_str(attr.printed());
                            }
                        }
                        Piece::AttrDict(entries) => self.print_dictionary(op, entries),
                        Piece::Region(i) => {
                            if let Some(region) = op.regions.get(*i) {
                                self.print_region(*region)?;
                            }
                        }
                        Piece::Location(i) => {
                            if let Some(location) = op.inner_locations.get(*i) {
                                self.print_location(location);
                            }
                        }
                        Piece::Continuation => {
                            self.output.push('\n');
                            self.pad(self.indent + 2);
                        }
                    }
                }
            }
        }
        self.print_location(&op.location);
        Ok(())
    }

    fn print_dictionary(&mut self, op: &Operation, entries: &[usize]) {
        self.output.push('{');
        for (n, index) in entries.iter().enumerate() {
            let Some(attr) = op.attributes.get(*index) else { continue };
            if n > 0 {
                self.output.push_str(", ");
            }
            self.output.push_str(&attr.name);
            if let Some(value) = &attr.value {
                self.output.push_str(" = ");
                self.output.push_str(value);
            }
        }
        self.output.push('}');
    }

    fn print_location(&mut self, location: &Location) {
        if !location.is_unknown() {
            self.output.push(' ');
            self.output.push_str(location.printed());
        }
    }

    fn print_region(&mut self, id: RegionId) -> Result<()> {
        self.output.push_str("{\n");
        self.indent += 1;
        let blocks = self.context.region(id)?.blocks.clone();
        for block_id in blocks {
            let block = self.context.block(block_id)?;
            if let Some(label) = &block.label {
                self.pad(self.indent - 1);
                self.output.push_str(label);
                if !block.arguments.is_empty() {
                    self.output.push('(');
                    for (i, arg) in block.arguments.iter().enumerate() {
                        if i > 0 {
                            self.output.push_str(", ");
                        }
                        self.output.push_str(&arg.name);
                        self.output.push_str(": ");
                        self.output.push_str(&arg.ty);
                        self.print_location(&arg.location);
                    }
                    self.output.push(')');
                }
                self.output.push_str(":\n");
            }
            for op in &block.operations {
                self.pad(self.indent);
                self.print_op(*op)?;
                self.output.push('\n');
            }
        }
        self.indent -= 1;
        self.pad(self.indent);
        self.output.push('}');
        Ok(())
    }

    fn pad(&mut self, level: usize) {
        for _ in 0..level {
            self.output.push_str("  ");
        }
    }
}

/// Print `id` with a fresh printer
pub fn print_operation(context: &Context, id: OpId) -> Result<String> {
    IRPrinter::new(context).print_operation(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlir::parser::Module;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Module {
        let mut context = Context::new();
        context.allow_unregistered_dialects = true;
        Module::parse(source, context).unwrap()
    }

    #[test]
    fn test_custom_form_is_stable() {
        let source = indoc! {r#"
            module {
              func.func @add(%arg0: i32, %arg1: i32) -> i32 {
                %0 = arith.addi %arg0, %arg1 : i32
                return %0 : i32
              }
            }"#};
        let module = parse(source);
        let printed = print_operation(module.context(), module.operation()).unwrap();
        assert_eq!(printed, source);
    }

    #[test]
    fn test_continued_op_keeps_its_layout() {
        let source = indoc! {r#"
            module {
              func.func @main(%arg0: tensor<4xf32>) -> tensor<4xf32> {
                %0 = flow.dispatch.workgroups(%arg0) : (tensor<4xf32>) -> tensor<4xf32> =
                    (%arg1: !flow.dispatch.tensor<readonly:tensor<4xf32>>) {
                  flow.return
                }
                return %0 : tensor<4xf32>
              }
            }"#};
        let module = parse(source);
        let printed = print_operation(module.context(), module.operation()).unwrap();
        assert_eq!(printed, source);
    }

    #[test]
    fn test_locations_are_printed_when_known() {
        let module = parse(indoc! {r#"
            module {
              %0 = arith.constant 1 : i32 loc("a.mlir":3:4)
            } loc(unknown)
        "#});
        let printed = print_operation(module.context(), module.operation()).unwrap();
        assert_eq!(printed, "module {\n  %0 = arith.constant 1 : i32 loc(\"a.mlir\":3:4)\n}");
    }

    #[test]
    fn test_generic_form() {
        let module = parse(indoc! {r#"
            "builtin.module"() ({
              %0 = "arith.constant"() <{value = 42 : i32}> : () -> i32
              "test.op"(%0) {flag, note = "a, b"} : (i32) -> ()
            }) : () -> ()
        "#});
        let printed = print_operation(module.context(), module.operation()).unwrap();
        assert_eq!(
            printed,
            indoc! {r#"
                "builtin.module"() ({
                  %0 = "arith.constant"() <{value = 42 : i32}> : () -> i32
                  "test.op"(%0) {flag, note = "a, b"} : (i32) -> ()
                }) : () -> ()"#}
        );
    }

    #[test]
    fn test_block_labels_are_outdented() {
        let module = parse(indoc! {r#"
            func.func @f(%arg0: i1) {
              cf.cond_br %arg0, ^bb1, ^bb2
            ^bb1:
              return
            ^bb2(%x: i32):
              return
            }
        "#});
        let printed = print_operation(module.context(), module.operation()).unwrap();
        assert_eq!(
            printed,
            indoc! {r#"
                builtin.module {
                  func.func @f(%arg0: i1) {
                    cf.cond_br %arg0, ^bb1, ^bb2
                  ^bb1:
                    return
                  ^bb2(%x: i32):
                    return
                  }
                }"#}
        );
    }
}
