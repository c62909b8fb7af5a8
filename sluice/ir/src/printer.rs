//! Implements a formatter for the in-memory representation of modules.
//! The printed output is Verilog-flavored and only meant for humans.
use crate::base::{ExprIdx, StmtIdx};
use crate::expr::Expr;
use crate::module::{EventKind, Init, Module, VarKind};
use crate::stmt::{Lvalue, Stmt, Task};
use itertools::Itertools;
use std::io;

/// Printer for the IR.
pub struct Printer;

impl Printer {
    pub fn expr_to_string(module: &Module, expr: ExprIdx) -> String {
        match &module.exprs[expr] {
            Expr::Const { value, width } => format!("{width}'d{value}"),
            Expr::Var(var) => module.vars[*var].name.clone(),
            Expr::Word { var, word } => {
                format!("{}.word[{word}]", module.vars[*var].name)
            }
            Expr::Signal { signal, block } => {
                format!("{}[{block}]", signal.name())
            }
            Expr::Unary { op, arg } => {
                format!("{}{}", op.symbol(), Self::expr_to_string(module, *arg))
            }
            Expr::Binary { op, lhs, rhs } => format!(
                "({} {} {})",
                Self::expr_to_string(module, *lhs),
                op.symbol(),
                Self::expr_to_string(module, *rhs)
            ),
            Expr::Cond { cond, then, els } => format!(
                "({} ? {} : {})",
                Self::expr_to_string(module, *cond),
                Self::expr_to_string(module, *then),
                Self::expr_to_string(module, *els)
            ),
            Expr::Slice { arg, msb, lsb } => format!(
                "{}[{msb}:{lsb}]",
                Self::expr_to_string(module, *arg)
            ),
            Expr::Feof(fd) => {
                format!("$feof({})", Self::expr_to_string(module, *fd))
            }
        }
    }

    pub fn lvalue_to_string(module: &Module, lhs: &Lvalue) -> String {
        match lhs {
            Lvalue::Var(var) => module.vars[*var].name.clone(),
            Lvalue::Word { var, word } => {
                format!("{}.word[{word}]", module.vars[*var].name)
            }
            Lvalue::TaskSlot => "__task_id".to_string(),
            Lvalue::Signal { signal, block } => {
                format!("{}[{block}]", signal.name())
            }
            Lvalue::Feof(fd) => {
                format!("__feof[{}]", Self::expr_to_string(module, *fd))
            }
        }
    }

    fn task_to_string(module: &Module, task: &Task) -> String {
        let e = |idx: ExprIdx| Self::expr_to_string(module, idx);
        match task {
            Task::Debug { action, text } => {
                format!("$__debug({action}, \"{text}\");")
            }
            Task::Finish { arg } => format!("$finish({});", e(*arg)),
            Task::Fflush { fd } => format!("$fflush({});", e(*fd)),
            Task::Fseek { fd, offset, whence } => format!(
                "$fseek({}, {}, {});",
                e(*fd),
                e(*offset),
                whence.code()
            ),
            Task::Get { fd, var, radix } => format!(
                "$__get({}, {}, {radix:?});",
                e(*fd),
                var.map(|v| module.vars[v].name.clone())
                    .unwrap_or_else(|| "_".to_string())
            ),
            Task::Put { fd, expr, radix } => {
                format!("$__put({}, {}, {radix:?});", e(*fd), e(*expr))
            }
            Task::Restart { path } => format!("$restart(\"{path}\");"),
            Task::Retarget { target } => format!("$retarget(\"{target}\");"),
            Task::Save { path } => format!("$save(\"{path}\");"),
            Task::Yield => "$yield;".to_string(),
        }
    }

    pub fn write_stmt<F: io::Write>(
        module: &Module,
        stmt: StmtIdx,
        indent: usize,
        f: &mut F,
    ) -> io::Result<()> {
        let pad = " ".repeat(indent);
        match &module.stmts[stmt] {
            Stmt::Seq(stmts) => {
                writeln!(f, "{pad}begin")?;
                for s in stmts {
                    Self::write_stmt(module, *s, indent + 2, f)?;
                }
                writeln!(f, "{pad}end")
            }
            Stmt::Assign { lhs, rhs } => writeln!(
                f,
                "{pad}{} = {};",
                Self::lvalue_to_string(module, lhs),
                Self::expr_to_string(module, *rhs)
            ),
            Stmt::Nonblocking { lhs, rhs } => writeln!(
                f,
                "{pad}{} <= {};",
                Self::lvalue_to_string(module, lhs),
                Self::expr_to_string(module, *rhs)
            ),
            Stmt::If { cond, then, els } => {
                writeln!(
                    f,
                    "{pad}if ({})",
                    Self::expr_to_string(module, *cond)
                )?;
                Self::write_stmt(module, *then, indent + 2, f)?;
                if let Some(els) = els {
                    writeln!(f, "{pad}else")?;
                    Self::write_stmt(module, *els, indent + 2, f)?;
                }
                Ok(())
            }
            Stmt::Case {
                cond,
                items,
                default,
            } => {
                writeln!(
                    f,
                    "{pad}case ({})",
                    Self::expr_to_string(module, *cond)
                )?;
                for item in items {
                    writeln!(
                        f,
                        "{pad}  {}:",
                        item.matches
                            .iter()
                            .map(|m| Self::expr_to_string(module, *m))
                            .join(", ")
                    )?;
                    Self::write_stmt(module, item.body, indent + 4, f)?;
                }
                if let Some(default) = default {
                    writeln!(f, "{pad}  default:")?;
                    Self::write_stmt(module, *default, indent + 4, f)?;
                }
                writeln!(f, "{pad}endcase")
            }
            Stmt::Task(task) => {
                writeln!(f, "{pad}{}", Self::task_to_string(module, task))
            }
        }
    }

    pub fn stmt_to_string(module: &Module, stmt: StmtIdx) -> String {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = Self::write_stmt(module, stmt, 0, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn write_module<F: io::Write>(
        module: &Module,
        f: &mut F,
    ) -> io::Result<()> {
        writeln!(f, "module {};", module.name)?;
        for (_, decl) in module.vars.iter() {
            let kind = match decl.kind {
                VarKind::Input => "input",
                VarKind::Output => "output reg",
                VarKind::Reg => "reg",
            };
            let volatile = if decl.volatile { "(*volatile*) " } else { "" };
            let msb = decl.width - 1;
            write!(f, "  {volatile}{kind}[{msb}:0] {}", decl.name)?;
            match &decl.init {
                Some(Init::Value(v)) => writeln!(f, " = {v};")?,
                Some(Init::Fopen(path)) => {
                    writeln!(f, " = $fopen(\"{path}\");")?
                }
                None => writeln!(f, ";")?,
            }
        }
        for assign in &module.assigns {
            writeln!(
                f,
                "  assign {} = {};",
                module.vars[assign.lhs].name,
                Self::expr_to_string(module, assign.rhs)
            )?;
        }
        for (_, block) in module.blocks.iter() {
            let events = block
                .events
                .iter()
                .map(|e| {
                    let name = &module.vars[e.var].name;
                    match e.kind {
                        EventKind::Posedge => format!("posedge {name}"),
                        EventKind::Negedge => format!("negedge {name}"),
                        EventKind::Edge => name.clone(),
                    }
                })
                .join(" or ");
            writeln!(f, "  always @({events})")?;
            Self::write_stmt(module, block.body, 4, f)?;
        }
        writeln!(f, "endmodule")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOp, Builder, Event, Radix};

    #[test]
    fn prints_blocks() {
        let mut m = Module::new("echo");
        let mut b = Builder::new(&mut m);
        let clk = b.input("clk", 1);
        let x = b.reg("x", 8);
        let fd = b.constant(1, 32);
        let xe = b.var(x);
        let put = b.task(Task::Put {
            fd,
            expr: xe,
            radix: Radix::Hex,
        });
        let zero = b.constant(0, 8);
        let cond = b.binary(BinOp::Ne, xe, zero);
        let branch = b.branch(cond, put, None);
        let body = b.seq(vec![branch]);
        b.always(vec![Event::posedge(clk)], body);
        let out = Printer::stmt_to_string(&m, body);
        assert_eq!(
            out,
            "begin\n  if ((x != 8'd0))\n    $__put(32'd1, x, Hex);\nend\n"
        );
        let mut buf = Vec::new();
        Printer::write_module(&m, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("always @(posedge clk)"));
        assert!(text.starts_with("module echo;\n  input[0:0] clk;"));
    }
}
