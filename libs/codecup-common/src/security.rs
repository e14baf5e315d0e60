/// Security Analyzer - static gate in front of every execution
///
/// **Core Responsibility:**
/// Parse submitted Python source and reject it when it is syntactically
/// invalid, imports a forbidden module, or calls a forbidden callable.
///
/// **Walk Rules:**
/// - Depth-first, left-to-right; the first violation ends the walk
/// - `import a.b` / `from a.b import c` is checked against the module set,
///   including dotted submodules of a forbidden module
/// - Calls are checked on the bare callee name or on the attribute name
/// - Attribute access on an alias bound by a forbidden import is a call violation
/// - Dunder attributes (bar `__init__`, `__name__`, `__doc__`), frame and
///   generator internals, and module handles like `_os` are call violations
///
/// **Limits:**
/// This is a blacklist. Aliasing through containers or encoded strings is
/// not caught; the isolated process is the real backstop.

use crate::types::{SecurityVerdict, SourceStats, ViolationCategory};
use rustpython_parser::{ast, Parse};
use std::collections::{BTreeSet, HashSet};

/// Modules reaching the OS, processes, network, filesystem or interpreter internals
pub const FORBIDDEN_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "requests",
    "pathlib",
    "importlib",
    "ctypes",
    "multiprocessing",
    "threading",
    "builtins",
    "inspect",
    "gc",
    "signal",
    "pty",
    "io",
    "tempfile",
    "glob",
    "urllib",
    "http",
    "ftplib",
    "smtplib",
    "pickle",
    "marshal",
    "code",
    "codeop",
];

/// Dynamic evaluation, raw file access and namespace introspection
pub const FORBIDDEN_CALLS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "breakpoint",
    "input",
    "__subclasses__",
];

/// Dunder attributes ordinary solutions need
pub const ALLOWED_DUNDER_ATTRIBUTES: &[&str] = &["__init__", "__name__", "__doc__"];

/// Non-dunder attributes leading to frames, globals or host modules
pub const FORBIDDEN_ATTRIBUTES: &[&str] = &[
    "f_globals",
    "f_locals",
    "f_builtins",
    "f_back",
    "f_code",
    "gi_frame",
    "gi_code",
    "cr_frame",
    "cr_code",
    "ag_frame",
    "ag_code",
    "tb_frame",
    "tb_next",
    "os",
    "_os",
    "sys",
    "_sys",
    "builtins",
    "_builtins",
    "posix",
];

fn is_forbidden_attribute(attr: &str) -> bool {
    let dunder = attr.len() > 4 && attr.starts_with("__") && attr.ends_with("__");
    (dunder && !ALLOWED_DUNDER_ATTRIBUTES.contains(&attr)) || FORBIDDEN_ATTRIBUTES.contains(&attr)
}

#[derive(Debug, Clone)]
pub struct SecurityAnalyzer {
    forbidden_modules: BTreeSet<String>,
    forbidden_calls: BTreeSet<String>,
}

impl Default for SecurityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityAnalyzer {
    pub fn new() -> Self {
        Self {
            forbidden_modules: FORBIDDEN_MODULES.iter().map(|m| m.to_string()).collect(),
            forbidden_calls: FORBIDDEN_CALLS.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Analyzer for one task: the fixed module set plus the task's own exclusions
    pub fn with_excluded_modules<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut analyzer = self.clone();
        for module in extra {
            let module = module.as_ref().trim();
            if !module.is_empty() {
                analyzer.forbidden_modules.insert(module.to_string());
            }
        }
        analyzer
    }

    pub fn is_forbidden_module(&self, module: &str) -> bool {
        self.forbidden_modules.iter().any(|forbidden| {
            module == forbidden
                || (module.starts_with(forbidden.as_str())
                    && module[forbidden.len()..].starts_with('.'))
        })
    }

    pub fn is_forbidden_call(&self, name: &str) -> bool {
        self.forbidden_calls.contains(name)
    }

    /// Decide whether `source` may run at all
    pub fn check(&self, source: &str) -> SecurityVerdict {
        let suite = match ast::Suite::parse(source, "<submission>") {
            Ok(suite) => suite,
            Err(e) => {
                let offset = usize::from(e.offset);
                let (line, column) = line_and_column(source, offset);
                return SecurityVerdict::reject(
                    ViolationCategory::SyntaxError,
                    None,
                    format!("syntax error: {} (line {}, column {})", e.error, line, column),
                );
            }
        };

        let mut walker = Walker {
            analyzer: self,
            aliases: collect_forbidden_aliases(self, &suite),
            stats: SourceStats {
                lines: source.lines().count() as u32,
                ..SourceStats::default()
            },
        };

        match walker.visit_body(&suite) {
            Ok(()) => SecurityVerdict::accept(walker.stats),
            Err(violation) => violation.into_verdict(),
        }
    }
}

fn line_and_column(source: &str, offset: usize) -> (usize, usize) {
    let mut end = offset.min(source.len());
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    let before = &source[..end];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|tail| tail.chars().count())
        .unwrap_or(0)
        + 1;
    (line, column)
}

enum Violation {
    Import(String),
    Call(String),
    AliasAccess(String),
    Attribute(String),
}

impl Violation {
    fn into_verdict(self) -> SecurityVerdict {
        match self {
            Violation::Import(module) => SecurityVerdict::reject(
                ViolationCategory::ForbiddenImport,
                Some(module.clone()),
                format!("access to module '{}' is forbidden", module),
            ),
            Violation::Call(name) => SecurityVerdict::reject(
                ViolationCategory::ForbiddenCall,
                Some(name.clone()),
                format!("use of function or method '{}' is forbidden", name),
            ),
            Violation::AliasAccess(path) => SecurityVerdict::reject(
                ViolationCategory::ForbiddenCall,
                Some(path.clone()),
                format!("access to '{}' is forbidden", path),
            ),
            Violation::Attribute(attr) => SecurityVerdict::reject(
                ViolationCategory::ForbiddenCall,
                Some(attr.clone()),
                format!("access to attribute '{}' is forbidden", attr),
            ),
        }
    }
}

/// Names bound anywhere in the module by importing a forbidden module.
/// Collected up front so a use inside an earlier function body is still seen.
fn collect_forbidden_aliases(analyzer: &SecurityAnalyzer, suite: &[ast::Stmt]) -> HashSet<String> {
    let mut aliases = HashSet::new();
    let mut pending: Vec<&ast::Stmt> = suite.iter().collect();

    while let Some(stmt) = pending.pop() {
        match stmt {
            ast::Stmt::Import(ast::StmtImport { names, .. }) => {
                for alias in names {
                    let module = alias.name.as_str();
                    if analyzer.is_forbidden_module(module) {
                        let bound = match &alias.asname {
                            Some(asname) => asname.as_str().to_string(),
                            None => module.split('.').next().unwrap_or(module).to_string(),
                        };
                        aliases.insert(bound);
                    }
                }
            }
            ast::Stmt::ImportFrom(ast::StmtImportFrom {
                module: Some(module),
                names,
                ..
            }) => {
                if analyzer.is_forbidden_module(module.as_str()) {
                    for alias in names {
                        let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                        aliases.insert(bound.as_str().to_string());
                    }
                }
            }
            ast::Stmt::FunctionDef(ast::StmtFunctionDef { body, .. })
            | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef { body, .. })
            | ast::Stmt::ClassDef(ast::StmtClassDef { body, .. }) => pending.extend(body.iter()),
            ast::Stmt::For(ast::StmtFor { body, orelse, .. })
            | ast::Stmt::AsyncFor(ast::StmtAsyncFor { body, orelse, .. })
            | ast::Stmt::While(ast::StmtWhile { body, orelse, .. })
            | ast::Stmt::If(ast::StmtIf { body, orelse, .. }) => {
                pending.extend(body.iter());
                pending.extend(orelse.iter());
            }
            ast::Stmt::With(ast::StmtWith { body, .. })
            | ast::Stmt::AsyncWith(ast::StmtAsyncWith { body, .. }) => pending.extend(body.iter()),
            ast::Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | ast::Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                pending.extend(body.iter());
                for handler in handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    pending.extend(handler.body.iter());
                }
                pending.extend(orelse.iter());
                pending.extend(finalbody.iter());
            }
            ast::Stmt::Match(ast::StmtMatch { cases, .. }) => {
                for case in cases {
                    pending.extend(case.body.iter());
                }
            }
            _ => {}
        }
    }

    aliases
}

struct Walker<'a> {
    analyzer: &'a SecurityAnalyzer,
    aliases: HashSet<String>,
    stats: SourceStats,
}

type Walk = Result<(), Violation>;

impl Walker<'_> {
    fn visit_body(&mut self, body: &[ast::Stmt]) -> Walk {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_exprs(&mut self, exprs: &[ast::Expr]) -> Walk {
        for expr in exprs {
            self.visit_expr(expr)?;
        }
        Ok(())
    }

    fn visit_opt(&mut self, expr: Option<&ast::Expr>) -> Walk {
        match expr {
            Some(expr) => self.visit_expr(expr),
            None => Ok(()),
        }
    }

    fn visit_stmt(&mut self, stmt: &ast::Stmt) -> Walk {
        match stmt {
            ast::Stmt::Import(ast::StmtImport { names, .. }) => {
                for alias in names {
                    if self.analyzer.is_forbidden_module(alias.name.as_str()) {
                        return Err(Violation::Import(alias.name.as_str().to_string()));
                    }
                }
                Ok(())
            }
            ast::Stmt::ImportFrom(ast::StmtImportFrom { module, .. }) => match module {
                Some(module) if self.analyzer.is_forbidden_module(module.as_str()) => {
                    Err(Violation::Import(module.as_str().to_string()))
                }
                _ => Ok(()),
            },
            ast::Stmt::FunctionDef(ast::StmtFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                ..
            })
            | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                ..
            }) => {
                self.stats.functions += 1;
                self.visit_exprs(decorator_list)?;
                self.visit_arguments(args)?;
                self.visit_opt(returns.as_deref())?;
                self.visit_body(body)
            }
            ast::Stmt::ClassDef(ast::StmtClassDef {
                bases,
                keywords,
                body,
                decorator_list,
                ..
            }) => {
                self.stats.classes += 1;
                self.visit_exprs(decorator_list)?;
                self.visit_exprs(bases)?;
                self.visit_keywords(keywords)?;
                self.visit_body(body)
            }
            ast::Stmt::Return(ast::StmtReturn { value, .. }) => self.visit_opt(value.as_deref()),
            ast::Stmt::Delete(ast::StmtDelete { targets, .. }) => self.visit_exprs(targets),
            ast::Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.visit_exprs(targets)?;
                self.visit_expr(value)
            }
            ast::Stmt::AugAssign(ast::StmtAugAssign { target, value, .. }) => {
                self.visit_expr(target)?;
                self.visit_expr(value)
            }
            ast::Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                ..
            }) => {
                self.visit_expr(target)?;
                self.visit_expr(annotation)?;
                self.visit_opt(value.as_deref())
            }
            ast::Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                ..
            })
            | ast::Stmt::AsyncFor(ast::StmtAsyncFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                self.visit_expr(target)?;
                self.visit_expr(iter)?;
                self.visit_body(body)?;
                self.visit_body(orelse)
            }
            ast::Stmt::While(ast::StmtWhile {
                test, body, orelse, ..
            })
            | ast::Stmt::If(ast::StmtIf {
                test, body, orelse, ..
            }) => {
                self.visit_expr(test)?;
                self.visit_body(body)?;
                self.visit_body(orelse)
            }
            ast::Stmt::With(ast::StmtWith { items, body, .. })
            | ast::Stmt::AsyncWith(ast::StmtAsyncWith { items, body, .. }) => {
                for item in items {
                    self.visit_expr(&item.context_expr)?;
                    self.visit_opt(item.optional_vars.as_deref())?;
                }
                self.visit_body(body)
            }
            ast::Stmt::Match(ast::StmtMatch { subject, cases, .. }) => {
                self.visit_expr(subject)?;
                for case in cases {
                    self.visit_opt(case.guard.as_deref())?;
                    self.visit_body(&case.body)?;
                }
                Ok(())
            }
            ast::Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                self.visit_opt(exc.as_deref())?;
                self.visit_opt(cause.as_deref())
            }
            ast::Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | ast::Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                self.visit_body(body)?;
                for handler in handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    self.visit_opt(handler.type_.as_deref())?;
                    self.visit_body(&handler.body)?;
                }
                self.visit_body(orelse)?;
                self.visit_body(finalbody)
            }
            ast::Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.visit_expr(test)?;
                self.visit_opt(msg.as_deref())
            }
            ast::Stmt::Expr(ast::StmtExpr { value, .. }) => self.visit_expr(value),
            ast::Stmt::TypeAlias(ast::StmtTypeAlias { name, value, .. }) => {
                self.visit_expr(name)?;
                self.visit_expr(value)
            }
            _ => Ok(()),
        }
    }

    fn visit_arguments(&mut self, args: &ast::Arguments) -> Walk {
        for arg in args
            .posonlyargs
            .iter()
            .chain(args.args.iter())
            .chain(args.kwonlyargs.iter())
        {
            self.visit_opt(arg.def.annotation.as_deref())?;
            self.visit_opt(arg.default.as_deref())?;
        }
        if let Some(vararg) = &args.vararg {
            self.visit_opt(vararg.annotation.as_deref())?;
        }
        if let Some(kwarg) = &args.kwarg {
            self.visit_opt(kwarg.annotation.as_deref())?;
        }
        Ok(())
    }

    fn visit_keywords(&mut self, keywords: &[ast::Keyword]) -> Walk {
        for keyword in keywords {
            self.visit_expr(&keyword.value)?;
        }
        Ok(())
    }

    fn visit_comprehensions(&mut self, generators: &[ast::Comprehension]) -> Walk {
        for generator in generators {
            self.visit_expr(&generator.target)?;
            self.visit_expr(&generator.iter)?;
            self.visit_exprs(&generator.ifs)?;
        }
        Ok(())
    }

    fn check_call(&self, func: &ast::Expr) -> Walk {
        let name = match func {
            ast::Expr::Name(ast::ExprName { id, .. }) => id.as_str(),
            ast::Expr::Attribute(ast::ExprAttribute { attr, .. }) => attr.as_str(),
            _ => return Ok(()),
        };
        if self.analyzer.is_forbidden_call(name) {
            return Err(Violation::Call(name.to_string()));
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &ast::Expr) -> Walk {
        match expr {
            ast::Expr::Call(ast::ExprCall {
                func,
                args,
                keywords,
                ..
            }) => {
                self.check_call(func)?;
                self.visit_expr(func)?;
                self.visit_exprs(args)?;
                self.visit_keywords(keywords)
            }
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                if let ast::Expr::Name(ast::ExprName { id, .. }) = value.as_ref() {
                    if self.aliases.contains(id.as_str()) {
                        return Err(Violation::AliasAccess(format!(
                            "{}.{}",
                            id.as_str(),
                            attr.as_str()
                        )));
                    }
                }
                if is_forbidden_attribute(attr.as_str()) {
                    return Err(Violation::Attribute(attr.as_str().to_string()));
                }
                self.visit_expr(value)
            }
            ast::Expr::BoolOp(ast::ExprBoolOp { values, .. }) => self.visit_exprs(values),
            ast::Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
                self.visit_expr(target)?;
                self.visit_expr(value)
            }
            ast::Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
                self.visit_expr(left)?;
                self.visit_expr(right)
            }
            ast::Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => self.visit_expr(operand),
            ast::Expr::Lambda(ast::ExprLambda { args, body, .. }) => {
                self.visit_arguments(args)?;
                self.visit_expr(body)
            }
            ast::Expr::IfExp(ast::ExprIfExp {
                test, body, orelse, ..
            }) => {
                self.visit_expr(test)?;
                self.visit_expr(body)?;
                self.visit_expr(orelse)
            }
            ast::Expr::Dict(ast::ExprDict { keys, values, .. }) => {
                for (key, value) in keys.iter().zip(values.iter()) {
                    self.visit_opt(key.as_ref())?;
                    self.visit_expr(value)?;
                }
                Ok(())
            }
            ast::Expr::Set(ast::ExprSet { elts, .. })
            | ast::Expr::List(ast::ExprList { elts, .. })
            | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => self.visit_exprs(elts),
            ast::Expr::ListComp(ast::ExprListComp {
                elt, generators, ..
            })
            | ast::Expr::SetComp(ast::ExprSetComp {
                elt, generators, ..
            })
            | ast::Expr::GeneratorExp(ast::ExprGeneratorExp {
                elt, generators, ..
            }) => {
                self.visit_expr(elt)?;
                self.visit_comprehensions(generators)
            }
            ast::Expr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                ..
            }) => {
                self.visit_expr(key)?;
                self.visit_expr(value)?;
                self.visit_comprehensions(generators)
            }
            ast::Expr::Await(ast::ExprAwait { value, .. })
            | ast::Expr::YieldFrom(ast::ExprYieldFrom { value, .. })
            | ast::Expr::Starred(ast::ExprStarred { value, .. }) => self.visit_expr(value),
            ast::Expr::Yield(ast::ExprYield { value, .. }) => self.visit_opt(value.as_deref()),
            ast::Expr::Compare(ast::ExprCompare {
                left, comparators, ..
            }) => {
                self.visit_expr(left)?;
                self.visit_exprs(comparators)
            }
            ast::Expr::FormattedValue(ast::ExprFormattedValue {
                value, format_spec, ..
            }) => {
                self.visit_expr(value)?;
                self.visit_opt(format_spec.as_deref())
            }
            ast::Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => self.visit_exprs(values),
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.visit_expr(value)?;
                self.visit_expr(slice)
            }
            ast::Expr::Slice(ast::ExprSlice {
                lower, upper, step, ..
            }) => {
                self.visit_opt(lower.as_deref())?;
                self.visit_opt(upper.as_deref())?;
                self.visit_opt(step.as_deref())
            }
            _ => Ok(()),
        }
    }
}
