//! Interpreter Module for the view runtime
//!
//! Tree-walking evaluator over the oxc AST of generated view source. It covers
//! the JavaScript surface that embedded template code actually uses: literals,
//! member access, calls, closures, operators, declarations and control flow.
//!
//! ## Scoping
//!
//! - `var` binds in the nearest function scope (the program counts as one).
//! - `let`/`const` bind in the enclosing block; writing a `const` fails.
//! - Assigning an undeclared name creates it on the root scope.
//! - Reading an undeclared name is a `ReferenceError`, except under `typeof`.
//!
//! `__append` is an intrinsic: it cannot be shadowed and writes straight to
//! the output buffer.

use crate::builtins::{self, Invoke};
use crate::codegen::APPEND_FN;
use crate::value::{Callable, Value};
use oxc_ast::ast::*;
use oxc_span::GetSpan;
use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const MAX_CALL_DEPTH: usize = 256;
/// Statement and expression nesting across all active calls.
const MAX_NESTING: usize = 10_000;
/// Below this much remaining native stack a new segment is allocated.
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_SEGMENT: usize = 1024 * 1024;

const STACK_OVERFLOW: &str = "RangeError: Maximum call stack size exceeded";

type Eval<T> = Result<T, String>;

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPES
// ═══════════════════════════════════════════════════════════════════════════════

type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

struct Scope {
    bindings: HashMap<String, Binding>,
    parent: Option<ScopeRef>,
    function_scope: bool,
}

impl Scope {
    fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: None,
            function_scope: true,
        }))
    }

    fn child(parent: &ScopeRef, function_scope: bool) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: Some(Rc::clone(parent)),
            function_scope,
        }))
    }

    /// Fresh frame holding the current values, so closures made in one loop
    /// iteration keep that iteration's bindings.
    fn copy_of(scope: &ScopeRef) -> ScopeRef {
        let frame = scope.borrow();
        Rc::new(RefCell::new(Scope {
            bindings: frame.bindings.clone(),
            parent: frame.parent.clone(),
            function_scope: frame.function_scope,
        }))
    }
}

fn declare(scope: &ScopeRef, name: &str, value: Value, mutable: bool) {
    scope
        .borrow_mut()
        .bindings
        .insert(name.to_string(), Binding { value, mutable });
}

fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
    let mut current = Some(Rc::clone(scope));
    while let Some(frame) = current {
        let frame = frame.borrow();
        if let Some(binding) = frame.bindings.get(name) {
            return Some(binding.value.clone());
        }
        current = frame.parent.clone();
    }
    None
}

fn is_declared_here(scope: &ScopeRef, name: &str) -> bool {
    scope.borrow().bindings.contains_key(name)
}

fn var_scope(scope: &ScopeRef) -> ScopeRef {
    let mut current = Rc::clone(scope);
    loop {
        let parent = {
            let frame = current.borrow();
            if frame.function_scope {
                None
            } else {
                frame.parent.clone()
            }
        };
        match parent {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLOSURES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
enum FunctionNode<'a> {
    Arrow(&'a ArrowFunctionExpression<'a>),
    Function(&'a Function<'a>),
}

struct Closure<'a> {
    node: FunctionNode<'a>,
    scope: ScopeRef,
}

enum Completion {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Assignable location resolved once, so compound assignment evaluates the
/// object and key a single time.
enum Reference {
    Binding(String),
    Property(Value, String),
}

pub struct Interpreter<'a> {
    source: &'a str,
    root: ScopeRef,
    closures: Vec<Closure<'a>>,
    output: String,
    depth: usize,
    nesting: usize,
}

impl<'a> Interpreter<'a> {
    /// Bindings are installed in order; a later entry replaces an earlier one.
    pub fn new(source: &'a str, bindings: impl IntoIterator<Item = (String, Value)>) -> Self {
        let root = Scope::root();
        for (name, value) in bindings {
            declare(&root, &name, value, true);
        }
        Self {
            source,
            root,
            closures: Vec::new(),
            output: String::new(),
            depth: 0,
            nesting: 0,
        }
    }

    /// Execute a program and return everything it appended.
    pub fn run(mut self, program: &'a Program<'a>) -> Result<String, String> {
        let scope = Scope::child(&self.root, true);
        // A top-level `return` ends the render early.
        self.exec_statements(&program.body, &scope)?;
        Ok(self.output)
    }

    fn snippet(&self, node: &impl GetSpan) -> String {
        let span = node.span();
        let text = self
            .source
            .get(span.start as usize..span.end as usize)
            .unwrap_or("<unknown>");
        let first_line = text.lines().next().unwrap_or(text);
        first_line.trim().to_string()
    }

    fn unsupported(&self, node: &impl GetSpan) -> String {
        format!("SyntaxError: unsupported syntax `{}`", self.snippet(node))
    }

    fn assign(&self, scope: &ScopeRef, name: &str, value: Value) -> Eval<()> {
        let mut current = Some(Rc::clone(scope));
        while let Some(frame) = current {
            let mut frame = frame.borrow_mut();
            if let Some(binding) = frame.bindings.get_mut(name) {
                if !binding.mutable {
                    return Err(format!(
                        "TypeError: Assignment to constant variable '{}'",
                        name
                    ));
                }
                binding.value = value;
                return Ok(());
            }
            current = frame.parent.clone();
        }
        declare(&self.root, name, value, true);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn exec_statements(&mut self, stmts: &'a [Statement<'a>], scope: &ScopeRef) -> Eval<Completion> {
        for stmt in stmts {
            if let Statement::FunctionDeclaration(func) = stmt {
                if let Some(id) = &func.id {
                    let value = self.make_closure(FunctionNode::Function(func), scope);
                    declare(scope, id.name.as_str(), value, true);
                }
            }
        }

        for stmt in stmts {
            match self.exec_statement(stmt, scope)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    /// Run `step` one nesting level deeper, growing the native stack on demand.
    fn nested<T>(&mut self, step: impl FnOnce(&mut Self) -> Eval<T>) -> Eval<T> {
        if self.nesting >= MAX_NESTING {
            return Err(STACK_OVERFLOW.to_string());
        }
        self.nesting += 1;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || step(&mut *self));
        self.nesting -= 1;
        result
    }

    fn exec_statement(&mut self, stmt: &'a Statement<'a>, scope: &ScopeRef) -> Eval<Completion> {
        self.nested(|this| this.exec_statement_inner(stmt, scope))
    }

    fn exec_statement_inner(
        &mut self,
        stmt: &'a Statement<'a>,
        scope: &ScopeRef,
    ) -> Eval<Completion> {
        match stmt {
            Statement::ExpressionStatement(s) => {
                self.eval(&s.expression, scope)?;
            }
            Statement::VariableDeclaration(decl) => self.declare_variables(decl, scope)?,
            Statement::FunctionDeclaration(_) | Statement::EmptyStatement(_) => {}
            Statement::BlockStatement(block) => {
                let inner = Scope::child(scope, false);
                return self.exec_statements(&block.body, &inner);
            }
            Statement::IfStatement(s) => {
                if self.eval(&s.test, scope)?.truthy() {
                    return self.exec_statement(&s.consequent, scope);
                }
                if let Some(alternate) = &s.alternate {
                    return self.exec_statement(alternate, scope);
                }
            }
            Statement::ForStatement(s) => return self.exec_for(s, scope),
            Statement::ForOfStatement(s) => {
                let iterable = self.eval(&s.right, scope)?;
                let items = self.iterate(&iterable)?;
                return self.exec_for_each(&s.left, items, &s.body, scope);
            }
            Statement::ForInStatement(s) => {
                let object = self.eval(&s.right, scope)?;
                let keys = builtins::entries_of(&object)
                    .into_iter()
                    .map(|(key, _)| Value::String(key))
                    .collect();
                return self.exec_for_each(&s.left, keys, &s.body, scope);
            }
            Statement::WhileStatement(s) => {
                while self.eval(&s.test, scope)?.truthy() {
                    match self.exec_statement(&s.body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
            }
            Statement::DoWhileStatement(s) => loop {
                match self.exec_statement(&s.body, scope)? {
                    Completion::Break => break,
                    Completion::Return(value) => return Ok(Completion::Return(value)),
                    Completion::Normal | Completion::Continue => {}
                }
                if !self.eval(&s.test, scope)?.truthy() {
                    break;
                }
            },
            Statement::SwitchStatement(s) => return self.exec_switch(s, scope),
            Statement::BreakStatement(s) => {
                if s.label.is_some() {
                    return Err(self.unsupported(stmt));
                }
                return Ok(Completion::Break);
            }
            Statement::ContinueStatement(s) => {
                if s.label.is_some() {
                    return Err(self.unsupported(stmt));
                }
                return Ok(Completion::Continue);
            }
            Statement::ReturnStatement(s) => {
                let value = match &s.argument {
                    Some(argument) => self.eval(argument, scope)?,
                    None => Value::Undefined,
                };
                return Ok(Completion::Return(value));
            }
            Statement::ThrowStatement(s) => {
                let thrown = self.eval(&s.argument, scope)?;
                let message = match &thrown {
                    Value::Object(map) => map
                        .borrow()
                        .get("message")
                        .map(|m| m.to_js_string())
                        .unwrap_or_else(|| thrown.to_js_string()),
                    other => other.to_js_string(),
                };
                return Err(format!("Uncaught {}", message));
            }
            _ => return Err(self.unsupported(stmt)),
        }
        Ok(Completion::Normal)
    }

    fn exec_for(&mut self, s: &'a ForStatement<'a>, scope: &ScopeRef) -> Eval<Completion> {
        let mut loop_scope = Scope::child(scope, false);
        let per_iteration = matches!(
            &s.init,
            Some(ForStatementInit::VariableDeclaration(decl))
                if !matches!(decl.kind, VariableDeclarationKind::Var)
        );
        match &s.init {
            Some(ForStatementInit::VariableDeclaration(decl)) => {
                self.declare_variables(decl, &loop_scope)?
            }
            Some(init) => {
                if let Some(expr) = init.as_expression() {
                    self.eval(expr, &loop_scope)?;
                }
            }
            None => {}
        }

        loop {
            if let Some(test) = &s.test {
                if !self.eval(test, &loop_scope)?.truthy() {
                    break;
                }
            }
            match self.exec_statement(&s.body, &loop_scope)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            if per_iteration {
                loop_scope = Scope::copy_of(&loop_scope);
            }
            if let Some(update) = &s.update {
                self.eval(update, &loop_scope)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for_each(
        &mut self,
        left: &'a ForStatementLeft<'a>,
        items: Vec<Value>,
        body: &'a Statement<'a>,
        scope: &ScopeRef,
    ) -> Eval<Completion> {
        for item in items {
            let iteration = Scope::child(scope, false);
            match left {
                ForStatementLeft::VariableDeclaration(decl) => {
                    let (target, mutable) = self.declaration_target(decl, &iteration)?;
                    for declarator in &decl.declarations {
                        self.bind_pattern(&declarator.id, item.clone(), &target, mutable)?;
                    }
                }
                ForStatementLeft::AssignmentTargetIdentifier(id) => {
                    self.assign(scope, id.name.as_str(), item)?
                }
                _ => return Err(self.unsupported(body)),
            }
            match self.exec_statement(body, &iteration)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_switch(&mut self, s: &'a SwitchStatement<'a>, scope: &ScopeRef) -> Eval<Completion> {
        let discriminant = self.eval(&s.discriminant, scope)?;
        let inner = Scope::child(scope, false);

        let mut start = None;
        for (index, case) in s.cases.iter().enumerate() {
            if let Some(test) = &case.test {
                if self.eval(test, &inner)?.strict_equals(&discriminant) {
                    start = Some(index);
                    break;
                }
            }
        }
        let start = start.or_else(|| s.cases.iter().position(|case| case.test.is_none()));

        if let Some(start) = start {
            for case in s.cases.iter().skip(start) {
                match self.exec_statements(&case.consequent, &inner)? {
                    Completion::Normal => {}
                    Completion::Break => break,
                    other => return Ok(other),
                }
            }
        }
        Ok(Completion::Normal)
    }

    fn declaration_target(
        &self,
        decl: &'a VariableDeclaration<'a>,
        scope: &ScopeRef,
    ) -> Eval<(ScopeRef, bool)> {
        match decl.kind {
            VariableDeclarationKind::Var => Ok((var_scope(scope), true)),
            VariableDeclarationKind::Let => Ok((Rc::clone(scope), true)),
            VariableDeclarationKind::Const => Ok((Rc::clone(scope), false)),
            _ => Err(self.unsupported(decl)),
        }
    }

    fn declare_variables(&mut self, decl: &'a VariableDeclaration<'a>, scope: &ScopeRef) -> Eval<()> {
        let (target, mutable) = self.declaration_target(decl, scope)?;
        let is_var = matches!(decl.kind, VariableDeclarationKind::Var);

        for declarator in &decl.declarations {
            match &declarator.init {
                Some(init) => {
                    let value = self.eval(init, scope)?;
                    self.bind_pattern(&declarator.id, value, &target, mutable)?;
                }
                None => {
                    // `var x;` keeps an existing value.
                    if let BindingPattern::BindingIdentifier(id) = &declarator.id {
                        if is_var && is_declared_here(&target, id.name.as_str()) {
                            continue;
                        }
                    }
                    self.bind_pattern(&declarator.id, Value::Undefined, &target, mutable)?;
                }
            }
        }
        Ok(())
    }

    fn bind_pattern(
        &mut self,
        pattern: &'a BindingPattern<'a>,
        value: Value,
        scope: &ScopeRef,
        mutable: bool,
    ) -> Eval<()> {
        match pattern {
            BindingPattern::BindingIdentifier(id) => {
                declare(scope, id.name.as_str(), value, mutable);
            }
            BindingPattern::ObjectPattern(obj) => {
                let mut used = Vec::new();
                for prop in &obj.properties {
                    let key = self.property_key(&prop.key, scope)?;
                    let field = builtins::get_property(&value, &key)?;
                    used.push(key);
                    self.bind_pattern(&prop.value, field, scope, mutable)?;
                }
                if let Some(rest) = &obj.rest {
                    let remaining = builtins::entries_of(&value)
                        .into_iter()
                        .filter(|(key, _)| !used.contains(key))
                        .collect();
                    self.bind_pattern(&rest.argument, Value::object(remaining), scope, mutable)?;
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                let items = self.iterate(&value)?;
                for (index, element) in arr.elements.iter().enumerate() {
                    if let Some(element) = element {
                        let item = items.get(index).cloned().unwrap_or_default();
                        self.bind_pattern(element, item, scope, mutable)?;
                    }
                }
                if let Some(rest) = &arr.rest {
                    let tail = items.iter().skip(arr.elements.len()).cloned().collect();
                    self.bind_pattern(&rest.argument, Value::array(tail), scope, mutable)?;
                }
            }
            BindingPattern::AssignmentPattern(assign) => {
                let value = match value {
                    Value::Undefined => self.eval(&assign.right, scope)?,
                    other => other,
                };
                self.bind_pattern(&assign.left, value, scope, mutable)?;
            }
        }
        Ok(())
    }

    /// Values produced by iterating arrays (by snapshot) and strings.
    fn iterate(&self, value: &Value) -> Eval<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
            other => Err(format!("TypeError: {} is not iterable", other.to_js_string())),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn eval(&mut self, expr: &'a Expression<'a>, scope: &ScopeRef) -> Eval<Value> {
        self.nested(|this| this.eval_inner(expr, scope))
    }

    fn eval_inner(&mut self, expr: &'a Expression<'a>, scope: &ScopeRef) -> Eval<Value> {
        match expr {
            Expression::BooleanLiteral(lit) => Ok(Value::Bool(lit.value)),
            Expression::NullLiteral(_) => Ok(Value::Null),
            Expression::NumericLiteral(lit) => Ok(Value::Number(lit.value)),
            Expression::StringLiteral(lit) => Ok(Value::String(lit.value.to_string())),
            Expression::TemplateLiteral(tpl) => self.eval_template(tpl, scope),
            Expression::Identifier(id) => {
                let name = id.name.as_str();
                lookup(scope, name).ok_or_else(|| format!("ReferenceError: {} is not defined", name))
            }
            Expression::ParenthesizedExpression(paren) => self.eval(&paren.expression, scope),
            Expression::ArrayExpression(arr) => self.eval_array(arr, scope),
            Expression::ObjectExpression(obj) => self.eval_object(obj, scope),
            Expression::StaticMemberExpression(member) => {
                Ok(self.eval_static_member(member, scope)?.unwrap_or_default())
            }
            Expression::ComputedMemberExpression(member) => {
                Ok(self.eval_computed_member(member, scope)?.unwrap_or_default())
            }
            Expression::CallExpression(call) => Ok(self.eval_call(call, scope)?.unwrap_or_default()),
            Expression::ChainExpression(chain) => {
                let value = match &chain.expression {
                    ChainElement::CallExpression(call) => self.eval_call(call, scope)?,
                    ChainElement::StaticMemberExpression(member) => {
                        self.eval_static_member(member, scope)?
                    }
                    ChainElement::ComputedMemberExpression(member) => {
                        self.eval_computed_member(member, scope)?
                    }
                    _ => return Err(self.unsupported(expr)),
                };
                Ok(value.unwrap_or_default())
            }
            Expression::ArrowFunctionExpression(func) => {
                Ok(self.make_closure(FunctionNode::Arrow(func), scope))
            }
            Expression::FunctionExpression(func) => {
                Ok(self.make_closure(FunctionNode::Function(func), scope))
            }
            Expression::UnaryExpression(unary) => self.eval_unary(unary, scope),
            Expression::BinaryExpression(binary) => {
                let left = self.eval(&binary.left, scope)?;
                let right = self.eval(&binary.right, scope)?;
                binary_op(binary.operator, left, right)
            }
            Expression::LogicalExpression(logical) => {
                let left = self.eval(&logical.left, scope)?;
                let short_circuit = match logical.operator {
                    LogicalOperator::Or => left.truthy(),
                    LogicalOperator::And => !left.truthy(),
                    LogicalOperator::Coalesce => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(&logical.right, scope)
                }
            }
            Expression::ConditionalExpression(cond) => {
                if self.eval(&cond.test, scope)?.truthy() {
                    self.eval(&cond.consequent, scope)
                } else {
                    self.eval(&cond.alternate, scope)
                }
            }
            Expression::AssignmentExpression(assign) => self.eval_assignment(assign, scope),
            Expression::UpdateExpression(update) => {
                let reference = self.resolve_simple_target(&update.argument, scope)?;
                let old = self.read_reference(&reference, scope)?.to_number();
                let new = match update.operator {
                    UpdateOperator::Increment => old + 1.0,
                    UpdateOperator::Decrement => old - 1.0,
                };
                self.write_reference(reference, Value::Number(new), scope)?;
                Ok(Value::Number(if update.prefix { new } else { old }))
            }
            Expression::SequenceExpression(seq) => {
                let mut last = Value::Undefined;
                for item in &seq.expressions {
                    last = self.eval(item, scope)?;
                }
                Ok(last)
            }
            _ => Err(self.unsupported(expr)),
        }
    }

    fn eval_template(&mut self, tpl: &'a TemplateLiteral<'a>, scope: &ScopeRef) -> Eval<Value> {
        let mut out = String::new();
        for (index, quasi) in tpl.quasis.iter().enumerate() {
            match &quasi.value.cooked {
                Some(cooked) => out.push_str(cooked.as_str()),
                None => out.push_str(quasi.value.raw.as_str()),
            }
            if let Some(expr) = tpl.expressions.get(index) {
                out.push_str(&self.eval(expr, scope)?.to_js_string());
            }
        }
        Ok(Value::String(out))
    }

    fn eval_array(&mut self, arr: &'a ArrayExpression<'a>, scope: &ScopeRef) -> Eval<Value> {
        let mut items = Vec::with_capacity(arr.elements.len());
        for element in &arr.elements {
            match element {
                ArrayExpressionElement::SpreadElement(spread) => {
                    let value = self.eval(&spread.argument, scope)?;
                    items.extend(self.iterate(&value)?);
                }
                ArrayExpressionElement::Elision(_) => items.push(Value::Undefined),
                other => match other.as_expression() {
                    Some(expr) => items.push(self.eval(expr, scope)?),
                    None => return Err(self.unsupported(arr)),
                },
            }
        }
        Ok(Value::array(items))
    }

    fn eval_object(&mut self, obj: &'a ObjectExpression<'a>, scope: &ScopeRef) -> Eval<Value> {
        let mut map = indexmap::IndexMap::new();
        for prop in &obj.properties {
            match prop {
                ObjectPropertyKind::ObjectProperty(p) => {
                    if !matches!(p.kind, PropertyKind::Init) {
                        return Err(self.unsupported(&**p));
                    }
                    let key = self.property_key(&p.key, scope)?;
                    let value = self.eval(&p.value, scope)?;
                    map.insert(key, value);
                }
                ObjectPropertyKind::SpreadProperty(spread) => {
                    let value = self.eval(&spread.argument, scope)?;
                    map.extend(builtins::entries_of(&value));
                }
            }
        }
        Ok(Value::object(map))
    }

    fn property_key(&mut self, key: &'a PropertyKey<'a>, scope: &ScopeRef) -> Eval<String> {
        match key {
            PropertyKey::StaticIdentifier(id) => Ok(id.name.to_string()),
            other => match other.as_expression() {
                Some(expr) => Ok(self.eval(expr, scope)?.to_property_key()),
                None => Err(format!("SyntaxError: unsupported property key `{}`", self.snippet(other))),
            },
        }
    }

    /// Evaluate one link of a member/call chain; `None` when an optional link
    /// short-circuits the rest of the chain.
    fn eval_link(&mut self, expr: &'a Expression<'a>, scope: &ScopeRef) -> Eval<Option<Value>> {
        match expr {
            Expression::StaticMemberExpression(member) => self.eval_static_member(member, scope),
            Expression::ComputedMemberExpression(member) => {
                self.eval_computed_member(member, scope)
            }
            Expression::CallExpression(call) => self.eval_call(call, scope),
            _ => self.eval(expr, scope).map(Some),
        }
    }

    fn eval_static_member(
        &mut self,
        member: &'a StaticMemberExpression<'a>,
        scope: &ScopeRef,
    ) -> Eval<Option<Value>> {
        let Some(object) = self.eval_link(&member.object, scope)? else {
            return Ok(None);
        };
        if member.optional && object.is_nullish() {
            return Ok(None);
        }
        builtins::get_property(&object, member.property.name.as_str()).map(Some)
    }

    fn eval_computed_member(
        &mut self,
        member: &'a ComputedMemberExpression<'a>,
        scope: &ScopeRef,
    ) -> Eval<Option<Value>> {
        let Some(object) = self.eval_link(&member.object, scope)? else {
            return Ok(None);
        };
        if member.optional && object.is_nullish() {
            return Ok(None);
        }
        let key = self.eval(&member.expression, scope)?.to_property_key();
        builtins::get_property(&object, &key).map(Some)
    }

    fn eval_arguments(
        &mut self,
        arguments: &'a [Argument<'a>],
        scope: &ScopeRef,
    ) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match argument {
                Argument::SpreadElement(spread) => {
                    let value = self.eval(&spread.argument, scope)?;
                    values.extend(self.iterate(&value)?);
                }
                other => match other.as_expression() {
                    Some(expr) => values.push(self.eval(expr, scope)?),
                    None => return Err(self.unsupported(other)),
                },
            }
        }
        Ok(values)
    }

    fn eval_call(&mut self, call: &'a CallExpression<'a>, scope: &ScopeRef) -> Eval<Option<Value>> {
        if let Expression::Identifier(id) = &call.callee {
            if id.name.as_str() == APPEND_FN {
                let args = self.eval_arguments(&call.arguments, scope)?;
                if let Some(value) = args.first() {
                    if !value.is_nullish() {
                        self.output.push_str(&value.to_js_string());
                    }
                }
                return Ok(Some(Value::Undefined));
            }
        }

        // Method calls keep their receiver.
        let (receiver, method) = match &call.callee {
            Expression::StaticMemberExpression(member) => {
                let Some(object) = self.eval_link(&member.object, scope)? else {
                    return Ok(None);
                };
                if member.optional && object.is_nullish() {
                    return Ok(None);
                }
                (object, member.property.name.to_string())
            }
            Expression::ComputedMemberExpression(member) => {
                let Some(object) = self.eval_link(&member.object, scope)? else {
                    return Ok(None);
                };
                if member.optional && object.is_nullish() {
                    return Ok(None);
                }
                let key = self.eval(&member.expression, scope)?.to_property_key();
                (object, key)
            }
            callee => {
                let Some(func) = self.eval_link(callee, scope)? else {
                    return Ok(None);
                };
                if call.optional && func.is_nullish() {
                    return Ok(None);
                }
                if !matches!(func, Value::Function(_)) {
                    return Err(format!("TypeError: {} is not a function", self.snippet(callee)));
                }
                let args = self.eval_arguments(&call.arguments, scope)?;
                return self.call_value(&func, args).map(Some);
            }
        };

        if call.optional
            && matches!(receiver, Value::Object(_))
            && builtins::get_property(&receiver, &method)?.is_nullish()
        {
            return Ok(None);
        }
        let args = self.eval_arguments(&call.arguments, scope)?;
        builtins::call_method(&receiver, &method, args, self).map(Some)
    }

    fn eval_unary(&mut self, unary: &'a UnaryExpression<'a>, scope: &ScopeRef) -> Eval<Value> {
        if unary.operator == UnaryOperator::Typeof {
            if let Expression::Identifier(id) = &unary.argument {
                let value = lookup(scope, id.name.as_str()).unwrap_or_default();
                return Ok(Value::String(value.type_of().to_string()));
            }
        }
        if unary.operator == UnaryOperator::Delete {
            return self.eval_delete(&unary.argument, scope);
        }

        let value = self.eval(&unary.argument, scope)?;
        Ok(match unary.operator {
            UnaryOperator::Typeof => Value::String(value.type_of().to_string()),
            UnaryOperator::LogicalNot => Value::Bool(!value.truthy()),
            UnaryOperator::UnaryNegation => Value::Number(-value.to_number()),
            UnaryOperator::UnaryPlus => Value::Number(value.to_number()),
            UnaryOperator::BitwiseNot => Value::Number(!to_int32(value.to_number()) as f64),
            UnaryOperator::Void | UnaryOperator::Delete => Value::Undefined,
        })
    }

    fn eval_delete(&mut self, argument: &'a Expression<'a>, scope: &ScopeRef) -> Eval<Value> {
        let (object, key) = match argument {
            Expression::StaticMemberExpression(member) => (
                self.eval(&member.object, scope)?,
                member.property.name.to_string(),
            ),
            Expression::ComputedMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                let key = self.eval(&member.expression, scope)?.to_property_key();
                (object, key)
            }
            _ => return Ok(Value::Bool(true)),
        };
        if let Value::Object(map) = &object {
            map.borrow_mut().shift_remove(&key);
        }
        Ok(Value::Bool(true))
    }

    fn eval_assignment(
        &mut self,
        assign: &'a AssignmentExpression<'a>,
        scope: &ScopeRef,
    ) -> Eval<Value> {
        let reference = self.resolve_target(&assign.left, scope)?;
        let value = match assign.operator {
            AssignmentOperator::Assign => self.eval(&assign.right, scope)?,
            AssignmentOperator::LogicalOr
            | AssignmentOperator::LogicalAnd
            | AssignmentOperator::LogicalNullish => {
                let current = self.read_reference(&reference, scope)?;
                let keep = match assign.operator {
                    AssignmentOperator::LogicalOr => current.truthy(),
                    AssignmentOperator::LogicalAnd => !current.truthy(),
                    _ => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(&assign.right, scope)?
            }
            operator => {
                let current = self.read_reference(&reference, scope)?;
                let right = self.eval(&assign.right, scope)?;
                match compound_operator(operator) {
                    Some(binary) => binary_op(binary, current, right)?,
                    None => return Err(self.unsupported(assign)),
                }
            }
        };
        self.write_reference(reference, value.clone(), scope)?;
        Ok(value)
    }

    fn resolve_target(
        &mut self,
        target: &'a AssignmentTarget<'a>,
        scope: &ScopeRef,
    ) -> Eval<Reference> {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(id) => {
                Ok(Reference::Binding(id.name.to_string()))
            }
            AssignmentTarget::StaticMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                Ok(Reference::Property(object, member.property.name.to_string()))
            }
            AssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                let key = self.eval(&member.expression, scope)?.to_property_key();
                Ok(Reference::Property(object, key))
            }
            _ => Err(self.unsupported(target)),
        }
    }

    fn resolve_simple_target(
        &mut self,
        target: &'a SimpleAssignmentTarget<'a>,
        scope: &ScopeRef,
    ) -> Eval<Reference> {
        match target {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => {
                Ok(Reference::Binding(id.name.to_string()))
            }
            SimpleAssignmentTarget::StaticMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                Ok(Reference::Property(object, member.property.name.to_string()))
            }
            SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                let key = self.eval(&member.expression, scope)?.to_property_key();
                Ok(Reference::Property(object, key))
            }
            _ => Err(self.unsupported(target)),
        }
    }

    fn read_reference(&self, reference: &Reference, scope: &ScopeRef) -> Eval<Value> {
        match reference {
            Reference::Binding(name) => {
                lookup(scope, name).ok_or_else(|| format!("ReferenceError: {} is not defined", name))
            }
            Reference::Property(object, key) => builtins::get_property(object, key),
        }
    }

    fn write_reference(&self, reference: Reference, value: Value, scope: &ScopeRef) -> Eval<()> {
        match reference {
            Reference::Binding(name) => self.assign(scope, &name, value),
            Reference::Property(object, key) => builtins::set_property(&object, &key, value),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FUNCTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn make_closure(&mut self, node: FunctionNode<'a>, scope: &ScopeRef) -> Value {
        self.closures.push(Closure {
            node,
            scope: Rc::clone(scope),
        });
        Value::Function(Callable::Closure(self.closures.len() - 1))
    }

    fn call_value(&mut self, func: &Value, args: Vec<Value>) -> Eval<Value> {
        match func {
            Value::Function(Callable::Builtin(name)) => builtins::call_builtin(name, &args),
            Value::Function(Callable::Helper(helper)) => helper(&args),
            Value::Function(Callable::Closure(id)) => self.call_closure(*id, args),
            other => Err(format!("TypeError: {} is not a function", other.to_js_string())),
        }
    }

    fn call_closure(&mut self, id: usize, args: Vec<Value>) -> Eval<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(STACK_OVERFLOW.to_string());
        }
        let (node, captured) = match self.closures.get(id) {
            Some(closure) => (closure.node, Rc::clone(&closure.scope)),
            None => return Err(format!("TypeError: unknown function #{}", id)),
        };

        let fn_scope = Scope::child(&captured, true);
        let (params, body, expression_body) = match node {
            FunctionNode::Arrow(arrow) => (&arrow.params, Some(&arrow.body), arrow.expression),
            FunctionNode::Function(func) => {
                if let Some(name) = &func.id {
                    declare(
                        &fn_scope,
                        name.name.as_str(),
                        Value::Function(Callable::Closure(id)),
                        true,
                    );
                }
                (&func.params, func.body.as_ref(), false)
            }
        };

        for (index, param) in params.items.iter().enumerate() {
            let arg = args.get(index).cloned().unwrap_or_default();
            self.bind_pattern(&param.pattern, arg, &fn_scope, true)?;
        }

        let Some(body) = body else {
            return Ok(Value::Undefined);
        };

        self.depth += 1;
        let result = self.exec_body(body, expression_body, &fn_scope);
        self.depth -= 1;
        result
    }

    fn exec_body(
        &mut self,
        body: &'a FunctionBody<'a>,
        expression_body: bool,
        scope: &ScopeRef,
    ) -> Eval<Value> {
        if expression_body {
            if let Some(Statement::ExpressionStatement(stmt)) = body.statements.first() {
                return self.eval(&stmt.expression, scope);
            }
        }
        match self.exec_statements(&body.statements, scope)? {
            Completion::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }
}

impl Invoke for Interpreter<'_> {
    fn invoke(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, String> {
        self.call_value(func, args)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATORS
// ═══════════════════════════════════════════════════════════════════════════════

fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(4_294_967_296.0);
    m as u32
}

fn compound_operator(op: AssignmentOperator) -> Option<BinaryOperator> {
    Some(match op {
        AssignmentOperator::Addition => BinaryOperator::Addition,
        AssignmentOperator::Subtraction => BinaryOperator::Subtraction,
        AssignmentOperator::Multiplication => BinaryOperator::Multiplication,
        AssignmentOperator::Division => BinaryOperator::Division,
        AssignmentOperator::Remainder => BinaryOperator::Remainder,
        AssignmentOperator::Exponential => BinaryOperator::Exponential,
        AssignmentOperator::ShiftLeft => BinaryOperator::ShiftLeft,
        AssignmentOperator::ShiftRight => BinaryOperator::ShiftRight,
        AssignmentOperator::ShiftRightZeroFill => BinaryOperator::ShiftRightZeroFill,
        AssignmentOperator::BitwiseOR => BinaryOperator::BitwiseOR,
        AssignmentOperator::BitwiseXOR => BinaryOperator::BitwiseXOR,
        AssignmentOperator::BitwiseAnd => BinaryOperator::BitwiseAnd,
        _ => return None,
    })
}

fn is_stringish(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_)
    )
}

fn binary_op(op: BinaryOperator, left: Value, right: Value) -> Eval<Value> {
    let number = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
    let value = match op {
        BinaryOperator::Addition => {
            if is_stringish(&left) || is_stringish(&right) {
                Value::String(format!("{}{}", left.to_js_string(), right.to_js_string()))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOperator::Subtraction => number(|a, b| a - b),
        BinaryOperator::Multiplication => number(|a, b| a * b),
        BinaryOperator::Division => number(|a, b| a / b),
        BinaryOperator::Remainder => number(|a, b| a % b),
        BinaryOperator::Exponential => number(f64::powf),
        BinaryOperator::Equality => Value::Bool(left.loose_equals(&right)),
        BinaryOperator::Inequality => Value::Bool(!left.loose_equals(&right)),
        BinaryOperator::StrictEquality => Value::Bool(left.strict_equals(&right)),
        BinaryOperator::StrictInequality => Value::Bool(!left.strict_equals(&right)),
        BinaryOperator::LessThan
        | BinaryOperator::LessEqualThan
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterEqualThan => Value::Bool(compare(op, &left, &right)),
        BinaryOperator::ShiftLeft => Value::Number(
            to_int32(left.to_number()).wrapping_shl(to_uint32(right.to_number()) & 31) as f64,
        ),
        BinaryOperator::ShiftRight => Value::Number(
            to_int32(left.to_number()).wrapping_shr(to_uint32(right.to_number()) & 31) as f64,
        ),
        BinaryOperator::ShiftRightZeroFill => Value::Number(
            to_uint32(left.to_number()).wrapping_shr(to_uint32(right.to_number()) & 31) as f64,
        ),
        BinaryOperator::BitwiseOR => {
            Value::Number((to_int32(left.to_number()) | to_int32(right.to_number())) as f64)
        }
        BinaryOperator::BitwiseXOR => {
            Value::Number((to_int32(left.to_number()) ^ to_int32(right.to_number())) as f64)
        }
        BinaryOperator::BitwiseAnd => {
            Value::Number((to_int32(left.to_number()) & to_int32(right.to_number())) as f64)
        }
        BinaryOperator::In => {
            let key = left.to_property_key();
            match &right {
                Value::Object(map) => Value::Bool(map.borrow().contains_key(&key)),
                Value::Array(items) => Value::Bool(
                    key == "length"
                        || key
                            .parse::<usize>()
                            .is_ok_and(|index| index < items.borrow().len()),
                ),
                other => {
                    return Err(format!(
                        "TypeError: Cannot use 'in' operator to search for '{}' in {}",
                        key,
                        other.to_js_string()
                    ))
                }
            }
        }
        BinaryOperator::Instanceof => {
            return Err("SyntaxError: unsupported operator `instanceof`".to_string())
        }
    };
    Ok(value)
}

fn compare(op: BinaryOperator, left: &Value, right: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            BinaryOperator::LessThan => a < b,
            BinaryOperator::LessEqualThan => a <= b,
            BinaryOperator::GreaterThan => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOperator::LessThan => a < b,
        BinaryOperator::LessEqualThan => a <= b,
        BinaryOperator::GreaterThan => a > b,
        _ => a >= b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_conversion() {
        assert_eq!(to_int32(4_294_967_297.0), 1);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_uint32(-1.0), 4_294_967_295);
        assert_eq!(to_int32(f64::NAN), 0);
    }

    #[test]
    fn test_addition_concatenates_strings() {
        let out = binary_op(BinaryOperator::Addition, Value::from("a"), Value::Number(1.0)).unwrap();
        assert_eq!(out.to_js_string(), "a1");
        let out = binary_op(BinaryOperator::Addition, Value::Number(1.0), Value::Bool(true)).unwrap();
        assert_eq!(out.to_js_string(), "2");
    }

    #[test]
    fn test_string_comparison_is_lexical() {
        assert!(compare(BinaryOperator::LessThan, &Value::from("10"), &Value::from("9")));
        assert!(!compare(BinaryOperator::LessThan, &Value::Number(10.0), &Value::from("9")));
    }

    #[test]
    fn test_var_scope_stops_at_function_boundary() {
        let root = Scope::root();
        let func = Scope::child(&root, true);
        let block = Scope::child(&func, false);
        assert!(Rc::ptr_eq(&var_scope(&block), &func));
        assert!(Rc::ptr_eq(&var_scope(&root), &root));
    }
}
