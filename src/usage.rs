//! Usages: how one instance of a type is used inside one method.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    context::{CompletionInfo, Context, Expression, MethodDecl, Statement, THIS},
    names::{MemberName, TypeName},
};

/// Where the used instance came from.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefinitionSite {
    New { constructor: MemberName },
    Parameter { method: MemberName, index: usize },
    Field { member: MemberName },
    Return { method: MemberName },
    MemberAccess { member: MemberName },
    Constant,
    Unknown,
}

/// One interaction with the used instance.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberAccess {
    /// A method invoked on the instance.
    Call { method: MemberName },
    /// A field, property or event referenced on the instance.
    Reference { member: MemberName },
    /// The instance passed as argument `index` of `method`.
    Parameter { method: MemberName, index: usize },
}

impl MemberAccess {
    pub fn member(&self) -> &MemberName {
        match self {
            MemberAccess::Call { method } => method,
            MemberAccess::Reference { member } => member,
            MemberAccess::Parameter { method, .. } => method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "type")]
    pub r#type: TypeName,
    pub class_context: TypeName,
    pub method_context: MemberName,
    pub definition: DefinitionSite,
    #[serde(default)]
    pub member_accesses: Vec<MemberAccess>,
}

impl Usage {
    pub fn new(r#type: TypeName) -> Self {
        Self {
            r#type,
            class_context: TypeName::unknown(),
            method_context: MemberName::unknown_method(),
            definition: DefinitionSite::Unknown,
            member_accesses: Vec::new(),
        }
    }

    pub fn with_call(mut self, method: MemberName) -> Self {
        self.member_accesses.push(MemberAccess::Call { method });
        self
    }
}

/// Whether a usage carries enough signal to be mined.
///
/// Unknown, array, type-parameter and void types are dropped, as are types
/// declared in the analyzed solution and usages without member accesses.
pub fn is_interesting(u: &Usage) -> bool {
    let t = &u.r#type;
    if t.is_unknown() {
        return false;
    }
    if t.is_array() || t.is_type_parameter() || t.is_void() {
        return false;
    }
    if t.is_local() {
        return false;
    }
    !u.member_accesses.is_empty()
}

/// Keep only the usages that pass [`is_interesting`].
pub fn filter_interesting(usages: Vec<Usage>) -> Vec<Usage> {
    usages.into_iter().filter(is_interesting).collect()
}

/// Extracts usages from contexts.
pub trait UsageExtractor: Sync {
    /// Every usage found in the context, interesting or not.
    fn usages(&self, ctx: &Context) -> Vec<Usage>;

    /// The usage of the instance completion was triggered on, as far as it
    /// is known at the completion point.
    fn query(&self, ctx: &Context) -> Option<Usage>;
}

/// Extractor over the statement model of [`crate::context::Sst`].
///
/// Tracks parameters, locals and fields per method. A local's definition
/// site is taken from the first assignment to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SstUsageExtractor;

impl UsageExtractor for SstUsageExtractor {
    fn usages(&self, ctx: &Context) -> Vec<Usage> {
        ctx.sst
            .methods
            .iter()
            .flat_map(|m| method_usages(ctx, m).into_iter().map(|(_, u)| u))
            .collect()
    }

    fn query(&self, ctx: &Context) -> Option<Usage> {
        let info = CompletionInfo::extract(ctx)?;
        let receiver = info.receiver?;
        method_usages(ctx, info.method)
            .into_iter()
            .find(|(var, _)| var == receiver)
            .map(|(_, u)| u)
    }
}

fn class_context(ctx: &Context) -> TypeName {
    ctx.type_shape
        .type_hierarchy
        .extends
        .as_ref()
        .map(|e| e.element.clone())
        .unwrap_or_else(|| ctx.sst.enclosing_type.clone())
}

/// Usages of one method keyed by variable name, in order of first
/// appearance.
fn method_usages(ctx: &Context, method: &MethodDecl) -> Vec<(String, Usage)> {
    let mut tracker = Tracker {
        ctx,
        template: Usage {
            r#type: TypeName::unknown(),
            class_context: class_context(ctx),
            method_context: ctx.type_shape.first_declaration(&method.name),
            definition: DefinitionSite::Unknown,
            member_accesses: Vec::new(),
        },
        order: Vec::new(),
        usages: HashMap::new(),
    };

    for (index, p) in method.name.parameters.iter().enumerate() {
        tracker.declare(
            &p.name,
            p.value_type.clone(),
            DefinitionSite::Parameter {
                method: method.name.clone(),
                index,
            },
        );
    }

    for stmt in &method.body {
        match stmt {
            Statement::VariableDeclaration {
                name,
                declared_type,
            } => tracker.declare(
                name,
                declared_type.clone(),
                DefinitionSite::Unknown,
            ),
            Statement::Assignment { target, value } => {
                tracker.visit(value);
                tracker.define(target, definition_of(value));
            }
            Statement::Expression { expression } => tracker.visit(expression),
            Statement::Return { value } => {
                if let Some(v) = value {
                    tracker.visit(v);
                }
            }
        }
    }

    let Tracker {
        order, mut usages, ..
    } = tracker;
    order
        .into_iter()
        .filter_map(|var| usages.remove(&var).map(|u| (var, u)))
        .collect()
}

fn definition_of(value: &Expression) -> DefinitionSite {
    match value {
        Expression::New { constructor, .. } => DefinitionSite::New {
            constructor: constructor.clone(),
        },
        Expression::Invocation { method, .. } => DefinitionSite::Return {
            method: method.clone(),
        },
        Expression::MemberAccess { member, .. } => {
            DefinitionSite::MemberAccess {
                member: member.clone(),
            }
        }
        Expression::Constant { .. } => DefinitionSite::Constant,
        Expression::Completion { .. } => DefinitionSite::Unknown,
    }
}

struct Tracker<'a> {
    ctx: &'a Context,
    template: Usage,
    order: Vec<String>,
    usages: HashMap<String, Usage>,
}

impl Tracker<'_> {
    fn declare(&mut self, var: &str, t: TypeName, definition: DefinitionSite) {
        if !self.usages.contains_key(var) {
            self.order.push(var.to_string());
        }
        let mut usage = self.template.clone();
        usage.r#type = t;
        usage.definition = definition;
        self.usages.insert(var.to_string(), usage);
    }

    /// Set the definition site of a local on its first assignment.
    fn define(&mut self, var: &str, definition: DefinitionSite) {
        if let Some(u) = self.usages.get_mut(var)
            && u.definition == DefinitionSite::Unknown
        {
            u.definition = definition;
        }
    }

    /// The usage for `var`, creating field usages on first reference.
    fn usage_of(&mut self, var: &str) -> Option<&mut Usage> {
        if var == THIS {
            return None;
        }
        if !self.usages.contains_key(var) {
            let field = self.ctx.sst.fields.iter().find(|f| f.name == var)?;
            let (t, member) = (field.value_type.clone(), field.clone());
            self.declare(var, t, DefinitionSite::Field { member });
        }
        self.usages.get_mut(var)
    }

    fn record(&mut self, var: &str, access: MemberAccess) {
        if let Some(u) = self.usage_of(var) {
            u.member_accesses.push(access);
        }
    }

    fn record_arguments(&mut self, callee: &MemberName, arguments: &[String]) {
        for (index, arg) in arguments.iter().enumerate() {
            self.record(
                arg,
                MemberAccess::Parameter {
                    method: callee.clone(),
                    index,
                },
            );
        }
    }

    fn visit(&mut self, expr: &Expression) {
        match expr {
            Expression::Invocation {
                receiver,
                method,
                arguments,
            } => {
                if let Some(r) = receiver {
                    self.record(
                        r,
                        MemberAccess::Call {
                            method: method.clone(),
                        },
                    );
                }
                self.record_arguments(method, arguments);
            }
            Expression::MemberAccess { receiver, member } => self.record(
                receiver,
                MemberAccess::Reference {
                    member: member.clone(),
                },
            ),
            Expression::New {
                constructor,
                arguments,
            } => self.record_arguments(constructor, arguments),
            Expression::Completion { receiver, .. } => {
                // Make the receiver known even if nothing else touches it.
                if let Some(r) = receiver {
                    let _ = self.usage_of(r);
                }
            }
            Expression::Constant { .. } => {}
        }
    }
}
