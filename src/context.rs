//! The code context recorded for one type declaration.
//!
//! A [`Context`] pairs a simplified syntax tree of the declaring type
//! ([`Sst`]) with its [`TypeShape`], i.e. what the type extends and
//! implements and which methods it overrides. Contexts are read from
//! archives and never mutated afterwards; erasure produces a new value.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::names::{MemberName, TypeName};

/// Hierarchies deeper than this are treated as malformed input.
pub const MAX_HIERARCHY_DEPTH: usize = 64;

/// Receiver name that refers to the enclosing instance.
pub const THIS: &str = "this";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub sst: Sst,
    #[serde(default)]
    pub type_shape: TypeShape,
}

impl Context {
    /// Only classes with at least one method contribute usages.
    pub fn is_eligible_for_mining(&self) -> bool {
        self.sst.enclosing_type.is_class() && !self.sst.methods.is_empty()
    }

    /// The context with every generic binding removed.
    pub fn erased(&self) -> Self {
        Self {
            sst: self.sst.erased(),
            type_shape: self.type_shape.erased(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sst {
    pub enclosing_type: TypeName,
    #[serde(default)]
    pub fields: Vec<MemberName>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

impl Default for Sst {
    fn default() -> Self {
        Self {
            enclosing_type: TypeName::unknown(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}

impl Sst {
    fn erased(&self) -> Self {
        Self {
            enclosing_type: self.enclosing_type.erased(),
            fields: self.fields.iter().map(MemberName::erased).collect(),
            methods: self.methods.iter().map(MethodDecl::erased).collect(),
        }
    }

    /// Every type the declaration refers to through variable declarations
    /// and method signatures (return and parameter types), with generic
    /// bindings erased. Unresolved names are left out.
    pub fn referenced_types(&self) -> BTreeSet<TypeName> {
        let mut seen = BTreeSet::new();
        for method in &self.methods {
            seen.insert(method.name.value_type.erased());
            for p in &method.name.parameters {
                seen.insert(p.value_type.erased());
            }
            for stmt in &method.body {
                if let Statement::VariableDeclaration { declared_type, .. } = stmt {
                    seen.insert(declared_type.erased());
                }
            }
        }
        seen.retain(|t| !t.is_unknown());
        seen
    }

    /// Resolve the static type of `variable` as seen from inside `method`.
    ///
    /// Locals shadow parameters, which shadow fields.
    pub fn variable_type(
        &self,
        method: &MethodDecl,
        variable: &str,
    ) -> Option<TypeName> {
        if variable == THIS {
            return Some(self.enclosing_type.clone());
        }
        let local = method.body.iter().find_map(|stmt| match stmt {
            Statement::VariableDeclaration {
                name,
                declared_type,
            } if name == variable => Some(declared_type),
            _ => None,
        });
        if let Some(t) = local {
            return Some(t.clone());
        }
        if let Some(p) =
            method.name.parameters.iter().find(|p| p.name == variable)
        {
            return Some(p.value_type.clone());
        }
        self.fields
            .iter()
            .find(|f| f.name == variable)
            .map(|f| f.value_type.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: MemberName,
    #[serde(default)]
    pub body: Vec<Statement>,
}

impl MethodDecl {
    fn erased(&self) -> Self {
        Self {
            name: self.name.erased(),
            body: self.body.iter().map(Statement::erased).collect(),
        }
    }

    /// All expressions of the body, in statement order.
    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.body.iter().filter_map(Statement::expression)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    VariableDeclaration {
        name: String,
        declared_type: TypeName,
    },
    Assignment {
        target: String,
        value: Expression,
    },
    Expression {
        expression: Expression,
    },
    Return {
        #[serde(default)]
        value: Option<Expression>,
    },
}

impl Statement {
    pub fn expression(&self) -> Option<&Expression> {
        match self {
            Statement::VariableDeclaration { .. } => None,
            Statement::Assignment { value, .. } => Some(value),
            Statement::Expression { expression } => Some(expression),
            Statement::Return { value } => value.as_ref(),
        }
    }

    fn erased(&self) -> Self {
        match self {
            Statement::VariableDeclaration {
                name,
                declared_type,
            } => Statement::VariableDeclaration {
                name: name.clone(),
                declared_type: declared_type.erased(),
            },
            Statement::Assignment { target, value } => Statement::Assignment {
                target: target.clone(),
                value: value.erased(),
            },
            Statement::Expression { expression } => Statement::Expression {
                expression: expression.erased(),
            },
            Statement::Return { value } => Statement::Return {
                value: value.as_ref().map(Expression::erased),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    /// A method call; `receiver` is `None` for static calls.
    Invocation {
        #[serde(default)]
        receiver: Option<String>,
        method: MemberName,
        #[serde(default)]
        arguments: Vec<String>,
    },
    /// A field, property or event reference.
    MemberAccess {
        receiver: String,
        member: MemberName,
    },
    New {
        constructor: MemberName,
        #[serde(default)]
        arguments: Vec<String>,
    },
    /// The point where code completion was triggered.
    Completion {
        #[serde(default)]
        receiver: Option<String>,
        #[serde(default)]
        type_reference: Option<TypeName>,
        #[serde(default)]
        token: String,
    },
    Constant {
        #[serde(default)]
        value: String,
    },
}

impl Expression {
    fn erased(&self) -> Self {
        match self {
            Expression::Invocation {
                receiver,
                method,
                arguments,
            } => Expression::Invocation {
                receiver: receiver.clone(),
                method: method.erased(),
                arguments: arguments.clone(),
            },
            Expression::MemberAccess { receiver, member } => {
                Expression::MemberAccess {
                    receiver: receiver.clone(),
                    member: member.erased(),
                }
            }
            Expression::New {
                constructor,
                arguments,
            } => Expression::New {
                constructor: constructor.erased(),
                arguments: arguments.clone(),
            },
            Expression::Completion {
                receiver,
                type_reference,
                token,
            } => Expression::Completion {
                receiver: receiver.clone(),
                type_reference: type_reference.as_ref().map(TypeName::erased),
                token: token.clone(),
            },
            Expression::Constant { value } => Expression::Constant {
                value: value.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeShape {
    #[serde(default)]
    pub type_hierarchy: TypeHierarchy,
    #[serde(default)]
    pub method_hierarchies: Vec<MethodHierarchy>,
}

impl TypeShape {
    fn erased(&self) -> Self {
        Self {
            type_hierarchy: self.type_hierarchy.erased(),
            method_hierarchies: self
                .method_hierarchies
                .iter()
                .map(MethodHierarchy::erased)
                .collect(),
        }
    }

    /// The declaration that first introduced `method` in the hierarchy,
    /// falling back to the overridden method and then to `method` itself.
    pub fn first_declaration(&self, method: &MemberName) -> MemberName {
        self.method_hierarchies
            .iter()
            .find(|mh| mh.element == *method)
            .and_then(|mh| mh.first.as_ref().or(mh.super_method.as_ref()))
            .unwrap_or(method)
            .clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeHierarchy {
    pub element: TypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<Box<TypeHierarchy>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implements: Vec<TypeHierarchy>,
}

impl Default for TypeHierarchy {
    fn default() -> Self {
        Self::new(TypeName::unknown())
    }
}

impl TypeHierarchy {
    pub fn new(element: TypeName) -> Self {
        Self {
            element,
            extends: None,
            implements: Vec::new(),
        }
    }

    pub fn extending(mut self, parent: TypeHierarchy) -> Self {
        self.extends = Some(Box::new(parent));
        self
    }

    pub fn implementing(mut self, interface: TypeHierarchy) -> Self {
        self.implements.push(interface);
        self
    }

    fn erased(&self) -> Self {
        Self {
            element: self.element.erased(),
            extends: self.extends.as_ref().map(|e| Box::new(e.erased())),
            implements: self
                .implements
                .iter()
                .map(TypeHierarchy::erased)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodHierarchy {
    pub element: MemberName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_method: Option<MemberName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<MemberName>,
}

impl MethodHierarchy {
    fn erased(&self) -> Self {
        Self {
            element: self.element.erased(),
            super_method: self.super_method.as_ref().map(MemberName::erased),
            first: self.first.as_ref().map(MemberName::erased),
        }
    }
}

/// Whether `t` is the hierarchy's own type, a transitive superclass, or a
/// transitively implemented interface.
pub fn is_in_hierarchy(t: &TypeName, hierarchy: &TypeHierarchy) -> bool {
    is_in_hierarchy_at(t, hierarchy, 0)
}

fn is_in_hierarchy_at(t: &TypeName, th: &TypeHierarchy, depth: usize) -> bool {
    if depth > MAX_HIERARCHY_DEPTH {
        tracing::warn!(
            element = %th.element,
            "type hierarchy deeper than {MAX_HIERARCHY_DEPTH} levels, giving up"
        );
        return false;
    }
    if *t == th.element {
        return true;
    }
    if let Some(parent) = &th.extends
        && is_in_hierarchy_at(t, parent, depth + 1)
    {
        return true;
    }
    th.implements
        .iter()
        .any(|i| is_in_hierarchy_at(t, i, depth + 1))
}

/// Where and on what code completion was invoked inside a context.
#[derive(Debug, Clone)]
pub struct CompletionInfo<'a> {
    /// The method containing the completion expression.
    pub method: &'a MethodDecl,
    pub receiver: Option<&'a str>,
    pub type_reference: Option<&'a TypeName>,
    pub token: &'a str,
    triggered_type: Option<TypeName>,
}

impl<'a> CompletionInfo<'a> {
    /// Locate the completion expression in `ctx`. Returns `None` when the
    /// context holds no completion point.
    pub fn extract(ctx: &'a Context) -> Option<Self> {
        ctx.sst.methods.iter().find_map(|method| {
            method.expressions().find_map(|expr| match expr {
                Expression::Completion {
                    receiver,
                    type_reference,
                    token,
                } => {
                    let triggered_type = match (type_reference, receiver) {
                        (Some(t), _) => Some(t.clone()),
                        (None, Some(var)) => {
                            ctx.sst.variable_type(method, var)
                        }
                        (None, None) => None,
                    };
                    Some(Self {
                        method,
                        receiver: receiver.as_deref(),
                        type_reference: type_reference.as_ref(),
                        token,
                        triggered_type,
                    })
                }
                _ => None,
            })
        })
    }

    /// The static type completion was triggered on, if it can be resolved.
    pub fn triggered_type(&self) -> Option<&TypeName> {
        self.triggered_type.as_ref()
    }

    pub fn is_on_type_reference(&self) -> bool {
        self.type_reference.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::TypeKind;

    fn t(name: &str) -> TypeName {
        TypeName::class(name, "Lib")
    }

    fn method_with_body(body: Vec<Statement>) -> MethodDecl {
        MethodDecl {
            name: MemberName::method(t("A"), "Run")
                .with_parameter("p", t("Param")),
            body,
        }
    }

    fn context_with(body: Vec<Statement>) -> Context {
        Context {
            sst: Sst {
                enclosing_type: t("A"),
                fields: vec![MemberName::field(t("A"), "_f", t("Field"))],
                methods: vec![method_with_body(body)],
            },
            type_shape: TypeShape::default(),
        }
    }

    #[test]
    fn hierarchy_membership() {
        // A extends B, B implements C and D
        let b = TypeHierarchy::new(t("B"))
            .implementing(TypeHierarchy::new(TypeName::interface("C", "Lib")))
            .implementing(TypeHierarchy::new(TypeName::interface("D", "Lib")));
        let a = TypeHierarchy::new(t("A")).extending(b);

        assert!(is_in_hierarchy(&t("A"), &a));
        assert!(is_in_hierarchy(&t("B"), &a));
        assert!(is_in_hierarchy(&TypeName::interface("C", "Lib"), &a));
        assert!(is_in_hierarchy(&TypeName::interface("D", "Lib"), &a));
        assert!(!is_in_hierarchy(&t("E"), &a));
    }

    #[test]
    fn hierarchy_search_is_depth_limited() {
        let mut th = TypeHierarchy::new(t("Root"));
        for i in 0..(MAX_HIERARCHY_DEPTH + 10) {
            th = TypeHierarchy::new(t(&format!("L{i}"))).extending(th);
        }
        let top = t(&format!("L{}", MAX_HIERARCHY_DEPTH + 9));
        assert!(is_in_hierarchy(&top, &th));
        assert!(!is_in_hierarchy(&t("Root"), &th));
    }

    #[test]
    fn eligibility_requires_class_with_methods() {
        let ctx = context_with(vec![]);
        assert!(ctx.is_eligible_for_mining());

        let mut no_methods = ctx.clone();
        no_methods.sst.methods.clear();
        assert!(!no_methods.is_eligible_for_mining());

        let mut interface = ctx;
        interface.sst.enclosing_type.kind = TypeKind::Interface;
        assert!(!interface.is_eligible_for_mining());
    }

    #[test]
    fn variable_resolution_order() {
        let ctx = context_with(vec![Statement::VariableDeclaration {
            name: "p".to_string(),
            declared_type: t("Shadow"),
        }]);
        let m = &ctx.sst.methods[0];

        assert_eq!(ctx.sst.variable_type(m, "p"), Some(t("Shadow")));
        assert_eq!(ctx.sst.variable_type(m, "_f"), Some(t("Field")));
        assert_eq!(ctx.sst.variable_type(m, THIS), Some(t("A")));
        assert_eq!(ctx.sst.variable_type(m, "nope"), None);
    }

    #[test]
    fn completion_info_resolves_receiver_type() {
        let ctx = context_with(vec![
            Statement::VariableDeclaration {
                name: "foo".to_string(),
                declared_type: t("Foo"),
            },
            Statement::Expression {
                expression: Expression::Completion {
                    receiver: Some("foo".to_string()),
                    type_reference: None,
                    token: "Ba".to_string(),
                },
            },
        ]);

        let info = CompletionInfo::extract(&ctx).unwrap();
        assert_eq!(info.triggered_type(), Some(&t("Foo")));
        assert_eq!(info.token, "Ba");
        assert!(!info.is_on_type_reference());
    }

    #[test]
    fn completion_info_absent_without_completion_expression() {
        let ctx = context_with(vec![Statement::Return { value: None }]);
        assert!(CompletionInfo::extract(&ctx).is_none());
    }

    #[test]
    fn completion_on_type_reference() {
        let ctx = context_with(vec![Statement::Expression {
            expression: Expression::Completion {
                receiver: None,
                type_reference: Some(t("Console")),
                token: String::new(),
            },
        }]);
        let info = CompletionInfo::extract(&ctx).unwrap();
        assert!(info.is_on_type_reference());
    }

    #[test]
    fn first_declaration_prefers_first_then_super() {
        let own = MemberName::method(t("A"), "Run");
        let sup = MemberName::method(t("B"), "Run");
        let first = MemberName::method(TypeName::interface("I", "Lib"), "Run");

        let mut shape = TypeShape::default();
        assert_eq!(shape.first_declaration(&own), own);

        shape.method_hierarchies.push(MethodHierarchy {
            element: own.clone(),
            super_method: Some(sup.clone()),
            first: None,
        });
        assert_eq!(shape.first_declaration(&own), sup);

        shape.method_hierarchies[0].first = Some(first.clone());
        assert_eq!(shape.first_declaration(&own), first);
    }

    #[test]
    fn referenced_types_cover_declarations_and_signatures() {
        let ret = t("Result");
        let bound = t("List`1").with_argument("T", Some(t("Int")));
        let mut ctx = context_with(vec![
            Statement::VariableDeclaration {
                name: "xs".to_string(),
                declared_type: bound.clone(),
            },
            Statement::VariableDeclaration {
                name: "u".to_string(),
                declared_type: TypeName::unknown(),
            },
        ]);
        ctx.sst.methods[0].name.value_type = ret.clone();

        let types = ctx.sst.referenced_types();
        let expected: BTreeSet<_> =
            [ret, t("Param"), bound.erased()].into_iter().collect();
        assert_eq!(types, expected);
    }

    #[test]
    fn context_erasure_reaches_statements() {
        let bound = t("List`1").with_argument("T", Some(t("Int")));
        let ctx = context_with(vec![Statement::VariableDeclaration {
            name: "xs".to_string(),
            declared_type: bound.clone(),
        }]);

        let erased = ctx.erased();
        let m = &erased.sst.methods[0];
        assert_eq!(erased.sst.variable_type(m, "xs"), Some(bound.erased()));
    }
}
