//! Names of types and type members as they appear in contexts, usages and
//! completion proposals.
//!
//! Names are plain values: two names are equal when every component is
//! equal, so lookups across call sites only match after generic bindings
//! have been erased (see [`TypeName::erased`] and [`MemberName::erased`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder used for names the producer could not resolve.
pub const UNKNOWN_NAME: &str = "???";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
    Struct,
    Enum,
    Delegate,
    Array,
    TypeParameter,
    Void,
    Unknown,
}

impl TypeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Struct => "struct",
            TypeKind::Enum => "enum",
            TypeKind::Delegate => "delegate",
            TypeKind::Array => "array",
            TypeKind::TypeParameter => "type_parameter",
            TypeKind::Void => "void",
            TypeKind::Unknown => "unknown",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct Assembly {
    pub name: String,
    /// Set for assemblies built from the analyzed solution itself.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub local: bool,
}

impl Assembly {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            local: false,
        }
    }

    pub fn local(name: &str) -> Self {
        Self {
            name: name.to_string(),
            local: true,
        }
    }
}

/// A generic type argument, optionally bound to a concrete type.
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
pub struct TypeArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<Box<TypeName>>,
}

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
pub struct TypeName {
    pub kind: TypeKind,
    pub name: String,
    #[serde(default)]
    pub assembly: Assembly,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_arguments: Vec<TypeArgument>,
}

impl TypeName {
    pub fn new(kind: TypeKind, name: &str, assembly: Assembly) -> Self {
        Self {
            kind,
            name: name.to_string(),
            assembly,
            type_arguments: Vec::new(),
        }
    }

    pub fn class(name: &str, assembly: &str) -> Self {
        Self::new(TypeKind::Class, name, Assembly::new(assembly))
    }

    pub fn interface(name: &str, assembly: &str) -> Self {
        Self::new(TypeKind::Interface, name, Assembly::new(assembly))
    }

    pub fn unknown() -> Self {
        Self::new(TypeKind::Unknown, UNKNOWN_NAME, Assembly::default())
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void, "System.Void", Assembly::new("mscorlib"))
    }

    /// Add a generic argument, bound to `binding` when given.
    pub fn with_argument(mut self, name: &str, binding: Option<TypeName>) -> Self {
        self.type_arguments.push(TypeArgument {
            name: name.to_string(),
            binding: binding.map(Box::new),
        });
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == TypeKind::Unknown
    }

    pub fn is_array(&self) -> bool {
        self.kind == TypeKind::Array
    }

    pub fn is_type_parameter(&self) -> bool {
        self.kind == TypeKind::TypeParameter
    }

    pub fn is_void(&self) -> bool {
        self.kind == TypeKind::Void
    }

    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    pub fn is_local(&self) -> bool {
        self.assembly.local
    }

    /// The same type with all generic bindings removed.
    ///
    /// ```
    /// use bmneval::names::TypeName;
    ///
    /// let int = TypeName::class("System.Int32", "mscorlib");
    /// let list = TypeName::class("System.Collections.Generic.List`1", "mscorlib")
    ///     .with_argument("T", Some(int));
    /// let erased = list.erased();
    /// assert!(erased.type_arguments[0].binding.is_none());
    /// assert_eq!(erased, erased.erased());
    /// ```
    pub fn erased(&self) -> Self {
        Self {
            kind: self.kind,
            name: self.name.clone(),
            assembly: self.assembly.clone(),
            type_arguments: self
                .type_arguments
                .iter()
                .map(|arg| TypeArgument {
                    name: arg.name.clone(),
                    binding: None,
                })
                .collect(),
        }
    }

    /// Stable string key used by the on-disk stores.
    ///
    /// Unlike the display form it covers every component, so types that
    /// differ only in kind or assembly locality get separate buckets.
    pub fn identifier(&self) -> String {
        let scope = if self.assembly.local { "local" } else { "lib" };
        format!("{}:{scope}:{self}", self.kind.as_str())
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return f.write_str(UNKNOWN_NAME);
        }
        f.write_str(&self.name)?;
        if !self.type_arguments.is_empty() {
            f.write_str("[")?;
            for (i, arg) in self.type_arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                match &arg.binding {
                    Some(bound) => write!(f, "[{} -> {bound}]", arg.name)?,
                    None => write!(f, "[{}]", arg.name)?,
                }
            }
            f.write_str("]")?;
        }
        if !self.assembly.name.is_empty() {
            write!(f, ", {}", self.assembly.name)?;
        }
        Ok(())
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Method,
    Constructor,
    Field,
    Property,
    Event,
}

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
pub struct Parameter {
    pub name: String,
    pub value_type: TypeName,
}

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
pub struct MemberName {
    pub kind: MemberKind,
    pub declaring_type: TypeName,
    /// Return type for methods, value type for fields, properties and events.
    pub value_type: TypeName,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_static: bool,
}

impl MemberName {
    pub fn method(declaring_type: TypeName, name: &str) -> Self {
        Self {
            kind: MemberKind::Method,
            declaring_type,
            value_type: TypeName::void(),
            name: name.to_string(),
            parameters: Vec::new(),
            is_static: false,
        }
    }

    pub fn field(
        declaring_type: TypeName,
        name: &str,
        value_type: TypeName,
    ) -> Self {
        Self {
            kind: MemberKind::Field,
            declaring_type,
            value_type,
            name: name.to_string(),
            parameters: Vec::new(),
            is_static: false,
        }
    }

    pub fn unknown_method() -> Self {
        Self::method(TypeName::unknown(), UNKNOWN_NAME)
    }

    pub fn returning(mut self, value_type: TypeName) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_parameter(mut self, name: &str, value_type: TypeName) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            value_type,
        });
        self
    }

    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_NAME
    }

    pub fn is_method(&self) -> bool {
        self.kind == MemberKind::Method
    }

    pub fn erased(&self) -> Self {
        Self {
            kind: self.kind,
            declaring_type: self.declaring_type.erased(),
            value_type: self.value_type.erased(),
            name: self.name.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|p| Parameter {
                    name: p.name.clone(),
                    value_type: p.value_type.erased(),
                })
                .collect(),
            is_static: self.is_static,
        }
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            f.write_str("static ")?;
        }
        write!(
            f,
            "[{}] [{}].{}",
            self.value_type, self.declaring_type, self.name
        )?;
        if matches!(self.kind, MemberKind::Method | MemberKind::Constructor) {
            f.write_str("(")?;
            for (i, p) in self.parameters.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "[{}] {}", p.value_type, p.name)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// What a completion proposal refers to.
///
/// Encoded externally tagged, e.g. `{"member": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Name {
    Type(TypeName),
    Member(MemberName),
    /// Keywords, namespaces, local variables and anything else.
    Other { identifier: String },
}

impl Name {
    pub fn as_member(&self) -> Option<&MemberName> {
        match self {
            Name::Member(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Type(t) => t.fmt(f),
            Name::Member(m) => m.fmt(f),
            Name::Other { identifier } => f.write_str(identifier),
        }
    }
}
