//! The debug-info object tree.
//!
//! The tag/attribute record stream is flat; nesting is implied by each
//! record's depth. This module reconstructs the explicit tree: a forest of
//! compile units, each owning its declarations, types and scopes as
//! children. All nodes live in one arena owned by the forest, and every
//! back-reference (`parent`, `specification`) is an arena id, so the
//! structure is cycle-free by construction.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::iter::Peekable;

use crate::record::DebugRecord;
use crate::Error;

/// Identifies a node within a `DebugInfoForest`.
///
/// Ids are only meaningful to the forest that issued them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId(pub(crate) usize);

/// The kind label of a debug-info node.
///
/// The variants cover every tag this crate interprets; any other
/// `DW_TAG_*` label is carried in `Other` so that unfamiliar producers
/// still build a complete tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Tag {
    CompileUnit,
    Variable,
    Subprogram,
    BaseType,
    PointerType,
    ConstType,
    VolatileType,
    StructureType,
    UnionType,
    EnumerationType,
    Enumerator,
    Typedef,
    ArrayType,
    SubrangeType,
    Member,
    FormalParameter,
    Other(String),
}

impl Tag {
    pub fn from_label(label: &str) -> Self {
        match label {
            "DW_TAG_compile_unit" => Self::CompileUnit,
            "DW_TAG_variable" => Self::Variable,
            "DW_TAG_subprogram" => Self::Subprogram,
            "DW_TAG_base_type" => Self::BaseType,
            "DW_TAG_pointer_type" => Self::PointerType,
            "DW_TAG_const_type" => Self::ConstType,
            "DW_TAG_volatile_type" => Self::VolatileType,
            "DW_TAG_structure_type" => Self::StructureType,
            "DW_TAG_union_type" => Self::UnionType,
            "DW_TAG_enumeration_type" => Self::EnumerationType,
            "DW_TAG_enumerator" => Self::Enumerator,
            "DW_TAG_typedef" => Self::Typedef,
            "DW_TAG_array_type" => Self::ArrayType,
            "DW_TAG_subrange_type" => Self::SubrangeType,
            "DW_TAG_member" => Self::Member,
            "DW_TAG_formal_parameter" => Self::FormalParameter,
            other => Self::Other(other.to_string()),
        }
    }

    /// The label without its `DW_TAG_` prefix, for display.
    pub fn stripped(&self) -> &str {
        match self {
            Self::CompileUnit => "compile_unit",
            Self::Variable => "variable",
            Self::Subprogram => "subprogram",
            Self::BaseType => "base_type",
            Self::PointerType => "pointer_type",
            Self::ConstType => "const_type",
            Self::VolatileType => "volatile_type",
            Self::StructureType => "structure_type",
            Self::UnionType => "union_type",
            Self::EnumerationType => "enumeration_type",
            Self::Enumerator => "enumerator",
            Self::Typedef => "typedef",
            Self::ArrayType => "array_type",
            Self::SubrangeType => "subrange_type",
            Self::Member => "member",
            Self::FormalParameter => "formal_parameter",
            Self::Other(label) => label.strip_prefix("DW_TAG_").unwrap_or(label),
        }
    }
}

/// The kinds of attribute this crate decodes specially. Everything else is
/// stored verbatim under `Other`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum AttrKind {
    Name,
    Type,
    Specification,
    UpperBound,
    ConstValue,
    Location,
    DataMemberLocation,
    Other(String),
}

impl AttrKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "DW_AT_name" => Self::Name,
            "DW_AT_type" => Self::Type,
            "DW_AT_specification" => Self::Specification,
            "DW_AT_upper_bound" => Self::UpperBound,
            "DW_AT_const_value" => Self::ConstValue,
            "DW_AT_location" => Self::Location,
            "DW_AT_data_member_location" => Self::DataMemberLocation,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A decoded attribute value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttrValue {
    /// A reference to an ident within the enclosing scope.
    Ref(u64),
    /// A plain integer (upper bounds, constant values, member offsets).
    Int(i64),
    /// A decoded address operand.
    Addr(u64),
    /// Raw text, for everything without a decode rule and for values that
    /// failed their rule.
    Text(String),
}

/// The interpreted `value` of a node. Variables carry their address,
/// enumerators and other constants carry their constant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ObjectValue {
    Address(u64),
    Const(i64),
}

impl ObjectValue {
    pub fn address(self) -> Option<u64> {
        match self {
            Self::Address(a) => Some(a),
            Self::Const(_) => None,
        }
    }

    pub fn const_value(self) -> Option<i64> {
        match self {
            Self::Const(c) => Some(c),
            Self::Address(_) => None,
        }
    }
}

/// One declaration/type/scope node.
#[derive(Clone, Debug)]
pub struct DebugObject {
    /// Kind of node.
    pub tag: Tag,
    /// Nesting depth as given by the stream; 0 for compile units.
    pub level: u32,
    /// Stream-local reference id. 0 means the node cannot be referenced.
    pub ident: u64,
    /// Name, or empty if the node has none.
    pub name: String,
    /// For compile units, the last path segment of `name`. Empty otherwise.
    pub basename: String,
    /// Interpreted value, where an attribute supplied one.
    pub value: Option<ObjectValue>,
    attributes: IndexMap<AttrKind, AttrValue>,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
    /// ident -> position in `children`, for children with ident > 0.
    /// Idents are unique only within this scope.
    reference_index: BTreeMap<u64, usize>,
    /// Link from a declaration to the definition that names it via a
    /// specification attribute. Resolved once, within this node's scope
    /// only, after all of the scope's children are read.
    specification: Option<ObjectId>,
}

impl DebugObject {
    fn new(tag: Tag, level: u32, ident: u64, parent: Option<ObjectId>) -> Self {
        Self {
            tag,
            level,
            ident,
            name: String::new(),
            basename: String::new(),
            value: None,
            attributes: IndexMap::new(),
            parent,
            children: Vec::new(),
            reference_index: BTreeMap::new(),
            specification: None,
        }
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    pub fn specification(&self) -> Option<ObjectId> {
        self.specification
    }

    /// Looks up an attribute by kind.
    pub fn attr(&self, kind: &AttrKind) -> Option<&AttrValue> {
        self.attributes.get(kind)
    }

    /// All attributes, in stream order.
    pub fn attributes(&self) -> impl Iterator<Item = (&AttrKind, &AttrValue)> {
        self.attributes.iter()
    }

    /// The address this node resolves to, if its value is one.
    pub fn address(&self) -> Option<u64> {
        self.value.and_then(ObjectValue::address)
    }

    /// Decodes one attribute per the decode table and stores it. A few
    /// kinds have side effects on `name` and `value`.
    fn add_attr(&mut self, name: &str, raw: &str) {
        let kind = AttrKind::from_name(name);
        let value = match &kind {
            AttrKind::Type | AttrKind::Specification => {
                // Raw form is a bracketed hex offset: `<0x2d>`.
                let inner = raw.trim_matches(|c| c == '<' || c == '>');
                match parse_hex(inner) {
                    Some(r) => AttrValue::Ref(r),
                    None => AttrValue::Text(raw.to_string()),
                }
            }
            AttrKind::UpperBound => match raw.trim().parse::<i64>() {
                Ok(n) => AttrValue::Int(n),
                Err(_) => AttrValue::Text(raw.to_string()),
            },
            AttrKind::ConstValue => match raw.trim().parse::<i64>() {
                Ok(n) => {
                    self.value = Some(ObjectValue::Const(n));
                    AttrValue::Int(n)
                }
                Err(_) => AttrValue::Text(raw.to_string()),
            },
            AttrKind::Name => {
                if self.tag == Tag::CompileUnit {
                    // The name is the source filename; normalize to
                    // forward slashes and keep the last segment around.
                    self.name = raw.replace('\\', "/");
                    self.basename = self
                        .name
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_string();
                } else {
                    self.name = raw.to_string();
                }
                AttrValue::Text(raw.to_string())
            }
            AttrKind::Location => {
                // A location that is a plain address operation looks like
                // `9 byte block: 3 40 10 60 0 0 0 0 0  (DW_OP_addr: 601040)`.
                let fields: Vec<&str> = raw.split_whitespace().collect();
                match fields.as_slice() {
                    [.., op, operand] if *op == "(DW_OP_addr:" => {
                        match parse_hex(operand.trim_end_matches(')')) {
                            Some(a) => {
                                self.value = Some(ObjectValue::Address(a));
                                AttrValue::Addr(a)
                            }
                            None => AttrValue::Text(raw.to_string()),
                        }
                    }
                    _ => AttrValue::Text(raw.to_string()),
                }
            }
            AttrKind::DataMemberLocation => {
                // Either a bare byte offset or a DW_OP_plus_uconst block.
                let fields: Vec<&str> = raw.split_whitespace().collect();
                match fields.as_slice() {
                    [n] => match n.parse::<i64>() {
                        Ok(n) => AttrValue::Int(n),
                        Err(_) => AttrValue::Text(raw.to_string()),
                    },
                    [.., op, operand] if *op == "(DW_OP_plus_uconst:" => {
                        match operand.trim_end_matches(')').parse::<i64>() {
                            Ok(n) => AttrValue::Int(n),
                            Err(_) => AttrValue::Text(raw.to_string()),
                        }
                    }
                    _ => AttrValue::Text(raw.to_string()),
                }
            }
            AttrKind::Other(_) => AttrValue::Text(raw.to_string()),
        };
        self.attributes.insert(kind, value);
    }
}

fn parse_hex(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

/// The object tree: compile units and everything beneath them.
///
/// Built once from a record stream, immutable afterwards.
#[derive(Clone, Debug, Default)]
pub struct DebugInfoForest {
    nodes: Vec<DebugObject>,
    roots: Vec<ObjectId>,
}

impl DebugInfoForest {
    /// Constructs the forest from a debug-info record stream.
    ///
    /// Fails with `Error::MalformedStream` if an object does not begin
    /// with a tag-start record.
    pub fn build(
        records: impl IntoIterator<Item = DebugRecord>,
    ) -> Result<Self, Error> {
        let mut forest = Self::default();
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let root = forest.read_object(&mut records, None)?;
            forest.roots.push(root);
        }
        Ok(forest)
    }

    /// Reads one object: its tag-start record, its attributes, then its
    /// children, which continue until end-of-stream or a tag-start at the
    /// same or a shallower level.
    fn read_object(
        &mut self,
        records: &mut Peekable<impl Iterator<Item = DebugRecord>>,
        parent: Option<ObjectId>,
    ) -> Result<ObjectId, Error> {
        let (level, ident, tag) = match records.next() {
            Some(DebugRecord::TagStart { level, ident, tag }) => {
                (level, ident, tag)
            }
            Some(DebugRecord::Attribute { name, .. }) => {
                return Err(Error::MalformedStream(format!(
                    "attribute {} where a tag start was required",
                    name
                )));
            }
            None => {
                return Err(Error::MalformedStream(
                    "stream ended where a tag start was required".to_string(),
                ));
            }
        };

        let id = ObjectId(self.nodes.len());
        self.nodes
            .push(DebugObject::new(Tag::from_label(&tag), level, ident, parent));

        while let Some(DebugRecord::Attribute { .. }) = records.peek() {
            let Some(DebugRecord::Attribute { name, value }) = records.next()
            else {
                unreachable!()
            };
            self.nodes[id.0].add_attr(&name, &value);
        }

        loop {
            match records.peek() {
                None => break,
                Some(DebugRecord::TagStart { level: l, .. }) if *l <= level => {
                    break
                }
                Some(DebugRecord::TagStart { .. }) => {
                    let child = self.read_object(records, Some(id))?;
                    let child_ident = self.nodes[child.0].ident;
                    let node = &mut self.nodes[id.0];
                    if child_ident > 0 {
                        node.reference_index
                            .insert(child_ident, node.children.len());
                    }
                    node.children.push(child);
                }
                Some(DebugRecord::Attribute { .. }) => {
                    // Attributes directly after a subtree belong to nobody.
                    let Some(DebugRecord::Attribute { name, .. }) =
                        records.next()
                    else {
                        unreachable!()
                    };
                    return Err(Error::MalformedStream(format!(
                        "stray attribute {} after a completed object",
                        name
                    )));
                }
            }
        }

        self.link_specifications(id);
        Ok(id)
    }

    /// Links `specification` back-references among the direct children of
    /// `scope`: a child that names another via a specification attribute
    /// becomes the referenced child's definition. Unresolvable references
    /// are left unlinked.
    fn link_specifications(&mut self, scope: ObjectId) {
        let children = self.nodes[scope.0].children.clone();
        for child in children {
            let spec_ref = match self.nodes[child.0].attr(&AttrKind::Specification)
            {
                Some(&AttrValue::Ref(r)) => r,
                _ => continue,
            };
            if let Some(declared) = self.child_by_ref(scope, spec_ref) {
                self.nodes[declared.0].specification = Some(child);
            }
        }
    }

    pub fn node(&self, id: ObjectId) -> &DebugObject {
        &self.nodes[id.0]
    }

    /// The top-level objects, i.e. the compile units, in stream order.
    pub fn roots(&self) -> &[ObjectId] {
        &self.roots
    }

    /// Resolves an ident through a scope's reference index to one of its
    /// children.
    pub fn child_by_ref(&self, scope: ObjectId, ident: u64) -> Option<ObjectId> {
        let node = &self.nodes[scope.0];
        let &pos = node.reference_index.get(&ident)?;
        node.children.get(pos).copied()
    }

    /// Finds the first direct child of any compile unit with the given
    /// name.
    pub fn find_object(&self, name: &str) -> Option<ObjectId> {
        for &root in &self.roots {
            for &child in &self.nodes[root.0].children {
                if self.nodes[child.0].name == name {
                    return Some(child);
                }
            }
        }
        None
    }

    /// Finds the defining occurrence of a name: prefers a match carrying a
    /// resolved specification link or a location attribute over a bare
    /// name match. Falls back to the first bare match.
    pub fn find_definition(&self, name: &str) -> Option<ObjectId> {
        let mut bare = None;
        for &root in &self.roots {
            for &child in &self.nodes[root.0].children {
                let node = &self.nodes[child.0];
                if node.name != name {
                    continue;
                }
                if bare.is_none() {
                    bare = Some(child);
                }
                if node.specification.is_some()
                    || node.attr(&AttrKind::Location).is_some()
                {
                    return Some(child);
                }
            }
        }
        bare
    }

    /// Number of elements declared by an array-type node: one more than
    /// the upper bound of its first subrange child. `None` if the node is
    /// not an array type or declares no bound.
    pub fn element_count(&self, id: ObjectId) -> Option<u64> {
        let node = &self.nodes[id.0];
        if node.tag != Tag::ArrayType {
            return None;
        }
        node.children.iter().find_map(|&c| {
            let child = &self.nodes[c.0];
            if child.tag != Tag::SubrangeType {
                return None;
            }
            match child.attr(&AttrKind::UpperBound) {
                Some(&AttrValue::Int(n)) => Some((n + 1) as u64),
                _ => None,
            }
        })
    }

    /// The enumerator children of an enumeration-type node, in declaration
    /// order. Empty for anything else.
    pub fn enumerators(
        &self,
        id: ObjectId,
    ) -> impl Iterator<Item = ObjectId> + '_ {
        let wanted = self.nodes[id.0].tag == Tag::EnumerationType;
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |&c| wanted && self.nodes[c.0].tag == Tag::Enumerator)
    }

    /// The enumerator name for a given value, if `id` is an
    /// enumeration-type node that declares it.
    pub fn enumerator_name(&self, id: ObjectId, value: i64) -> Option<&str> {
        self.enumerators(id).find_map(|c| {
            let node = &self.nodes[c.0];
            if node.value == Some(ObjectValue::Const(value)) {
                Some(node.name.as_str())
            } else {
                None
            }
        })
    }

    /// The member children of a structure- or union-type node, in
    /// declaration order. Empty for anything else.
    pub fn members(&self, id: ObjectId) -> impl Iterator<Item = ObjectId> + '_ {
        let wanted = matches!(
            self.nodes[id.0].tag,
            Tag::StructureType | Tag::UnionType
        );
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |&c| wanted && self.nodes[c.0].tag == Tag::Member)
    }
}
