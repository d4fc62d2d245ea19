//! Type-chain classification.
//!
//! Deciding whether a declaration is ultimately a pointer, a composite, an
//! enumeration or an array is the same bounded walk in every case: follow
//! type-reference edges from the declaration, resolving each reference in
//! the scope of the declaration's parent, until a tag answers the
//! question. The four public predicates share one walk with different stop
//! conditions, so they cannot drift apart in termination behavior.

use std::collections::BTreeSet;

use crate::tree::{AttrKind, AttrValue, DebugInfoForest, ObjectId, Tag};

/// Answer for `array_element_count`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArrayElements {
    /// An array with a declared bound of this many elements.
    Count(u64),
    /// An array type that declares no bound.
    UnknownCount,
    /// Not an array at all.
    NotArray,
}

/// Per-node decision of a classification walk.
enum Verdict {
    /// The tag answers the question positively; stop here.
    Hit,
    /// The tag answers the question negatively; stop here.
    Miss,
    /// Keep following the type chain.
    Chase,
}

/// Outcome of a walk.
enum Chain {
    /// The node the walk stopped on with a positive answer.
    Terminal(ObjectId),
    /// A negative answer.
    Rejected,
    /// The chain could not be followed to an answer: a node without a
    /// type reference, a reference that does not resolve in scope, or a
    /// cycle.
    Lost,
}

impl DebugInfoForest {
    /// The shared walk. `scope` is the object whose reference index
    /// resolves every type reference on the chain; the public predicates
    /// pass the start object's parent.
    fn walk_type_chain(
        &self,
        start: ObjectId,
        scope: ObjectId,
        decide: impl Fn(&Tag) -> Verdict,
    ) -> Chain {
        let mut seen = BTreeSet::new();
        let mut current = start;
        loop {
            if !seen.insert(current) {
                // Cyclic reference graph; there is no answer down here.
                return Chain::Lost;
            }
            match decide(&self.node(current).tag) {
                Verdict::Hit => return Chain::Terminal(current),
                Verdict::Miss => return Chain::Rejected,
                Verdict::Chase => {}
            }
            let reference = match self.node(current).attr(&AttrKind::Type) {
                Some(&AttrValue::Ref(r)) => r,
                _ => return Chain::Lost,
            };
            match self.child_by_ref(scope, reference) {
                Some(next) => current = next,
                None => return Chain::Lost,
            }
        }
    }

    fn classify(
        &self,
        start: ObjectId,
        decide: impl Fn(&Tag) -> Verdict,
    ) -> Chain {
        // An object with no parent is a compile unit, not a data type.
        let Some(scope) = self.node(start).parent() else {
            return Chain::Lost;
        };
        self.walk_type_chain(start, scope, decide)
    }

    /// Whether the declaration's ultimate type is a pointer. `None` means
    /// the question cannot be answered from the tree.
    pub fn is_pointer(&self, start: ObjectId) -> Option<bool> {
        match self.classify(start, |t| match t {
            Tag::PointerType => Verdict::Hit,
            _ => Verdict::Chase,
        }) {
            Chain::Terminal(_) => Some(true),
            Chain::Rejected => Some(false),
            Chain::Lost => None,
        }
    }

    /// Whether the declaration's ultimate type is a struct or union. A
    /// pointer on the chain answers no: a pointer to a struct is not
    /// itself composite.
    pub fn is_composite(&self, start: ObjectId) -> Option<bool> {
        match self.classify(start, |t| match t {
            Tag::PointerType => Verdict::Miss,
            Tag::StructureType | Tag::UnionType => Verdict::Hit,
            _ => Verdict::Chase,
        }) {
            Chain::Terminal(_) => Some(true),
            Chain::Rejected => Some(false),
            Chain::Lost => None,
        }
    }

    /// Whether the declaration's ultimate type is an enumeration.
    pub fn is_enum(&self, start: ObjectId) -> Option<bool> {
        match self.classify(start, |t| match t {
            Tag::PointerType => Verdict::Miss,
            Tag::EnumerationType => Verdict::Hit,
            _ => Verdict::Chase,
        }) {
            Chain::Terminal(_) => Some(true),
            Chain::Rejected => Some(false),
            Chain::Lost => None,
        }
    }

    /// Whether the declaration's ultimate type is an array, and if so how
    /// many elements it declares.
    pub fn array_element_count(&self, start: ObjectId) -> Option<ArrayElements> {
        match self.classify(start, |t| match t {
            Tag::PointerType => Verdict::Miss,
            Tag::ArrayType => Verdict::Hit,
            _ => Verdict::Chase,
        }) {
            Chain::Terminal(ary) => Some(match self.element_count(ary) {
                Some(n) => ArrayElements::Count(n),
                None => ArrayElements::UnknownCount,
            }),
            Chain::Rejected => Some(ArrayElements::NotArray),
            Chain::Lost => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree::test::{attr, tag};

    // One compile unit: a struct, an enum, a couple of base and pointer
    // types, and variables declared against them.
    fn sample_forest() -> DebugInfoForest {
        DebugInfoForest::build(vec![
            tag(0, 0xb, "DW_TAG_compile_unit"),
            // types
            tag(1, 0x10, "DW_TAG_base_type"),
            attr("DW_AT_name", "int"),
            tag(1, 0x20, "DW_TAG_structure_type"),
            attr("DW_AT_name", "pair"),
            tag(2, 0x28, "DW_TAG_member"),
            tag(1, 0x30, "DW_TAG_enumeration_type"),
            tag(2, 0x38, "DW_TAG_enumerator"),
            attr("DW_AT_const_value", "0"),
            tag(1, 0x40, "DW_TAG_pointer_type"),
            attr("DW_AT_type", "<0x20>"),
            tag(1, 0x48, "DW_TAG_typedef"),
            attr("DW_AT_type", "<0x40>"),
            tag(1, 0x50, "DW_TAG_array_type"),
            attr("DW_AT_type", "<0x10>"),
            tag(2, 0x58, "DW_TAG_subrange_type"),
            attr("DW_AT_upper_bound", "9"),
            tag(1, 0x5c, "DW_TAG_array_type"),
            attr("DW_AT_type", "<0x10>"),
            // variables
            tag(1, 0x60, "DW_TAG_variable"),
            attr("DW_AT_name", "p"),
            attr("DW_AT_type", "<0x48>"),
            tag(1, 0x68, "DW_TAG_variable"),
            attr("DW_AT_name", "s"),
            attr("DW_AT_type", "<0x20>"),
            tag(1, 0x70, "DW_TAG_variable"),
            attr("DW_AT_name", "e"),
            attr("DW_AT_type", "<0x30>"),
            tag(1, 0x78, "DW_TAG_variable"),
            attr("DW_AT_name", "a"),
            attr("DW_AT_type", "<0x50>"),
            tag(1, 0x7c, "DW_TAG_variable"),
            attr("DW_AT_name", "b"),
            attr("DW_AT_type", "<0x5c>"),
            tag(1, 0x80, "DW_TAG_variable"),
            attr("DW_AT_name", "dangling"),
            attr("DW_AT_type", "<0x999>"),
        ])
        .unwrap()
    }

    #[test]
    fn pointer_through_typedef() {
        let f = sample_forest();
        let p = f.find_object("p").unwrap();
        assert_eq!(f.is_pointer(p), Some(true));
        // A pointer to a struct is not composite.
        assert_eq!(f.is_composite(p), Some(false));
        assert_eq!(f.is_enum(p), Some(false));
        assert_eq!(f.array_element_count(p), Some(ArrayElements::NotArray));
    }

    #[test]
    fn composite_and_enum() {
        let f = sample_forest();
        let s = f.find_object("s").unwrap();
        assert_eq!(f.is_composite(s), Some(true));
        let e = f.find_object("e").unwrap();
        assert_eq!(f.is_enum(e), Some(true));
    }

    #[test]
    fn array_counts() {
        let f = sample_forest();
        let a = f.find_object("a").unwrap();
        assert_eq!(f.array_element_count(a), Some(ArrayElements::Count(10)));
        let b = f.find_object("b").unwrap();
        assert_eq!(
            f.array_element_count(b),
            Some(ArrayElements::UnknownCount)
        );
    }

    #[test]
    fn unresolved_reference_is_indeterminate() {
        let f = sample_forest();
        let d = f.find_object("dangling").unwrap();
        assert_eq!(f.is_pointer(d), None);
        assert_eq!(f.is_composite(d), None);
        assert_eq!(f.array_element_count(d), None);
    }

    #[test]
    fn compile_unit_is_not_a_data_type() {
        let f = sample_forest();
        let cu = f.roots()[0];
        assert_eq!(f.is_pointer(cu), None);
        assert_eq!(f.is_enum(cu), None);
    }

    #[test]
    fn cyclic_chain_terminates() {
        // Two typedefs referencing each other.
        let f = DebugInfoForest::build(vec![
            tag(0, 0xb, "DW_TAG_compile_unit"),
            tag(1, 0x10, "DW_TAG_typedef"),
            attr("DW_AT_name", "a"),
            attr("DW_AT_type", "<0x18>"),
            tag(1, 0x18, "DW_TAG_typedef"),
            attr("DW_AT_name", "b"),
            attr("DW_AT_type", "<0x10>"),
        ])
        .unwrap();
        let a = f.find_object("a").unwrap();
        assert_eq!(f.is_pointer(a), None);
        assert_eq!(f.is_composite(a), None);
        assert_eq!(f.is_enum(a), None);
        assert_eq!(f.array_element_count(a), None);
    }
}
