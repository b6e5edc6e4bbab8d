use std::fmt;

use crate::dict::Dict;
use crate::error::{Result, ValueError};
use crate::list::List;
use crate::value::{Value, ValueType};

/// Operator of a collection node. Numeric ids are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionType {
    Reference,
    Universe,
    Union,
    Intersection,
    Complement,
    Has,
    Match,
    Token,
    Equals,
    NotEqual,
    Smaller,
    SmallerEq,
    Greater,
    GreaterEq,
    Order,
    Limit,
    Mediaset,
    Idlist,
}

impl CollectionType {
    const ALL: [CollectionType; 18] = [
        CollectionType::Reference,
        CollectionType::Universe,
        CollectionType::Union,
        CollectionType::Intersection,
        CollectionType::Complement,
        CollectionType::Has,
        CollectionType::Match,
        CollectionType::Token,
        CollectionType::Equals,
        CollectionType::NotEqual,
        CollectionType::Smaller,
        CollectionType::SmallerEq,
        CollectionType::Greater,
        CollectionType::GreaterEq,
        CollectionType::Order,
        CollectionType::Limit,
        CollectionType::Mediaset,
        CollectionType::Idlist,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            CollectionType::Reference => "reference",
            CollectionType::Universe => "universe",
            CollectionType::Union => "union",
            CollectionType::Intersection => "intersection",
            CollectionType::Complement => "complement",
            CollectionType::Has => "has",
            CollectionType::Match => "match",
            CollectionType::Token => "token",
            CollectionType::Equals => "equals",
            CollectionType::NotEqual => "notequal",
            CollectionType::Smaller => "smaller",
            CollectionType::SmallerEq => "smallereq",
            CollectionType::Greater => "greater",
            CollectionType::GreaterEq => "greatereq",
            CollectionType::Order => "order",
            CollectionType::Limit => "limit",
            CollectionType::Mediaset => "mediaset",
            CollectionType::Idlist => "idlist",
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A query-expression node: operator, string attributes, an id list and
/// child operands. Opaque to the runtime beyond its structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    kind: CollectionType,
    attributes: Dict,
    idlist: List,
    operands: List,
}

impl Collection {
    pub fn new(kind: CollectionType) -> Self {
        Self {
            kind,
            attributes: Dict::new(),
            idlist: List::restricted_unchecked(ValueType::Int64),
            operands: List::restricted_unchecked(ValueType::Collection),
        }
    }

    /// Assemble a collection from decoded parts, enforcing the element types
    /// of each part.
    pub fn from_parts(
        kind: CollectionType,
        attributes: Dict,
        mut idlist: List,
        mut operands: List,
    ) -> Result<Self> {
        if let Some((key, value)) = attributes
            .iter()
            .find(|(_, v)| v.kind() != ValueType::String)
        {
            return Err(ValueError::InvalidCollection(format!(
                "attribute {key:?} is a {}",
                value.kind()
            )));
        }
        idlist
            .restrict_to(ValueType::Int64)
            .map_err(|err| ValueError::InvalidCollection(format!("idlist: {err}")))?;
        operands
            .restrict_to(ValueType::Collection)
            .map_err(|err| ValueError::InvalidCollection(format!("operands: {err}")))?;
        if kind == CollectionType::Reference && !operands.is_empty() {
            return Err(ValueError::InvalidCollection(
                "reference collections take no operands".into(),
            ));
        }
        Ok(Self {
            kind,
            attributes,
            idlist,
            operands,
        })
    }

    pub fn kind(&self) -> CollectionType {
        self.kind
    }

    /// Change the operator. A collection with operands cannot become a
    /// reference.
    pub fn set_kind(&mut self, kind: CollectionType) -> Result<()> {
        if kind == CollectionType::Reference && !self.operands.is_empty() {
            return Err(ValueError::InvalidCollection(
                "reference collections take no operands".into(),
            ));
        }
        self.kind = kind;
        Ok(())
    }

    pub fn attributes(&self) -> &Dict {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str().ok())
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl AsRef<[u8]>) {
        self.attributes.set(key, Value::string(value));
    }

    pub fn remove_attribute(&mut self, key: &str) -> bool {
        self.attributes.remove(key).is_some()
    }

    pub fn idlist(&self) -> &List {
        &self.idlist
    }

    pub fn idlist_len(&self) -> usize {
        self.idlist.len()
    }

    pub fn idlist_get(&self, index: i64) -> Result<i64> {
        self.idlist.get(index)?.as_int()
    }

    pub fn idlist_append(&mut self, id: i64) -> Result<()> {
        self.idlist.append(Value::int(id))
    }

    pub fn idlist_insert(&mut self, index: i64, id: i64) -> Result<()> {
        self.idlist.insert(index, Value::int(id))
    }

    pub fn idlist_remove(&mut self, index: i64) -> Result<i64> {
        self.idlist.remove(index)?.as_int()
    }

    pub fn idlist_clear(&mut self) {
        self.idlist.clear();
    }

    pub fn operands(&self) -> &List {
        &self.operands
    }

    pub fn add_operand(&mut self, operand: Collection) -> Result<()> {
        if self.kind == CollectionType::Reference {
            return Err(ValueError::InvalidCollection(
                "reference collections take no operands".into(),
            ));
        }
        self.operands.append(Value::collection(operand))
    }

    /// Remove the first operand structurally equal to `operand`.
    pub fn remove_operand(&mut self, operand: &Collection) -> bool {
        let found = self
            .operands
            .iter()
            .position(|v| v.as_collection().is_ok_and(|c| c == operand));
        match found {
            Some(pos) => self.operands.remove(pos as i64).is_ok(),
            None => false,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.attributes.is_empty() {
            let mut attrs: Vec<_> = self.attributes.iter().collect();
            attrs.sort_by(|a, b| a.0.cmp(b.0));
            f.write_str("(")?;
            for (i, (key, value)) in attrs.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            f.write_str(")")?;
        }
        if !self.idlist.is_empty() {
            f.write_str("#[")?;
            for (i, id) in self.idlist.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{id}")?;
            }
            f.write_str("]")?;
        }
        if !self.operands.is_empty() {
            f.write_str("[")?;
            for (i, op) in self.operands.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{op}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}
