//! Function catalogue
//!
//! Described external operations, independent of the organization tree.
//! Function sets reference these entries by identifier; a stale reference
//! to a deleted entry is tolerated and filtered out at resolution time.

use crate::error::{Fault, Reason};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::str::FromStr;

/// The catalogue document: a flat list of function descriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalogue {
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
}

/// One described external operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
    /// Invocation method, e.g. `GET` or `POST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Invocation target. May carry a query string; `callpath` strips it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Queryable properties of a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncProp {
    Id,
    Name,
    Title,
    Description,
    Callpath,
    Method,
    Contenttype,
}

impl FromStr for FuncProp {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "name" => Ok(Self::Name),
            "title" => Ok(Self::Title),
            "description" => Ok(Self::Description),
            "callpath" => Ok(Self::Callpath),
            "method" => Ok(Self::Method),
            "contenttype" => Ok(Self::Contenttype),
            other => Err(Fault::new(
                Reason::WrongFormat,
                format!("property {other:?} is unknown"),
            )
            .with("bad_value", other)),
        }
    }
}

impl FuncProp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Title => "title",
            Self::Description => "description",
            Self::Callpath => "callpath",
            Self::Method => "method",
            Self::Contenttype => "contenttype",
        }
    }

    /// Extract this property's value from an entry, when present.
    pub fn value_of(&self, def: &FunctionDef) -> Option<String> {
        match self {
            Self::Id => Some(def.id.clone()),
            Self::Name => def.name.clone(),
            Self::Title => def.title.clone(),
            Self::Description => def.descr.clone(),
            Self::Callpath => def
                .call_url
                .as_deref()
                .map(|u| u.split('?').next().unwrap_or_default().to_string()),
            Self::Method => def.method.clone(),
            Self::Contenttype => def.content_type.clone(),
        }
    }

    /// Parse a comma-separated property list.
    pub fn parse_list(props: &str) -> Result<Vec<Self>, Fault> {
        props.split(',').map(|p| p.trim().parse()).collect()
    }
}

/// Tag-set algebra methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Set,
    Or,
    And,
    Minus,
}

impl FromStr for TagOp {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SET" => Ok(Self::Set),
            "OR" => Ok(Self::Or),
            "AND" => Ok(Self::And),
            "MINUS" => Ok(Self::Minus),
            other => Err(Fault::new(
                Reason::WrongFormat,
                format!("tagset method {other:?} is unapplicable"),
            )
            .with("bad_value", other)),
        }
    }
}

impl TagOp {
    /// The resulting tag set; never mutates the entry.
    pub fn apply(&self, old: &BTreeSet<String>, input: &BTreeSet<String>) -> BTreeSet<String> {
        match self {
            Self::Set => input.clone(),
            Self::Or => old.union(input).cloned().collect(),
            Self::And => old.intersection(input).cloned().collect(),
            Self::Minus => old.difference(input).cloned().collect(),
        }
    }
}

impl Catalogue {
    pub fn function(&self, id: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn function_mut(&mut self, id: &str) -> Option<&mut FunctionDef> {
        self.functions.iter_mut().find(|f| f.id == id)
    }

    /// All catalogued function identifiers.
    pub fn known_ids(&self) -> BTreeSet<String> {
        self.functions.iter().map(|f| f.id.clone()).collect()
    }

    /// Sorted, deduplicated values of one property across the catalogue.
    pub fn property_values(&self, prop: FuncProp) -> Vec<String> {
        let set: BTreeSet<String> = self
            .functions
            .iter()
            .filter_map(|f| prop.value_of(f))
            .collect();
        set.into_iter().collect()
    }

    /// Selected properties of one entry; absent properties are omitted.
    pub fn review_one(&self, props: &[FuncProp], def: &FunctionDef) -> Map<String, Value> {
        props
            .iter()
            .filter_map(|p| {
                p.value_of(def)
                    .map(|v| (p.as_str().to_string(), Value::String(v)))
            })
            .collect()
    }

    /// Insert or replace an entry. Returns the replaced definition, if any.
    pub fn upsert(&mut self, def: FunctionDef) -> Option<FunctionDef> {
        match self.functions.iter_mut().find(|f| f.id == def.id) {
            Some(slot) => Some(std::mem::replace(slot, def)),
            None => {
                self.functions.push(def);
                None
            }
        }
    }

    /// Remove an entry, returning it.
    pub fn remove(&mut self, id: &str) -> Option<FunctionDef> {
        let pos = self.functions.iter().position(|f| f.id == id)?;
        Some(self.functions.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Catalogue {
        Catalogue {
            functions: vec![
                FunctionDef {
                    id: "weather".into(),
                    name: Some("Weather".into()),
                    title: Some("Weather report".into()),
                    descr: None,
                    method: Some("GET".into()),
                    call_url: Some("https://api.example/weather?units=si".into()),
                    content_type: None,
                    tags: ["climate".to_string()].into(),
                },
                FunctionDef {
                    id: "mail".into(),
                    name: Some("Mail".into()),
                    title: None,
                    descr: Some("Send mail".into()),
                    method: Some("POST".into()),
                    call_url: Some("https://api.example/mail".into()),
                    content_type: Some("application/json".into()),
                    tags: BTreeSet::new(),
                },
            ],
        }
    }

    #[test]
    fn callpath_strips_query_string() {
        let cat = sample();
        let def = cat.function("weather").unwrap();
        assert_eq!(
            FuncProp::Callpath.value_of(def).unwrap(),
            "https://api.example/weather"
        );
    }

    #[test]
    fn unknown_property_is_a_fault() {
        let err = "color".parse::<FuncProp>().unwrap_err();
        assert_eq!(err.reason, Reason::WrongFormat);
        assert!(FuncProp::parse_list("id,name,color").is_err());
    }

    #[test]
    fn review_omits_absent_properties() {
        let cat = sample();
        let props = FuncProp::parse_list("id,title,contenttype").unwrap();
        let map = cat.review_one(&props, cat.function("mail").unwrap());
        assert_eq!(map["id"], serde_json::json!("mail"));
        assert!(!map.contains_key("title"));
        assert_eq!(map["contenttype"], serde_json::json!("application/json"));
    }

    #[test]
    fn upsert_reports_replacement() {
        let mut cat = sample();
        let replaced = cat.upsert(FunctionDef {
            id: "weather".into(),
            name: Some("Weather v2".into()),
            title: None,
            descr: None,
            method: None,
            call_url: None,
            content_type: None,
            tags: BTreeSet::new(),
        });
        assert_eq!(replaced.unwrap().name.as_deref(), Some("Weather"));
        assert_eq!(
            cat.function("weather").unwrap().name.as_deref(),
            Some("Weather v2")
        );
    }

    #[test]
    fn tag_algebra() {
        let old: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let input: BTreeSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        let get = |op: TagOp| {
            op.apply(&old, &input)
                .into_iter()
                .collect::<Vec<_>>()
                .join(",")
        };
        assert_eq!(get(TagOp::Set), "b,c");
        assert_eq!(get(TagOp::Or), "a,b,c");
        assert_eq!(get(TagOp::And), "b");
        assert_eq!(get(TagOp::Minus), "a");
        assert!("XOR".parse::<TagOp>().is_err());
    }
}
