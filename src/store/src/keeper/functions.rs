//! Catalogue administration: function definitions and their tag sets.

use super::Keeper;
use crate::catalogue::{FuncProp, FunctionDef, TagOp};
use crate::error::{Fault, Reason, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::info;

/// Values of one property across the catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionList {
    pub property: String,
    pub values: Vec<String>,
}

/// Outcome of a definition upload.
#[derive(Debug, Clone, Serialize)]
pub struct PutOutcome {
    pub function_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_definition: Option<FunctionDef>,
}

/// Outcome of a definition removal.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    pub function_id: String,
    pub status: &'static str,
    pub old_definition: FunctionDef,
}

/// Tag set left on a function after an algebra step.
#[derive(Debug, Clone, Serialize)]
pub struct TagsetOutcome {
    pub tagset: BTreeSet<String>,
}

impl Keeper {
    /// Sorted, deduplicated values of one property across the catalogue.
    pub fn list_functions(&self, prop: &str) -> Result<FunctionList> {
        let parsed: FuncProp = prop.parse().map_err(Fault::from)?;
        let catalogue = self.docs().catalogue.read();
        Ok(FunctionList {
            property: prop.to_string(),
            values: catalogue.property_values(parsed),
        })
    }

    /// Selected properties of every function, or of one by identifier.
    pub fn review_functions(
        &self,
        props: &str,
        function_id: Option<&str>,
    ) -> Result<Vec<Map<String, Value>>> {
        let props = FuncProp::parse_list(props)?;
        let catalogue = self.docs().catalogue.read();
        match function_id {
            Some(id) => {
                let def = catalogue.function(id).ok_or_else(|| {
                    Fault::new(
                        Reason::FunctionUnknown,
                        format!("function '{id}' is not described in the catalogue"),
                    )
                    .with("bad_value", id)
                })?;
                Ok(vec![catalogue.review_one(&props, def)])
            }
            None => Ok(catalogue
                .functions
                .iter()
                .map(|def| catalogue.review_one(&props, def))
                .collect()),
        }
    }

    /// Full stored definition of one function.
    pub fn function_def(&self, func: &str) -> Result<FunctionDef> {
        let catalogue = self.docs().catalogue.read();
        catalogue.function(func).cloned().ok_or_else(|| {
            Fault::new(
                Reason::FunctionUnknown,
                format!("function '{func}' is unknown"),
            )
            .with("bad_value", func)
            .into()
        })
    }

    /// Upload one definition as JSON text; replaces by identifier.
    ///
    /// A payload that does not parse, or parses without an `id`, is
    /// `WRONG-DATA`. The previous definition rides back on replacement.
    pub fn put_function(&self, body: &str) -> Result<PutOutcome> {
        let def: FunctionDef = serde_json::from_str(body).map_err(|err| {
            Fault::new(
                Reason::WrongData,
                "cannot parse the function description as JSON",
            )
            .with("details", err.to_string())
        })?;
        if def.id.is_empty() {
            return Err(Fault::new(
                Reason::WrongData,
                "function description has an empty 'id'",
            )
            .into());
        }

        let outcome;
        {
            let mut catalogue = self.docs().catalogue.write();
            let function_id = def.id.clone();
            let replaced = catalogue.upsert(def);
            info!(
                function = %function_id,
                status = if replaced.is_some() { "REPLACED" } else { "APPENDED" },
                "function definition stored"
            );
            outcome = PutOutcome {
                function_id,
                status: if replaced.is_some() { "REPLACED" } else { "APPENDED" },
                old_definition: replaced,
            };
        }
        self.mark_dirty()?;
        Ok(outcome)
    }

    pub fn delete_function(&self, func: &str) -> Result<RemoveOutcome> {
        let outcome;
        {
            let mut catalogue = self.docs().catalogue.write();
            let removed = catalogue.remove(func).ok_or_else(|| {
                Fault::new(
                    Reason::FunctionUnknown,
                    format!("function '{func}' is unknown"),
                )
                .with("bad_value", func)
            })?;
            info!(function = func, "function definition deleted");
            outcome = RemoveOutcome {
                function_id: func.to_string(),
                status: "DELETED",
                old_definition: removed,
            };
        }
        self.mark_dirty()?;
        Ok(outcome)
    }

    /// Apply a tag-set algebra step to one function.
    ///
    /// `read_only` computes the resulting set without storing it.
    pub fn modify_tagset(
        &self,
        func: &str,
        method: &str,
        tags: &BTreeSet<String>,
        read_only: bool,
    ) -> Result<TagsetOutcome> {
        let op: TagOp = method.parse().map_err(Fault::from)?;
        let outcome;
        {
            let mut catalogue = self.docs().catalogue.write();
            let def = catalogue.function_mut(func).ok_or_else(|| {
                Fault::new(
                    Reason::FunctionUnknown,
                    format!("function '{func}' is unknown"),
                )
                .with("bad_value", func)
            })?;
            let new_tags = op.apply(&def.tags, tags);
            if !read_only {
                def.tags = new_tags.clone();
            }
            outcome = TagsetOutcome { tagset: new_tags };
        }
        if !read_only {
            self.mark_dirty()?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::testutil::seeded_keeper;

    fn reason_of(err: crate::error::StoreError) -> Reason {
        err.fault().unwrap().reason
    }

    #[test]
    fn put_reports_append_then_replace() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());

        let first = keeper
            .put_function(r#"{"id": "f-a", "name": "Alpha"}"#)
            .unwrap();
        assert_eq!(first.status, "APPENDED");
        assert!(first.old_definition.is_none());

        let second = keeper
            .put_function(r#"{"id": "f-a", "name": "Alpha v2"}"#)
            .unwrap();
        assert_eq!(second.status, "REPLACED");
        assert_eq!(
            second.old_definition.unwrap().name.as_deref(),
            Some("Alpha")
        );
    }

    #[test]
    fn malformed_payloads_are_wrong_data() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        let err = keeper.put_function("{ not json").unwrap_err();
        assert_eq!(reason_of(err), Reason::WrongData);
        let err = keeper.put_function(r#"{"name": "no id"}"#).unwrap_err();
        assert_eq!(reason_of(err), Reason::WrongData);
        let err = keeper.put_function(r#"{"id": ""}"#).unwrap_err();
        assert_eq!(reason_of(err), Reason::WrongData);
    }

    #[test]
    fn delete_returns_the_old_definition() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper
            .put_function(r#"{"id": "f-a", "name": "Alpha"}"#)
            .unwrap();

        let removed = keeper.delete_function("f-a").unwrap();
        assert_eq!(removed.status, "DELETED");
        assert_eq!(removed.old_definition.name.as_deref(), Some("Alpha"));

        let err = keeper.delete_function("f-a").unwrap_err();
        assert_eq!(reason_of(err), Reason::FunctionUnknown);
    }

    #[test]
    fn listing_and_review() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper
            .put_function(r#"{"id": "f-a", "method": "GET", "call_url": "https://x/run?q=1"}"#)
            .unwrap();
        keeper
            .put_function(r#"{"id": "f-b", "method": "POST"}"#)
            .unwrap();

        let list = keeper.list_functions("method").unwrap();
        assert_eq!(list.values, vec!["GET", "POST"]);
        assert!(keeper.list_functions("color").is_err());

        let review = keeper
            .review_functions("id,callpath", Some("f-a"))
            .unwrap();
        assert_eq!(review[0]["callpath"], serde_json::json!("https://x/run"));

        let err = keeper.review_functions("id", Some("f-z")).unwrap_err();
        assert_eq!(reason_of(err), Reason::FunctionUnknown);
    }

    #[test]
    fn tagset_algebra_with_test_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper
            .put_function(r#"{"id": "f-a", "tags": ["a", "b"]}"#)
            .unwrap();

        let tags: BTreeSet<String> = ["b".to_string(), "c".to_string()].into();
        let trial = keeper.modify_tagset("f-a", "AND", &tags, true).unwrap();
        assert_eq!(trial.tagset, ["b".to_string()].into());
        // read-only: the stored tags are untouched
        assert_eq!(
            keeper.function_def("f-a").unwrap().tags,
            ["a".to_string(), "b".to_string()].into()
        );

        let applied = keeper.modify_tagset("f-a", "MINUS", &tags, false).unwrap();
        assert_eq!(applied.tagset, ["a".to_string()].into());
        assert_eq!(keeper.function_def("f-a").unwrap().tags, applied.tagset);

        let err = keeper.modify_tagset("f-a", "XOR", &tags, false).unwrap_err();
        assert_eq!(reason_of(err), Reason::WrongFormat);
    }
}
