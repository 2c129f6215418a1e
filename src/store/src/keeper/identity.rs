//! People: registration details, authentication, credential lifecycle.

use super::{require_operator, require_person, Keeper};
use crate::catalogue::FuncProp;
use crate::error::{Fault, Reason, Result};
use crate::ident::SafeIdent;
use crate::resolve;
use crate::tree::{ChangeStamp, Person};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Registration details returned to authentication callers.
#[derive(Debug, Clone, Serialize)]
pub struct RegDetails {
    pub secret_changed: i64,
    /// Zero when the secret never expires.
    pub secret_expiration: i64,
    pub readable_name: String,
    pub session_max: u32,
    pub created: (String, i64),
    pub change_history: Vec<ChangeStamp>,
    #[serde(flatten)]
    pub app: Option<AppView>,
}

/// Application-specific enrichment of the registration details.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AppView {
    /// The portal view: where the person sits and what they may call.
    Primary {
        for_application: String,
        branches: Vec<String>,
        positions: Vec<String>,
        func_groups: Vec<String>,
        functions: Vec<Map<String, Value>>,
        agents: Vec<String>,
    },
    /// The catalogue-browser view: funcsets expanded to function details.
    Secondary {
        for_application: String,
        funcsets: BTreeMap<String, FuncsetView>,
    },
    /// Any other application only learns it was named.
    Bare { for_application: String },
}

/// One funcset of the secondary view.
#[derive(Debug, Clone, Serialize)]
pub struct FuncsetView {
    pub name: String,
    pub functions: Vec<Map<String, Value>>,
}

/// Timestamps reported back from a credential write.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStamp {
    pub secret_changed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_expiration: Option<i64>,
}

/// Optional attributes of a create/change call.
#[derive(Debug, Clone, Default)]
pub struct UserOpts {
    /// Days until the new secret expires; `None` leaves it perpetual.
    pub secret_lifetime_days: Option<f64>,
    pub readable_name: String,
    pub session_max: Option<u32>,
}

impl Keeper {
    pub fn list_users(&self) -> Vec<String> {
        self.docs().universe.read().people.keys().cloned().collect()
    }

    /// Registration details for one person, optionally enriched for a
    /// named application.
    pub fn user_details(&self, user: &str, app: Option<&str>) -> Result<RegDetails> {
        let user = SafeIdent::new(user)?;
        let universe = self.docs().universe.read();
        let person = require_person(&universe, &user)?;

        let mut details = RegDetails {
            secret_changed: person.secret_changed_at,
            secret_expiration: person.expire_at.unwrap_or(0),
            readable_name: person.readable_name.clone(),
            // a stored zero means "unset"; the default applies at read
            // time and never rewrites the record
            session_max: if person.session_max == 0 {
                self.default_session_max()
            } else {
                person.session_max
            },
            created: (person.created_by.clone(), person.created_at),
            change_history: person.changed.clone(),
            app: None,
        };
        if let Some(app) = app.filter(|a| !a.is_empty()) {
            details.app = Some(self.app_view(&universe, &user, app));
        }
        info!(user = %user, "registration details prepared");
        Ok(details)
    }

    fn app_view(&self, universe: &crate::tree::Universe, user: &SafeIdent, app: &str) -> AppView {
        let catalogue = self.docs().catalogue.read();
        match app {
            "primary" => {
                let (branches, positions) = match universe.employment(user.as_str()) {
                    Some((branch, pos)) => (vec![branch.id.clone()], vec![pos.role.clone()]),
                    None => (Vec::new(), Vec::new()),
                };
                let func_groups: Vec<String> =
                    resolve::user_funcsets(universe, user.as_str()).into_iter().collect();
                let props = [FuncProp::Id, FuncProp::Callpath, FuncProp::Method];
                let functions = resolve::user_functions(universe, &catalogue, user.as_str())
                    .into_iter()
                    .filter_map(|id| catalogue.function(&id).map(|d| catalogue.review_one(&props, d)))
                    .collect();
                let agents = match branches.first() {
                    Some(home) => {
                        let mut ids = vec![home.clone()];
                        if let Some(branch) = universe.root.subtree().into_iter().find(|b| b.id == *home) {
                            ids.extend(branch.descendant_ids());
                        }
                        self.agents()
                            .list_by_branches(&ids)
                            .into_iter()
                            .map(|(agent, _)| agent)
                            .collect()
                    }
                    None => Vec::new(),
                };
                AppView::Primary {
                    for_application: app.to_string(),
                    branches,
                    positions,
                    func_groups,
                    functions,
                    agents,
                }
            }
            "secondary" => {
                let funcsets = resolve::user_funcsets(universe, user.as_str())
                    .into_iter()
                    .filter_map(|fs_id| {
                        let fs = universe.funcset(&SafeIdent::new(&fs_id).ok()?)?;
                        let functions = fs
                            .functions
                            .iter()
                            .map(|fid| describe_or_placeholder(&catalogue, fid))
                            .collect();
                        Some((
                            fs_id.clone(),
                            FuncsetView {
                                name: fs.name.clone().unwrap_or_default(),
                                functions,
                            },
                        ))
                    })
                    .collect();
                AppView::Secondary {
                    for_application: app.to_string(),
                    funcsets,
                }
            }
            other => AppView::Bare {
                for_application: other.to_string(),
            },
        }
    }

    /// Check a person's secret and stamp the outcome.
    ///
    /// Order is fixed: missing secret, unknown user, wrong secret
    /// (counter incremented), expired secret (also counted), then
    /// success (counter reset). Every outcome that touches the counter
    /// is persisted before the answer leaves.
    pub fn authorize(&self, user: &str, secret: Option<&str>, app: Option<&str>) -> Result<RegDetails> {
        let Some(secret) = secret else {
            return Err(Fault::new(
                Reason::WrongFormat,
                "required parameter absent: secret is not given",
            )
            .into());
        };
        let user_id = SafeIdent::new(user)?;

        let now = Self::now();
        {
            let mut universe = self.docs().universe.write();
            let person = universe.people.get_mut(user_id.as_str()).ok_or_else(|| {
                Fault::new(Reason::UserUnknown, format!("user '{user_id}' is unknown"))
                    .with("bad_value", user_id.as_str())
            })?;

            if person.secret != secret {
                person.failures += 1;
                person.last_error_at = Some(now);
                let failures = person.failures;
                drop(universe);
                self.mark_dirty()?;
                return Err(Fault::new(
                    Reason::WrongSecret,
                    format!("user '{user_id}' made {failures} secret mistake(s)"),
                )
                .with("failures", failures)
                .into());
            }

            if let Some(expire_at) = person.expire_at.filter(|&e| e != 0 && now > e) {
                person.failures += 1;
                person.last_error_at = Some(now);
                let failures = person.failures;
                drop(universe);
                self.mark_dirty()?;
                return Err(Fault::new(
                    Reason::SecretExpired,
                    format!("secret of '{user_id}' expired, failure counter is {failures}"),
                )
                .with("secret_expiration", expire_at)
                .with("failures", failures)
                .into());
            }

            person.failures = 0;
            person.last_success_at = Some(now);
        }
        self.mark_dirty()?;
        info!(user = %user_id, "user authenticated");
        self.user_details(user_id.as_str(), app)
    }

    pub fn create_user(
        &self,
        user: &str,
        secret: &str,
        operator: &str,
        opts: &UserOpts,
    ) -> Result<CredentialStamp> {
        let user = SafeIdent::new(user)?;
        let operator = SafeIdent::new(operator)?;
        if secret.is_empty() {
            return Err(Fault::new(
                Reason::WrongFormat,
                "required parameter absent: secret is empty",
            )
            .into());
        }

        let now = Self::now();
        let expire_at = expiry_from(now, opts.secret_lifetime_days);
        {
            let mut universe = self.docs().universe.write();
            if universe.people.contains_key(user.as_str()) {
                return Err(Fault::new(
                    Reason::AlreadyExists,
                    format!("user '{user}' already exists"),
                )
                .with("bad_value", user.as_str())
                .into());
            }
            require_operator(&universe, &operator)?;

            info!(user = %user, operator = %operator, "creating user record");
            universe.people.insert(
                user.as_str().to_string(),
                Person {
                    id: user.as_str().to_string(),
                    secret: secret.to_string(),
                    secret_changed_at: now,
                    expire_at,
                    failures: 0,
                    readable_name: opts.readable_name.clone(),
                    session_max: opts.session_max.unwrap_or(self.default_session_max()),
                    created_by: operator.as_str().to_string(),
                    created_at: now,
                    last_error_at: None,
                    last_success_at: None,
                    changed: Vec::new(),
                },
            );
        }
        self.mark_dirty()?;
        Ok(CredentialStamp {
            secret_changed: now,
            secret_expiration: expire_at,
        })
    }

    /// Replace a person's credentials and append one history entry.
    ///
    /// The change history only ever grows. A call without a lifetime
    /// clears any previous expiry.
    pub fn change_user(
        &self,
        user: &str,
        secret: &str,
        operator: &str,
        opts: &UserOpts,
    ) -> Result<CredentialStamp> {
        let user = SafeIdent::new(user)?;
        let operator = SafeIdent::new(operator)?;
        if secret.is_empty() {
            return Err(Fault::new(
                Reason::WrongFormat,
                "required parameter absent: secret is empty",
            )
            .into());
        }

        let now = Self::now();
        let expire_at = expiry_from(now, opts.secret_lifetime_days);
        {
            let mut universe = self.docs().universe.write();
            require_operator(&universe, &operator)?;
            let default_max = self.default_session_max();
            let person = universe.people.get_mut(user.as_str()).ok_or_else(|| {
                Fault::new(Reason::UserUnknown, format!("user '{user}' is unknown"))
                    .with("bad_value", user.as_str())
            })?;

            info!(user = %user, operator = %operator, "changing user registration data");
            person.secret = secret.to_string();
            person.secret_changed_at = now;
            person.readable_name = opts.readable_name.clone();
            person.session_max = opts.session_max.unwrap_or(default_max);
            person.failures = 0;
            person.expire_at = expire_at;
            person.changed.push(ChangeStamp {
                by: operator.as_str().to_string(),
                at: now,
            });
        }
        self.mark_dirty()?;
        Ok(CredentialStamp {
            secret_changed: now,
            secret_expiration: expire_at,
        })
    }

    pub fn delete_user(&self, user: &str, operator: &str) -> Result<()> {
        let user = SafeIdent::new(user)?;
        let operator = SafeIdent::new(operator)?;
        {
            let mut universe = self.docs().universe.write();
            require_operator(&universe, &operator)?;
            require_person(&universe, &user)?;
            if universe.employment(user.as_str()).is_some() {
                return Err(Fault::new(
                    Reason::UserEmployed,
                    format!("user '{user}' is employed, fire them first"),
                )
                .into());
            }
            info!(user = %user, operator = %operator, "deleting user");
            universe.people.remove(user.as_str());
        }
        self.mark_dirty()
    }

    /// Funcsets effectively granted to one person.
    pub fn employee_funcsets(&self, user: &str) -> Result<Vec<String>> {
        let user = SafeIdent::new(user)?;
        let universe = self.docs().universe.read();
        require_person(&universe, &user)?;
        Ok(resolve::user_funcsets(&universe, user.as_str()).into_iter().collect())
    }

    /// One property of every function the person may invoke.
    pub fn employee_functions(&self, user: &str, prop: &str) -> Result<Vec<String>> {
        let user = SafeIdent::new(user)?;
        let prop: FuncProp = prop.parse().map_err(Fault::from)?;
        let universe = self.docs().universe.read();
        require_person(&universe, &user)?;
        let catalogue = self.docs().catalogue.read();
        let values: BTreeSet<String> = resolve::user_functions(&universe, &catalogue, user.as_str())
            .into_iter()
            .filter_map(|id| catalogue.function(&id).and_then(|d| prop.value_of(d)))
            .collect();
        Ok(values.into_iter().collect())
    }

    /// Selected properties of every function the person may invoke.
    pub fn employee_functions_review(
        &self,
        user: &str,
        props: &str,
    ) -> Result<Vec<Map<String, Value>>> {
        let user = SafeIdent::new(user)?;
        let props = FuncProp::parse_list(props)?;
        let universe = self.docs().universe.read();
        require_person(&universe, &user)?;
        let catalogue = self.docs().catalogue.read();
        Ok(resolve::user_functions(&universe, &catalogue, user.as_str())
            .into_iter()
            .filter_map(|id| catalogue.function(&id).map(|d| catalogue.review_one(&props, d)))
            .collect())
    }
}

fn expiry_from(now: i64, lifetime_days: Option<f64>) -> Option<i64> {
    lifetime_days.map(|days| now + (days * SECONDS_PER_DAY) as i64)
}

/// id/name/title of a catalogued function, or explicit placeholders for a
/// function the catalogue no longer describes.
fn describe_or_placeholder(
    catalogue: &crate::catalogue::Catalogue,
    func_id: &str,
) -> Map<String, Value> {
    let props = [FuncProp::Id, FuncProp::Name, FuncProp::Title];
    match catalogue.function(func_id) {
        Some(def) => catalogue.review_one(&props, def),
        None => {
            let mut map = Map::new();
            map.insert("id".into(), Value::String(func_id.to_string()));
            map.insert("name".into(), Value::String(format!("UNDESCRIBED {func_id}")));
            map.insert("title".into(), Value::String(format!("UNDESCRIBED {func_id}")));
            map
        }
    }
}
