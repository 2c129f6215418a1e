//! # Orgward HTTP Server
//!
//! JSON route layer over the authorization store. Every response carries
//! the `result` flag; failed operations add `reason` and `warning`, and
//! the reason code alone decides the HTTP status.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `DATA_DIR` - document directory (default: DATA)
//! - `SESSION_MAX_DEFAULT` - session cap for new users (default: 5)
//! - `RUST_LOG` - log filter (default: info)

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use orgward_store::keeper::{AgentFields, UserOpts};
use orgward_store::{Keeper, KeeperConfig, MemoryAgentRegistry, Reason, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    keeper: Arc<Keeper>,
}

/// Fixed reason-to-status table. Message text never participates.
fn status_for(reason: Reason) -> StatusCode {
    match reason {
        Reason::WrongFormat | Reason::WrongData => StatusCode::BAD_REQUEST,
        Reason::UserUnknown | Reason::OperatorUnknown => StatusCode::UNAUTHORIZED,
        Reason::WrongSecret
        | Reason::SecretExpired
        | Reason::AlreadyExists
        | Reason::UserEmployed
        | Reason::AlreadyEmployed
        | Reason::AlreadyUnemployed
        | Reason::ForbiddenForOperator
        | Reason::NoVacantPositions => StatusCode::FORBIDDEN,
        Reason::RoleUnknown
        | Reason::BranchUnknown
        | Reason::FunctionUnknown
        | Reason::FuncsetUnknown
        | Reason::AgentUnknown
        | Reason::NotInSet => StatusCode::NOT_FOUND,
        Reason::NotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        Reason::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Serialize an operation outcome into the wire envelope.
///
/// Successful objects gain `"result": true`; other JSON shapes ride under
/// `report`. Persistence failures surface as 500 without a reason code.
fn respond<T: Serialize>(outcome: Result<T, StoreError>) -> Response {
    match outcome {
        Ok(value) => {
            let body = match serde_json::to_value(&value) {
                Ok(Value::Object(mut map)) => {
                    map.insert("result".into(), Value::Bool(true));
                    Value::Object(map)
                }
                Ok(Value::Null) => json!({ "result": true }),
                Ok(other) => json!({ "result": true, "report": other }),
                Err(err) => {
                    error!(%err, "response serialization failed");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "result": false, "error": err.to_string() })),
                    )
                        .into_response();
                }
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(StoreError::Domain(fault)) => {
            (status_for(fault.reason), Json(&fault)).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "result": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---- people ----

#[derive(Deserialize)]
struct AuthorizeParams {
    user: String,
    secret: Option<String>,
    app: Option<String>,
}

async fn authorize(State(state): State<AppState>, Query(p): Query<AuthorizeParams>) -> Response {
    respond(state.keeper.authorize(&p.user, p.secret.as_deref(), p.app.as_deref()))
}

#[derive(Deserialize)]
struct UserDetailsParams {
    user: String,
    app: Option<String>,
}

async fn user_details(State(state): State<AppState>, Query(p): Query<UserDetailsParams>) -> Response {
    respond(state.keeper.user_details(&p.user, p.app.as_deref()))
}

async fn list_users(State(state): State<AppState>) -> Response {
    respond(Ok(json!({ "users": state.keeper.list_users() })))
}

#[derive(Deserialize)]
struct UserWriteParams {
    user: String,
    secret: String,
    operator: String,
    lifetime_days: Option<f64>,
    #[serde(default)]
    readable_name: String,
    session_max: Option<u32>,
}

impl UserWriteParams {
    fn opts(&self) -> UserOpts {
        UserOpts {
            secret_lifetime_days: self.lifetime_days,
            readable_name: self.readable_name.clone(),
            session_max: self.session_max,
        }
    }
}

async fn create_user(State(state): State<AppState>, Query(p): Query<UserWriteParams>) -> Response {
    respond(state.keeper.create_user(&p.user, &p.secret, &p.operator, &p.opts()))
}

async fn change_user(State(state): State<AppState>, Query(p): Query<UserWriteParams>) -> Response {
    respond(state.keeper.change_user(&p.user, &p.secret, &p.operator, &p.opts()))
}

#[derive(Deserialize)]
struct UserOpParams {
    user: String,
    operator: String,
}

async fn delete_user(State(state): State<AppState>, Query(p): Query<UserOpParams>) -> Response {
    respond(state.keeper.delete_user(&p.user, &p.operator))
}

// ---- employment ----

#[derive(Deserialize)]
struct HireParams {
    user: String,
    branch: String,
    pos: String,
    operator: String,
}

async fn hire(State(state): State<AppState>, Query(p): Query<HireParams>) -> Response {
    respond(state.keeper.hire(&p.user, &p.branch, &p.pos, &p.operator))
}

async fn fire(State(state): State<AppState>, Query(p): Query<UserOpParams>) -> Response {
    respond(state.keeper.fire(&p.user, &p.operator))
}

#[derive(Deserialize)]
struct SlotParams {
    branch: String,
    pos: String,
}

async fn create_position(State(state): State<AppState>, Query(p): Query<SlotParams>) -> Response {
    respond(state.keeper.create_position(&p.branch, &p.pos))
}

async fn delete_position(State(state): State<AppState>, Query(p): Query<SlotParams>) -> Response {
    respond(state.keeper.delete_position(&p.branch, &p.pos))
}

#[derive(Deserialize)]
struct PositionsParams {
    branch: Option<String>,
    #[serde(default)]
    per_role: bool,
    #[serde(default)]
    only_vacant: bool,
}

async fn positions_report(
    State(state): State<AppState>,
    Query(p): Query<PositionsParams>,
) -> Response {
    respond(state.keeper.positions_report(p.branch.as_deref(), p.per_role, p.only_vacant))
}

#[derive(Deserialize)]
struct BranchFilterParams {
    branch: Option<String>,
}

async fn review_positions(
    State(state): State<AppState>,
    Query(p): Query<BranchFilterParams>,
) -> Response {
    respond(state.keeper.review_positions(p.branch.as_deref()))
}

#[derive(Deserialize)]
struct BranchParams {
    branch: String,
}

async fn vacant_positions(State(state): State<AppState>, Query(p): Query<BranchParams>) -> Response {
    respond(state.keeper.vacant_positions(&p.branch))
}

#[derive(Deserialize)]
struct BranchEmployeesParams {
    branch: String,
    #[serde(default)]
    with_subbranches: bool,
}

async fn branch_employees(
    State(state): State<AppState>,
    Query(p): Query<BranchEmployeesParams>,
) -> Response {
    respond(
        state
            .keeper
            .branch_employees(&p.branch, p.with_subbranches)
            .map(|employees| json!({ "employees": employees })),
    )
}

#[derive(Deserialize)]
struct EmpSubbranchesParams {
    user: String,
    #[serde(default)]
    all_levels: bool,
    #[serde(default)]
    exclude_own: bool,
}

async fn employee_subbranches(
    State(state): State<AppState>,
    Query(p): Query<EmpSubbranchesParams>,
) -> Response {
    respond(
        state
            .keeper
            .employee_subbranches(&p.user, p.all_levels, p.exclude_own)
            .map(|subbranches| json!({ "subbranches": subbranches })),
    )
}

#[derive(Deserialize)]
struct UserParams {
    user: String,
}

async fn employee_funcsets(State(state): State<AppState>, Query(p): Query<UserParams>) -> Response {
    respond(
        state
            .keeper
            .employee_funcsets(&p.user)
            .map(|funcsets| json!({ "funcsets": funcsets })),
    )
}

#[derive(Deserialize)]
struct EmpFunctionsParams {
    user: String,
    #[serde(default = "default_prop")]
    prop: String,
}

fn default_prop() -> String {
    "id".to_string()
}

async fn employee_functions(
    State(state): State<AppState>,
    Query(p): Query<EmpFunctionsParams>,
) -> Response {
    respond(
        state
            .keeper
            .employee_functions(&p.user, &p.prop)
            .map(|functions| json!({ "prop": p.prop, "functions": functions })),
    )
}

#[derive(Deserialize)]
struct EmpReviewParams {
    user: String,
    props: String,
}

async fn employee_functions_review(
    State(state): State<AppState>,
    Query(p): Query<EmpReviewParams>,
) -> Response {
    respond(
        state
            .keeper
            .employee_functions_review(&p.user, &p.props)
            .map(|functions| json!({ "props": p.props, "functions": functions })),
    )
}

// ---- branches ----

async fn list_branches(State(state): State<AppState>) -> Response {
    respond(Ok(json!({ "branches": state.keeper.list_branches() })))
}

async fn branch_subtree(
    State(state): State<AppState>,
    Query(p): Query<BranchFilterParams>,
) -> Response {
    respond(
        state
            .keeper
            .branch_subtree(p.branch.as_deref())
            .map(|branches| json!({ "branches": branches })),
    )
}

#[derive(Deserialize)]
struct SubbranchParams {
    branch: String,
    sub: String,
}

async fn add_subbranch(State(state): State<AppState>, Query(p): Query<SubbranchParams>) -> Response {
    respond(state.keeper.add_subbranch(&p.branch, &p.sub))
}

async fn delete_branch(State(state): State<AppState>, Query(p): Query<BranchParams>) -> Response {
    respond(state.keeper.delete_branch(&p.branch))
}

async fn whitelist(State(state): State<AppState>, Query(p): Query<BranchParams>) -> Response {
    respond(state.keeper.whitelist(&p.branch))
}

#[derive(Deserialize)]
struct WhitelistParams {
    branch: String,
    #[serde(default)]
    propagate_parent: bool,
    #[serde(default)]
    funcsets: String,
}

async fn set_whitelist(State(state): State<AppState>, Query(p): Query<WhitelistParams>) -> Response {
    respond(
        state
            .keeper
            .set_whitelist(&p.branch, p.propagate_parent, &split_list(&p.funcsets)),
    )
}

async fn branch_enabled_funcsets(
    State(state): State<AppState>,
    Query(p): Query<BranchParams>,
) -> Response {
    respond(
        state
            .keeper
            .branch_enabled_funcsets(&p.branch)
            .map(|funcsets| json!({ "funcsets": funcsets })),
    )
}

// ---- roles ----

#[derive(Deserialize)]
struct BranchRolesParams {
    branch: String,
    #[serde(default)]
    with_inherited: bool,
    #[serde(default)]
    with_origin: bool,
}

async fn branch_roles(State(state): State<AppState>, Query(p): Query<BranchRolesParams>) -> Response {
    if p.with_origin {
        respond(
            state
                .keeper
                .branch_roles_with_origin(&p.branch)
                .map(|roles| json!({ "roles_in_branch": roles })),
        )
    } else {
        respond(
            state
                .keeper
                .branch_roles(&p.branch, p.with_inherited)
                .map(|roles| json!({ "roles": roles })),
        )
    }
}

#[derive(Deserialize)]
struct RoleCreateParams {
    branch: String,
    role: String,
    #[serde(default)]
    duties: String,
}

async fn create_role(State(state): State<AppState>, Query(p): Query<RoleCreateParams>) -> Response {
    respond(state.keeper.create_role(&p.branch, &p.role, &split_list(&p.duties)))
}

#[derive(Deserialize)]
struct RoleParams {
    branch: String,
    role: String,
}

async fn delete_role(State(state): State<AppState>, Query(p): Query<RoleParams>) -> Response {
    respond(state.keeper.delete_role(&p.branch, &p.role))
}

async fn role_funcsets(State(state): State<AppState>, Query(p): Query<RoleParams>) -> Response {
    respond(
        state
            .keeper
            .role_funcsets(&p.branch, &p.role)
            .map(|funcsets| json!({ "funcsets": funcsets })),
    )
}

#[derive(Deserialize)]
struct RoleFuncsetParams {
    branch: String,
    role: String,
    funcset: String,
}

async fn role_funcset_add(
    State(state): State<AppState>,
    Query(p): Query<RoleFuncsetParams>,
) -> Response {
    respond(state.keeper.role_funcset_add(&p.branch, &p.role, &p.funcset))
}

async fn role_funcset_remove(
    State(state): State<AppState>,
    Query(p): Query<RoleFuncsetParams>,
) -> Response {
    respond(state.keeper.role_funcset_remove(&p.branch, &p.role, &p.funcset))
}

// ---- funcsets ----

async fn list_funcsets(State(state): State<AppState>) -> Response {
    respond(Ok(json!({ "funcsets": state.keeper.list_funcsets() })))
}

#[derive(Deserialize)]
struct FuncsetCreateParams {
    branch: String,
    funcset: String,
    name: Option<String>,
}

async fn funcset_create(
    State(state): State<AppState>,
    Query(p): Query<FuncsetCreateParams>,
) -> Response {
    respond(state.keeper.funcset_create(&p.branch, &p.funcset, p.name.as_deref()))
}

#[derive(Deserialize)]
struct FuncsetParams {
    funcset: String,
}

async fn funcset_delete(State(state): State<AppState>, Query(p): Query<FuncsetParams>) -> Response {
    respond(state.keeper.funcset_delete(&p.funcset))
}

async fn funcset_details(State(state): State<AppState>, Query(p): Query<FuncsetParams>) -> Response {
    respond(state.keeper.funcset_details(&p.funcset))
}

#[derive(Deserialize)]
struct FuncsetFuncParams {
    funcset: String,
    function: String,
}

async fn funcset_func_add(
    State(state): State<AppState>,
    Query(p): Query<FuncsetFuncParams>,
) -> Response {
    respond(state.keeper.funcset_func_add(&p.funcset, &p.function))
}

async fn funcset_func_remove(
    State(state): State<AppState>,
    Query(p): Query<FuncsetFuncParams>,
) -> Response {
    respond(state.keeper.funcset_func_remove(&p.funcset, &p.function))
}

// ---- catalogue ----

#[derive(Deserialize)]
struct PropParams {
    prop: String,
}

async fn list_functions(State(state): State<AppState>, Query(p): Query<PropParams>) -> Response {
    respond(state.keeper.list_functions(&p.prop))
}

#[derive(Deserialize)]
struct ReviewParams {
    props: String,
    function: Option<String>,
}

async fn review_functions(State(state): State<AppState>, Query(p): Query<ReviewParams>) -> Response {
    respond(
        state
            .keeper
            .review_functions(&p.props, p.function.as_deref())
            .map(|functions| json!({ "functions": functions })),
    )
}

#[derive(Deserialize)]
struct FunctionParams {
    function: String,
}

async fn function_info(State(state): State<AppState>, Query(p): Query<FunctionParams>) -> Response {
    respond(
        state
            .keeper
            .function_def(&p.function)
            .map(|def| json!({ "definition": def })),
    )
}

async fn put_function(State(state): State<AppState>, body: String) -> Response {
    respond(state.keeper.put_function(&body))
}

async fn delete_function(State(state): State<AppState>, Query(p): Query<FunctionParams>) -> Response {
    respond(state.keeper.delete_function(&p.function))
}

#[derive(Deserialize)]
struct TagsetParams {
    function: String,
    method: String,
    #[serde(default)]
    tags: String,
}

async fn tagset_modify(State(state): State<AppState>, Query(p): Query<TagsetParams>) -> Response {
    let tags: BTreeSet<String> = split_list(&p.tags).into_iter().collect();
    respond(state.keeper.modify_tagset(&p.function, &p.method, &tags, false))
}

async fn tagset_test(State(state): State<AppState>, Query(p): Query<TagsetParams>) -> Response {
    let tags: BTreeSet<String> = split_list(&p.tags).into_iter().collect();
    respond(state.keeper.modify_tagset(&p.function, &p.method, &tags, true))
}

// ---- agents ----

#[derive(Deserialize)]
struct AgentRegisterParams {
    branch: String,
    agent: String,
    descr: Option<String>,
    location: Option<String>,
    extra: Option<String>,
    #[serde(default)]
    tags: String,
}

impl AgentRegisterParams {
    fn fields(&self) -> AgentFields {
        AgentFields {
            descr: self.descr.clone(),
            location: self.location.clone(),
            extra: self.extra.clone(),
            tags: split_list(&self.tags),
        }
    }
}

async fn agent_register(
    State(state): State<AppState>,
    Query(p): Query<AgentRegisterParams>,
) -> Response {
    respond(state.keeper.register_agent(&p.branch, &p.agent, p.fields()))
}

async fn agent_movedown(
    State(state): State<AppState>,
    Query(p): Query<AgentRegisterParams>,
) -> Response {
    respond(state.keeper.move_agent(&p.branch, &p.agent, p.fields()))
}

#[derive(Deserialize)]
struct AgentParams {
    agent: String,
}

async fn agent_unregister(State(state): State<AppState>, Query(p): Query<AgentParams>) -> Response {
    respond(state.keeper.unregister_agent(&p.agent))
}

async fn agent_details(State(state): State<AppState>, Query(p): Query<AgentParams>) -> Response {
    respond(
        state
            .keeper
            .agent_details(&p.agent)
            .map(|details| json!({ "details": details })),
    )
}

async fn agent_subbranches(State(state): State<AppState>, Query(p): Query<AgentParams>) -> Response {
    respond(
        state
            .keeper
            .agent_subbranches(&p.agent)
            .map(|branches| json!({ "branches": branches })),
    )
}

#[derive(Deserialize)]
struct AgentsListParams {
    branch: String,
    #[serde(default)]
    with_subbranches: bool,
    #[serde(default)]
    with_location: bool,
}

async fn agents_all(State(state): State<AppState>) -> Response {
    respond(Ok(json!({ "agents": state.keeper.list_all_agents() })))
}

async fn agents_list(State(state): State<AppState>, Query(p): Query<AgentsListParams>) -> Response {
    respond(
        state
            .keeper
            .list_agents(&p.branch, p.with_subbranches, p.with_location)
            .map(|report| json!({ "report": report })),
    )
}

// ---- service ----

async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "result": true, "status": "healthy" }))).into_response()
}

async fn info_endpoint() -> Response {
    (
        StatusCode::OK,
        Json(json!({ "result": true, "version": orgward_store::VERSION })),
    )
        .into_response()
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/authorize", get(authorize).post(authorize))
        .route("/user/details", get(user_details))
        .route("/users/list", get(list_users))
        .route("/user/create", get(create_user).post(create_user))
        .route("/user/change", get(change_user).post(change_user))
        .route("/user/delete", get(delete_user).post(delete_user))
        .route("/hr/hire", get(hire).post(hire))
        .route("/hr/fire", get(fire).post(fire))
        .route(
            "/hr/branch/position/create",
            get(create_position).post(create_position),
        )
        .route(
            "/hr/branch/position/delete",
            get(delete_position).post(delete_position),
        )
        .route("/hr/branch/positions", get(positions_report))
        .route("/positions/review", get(review_positions))
        .route("/branch/vacancies", get(vacant_positions))
        .route("/branch/employees/list", get(branch_employees))
        .route("/emp/subbranches/list", get(employee_subbranches))
        .route("/emp/funcsets/list", get(employee_funcsets))
        .route("/emp/functions/list", get(employee_functions))
        .route("/emp/functions/review", get(employee_functions_review))
        .route("/branches", get(list_branches))
        .route("/branch/subbranches", get(branch_subtree))
        .route(
            "/branch/subbranch/add",
            get(add_subbranch).post(add_subbranch),
        )
        .route("/branch/delete", get(delete_branch).post(delete_branch))
        .route("/branch/fswhitelist/get", get(whitelist))
        .route(
            "/branch/fswhitelist/set",
            get(set_whitelist).post(set_whitelist),
        )
        .route("/branch/funcsets/enabled", get(branch_enabled_funcsets))
        .route("/branch/roles/list", get(branch_roles))
        .route("/branch/role/create", get(create_role).post(create_role))
        .route("/branch/role/delete", get(delete_role).post(delete_role))
        .route("/role/funcsets", get(role_funcsets))
        .route(
            "/role/funcset/add",
            get(role_funcset_add).post(role_funcset_add),
        )
        .route(
            "/role/funcset/remove",
            get(role_funcset_remove).post(role_funcset_remove),
        )
        .route("/funcsets", get(list_funcsets))
        .route("/funcset/create", get(funcset_create).post(funcset_create))
        .route("/funcset/delete", get(funcset_delete).post(funcset_delete))
        .route("/funcset/details", get(funcset_details))
        .route(
            "/funcset/function/add",
            get(funcset_func_add).post(funcset_func_add),
        )
        .route(
            "/funcset/function/remove",
            get(funcset_func_remove).post(funcset_func_remove),
        )
        .route("/functions/list", get(list_functions))
        .route("/functions/review", get(review_functions))
        .route("/function/info", get(function_info))
        .route("/function/upload", post(put_function))
        .route(
            "/function/delete",
            get(delete_function).post(delete_function),
        )
        .route(
            "/function/tagset/modify",
            get(tagset_modify).post(tagset_modify),
        )
        .route("/function/tagset/test", get(tagset_test))
        .route("/agent/register", get(agent_register).post(agent_register))
        .route("/agent/movedown", get(agent_movedown).post(agent_movedown))
        .route(
            "/agent/unregister",
            get(agent_unregister).post(agent_unregister),
        )
        .route("/agent/details", get(agent_details))
        .route("/agent/subbranches", get(agent_subbranches))
        .route("/agents/all", get(agents_all))
        .route("/agents/list", get(agents_list))
        .route("/health", get(health))
        .route("/info", get(info_endpoint))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!(%err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C signal"),
        _ = terminate => info!("received SIGTERM signal"),
    }

    info!("starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting orgward server v{}", orgward_store::VERSION);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "DATA".to_string());
    let session_max: u32 = std::env::var("SESSION_MAX_DEFAULT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    info!("configuration:");
    info!("  port: {}", port);
    info!("  data dir: {}", data_dir);
    info!("  default session max: {}", session_max);

    let config = KeeperConfig {
        default_session_max: session_max,
        ..KeeperConfig::default()
    };
    let keeper = Arc::new(
        Keeper::open(
            std::path::Path::new(&data_dir),
            config,
            Arc::new(MemoryAgentRegistry::new()),
        )
        .with_context(|| format!("failed to open the store in {data_dir}"))?,
    );

    let app = create_router(AppState {
        keeper: Arc::clone(&keeper),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // the terminal flush must run even when nothing was pending
    keeper.shutdown().context("terminal flush failed")?;
    info!("documents flushed, server stopped");
    Ok(())
}
