use actix_web::http::StatusCode;
use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};

use crate::auth::{check_authorization_level, AuthSettings, AuthorizationLevel};
use crate::balance::{compute_balances, round_to_cents, summarize, MemberBalance};
use crate::directory;
use crate::error::{LedgerError, ValidationError};
use crate::exchange::Transfer;
use crate::ledger::ExpenseLedger;
use crate::schemas::{ExpenseDraft, Group, Member, MemberId};

pub struct AppState {
    pub ledger: ExpenseLedger,
    pub auth: AuthSettings,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroupJson {
    pub name: String,
    /// Display name of the creator
    #[serde(default)]
    pub creator_name: Option<String>,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Serialize)]
struct SettlementJson {
    balances: Vec<MemberBalance>,
    transfers: Vec<Transfer>,
}

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::Validation(ValidationError::NotAMember(_)) => StatusCode::FORBIDDEN,
            LedgerError::Validation(ValidationError::GroupExists(_)) => StatusCode::CONFLICT,
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::GroupNotFound(_) | LedgerError::ExpenseNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            LedgerError::Settlement(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let LedgerError::Store(err) = self {
            tracing::error!(error = %err, "store failure");
        }
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

enum Caller {
    Service,
    Member(MemberId),
}

fn caller(request: &HttpRequest, state: &AppState) -> Result<Caller, HttpResponse> {
    match check_authorization_level(request, &state.auth) {
        Some(AuthorizationLevel::Service) => Ok(Caller::Service),
        Some(AuthorizationLevel::Member(id)) => Ok(Caller::Member(id)),
        None => Err(HttpResponse::Unauthorized().body("Missing or invalid identity")),
    }
}

fn acting_member(request: &HttpRequest, state: &AppState) -> Result<MemberId, HttpResponse> {
    match caller(request, state)? {
        Caller::Member(id) => Ok(id),
        Caller::Service => Err(HttpResponse::Forbidden().body("Service callers can't write")),
    }
}

/// Members may only read groups they belong to.
fn check_reader(caller: &Caller, group: &Group) -> Result<(), LedgerError> {
    match caller {
        Caller::Member(id) if !group.is_member(id) => {
            Err(ValidationError::NotAMember(id.clone()).into())
        }
        _ => Ok(()),
    }
}

macro_rules! try_auth {
    ($e:expr) => {
        match $e {
            Ok(value) => value,
            Err(response) => return Ok(response),
        }
    };
}

#[put("/groups/{id}")]
async fn add_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<NewGroupJson>,
) -> Result<HttpResponse, LedgerError> {
    let actor = try_auth!(acting_member(&request, &state));
    let json = json.into_inner();
    let creator = Member {
        name: json.creator_name.unwrap_or_else(|| actor.clone()),
        id: actor,
    };
    let group = directory::create_group(
        state.ledger.store().as_ref(),
        &creator,
        Some(id.into_inner()),
        &json.name,
        json.members,
    )
    .await?;
    Ok(HttpResponse::Ok().json(group))
}

#[get("/groups")]
async fn list_groups(state: web::Data<AppState>, request: HttpRequest) -> Result<HttpResponse, LedgerError> {
    let actor = try_auth!(acting_member(&request, &state));
    let groups = directory::groups_for(state.ledger.store().as_ref(), &actor).await?;
    Ok(HttpResponse::Ok().json(groups))
}

#[delete("/groups/{id}")]
async fn delete_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let actor = try_auth!(acting_member(&request, &state));
    let group = state.ledger.group(&id).await?;
    directory::delete_group(state.ledger.store().as_ref(), &group, &actor).await?;
    Ok(HttpResponse::Ok().body("Group deleted"))
}

#[post("/groups/{id}/members")]
async fn add_member(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    member: web::Json<Member>,
) -> Result<HttpResponse, LedgerError> {
    let actor = try_auth!(acting_member(&request, &state));
    let group = state.ledger.group(&id).await?;
    let group = directory::add_member(
        state.ledger.store().as_ref(),
        &group,
        &actor,
        member.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(group))
}

#[get("/groups/{id}/expenses")]
async fn list_expenses(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let caller = try_auth!(caller(&request, &state));
    let snapshot = state.ledger.snapshot(&id).await?;
    check_reader(&caller, &snapshot.group)?;
    Ok(HttpResponse::Ok().json(snapshot.expenses))
}

#[post("/groups/{id}/expenses")]
async fn add_expense(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    expense: web::Json<ExpenseDraft>,
) -> Result<HttpResponse, LedgerError> {
    let actor = try_auth!(acting_member(&request, &state));
    let group = state.ledger.group(&id).await?;
    let expense = state.ledger.add(&group, &actor, expense.into_inner()).await?;
    Ok(HttpResponse::Ok().json(expense))
}

#[delete("/groups/{id}/expenses/{expense_id}")]
async fn remove_expense(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, LedgerError> {
    let actor = try_auth!(acting_member(&request, &state));
    let (id, expense_id) = path.into_inner();
    let group = state.ledger.group(&id).await?;
    state.ledger.remove(&group, &actor, &expense_id).await?;
    Ok(HttpResponse::Ok().body("Expense removed"))
}

#[get("/groups/{id}/balance")]
async fn get_balance(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let caller = try_auth!(caller(&request, &state));
    let snapshot = state.ledger.snapshot(&id).await?;
    check_reader(&caller, &snapshot.group)?;
    let balances = compute_balances(&snapshot.group.members, &snapshot.expenses)?;
    Ok(HttpResponse::Ok().json(summarize(&snapshot.group, &balances)))
}

#[get("/groups/{id}/settlement")]
async fn get_settlement(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let caller = try_auth!(caller(&request, &state));
    let snapshot = state.ledger.snapshot(&id).await?;
    check_reader(&caller, &snapshot.group)?;
    let settlement = snapshot.settle()?;
    let transfers = settlement
        .transfers
        .into_iter()
        .map(|transfer| Transfer {
            amount: round_to_cents(transfer.amount),
            ..transfer
        })
        .collect();
    Ok(HttpResponse::Ok().json(SettlementJson {
        balances: summarize(&snapshot.group, &settlement.balances),
        transfers,
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(add_group)
        .service(list_groups)
        .service(delete_group)
        .service(add_member)
        .service(list_expenses)
        .service(add_expense)
        .service(remove_expense)
        .service(get_balance)
        .service(get_settlement);
}
