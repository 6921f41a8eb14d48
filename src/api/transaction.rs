use std::sync::Arc;

use actix_session::Session;
use actix_web::{get, post, web, HttpResponse, Responder};

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::models::{NewTransaction, Transaction, TransactionId, TxKind, TxStatus};
use crate::util::api_util::*;
use crate::util::economy::{
    balance_effect, compulsory_balance, daily_withdrawal_total, is_first_approved_deposit,
    meets_deposit_minimum, prior_approved_deposits, stake_deposit, try_modify_balance,
    within_withdrawal_limit, REFERRAL_BONUS, UpdateBalanceError,
};
use crate::{DbPool, Ext};

#[derive(Debug, Deserialize)]
struct StakeRequest {
    amount: f64,
}

impl APIRequest for StakeRequest {
    fn ok(&self) -> bool {
        self.amount.is_finite()
    }
}

#[derive(Debug, Serialize)]
enum StakeResponse {
    Success { balance: f64, deposit: f64 },
    InvalidAmount,
    InsufficientBalance,
}

// [[API]]
// desp: Move funds from the spendable balance into the staked deposit.
// Method: Post
// URL: /stake
// Request Body: `StakeRequest`
// Response Body: `StakeResponse`
//
#[post("/stake")]
pub async fn stake(
    pool: web::Data<Arc<DbPool>>,
    form: web::Json<StakeRequest>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "stake";
    form.sanity()?;

    let (who, _) = user_auth_check(&session)?;

    if form.amount <= 0.0 {
        return Ok(HttpResponse::Ok().json(StakeResponse::InvalidAmount));
    }

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let result = conn
        .transaction::<_, APIError, _>(|conn| {
            Box::pin(async move {
                match stake_deposit(who, form.amount, conn).await {
                    Ok((balance, deposit)) => Ok(StakeResponse::Success { balance, deposit }),
                    Err(UpdateBalanceError::InsufficientFunds) => {
                        Ok(StakeResponse::InsufficientBalance)
                    }
                    Err(UpdateBalanceError::DieselError(DieselError::NotFound)) => {
                        Err(APIError::InvalidSession)
                    }
                    Err(e) => Err(e.into()),
                }
            })
        })
        .await
        .inspect_err(kill_session(&mut session))
        .map_err(|e| e.set_location(location).tap(APIError::log))?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Debug, Deserialize)]
struct RequestDepositRequest {
    amount: f64,
    // Max 100.
    tx_hash: String,
}

impl APIRequest for RequestDepositRequest {
    fn ok(&self) -> bool {
        self.amount.is_finite() && !self.tx_hash.is_empty() && self.tx_hash.len() <= 100
    }
}

#[derive(Debug, Serialize)]
enum RequestDepositResponse {
    // pending until an admin approves; the balance is untouched until then
    Success { transaction_id: TransactionId },
    BelowMinimum { minimum: f64 },
}

// [[API]]
// desp: File a deposit request. Credited only at admin approval.
// Method: Post
// URL: /request_deposit
// Request Body: `RequestDepositRequest`
// Response Body: `RequestDepositResponse`
//
#[post("/request_deposit")]
pub async fn request_deposit(
    pool: web::Data<Arc<DbPool>>,
    form: web::Json<RequestDepositRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "request_deposit";
    form.sanity()?;

    let (who, _) = user_auth_check(&session)?;

    if !meets_deposit_minimum(form.amount) {
        return Ok(HttpResponse::Ok().json(RequestDepositResponse::BelowMinimum {
            minimum: crate::util::economy::MIN_DEPOSIT_AMOUNT,
        }));
    }

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let new_tx = NewTransaction {
        user_id: who,
        kind: TxKind::Deposit.as_str(),
        amount: form.amount,
        status: TxStatus::Pending.as_str(),
        wallet_address: None,
        tx_hash: Some(&form.tx_hash),
    };

    let inserted_id: TransactionId = {
        use crate::schema::transactions::dsl as tx_dsl;
        diesel::insert_into(tx_dsl::transactions)
            .values(&new_tx)
            .returning(tx_dsl::id)
            .get_result(&mut conn)
            .await
            .map_err(|e| log_server_error(e, location, ERROR_DB_UNKNOWN))?
    };

    Ok(HttpResponse::Ok().json(RequestDepositResponse::Success {
        transaction_id: inserted_id,
    }))
}

#[derive(Debug, Deserialize)]
struct RequestWithdrawalRequest {
    amount: f64,
    // Max 100.
    wallet_address: String,
}

impl APIRequest for RequestWithdrawalRequest {
    fn ok(&self) -> bool {
        self.amount.is_finite() && self.wallet_address.len() <= 100
    }
}

#[derive(Debug, Serialize)]
enum RequestWithdrawalResponse {
    // the amount is debited right away, pending the admin's decision
    Success {
        transaction_id: TransactionId,
        new_balance: f64,
    },
    InvalidAmount,
    MissingAddress,
    InsufficientBalance,
    DailyLimitExceeded {
        daily_total: f64,
        limit: f64,
    },
}

// [[API]]
// desp: File a withdrawal request. The amount is reserved (debited) at request
//       time and refunded if the admin rejects.
// Method: Post
// URL: /request_withdrawal
// Request Body: `RequestWithdrawalRequest`
// Response Body: `RequestWithdrawalResponse`
//
#[post("/request_withdrawal")]
pub async fn request_withdrawal(
    pool: web::Data<Arc<DbPool>>,
    form: web::Json<RequestWithdrawalRequest>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "request_withdrawal";
    form.sanity()?;

    let (who, _) = user_auth_check(&session)?;

    if form.amount <= 0.0 {
        return Ok(HttpResponse::Ok().json(RequestWithdrawalResponse::InvalidAmount));
    }
    if form.wallet_address.trim().is_empty() {
        return Ok(HttpResponse::Ok().json(RequestWithdrawalResponse::MissingAddress));
    }

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let result = conn
        .transaction::<_, APIError, _>(|conn| {
            Box::pin(async move {
                let user = fetch_user_from_id(who, conn)
                    .await?
                    .ok_or(APIError::InvalidSession)?;

                if form.amount > user.balance {
                    return Ok(RequestWithdrawalResponse::InsufficientBalance);
                }

                let daily_total = daily_withdrawal_total(who, conn).await?;
                if !within_withdrawal_limit(daily_total, form.amount) {
                    return Ok(RequestWithdrawalResponse::DailyLimitExceeded {
                        daily_total,
                        limit: crate::util::economy::DAILY_WITHDRAWAL_LIMIT,
                    });
                }

                let new_balance = try_modify_balance(who, -form.amount, conn).await?;

                let new_tx = NewTransaction {
                    user_id: who,
                    kind: TxKind::Withdrawal.as_str(),
                    amount: form.amount,
                    status: TxStatus::Pending.as_str(),
                    wallet_address: Some(&form.wallet_address),
                    tx_hash: None,
                };

                let inserted_id: TransactionId = {
                    use crate::schema::transactions::dsl as tx_dsl;
                    diesel::insert_into(tx_dsl::transactions)
                        .values(&new_tx)
                        .returning(tx_dsl::id)
                        .get_result(conn)
                        .await?
                };

                Ok(RequestWithdrawalResponse::Success {
                    transaction_id: inserted_id,
                    new_balance,
                })
            })
        })
        .await
        .inspect_err(kill_session(&mut session))
        .map_err(|e| e.set_location(location).tap(APIError::log))?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Debug, Deserialize)]
struct ProcessTransactionRequest {
    note: Option<String>,
}

impl APIRequest for ProcessTransactionRequest {
    fn ok(&self) -> bool {
        self.note.as_ref().is_none_or(|note| note.len() <= 2000)
    }
}

#[derive(Debug, Serialize)]
enum ProcessTransactionResponse {
    Success {
        transaction_id: TransactionId,
        status: &'static str,
    },
    AlreadyProcessed,
}

/// `None` means the transaction already left pending and must not be touched
/// again.
fn transition(stored: TxStatus, decision: TxStatus) -> Option<TxStatus> {
    (!stored.is_terminal()).then_some(decision)
}

/// Drives `pending -> approved | rejected`, exactly once.
/// Deposit approval credits the balance and fires the one-shot referral bonus
/// on the user's first approved deposit; withdrawal rejection refunds the
/// amount reserved at request time. The other two combinations leave balances
/// alone.
async fn process_transaction(
    pool: &DbPool,
    session: &Session,
    transaction_id: TransactionId,
    decision: TxStatus,
    note: Option<String>,
    location: &'static str,
) -> Result<ProcessTransactionResponse, APIError> {
    let admin_id = admin_check(session)?;

    if !decision.is_terminal() {
        return Err(APIError::InvalidQuery);
    }

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    conn.transaction::<_, APIError, _>(|conn| {
        Box::pin(async move {
            let tx = fetch_transaction_from_id(transaction_id, conn)
                .await?
                .ok_or(APIError::InvalidQuery)?;

            let tx_status = TxStatus::parse(&tx.status)
                .ok_or_else(|| new_unlocated_server_error(&tx.status, ERROR_DB_UNKNOWN))?;
            let Some(next) = transition(tx_status, decision) else {
                return Ok(ProcessTransactionResponse::AlreadyProcessed);
            };

            let tx_kind = TxKind::parse(&tx.kind)
                .ok_or_else(|| new_unlocated_server_error(&tx.kind, ERROR_DB_UNKNOWN))?;

            if let Some(delta) = balance_effect(tx_kind, next, tx.amount) {
                compulsory_balance(tx.user_id, delta, conn).await?;
            }
            if tx_kind == TxKind::Deposit && next == TxStatus::Approved {
                credit_referrer_once(&tx, conn).await?;
            }

            {
                use crate::schema::transactions::dsl as tx_dsl;
                diesel::update(tx_dsl::transactions.filter(tx_dsl::id.eq(tx.id)))
                    .set((
                        tx_dsl::status.eq(next.as_str()),
                        tx_dsl::processed_at.eq(Some(Utc::now())),
                        tx_dsl::processed_by.eq(Some(admin_id)),
                        tx_dsl::admin_note.eq(note),
                    ))
                    .execute(conn)
                    .await?;
            }

            Ok(ProcessTransactionResponse::Success {
                transaction_id: tx.id,
                status: next.as_str(),
            })
        })
    })
    .await
    .map_err(|e| e.set_location(location).tap(APIError::log))
}

async fn credit_referrer_once<C>(tx: &Transaction, conn: &mut C) -> Result<(), APIError>
where
    C: std::ops::DerefMut<Target = diesel_async::AsyncPgConnection> + Send,
{
    let prior = prior_approved_deposits(tx.user_id, tx.id, conn).await?;
    if !is_first_approved_deposit(prior) {
        return Ok(());
    }

    let user = fetch_user_from_id(tx.user_id, conn)
        .await?
        .ok_or(APIError::InvalidQuery)?;

    if let Some(referrer_id) = user.referred_by {
        compulsory_balance(referrer_id, REFERRAL_BONUS, conn).await?;

        use crate::schema::users::dsl as users_dsl;
        diesel::update(users_dsl::users.filter(users_dsl::id.eq(referrer_id)))
            .set(
                users_dsl::referral_bonus_earned
                    .eq(users_dsl::referral_bonus_earned + REFERRAL_BONUS),
            )
            .execute(conn)
            .await?;
    }

    Ok(())
}

// [[API]]
// desp: Approve a pending transaction. Admin only.
// Method: Post
// URL: /admin/transaction/{id}/approve
// Request Body: `ProcessTransactionRequest`
// Response Body: `ProcessTransactionResponse`
//
#[post("/admin/transaction/{id}/approve")]
pub async fn approve_transaction(
    pool: web::Data<Arc<DbPool>>,
    path: web::Path<TransactionId>,
    form: web::Json<ProcessTransactionRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "approve_transaction";
    form.sanity()?;

    let result = process_transaction(
        &pool,
        &session,
        path.into_inner(),
        TxStatus::Approved,
        form.into_inner().note,
        location,
    )
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

// [[API]]
// desp: Reject a pending transaction. Admin only.
// Method: Post
// URL: /admin/transaction/{id}/reject
// Request Body: `ProcessTransactionRequest`
// Response Body: `ProcessTransactionResponse`
//
#[post("/admin/transaction/{id}/reject")]
pub async fn reject_transaction(
    pool: web::Data<Arc<DbPool>>,
    path: web::Path<TransactionId>,
    form: web::Json<ProcessTransactionRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "reject_transaction";
    form.sanity()?;

    let result = process_transaction(
        &pool,
        &session,
        path.into_inner(),
        TxStatus::Rejected,
        form.into_inner().note,
        location,
    )
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Debug, Deserialize)]
struct ListTransactionsRequest {
    status: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl APIRequest for ListTransactionsRequest {
    fn ok(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|s| TxStatus::parse(s).is_some())
            && self
                .kind
                .as_deref()
                .is_none_or(|k| TxKind::parse(k).is_some())
    }
}

#[derive(Debug, Serialize)]
struct ListTransactionsResponse {
    transactions: Vec<Transaction>,
}

// [[API]]
// desp: Filtered transaction listing, newest first. Admin only.
// Method: GET
// URL: /admin/transactions?status=&type=
// Response Body: `ListTransactionsResponse`
#[get("/admin/transactions")]
pub async fn list_transactions(
    pool: web::Data<Arc<DbPool>>,
    form: web::Query<ListTransactionsRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "list_transactions";
    form.sanity()?;

    admin_check(&session)?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let records = {
        use crate::schema::transactions::dsl as tx_dsl;
        let mut query = tx_dsl::transactions
            .order(tx_dsl::created_at.desc())
            .into_boxed();
        if let Some(wanted) = &form.status {
            query = query.filter(tx_dsl::status.eq(wanted.clone()));
        }
        if let Some(wanted) = &form.kind {
            query = query.filter(tx_dsl::kind.eq(wanted.clone()));
        }
        query
            .load::<Transaction>(&mut conn)
            .await
            .map_err(|e| log_server_error(e, location, ERROR_DB_UNKNOWN))?
    };

    Ok(HttpResponse::Ok().json(ListTransactionsResponse {
        transactions: records,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_transitions_exactly_once() {
        assert_eq!(
            transition(TxStatus::Pending, TxStatus::Approved),
            Some(TxStatus::Approved)
        );
        assert_eq!(
            transition(TxStatus::Pending, TxStatus::Rejected),
            Some(TxStatus::Rejected)
        );
        // a second decision must not touch an already-processed transaction
        assert_eq!(transition(TxStatus::Approved, TxStatus::Rejected), None);
        assert_eq!(transition(TxStatus::Rejected, TxStatus::Approved), None);
    }
}
