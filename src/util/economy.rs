use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::QueryDsl;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use std::ops::DerefMut;

use crate::models::{TransactionId, TxKind, TxStatus, UserId};

use super::api_util::{new_unlocated_server_error, APIError, ERROR_DB_UNKNOWN};

/// At most this many quest completions per user per UTC day. Together with
/// `REWARD_RATE` this caps daily payout exposure at `4 * 0.5 * deposit`.
pub const QUEST_DAILY_LIMIT: i64 = 4;

/// Flat reward rate on the active deposit; the deposit itself is not consumed,
/// so every completion on a given day pays the same amount.
pub const REWARD_RATE: f64 = 0.5;

pub const MIN_DEPOSIT_AMOUNT: f64 = 200.0;
pub const DAILY_WITHDRAWAL_LIMIT: f64 = 150.0;
pub const REFERRAL_BONUS: f64 = 10.0;

pub fn quest_reward(deposit: f64) -> f64 {
    deposit * REWARD_RATE
}

pub fn can_complete(completed_today: i64, deposit: f64) -> bool {
    completed_today < QUEST_DAILY_LIMIT && deposit > 0.0
}

pub fn meets_deposit_minimum(amount: f64) -> bool {
    amount >= MIN_DEPOSIT_AMOUNT
}

pub fn within_withdrawal_limit(daily_total: f64, amount: f64) -> bool {
    daily_total + amount <= DAILY_WITHDRAWAL_LIMIT
}

/// Balance delta applied when a terminal `decision` lands on a pending
/// transaction of `kind`. Deposits are credited at approval; a rejected
/// withdrawal refunds the reservation made at request time. The other two
/// combinations leave the balance alone: an approved withdrawal was already
/// debited when requested, and a rejected deposit never touched it.
pub fn balance_effect(kind: TxKind, decision: TxStatus, amount: f64) -> Option<f64> {
    match (kind, decision) {
        (TxKind::Deposit, TxStatus::Approved) => Some(amount),
        (TxKind::Withdrawal, TxStatus::Rejected) => Some(amount),
        _ => None,
    }
}

/// The referral bonus fires only on the referred user's first approved
/// deposit, counted excluding the transaction being processed.
pub fn is_first_approved_deposit(prior_approved: i64) -> bool {
    prior_approved == 0
}

pub fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn utc_day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_hms_opt(0, 0, 0).unwrap().and_utc();
    (start, start + TimeDelta::days(1))
}

#[derive(Debug)]
pub enum UpdateBalanceError {
    InsufficientFunds,
    DieselError(DieselError),
}

impl From<DieselError> for UpdateBalanceError {
    fn from(err: DieselError) -> Self {
        UpdateBalanceError::DieselError(err)
    }
}

impl From<UpdateBalanceError> for APIError {
    fn from(value: UpdateBalanceError) -> Self {
        match value {
            UpdateBalanceError::InsufficientFunds => APIError::InsufficientBalance,
            UpdateBalanceError::DieselError(error) => new_unlocated_server_error(error, "Economy"),
        }
    }
}

pub async fn try_modify_balance<C>(
    user_id: UserId,
    amount: f64,
    conn: &mut C,
) -> Result<f64, UpdateBalanceError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    modify_balance(user_id, amount, conn, false).await
}

pub async fn compulsory_balance<C>(
    user_id: UserId,
    amount: f64,
    conn: &mut C,
) -> Result<f64, UpdateBalanceError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    modify_balance(user_id, amount, conn, true).await
}

/// Applies a signed delta to the user's spendable balance.
/// CAVEAT: Always used within a sql transaction!
async fn modify_balance<C>(
    user_id: UserId,
    amount: f64,
    conn: &mut C,
    allow_negative: bool,
) -> Result<f64, UpdateBalanceError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::users::dsl as users_dsl;

    let current_balance = users_dsl::users
        .filter(users_dsl::id.eq(user_id))
        .select(users_dsl::balance)
        .first::<f64>(conn)
        .await?;

    let new_balance = current_balance + amount;

    if new_balance < 0.0 && !allow_negative {
        return Err(UpdateBalanceError::InsufficientFunds);
    }

    diesel::update(users_dsl::users.filter(users_dsl::id.eq(user_id)))
        .set(users_dsl::balance.eq(new_balance))
        .execute(conn)
        .await?;

    Ok(new_balance)
}

/// Moves funds from the spendable balance into the staked deposit that gates
/// and scales quest rewards. The original moved money without checking the
/// balance first; here the stake is refused rather than driving it negative.
/// CAVEAT: Always used within a sql transaction!
pub async fn stake_deposit<C>(
    user_id: UserId,
    amount: f64,
    conn: &mut C,
) -> Result<(f64, f64), UpdateBalanceError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::users::dsl as users_dsl;

    let (current_balance, current_deposit) = users_dsl::users
        .filter(users_dsl::id.eq(user_id))
        .select((users_dsl::balance, users_dsl::deposit))
        .first::<(f64, f64)>(conn)
        .await?;

    if amount > current_balance {
        return Err(UpdateBalanceError::InsufficientFunds);
    }

    let new_balance = current_balance - amount;
    let new_deposit = current_deposit + amount;

    diesel::update(users_dsl::users.filter(users_dsl::id.eq(user_id)))
        .set((
            users_dsl::balance.eq(new_balance),
            users_dsl::deposit.eq(new_deposit),
        ))
        .execute(conn)
        .await?;

    Ok((new_balance, new_deposit))
}

pub async fn completed_today<C>(who: UserId, conn: &mut C) -> Result<i64, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::quest_completions::dsl::*;

    quest_completions
        .filter(user_id.eq(who).and(day.eq(utc_today())))
        .count()
        .get_result::<i64>(conn)
        .await
        .map_err(|e| new_unlocated_server_error(e, ERROR_DB_UNKNOWN))
}

/// Sum of withdrawal amounts requested on the current UTC day, any status.
/// Rejected withdrawals still count against the daily limit.
pub async fn daily_withdrawal_total<C>(who: UserId, conn: &mut C) -> Result<f64, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::transactions::dsl::*;

    let (day_start, day_end) = utc_day_bounds(utc_today());

    transactions
        .filter(
            user_id
                .eq(who)
                .and(kind.eq(TxKind::Withdrawal.as_str()))
                .and(created_at.ge(day_start))
                .and(created_at.lt(day_end)),
        )
        .select(diesel::dsl::sum(amount))
        .first::<Option<f64>>(conn)
        .await
        .map(|total| total.unwrap_or(0.0))
        .map_err(|e| new_unlocated_server_error(e, ERROR_DB_UNKNOWN))
}

pub async fn referral_count<C>(who: UserId, conn: &mut C) -> Result<i64, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::users::dsl::*;

    users
        .filter(referred_by.eq(Some(who)))
        .count()
        .get_result::<i64>(conn)
        .await
        .map_err(|e| new_unlocated_server_error(e, ERROR_DB_UNKNOWN))
}

/// Approved deposits of the user other than `excluding`. Zero means the
/// transaction being processed is the user's first approved deposit, which is
/// what triggers the one-shot referral bonus.
pub async fn prior_approved_deposits<C>(
    who: UserId,
    excluding: TransactionId,
    conn: &mut C,
) -> Result<i64, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::transactions::dsl::*;

    transactions
        .filter(
            user_id
                .eq(who)
                .and(kind.eq(TxKind::Deposit.as_str()))
                .and(status.eq(TxStatus::Approved.as_str()))
                .and(id.ne(excluding)),
        )
        .count()
        .get_result::<i64>(conn)
        .await
        .map_err(|e| new_unlocated_server_error(e, ERROR_DB_UNKNOWN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_is_half_the_deposit() {
        assert_eq!(quest_reward(100.0), 50.0);
        assert_eq!(quest_reward(0.0), 0.0);
    }

    #[test]
    fn completion_gate() {
        assert!(can_complete(0, 100.0));
        assert!(can_complete(3, 100.0));
        // fourth completion of the day was the last allowed one
        assert!(!can_complete(4, 100.0));
        // no active deposit, no reward
        assert!(!can_complete(0, 0.0));
    }

    #[test]
    fn deposit_minimum() {
        assert!(!meets_deposit_minimum(150.0));
        assert!(!meets_deposit_minimum(199.99));
        assert!(meets_deposit_minimum(200.0));
    }

    #[test]
    fn withdrawal_daily_limit() {
        assert!(!within_withdrawal_limit(0.0, 160.0));
        assert!(within_withdrawal_limit(0.0, 150.0));
        assert!(within_withdrawal_limit(100.0, 50.0));
        assert!(!within_withdrawal_limit(100.0, 50.01));
    }

    #[test]
    fn balance_effect_of_every_decision() {
        assert_eq!(
            balance_effect(TxKind::Deposit, TxStatus::Approved, 250.0),
            Some(250.0)
        );
        assert_eq!(
            balance_effect(TxKind::Withdrawal, TxStatus::Rejected, 40.0),
            Some(40.0)
        );
        assert_eq!(
            balance_effect(TxKind::Withdrawal, TxStatus::Approved, 40.0),
            None
        );
        assert_eq!(
            balance_effect(TxKind::Deposit, TxStatus::Rejected, 250.0),
            None
        );
    }

    #[test]
    fn withdrawal_reject_restores_pre_request_balance() {
        let before = 120.0;
        let amount = 40.0;
        // request time: the amount is reserved
        let reserved = before - amount;
        // rejection refunds exactly the reservation
        let refund = balance_effect(TxKind::Withdrawal, TxStatus::Rejected, amount).unwrap();
        assert_eq!(reserved + refund, before);
    }

    #[test]
    fn referral_bonus_fires_on_first_approved_deposit_only() {
        assert!(is_first_approved_deposit(0));
        assert!(!is_first_approved_deposit(1));
        assert!(!is_first_approved_deposit(5));
    }

    #[test]
    fn day_bounds_cover_one_day() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let (start, end) = utc_day_bounds(day);
        assert_eq!(start.date_naive(), day);
        assert_eq!(end - start, TimeDelta::days(1));
    }
}
