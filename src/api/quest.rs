use std::collections::HashSet;
use std::sync::Arc;

use actix_session::Session;
use actix_web::{get, post, web, HttpResponse, Responder};

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Serialize;

use crate::models::{ActionType, Quest, QuestCompletion, QuestId};
use crate::util::api_util::*;
use crate::util::economy::{
    can_complete, completed_today, compulsory_balance, quest_reward, referral_count, utc_today,
    QUEST_DAILY_LIMIT, UpdateBalanceError,
};
use crate::{DbPool, Ext};

#[derive(Debug, Serialize)]
struct QuestStatus {
    id: QuestId,
    title: String,
    description: String,
    icon: String,
    action_url: String,
    action_type: String,
    completed_today: bool,
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    username: String,
    balance: f64,
    deposit: f64,
    referral_code: String,
    referral_bonus_earned: f64,
    referral_count: i64,
    completed_today: i64,
    quest_daily_limit: i64,
    pending_transactions: i64,
    quests: Vec<QuestStatus>,
}

// [[API]]
// desp: Balance, quest list and today's completion state.
// Method: GET
// URL: /dashboard
// Response Body: `DashboardResponse`
#[get("/dashboard")]
pub async fn dashboard(
    pool: web::Data<Arc<DbPool>>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "dashboard";

    let (user_id, _) = user_auth_check(&session)?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let user = fetch_user_from_id(user_id, &mut conn)
        .await?
        .ok_or(APIError::InvalidSession)
        .inspect_err(kill_session(&mut session))
        .map_err(|e| e.set_location(location).tap(APIError::log))?;

    let quests = {
        use crate::schema::quests::dsl::*;
        quests
            .order(ordinal.asc())
            .load::<Quest>(&mut conn)
            .await
            .map_err(|e| log_server_error(e, location, ERROR_DB_UNKNOWN))?
    };

    let completed_ids: HashSet<QuestId> = {
        use crate::schema::quest_completions::dsl as qc_dsl;
        qc_dsl::quest_completions
            .filter(qc_dsl::user_id.eq(user.id).and(qc_dsl::day.eq(utc_today())))
            .select(qc_dsl::quest_id)
            .load::<QuestId>(&mut conn)
            .await
            .map_err(|e| log_server_error(e, location, ERROR_DB_UNKNOWN))?
            .into_iter()
            .collect()
    };

    let pending = count_pending_transactions(user.id, &mut conn).await?;
    let referrals = referral_count(user.id, &mut conn).await?;

    let quests = quests
        .into_iter()
        .map(|quest| QuestStatus {
            completed_today: completed_ids.contains(&quest.id),
            id: quest.id,
            title: quest.title,
            description: quest.description,
            icon: quest.icon,
            action_url: quest.action_url,
            action_type: quest.action_type,
        })
        .collect();

    Ok(HttpResponse::Ok().json(DashboardResponse {
        username: user.username,
        balance: user.balance,
        deposit: user.deposit,
        referral_code: user.referral_code,
        referral_bonus_earned: user.referral_bonus_earned,
        referral_count: referrals,
        completed_today: completed_ids.len() as i64,
        quest_daily_limit: QUEST_DAILY_LIMIT,
        pending_transactions: pending,
        quests,
    }))
}

/// Wire shape fixed by the frontend: flat object, optional fields absent on
/// failure.
#[derive(Debug, Serialize)]
pub struct CompleteQuestResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_today: Option<i64>,
}

impl CompleteQuestResponse {
    fn failed(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_owned(),
            new_balance: None,
            completed_today: None,
        }
    }

    fn rewarded(reward: f64, new_balance: f64, completed: i64) -> Self {
        Self {
            success: true,
            message: format!("Quest completed! You earned {:.2}", reward),
            new_balance: Some(new_balance),
            completed_today: Some(completed),
        }
    }
}

enum CompleteQuestTxnError {
    // unique (user, quest, day) violated: lost a double-submit race
    Duplicate,
    API(APIError),
}

impl From<DieselError> for CompleteQuestTxnError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                CompleteQuestTxnError::Duplicate
            }
            e => CompleteQuestTxnError::API(e.into()),
        }
    }
}

impl From<APIError> for CompleteQuestTxnError {
    fn from(e: APIError) -> Self {
        CompleteQuestTxnError::API(e)
    }
}

impl From<UpdateBalanceError> for CompleteQuestTxnError {
    fn from(e: UpdateBalanceError) -> Self {
        CompleteQuestTxnError::API(e.into())
    }
}

// [[API]]
// desp: Complete a quest and credit the reward snapshot. The daily-uniqueness
//       rule is backed by the (user, quest, day) constraint, so the insert and
//       the balance credit commit or roll back together.
// Method: POST
// URL: /complete_quest/{quest_id}
// Response Body: `CompleteQuestResponse`
#[post("/complete_quest/{quest_id}")]
pub async fn complete_quest(
    pool: web::Data<Arc<DbPool>>,
    path: web::Path<QuestId>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "complete_quest";

    let (user_id, _) = user_auth_check(&session)?;
    let quest_id = path.into_inner();

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let result = conn
        .transaction::<_, CompleteQuestTxnError, _>(|conn| {
            Box::pin(async move {
                let user = fetch_user_from_id(user_id, conn)
                    .await?
                    .ok_or(APIError::InvalidSession)?;

                let completed = completed_today(user.id, conn).await?;
                if !can_complete(completed, user.deposit) {
                    return Ok(CompleteQuestResponse::failed(
                        "You already completed 4 quests today or have no active deposit.",
                    ));
                }

                let quest = match fetch_quest_from_id(quest_id, conn).await? {
                    Some(quest) => quest,
                    None => return Ok(CompleteQuestResponse::failed("Quest not found.")),
                };

                if ActionType::parse(&quest.action_type) == Some(ActionType::Referral)
                    && referral_count(user.id, conn).await? == 0
                {
                    return Ok(CompleteQuestResponse::failed(
                        "You need at least one referral to complete this quest.",
                    ));
                }

                let reward_amount = quest_reward(user.deposit);
                let now = Utc::now();

                {
                    use crate::schema::quest_completions::dsl as qc_dsl;
                    diesel::insert_into(qc_dsl::quest_completions)
                        .values((
                            qc_dsl::user_id.eq(user.id),
                            qc_dsl::quest_id.eq(quest.id),
                            qc_dsl::reward.eq(reward_amount),
                            qc_dsl::completed_at.eq(now),
                            qc_dsl::day.eq(now.date_naive()),
                        ))
                        .execute(conn)
                        .await?;
                }

                let new_balance = compulsory_balance(user.id, reward_amount, conn).await?;

                Ok(CompleteQuestResponse::rewarded(
                    reward_amount,
                    new_balance,
                    completed + 1,
                ))
            })
        })
        .await;

    let response = match result {
        Ok(response) => response,
        Err(CompleteQuestTxnError::Duplicate) => {
            CompleteQuestResponse::failed("You already completed this quest today.")
        }
        Err(CompleteQuestTxnError::API(e)) => {
            let e = e.set_location(location).tap(APIError::log);
            kill_session(&mut session)(&e);
            return Err(e);
        }
    };

    Ok(HttpResponse::Ok().json(response))
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    completions: Vec<QuestCompletion>,
}

// [[API]]
// desp: The user's completion records, newest first.
// Method: GET
// URL: /history
// Response Body: `HistoryResponse`
#[get("/history")]
pub async fn history(
    pool: web::Data<Arc<DbPool>>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "history";

    let (who, _) = user_auth_check(&session)?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let completions = {
        use crate::schema::quest_completions::dsl::*;
        quest_completions
            .filter(user_id.eq(who))
            .order(completed_at.desc())
            .load::<QuestCompletion>(&mut conn)
            .await
            .map_err(|e| log_server_error(e, location, ERROR_DB_UNKNOWN))?
    };

    Ok(HttpResponse::Ok().json(HistoryResponse { completions }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_omits_optional_fields() {
        let json =
            serde_json::to_value(CompleteQuestResponse::failed("Quest not found.")).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("new_balance").is_none());
        assert!(json.get("completed_today").is_none());
    }

    #[test]
    fn success_reports_balance_and_count() {
        let json = serde_json::to_value(CompleteQuestResponse::rewarded(50.0, 150.0, 1)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["new_balance"], 150.0);
        assert_eq!(json["completed_today"], 1);
        assert_eq!(json["message"], "Quest completed! You earned 50.00");
    }
}
