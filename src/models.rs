use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::Serialize;

pub type UserId = i32;
pub type QuestId = i32;
pub type TransactionId = i32;

#[derive(Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password: String,
    pub salt: String,
    pub balance: f64,
    pub deposit: f64,
    pub is_admin: bool,
    pub referred_by: Option<UserId>,
    pub referral_code: String,
    pub referral_bonus_earned: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Clone, Serialize)]
#[diesel(table_name = crate::schema::quests)]
pub struct Quest {
    pub id: QuestId,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub ordinal: i32,
    pub action_url: String,
    pub action_type: String,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = crate::schema::quest_completions)]
pub struct QuestCompletion {
    pub id: i32,
    pub user_id: UserId,
    pub quest_id: QuestId,
    pub reward: f64,
    pub completed_at: DateTime<Utc>,
    pub day: NaiveDate,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = crate::schema::transactions)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    // "deposit" or "withdrawal", see `TxKind`
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub status: String,
    pub wallet_address: Option<String>,
    pub tx_hash: Option<String>,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<UserId>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::transactions)]
pub struct NewTransaction<'a> {
    pub user_id: UserId,
    pub kind: &'a str,
    pub amount: f64,
    pub status: &'a str,
    pub wallet_address: Option<&'a str>,
    pub tx_hash: Option<&'a str>,
}

/// Direction of a funding request. Stored as lowercase varchar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Deposit,
    Withdrawal,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TxKind::Deposit),
            "withdrawal" => Some(TxKind::Withdrawal),
            _ => None,
        }
    }
}

/// Lifecycle of a funding request. `Pending` is the only non-terminal state;
/// a transaction leaves it exactly once, by admin approval or rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Approved,
    Rejected,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Approved => "approved",
            TxStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TxStatus::Pending),
            "approved" => Some(TxStatus::Approved),
            "rejected" => Some(TxStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Follow,
    Subscribe,
    Join,
    Referral,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Follow => "follow",
            ActionType::Subscribe => "subscribe",
            ActionType::Join => "join",
            ActionType::Referral => "referral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "follow" => Some(ActionType::Follow),
            "subscribe" => Some(ActionType::Subscribe),
            "join" => Some(ActionType::Join),
            "referral" => Some(ActionType::Referral),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_status_roundtrip() {
        for status in [TxStatus::Pending, TxStatus::Approved, TxStatus::Rejected] {
            assert_eq!(TxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TxStatus::parse("processed"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TxStatus::Pending.is_terminal());
        assert!(TxStatus::Approved.is_terminal());
        assert!(TxStatus::Rejected.is_terminal());
    }

    #[test]
    fn tx_kind_roundtrip() {
        for kind in [TxKind::Deposit, TxKind::Withdrawal] {
            assert_eq!(TxKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TxKind::parse("transfer"), None);
    }

    #[test]
    fn action_type_parse() {
        assert_eq!(ActionType::parse("referral"), Some(ActionType::Referral));
        assert_eq!(ActionType::parse("like"), None);
    }
}
