use std::ops::DerefMut;

use actix_session::Session;
use actix_web::{
    error,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use diesel::result::Error;

use derive_more::derive::Display;
use diesel::prelude::*;

use crate::{
    models::{Quest, QuestId, Transaction, TransactionId, User, UserId},
    Ext,
};
use log::error;

use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;

pub trait APIRequest: Sized {
    fn ok(&self) -> bool;
    fn sanity(&self) -> Result<(), APIError> {
        if self.ok() {
            Ok(())
        } else {
            Err(APIError::InvalidFormData)
        }
    }
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum APIError {
    #[display("Invalid form data")]
    InvalidFormData,

    #[display("Invalid query")]
    InvalidQuery,

    #[display("Invalid session")]
    InvalidSession,

    #[display("Not logged in")]
    NotLogin,

    #[display("Insufficient balance")]
    InsufficientBalance,

    #[display("Unauthorized access")]
    Unauthorized,

    #[display("Server error at {location}, ref[{refnum}]: {msg}")]
    ServerError {
        location: &'static str,
        msg: &'static str,
        refnum: uuid::Uuid,
    },
}

impl APIError {
    pub fn set_location(self, location: &'static str) -> Self {
        match self {
            APIError::ServerError {
                location: _,
                msg,
                refnum,
            } => APIError::ServerError {
                location,
                msg,
                refnum,
            },
            _ => self,
        }
    }

    pub fn log(&self) {
        if let APIError::ServerError {
            location,
            msg,
            refnum,
        } = self
        {
            error!("Server error at {location}, ref[{refnum}]: {msg}");
        }
    }
}

impl From<Error> for APIError {
    fn from(e: Error) -> Self {
        new_unlocated_server_error(e, "Transaction")
    }
}

impl error::ResponseError for APIError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::html())
            .body(self.to_string())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            APIError::InvalidFormData => StatusCode::NOT_ACCEPTABLE,
            APIError::ServerError {
                location: _,
                msg: _,
                refnum: _,
            } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Session-level identity: user id plus the admin role flag captured at login.
pub fn user_auth_check(session: &Session) -> Result<(UserId, bool), APIError> {
    if let (Ok(Some(user_id)), Ok(Some(is_admin))) = (
        session.get::<UserId>(SESSION_USER_ID),
        session.get::<bool>(SESSION_IS_ADMIN),
    ) {
        Ok((user_id, is_admin))
    } else {
        Err(APIError::NotLogin)
    }
}

pub fn admin_check(session: &Session) -> Result<UserId, APIError> {
    let (user_id, is_admin) = user_auth_check(session)?;
    if is_admin {
        Ok(user_id)
    } else {
        Err(APIError::Unauthorized)
    }
}

pub async fn fetch_user_from_id<C>(user_id: UserId, conn: &mut C) -> Result<Option<User>, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::users::dsl::*;

    match users.filter(id.eq(user_id)).first::<User>(conn).await {
        Ok(user) => Ok(Some(user)),
        Err(Error::NotFound) => Ok(None),
        Err(e) => Err(new_unlocated_server_error(e, ERROR_DB_UNKNOWN)),
    }
}

pub async fn fetch_user_from_email<C>(
    user_email: &str,
    conn: &mut C,
) -> Result<Option<User>, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::users::dsl::*;

    match users
        .filter(email.eq(user_email))
        .first::<User>(conn)
        .await
    {
        Ok(user) => Ok(Some(user)),
        Err(Error::NotFound) => Ok(None),
        Err(e) => Err(new_unlocated_server_error(e, ERROR_DB_UNKNOWN)),
    }
}

pub async fn fetch_user_from_referral_code<C>(
    code: &str,
    conn: &mut C,
) -> Result<Option<User>, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::users::dsl::*;

    match users
        .filter(referral_code.eq(code))
        .first::<User>(conn)
        .await
    {
        Ok(user) => Ok(Some(user)),
        Err(Error::NotFound) => Ok(None),
        Err(e) => Err(new_unlocated_server_error(e, ERROR_DB_UNKNOWN)),
    }
}

pub async fn fetch_quest_from_id<C>(
    quest_id: QuestId,
    conn: &mut C,
) -> Result<Option<Quest>, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::quests::dsl::*;

    match quests.filter(id.eq(quest_id)).first::<Quest>(conn).await {
        Ok(quest) => Ok(Some(quest)),
        Err(Error::NotFound) => Ok(None),
        Err(e) => Err(new_unlocated_server_error(e, ERROR_DB_UNKNOWN)),
    }
}

pub async fn fetch_transaction_from_id<C>(
    transaction_id: TransactionId,
    conn: &mut C,
) -> Result<Option<Transaction>, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::transactions::dsl::*;

    match transactions
        .filter(id.eq(transaction_id))
        .first::<Transaction>(conn)
        .await
    {
        Ok(tx) => Ok(Some(tx)),
        Err(Error::NotFound) => Ok(None),
        Err(e) => Err(new_unlocated_server_error(e, ERROR_DB_UNKNOWN)),
    }
}

pub async fn count_pending_transactions<C>(who: UserId, conn: &mut C) -> Result<i64, APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::models::TxStatus;
    use crate::schema::transactions::dsl::*;

    transactions
        .filter(user_id.eq(who).and(status.eq(TxStatus::Pending.as_str())))
        .count()
        .get_result::<i64>(conn)
        .await
        .map_err(|e| new_unlocated_server_error(e, ERROR_DB_UNKNOWN))
}

pub fn log_server_error<E>(error: E, location: &'static str, msg: &'static str) -> APIError
where
    E: derive_more::Display,
{
    new_unlocated_server_error(error, msg)
        .set_location(location)
        .tap(APIError::log)
}

pub fn new_unlocated_server_error<E>(error: E, msg: &'static str) -> APIError
where
    E: derive_more::Display,
{
    let refnum = uuid::Uuid::new_v4();
    error!("Error [{refnum}]: {error}");
    APIError::ServerError {
        location: LOCATION_UNKNOWN,
        msg,
        refnum,
    }
}

pub fn kill_session(session: &mut Session) -> impl FnMut(&APIError) + '_ {
    |result| {
        if result == &APIError::InvalidSession {
            session.clear()
        };
    }
}

pub static SESSION_USER_ID: &str = "user_id";
pub static SESSION_IS_ADMIN: &str = "is_admin";

pub static ERROR_DB_CONNECTION: &str = "db_connction_failed";
pub static ERROR_SESSION_INSERT: &str = "session_setting_failed";
pub static ERROR_DB_UNKNOWN: &str = "database_unknown";

pub static LOCATION_UNKNOWN: &str = "[unknown]";
