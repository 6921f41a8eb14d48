use crate::schema::users;
use crate::util::api_util::*;
use crate::REFERRAL_CODE_LENGTH;

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{AsyncConnection, RunQueryDsl};

use actix_web::{get, post, web, HttpResponse, Responder};
use dotenv::dotenv;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;

use crate::models::{User, UserId};
use crate::{util::cipher_util, DbPool, Ext};

use actix_session::Session;

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    // Max 80.
    username: String,
    // Max 120.
    email: String,
    // SHA256 of the password.
    password: String,
    referral_code: Option<String>,
}

impl APIRequest for RegisterRequest {
    fn ok(&self) -> bool {
        !self.username.is_empty()
            && self.username.len() <= 80
            && self.email.len() <= 120
            && self.email.contains('@')
            && self.password.len() == 64
            && self
                .referral_code
                .as_ref()
                .is_none_or(|code| code.len() == REFERRAL_CODE_LENGTH)
    }
}

#[derive(Debug, Serialize)]
enum RegisterResponse {
    // returns the user id and the generated referral code.
    Success {
        user_id: UserId,
        referral_code: String,
    },
    UsernameTaken,
    EmailTaken,
    UnknownReferralCode,
}

enum RegisterTxnError {
    // unique username/email violated: lost a double-submit race to the insert
    Taken(RegisterResponse),
    API(APIError),
}

/// Maps the violated unique constraint to the taken-variant the pre-checks
/// would have returned. `users_referral_code_key` is not mapped: a collision
/// of generated codes is a server fault, not a user error.
fn taken_by_constraint(constraint: Option<&str>) -> Option<RegisterResponse> {
    match constraint {
        Some("users_username_key") => Some(RegisterResponse::UsernameTaken),
        Some("users_email_key") => Some(RegisterResponse::EmailTaken),
        _ => None,
    }
}

impl From<DieselError> for RegisterTxnError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                match taken_by_constraint(info.constraint_name()) {
                    Some(taken) => RegisterTxnError::Taken(taken),
                    None => RegisterTxnError::API(new_unlocated_server_error(
                        info.message(),
                        ERROR_DB_UNKNOWN,
                    )),
                }
            }
            e => RegisterTxnError::API(e.into()),
        }
    }
}

impl From<APIError> for RegisterTxnError {
    fn from(e: APIError) -> Self {
        RegisterTxnError::API(e)
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    // SHA256 of the password.
    password: String,
}

impl APIRequest for LoginRequest {
    fn ok(&self) -> bool {
        self.email.len() <= 120 && self.password.len() == 64
    }
}

#[derive(Debug, Serialize)]
enum LoginResponse {
    // Returns the user id
    Success(UserId),
    Error,
}

static LOGIN_TOKEN: Lazy<String> = Lazy::new(|| {
    dotenv().ok();
    env::var("LOGIN_TOKEN").expect("Environment variable LOGIN_TOKEN not set")
});

fn set_loggedin_session(
    session: &mut Session,
    id: UserId,
    is_admin: bool,
    location: &'static str,
) -> Result<(), APIError> {
    session
        .insert(SESSION_USER_ID, id)
        .map_err(|e| log_server_error(e, location, ERROR_SESSION_INSERT))?;
    session
        .insert(SESSION_IS_ADMIN, is_admin)
        .map_err(|e| log_server_error(e, location, ERROR_SESSION_INSERT))?;
    Ok(())
}

// [[API]]
// desp: Register a new account, optionally linked to a referrer.
// Method: Post
// URL: /register
// Request Body: `RegisterRequest`
// Response Body: `RegisterResponse`
//
#[post("/register")]
pub async fn register_user(
    pool: web::Data<Arc<DbPool>>,
    form: web::Json<RegisterRequest>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "register";
    form.sanity()?;
    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let result = conn
        .transaction::<_, RegisterTxnError, _>(|conn| {
            Box::pin(async move {
                let username_taken: i64 = users::table
                    .filter(users::username.eq(&form.username))
                    .count()
                    .get_result(conn)
                    .await?;
                if username_taken > 0 {
                    return Ok(RegisterResponse::UsernameTaken);
                }

                let email_taken: i64 = users::table
                    .filter(users::email.eq(&form.email))
                    .count()
                    .get_result(conn)
                    .await?;
                if email_taken > 0 {
                    return Ok(RegisterResponse::EmailTaken);
                }

                let referred_by = match &form.referral_code {
                    Some(code) => match fetch_user_from_referral_code(code, conn).await? {
                        Some(referrer) => Some(referrer.id),
                        None => return Ok(RegisterResponse::UnknownReferralCode),
                    },
                    None => None,
                };

                let (salt, salted_password) =
                    cipher_util::gen_salted_password(&form.password, &LOGIN_TOKEN);
                let code = cipher_util::gen_referral_code();

                let user: User = diesel::insert_into(users::table)
                    .values((
                        users::username.eq(&form.username),
                        users::email.eq(&form.email),
                        users::password.eq(&salted_password),
                        users::salt.eq(&salt),
                        users::referred_by.eq(referred_by),
                        users::referral_code.eq(&code),
                    ))
                    .returning(User::as_returning())
                    .get_result(conn)
                    .await?;

                Ok(RegisterResponse::Success {
                    user_id: user.id,
                    referral_code: user.referral_code,
                })
            })
        })
        .await;

    let response = match result {
        Ok(response) => response,
        Err(RegisterTxnError::Taken(taken)) => taken,
        Err(RegisterTxnError::API(e)) => return Err(e.set_location(location).tap(APIError::log)),
    };

    if let RegisterResponse::Success { user_id, .. } = &response {
        session.clear();
        set_loggedin_session(&mut session, *user_id, false, location)?;
    }
    Ok(HttpResponse::Ok().json(response))
}

// [[API]]
// desp: Login with email and password.
// Method: Post
// URL: /login
// Request Body: `LoginRequest`
// Response Body: `LoginResponse`
//
#[post("/login")]
pub async fn login_user(
    pool: web::Data<Arc<DbPool>>,
    form: web::Json<LoginRequest>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "login";
    form.sanity()?;
    let mut conn = pool
        .get()
        .await
        .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;

    let result = match fetch_user_from_email(&form.email, &mut conn).await? {
        Some(user) => {
            if let Some(user) =
                cipher_util::check_salted_password(&user, form.password.as_str(), &LOGIN_TOKEN)
            {
                session.clear();
                set_loggedin_session(&mut session, user.id, user.is_admin, location)?;
                LoginResponse::Success(user.id)
            } else {
                LoginResponse::Error
            }
        }
        None => LoginResponse::Error,
    };

    Ok(HttpResponse::Ok().json(result))
}

// [[API]]
// desp: Drop the session.
// Method: Post
// URL: /logout
// Response Body: N/A
//
#[post("/logout")]
pub async fn logout_user(session: Session) -> impl Responder {
    session.clear();
    HttpResponse::Ok().body("Logged out")
}

// For debug only!
#[get("/user")]
pub async fn get_user(session: Session) -> impl Responder {
    if let Ok((user_id, is_admin)) = user_auth_check(&session) {
        HttpResponse::Ok().body(format!("Admin {}, User id {}", is_admin, user_id))
    } else {
        HttpResponse::Unauthorized().body("No user logged in")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::DatabaseErrorInformation;

    struct UniqueInfo(&'static str);

    impl DatabaseErrorInformation for UniqueInfo {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            Some("users")
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            Some(self.0)
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    fn unique_violation(constraint: &'static str) -> DieselError {
        DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(UniqueInfo(constraint)),
        )
    }

    // two registrations racing past the pre-checks: the loser's insert hits
    // the unique constraint and must surface as a taken-variant, not a 500
    #[test]
    fn insert_race_maps_to_taken_responses() {
        assert!(matches!(
            RegisterTxnError::from(unique_violation("users_username_key")),
            RegisterTxnError::Taken(RegisterResponse::UsernameTaken)
        ));
        assert!(matches!(
            RegisterTxnError::from(unique_violation("users_email_key")),
            RegisterTxnError::Taken(RegisterResponse::EmailTaken)
        ));
        // a generated referral code colliding is not the user's fault
        assert!(matches!(
            RegisterTxnError::from(unique_violation("users_referral_code_key")),
            RegisterTxnError::API(APIError::ServerError { .. })
        ));
    }

    #[test]
    fn non_unique_errors_pass_through() {
        assert!(matches!(
            RegisterTxnError::from(DieselError::NotFound),
            RegisterTxnError::API(_)
        ));
    }
}
