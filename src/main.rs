extern crate diesel;
extern crate dotenv;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::dev::RequestHead;
use actix_web::http::header::HeaderValue;
use actix_web::{web, App, HttpServer};

use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;

use questline::api::{quest, register, transaction};
use questline::util::{catalog, cipher_util};

use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use log::warn;
use questline::DbPool;

fn cors_check(head: &HeaderValue, _: &RequestHead) -> bool {
    if let Ok(origin) = head.to_str() {
        match origin {
            "https://questline.app" => true,
            "http://localhost:5173" => true,
            url => url.ends_with("questline-front.netlify.app"), // for deploy preview
        }
    } else {
        false
    }
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let cookie_token = std::env::var("COOKIE_TOKEN").expect("COOKIE_TOKEN must be set");

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool: DbPool = Pool::builder()
        .build(manager)
        .await
        .expect("Failed to link to db");

    let secret_key = cipher_util::gen_cookie_key(&cookie_token);

    let is_production = match std::env::var("MODE") {
        Ok(mode) if mode == "dev" => {
            warn!("Under development mode.");
            false
        }
        _ => true, // Production mode as default!
    };

    let pool = Arc::new(pool);

    {
        let mut conn = pool.get().await.expect("Failed to link to db");
        catalog::seed_quests(&mut conn)
            .await
            .expect("Failed to seed the quest catalog");
    }

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .wrap(
                Cors::default()
                    .allowed_origin_fn(cors_check)
                    .allow_any_header()
                    .allow_any_method()
                    .supports_credentials(),
            )
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_secure(is_production)
                    .cookie_same_site(actix_web::cookie::SameSite::None)
                    .build(),
            )
            .service(register::register_user)
            .service(register::login_user)
            .service(register::logout_user)
            .service(register::get_user)
            .service(quest::dashboard)
            .service(quest::complete_quest)
            .service(quest::history)
            .service(transaction::stake)
            .service(transaction::request_deposit)
            .service(transaction::request_withdrawal)
            .service(transaction::approve_transaction)
            .service(transaction::reject_transaction)
            .service(transaction::list_transactions)
    })
    .bind("0.0.0.0:9000")?
    .run()
    .await
}
