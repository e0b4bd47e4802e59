//! Thin OSBAPI HTTP layer over Broker Core. Every handler's job is: check
//! basic auth, echo `X-Broker-Api-Version`, decode the request, call into
//! [`crate::broker`], and map the result (or [`crate::error::BrokerError`])
//! onto the OSBAPI wire shape and status code. No broker logic lives here.

mod handlers;
pub mod types;

use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;

use crate::broker::BrokerContext;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<BrokerContext>,
    pub username: String,
    pub password: String,
}

pub async fn serve(state: AppState, port: u16) -> io::Result<()> {
    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(actix_web::middleware::Logger::default())
            .service(handlers::catalog)
            .service(handlers::provision)
            .service(handlers::update)
            .service(handlers::deprovision)
            .service(handlers::last_operation)
            .service(handlers::bind)
            .service(handlers::unbind)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
