use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::unsubscribe_token::UnsubscribeToken;
use crate::registry::{RecipientRegistry, Unsubscribed};

/// Same answer whether or not the link matched someone, so the link tells nothing about the
/// account.
pub const UNSUBSCRIBED_MESSAGE: &str = "You will not receive any more messages from this address.";
pub const RETRY_MESSAGE: &str = "Something went wrong, please try again later.";

#[derive(Deserialize, Debug)]
pub struct Parameters {
    pub id: Uuid,
    pub token: String,
}

#[tracing::instrument(
    name = "Unsubscribe handler",
    skip(parameters, registry),
    fields(account_id = %parameters.id)
)]
pub async fn handle_unsubscribe(
    parameters: web::Query<Parameters>,
    registry: web::Data<RecipientRegistry>,
) -> HttpResponse {
    let token = match UnsubscribeToken::parse(parameters.token.clone()) {
        Ok(token) => token,
        Err(err) => {
            tracing::info!("Ignoring malformed token: {}", err);
            return HttpResponse::Ok().body(UNSUBSCRIBED_MESSAGE);
        }
    };

    match registry.unsubscribe(parameters.id, &token).await {
        Ok(Unsubscribed::Removed { remaining, .. }) => {
            tracing::info!(remaining, "Recipient unsubscribed");
            HttpResponse::Ok().body(UNSUBSCRIBED_MESSAGE)
        }
        Ok(Unsubscribed::NotFound) => HttpResponse::Ok().body(UNSUBSCRIBED_MESSAGE),
        Err(err) => {
            tracing::error!("Failed to unsubscribe: {:?}", err);
            HttpResponse::InternalServerError().body(RETRY_MESSAGE)
        }
    }
}
