use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};

use crate::dispatcher::{DispatchError, ForwardingDispatcher};
use crate::message_store::MessageLocation;

#[tracing::instrument(name = "Inbound message handler", skip(location, dispatcher), fields(location = %location))]
pub async fn handle_inbound_message(
    location: web::Json<MessageLocation>,
    dispatcher: web::Data<ForwardingDispatcher>,
) -> Result<HttpResponse, InboundError> {
    match dispatcher.dispatch(&location).await {
        Ok(forwarded) => {
            tracing::info!(forwarded, "Message forwarded");
        }
        // Nothing upstream redelivers these, so they are dropped
        Err(DispatchError::AccountNotFound) => {
            tracing::warn!("Message dropped, no live account for its destination");
        }
        Err(DispatchError::Malformed(reason)) => {
            tracing::warn!("Message dropped, it could not be parsed: {}", reason);
        }
        Err(err) => return Err(InboundError(err)),
    }

    Ok(HttpResponse::Ok().finish())
}

#[derive(thiserror::Error)]
#[error("Failed to forward the received message.")]
pub struct InboundError(#[source] DispatchError);

impl std::fmt::Debug for InboundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\nCaused by:\n\t{}", self, self.0)
    }
}

impl ResponseError for InboundError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
