use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::new_order::{NewOrder, NewOrderBody};
use crate::ordering::{OrderService, OrderingError, PaymentEvent};

#[derive(Serialize)]
struct PlacedOrder {
    id: Uuid,
}

#[tracing::instrument(
    name = "Place order handler",
    skip(body, orders),
    fields(recipients = body.recipients.len(), weeks = body.weeks)
)]
pub async fn handle_place_order(
    body: web::Json<NewOrderBody>,
    orders: web::Data<OrderService>,
) -> HttpResponse {
    let new_order: NewOrder = match body.try_into() {
        Ok(new_order) => new_order,
        Err(err) => {
            tracing::error!("Validation error: {:?}", err);
            return HttpResponse::BadRequest().finish();
        }
    };

    match orders.place(new_order).await {
        Ok(order) => HttpResponse::Created().json(PlacedOrder { id: order.id }),
        Err(err) => {
            tracing::error!("Failed to place the order: {:?}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[tracing::instrument(name = "Payment event handler", skip(orders))]
pub async fn handle_payment_event(
    event: web::Json<PaymentEvent>,
    orders: web::Data<OrderService>,
) -> Result<HttpResponse, OrderingError> {
    orders.handle_event(event.into_inner()).await?;

    Ok(HttpResponse::Ok().finish())
}

impl ResponseError for OrderingError {
    fn status_code(&self) -> StatusCode {
        match self {
            OrderingError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderingError::Cancelled(_) | OrderingError::AlreadyFulfilled(_) => StatusCode::CONFLICT,
            OrderingError::Persistence(_) | OrderingError::Lifecycle(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
