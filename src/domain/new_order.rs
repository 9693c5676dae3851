use actix_web::web;
use serde::Deserialize;

use crate::domain::recipient_email::RecipientEmail;

#[derive(Debug)]
pub struct NewOrder {
    pub recipients: Vec<RecipientEmail>,
    pub weeks: u32,
}

#[derive(Deserialize)]
pub struct NewOrderBody {
    pub recipients: Vec<String>,
    pub weeks: i64,
}

impl TryFrom<web::Json<NewOrderBody>> for NewOrder {
    type Error = String;

    fn try_from(body: web::Json<NewOrderBody>) -> Result<Self, Self::Error> {
        let body = body.into_inner();

        if body.weeks <= 0 {
            return Err(String::from("Number of weeks should be positive"));
        }
        let weeks = u32::try_from(body.weeks)
            .map_err(|_| format!("{} weeks is too long", body.weeks))?;

        let recipients = body
            .recipients
            .into_iter()
            .map(|recipient| recipient.trim().to_string())
            .filter(|recipient| !recipient.is_empty())
            .map(RecipientEmail::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if recipients.is_empty() {
            return Err(String::from("No recipients were specified"));
        }

        Ok(NewOrder { recipients, weeks })
    }
}
