use mail_parser::{Address, MessageParser, MessagePart, MimeHeaders};
use uuid::Uuid;

/// What the forwarder needs from a raw RFC 5322 message, copied out of the parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub destinations: Vec<String>,
    pub from: Option<String>,
    pub subject: String,
    pub message_id: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// A non-body part of a received message, relayed as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
    pub content_id: Option<String>,
    pub inline: bool,
}

impl Attachment {
    fn from_part(index: usize, part: &MessagePart<'_>) -> Attachment {
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| String::from("application/octet-stream"));
        let inline = part
            .content_disposition()
            .map_or(false, |cd| cd.ctype().eq_ignore_ascii_case("inline"));

        Attachment {
            filename: part
                .attachment_name()
                .map(String::from)
                .unwrap_or_else(|| format!("attachment-{}", index + 1)),
            content_type,
            content: part.contents().to_vec(),
            content_id: part.content_id().map(String::from),
            inline,
        }
    }
}

impl InboundMessage {
    pub fn parse(raw: &[u8]) -> Result<InboundMessage, String> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(String::from("message is empty"));
        }

        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| String::from("message could not be parsed"))?;

        let mut destinations = Vec::new();
        for address in [message.to(), message.cc()].into_iter().flatten() {
            destinations.extend(addresses_of(address));
        }

        Ok(InboundMessage {
            destinations,
            from: message
                .from()
                .and_then(|from| from.first())
                .and_then(|addr| addr.address())
                .map(String::from),
            subject: message.subject().unwrap_or_default().to_string(),
            message_id: message.message_id().map(String::from),
            text_body: message.body_text(0).map(|body| body.into_owned()),
            html_body: message.body_html(0).map(|body| body.into_owned()),
            attachments: message
                .attachments()
                .enumerate()
                .map(|(index, part)| Attachment::from_part(index, part))
                .collect(),
        })
    }

    /// Account id taken from the local part of the first destination on `domain`. A message
    /// addressed to several accounts is only delivered through the first one listed in To, then
    /// Cc.
    pub fn account_id(&self, domain: &str) -> Option<Uuid> {
        self.destinations.iter().find_map(|destination| {
            let (local_part, destination_domain) = destination.rsplit_once('@')?;
            if !destination_domain.eq_ignore_ascii_case(domain) {
                return None;
            }
            Uuid::parse_str(local_part).ok()
        })
    }
}

fn addresses_of(address: &Address<'_>) -> Vec<String> {
    address
        .iter()
        .filter_map(|addr| addr.address())
        .map(String::from)
        .collect()
}
