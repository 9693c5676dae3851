use std::collections::HashSet;

use crate::domain::recipient_email::RecipientEmail;
use crate::domain::unsubscribe_token::UnsubscribeToken;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Recipient {
    pub address: RecipientEmail,
    pub token: UnsubscribeToken,
}

/// Ordered recipient set of an account, unique by address.
///
/// The set only ever shrinks after it has been issued: recipients are removed on unsubscribe and
/// never added back. Persisted as a whole so a removal always replaces the full list.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Recipients(Vec<Recipient>);

impl Recipients {
    /// Issues a fresh unsubscribe token for every address. Repeated addresses keep their first
    /// position only.
    pub fn issue(addresses: Vec<RecipientEmail>) -> Recipients {
        let mut seen_addresses = HashSet::new();
        let mut issued_tokens = HashSet::new();
        let mut recipients = Vec::with_capacity(addresses.len());

        for address in addresses {
            if !seen_addresses.insert(address.clone()) {
                continue;
            }

            let token = loop {
                let token = UnsubscribeToken::generate();
                if issued_tokens.insert(token.clone()) {
                    break token;
                }
            };

            recipients.push(Recipient { address, token });
        }

        Self(recipients)
    }

    /// Linear scan, accounts hold a handful of recipients.
    pub fn lookup_by_token(&self, token: &UnsubscribeToken) -> Option<&RecipientEmail> {
        self.0
            .iter()
            .find(|recipient| &recipient.token == token)
            .map(|recipient| &recipient.address)
    }

    /// Removes the recipient with the given address. Returns `false` when it was already gone.
    pub fn remove(&mut self, address: &RecipientEmail) -> bool {
        match self.0.iter().position(|recipient| &recipient.address == address) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn addresses(&self) -> Vec<RecipientEmail> {
        self.0
            .iter()
            .map(|recipient| recipient.address.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipient> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
