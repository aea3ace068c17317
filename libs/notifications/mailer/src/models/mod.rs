use serde::{Deserialize, Serialize};

/// A single outbound mail with an HTML body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mail {
    /// Unique identifier, carried through provider logs
    pub id: String,
    /// Recipient email address
    pub to: String,
    /// Optional CC recipients
    #[serde(default)]
    pub cc: Vec<String>,
    /// Optional BCC recipients
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Mail subject
    pub subject: String,
    /// HTML body
    pub body: String,
}

impl Mail {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.into(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    pub fn with_bcc(mut self, bcc: impl Into<String>) -> Self {
        self.bcc.push(bcc.into());
        self
    }
}
