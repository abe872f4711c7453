//! Command types and their parameter shapes.
//!
//! [`CommandParams`] is the validated, typed form of a command. The
//! field-map form (as a caller or a received envelope provides it) is
//! checked by [`CommandParams::from_fields`], which is the only place an
//! [`ClientError::InvalidParams`] originates.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Field map carried in an envelope's `params` object.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Command type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    /// Authenticate the channel.
    Auth,
    /// Move funds between accounts.
    Transfer,
    /// Request an account statement.
    Statement,
    /// Heartbeat.
    Ping,
}

impl CommandKind {
    /// Literal tag that prefixes the canonical string.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::Transfer => "TRANSFER",
            Self::Statement => "STATEMENT",
            Self::Ping => "PING",
        }
    }

    /// Transport event name the envelope is emitted under.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Transfer => "transfer",
            Self::Statement => "statement",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Parameters of a TRANSFER command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    /// Debited account.
    pub account_number: String,
    /// Credited account.
    pub beneficiary: String,
    /// Currency code, e.g. `USD`.
    pub currency: String,
    /// Amount, sent as a JSON number.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Free-text payment reference.
    pub narrative: String,
}

/// Parameters of a STATEMENT command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementParams {
    /// Account to report on.
    pub account_number: String,
    /// Maximum number of entries (positive).
    pub limit: u32,
}

/// A validated command with its type-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParams {
    /// AUTH carries no parameters.
    Auth,
    /// TRANSFER parameters.
    Transfer(TransferParams),
    /// STATEMENT parameters.
    Statement(StatementParams),
    /// PING carries no parameters.
    Ping,
}

impl CommandParams {
    /// Returns the command type.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Auth => CommandKind::Auth,
            Self::Transfer(_) => CommandKind::Transfer,
            Self::Statement(_) => CommandKind::Statement,
            Self::Ping => CommandKind::Ping,
        }
    }

    /// Checks that the typed parameters satisfy their shape.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParams`] for empty required strings, an
    /// amount a JSON number cannot carry exactly, or a zero statement limit.
    pub fn validate(&self) -> Result<(), ClientError> {
        match self {
            Self::Auth | Self::Ping => Ok(()),
            Self::Transfer(p) => {
                require_text("accountNumber", &p.account_number)?;
                require_text("beneficiary", &p.beneficiary)?;
                require_text("currency", &p.currency)?;
                require_wire_exact(&p.amount)?;
                require_text("narrative", &p.narrative)
            }
            Self::Statement(p) => {
                require_text("accountNumber", &p.account_number)?;
                if p.limit == 0 {
                    return Err(ClientError::InvalidParams(
                        "limit must be a positive integer".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Builds typed parameters from a field map for the given kind.
    ///
    /// AUTH and PING accept an empty map only.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParams`] if a required field is missing,
    /// has the wrong type, or is empty, or if unexpected fields are present.
    pub fn from_fields(kind: CommandKind, fields: &Fields) -> Result<Self, ClientError> {
        let params = match kind {
            CommandKind::Auth | CommandKind::Ping => {
                if let Some(name) = fields.keys().next() {
                    return Err(ClientError::InvalidParams(format!(
                        "{kind} takes no params, got `{name}`"
                    )));
                }
                if kind == CommandKind::Auth {
                    Self::Auth
                } else {
                    Self::Ping
                }
            }
            CommandKind::Transfer => Self::Transfer(TransferParams {
                account_number: text_field(fields, "accountNumber")?,
                beneficiary: text_field(fields, "beneficiary")?,
                currency: text_field(fields, "currency")?,
                amount: decimal_field(fields, "amount")?,
                narrative: text_field(fields, "narrative")?,
            }),
            CommandKind::Statement => Self::Statement(StatementParams {
                account_number: text_field(fields, "accountNumber")?,
                limit: limit_field(fields, "limit")?,
            }),
        };
        params.validate()?;
        Ok(params)
    }

    /// Builds typed parameters from an envelope's optional `params` value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParams`] if `params` is not an object
    /// or does not fit `kind` (see [`CommandParams::from_fields`]).
    pub fn from_envelope_params(
        kind: CommandKind,
        params: Option<&serde_json::Value>,
    ) -> Result<Self, ClientError> {
        match params {
            None | Some(serde_json::Value::Null) => Self::from_fields(kind, &Fields::new()),
            Some(serde_json::Value::Object(fields)) => Self::from_fields(kind, fields),
            Some(_) => Err(ClientError::InvalidParams(
                "params must be a JSON object".to_string(),
            )),
        }
    }

    /// Serializes the parameters for the envelope, or `None` for AUTH/PING.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Serialization`] if encoding fails.
    pub fn to_wire(&self) -> Result<Option<serde_json::Value>, ClientError> {
        Ok(match self {
            Self::Auth | Self::Ping => None,
            Self::Transfer(p) => Some(serde_json::to_value(p)?),
            Self::Statement(p) => Some(serde_json::to_value(p)?),
        })
    }
}

fn require_text(name: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::InvalidParams(format!("`{name}` must not be empty")));
    }
    Ok(())
}

/// The amount travels as an `f64`; the signed string uses the exact
/// decimal. Both must render the same number.
fn require_wire_exact(amount: &Decimal) -> Result<(), ClientError> {
    let on_wire = amount
        .to_f64()
        .filter(|f| f.is_finite())
        .and_then(|f| f.to_string().parse::<Decimal>().ok());
    if on_wire.is_some_and(|w| w.normalize() == amount.normalize()) {
        return Ok(());
    }
    Err(ClientError::InvalidParams(format!(
        "`amount` {amount} cannot be sent exactly as a JSON number"
    )))
}

fn field<'a>(fields: &'a Fields, name: &str) -> Result<&'a serde_json::Value, ClientError> {
    fields
        .get(name)
        .ok_or_else(|| ClientError::InvalidParams(format!("missing `{name}`")))
}

fn text_field(fields: &Fields, name: &str) -> Result<String, ClientError> {
    match field(fields, name)? {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Err(ClientError::InvalidParams(format!(
            "`{name}` must be a string, got {other}"
        ))),
    }
}

/// Amounts may arrive as JSON numbers or numeric strings.
fn decimal_field(fields: &Fields, name: &str) -> Result<Decimal, ClientError> {
    let invalid = || ClientError::InvalidParams(format!("`{name}` must be a decimal number"));
    match field(fields, name)? {
        serde_json::Value::Number(n) => n.to_string().parse::<Decimal>().or_else(|_| {
            n.as_f64()
                .and_then(|f| Decimal::try_from(f).ok())
                .ok_or_else(invalid)
        }),
        serde_json::Value::String(s) => s.trim().parse::<Decimal>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn limit_field(fields: &Fields, name: &str) -> Result<u32, ClientError> {
    field(fields, name)?
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ClientError::InvalidParams(format!("`{name}` must be a positive integer")))
}
