use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Escrow operations a replay batch can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOp {
    /// Enrols `account` at `provider` for `actor` and makes it the default.
    AddMethod,
    /// `actor` (facility) escrows `amount` for `shift` worked by `payee`.
    Create,
    Dispute,
    ForceRelease,
    ResolveRelease,
    ResolveRefund,
    Retry,
    Refund,
    /// Confirms a manual payout; `account` carries the transfer reference.
    ConfirmManual,
    Tick,
}

/// One row of a replay batch. Which columns matter depends on `op`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub op: CommandOp,
    pub actor: Option<u64>,
    pub shift: Option<u64>,
    pub payee: Option<u64>,
    pub amount: Option<Decimal>,
    pub provider: Option<String>,
    pub account: Option<String>,
    /// Moves the replay clock before the command runs.
    pub at: Option<DateTime<Utc>>,
}

impl CommandRecord {
    pub fn required<T: Clone>(&self, value: &Option<T>, column: &str) -> Result<T> {
        value.clone().ok_or_else(|| {
            EscrowError::ValidationError(format!("{:?} needs the {} column", self.op, column))
        })
    }
}

/// Reads replay commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<CommandRecord>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and deserializes commands.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EscrowError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HEADER: &str = "op, actor, shift, payee, amount, provider, account, at";

    #[test]
    fn test_reader_valid_stream() {
        let data = format!(
            "{}\nadd_method, 2, , , , paypal, nurse@example.com, \ncreate, 1, 10, 2, 540.00, , , 2024-03-01T09:00:00Z\ntick, , , , , , , 2024-03-04T09:01:00Z",
            HEADER
        );
        let results: Vec<Result<CommandRecord>> =
            CommandReader::new(data.as_bytes()).commands().collect();

        assert_eq!(results.len(), 3);
        let method = results[0].as_ref().unwrap();
        assert_eq!(method.op, CommandOp::AddMethod);
        assert_eq!(method.account.as_deref(), Some("nurse@example.com"));
        assert!(method.at.is_none());

        let create = results[1].as_ref().unwrap();
        assert_eq!(create.amount, Some(dec!(540.00)));
        assert_eq!(create.shift, Some(10));
        assert!(create.at.is_some());

        assert_eq!(results[2].as_ref().unwrap().op, CommandOp::Tick);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = format!("{}\nteleport, 1, 1, 2, 1.0, , , ", HEADER);
        let results: Vec<Result<CommandRecord>> =
            CommandReader::new(data.as_bytes()).commands().collect();
        assert!(results[0].is_err());
    }

    #[test]
    fn test_missing_column_is_reported() {
        let data = format!("{}\ncreate, 1, , 2, 5.00, , , ", HEADER);
        let record = CommandReader::new(data.as_bytes())
            .commands()
            .next()
            .unwrap()
            .unwrap();
        assert!(matches!(
            record.required(&record.shift, "shift"),
            Err(EscrowError::ValidationError(_))
        ));
    }
}
