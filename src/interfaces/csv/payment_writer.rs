use crate::domain::payment::Payment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    shift: u64,
    payee: u64,
    amount: String,
    state: &'a str,
    payout_ref: &'a str,
}

/// Writes final payment states as CSV.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes a header and one row per payment, ordered by shift.
    pub fn write_payments(&mut self, mut payments: Vec<Payment>) -> Result<()> {
        payments.sort_by_key(|p| (p.shift_id, p.created_at));
        if payments.is_empty() {
            self.writer
                .write_record(["shift", "payee", "amount", "state", "payout_ref"])?;
        }
        for payment in &payments {
            self.writer.serialize(PaymentRow {
                shift: payment.shift_id.0,
                payee: payment.payee_user_id.0,
                amount: payment.amount.to_string(),
                state: payment.state.as_str(),
                payout_ref: payment.external_payout_ref.as_deref().unwrap_or(""),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
