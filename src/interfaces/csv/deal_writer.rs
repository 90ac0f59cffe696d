use crate::domain::deal::{SwapDeal, SwapFailureReason, SwapPhase, SwapRole, SwapState};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct DealRecord<'a> {
    r_hash: &'a str,
    role: SwapRole,
    phase: SwapPhase,
    state: SwapState,
    pair_id: &'a str,
    quantity: u64,
    price: Decimal,
    maker_currency: &'a str,
    maker_amount: u64,
    taker_currency: &'a str,
    taker_amount: u64,
    peer_pub_key: &'a str,
    create_time: u64,
    complete_time: Option<u64>,
    failure_reason: Option<SwapFailureReason>,
    error_message: Option<&'a str>,
}

impl<'a> From<&'a SwapDeal> for DealRecord<'a> {
    fn from(deal: &'a SwapDeal) -> Self {
        Self {
            r_hash: &deal.r_hash,
            role: deal.role,
            phase: deal.phase,
            state: deal.state,
            pair_id: &deal.pair_id,
            quantity: deal.quantity,
            price: deal.price,
            maker_currency: &deal.maker_currency,
            maker_amount: deal.maker_amount,
            taker_currency: &deal.taker_currency,
            taker_amount: deal.taker_amount,
            peer_pub_key: &deal.peer_pub_key,
            create_time: deal.create_time,
            complete_time: deal.complete_time,
            failure_reason: deal.failure_reason,
            error_message: deal.error_message.as_deref(),
        }
    }
}

/// Writes swap deals as CSV rows, one per deal, with a header line.
pub struct DealWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> DealWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_deals<'a, I>(&mut self, deals: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a SwapDeal>,
    {
        for deal in deals {
            self.writer.serialize(DealRecord::from(deal))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
