use crate::config::CurrencyConfig;
use crate::domain::deal::SwapClientType;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct CurrencyRecord<'a> {
    ticker: &'a str,
    decimal_places: u32,
    units_per_currency: u64,
    token_address: Option<&'a str>,
    swap_client: SwapClientType,
}

/// Writes the configured currencies as CSV.
pub struct CurrencyWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CurrencyWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_currencies<'a, I>(&mut self, currencies: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a String, &'a CurrencyConfig)>,
    {
        for (ticker, currency) in currencies {
            self.writer.serialize(CurrencyRecord {
                ticker,
                decimal_places: currency.decimal_places,
                units_per_currency: currency.units_per_currency,
                token_address: currency.token_address.as_deref(),
                swap_client: currency.swap_client,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
