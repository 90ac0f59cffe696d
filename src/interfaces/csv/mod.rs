pub mod currency_writer;
pub mod deal_writer;
