pub mod price_on_date;
pub mod stream;
