//! Canned request texts a chat client can offer to its user.

use crate::error::{AppError, Result};

pub fn add_coin(coin_symbol: &str) -> Result<String> {
    let symbol = non_empty_symbol(coin_symbol)?.to_uppercase();
    Ok(format!("Please add {symbol} to my watchlist and show me its current price."))
}

pub fn remove_coin(coin_symbol: &str) -> Result<String> {
    let symbol = non_empty_symbol(coin_symbol)?.to_lowercase();
    Ok(format!("Please remove {symbol} from my watchlist."))
}

pub fn get_prices() -> String {
    "Please fetch the latest prices for all cryptocurrencies in my watchlist.".to_string()
}

pub fn export(sheet_name: &str, user_email: &str) -> String {
    format!(
        "Please export all tracked price data to my Google Sheet '{}' and share it with {}.",
        sheet_name.trim(),
        user_email.trim()
    )
}

fn non_empty_symbol(raw: &str) -> Result<&str> {
    let symbol = raw.trim();
    if symbol.is_empty() {
        return Err(AppError::Validation("coin symbol must not be empty".to_string()));
    }
    Ok(symbol)
}
