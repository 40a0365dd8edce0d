use crate::model::{Quote, TaxRate};

use super::EngineError;

/// Price a stay: `base = rate × nights`, `tax = round_half_up(base × rate)`,
/// `total = base + tax`. Integer cents throughout.
pub fn quote(nightly_rate_cents: u64, nights: usize, tax_rate: TaxRate) -> Result<Quote, EngineError> {
    let nights = u32::try_from(nights).map_err(|_| EngineError::InvalidRequest("too many nights"))?;
    let base_cents = nightly_rate_cents
        .checked_mul(nights as u64)
        .ok_or(EngineError::InvalidRequest("stay price overflows"))?;
    let tax_cents = tax_rate
        .tax_on(base_cents)
        .ok_or(EngineError::InvalidRequest("stay price overflows"))?;
    let total_cents = base_cents
        .checked_add(tax_cents)
        .ok_or(EngineError::InvalidRequest("stay price overflows"))?;
    Ok(Quote {
        nights,
        nightly_rate_cents,
        base_cents,
        tax_cents,
        total_cents,
    })
}
