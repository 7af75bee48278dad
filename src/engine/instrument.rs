//! Instrument state: per-(term, curve) aggregate rows.
//!
//! Two independent paths update an instrument. Price events replace the
//! price fields wholesale, gated by the price watermark; position changes
//! trigger a recount of participants from the position rows. Either path
//! may create the row first, so an instrument seen only through deposits
//! exists with zeroed price fields until its first price event.

use ethers_core::types::{U256, U512};
use tracing::{debug, warn};

use crate::events::{EventMeta, PriceChanged};
use crate::store::models::{CurveKey, InstrumentCf, InstrumentRow, PositionCf, PositionKey};
use crate::store::WriteTxn;

use super::{Change, EngineError, Propagation};

/// Share prices are fixed-point with 18 decimals.
pub const SHARE_PRICE_DECIMALS: usize = 18;

pub(crate) fn apply_price(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    meta: &EventMeta,
    price: &PriceChanged,
) -> Result<(), EngineError> {
    let key = CurveKey::new(price.term_id, price.curve_id);
    let mut row = txn
        .get::<InstrumentCf>(&key)?
        .unwrap_or_else(|| InstrumentRow::empty(price.term_id, price.curve_id));

    if !meta.order.supersedes(row.watermark) {
        debug!(
            "Stale price for {} curve {} at {} ignored",
            price.term_id.short(),
            price.curve_id,
            meta.order
        );
        return Ok(());
    }

    row.share_price = price.share_price;
    row.total_assets = price.total_assets;
    row.total_shares = price.total_shares;
    row.market_cap = market_cap(price.total_shares, price.share_price);
    row.kind = price.instrument_kind;
    row.watermark = Some(meta.order);

    txn.put::<InstrumentCf>(&key, &row)?;
    prop.push(Change::Instrument(key));
    Ok(())
}

/// Recount accounts holding a nonzero balance on this instrument.
///
/// Creates the instrument row if flows arrived before any price event.
/// Downstream recomputation is only scheduled when the count actually
/// moves, since no aggregate reads anything else from positions.
pub(crate) fn recount_participants(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    key: CurveKey,
) -> Result<(), EngineError> {
    let prefix = PositionKey::curve_prefix(&key.term_id, key.curve_id);
    let positions = txn.scan_prefix::<PositionCf>(&prefix)?;
    let live = positions
        .iter()
        .filter(|(_, row)| !row.shares.is_zero())
        .count() as u64;

    match txn.get::<InstrumentCf>(&key)? {
        Some(mut row) => {
            if row.participants != live {
                row.participants = live;
                txn.put::<InstrumentCf>(&key, &row)?;
                prop.push(Change::Instrument(key));
            }
        }
        None => {
            let mut row = InstrumentRow::empty(key.term_id, key.curve_id);
            row.participants = live;
            txn.put::<InstrumentCf>(&key, &row)?;
            prop.push(Change::Instrument(key));
        }
    }
    Ok(())
}

/// `total_shares * share_price / 10^18`, widened to 512 bits so the
/// product cannot overflow. Truncates toward zero; saturates at
/// `U256::MAX` if the scaled result still does not fit.
pub(crate) fn market_cap(total_shares: U256, share_price: U256) -> U256 {
    let scale = U512::from(U256::exp10(SHARE_PRICE_DECIMALS));
    let scaled = total_shares.full_mul(share_price) / scale;
    U256::try_from(scaled).unwrap_or_else(|_| {
        warn!("Market cap overflows 256 bits, saturating");
        U256::MAX
    })
}
