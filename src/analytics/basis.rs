use serde::Serialize;

use crate::config::Thresholds;
use crate::types::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BasisLabel {
    Premium,
    Discount,
    Flat,
}

/// ATM put-call parity: synthetic future = K + C − P.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Basis {
    pub atm_strike: f64,
    pub synthetic_future: f64,
    pub basis: f64,
    pub basis_pct: f64,
    pub label: BasisLabel,
}

/// None when ATM lacks a last price on either leg.
pub fn compute(snapshot: &Snapshot, t: &Thresholds) -> Option<Basis> {
    let atm = &snapshot.strikes[snapshot.atm_index()?];
    let ce = atm.ce.last_price.filter(|p| *p > 0.0)?;
    let pe = atm.pe.last_price.filter(|p| *p > 0.0)?;
    if snapshot.spot <= 0.0 {
        return None;
    }

    let synthetic_future = atm.strike + ce - pe;
    let basis = synthetic_future - snapshot.spot;
    let basis_pct = basis / snapshot.spot * 100.0;
    let label = if basis_pct >= t.basis_flat_pct {
        BasisLabel::Premium
    } else if basis_pct <= -t.basis_flat_pct {
        BasisLabel::Discount
    } else {
        BasisLabel::Flat
    };

    Some(Basis {
        atm_strike: atm.strike,
        synthetic_future,
        basis,
        basis_pct,
        label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::*;

    fn atm_prices(ce: Option<f64>, pe: Option<f64>) -> Snapshot {
        let mut r = oi_row(23_000.0, 1.0, 1.0);
        r.ce.last_price = ce;
        r.pe.last_price = pe;
        snap(23_010.0, vec![r])
    }

    #[test]
    fn synthetic_future_from_parity() {
        let b = compute(&atm_prices(Some(150.0), Some(100.0)), &Thresholds::default()).unwrap();
        assert_eq!(b.synthetic_future, 23_050.0);
        assert_eq!(b.basis, 40.0);
        assert_eq!(b.label, BasisLabel::Premium);

        let flat = compute(&atm_prices(Some(110.0), Some(100.0)), &Thresholds::default()).unwrap();
        assert_eq!(flat.label, BasisLabel::Flat);
    }

    #[test]
    fn missing_price_is_unavailable() {
        assert!(compute(&atm_prices(Some(150.0), None), &Thresholds::default()).is_none());
        assert!(compute(&snap(23_000.0, vec![]), &Thresholds::default()).is_none());
    }
}
