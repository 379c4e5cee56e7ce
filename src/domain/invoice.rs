use serde::Serialize;
use utoipa::ToSchema;

use crate::model::invoice::InvoiceItem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, ToSchema)]
pub struct InvoiceTotals {
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
}

/// Totals of one item; tax applies after the discount.
pub fn item_totals(item: &InvoiceItem) -> InvoiceTotals {
    let subtotal = item.quantity * item.price;
    let discount = subtotal * item.discount / 100.0;
    let tax = (subtotal - discount) * item.tax / 100.0;
    InvoiceTotals {
        subtotal,
        discount,
        tax,
        total: subtotal - discount + tax,
    }
}

/// Fills in every item's `total` and returns the invoice totals.
pub fn apply_totals(items: &mut [InvoiceItem]) -> InvoiceTotals {
    items.iter_mut().fold(InvoiceTotals::default(), |acc, item| {
        let t = item_totals(item);
        item.total = t.total;
        InvoiceTotals {
            subtotal: acc.subtotal + t.subtotal,
            discount: acc.discount + t.discount,
            tax: acc.tax + t.tax,
            total: acc.total + t.total,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: f64, price: f64, discount: f64, tax: f64) -> InvoiceItem {
        InvoiceItem {
            description: "Batubara".into(),
            quantity,
            price,
            discount,
            tax,
            total: 0.0,
        }
    }

    #[test]
    fn discount_then_tax() {
        let t = item_totals(&item(10.0, 100_000.0, 10.0, 11.0));
        assert_eq!(t.subtotal, 1_000_000.0);
        assert_eq!(t.discount, 100_000.0);
        assert_eq!(t.tax, 99_000.0);
        assert_eq!(t.total, 999_000.0);
    }

    #[test]
    fn sums_items_and_overwrites_client_totals() {
        let mut items = vec![item(2.0, 50.0, 0.0, 0.0), item(1.0, 200.0, 50.0, 0.0)];
        items[0].total = 1.0;
        let totals = apply_totals(&mut items);
        assert_eq!(items[0].total, 100.0);
        assert_eq!(items[1].total, 100.0);
        assert_eq!(totals.subtotal, 300.0);
        assert_eq!(totals.discount, 100.0);
        assert_eq!(totals.total, 200.0);
    }

    #[test]
    fn empty_invoice_is_zero() {
        assert_eq!(apply_totals(&mut []), InvoiceTotals::default());
    }
}
