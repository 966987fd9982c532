//! Record transformer
//!
//! Pure mapping from remote DTOs to local records. No I/O and no clock:
//! the same input always yields the same record, so re-syncing unchanged
//! data produces byte-identical rows.

use crate::domain::{
    DomainError, LocalCustomerRecord, LocalOrderRecord, OrderLine, RemoteCustomerId,
};
use crate::ports::{RemoteCustomer, RemoteMembership, RemoteOrder};

/// Maps remote payloads to local records
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTransformer;

impl RecordTransformer {
    /// Builds a customer record, applying membership data when present
    ///
    /// Without membership the tier label is empty and used-points is zero.
    /// Birth-date parts outside their calendar range (the platform sends 0
    /// for an unknown part) are stored as absent.
    /// With membership, tier label, used-points and total-points come from
    /// the membership payload instead of the customer payload.
    pub fn transform_customer(
        &self,
        remote: &RemoteCustomer,
        membership: Option<&RemoteMembership>,
    ) -> Result<LocalCustomerRecord, DomainError> {
        let remote_id = RemoteCustomerId::new(remote.id)?;

        let mut record = LocalCustomerRecord {
            remote_id,
            last_name: text(&remote.last_name),
            first_name: text(&remote.first_name),
            phone: text(&remote.phone),
            email: text(&remote.email),
            gender: text(&remote.gender),
            birthday_day: remote.birthday_day.filter(|d| (1..=31).contains(d)),
            birthday_month: remote.birthday_month.filter(|m| (1..=12).contains(m)),
            birthday_year: remote.birthday_year.filter(|y| *y > 0),
            tags: text(&remote.tags),
            physical_card_code: text(&remote.physical_card_code),
            points: amount(remote.points),
            exp_points: amount(remote.exp_points),
            total_spending: amount(remote.total_spending),
            total_points: amount(remote.total_points),
            tier_label: String::new(),
            used_points: 0.0,
            remote_created_at: remote.created_at,
            remote_updated_at: remote.updated_at,
        };

        if let Some(m) = membership {
            record.tier_label = text(&m.level_name);
            record.used_points = amount(m.used_points);
            record.total_points = amount(m.total_points);
        }

        Ok(record)
    }

    /// Builds an order record
    ///
    /// The order code is the remote `name` (e.g. `#1042`), or `#<id>` when
    /// the name is blank.
    pub fn transform_order(&self, remote: &RemoteOrder) -> Result<LocalOrderRecord, DomainError> {
        if remote.id <= 0 {
            return Err(DomainError::InvalidRemoteId(remote.id.to_string()));
        }

        let code = match remote.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("#{}", remote.id),
        };

        let customer = remote.customer.as_ref();
        let customer_remote_id = customer
            .and_then(|c| c.id)
            .and_then(|id| RemoteCustomerId::new(id).ok());
        let customer_name = customer
            .map(|c| {
                format!("{} {}", text(&c.first_name), text(&c.last_name))
                    .trim()
                    .to_string()
            })
            .unwrap_or_default();
        let customer_phone = customer.map(|c| text(&c.phone)).unwrap_or_default();

        let lines = remote
            .line_items
            .iter()
            .map(|item| OrderLine {
                sku: text(&item.sku),
                name: text(&item.name),
                quantity: amount(item.quantity),
                price: amount(item.price),
            })
            .collect();

        Ok(LocalOrderRecord {
            code,
            remote_id: remote.id,
            customer_remote_id,
            customer_phone,
            customer_name,
            location_id: remote.location_id,
            financial_status: text(&remote.financial_status),
            subtotal: amount(remote.subtotal_price),
            discount: amount(remote.total_discounts),
            shipment_fee: amount(remote.shipment_fee),
            total: amount(remote.total_price),
            note: text(&remote.note),
            lines,
            remote_created_at: remote.created_at,
            remote_updated_at: remote.updated_at,
        })
    }
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn amount(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{RemoteLineItem, RemoteOrderCustomer};
    use chrono::{TimeZone, Utc};

    fn customer() -> RemoteCustomer {
        RemoteCustomer {
            id: 35577245,
            first_name: Some("Linh".into()),
            last_name: Some("Nguyen".into()),
            phone: Some("0338336011".into()),
            email: None,
            gender: Some("female".into()),
            birthday_day: Some(21),
            birthday_month: Some(12),
            birthday_year: None,
            tags: None,
            physical_card_code: Some(String::new()),
            points: Some(29649.0),
            exp_points: Some(25849.0),
            total_spending: None,
            total_points: Some(10.0),
            created_at: Some(Utc.with_ymd_and_hms(2025, 6, 23, 8, 51, 26).unwrap()),
            updated_at: Some(Utc.with_ymd_and_hms(2026, 2, 5, 17, 34, 44).unwrap()),
        }
    }

    #[test]
    fn test_customer_without_membership() {
        let record = RecordTransformer
            .transform_customer(&customer(), None)
            .unwrap();

        assert_eq!(record.remote_id.get(), 35577245);
        assert_eq!(record.email, "");
        assert_eq!(record.tags, "");
        assert_eq!(record.tier_label, "");
        assert_eq!(record.used_points, 0.0);
        assert_eq!(record.total_points, 10.0);
        assert_eq!(record.total_spending, 0.0);
        assert!(!record.has_membership());
    }

    #[test]
    fn test_membership_overrides_points() {
        let membership = RemoteMembership {
            level_name: Some("Gold".into()),
            used_points: Some(120.0),
            total_points: Some(5000.0),
        };
        let record = RecordTransformer
            .transform_customer(&customer(), Some(&membership))
            .unwrap();

        assert_eq!(record.tier_label, "Gold");
        assert_eq!(record.used_points, 120.0);
        assert_eq!(record.total_points, 5000.0);
        assert_eq!(record.points, 29649.0);
    }

    #[test]
    fn test_partial_birthdate_is_kept() {
        let record = RecordTransformer
            .transform_customer(&customer(), None)
            .unwrap();
        assert_eq!(record.birthday_day, Some(21));
        assert_eq!(record.birthday_month, Some(12));
        assert_eq!(record.birthday_year, None);
    }

    #[test]
    fn test_zero_birthdate_parts_become_absent() {
        let mut c = customer();
        c.birthday_day = Some(0);
        c.birthday_month = Some(13);
        c.birthday_year = Some(0);
        let record = RecordTransformer.transform_customer(&c, None).unwrap();
        assert_eq!(record.birthday_day, None);
        assert_eq!(record.birthday_month, None);
        assert_eq!(record.birthday_year, None);

        c.birthday_day = Some(31);
        c.birthday_month = Some(0);
        c.birthday_year = Some(1990);
        let record = RecordTransformer.transform_customer(&c, None).unwrap();
        assert_eq!(record.birthday_day, Some(31));
        assert_eq!(record.birthday_month, None);
        assert_eq!(record.birthday_year, Some(1990));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let c = customer();
        let a = RecordTransformer.transform_customer(&c, None).unwrap();
        let b = RecordTransformer.transform_customer(&c, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_customer_with_invalid_id_is_rejected() {
        let mut c = customer();
        c.id = 0;
        assert!(matches!(
            RecordTransformer.transform_customer(&c, None),
            Err(DomainError::InvalidRemoteId(_))
        ));
    }

    #[test]
    fn test_order_code_falls_back_to_id() {
        let order = RemoteOrder {
            id: 103295,
            name: Some("  ".into()),
            ..Default::default()
        };
        let record = RecordTransformer.transform_order(&order).unwrap();
        assert_eq!(record.code, "#103295");
        assert_eq!(record.customer_name, "");
        assert!(record.customer_remote_id.is_none());
    }

    #[test]
    fn test_order_maps_customer_and_lines() {
        let created = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let order = RemoteOrder {
            id: 7,
            name: Some("#1042".into()),
            customer: Some(RemoteOrderCustomer {
                id: Some(99),
                first_name: Some("An".into()),
                last_name: None,
                phone: Some("0900".into()),
            }),
            location_id: Some(3),
            financial_status: Some("paid".into()),
            subtotal_price: Some(200.0),
            total_discounts: Some(20.0),
            shipment_fee: None,
            total_price: Some(180.0),
            note: None,
            line_items: vec![
                RemoteLineItem {
                    sku: Some("SKU-1".into()),
                    name: Some("Shirt".into()),
                    quantity: Some(2.0),
                    price: Some(100.0),
                },
                RemoteLineItem::default(),
            ],
            created_at: Some(created),
            updated_at: None,
        };

        let record = RecordTransformer.transform_order(&order).unwrap();
        assert_eq!(record.code, "#1042");
        assert_eq!(record.customer_remote_id.map(|id| id.get()), Some(99));
        assert_eq!(record.customer_name, "An");
        assert_eq!(record.customer_phone, "0900");
        assert_eq!(record.lines.len(), 2);
        assert_eq!(record.total_quantity(), 2.0);
        assert_eq!(record.shipment_fee, 0.0);

        use crate::domain::SyncRecord;
        assert_eq!(record.remote_updated_at(), Some(created));
    }
}
