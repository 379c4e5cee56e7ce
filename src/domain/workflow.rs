use crate::model::payroll::PayrollStatus;
use crate::model::production_report::ProductionStatus;

/// Statuses a payroll run may move to from `from`.
pub fn payroll_targets(from: PayrollStatus) -> &'static [PayrollStatus] {
    use PayrollStatus::*;
    match from {
        Draft => &[Submitted, Rejected, Approved],
        Submitted => &[Approved, Rejected, Draft],
        Approved => &[Paid],
        Paid => &[],
        Rejected => &[Draft],
    }
}

pub fn production_targets(from: ProductionStatus) -> &'static [ProductionStatus] {
    use ProductionStatus::*;
    match from {
        Draft => &[Submitted, Archived],
        Submitted => &[Reviewed, Draft, Archived],
        Reviewed => &[Approved, Draft, Archived],
        Approved => &[Archived],
        Archived => &[],
    }
}

pub fn can_move_payroll(from: PayrollStatus, to: PayrollStatus) -> bool {
    payroll_targets(from).contains(&to)
}

pub fn can_move_production(from: ProductionStatus, to: ProductionStatus) -> bool {
    production_targets(from).contains(&to)
}

/// Error text for a refused transition, listing what would have been allowed.
pub fn transition_error<S: AsRef<str>>(from: S, to: S, allowed: &[S]) -> String {
    let allowed: Vec<&str> = allowed.iter().map(|s| s.as_ref()).collect();
    if allowed.is_empty() {
        format!(
            "Cannot change status from {} to {}: {} is final",
            from.as_ref(),
            to.as_ref(),
            from.as_ref()
        )
    } else {
        format!(
            "Cannot change status from {} to {}. Allowed: {}",
            from.as_ref(),
            to.as_ref(),
            allowed.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn payroll_table() {
        use PayrollStatus::*;
        assert!(can_move_payroll(Draft, Approved));
        assert!(can_move_payroll(Submitted, Draft));
        assert!(can_move_payroll(Approved, Paid));
        assert!(can_move_payroll(Rejected, Draft));
        assert!(!can_move_payroll(Approved, Draft));
        assert!(!can_move_payroll(Rejected, Approved));
        for to in PayrollStatus::iter() {
            assert!(!can_move_payroll(Paid, to));
        }
    }

    #[test]
    fn production_table() {
        use ProductionStatus::*;
        assert!(can_move_production(Draft, Submitted));
        assert!(can_move_production(Reviewed, Approved));
        assert!(can_move_production(Approved, Archived));
        assert!(!can_move_production(Draft, Approved));
        assert!(!can_move_production(Approved, Draft));
        for to in ProductionStatus::iter() {
            assert!(!can_move_production(Archived, to));
        }
    }

    #[test]
    fn no_status_moves_to_itself() {
        for s in PayrollStatus::iter() {
            assert!(!can_move_payroll(s, s));
        }
        for s in ProductionStatus::iter() {
            assert!(!can_move_production(s, s));
        }
    }

    #[test]
    fn error_text_names_allowed_targets() {
        let msg = transition_error(
            PayrollStatus::Approved,
            PayrollStatus::Draft,
            payroll_targets(PayrollStatus::Approved),
        );
        assert_eq!(msg, "Cannot change status from APPROVED to DRAFT. Allowed: PAID");
        let msg = transition_error(PayrollStatus::Paid, PayrollStatus::Draft, &[]);
        assert!(msg.ends_with("PAID is final"));
    }
}
