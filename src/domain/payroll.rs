use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::ApiError;
use crate::model::employee::Employee;
use crate::model::pay_component::{CalcBasis, CalcMethod, ComponentKind, PayComponent};

pub const DEFAULT_WORKING_DAYS: i32 = 22;
pub const MAX_WORKING_DAYS: i32 = 31;
/// Working hours in a month, used to derive the hourly overtime rate.
pub const MONTHLY_HOURS: f64 = 173.0;

const OVERTIME_MULTIPLIER: f64 = 1.5;
const HOLIDAY_MULTIPLIER: f64 = 2.0;

/// Wage figures of one employee, taken from the employee record.
#[derive(Debug, Clone, PartialEq)]
pub struct PayrollEmployee {
    pub id: u64,
    pub name: String,
    pub daily_wage: f64,
    pub meal_allowance: f64,
    pub fuel_allowance: f64,
}

impl From<&Employee> for PayrollEmployee {
    fn from(e: &Employee) -> Self {
        Self {
            id: e.id,
            name: e.name.clone(),
            daily_wage: e.daily_wage,
            meal_allowance: e.meal_allowance,
            fuel_allowance: e.fuel_allowance,
        }
    }
}

/// A pay component with its stored text columns parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRule {
    pub id: u64,
    pub name: String,
    pub kind: ComponentKind,
    pub taxable: bool,
    pub method: CalcMethod,
    pub basis: CalcBasis,
    pub rate: Option<f64>,
    pub amount: Option<f64>,
    pub cap_min: Option<f64>,
    pub cap_max: Option<f64>,
    pub sort_order: i32,
}

impl TryFrom<&PayComponent> for ComponentRule {
    type Error = ApiError;

    fn try_from(c: &PayComponent) -> Result<Self, Self::Error> {
        let corrupt = |col: &str| {
            tracing::error!(component_id = c.id, column = col, "Unreadable pay component column");
            ApiError::Internal
        };
        Ok(Self {
            id: c.id,
            name: c.name.clone(),
            kind: ComponentKind::from_str(&c.kind).map_err(|_| corrupt("kind"))?,
            taxable: c.taxable,
            method: CalcMethod::from_str(&c.method).map_err(|_| corrupt("method"))?,
            basis: CalcBasis::from_str(&c.basis).map_err(|_| corrupt("basis"))?,
            rate: c.rate,
            amount: c.amount,
            cap_min: c.cap_min,
            cap_max: c.cap_max,
            sort_order: c.sort_order,
        })
    }
}

/// Detailed overtime hours split by tariff.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct OvertimeDetail {
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Hours must not be negative"))]
    pub normal_hours: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Hours must not be negative"))]
    pub holiday_hours: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Hours must not be negative"))]
    pub night_first_hours: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Hours must not be negative"))]
    pub night_additional_hours: f64,
    #[validate(range(min = 0.0, message = "Hourly rate must not be negative"))]
    pub custom_hourly_rate: Option<f64>,
}

impl OvertimeDetail {
    fn total_hours(&self) -> f64 {
        self.normal_hours + self.holiday_hours + self.night_first_hours + self.night_additional_hours
    }

    fn is_empty(&self) -> bool {
        self.total_hours() <= 0.0
    }
}

/// Earning or deduction entered for a single line only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CustomComponent {
    #[validate(length(min = 1, message = "Component name is required"))]
    pub name: String,
    pub kind: ComponentKind,
    #[validate(range(min = 0.0, message = "Amount must not be negative"))]
    pub amount: f64,
    #[serde(default)]
    pub taxable: bool,
}

/// Per-employee inputs of a payroll run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct LineOverride {
    #[validate(range(min = 0, max = 31, message = "Working days must be between 0 and 31"))]
    pub working_days: Option<i32>,
    #[validate(range(min = 0.0, message = "Overtime hours must not be negative"))]
    pub overtime_hours: Option<f64>,
    #[validate(range(min = 0.0, message = "Overtime rate must not be negative"))]
    pub overtime_rate: Option<f64>,
    #[validate(range(min = 0.0, message = "Overtime amount must not be negative"))]
    pub overtime_amount: Option<f64>,
    #[validate(nested)]
    pub overtime_detail: Option<OvertimeDetail>,
    #[validate(range(min = 0.0, message = "Cash advance must not be negative"))]
    pub cash_advance: Option<f64>,
    /// When non-empty only these pay components apply to the line.
    #[serde(default)]
    pub selected_components: Vec<u64>,
    #[serde(default)]
    #[validate(nested)]
    pub custom_components: Vec<CustomComponent>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CalculatedComponent {
    pub pay_component_id: Option<u64>,
    pub name: String,
    pub kind: ComponentKind,
    pub amount: f64,
    pub taxable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LineCalculation {
    pub employee_id: u64,
    pub employee_name: String,
    pub working_days: i32,
    pub daily_wage: f64,
    pub meal_allowance: f64,
    pub fuel_allowance: f64,
    pub base: f64,
    pub overtime_hours: f64,
    pub overtime_amount: f64,
    pub cash_advance: f64,
    pub gross: f64,
    pub taxable_amount: f64,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub total_deductions: f64,
    pub net: f64,
    pub components: Vec<CalculatedComponent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PayrollSummary {
    pub total_employees: usize,
    pub total_gross: f64,
    pub total_deductions: f64,
    pub total_tax: f64,
    pub total_net: f64,
    pub average_net: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ComponentSummary {
    pub pay_component_id: Option<u64>,
    pub name: String,
    pub kind: ComponentKind,
    pub total_amount: f64,
    pub employee_count: usize,
    pub average_amount: f64,
}

fn hourly_rate(daily_wage: f64, custom: Option<f64>) -> f64 {
    match custom {
        Some(rate) if rate > 0.0 => rate,
        _ => (daily_wage * DEFAULT_WORKING_DAYS as f64 / MONTHLY_HOURS).round(),
    }
}

/// Returns `(hours, amount)` of overtime for the line.
fn overtime(employee: &PayrollEmployee, ov: &LineOverride) -> (f64, f64) {
    if let Some(detail) = ov.overtime_detail.as_ref().filter(|d| !d.is_empty()) {
        let h = hourly_rate(employee.daily_wage, detail.custom_hourly_rate);
        let amount = detail.normal_hours * h * OVERTIME_MULTIPLIER
            + detail.holiday_hours * h * HOLIDAY_MULTIPLIER
            + detail.night_first_hours * h * OVERTIME_MULTIPLIER
            + detail.night_additional_hours * h * HOLIDAY_MULTIPLIER;
        return (detail.total_hours(), amount.round());
    }
    match (ov.overtime_hours, ov.overtime_rate) {
        (Some(hours), Some(rate)) if hours > 0.0 => (hours, (hours * rate).round()),
        _ => (
            ov.overtime_hours.unwrap_or(0.0),
            ov.overtime_amount.unwrap_or(0.0),
        ),
    }
}

/// Amount of one component. `gross` is the figure PERCENTAGE/GROSS refers to.
pub fn component_amount(rule: &ComponentRule, days: i32, base: f64, gross: f64) -> f64 {
    let rate = rule.rate.unwrap_or(0.0);
    let mut amount = match rule.method {
        CalcMethod::Flat => rule.amount.unwrap_or(0.0),
        CalcMethod::PerDay => rate * days as f64,
        CalcMethod::Percentage => {
            let basis = match rule.basis {
                CalcBasis::DailyWage => base,
                CalcBasis::WorkingDays => days as f64,
                CalcBasis::Gross => gross,
            };
            rate / 100.0 * basis
        }
    };
    if let Some(min) = rule.cap_min {
        amount = amount.max(min);
    }
    if let Some(max) = rule.cap_max {
        amount = amount.min(max);
    }
    amount.round()
}

fn applies(rule: &ComponentRule, selected: &[u64]) -> bool {
    selected.is_empty() || selected.contains(&rule.id)
}

/// Calculates one payroll line.
///
/// `rules` must hold active components only; they are applied in `sort_order`.
pub fn calculate_line(
    employee: &PayrollEmployee,
    rules: &[ComponentRule],
    ov: &LineOverride,
    tax_rate: f64,
) -> Result<LineCalculation, ApiError> {
    let days = ov.working_days.unwrap_or(DEFAULT_WORKING_DAYS);
    if !(0..=MAX_WORKING_DAYS).contains(&days) {
        return Err(ApiError::field(
            "working_days",
            "Working days must be between 0 and 31",
        ));
    }
    if tax_rate < 0.0 {
        return Err(ApiError::field("tax_rate", "Tax rate must not be negative"));
    }

    let mut ordered: Vec<&ComponentRule> = rules
        .iter()
        .filter(|r| applies(r, &ov.selected_components))
        .collect();
    ordered.sort_by_key(|r| r.sort_order);

    let d = days as f64;
    let base = employee.daily_wage * d;
    let (overtime_hours, overtime_amount) = overtime(employee, ov);
    let mut gross =
        (employee.daily_wage + employee.meal_allowance + employee.fuel_allowance) * d
            + overtime_amount;
    let gross_before_earnings = gross;
    let mut taxable_amount = gross;
    let mut components = Vec::new();

    for rule in ordered.iter().filter(|r| r.kind == ComponentKind::Earning) {
        let amount = component_amount(rule, days, base, gross_before_earnings);
        gross += amount;
        if rule.taxable {
            taxable_amount += amount;
        }
        components.push(CalculatedComponent {
            pay_component_id: Some(rule.id),
            name: rule.name.clone(),
            kind: ComponentKind::Earning,
            amount,
            taxable: rule.taxable,
        });
    }

    let mut deductions = 0.0;
    for custom in &ov.custom_components {
        match custom.kind {
            ComponentKind::Earning => {
                gross += custom.amount;
                if custom.taxable {
                    taxable_amount += custom.amount;
                }
            }
            ComponentKind::Deduction => deductions += custom.amount,
        }
        components.push(CalculatedComponent {
            pay_component_id: None,
            name: custom.name.clone(),
            kind: custom.kind,
            amount: custom.amount,
            taxable: custom.taxable,
        });
    }

    let tax_amount = (taxable_amount * tax_rate / 100.0).round();

    for rule in ordered.iter().filter(|r| r.kind == ComponentKind::Deduction) {
        let amount = component_amount(rule, days, base, gross);
        deductions += amount;
        components.push(CalculatedComponent {
            pay_component_id: Some(rule.id),
            name: rule.name.clone(),
            kind: ComponentKind::Deduction,
            amount,
            taxable: rule.taxable,
        });
    }

    let cash_advance = ov.cash_advance.unwrap_or(0.0);
    deductions += cash_advance;

    Ok(LineCalculation {
        employee_id: employee.id,
        employee_name: employee.name.clone(),
        working_days: days,
        daily_wage: employee.daily_wage,
        meal_allowance: employee.meal_allowance,
        fuel_allowance: employee.fuel_allowance,
        base,
        overtime_hours,
        overtime_amount,
        cash_advance,
        gross,
        taxable_amount,
        tax_rate,
        tax_amount,
        total_deductions: deductions,
        net: gross - deductions - tax_amount,
        components,
    })
}

pub fn summarize(lines: &[LineCalculation]) -> PayrollSummary {
    let total_employees = lines.len();
    let total_net: f64 = lines.iter().map(|l| l.net).sum();
    PayrollSummary {
        total_employees,
        total_gross: lines.iter().map(|l| l.gross).sum(),
        total_deductions: lines.iter().map(|l| l.total_deductions).sum(),
        total_tax: lines.iter().map(|l| l.tax_amount).sum(),
        total_net,
        average_net: if total_employees > 0 {
            total_net / total_employees as f64
        } else {
            0.0
        },
    }
}

/// Totals per component across all lines, in first-seen order.
/// Custom components are grouped by name and kind.
pub fn summarize_components(lines: &[LineCalculation]) -> Vec<ComponentSummary> {
    type Key = (Option<u64>, String, ComponentKind);
    let mut order: Vec<(Key, String)> = Vec::new();
    let mut totals: HashMap<Key, (f64, usize)> = HashMap::new();

    for c in lines.iter().flat_map(|l| &l.components) {
        let grouping_name = match c.pay_component_id {
            Some(_) => String::new(),
            None => c.name.clone(),
        };
        let key = (c.pay_component_id, grouping_name, c.kind);
        let entry = totals.entry(key.clone()).or_insert_with(|| {
            order.push((key, c.name.clone()));
            (0.0, 0)
        });
        entry.0 += c.amount;
        entry.1 += 1;
    }

    order
        .into_iter()
        .map(|(key, name)| {
            let (total_amount, employee_count) = totals.get(&key).copied().unwrap_or((0.0, 0));
            ComponentSummary {
                pay_component_id: key.0,
                name,
                kind: key.2,
                total_amount,
                employee_count,
                average_amount: if employee_count > 0 {
                    total_amount / employee_count as f64
                } else {
                    0.0
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> PayrollEmployee {
        PayrollEmployee {
            id: 7,
            name: "Budi".into(),
            daily_wage: 100_000.0,
            meal_allowance: 20_000.0,
            fuel_allowance: 10_000.0,
        }
    }

    fn rule(id: u64, kind: ComponentKind, method: CalcMethod, basis: CalcBasis) -> ComponentRule {
        ComponentRule {
            id,
            name: format!("component {id}"),
            kind,
            taxable: false,
            method,
            basis,
            rate: None,
            amount: None,
            cap_min: None,
            cap_max: None,
            sort_order: id as i32,
        }
    }

    #[test]
    fn defaults_to_twenty_two_days_and_includes_allowances() {
        let line = calculate_line(&worker(), &[], &LineOverride::default(), 0.0).unwrap();
        assert_eq!(line.working_days, 22);
        assert_eq!(line.base, 2_200_000.0);
        assert_eq!(line.gross, 2_860_000.0);
        assert_eq!(line.net, 2_860_000.0);
        assert_eq!(line.tax_amount, 0.0);
    }

    #[test]
    fn rejects_working_days_out_of_range() {
        let ov = LineOverride {
            working_days: Some(32),
            ..Default::default()
        };
        assert!(matches!(
            calculate_line(&worker(), &[], &ov, 0.0),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn detailed_overtime_uses_monthly_hourly_rate() {
        let ov = LineOverride {
            working_days: Some(0),
            overtime_detail: Some(OvertimeDetail {
                normal_hours: 2.0,
                holiday_hours: 1.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let line = calculate_line(&worker(), &[], &ov, 0.0).unwrap();
        // round(100000 * 22 / 173) = 12717
        assert_eq!(line.overtime_hours, 3.0);
        assert_eq!(line.overtime_amount, (2.0 * 12717.0 * 1.5 + 12717.0 * 2.0_f64).round());
        assert_eq!(line.gross, line.overtime_amount);
    }

    #[test]
    fn overtime_hours_times_rate_beats_fixed_amount() {
        let ov = LineOverride {
            working_days: Some(0),
            overtime_hours: Some(4.0),
            overtime_rate: Some(20_000.0),
            overtime_amount: Some(1.0),
            ..Default::default()
        };
        let line = calculate_line(&worker(), &[], &ov, 0.0).unwrap();
        assert_eq!(line.overtime_amount, 80_000.0);

        let ov = LineOverride {
            working_days: Some(0),
            overtime_amount: Some(50_000.0),
            ..Default::default()
        };
        let line = calculate_line(&worker(), &[], &ov, 0.0).unwrap();
        assert_eq!(line.overtime_amount, 50_000.0);
    }

    #[test]
    fn component_methods_and_caps() {
        let mut flat = rule(1, ComponentKind::Earning, CalcMethod::Flat, CalcBasis::DailyWage);
        flat.amount = Some(150_000.0);
        assert_eq!(component_amount(&flat, 22, 0.0, 0.0), 150_000.0);

        let mut per_day = rule(2, ComponentKind::Earning, CalcMethod::PerDay, CalcBasis::Gross);
        per_day.rate = Some(5_000.0);
        assert_eq!(component_amount(&per_day, 20, 0.0, 0.0), 100_000.0);

        let mut pct = rule(3, ComponentKind::Deduction, CalcMethod::Percentage, CalcBasis::Gross);
        pct.rate = Some(2.0);
        assert_eq!(component_amount(&pct, 22, 1_000.0, 3_000_000.0), 60_000.0);
        pct.cap_max = Some(50_000.0);
        assert_eq!(component_amount(&pct, 22, 1_000.0, 3_000_000.0), 50_000.0);
        pct.cap_max = None;
        pct.cap_min = Some(75_000.0);
        assert_eq!(component_amount(&pct, 22, 1_000.0, 3_000_000.0), 75_000.0);

        let mut days = rule(4, ComponentKind::Earning, CalcMethod::Percentage, CalcBasis::WorkingDays);
        days.rate = Some(50.0);
        assert_eq!(component_amount(&days, 21, 0.0, 0.0), 11.0);
    }

    #[test]
    fn earnings_deductions_and_tax() {
        let mut transport = rule(1, ComponentKind::Earning, CalcMethod::Flat, CalcBasis::DailyWage);
        transport.amount = Some(140_000.0);
        transport.taxable = true;
        let mut bpjs = rule(2, ComponentKind::Deduction, CalcMethod::Percentage, CalcBasis::DailyWage);
        bpjs.rate = Some(1.0);

        let ov = LineOverride {
            cash_advance: Some(100_000.0),
            ..Default::default()
        };
        let line = calculate_line(&worker(), &[transport, bpjs], &ov, 5.0).unwrap();
        assert_eq!(line.gross, 3_000_000.0);
        assert_eq!(line.taxable_amount, 3_000_000.0);
        assert_eq!(line.tax_amount, 150_000.0);
        // 1% of base 2.2M plus cash advance
        assert_eq!(line.total_deductions, 122_000.0);
        assert_eq!(line.net, 3_000_000.0 - 122_000.0 - 150_000.0);
        assert_eq!(line.components.len(), 2);
    }

    #[test]
    fn gross_percentage_earnings_share_the_pre_earnings_gross() {
        let mut first = rule(1, ComponentKind::Earning, CalcMethod::Percentage, CalcBasis::Gross);
        first.rate = Some(10.0);
        let mut second = rule(2, ComponentKind::Earning, CalcMethod::Percentage, CalcBasis::Gross);
        second.rate = Some(10.0);
        let ov = LineOverride {
            working_days: Some(0),
            overtime_amount: Some(1_000.0),
            ..Default::default()
        };
        let line = calculate_line(&worker(), &[first, second], &ov, 0.0).unwrap();
        let amounts: Vec<f64> = line.components.iter().map(|c| c.amount).collect();
        assert_eq!(amounts, vec![100.0, 100.0]);
        assert_eq!(line.gross, 1_200.0);
    }

    #[test]
    fn selection_limits_components_and_custom_earnings_add_to_gross() {
        let mut a = rule(1, ComponentKind::Earning, CalcMethod::Flat, CalcBasis::DailyWage);
        a.amount = Some(10_000.0);
        let mut b = rule(2, ComponentKind::Earning, CalcMethod::Flat, CalcBasis::DailyWage);
        b.amount = Some(20_000.0);
        let ov = LineOverride {
            working_days: Some(0),
            selected_components: vec![2],
            custom_components: vec![
                CustomComponent {
                    name: "Bonus".into(),
                    kind: ComponentKind::Earning,
                    amount: 5_000.0,
                    taxable: false,
                },
                CustomComponent {
                    name: "Denda".into(),
                    kind: ComponentKind::Deduction,
                    amount: 1_000.0,
                    taxable: false,
                },
            ],
            ..Default::default()
        };
        let line = calculate_line(&worker(), &[a, b], &ov, 10.0).unwrap();
        assert_eq!(line.gross, 25_000.0);
        assert_eq!(line.taxable_amount, 0.0);
        assert_eq!(line.total_deductions, 1_000.0);
        assert_eq!(line.net, 24_000.0);
    }

    #[test]
    fn summaries_aggregate_lines() {
        let mut meal = rule(1, ComponentKind::Earning, CalcMethod::Flat, CalcBasis::DailyWage);
        meal.amount = Some(10_000.0);
        let ov = LineOverride {
            working_days: Some(1),
            ..Default::default()
        };
        let a = calculate_line(&worker(), std::slice::from_ref(&meal), &ov, 0.0).unwrap();
        let b = calculate_line(&worker(), &[meal], &ov, 0.0).unwrap();
        let summary = summarize(&[a.clone(), b.clone()]);
        assert_eq!(summary.total_employees, 2);
        assert_eq!(summary.total_gross, a.gross + b.gross);
        assert_eq!(summary.average_net, a.net);

        let per_component = summarize_components(&[a, b]);
        assert_eq!(per_component.len(), 1);
        assert_eq!(per_component[0].employee_count, 2);
        assert_eq!(per_component[0].total_amount, 20_000.0);
        assert_eq!(per_component[0].average_amount, 10_000.0);

        assert_eq!(summarize(&[]).average_net, 0.0);
    }
}
