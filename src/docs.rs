use crate::api::buyer::{CreateBuyer, UpdateBuyer};
use crate::api::dashboard::{
    CostCategory, DashboardSummary, Finance, Kpi, PendingApprovals, Workforce,
};
use crate::api::employee::{CreateEmployee, EmployeeDetail, UpdateEmployee};
use crate::api::health::Health;
use crate::api::invoice::{CreateInvoice, RetentionMeta, UpdateInvoice};
use crate::api::kas_besar::{
    CategoryTotal, CreateKasBesar, KasBesarStats, KasBesarStatusChange, MonthlyTotal,
    UpdateKasBesar,
};
use crate::api::kas_kecil::{CreateKasKecil, UpdateKasKecil};
use crate::api::kwitansi::{CreateKwitansi, Terbilang, UpdateKwitansi};
use crate::api::pay_component::{CreatePayComponent, UpdatePayComponent};
use crate::api::payroll::{
    CreatePayroll, ImportPayroll, ImportedEmployee, LineDaysUpdate, PayrollEmployeeInput,
    PayrollLineDetail, PayrollPreview, PayrollRunDetail, PayrollRunListItem, PayrollStatusChange,
    PreviewPayroll, RunTotals, StatusChanged, UpdatePayroll,
};
use crate::api::production_report::{
    BuyerProduction, CreateProductionReport, ProductionStatusChange, ProductionSummary,
    UpdateProductionReport,
};
use crate::api::user::CreateUser;
use crate::domain::invoice::InvoiceTotals;
use crate::domain::payroll::{
    CalculatedComponent, ComponentSummary, CustomComponent, LineCalculation, LineOverride,
    OvertimeDetail, PayrollSummary,
};
use crate::model::buyer::Buyer;
use crate::model::employee::Employee;
use crate::model::invoice::{Invoice, InvoiceItem, InvoiceStatus};
use crate::model::kas::{KasBesarExpense, KasKecilExpense, KasStatus};
use crate::model::kwitansi::Kwitansi;
use crate::model::pay_component::{CalcBasis, CalcMethod, ComponentKind, PayComponent};
use crate::model::payroll::{PayrollLine, PayrollLineComponent, PayrollRun, PayrollStatus};
use crate::model::production_report::{ProductionReport, ProductionStatus};
use crate::model::role::Role;
use crate::model::user::User;
use crate::models::{LoginReqDto, LoginResponse, SessionUser, TokenPair};
use crate::utils::pagination::Pagination;
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Coal Admin API",
        version = "1.0.0",
        description = r#"
## Business administration for a coal mining company

Back office for site administration: receipts, invoices, cash books,
weighbridge production reports, employees and payroll.

### Key Features
- **Kwitansi**: receipts with the amount written out in Indonesian words
- **Invoices**: line items with server-side totals and a retention cap
- **Kas Kecil / Kas Besar**: petty and large cash expenses with approval workflow
- **Production reports**: gross/tare/net tonnage per truck and buyer
- **Payroll**: pay components, calculation, import, CSV export and kwitansi generation
- **Dashboard**: monthly figures across every module

### Security
Every endpoint except `/health` and `/auth/*` needs a **JWT Bearer** access token.
Approvals need the `approver` or `admin` role; user management and force deletes need `admin`.

### Response Format
- `{ "success": true, "data": ..., "message"?, "pagination"? }`
- `{ "success": false, "error": "...", "details"? }`
"#,
    ),
    paths(
        crate::api::health::health,

        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::employee::list_employees,
        crate::api::employee::create_employee,
        crate::api::employee::get_employee,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,

        crate::api::pay_component::list_components,
        crate::api::pay_component::create_component,
        crate::api::pay_component::get_component,
        crate::api::pay_component::update_component,
        crate::api::pay_component::delete_component,

        crate::api::payroll::list_payroll,
        crate::api::payroll::preview_payroll,
        crate::api::payroll::create_payroll,
        crate::api::payroll::import_payroll,
        crate::api::payroll::get_payroll,
        crate::api::payroll::update_payroll,
        crate::api::payroll::change_payroll_status,
        crate::api::payroll::export_payroll,
        crate::api::payroll::delete_payroll,

        crate::api::kwitansi::list_kwitansi,
        crate::api::kwitansi::terbilang_amount,
        crate::api::kwitansi::create_kwitansi,
        crate::api::kwitansi::get_kwitansi,
        crate::api::kwitansi::update_kwitansi,
        crate::api::kwitansi::delete_kwitansi,

        crate::api::invoice::list_invoices,
        crate::api::invoice::create_invoice,
        crate::api::invoice::get_invoice,
        crate::api::invoice::update_invoice,
        crate::api::invoice::delete_invoice,

        crate::api::kas_kecil::list_kas_kecil,
        crate::api::kas_kecil::create_kas_kecil,
        crate::api::kas_kecil::get_kas_kecil,
        crate::api::kas_kecil::update_kas_kecil,
        crate::api::kas_kecil::delete_kas_kecil,
        crate::api::kas_kecil::restore_kas_kecil,

        crate::api::kas_besar::list_kas_besar,
        crate::api::kas_besar::create_kas_besar,
        crate::api::kas_besar::get_kas_besar,
        crate::api::kas_besar::update_kas_besar,
        crate::api::kas_besar::change_kas_besar_status,
        crate::api::kas_besar::delete_kas_besar,
        crate::api::kas_besar::kas_besar_stats,

        crate::api::production_report::list_reports,
        crate::api::production_report::create_report,
        crate::api::production_report::get_report,
        crate::api::production_report::update_report,
        crate::api::production_report::change_report_status,
        crate::api::production_report::delete_report,
        crate::api::production_report::production_summary,

        crate::api::buyer::list_buyers,
        crate::api::buyer::create_buyer,
        crate::api::buyer::get_buyer,
        crate::api::buyer::update_buyer,
        crate::api::buyer::delete_buyer,

        crate::api::user::list_users,
        crate::api::user::create_user,

        crate::api::dashboard::dashboard_summary
    ),
    components(
        schemas(
            Health, Pagination, Role,
            LoginReqDto, LoginResponse, SessionUser, TokenPair,
            Employee, CreateEmployee, UpdateEmployee, EmployeeDetail,
            PayComponent, ComponentKind, CalcMethod, CalcBasis,
            CreatePayComponent, UpdatePayComponent,
            PayrollRun, PayrollLine, PayrollLineComponent, PayrollStatus,
            PayrollEmployeeInput, PreviewPayroll, CreatePayroll, LineDaysUpdate, UpdatePayroll,
            PayrollStatusChange, ImportedEmployee, ImportPayroll, PayrollPreview,
            PayrollRunListItem, PayrollLineDetail, RunTotals, PayrollRunDetail, StatusChanged,
            LineOverride, OvertimeDetail, CustomComponent, CalculatedComponent,
            LineCalculation, PayrollSummary, ComponentSummary,
            Kwitansi, CreateKwitansi, UpdateKwitansi, Terbilang,
            Invoice, InvoiceItem, InvoiceStatus, InvoiceTotals,
            CreateInvoice, UpdateInvoice, RetentionMeta,
            KasKecilExpense, KasBesarExpense, KasStatus,
            CreateKasKecil, UpdateKasKecil,
            CreateKasBesar, UpdateKasBesar, KasBesarStatusChange,
            KasBesarStats, MonthlyTotal, CategoryTotal,
            ProductionReport, ProductionStatus, CreateProductionReport,
            UpdateProductionReport, ProductionStatusChange, ProductionSummary, BuyerProduction,
            Buyer, CreateBuyer, UpdateBuyer,
            User, CreateUser,
            DashboardSummary, Kpi, Finance, Workforce, PendingApprovals, CostCategory
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and database check"),
        (name = "Auth", description = "Login, token refresh and logout"),
        (name = "Employee", description = "Employee records"),
        (name = "Pay Component", description = "Configurable earnings and deductions"),
        (name = "Payroll", description = "Payroll runs, import and export"),
        (name = "Kwitansi", description = "Payment receipts"),
        (name = "Invoice", description = "Invoices"),
        (name = "Kas Kecil", description = "Petty cash expenses"),
        (name = "Kas Besar", description = "Large cash expenses"),
        (name = "Production", description = "Weighbridge production reports"),
        (name = "Buyer", description = "Coal buyers"),
        (name = "User", description = "User accounts"),
        (name = "Dashboard", description = "Monthly summary"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_module() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/auth/login",
            "/api/payroll/{id}/status",
            "/api/kwitansi/terbilang",
            "/api/kas-besar/stats",
            "/api/production-reports/summary",
            "/api/dashboard/summary",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = doc.components.as_ref().map(|c| c.security_schemes.len());
        assert_eq!(schemes, Some(1));
    }
}
