use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::AccountType;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertSellerProfileRequest {
    pub business_name: String,
    pub account_type: AccountType,
    pub company_registration: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SellerDashboard {
    pub product_count: i64,
    pub active_product_count: i64,
    pub low_stock_count: i64,
    pub order_count: i64,
    pub units_sold: i64,
    pub revenue: i64,
}
