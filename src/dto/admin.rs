use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductStatusRequest {
    pub is_active: bool,
}

/// Who uploaded a product, as shown in the moderation list.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Uploader {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub is_active: bool,
    pub business_name: Option<String>,
    pub account_type: String,
    pub company_registration: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminProduct {
    pub product: Product,
    pub uploader: Option<Uploader>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct AdminProductList {
    #[schema(value_type = Vec<AdminProduct>)]
    pub items: Vec<AdminProduct>,
}
