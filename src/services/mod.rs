pub mod admin_service;
pub mod auth_service;
pub mod category_service;
pub mod lead_service;
pub mod order_service;
pub mod product_service;
pub mod review_service;
pub mod seller_service;
