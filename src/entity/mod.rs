pub mod categories;
pub mod order_items;
pub mod order_messages;
pub mod order_status_history;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod seller_profiles;
pub mod users;

pub use categories::Entity as Categories;
pub use order_items::Entity as OrderItems;
pub use order_messages::Entity as OrderMessages;
pub use order_status_history::Entity as OrderStatusHistory;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use reviews::Entity as Reviews;
pub use seller_profiles::Entity as SellerProfiles;
pub use users::Entity as Users;
