use datafusion_extstat_integration::{QueryScope, RelationScope};
use extstat::stat::RelationId;

pub const ORDERS: u32 = 16384;
pub const CUSTOMER: u32 = 16390;

/// `orders` joined with `customer`.
pub fn orders_scope() -> QueryScope {
    QueryScope::default()
        .with_relation(RelationScope::table(
            "orders",
            RelationId::from(ORDERS),
            &["id", "customer_id", "quantity", "price", "state", "city"],
        ))
        .with_relation(RelationScope::table(
            "customer",
            RelationId::from(CUSTOMER),
            &["id", "first_name", "last_name", "state"],
        ))
}
