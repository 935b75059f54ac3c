use app_config::{InventoryCustodianConfig, OrderCoordinatorConfig};

#[test]
fn order_coordinator_config_loads_with_defaults() {
    let cfg = OrderCoordinatorConfig::load().unwrap();
    assert_eq!(cfg.order_db_name, "order_db");
    assert_eq!(cfg.http_port, 8081);
}

#[test]
fn inventory_custodian_config_loads_with_defaults() {
    let cfg = InventoryCustodianConfig::load().unwrap();
    assert_eq!(cfg.inventory_db_name, "inventory_db");
    assert_eq!(cfg.grpc_port, 50051);
}
