use std::sync::Arc;

use unseal_core::Broker;

pub type SharedBroker = Arc<Broker>;

#[derive(Clone)]
pub struct AppState {
    pub broker: SharedBroker,
}

impl AppState {
    pub fn new(broker: SharedBroker) -> Self {
        Self { broker }
    }
}
