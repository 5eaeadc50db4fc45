//! In-memory factories for tests, benches and the simulator.
//!
//! Available to this crate's own tests and, behind the `test-utils` feature,
//! to integration tests and downstream crates.

pub mod mock_factory;
pub mod mock_xa;

pub use mock_factory::{MockConnection, MockConnectionFactory};
pub use mock_xa::{MockXaResource, MockXaResourceFactory};
